//! Core data model and architecture traits for the FIJ fault injection
//! engine.
//!
//! This crate has no knowledge of ptrace, process spawning, or any
//! particular CPU architecture; it defines the shapes that `fij-ptrace`,
//! `fij-engine`, `fij-arch-*`, and `fij-campaign` all share.

pub mod arch;
mod error;
mod model;

pub use self::{
    arch::{Architecture, RegisterView},
    error::FijError,
    model::{
        Classification, ExecutionRequest, ExecutionResult, InjectionPolicy, Pid, RestoreRecord,
        SessionState,
    },
};
