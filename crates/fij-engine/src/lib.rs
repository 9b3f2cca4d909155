//! Session, worker, and injection-primitive implementation of the fault
//! injection engine: everything above `fij-ptrace`'s raw syscall plumbing
//! and below `fij-campaign`'s multi-run orchestration.
//!
//! [`EngineSession`] is the entry point: open one, `send` an
//! [`ExecutionRequest`], and `try_receive`/`exec_and_fault` for the
//! [`ExecutionResult`]. Everything else in this crate — launcher, tracer,
//! probe, primitives — is internal machinery the session drives.

pub mod controller;
pub mod launcher;
pub mod primitives;
pub mod probe;
mod tracer;

pub use controller::EngineSession;
pub use fij_core::{ExecutionRequest, ExecutionResult, FijError, InjectionPolicy, SessionState};

#[cfg(feature = "arch-amd64")]
pub use fij_arch_amd64::Amd64;
#[cfg(feature = "arch-aarch64")]
pub use fij_arch_aarch64::Aarch64;
#[cfg(feature = "arch-riscv64")]
pub use fij_arch_riscv64::Riscv64;

/// The [`fij_core::Architecture`] matching the host this crate was built
/// for, selected by whichever single `arch-*` feature is enabled. Campaign
/// tooling that only ever targets the build host can use this instead of
/// naming an architecture type explicitly.
#[cfg(all(feature = "arch-amd64", target_arch = "x86_64"))]
pub type NativeArchitecture = fij_arch_amd64::Amd64;
#[cfg(all(feature = "arch-aarch64", target_arch = "aarch64"))]
pub type NativeArchitecture = fij_arch_aarch64::Aarch64;
#[cfg(all(feature = "arch-riscv64", target_arch = "riscv64"))]
pub type NativeArchitecture = fij_arch_riscv64::Riscv64;
