//! # FIJ — a single-bit fault injection engine
//!
//! FIJ perturbs a target user-space program under controlled conditions by
//! flipping one bit of either a CPU register or one byte of its address
//! space, then measures the outcome. It is used to evaluate a program's
//! resilience against transient single-bit faults (SEU-style events).
//!
//! # Quick Start
//!
//! Add the following to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! fij = { version = "0.1", features = ["arch-amd64"] }
//! ```
//!
//! Running one fault-injected iteration synchronously:
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//!
//! use fij::{Amd64, EngineSession, ExecutionRequest, InjectionPolicy};
//!
//! # fn main() -> Result<(), fij::FijError> {
//! let session = EngineSession::<Amd64>::new();
//! let result = session.exec_and_fault(ExecutionRequest {
//!     path: PathBuf::from("/bin/true"),
//!     args: Vec::new(),
//!     log_path: None,
//!     policy: InjectionPolicy {
//!         weight_mem: 0,
//!         only_mem: false,
//!         target_reg: None,
//!         reg_bit: None,
//!         target_pc: None,
//!         min_delay_ms: 0,
//!         max_delay_ms: 20,
//!         thread_index: None,
//!         all_threads: false,
//!         process_index: None,
//!         no_injection: false,
//!     },
//!     iteration: 0,
//! })?;
//! println!("exit={} memory_flip={}", result.exit_code, result.memory_flip);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The engine decomposes into a handful of small crates, each depended on
//! independently:
//!
//! - [`fij_core`] — the data model ([`ExecutionRequest`], [`ExecutionResult`],
//!   [`InjectionPolicy`]) and the [`Architecture`] trait every `fij-arch-*`
//!   crate implements. Has no knowledge of ptrace or process spawning.
//! - [`fij_ptrace`] — the ptrace-backed process control primitives: spawn a
//!   target stopped pre-exec, read/write its register frame, walk its VMAs
//!   and thread list, quiesce a process group, arm/disarm a software
//!   breakpoint.
//! - [`fij_engine`] — [`EngineSession`], the per-open-channel session object
//!   that owns one target run's IDLE→...→DONE lifecycle and coordinates the
//!   Launcher, Tracer, and Probe workers around it.
//! - `fij-arch-amd64`/`fij-arch-aarch64`/`fij-arch-riscv64` — per-architecture
//!   register maps, gated behind the `arch-*` feature flags below.
//! - [`fij_campaign`] — the baseline/injection campaign runner: JSON
//!   configuration loading, a bounded worker pool for running iterations in
//!   parallel, and CRASH/HANG/SDC/BENIGN classification against a golden
//!   baseline. Also the library half of the `fij-campaign` CLI binary.
//!
//! # Feature flags
//!
//! Exactly one `arch-*` feature should be active for the architecture the
//! campaign runner will launch targets on (all three are enabled by
//! default so the workspace builds everywhere; a consumer pinning to one
//! host architecture should set `default-features = false`).
//!
//! # Non-goals
//!
//! Multi-bit faults, permanent faults, fault models other than
//! XOR-with-one-bit, result persistence beyond a plain directory tree, and
//! hardening against a malicious target (the engine runs with the same
//! privileges as its target) are all out of scope.
//!
//! [`Architecture`]: fij_core::Architecture

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use fij_campaign as campaign;
pub use fij_core::{
    Architecture, Classification, ExecutionRequest, ExecutionResult, FijError, InjectionPolicy,
    Pid, RegisterView, RestoreRecord, SessionState,
};
pub use fij_engine::EngineSession;

#[cfg(feature = "arch-amd64")]
pub use fij_arch_amd64::Amd64;
#[cfg(feature = "arch-aarch64")]
pub use fij_arch_aarch64::Aarch64;
#[cfg(feature = "arch-riscv64")]
pub use fij_arch_riscv64::Riscv64;

#[cfg(all(feature = "arch-amd64", target_arch = "x86_64"))]
pub use fij_engine::NativeArchitecture;
#[cfg(all(feature = "arch-aarch64", target_arch = "aarch64"))]
pub use fij_engine::NativeArchitecture;
#[cfg(all(feature = "arch-riscv64", target_arch = "riscv64"))]
pub use fij_engine::NativeArchitecture;
