//! Target Launcher re-export.
//!
//! The actual spawn-stopped-then-seize sequence lives in
//! [`fij_ptrace::launcher`] since it is pure ptrace plumbing with no
//! dependency on session state; this module just gives it a name under
//! `fij_engine` matching the session's own component boundary.

pub use fij_ptrace::{code_start, fork_stopped, seize_to_exec_stop, LaunchedTarget};
