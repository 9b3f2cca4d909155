//! Probe Subsystem: arms and disarms a one-shot instruction-address
//! breakpoint, and resolves the VA→file-offset pair the original records
//! for reporting purposes.
//!
//! **Adapted**: a kernel uprobe attaches to a *file offset* so it fires
//! for any process mapping that file there; a ptrace-only engine only
//! ever has one live attachment (the target it just launched), so arming
//! is a classic saved-original-byte software breakpoint
//! ([`fij_ptrace::BreakpointGuard`]) instead. The VA→file-offset
//! resolution is still computed and carried in the result so a report can
//! name *which instruction in the binary* was targeted, independent of
//! ASLR slide, even though arming itself uses the live VA.
//!
//! The callback contract ("verify the hitting task belongs to this
//! session, disarm, do no other work until the flip itself") is honored,
//! but it has no thread of its own: only the thread that owns the
//! `ptrace` attachment observes the `SIGTRAP`, which is [`crate::tracer`]'s
//! wait loop. Catching the trap there and performing the flip there are
//! the same step now that both run on the thread that holds the seize.

use fij_core::{Architecture, FijError};
use fij_ptrace::BreakpointGuard;
use nix::unistd::Pid;

/// A single armed instruction-address breakpoint.
pub struct Probe {
    guard: BreakpointGuard,
    /// The virtual address the breakpoint was armed at, used to reset
    /// the program counter after the trap is caught and the original
    /// bytes are restored.
    pub va: u64,
}

impl Probe {
    /// Arms a breakpoint for architecture `A` at `va` in `pid`.
    pub fn arm<A: Architecture>(pid: Pid, va: u64) -> Result<Self, FijError> {
        let guard = BreakpointGuard::arm(pid, va, A::BREAKPOINT)?;
        Ok(Self { guard, va })
    }

    /// Synchronously disarms the breakpoint, restoring the original
    /// bytes. Safe to call more than once.
    pub fn disarm(&mut self) -> Result<(), FijError> {
        self.guard.disarm()
    }
}

/// Resolves `target_pc` (an offset relative to the executable's code
/// start) to an absolute virtual address in the target.
pub fn resolve_va(code_start: u64, target_pc_offset: u64) -> u64 {
    code_start + target_pc_offset
}

/// Computes the `(file, file_offset)` pair for reporting purposes.
/// Returns `None` if `va` does not fall inside any
/// mapped VMA (e.g. the target has already exited).
pub fn va_to_file_offset(pid: Pid, va: u64) -> Result<Option<(std::path::PathBuf, u64)>, FijError> {
    fij_ptrace::procfs::file_offset(pid, va)
}
