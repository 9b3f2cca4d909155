//! Software breakpoint arming/disarming.
//!
//! A redesign of the original's kernel uprobe: a uprobe attaches to a
//! *file offset* and fires for any process that maps that file there, but
//! a user-space ptrace-only engine only ever has one live attachment (the
//! target), so the probe is a classic saved-original-byte software
//! breakpoint instead — see DESIGN.md for the full rationale.

use fij_core::FijError;
use nix::unistd::Pid;

use crate::memory::{read_bytes_forced, write_bytes_forced};

/// Holds a single software breakpoint armed at one virtual address in one
/// target; restores the original bytes on drop, matching the
/// scope-guarded-pairing idiom used for quiesce/resume and pin/unpin.
pub struct BreakpointGuard {
    pid: Pid,
    va: u64,
    original: Vec<u8>,
    armed: bool,
}

impl BreakpointGuard {
    /// Saves the `trap.len()` bytes at `va` and overwrites them with
    /// `trap` (the architecture's breakpoint instruction encoding, e.g.
    /// `Amd64::BREAKPOINT`).
    pub fn arm(pid: Pid, va: u64, trap: &[u8]) -> Result<Self, FijError> {
        let original = read_bytes_forced(pid, va, trap.len())?;
        write_bytes_forced(pid, va, trap)?;
        Ok(Self {
            pid,
            va,
            original,
            armed: true,
        })
    }

    /// Synchronously restores the original bytes. Idempotent: calling
    /// this twice (or letting `Drop` run after an explicit call) is a
    /// no-op the second time.
    pub fn disarm(&mut self) -> Result<(), FijError> {
        if !self.armed {
            return Ok(());
        }
        write_bytes_forced(self.pid, self.va, &self.original)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for BreakpointGuard {
    fn drop(&mut self) {
        // The target may already be gone by teardown time; a `NotFound`
        // here is expected and not worth propagating from a destructor.
        let _ = self.disarm();
    }
}
