//! The quiescence primitive: stop a process group and confirm a specific
//! thread reached a stopped state before touching its register frame.
//!
//! Group-stops a chosen TGID; quiesce and resume must survive any error
//! path in between, so this is a RAII guard rather than a pair of free
//! functions the caller could forget to balance.

use std::{thread, time::{Duration, Instant}};

use fij_core::FijError;
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};

use crate::procfs::process_state;

/// Lower bound of the quiescence spin-wait.
const MIN_WAIT: Duration = Duration::from_millis(100);
/// Upper bound of the quiescence spin-wait.
const MAX_WAIT: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Holds a process group stopped for the duration of the guard; always
/// sends a group-continue on drop, successful quiesce or not, matching
/// "always issue a group-continue in the cleanup tail".
pub struct QuiesceGuard {
    tgid: Pid,
}

impl QuiesceGuard {
    /// Signals `tgid`'s process group to stop and waits (bounded
    /// `[100ms, 500ms]`) for `watch_thread` to report `Stopped` or
    /// `Traced`.
    pub fn acquire(tgid: Pid, watch_thread: Pid) -> Result<Self, FijError> {
        signal::kill(tgid, Signal::SIGSTOP).map_err(|_| FijError::NotFound)?;

        let deadline = Instant::now() + MAX_WAIT;
        let min_deadline = Instant::now() + MIN_WAIT;
        loop {
            match process_state(watch_thread) {
                Ok(state) if state.is_quiesced() && Instant::now() >= min_deadline => {
                    return Ok(Self { tgid });
                }
                Ok(state) if state.is_quiesced() => {
                    // Reached the stopped state faster than the minimum
                    // bound; still wait out the floor so a racing
                    // SIGCONT from elsewhere can't undo it underneath us.
                    thread::sleep(min_deadline.saturating_duration_since(Instant::now()));
                    return Ok(Self { tgid });
                }
                Ok(_) => {}
                Err(FijError::NotFound) => {
                    signal::kill(tgid, Signal::SIGCONT).ok();
                    return Err(FijError::NotFound);
                }
                Err(err) => return Err(err),
            }

            if Instant::now() >= deadline {
                signal::kill(tgid, Signal::SIGCONT).ok();
                return Err(FijError::Io(std::io::Error::other(
                    "timed out waiting for target to quiesce",
                )));
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for QuiesceGuard {
    fn drop(&mut self) {
        let _ = signal::kill(self.tgid, Signal::SIGCONT);
    }
}

/// Bound for [`wait_until_stopped`]'s poll.
const THREAD_STOP_BOUND: Duration = Duration::from_millis(100);

/// Polls `process_state(tid)` until it reports `Stopped`/`Traced` or
/// `THREAD_STOP_BOUND` elapses, without sending any signal itself.
///
/// A group-wide `SIGSTOP` (as [`QuiesceGuard::acquire`] sends) doesn't land
/// on every thread atomically, so a caller about to touch one thread's
/// register frame among several still needs this per-thread confirmation
/// even while holding a `QuiesceGuard` for the group.
pub fn wait_until_stopped(tid: Pid) -> Result<(), FijError> {
    let deadline = Instant::now() + THREAD_STOP_BOUND;
    loop {
        match process_state(tid) {
            Ok(state) if state.is_quiesced() => return Ok(()),
            Ok(_) => {}
            Err(err) => return Err(err),
        }

        if Instant::now() >= deadline {
            return Err(FijError::Io(std::io::Error::other(
                "timed out waiting for thread to stop",
            )));
        }

        thread::sleep(POLL_INTERVAL);
    }
}
