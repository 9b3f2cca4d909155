//! The engine's data model: requests, policies, and results.
//!
//! Field names and shapes follow the union of the abridged JSON schema and
//! the fields actually produced by the original campaign runner's
//! per-iteration log writer, so a `serde_json`-serialized [`ExecutionResult`]
//! is byte-compatible with the on-disk record shape campaign tooling
//! expects.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Process or thread id, as returned by `fork`/`clone` on Linux.
pub type Pid = i32;

/// One request to launch a target and (optionally) inject a fault into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Path to the target executable.
    pub path: PathBuf,
    /// Argument vector, not including `argv[0]`.
    pub args: Vec<String>,
    /// If set, the child's stdout/stderr are redirected here and stdin to
    /// a null sink.
    pub log_path: Option<PathBuf>,
    /// The fault-injection policy for this run.
    pub policy: InjectionPolicy,
    /// Caller-assigned iteration identifier, echoed back in the result.
    pub iteration: u64,
}

/// Governs how a single injection picks its target and timing.
///
/// See `fij/core/bitflip_ops.c`'s `ctx->exec.params` for the field set this
/// is grounded on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionPolicy {
    /// Weighting for memory-vs-register selection: `P(register) = 1 /
    /// (1 + weight_mem)`.
    pub weight_mem: u32,
    /// Force the injection to target memory regardless of `weight_mem`.
    #[serde(default)]
    pub only_mem: bool,
    /// Explicit register id to target, or `None` for a random GPR/PC.
    #[serde(default)]
    pub target_reg: Option<u32>,
    /// Explicit bit index in `[0, 63]`, or `None` for a random bit within
    /// the register's width.
    #[serde(default)]
    pub reg_bit: Option<u8>,
    /// Instruction-address offset relative to the executable's code start;
    /// if set, the probe subsystem arms a breakpoint there instead of
    /// injecting after a nondeterministic delay.
    #[serde(default)]
    pub target_pc: Option<u64>,
    /// Lower bound of the nondeterministic delay window, in milliseconds.
    pub min_delay_ms: u64,
    /// Upper bound of the nondeterministic delay window, in milliseconds.
    pub max_delay_ms: u64,
    /// Explicit thread index within the chosen process's thread group, or
    /// `None` for a random eligible thread.
    #[serde(default)]
    pub thread_index: Option<usize>,
    /// Inject once per eligible thread of the chosen process instead of
    /// once.
    #[serde(default)]
    pub all_threads: bool,
    /// Explicit index within the descendant process list, or `None` for a
    /// random descendant.
    #[serde(default)]
    pub process_index: Option<usize>,
    /// Measurement-only: launch and time the target but perform no
    /// mutation. Used to establish baseline timing.
    #[serde(default)]
    pub no_injection: bool,
}

impl InjectionPolicy {
    /// A policy equivalent to `no_injection=1` with the given timing
    /// window, used by the campaign runner's baseline phase.
    pub fn baseline(min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            weight_mem: 0,
            only_mem: false,
            target_reg: None,
            reg_bit: None,
            target_pc: None,
            min_delay_ms,
            max_delay_ms,
            thread_index: None,
            all_threads: false,
            process_index: None,
            no_injection: true,
        }
    }
}

/// Outcome of one `ExecutionRequest`.
///
/// Field names match the abridged JSON schema in spec §6 plus the
/// additional bookkeeping fields (`signal`, `pid_idx`, `thread_idx`) that
/// the original runner's `log_injection_iteration` writes but the
/// distilled schema only alludes to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Echoes `ExecutionRequest::iteration`.
    pub iteration_number: u64,
    /// Whether a fault was actually injected (as opposed to, e.g., the
    /// target exiting before the injector's delay elapsed).
    pub fault_injected: bool,
    /// Raw signal number extracted from the wait status, or 0 if the
    /// target exited normally or the monitor never observed a wait
    /// status (worker stopped before target exit).
    pub signal: i32,
    /// Whether the campaign runner judged this iteration a hang (wall
    /// clock exceeded 10x the baseline mean).
    pub process_hanged: bool,
    /// Raw exit code (low byte of the wait status for a normal exit).
    pub exit_code: i32,
    /// Thread group id of the target that was launched.
    pub target_tgid: Pid,
    /// Index within the descendant list of the process that was actually
    /// mutated.
    pub pid_idx: usize,
    /// Index within the thread list of the thread that was actually
    /// mutated, if the injection targeted a register.
    pub thread_idx: usize,
    /// `true` if the injection targeted memory, `false` for a register.
    pub memory_flip: bool,
    /// Virtual address mutated, if `memory_flip`.
    pub target_address: u64,
    /// Byte value before the flip, if `memory_flip`.
    pub target_before: u64,
    /// Byte value after the flip, if `memory_flip`.
    pub target_after: u64,
    /// Register name mutated, if not `memory_flip`.
    pub register_name: String,
    /// Wall-clock duration of the injection itself (quiesce through
    /// resume), in nanoseconds.
    pub injection_time_ns: u64,
    /// Output files captured for classification (see
    /// `fij_file_tracking.c`'s `fij_capture_output_files`).
    #[serde(default)]
    pub output_files: Vec<PathBuf>,
}

/// One classified outcome of a campaign iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    /// Non-zero exit status and the runner judged it a hang.
    Hang,
    /// Non-zero exit status, not judged a hang.
    Crash,
    /// Zero exit status but at least one output file differs from the
    /// golden baseline (silent data corruption).
    Sdc,
    /// Zero exit status, output identical to baseline.
    Benign,
}

impl Classification {
    /// Classifies a completed, fault-injected iteration against whether
    /// any output file differed from the baseline.
    ///
    /// Callers must have already filtered out `fault_injected == false`
    /// iterations (those are retried, not classified).
    pub fn classify(result: &ExecutionResult, any_output_differs: bool) -> Self {
        // A signal-terminated target has `exit_code == 0` and `signal != 0`
        // (see `tracer::finish`); spec §4.7's "exit status != 0" means the
        // whole wait status, not just the exit-code half of it.
        let terminated = result.exit_code != 0 || result.signal != 0;
        if terminated && result.process_hanged {
            Classification::Hang
        } else if terminated {
            Classification::Crash
        } else if any_output_differs {
            Classification::Sdc
        } else {
            Classification::Benign
        }
    }
}

/// Lifecycle state of an [`EngineSession`](crate::EngineSession)-equivalent
/// owner, mirroring spec §4.2's state machine one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No target launched; the idle state between requests.
    Idle,
    /// A request has been accepted and the target is being spawned.
    Setup,
    /// The target is stopped pre-first-instruction.
    Launched,
    /// The probe has been armed (only reachable when `target_pc` is set).
    Armed,
    /// The continue signal has been sent and the target is executing.
    Running,
    /// Teardown is in progress: injector canceled, probe disarmed, file
    /// byte reverted, descendants freed.
    Draining,
    /// The session has a result ready to collect.
    Done,
}

/// The restore record for a file-backed memory injection: the original
/// byte value and where it came from, kept so the mutated byte can be
/// reverted before it reaches disk via `msync`/page writeback.
#[derive(Debug, Clone, Copy)]
pub struct RestoreRecord {
    /// Virtual address (in the target's address space) that was mutated.
    pub address: u64,
    /// Byte offset of `address` within its backing page.
    pub page_offset: usize,
    /// The byte value before the flip.
    pub original_byte: u8,
    /// Whether this record still needs to be reverted.
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result(exit_code: i32, process_hanged: bool) -> ExecutionResult {
        ExecutionResult {
            exit_code,
            process_hanged,
            ..Default::default()
        }
    }

    #[test]
    fn classify_is_total_over_the_four_outcomes() {
        assert_eq!(Classification::classify(&sample_result(0, false), false), Classification::Benign);
        assert_eq!(Classification::classify(&sample_result(0, false), true), Classification::Sdc);
        assert_eq!(Classification::classify(&sample_result(1, false), false), Classification::Crash);
        assert_eq!(Classification::classify(&sample_result(1, true), false), Classification::Hang);
    }

    #[test]
    fn hang_takes_priority_over_crash_when_both_flags_are_set() {
        // A nonzero exit plus `process_hanged` is always HANG, regardless
        // of whether the output also differs from the baseline.
        assert_eq!(Classification::classify(&sample_result(137, true), true), Classification::Hang);
    }

    #[test]
    fn signal_termination_with_zero_exit_code_classifies_crash() {
        // A SIGSEGV'd target reports exit_code == 0, signal == 11 (see
        // `tracer::finish`); this must not be mistaken for a clean exit.
        let result = ExecutionResult {
            exit_code: 0,
            signal: 11,
            ..Default::default()
        };
        assert_eq!(Classification::classify(&result, false), Classification::Crash);
    }

    #[test]
    fn signal_termination_with_hang_flag_classifies_hang() {
        // A runner-issued SIGKILL after a hang timeout: exit_code == 0,
        // signal == 9, process_hanged == true.
        let result = ExecutionResult {
            exit_code: 0,
            signal: 9,
            process_hanged: true,
            ..Default::default()
        };
        assert_eq!(Classification::classify(&result, false), Classification::Hang);
    }

    #[test]
    fn baseline_policy_forces_no_injection_with_the_given_delay_window() {
        let policy = InjectionPolicy::baseline(10, 200);
        assert!(policy.no_injection);
        assert!(!policy.only_mem);
        assert_eq!(policy.min_delay_ms, 10);
        assert_eq!(policy.max_delay_ms, 200);
        assert_eq!(policy.target_reg, None);
    }
}
