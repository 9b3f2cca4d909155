//! Tracer: the single thread that owns ptrace for one target run.
//!
//! Linux requires every ptrace request other than `PTRACE_ATTACH`/
//! `PTRACE_SEIZE`, and the `waitpid` that reaps a tracee's ptrace-stop
//! events, to originate from the exact thread that performed the seize.
//! This module is therefore the only place that touches a running
//! target's registers or memory: it seizes, arms the probe, continues
//! the target, and then owns one loop that both reaps wait-status events
//! and performs the injection itself, whether that's triggered by its own
//! elapsed delay or by catching the armed breakpoint's trap — the same
//! division of labor a debugger's tracer thread gives itself.
//!
//! Grounded on `fij/core/monitor.c` (the wait loop and its event
//! handling) and `fij/core/bitflip_thread.c` (the nondeterministic-delay
//! and probe-gated injection timing), folded into one thread because
//! this engine runs against the real kernel's thread-affinity rule for
//! ptrace rather than a kernel module's uprobe callback.

use std::{
    sync::{atomic::Ordering, Weak},
    thread,
    time::{Duration, Instant},
};

use fij_core::{Architecture, ExecutionResult, InjectionPolicy, SessionState};
use nix::{
    sys::{
        ptrace,
        signal::{self, Signal},
        wait::{waitpid, WaitPidFlag, WaitStatus},
    },
    unistd::Pid,
};
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::{controller::Inner, primitives, probe::Probe};

/// Polling cadence of the combined wait-status/injection-timer loop.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Parameters the tracer needs to take a freshly forked, self-stopped
/// target through seize, arm, and continue.
pub(crate) struct StartRequest {
    pub(crate) tgid: Pid,
    pub(crate) target_path: std::path::PathBuf,
    pub(crate) policy: InjectionPolicy,
    pub(crate) iteration: u64,
}

#[instrument(skip(inner, req), fields(tgid = req.tgid.as_raw(), iteration = req.iteration))]
pub(crate) fn run<A: Architecture>(inner: Weak<Inner<A>>, req: StartRequest) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let tgid = req.tgid;

    if let Err(err) = fij_ptrace::seize_to_exec_stop(tgid) {
        warn!(error = %err, "failed to seize target at its post-exec stop");
        kill_and_reap(tgid);
        finish(&inner, tgid, req.iteration, 0, Signal::SIGKILL as i32, false);
        return;
    }

    let code_start = fij_ptrace::code_start(tgid, &req.target_path).unwrap_or(0);
    *inner.code_start.lock().unwrap() = Some(code_start);

    if let Some(offset) = req.policy.target_pc {
        let va = crate::probe::resolve_va(code_start, offset);
        match Probe::arm::<A>(tgid, va) {
            Ok(probe) => {
                *inner.probe.lock().unwrap() = Some(probe);
                inner.set_state(SessionState::Armed);
                info!(va, "probe armed");
            }
            Err(err) => {
                warn!(error = %err, "probe arming failed, killing target");
                kill_and_reap(tgid);
                finish(&inner, tgid, req.iteration, 0, Signal::SIGKILL as i32, false);
                return;
            }
        }
    }

    if let Err(errno) = ptrace::cont(tgid, None) {
        warn!(%errno, "failed to continue target after arming");
        kill_and_reap(tgid);
        finish(&inner, tgid, req.iteration, 0, Signal::SIGKILL as i32, false);
        return;
    }
    inner.set_state(SessionState::Running);

    let deadline = nondeterministic_deadline(&req.policy);
    let start = Instant::now();
    let mut injected = false;

    loop {
        if inner.stop_requested.load(Ordering::SeqCst) {
            finish(&inner, tgid, req.iteration, 0, 0, false);
            return;
        }

        match waitpid(tgid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                info!(tgid = tgid.as_raw(), code, "target exited");
                finish(&inner, tgid, req.iteration, code, 0, false);
                return;
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                info!(tgid = tgid.as_raw(), ?signal, "target killed by signal");
                finish(&inner, tgid, req.iteration, 0, signal as i32, false);
                return;
            }
            Ok(WaitStatus::PtraceEvent(pid, Signal::SIGTRAP, event)) if event == libc::PTRACE_EVENT_EXIT => {
                // The target is still alive at this stop (its fd table
                // hasn't been torn down yet); capture output files now,
                // the one point where a kernel-side fdtable walk has a
                // readable user-space equivalent left.
                let files = fij_ptrace::output_files(pid);
                if !files.is_empty() {
                    let mut result = inner.result.lock().unwrap();
                    let draft = result.get_or_insert_with(|| ExecutionResult {
                        iteration_number: req.iteration,
                        target_tgid: pid.as_raw(),
                        ..Default::default()
                    });
                    draft.output_files = files;
                }
                // Let the leader proceed so the subsequent `WNOHANG` poll
                // observes the real exit status.
                let _ = ptrace::cont(pid, None);
            }
            Ok(WaitStatus::Stopped(pid, Signal::SIGTRAP)) if pid == tgid && inner.probe.lock().unwrap().is_some() => {
                handle_breakpoint_hit::<A>(&inner, pid);
                if !injected {
                    injected = true;
                    trigger_injection::<A>(&inner, tgid, &req.policy, req.iteration, start.elapsed());
                }
            }
            Ok(WaitStatus::Stopped(pid, signal)) => {
                // Not our breakpoint: forward the signal so the target's
                // own disposition (terminate, core-dump, ignore) runs.
                debug!(?signal, "forwarding non-probe stop signal to target");
                let _ = ptrace::cont(pid, Some(signal));
            }
            Ok(_) => {}
            Err(nix::errno::Errno::ECHILD) => {
                // Already reaped elsewhere (shouldn't happen — this
                // thread is the sole waiter — but exit cleanly).
                finish(&inner, tgid, req.iteration, 0, 0, false);
                return;
            }
            Err(errno) => {
                warn!(%errno, "waitpid failed in tracer loop");
            }
        }

        if !injected {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    injected = true;
                    trigger_injection::<A>(&inner, tgid, &req.policy, req.iteration, start.elapsed());
                }
            }
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Resolves the nondeterministic-delay deadline, or `None` when injection
/// is instead gated on the armed breakpoint's trap.
fn nondeterministic_deadline(policy: &InjectionPolicy) -> Option<Instant> {
    if policy.target_pc.is_some() {
        return None;
    }
    let mut rng = rand::rng();
    let delay_ms = if policy.max_delay_ms <= policy.min_delay_ms {
        policy.min_delay_ms
    } else {
        rng.random_range(policy.min_delay_ms..=policy.max_delay_ms)
    };
    Some(Instant::now() + Duration::from_millis(delay_ms))
}

fn handle_breakpoint_hit<A: Architecture>(inner: &Inner<A>, pid: Pid) {
    let va = {
        let mut probe = inner.probe.lock().unwrap();
        match probe.as_mut() {
            Some(p) => {
                let va = p.va;
                if let Err(err) = p.disarm() {
                    warn!(error = %err, "failed to disarm probe after hit");
                }
                va
            }
            None => return,
        }
    };
    *inner.probe.lock().unwrap() = None;

    // Rewind the program counter to the breakpoint's address regardless
    // of the architecture's trap-instruction auto-advance behavior (x86
    // advances past `int3`; arm64/riscv64 typically don't) — setting it
    // explicitly is correct for every architecture since the exact VA is
    // already known.
    if let Ok(mut frame) = fij_ptrace::get_regs::<A::Frame>(pid) {
        A::set_instruction_pointer(&mut frame, va);
        let _ = fij_ptrace::set_regs(pid, &frame);
    }

    if let Err(errno) = ptrace::cont(pid, None) {
        warn!(%errno, "failed to resume target after probe hit");
    }
}

/// Performs the flip (unless the policy says not to) and records the
/// iteration's result, then — for `all_threads` mode — requests teardown
/// instead of waiting for the target to exit on its own.
fn trigger_injection<A: Architecture>(
    inner: &Inner<A>,
    tgid: Pid,
    policy: &InjectionPolicy,
    iteration: u64,
    waited: Duration,
) {
    if !inner.target_alive.load(Ordering::SeqCst) {
        record_result(inner, tgid, iteration, waited, None);
        return;
    }

    if policy.no_injection {
        info!("no_injection policy, skipping flip");
        record_result(inner, tgid, iteration, waited, None);
    } else {
        let flip_start = Instant::now();
        let (outcomes, error) = primitives::flip_one_random_target::<A>(tgid, policy);
        let flip_duration = flip_start.elapsed();

        if let Some(err) = &error {
            warn!(error = %err, "injection attempt did not complete cleanly");
        }
        for outcome in &outcomes {
            info!(
                memory_flip = outcome.memory_flip,
                register = %outcome.register_name,
                address = outcome.target_address,
                before = outcome.target_before,
                after = outcome.target_after,
                flip_duration_ns = flip_duration.as_nanos() as u64,
                "performed injection"
            );
        }

        if let Some(first) = outcomes.first() {
            if let Some(restore) = first.restore {
                *inner.restore.lock().unwrap() = Some(restore);
            }
        }

        // `injection_time_ns` records the realized sleep/probe-wait delay
        // (`waited`), not the quiesce-through-resume flip span: spec §4.4
        // and the §8 testable property both constrain it to
        // `[min_delay_ms, max_delay_ms]`, which `flip_duration` (a few µs)
        // would never satisfy.
        record_result(inner, tgid, iteration, waited, outcomes.first().cloned());
    }

    if policy.all_threads {
        // RUNNING→DRAINING happens as soon as the flip completes in
        // `all_threads` mode rather than waiting for the target to exit
        // on its own; the next loop iteration observes this flag and
        // drives teardown.
        inner.stop_requested.store(true, Ordering::SeqCst);
    }
}

fn record_result<A: Architecture>(
    inner: &Inner<A>,
    tgid: Pid,
    iteration: u64,
    realized: Duration,
    outcome: Option<primitives::InjectionOutcome>,
) {
    let mut result = inner.result.lock().unwrap();
    let draft = result.get_or_insert_with(|| ExecutionResult {
        iteration_number: iteration,
        target_tgid: tgid.as_raw(),
        ..Default::default()
    });

    draft.injection_time_ns = realized.as_nanos() as u64;

    if let Some(outcome) = outcome {
        draft.fault_injected = true;
        draft.memory_flip = outcome.memory_flip;
        draft.pid_idx = outcome.pid_idx;
        draft.thread_idx = outcome.thread_idx;
        draft.target_tgid = outcome.target_tgid.as_raw();
        draft.target_address = outcome.target_address;
        draft.target_before = outcome.target_before;
        draft.target_after = outcome.target_after;
        draft.register_name = outcome.register_name;
    } else {
        draft.fault_injected = false;
    }
}

/// `SIGKILL`s and reaps a target that never made it to a running state
/// (seize, arm, or initial continue failed), so a setup failure can
/// never leave a stopped process behind.
fn kill_and_reap(tgid: Pid) {
    let _ = signal::kill(tgid, Signal::SIGKILL);
    let _ = waitpid(tgid, None);
}

/// Tears down the session's bookkeeping and moves it to `Done`: disarms
/// the probe if still armed, reverts any file-backed byte, and writes
/// the final exit/signal/hang fields into the result draft.
fn finish<A: Architecture>(inner: &Inner<A>, tgid: Pid, iteration: u64, exit_code: i32, signal: i32, hanged: bool) {
    inner.target_alive.store(false, Ordering::SeqCst);
    inner.set_state(SessionState::Draining);

    if let Some(mut probe) = inner.probe.lock().unwrap().take() {
        let _ = probe.disarm();
    }

    {
        let mut restore = inner.restore.lock().unwrap();
        if let Some(record) = restore.as_mut() {
            if record.active {
                if let Err(err) = fij_ptrace::write_byte_forced(tgid, record.address, record.original_byte) {
                    warn!(error = %err, "failed to revert file-backed memory injection");
                }
                record.active = false;
            }
        }
    }

    let mut result = inner.result.lock().unwrap();
    let draft = result.get_or_insert_with(|| ExecutionResult {
        iteration_number: iteration,
        target_tgid: tgid.as_raw(),
        ..Default::default()
    });
    draft.exit_code = exit_code;
    draft.signal = signal;
    draft.process_hanged = hanged;
    drop(result);

    inner.set_state(SessionState::Done);
}
