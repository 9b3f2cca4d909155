//! Engine Controller: the per-open-channel session object and its state
//! machine.
//!
//! `EngineSession<A>` is the single owner of a target run;
//! [`crate::tracer`]'s thread holds only a `Weak` reference, upgraded once
//! at thread entry, so the session and its tracer never form an `Arc`
//! reference cycle.

use std::{
    marker::PhantomData,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, Weak,
    },
    thread::JoinHandle,
};

use fij_core::{Architecture, ExecutionRequest, ExecutionResult, FijError, InjectionPolicy, RestoreRecord, SessionState};
use nix::unistd::Pid;
use tracing::{info, instrument, warn};

use crate::{probe::Probe, tracer};

/// Shared state of one target run, reachable from the owning
/// [`EngineSession`] and (as a [`Weak`]) from the tracer thread.
pub(crate) struct Inner<A: Architecture> {
    pub(crate) state: Mutex<SessionState>,
    pub(crate) state_cv: Condvar,

    pub(crate) target_tgid: Mutex<Option<Pid>>,
    pub(crate) code_start: Mutex<Option<u64>>,
    pub(crate) target_path: Mutex<Option<PathBuf>>,
    pub(crate) policy: Mutex<Option<InjectionPolicy>>,
    pub(crate) iteration: Mutex<u64>,

    /// Flipped exactly once, false→true never happens again.
    pub(crate) target_alive: AtomicBool,

    pub(crate) probe: Mutex<Option<Probe>>,

    pub(crate) stop_requested: AtomicBool,

    pub(crate) restore: Mutex<Option<RestoreRecord>>,
    pub(crate) result: Mutex<Option<ExecutionResult>>,

    pub(crate) tracer_handle: Mutex<Option<JoinHandle<()>>>,

    _arch: PhantomData<A>,
}

impl<A: Architecture> Default for Inner<A> {
    fn default() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            state_cv: Condvar::new(),
            target_tgid: Mutex::new(None),
            code_start: Mutex::new(None),
            target_path: Mutex::new(None),
            policy: Mutex::new(None),
            iteration: Mutex::new(0),
            target_alive: AtomicBool::new(false),
            probe: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            restore: Mutex::new(None),
            result: Mutex::new(None),
            tracer_handle: Mutex::new(None),
            _arch: PhantomData,
        }
    }
}

impl<A: Architecture> Inner<A> {
    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
        self.state_cv.notify_all();
    }
}

/// A session object for one target run: owns its lifecycle state machine
/// (IDLE → SETUP → LAUNCHED → ARMED → RUNNING → DRAINING → DONE → IDLE)
/// and coordinates the Launcher, Tracer, and Probe.
///
/// `A` fixes the CPU architecture of the target this session can launch;
/// a process of architecture `A` is required (the session does not
/// cross-architecture inject).
pub struct EngineSession<A: Architecture> {
    inner: Arc<Inner<A>>,
}

impl<A: Architecture + 'static> Default for EngineSession<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Architecture + 'static> EngineSession<A> {
    /// Opens a new, idle session. Each call allocates fresh state — there
    /// is no process-wide singleton.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.lock().unwrap()
    }

    /// Synchronous variant: start the run and block until `DONE`, then
    /// return the result. Equivalent to `SEND` immediately followed by a
    /// blocking `RECEIVE`.
    #[instrument(skip(self, req), fields(path = %req.path.display(), iteration = req.iteration))]
    pub fn exec_and_fault(&self, req: ExecutionRequest) -> Result<ExecutionResult, FijError> {
        self.send(req)?;
        loop {
            match self.try_receive() {
                Ok(result) => return Ok(result),
                Err(FijError::Retry) => {
                    let guard = self.inner.state.lock().unwrap();
                    let _ = self
                        .inner
                        .state_cv
                        .wait_timeout(guard, std::time::Duration::from_millis(5))
                        .unwrap();
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Asynchronous variant: starts the run and returns immediately.
    /// Fails with [`FijError::Busy`] if the session is not `Idle`.
    #[instrument(skip(self, req), fields(path = %req.path.display(), iteration = req.iteration))]
    pub fn send(&self, req: ExecutionRequest) -> Result<(), FijError> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != SessionState::Idle {
                return Err(FijError::Busy);
            }
            *state = SessionState::Setup;
        }

        if let Err(err) = validate_policy(&req.policy) {
            self.inner.set_state(SessionState::Idle);
            return Err(err);
        }

        match self.start(req) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.inner.set_state(SessionState::Idle);
                Err(err)
            }
        }
    }

    /// Reads the most recent result. Fails with [`FijError::Retry`] if the
    /// session has not reached `Done`.
    pub fn try_receive(&self) -> Result<ExecutionResult, FijError> {
        let state = *self.inner.state.lock().unwrap();
        if state != SessionState::Done {
            return Err(FijError::Retry);
        }
        let result = self.inner.result.lock().unwrap().take().ok_or(FijError::Retry)?;
        self.inner.set_state(SessionState::Idle);
        Ok(result)
    }

    /// Sends a fatal signal to the running target; the Tracer observes
    /// the exit and drives normal teardown.
    pub fn kill(&self) -> Result<(), FijError> {
        let tgid = self.inner.target_tgid.lock().unwrap().ok_or(FijError::NotFound)?;
        nix::sys::signal::kill(tgid, nix::sys::signal::Signal::SIGKILL)
            .map_err(|_| FijError::NotFound)
    }

    /// Tears down the session: requests the tracer thread stop, joins it,
    /// disarms the probe if armed, reverts any file-backed byte. The
    /// tracer's own `finish` already does the probe disarm and restore
    /// revert before it returns; this repeats them as a fallback in case
    /// the thread never reached `finish` (e.g. `close()` raced a setup
    /// failure). Idempotent.
    pub fn close(&self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);

        if let Some(handle) = self.inner.tracer_handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        if let Some(mut probe) = self.inner.probe.lock().unwrap().take() {
            let _ = probe.disarm();
        }

        revert_restore_record(&self.inner);

        *self.inner.target_tgid.lock().unwrap() = None;
        self.inner.set_state(SessionState::Idle);
    }

    #[instrument(skip(self, req), fields(path = %req.path.display()))]
    fn start(&self, req: ExecutionRequest) -> Result<(), FijError> {
        let launched = fij_ptrace::fork_stopped(&req.path, &req.args, req.log_path.as_deref())?;
        let tgid = launched.pid;

        *self.inner.target_tgid.lock().unwrap() = Some(tgid);
        *self.inner.target_path.lock().unwrap() = Some(req.path.clone());
        *self.inner.policy.lock().unwrap() = Some(req.policy.clone());
        *self.inner.iteration.lock().unwrap() = req.iteration;
        self.inner.target_alive.store(true, Ordering::SeqCst);
        self.inner.set_state(SessionState::Launched);

        info!(tgid = tgid.as_raw(), "target launched, stopped pre-exec");

        // Everything past this point — seize, arm, the first continue,
        // and every later ptrace call or waitpid against `tgid` — must
        // come from one thread, so it all happens inside the tracer
        // rather than here on the caller's thread.
        let tracer_req = tracer::StartRequest {
            tgid,
            target_path: req.path.clone(),
            policy: req.policy.clone(),
            iteration: req.iteration,
        };
        let tracer_inner: Weak<Inner<A>> = Arc::downgrade(&self.inner);
        let tracer_handle = std::thread::Builder::new()
            .name("fij-tracer".into())
            .spawn(move || tracer::run::<A>(tracer_inner, tracer_req))
            .map_err(FijError::Io)?;
        *self.inner.tracer_handle.lock().unwrap() = Some(tracer_handle);

        Ok(())
    }
}

impl<A: Architecture> Drop for EngineSession<A> {
    fn drop(&mut self) {
        if self.state() != SessionState::Idle {
            // Reuse the same teardown path `close()` exposes, without
            // requiring `A: 'static` on `Drop` itself.
            self.inner.stop_requested.store(true, Ordering::SeqCst);
            if let Some(handle) = self.inner.tracer_handle.lock().unwrap().take() {
                let _ = handle.join();
            }
            if let Some(mut probe) = self.inner.probe.lock().unwrap().take() {
                let _ = probe.disarm();
            }
            revert_restore_record(&self.inner);
        }
    }
}

fn validate_policy(policy: &InjectionPolicy) -> Result<(), FijError> {
    if let Some(bit) = policy.reg_bit {
        if bit >= 64 {
            return Err(FijError::InvalidArgument("reg_bit must be in [0, 63]"));
        }
    }
    if policy.max_delay_ms < policy.min_delay_ms {
        return Err(FijError::InvalidArgument("max_delay_ms must be >= min_delay_ms"));
    }
    Ok(())
}

fn revert_restore_record<A: Architecture>(inner: &Inner<A>) {
    let mut restore = inner.restore.lock().unwrap();
    if let Some(record) = restore.as_mut() {
        if record.active {
            if let Some(tgid) = *inner.target_tgid.lock().unwrap() {
                if let Err(err) = fij_ptrace::write_byte_forced(tgid, record.address, record.original_byte) {
                    warn!(error = %err, "failed to revert file-backed memory injection");
                }
            }
            record.active = false;
        }
    }
}
