//! Target Launcher: spawn the target stopped before it executes a single
//! instruction.
//!
//! Grounded on `fij/core/exec_helper.c`'s `helper_child_init`, which raises
//! `SIGSTOP` against itself before `do_execve` runs. `std::process::Command`
//! exposes the same hook point via `pre_exec`: code registered there runs in
//! the forked child, after `fork`/`clone` but strictly before `execve`.

use std::{
    fs::{File, OpenOptions},
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use fij_core::FijError;
use nix::{
    sys::{
        ptrace,
        signal::Signal,
        wait::{waitpid, WaitPidFlag, WaitStatus},
    },
    unistd::Pid,
};

/// A target forked and self-`SIGSTOP`ped before it executes a single
/// user instruction, not yet ptrace-attached.
///
/// `pid` is both the process and thread-group id (a freshly spawned
/// process has exactly one thread).
pub struct LaunchedTarget {
    /// Thread-group id of the launched target.
    pub pid: Pid,
}

/// Spawns `path argv[1..]`, leaving it `SIGSTOP`ped before any user
/// instruction executes. Does not touch ptrace: the caller seizes it
/// with [`seize_to_exec_stop`] from whichever thread will own that
/// seize for the rest of the run.
///
/// `log_path`, if set, redirects the child's stdout/stderr there and its
/// stdin to `/dev/null`, matching the original's `log_path`/null-sink
/// convention. File descriptors above 2 are closed in the child's
/// `pre_exec` hook for parity with the original's "fds above 2 are closed
/// by convention" note.
pub fn fork_stopped(
    path: &Path,
    args: &[String],
    log_path: Option<&Path>,
) -> Result<LaunchedTarget, FijError> {
    let mut command = Command::new(path);
    command.args(args);

    if let Some(log_path) = log_path {
        let out = File::create(log_path)?;
        let err = out.try_clone()?;
        command.stdout(Stdio::from(out));
        command.stderr(Stdio::from(err));
        command.stdin(Stdio::from(OpenOptions::new().read(true).open("/dev/null")?));
    }

    // The open-fd ceiling is read here, in the parent, where allocating
    // is fine; the child only ever sees the resulting integer.
    let max_fd = open_fd_ceiling();

    // Safety: `raise` and `close` are async-signal-safe; `close` is called
    // over a fixed integer range rather than through an allocating
    // directory read, so nothing in this closure touches the allocator.
    // This closure runs in the forked child between `fork` and `execve`
    // with nothing else touched in the parent's address space.
    unsafe {
        command.pre_exec(move || {
            close_fds_above(2, max_fd);
            nix::sys::signal::raise(Signal::SIGSTOP)
                .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
            Ok(())
        });
    }

    let child = command.spawn()?;
    let pid = Pid::from_raw(child.id() as i32);
    // Drop the `Child` handle without reaping: the tracer thread owns
    // the wait loop for this pid from here on.
    std::mem::forget(child);

    match waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
        Ok(WaitStatus::Stopped(_, Signal::SIGSTOP)) => {}
        Ok(other) => {
            return Err(FijError::Io(std::io::Error::other(format!(
                "target did not reach pre-exec stop: {other:?}"
            ))))
        }
        Err(errno) => return Err(FijError::Io(std::io::Error::from(errno))),
    }

    Ok(LaunchedTarget { pid })
}

/// Seizes `pid` with `PTRACE_O_TRACEEXEC`/`PTRACE_O_TRACEEXIT`, continues
/// it past its self-`SIGSTOP`, and waits for the `PTRACE_EVENT_EXEC` stop
/// so the caller can arm a probe against the freshly mapped executable
/// before the first instruction runs.
///
/// Linux requires every ptrace request other than `PTRACE_SEIZE` itself,
/// and the `waitpid` that reaps a ptrace-stop, to come from the exact
/// thread that performed the seize. The caller MUST call this from the
/// one thread that will subsequently own every other ptrace call and
/// `waitpid` against `pid` for the rest of the run.
pub fn seize_to_exec_stop(pid: Pid) -> Result<(), FijError> {
    ptrace::seize(
        pid,
        ptrace::Options::PTRACE_O_TRACEEXEC | ptrace::Options::PTRACE_O_TRACEEXIT,
    )
    .map_err(|errno| FijError::Io(std::io::Error::from(errno)))?;
    // The target is still group-stopped from its self-SIGSTOP; seizing
    // does not resume it.
    ptrace::cont(pid, None).map_err(|errno| FijError::Io(std::io::Error::from(errno)))?;

    match waitpid(pid, None) {
        Ok(WaitStatus::PtraceEvent(_, Signal::SIGTRAP, event))
            if event == libc::PTRACE_EVENT_EXEC => Ok(()),
        Ok(other) => Err(FijError::Io(std::io::Error::other(format!(
            "target did not reach post-exec stop: {other:?}"
        )))),
        Err(errno) => Err(FijError::Io(std::io::Error::from(errno))),
    }
}

/// Resolves the load address of `path`'s executable text segment from
/// `/proc/<pid>/maps`, used as the base for `target_pc` offsets.
pub fn code_start(pid: Pid, path: &Path) -> Result<u64, FijError> {
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path));
    let vmas = crate::procfs::vmas(pid)?;
    vmas.into_iter()
        .find(|vma| vma.executable && vma.path.as_deref() == Some(canonical.as_path()))
        .map(|vma| vma.start)
        .ok_or(FijError::NotFound)
}

/// Reads the process's open-fd ceiling via `getrlimit`, clamped to a sane
/// bound so a child with an unlimited or huge `RLIMIT_NOFILE` doesn't spend
/// the pre-exec window looping over millions of fds. Called before `fork`,
/// where allocating and failing are both fine.
fn open_fd_ceiling() -> libc::c_int {
    const FALLBACK: libc::c_int = 4096;
    let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    let ok = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } == 0;
    if !ok || limit.rlim_cur == libc::RLIM_INFINITY {
        return FALLBACK;
    }
    limit.rlim_cur.min(FALLBACK as u64) as libc::c_int
}

/// Closes every fd in `(keep_below, max_fd]` by raw number.
///
/// Safety: async-signal-safe. Unlike enumerating `/proc/self/fd`, this
/// never allocates or calls into libc beyond the `close(2)` syscall itself,
/// so it's sound to run in a `pre_exec` hook between `fork` and `execve`
/// even if a sibling thread held the allocator's lock at fork time.
/// `close` on an fd that was never open is a harmless no-op.
fn close_fds_above(keep_below: libc::c_int, max_fd: libc::c_int) {
    for fd in (keep_below + 1)..=max_fd {
        unsafe {
            libc::close(fd);
        }
    }
}
