//! Generic register-frame access via `PTRACE_GETREGSET`/`PTRACE_SETREGSET`.
//!
//! `libc` only defines `PTRACE_GETREGS`/`PTRACE_SETREGS` (and the matching
//! `user_regs_struct`) for the architectures that still have a fixed-layout
//! ioctl; riscv64 never got one. `PTRACE_GETREGSET`/`PTRACE_SETREGSET` with
//! `NT_PRSTATUS` is the one request every architecture answers identically
//! (a `struct iovec` describing the caller's buffer), so `fij-core::Architecture`
//! frames are read and written through it uniformly, the same way
//! `fij_regs.c`'s `task_pt_regs` is arch-independent from the caller's side.

use std::mem::MaybeUninit;

use fij_core::FijError;
use nix::unistd::Pid;

/// Linux's `PTRACE_GETREGSET` request number, stable across all
/// architectures (`include/uapi/linux/ptrace.h`).
const PTRACE_GETREGSET: i32 = 0x4204;
/// Linux's `PTRACE_SETREGSET` request number.
const PTRACE_SETREGSET: i32 = 0x4205;
/// `NT_PRSTATUS`, selecting the general-purpose register set.
const NT_PRSTATUS: libc::c_long = 1;

#[repr(C)]
struct IoVec {
    iov_base: *mut libc::c_void,
    iov_len: libc::size_t,
}

/// Reads the general-purpose register frame of `pid` into a freshly
/// zeroed `Frame`.
///
/// `pid` must currently be stopped (traced or group-stopped); otherwise the
/// kernel returns `ESRCH`, surfaced here as [`FijError::NotFound`].
pub fn get_regs<Frame: Copy + Default>(pid: Pid) -> Result<Frame, FijError> {
    let mut frame = MaybeUninit::<Frame>::new(Frame::default());
    let mut iov = IoVec {
        iov_base: frame.as_mut_ptr() as *mut libc::c_void,
        iov_len: std::mem::size_of::<Frame>(),
    };

    let rc = unsafe {
        libc::ptrace(
            PTRACE_GETREGSET,
            pid.as_raw(),
            NT_PRSTATUS,
            &mut iov as *mut IoVec as *mut libc::c_void,
        )
    };

    if rc == -1 {
        return Err(ptrace_errno());
    }

    Ok(unsafe { frame.assume_init() })
}

/// Writes `frame` back as `pid`'s general-purpose register frame.
pub fn set_regs<Frame: Copy>(pid: Pid, frame: &Frame) -> Result<(), FijError> {
    let mut iov = IoVec {
        iov_base: frame as *const Frame as *mut libc::c_void,
        iov_len: std::mem::size_of::<Frame>(),
    };

    let rc = unsafe {
        libc::ptrace(
            PTRACE_SETREGSET,
            pid.as_raw(),
            NT_PRSTATUS,
            &mut iov as *mut IoVec as *mut libc::c_void,
        )
    };

    if rc == -1 {
        return Err(ptrace_errno());
    }

    Ok(())
}

fn ptrace_errno() -> FijError {
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => FijError::NotFound,
        Some(libc::EPERM) => FijError::PermissionDenied("ptrace denied"),
        _ => FijError::Io(std::io::Error::last_os_error()),
    }
}
