//! Remote memory access: read a byte through `process_vm_readv`, write one
//! back through `PTRACE_POKEDATA`'s force-write semantics.
//!
//! Linux's `process_vm_readv`/`writev` are the user-space equivalent of the
//! kernel's `access_process_vm`, but `process_vm_writev` respects normal
//! page permissions and will not break copy-on-write the way the kernel's
//! `FOLL_FORCE` does; `PTRACE_POKEDATA` always implies `FOLL_FORCE`
//! (it exists specifically so debuggers can write breakpoints into
//! read-only text), so the write path goes through ptrace even though the
//! read path is cheaper via `process_vm_readv`.

use std::io::IoSliceMut;

use fij_core::FijError;
use nix::{
    sys::uio::{process_vm_readv, RemoteIoVec},
    unistd::Pid,
};

/// Reads one byte at `va` in `pid`'s address space.
pub fn read_byte(pid: Pid, va: u64) -> Result<u8, FijError> {
    let mut buf = [0u8; 1];
    let local = [IoSliceMut::new(&mut buf)];
    let remote = [RemoteIoVec {
        base: va as usize,
        len: 1,
    }];

    let n = process_vm_readv(pid, &local, &remote).map_err(|errno| match errno {
        nix::errno::Errno::ESRCH => FijError::NotFound,
        nix::errno::Errno::EPERM => FijError::PermissionDenied("process_vm_readv denied"),
        _ => FijError::IoFailure("process_vm_readv"),
    })?;

    if n != 1 {
        return Err(FijError::IoFailure("short process_vm_readv"));
    }

    Ok(buf[0])
}

/// Writes `byte` at `va` in `pid`'s address space via `PTRACE_POKEDATA`,
/// forcing the write through even into a read-only, file-backed,
/// copy-on-write page — the userspace analogue of `get_user_pages` with
/// `FOLL_FORCE | FOLL_WRITE`.
pub fn write_byte_forced(pid: Pid, va: u64, byte: u8) -> Result<(), FijError> {
    write_bytes_forced(pid, va, &[byte])
}

/// Reads `len` bytes at `va` via `PTRACE_PEEKDATA`, one word at a time.
/// Used by the breakpoint module to save the original instruction bytes
/// before overwriting them with a trap.
pub fn read_bytes_forced(pid: Pid, va: u64, len: usize) -> Result<Vec<u8>, FijError> {
    let word_size = std::mem::size_of::<libc::c_long>();
    let mut out = Vec::with_capacity(len);
    let mut addr = va;

    while out.len() < len {
        let aligned = addr & !(word_size as u64 - 1);
        let offset_in_word = (addr - aligned) as usize;
        let word = peek_data(pid, aligned)?;
        let word_bytes = unsafe {
            std::slice::from_raw_parts(&word as *const libc::c_long as *const u8, word_size)
        };
        let take = (word_size - offset_in_word).min(len - out.len());
        out.extend_from_slice(&word_bytes[offset_in_word..offset_in_word + take]);
        addr += take as u64;
    }

    Ok(out)
}

/// Writes `bytes` at `va`, forcing each underlying word through
/// `PTRACE_POKEDATA` (read-modify-write per partially overlapping word).
pub fn write_bytes_forced(pid: Pid, va: u64, bytes: &[u8]) -> Result<(), FijError> {
    let word_size = std::mem::size_of::<libc::c_long>();
    let mut addr = va;
    let mut written = 0usize;

    while written < bytes.len() {
        let aligned = addr & !(word_size as u64 - 1);
        let offset_in_word = (addr - aligned) as usize;
        let take = (word_size - offset_in_word).min(bytes.len() - written);

        let mut word = peek_data(pid, aligned)?;
        let word_bytes = unsafe {
            std::slice::from_raw_parts_mut(&mut word as *mut libc::c_long as *mut u8, word_size)
        };
        word_bytes[offset_in_word..offset_in_word + take]
            .copy_from_slice(&bytes[written..written + take]);
        poke_data(pid, aligned, word)?;

        addr += take as u64;
        written += take;
    }

    Ok(())
}

fn peek_data(pid: Pid, aligned_addr: u64) -> Result<libc::c_long, FijError> {
    // `PTRACE_PEEKDATA` returns its result via the syscall's return value,
    // which is ambiguous with `-1` meaning error; clear errno first and
    // check it rather than the return value alone.
    unsafe { *libc::__errno_location() = 0 };
    let value = unsafe { libc::ptrace(libc::PTRACE_PEEKDATA, pid.as_raw(), aligned_addr as *mut libc::c_void, 0) };

    if value == -1 {
        let errno = unsafe { *libc::__errno_location() };
        if errno != 0 {
            return Err(match errno {
                libc::ESRCH => FijError::NotFound,
                libc::EPERM => FijError::PermissionDenied("ptrace peek denied"),
                _ => FijError::IoFailure("PTRACE_PEEKDATA"),
            });
        }
    }

    Ok(value as libc::c_long)
}

fn poke_data(pid: Pid, aligned_addr: u64, word: libc::c_long) -> Result<(), FijError> {
    let rc = unsafe {
        libc::ptrace(
            libc::PTRACE_POKEDATA,
            pid.as_raw(),
            aligned_addr as *mut libc::c_void,
            word,
        )
    };

    if rc == -1 {
        return Err(match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::ESRCH) => FijError::NotFound,
            Some(libc::EPERM) => FijError::PermissionDenied("ptrace poke denied"),
            _ => FijError::IoFailure("PTRACE_POKEDATA"),
        });
    }

    Ok(())
}
