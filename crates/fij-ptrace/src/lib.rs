//! ptrace-backed process control for the FIJ fault injection engine.
//!
//! This crate is the direct analogue of the original kernel module's
//! arch-touching helpers (`access_process_vm`, `task_pt_regs`, `for_each_vma`,
//! `for_each_thread`) reimplemented as user-space syscalls: spawning a target
//! stopped pre-exec, reading/writing its register frame, walking its VMAs and
//! thread list through `/proc`, and reading/writing its memory remotely.
//!
//! `fij-core` defines *what* a register or a session looks like; this crate
//! supplies the *how* for Linux/ptrace. It has no knowledge of injection
//! policy or campaign reporting.

pub mod breakpoint;
pub mod launcher;
pub mod memory;
pub mod procfs;
pub mod quiesce;
pub mod regs;

pub use self::{
    breakpoint::BreakpointGuard,
    launcher::{code_start, fork_stopped, seize_to_exec_stop, LaunchedTarget},
    memory::{read_byte, read_bytes_forced, write_byte_forced, write_bytes_forced},
    procfs::{descendants, exe_path, output_files, process_state, thread_ids, vmas, ProcessState, Vma},
    quiesce::{wait_until_stopped, QuiesceGuard},
    regs::{get_regs, set_regs},
};
