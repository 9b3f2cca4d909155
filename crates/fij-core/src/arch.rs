//! Architecture-specific register access.
//!
//! Mirrors the split between a CPU-architecture description and its
//! register file that VMI-style introspection libraries use, generalized
//! here to a ptrace register frame instead of a hypervisor-exposed vCPU
//! state.

use std::fmt::Debug;

use crate::FijError;

/// Offset and bit-width of a single register within an architecture's
/// register frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterView {
    /// Byte offset of the register inside the architecture's raw register
    /// struct (e.g. `libc::user_regs_struct` on amd64).
    pub offset: usize,
    /// Width of the register in bits; always 32 or 64.
    pub width: u8,
}

/// Describes one CPU architecture: its register frame type, its general
/// purpose register enumeration, and the mapping from a register id to a
/// concrete slot in the frame.
///
/// This is the fault-injection analogue of `fij_regs.c`'s per-arch
/// `fij_arch_map` switch: `resolve` answers "where does this register id
/// live, and how wide is it", and `read`/`write` use that answer to get or
/// set a value without the caller needing to know the frame's layout.
pub trait Architecture {
    /// The machine code for a software breakpoint instruction on this
    /// architecture, written via `PTRACE_POKETEXT` when the probe
    /// subsystem arms a trap.
    ///
    /// # Architecture-specific
    ///
    /// - **amd64**: `&[0xcc]` (`INT3`)
    /// - **aarch64**: `&[0x00, 0x00, 0x20, 0xd4]` (`BRK #0`, little-endian)
    /// - **riscv64**: `&[0x02, 0x90]` (compressed `C.EBREAK`, little-endian)
    const BREAKPOINT: &'static [u8];

    /// The raw register frame as read from `PTRACE_GETREGS` (or
    /// `PTRACE_GETREGSET` on architectures without a fixed-layout ioctl).
    type Frame: Debug + Default + Clone + Copy;

    /// Register identifier. Kept as a plain `u32` so that `fij-core` need
    /// not know any architecture's concrete enum; each `fij-arch-*` crate
    /// exposes its own `#[repr(u32)]` enum that converts into this id.
    type RegisterId: Debug + Clone + Copy + Into<u32> + TryFrom<u32>;

    /// Human-readable name for a register id, used in `ExecutionResult`
    /// and log output (e.g. `"rax"`, `"x0"`, `"a3"`).
    fn register_name(id: Self::RegisterId) -> &'static str;

    /// All general-purpose registers plus the program counter, in the
    /// order used for "random register" selection.
    fn general_purpose_registers() -> &'static [Self::RegisterId];

    /// The register id that holds the program counter / instruction
    /// pointer.
    fn program_counter() -> Self::RegisterId;

    /// The register id that holds the stack pointer.
    fn stack_pointer() -> Self::RegisterId;

    /// Resolves a register id to its location and width within `Frame`.
    ///
    /// Returns `None` for a register id that does not exist on this
    /// architecture (the `-EINVAL` case of `fij_arch_map`).
    fn resolve(id: Self::RegisterId) -> Option<RegisterView>;

    /// Reads the current value of a register from the frame, as a 64-bit
    /// word (32-bit registers are zero-extended).
    fn read(frame: &Self::Frame, id: Self::RegisterId) -> Result<u64, FijError>;

    /// Writes a new value into a register of the frame. Values wider than
    /// the register's width are truncated.
    fn write(frame: &mut Self::Frame, id: Self::RegisterId, value: u64) -> Result<(), FijError>;

    /// Returns the current value of the instruction pointer.
    fn instruction_pointer(frame: &Self::Frame) -> u64 {
        Self::read(frame, Self::program_counter()).unwrap_or(0)
    }

    /// Sets the instruction pointer.
    fn set_instruction_pointer(frame: &mut Self::Frame, ip: u64) {
        let _ = Self::write(frame, Self::program_counter(), ip);
    }

    /// Resolves a register name (as it appears in a campaign config's
    /// `reg` field) to a raw register id, case-insensitively. Mirrors
    /// `fij_core.cpp`'s `reg_name_to_id` map, generalized to the common
    /// `"pc"`/`"sp"` aliases every architecture accepts in addition to its
    /// own canonical names.
    fn register_id_by_name(name: &str) -> Option<u32> {
        if name.eq_ignore_ascii_case("pc") {
            return Some(Self::program_counter().into());
        }
        if name.eq_ignore_ascii_case("sp") {
            return Some(Self::stack_pointer().into());
        }
        Self::general_purpose_registers()
            .iter()
            .find(|&&id| Self::register_name(id).eq_ignore_ascii_case(name))
            .map(|&id| id.into())
    }
}
