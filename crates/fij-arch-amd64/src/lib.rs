//! AMD64 register map.
//!
//! Grounded on `fij_regs.c`'s `fij_arch_map_x86`: the kernel module reaches
//! into `struct pt_regs` by field address; here the frame is
//! `libc::user_regs_struct`, the layout `PTRACE_GETREGS`/`PTRACE_SETREGS`
//! read and write directly on Linux/amd64.

use fij_core::{Architecture, FijError, RegisterView};

/// General-purpose registers plus the program counter, matching the order
/// `fij_core.cpp`'s name table and the distilled spec's "random among the
/// arch's GPRs+PC" both assume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RegisterId {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    Rip,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl From<RegisterId> for u32 {
    fn from(id: RegisterId) -> u32 {
        id as u32
    }
}

impl TryFrom<u32> for RegisterId {
    type Error = FijError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use RegisterId::*;
        Ok(match value {
            0 => Rax,
            1 => Rbx,
            2 => Rcx,
            3 => Rdx,
            4 => Rsi,
            5 => Rdi,
            6 => Rbp,
            7 => Rsp,
            8 => Rip,
            9 => R8,
            10 => R9,
            11 => R10,
            12 => R11,
            13 => R12,
            14 => R13,
            15 => R14,
            16 => R15,
            _ => return Err(FijError::InvalidArgument("unknown amd64 register id")),
        })
    }
}

const GPRS: &[RegisterId] = {
    use RegisterId::*;
    &[
        Rax, Rbx, Rcx, Rdx, Rsi, Rdi, Rbp, Rsp, Rip, R8, R9, R10, R11, R12, R13, R14, R15,
    ]
};

/// The AMD64 architecture.
#[derive(Debug)]
pub struct Amd64;

impl Architecture for Amd64 {
    const BREAKPOINT: &'static [u8] = &[0xcc];

    type Frame = libc::user_regs_struct;
    type RegisterId = RegisterId;

    fn register_name(id: RegisterId) -> &'static str {
        use RegisterId::*;
        match id {
            Rax => "rax",
            Rbx => "rbx",
            Rcx => "rcx",
            Rdx => "rdx",
            Rsi => "rsi",
            Rdi => "rdi",
            Rbp => "rbp",
            Rsp => "rsp",
            Rip => "rip",
            R8 => "r8",
            R9 => "r9",
            R10 => "r10",
            R11 => "r11",
            R12 => "r12",
            R13 => "r13",
            R14 => "r14",
            R15 => "r15",
        }
    }

    fn general_purpose_registers() -> &'static [RegisterId] {
        GPRS
    }

    fn program_counter() -> RegisterId {
        RegisterId::Rip
    }

    fn stack_pointer() -> RegisterId {
        RegisterId::Rsp
    }

    fn resolve(id: RegisterId) -> Option<RegisterView> {
        use RegisterId::*;
        let offset = match id {
            Rax => std::mem::offset_of!(libc::user_regs_struct, rax),
            Rbx => std::mem::offset_of!(libc::user_regs_struct, rbx),
            Rcx => std::mem::offset_of!(libc::user_regs_struct, rcx),
            Rdx => std::mem::offset_of!(libc::user_regs_struct, rdx),
            Rsi => std::mem::offset_of!(libc::user_regs_struct, rsi),
            Rdi => std::mem::offset_of!(libc::user_regs_struct, rdi),
            Rbp => std::mem::offset_of!(libc::user_regs_struct, rbp),
            Rsp => std::mem::offset_of!(libc::user_regs_struct, rsp),
            Rip => std::mem::offset_of!(libc::user_regs_struct, rip),
            R8 => std::mem::offset_of!(libc::user_regs_struct, r8),
            R9 => std::mem::offset_of!(libc::user_regs_struct, r9),
            R10 => std::mem::offset_of!(libc::user_regs_struct, r10),
            R11 => std::mem::offset_of!(libc::user_regs_struct, r11),
            R12 => std::mem::offset_of!(libc::user_regs_struct, r12),
            R13 => std::mem::offset_of!(libc::user_regs_struct, r13),
            R14 => std::mem::offset_of!(libc::user_regs_struct, r14),
            R15 => std::mem::offset_of!(libc::user_regs_struct, r15),
        };
        Some(RegisterView { offset, width: 64 })
    }

    fn read(frame: &libc::user_regs_struct, id: RegisterId) -> Result<u64, FijError> {
        use RegisterId::*;
        Ok(match id {
            Rax => frame.rax,
            Rbx => frame.rbx,
            Rcx => frame.rcx,
            Rdx => frame.rdx,
            Rsi => frame.rsi,
            Rdi => frame.rdi,
            Rbp => frame.rbp,
            Rsp => frame.rsp,
            Rip => frame.rip,
            R8 => frame.r8,
            R9 => frame.r9,
            R10 => frame.r10,
            R11 => frame.r11,
            R12 => frame.r12,
            R13 => frame.r13,
            R14 => frame.r14,
            R15 => frame.r15,
        })
    }

    fn write(
        frame: &mut libc::user_regs_struct,
        id: RegisterId,
        value: u64,
    ) -> Result<(), FijError> {
        use RegisterId::*;
        match id {
            Rax => frame.rax = value,
            Rbx => frame.rbx = value,
            Rcx => frame.rcx = value,
            Rdx => frame.rdx = value,
            Rsi => frame.rsi = value,
            Rdi => frame.rdi = value,
            Rbp => frame.rbp = value,
            Rsp => frame.rsp = value,
            Rip => frame.rip = value,
            R8 => frame.r8 = value,
            R9 => frame.r9 = value,
            R10 => frame.r10 = value,
            R11 => frame.r11 = value,
            R12 => frame.r12 = value,
            R13 => frame.r13 = value,
            R14 => frame.r14 = value,
            R15 => frame.r15 = value,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_gpr() {
        let mut frame = libc::user_regs_struct {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbp: 0,
            rbx: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rax: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            orig_rax: 0,
            rip: 0,
            cs: 0,
            eflags: 0,
            rsp: 0,
            ss: 0,
            fs_base: 0,
            gs_base: 0,
            ds: 0,
            es: 0,
            fs: 0,
            gs: 0,
        };

        for &id in Amd64::general_purpose_registers() {
            Amd64::write(&mut frame, id, 0x4242_4242_4242_4242).unwrap();
            assert_eq!(Amd64::read(&frame, id).unwrap(), 0x4242_4242_4242_4242);
            assert!(Amd64::resolve(id).is_some());
        }
    }

    #[test]
    fn rejects_unknown_register_id() {
        assert!(RegisterId::try_from(255).is_err());
    }
}
