//! AArch64 register map.
//!
//! Grounded on `fij_regs.c`'s `fij_arch_map_arm64`: `X0`-`X30` index
//! directly into `pt_regs.regs[]`, `SP`/`PC` are named fields. On Linux,
//! `PTRACE_GETREGSET` with `NT_PRSTATUS` fills the same `regs`/`sp`/`pc`
//! layout via `libc::user_regs_struct`.

use fij_core::{Architecture, FijError, RegisterView};

/// `X0`-`X30`, `SP`, and `PC`, in the order the original's arm64 name
/// table uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RegisterId {
    X0,
    X1,
    X2,
    X3,
    X4,
    X5,
    X6,
    X7,
    X8,
    X9,
    X10,
    X11,
    X12,
    X13,
    X14,
    X15,
    X16,
    X17,
    X18,
    X19,
    X20,
    X21,
    X22,
    X23,
    X24,
    X25,
    X26,
    X27,
    X28,
    X29,
    X30,
    Sp,
    Pc,
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
        const TABLE: &[RegisterId] = &[
            X0, X1, X2, X3, X4, X5, X6, X7, X8, X9, X10, X11, X12, X13, X14, X15, X16, X17, X18,
            X19, X20, X21, X22, X23, X24, X25, X26, X27, X28, X29, X30, Sp, Pc,
        ];
        TABLE
            .get(value as usize)
            .copied()
            .ok_or(FijError::InvalidArgument("unknown aarch64 register id"))
    }
}

const GPRS: &[RegisterId] = {
    use RegisterId::*;
    &[
        X0, X1, X2, X3, X4, X5, X6, X7, X8, X9, X10, X11, X12, X13, X14, X15, X16, X17, X18, X19,
        X20, X21, X22, X23, X24, X25, X26, X27, X28, X29, X30, Sp, Pc,
    ]
};

/// The AArch64 architecture.
#[derive(Debug)]
pub struct Aarch64;

impl Architecture for Aarch64 {
    const BREAKPOINT: &'static [u8] = &[0x00, 0x00, 0x20, 0xd4];

    type Frame = libc::user_regs_struct;
    type RegisterId = RegisterId;

    fn register_name(id: RegisterId) -> &'static str {
        use RegisterId::*;
        match id {
            X0 => "x0",
            X1 => "x1",
            X2 => "x2",
            X3 => "x3",
            X4 => "x4",
            X5 => "x5",
            X6 => "x6",
            X7 => "x7",
            X8 => "x8",
            X9 => "x9",
            X10 => "x10",
            X11 => "x11",
            X12 => "x12",
            X13 => "x13",
            X14 => "x14",
            X15 => "x15",
            X16 => "x16",
            X17 => "x17",
            X18 => "x18",
            X19 => "x19",
            X20 => "x20",
            X21 => "x21",
            X22 => "x22",
            X23 => "x23",
            X24 => "x24",
            X25 => "x25",
            X26 => "x26",
            X27 => "x27",
            X28 => "x28",
            X29 => "x29",
            X30 => "x30",
            Sp => "sp",
            Pc => "pc",
        }
    }

    fn general_purpose_registers() -> &'static [RegisterId] {
        GPRS
    }

    fn program_counter() -> RegisterId {
        RegisterId::Pc
    }

    fn stack_pointer() -> RegisterId {
        RegisterId::Sp
    }

    fn resolve(id: RegisterId) -> Option<RegisterView> {
        use RegisterId::*;
        let base = std::mem::offset_of!(libc::user_regs_struct, regs);
        let offset = match id {
            Sp => std::mem::offset_of!(libc::user_regs_struct, sp),
            Pc => std::mem::offset_of!(libc::user_regs_struct, pc),
            _ => base + (id as usize) * std::mem::size_of::<u64>(),
        };
        Some(RegisterView { offset, width: 64 })
    }

    fn read(frame: &libc::user_regs_struct, id: RegisterId) -> Result<u64, FijError> {
        use RegisterId::*;
        Ok(match id {
            Sp => frame.sp,
            Pc => frame.pc,
            _ => frame.regs[id as usize],
        })
    }

    fn write(
        frame: &mut libc::user_regs_struct,
        id: RegisterId,
        value: u64,
    ) -> Result<(), FijError> {
        use RegisterId::*;
        match id {
            Sp => frame.sp = value,
            Pc => frame.pc = value,
            _ => frame.regs[id as usize] = value,
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
            regs: [0; 31],
            sp: 0,
            pc: 0,
            pstate: 0,
        };

        for &id in Aarch64::general_purpose_registers() {
            Aarch64::write(&mut frame, id, 0x1313_1313_1313_1313).unwrap();
            assert_eq!(Aarch64::read(&frame, id).unwrap(), 0x1313_1313_1313_1313);
        }
    }
}
