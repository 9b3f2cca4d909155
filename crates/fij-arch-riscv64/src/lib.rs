//! RISC-V (rv64) register map.
//!
//! Grounded on `fij_regs.c`'s `fij_arch_map_riscv`: `x0`/`zero` has no
//! dedicated field in `pt_regs` and is rejected there, so it is rejected
//! here too rather than silently returning a fabricated zero. The frame
//! layout matches the kernel's `struct user_regs_struct` for riscv64
//! (`arch/riscv/include/uapi/asm/ptrace.h`), which `PTRACE_GETREGSET`
//! fills verbatim.

use fij_core::{Architecture, FijError, RegisterView};

/// The riscv64 ptrace register frame.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct Frame {
    pub pc: u64,
    pub ra: u64,
    pub sp: u64,
    pub gp: u64,
    pub tp: u64,
    pub t0: u64,
    pub t1: u64,
    pub t2: u64,
    pub s0: u64,
    pub s1: u64,
    pub a0: u64,
    pub a1: u64,
    pub a2: u64,
    pub a3: u64,
    pub a4: u64,
    pub a5: u64,
    pub a6: u64,
    pub a7: u64,
    pub s2: u64,
    pub s3: u64,
    pub s4: u64,
    pub s5: u64,
    pub s6: u64,
    pub s7: u64,
    pub s8: u64,
    pub s9: u64,
    pub s10: u64,
    pub s11: u64,
    pub t3: u64,
    pub t4: u64,
    pub t5: u64,
    pub t6: u64,
}

/// `ra`, `sp`, `gp`, `tp`, `t0`-`t6`, `s0`-`s11`, `a0`-`a7`, and `pc`.
/// `zero` (x0) is intentionally absent: it is hardwired and the original
/// rejects it rather than exposing a fake mutable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RegisterId {
    Ra,
    Sp,
    Gp,
    Tp,
    T0,
    T1,
    T2,
    S0,
    S1,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    S8,
    S9,
    S10,
    S11,
    T3,
    T4,
    T5,
    T6,
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
            Ra, Sp, Gp, Tp, T0, T1, T2, S0, S1, A0, A1, A2, A3, A4, A5, A6, A7, S2, S3, S4, S5,
            S6, S7, S8, S9, S10, S11, T3, T4, T5, T6, Pc,
        ];
        TABLE
            .get(value as usize)
            .copied()
            .ok_or(FijError::InvalidArgument("unknown riscv64 register id"))
    }
}

const GPRS: &[RegisterId] = {
    use RegisterId::*;
    &[
        Ra, Sp, Gp, Tp, T0, T1, T2, S0, S1, A0, A1, A2, A3, A4, A5, A6, A7, S2, S3, S4, S5, S6,
        S7, S8, S9, S10, S11, T3, T4, T5, T6, Pc,
    ]
};

/// The RISC-V rv64 architecture.
#[derive(Debug)]
pub struct Riscv64;

impl Architecture for Riscv64 {
    const BREAKPOINT: &'static [u8] = &[0x02, 0x90];

    type Frame = Frame;
    type RegisterId = RegisterId;

    fn register_name(id: RegisterId) -> &'static str {
        use RegisterId::*;
        match id {
            Ra => "ra",
            Sp => "sp",
            Gp => "gp",
            Tp => "tp",
            T0 => "t0",
            T1 => "t1",
            T2 => "t2",
            S0 => "s0",
            S1 => "s1",
            A0 => "a0",
            A1 => "a1",
            A2 => "a2",
            A3 => "a3",
            A4 => "a4",
            A5 => "a5",
            A6 => "a6",
            A7 => "a7",
            S2 => "s2",
            S3 => "s3",
            S4 => "s4",
            S5 => "s5",
            S6 => "s6",
            S7 => "s7",
            S8 => "s8",
            S9 => "s9",
            S10 => "s10",
            S11 => "s11",
            T3 => "t3",
            T4 => "t4",
            T5 => "t5",
            T6 => "t6",
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
        let offset = match id {
            Ra => std::mem::offset_of!(Frame, ra),
            Sp => std::mem::offset_of!(Frame, sp),
            Gp => std::mem::offset_of!(Frame, gp),
            Tp => std::mem::offset_of!(Frame, tp),
            T0 => std::mem::offset_of!(Frame, t0),
            T1 => std::mem::offset_of!(Frame, t1),
            T2 => std::mem::offset_of!(Frame, t2),
            S0 => std::mem::offset_of!(Frame, s0),
            S1 => std::mem::offset_of!(Frame, s1),
            A0 => std::mem::offset_of!(Frame, a0),
            A1 => std::mem::offset_of!(Frame, a1),
            A2 => std::mem::offset_of!(Frame, a2),
            A3 => std::mem::offset_of!(Frame, a3),
            A4 => std::mem::offset_of!(Frame, a4),
            A5 => std::mem::offset_of!(Frame, a5),
            A6 => std::mem::offset_of!(Frame, a6),
            A7 => std::mem::offset_of!(Frame, a7),
            S2 => std::mem::offset_of!(Frame, s2),
            S3 => std::mem::offset_of!(Frame, s3),
            S4 => std::mem::offset_of!(Frame, s4),
            S5 => std::mem::offset_of!(Frame, s5),
            S6 => std::mem::offset_of!(Frame, s6),
            S7 => std::mem::offset_of!(Frame, s7),
            S8 => std::mem::offset_of!(Frame, s8),
            S9 => std::mem::offset_of!(Frame, s9),
            S10 => std::mem::offset_of!(Frame, s10),
            S11 => std::mem::offset_of!(Frame, s11),
            T3 => std::mem::offset_of!(Frame, t3),
            T4 => std::mem::offset_of!(Frame, t4),
            T5 => std::mem::offset_of!(Frame, t5),
            T6 => std::mem::offset_of!(Frame, t6),
            Pc => std::mem::offset_of!(Frame, pc),
        };
        Some(RegisterView { offset, width: 64 })
    }

    fn read(frame: &Frame, id: RegisterId) -> Result<u64, FijError> {
        use RegisterId::*;
        Ok(match id {
            Ra => frame.ra,
            Sp => frame.sp,
            Gp => frame.gp,
            Tp => frame.tp,
            T0 => frame.t0,
            T1 => frame.t1,
            T2 => frame.t2,
            S0 => frame.s0,
            S1 => frame.s1,
            A0 => frame.a0,
            A1 => frame.a1,
            A2 => frame.a2,
            A3 => frame.a3,
            A4 => frame.a4,
            A5 => frame.a5,
            A6 => frame.a6,
            A7 => frame.a7,
            S2 => frame.s2,
            S3 => frame.s3,
            S4 => frame.s4,
            S5 => frame.s5,
            S6 => frame.s6,
            S7 => frame.s7,
            S8 => frame.s8,
            S9 => frame.s9,
            S10 => frame.s10,
            S11 => frame.s11,
            T3 => frame.t3,
            T4 => frame.t4,
            T5 => frame.t5,
            T6 => frame.t6,
            Pc => frame.pc,
        })
    }

    fn write(frame: &mut Frame, id: RegisterId, value: u64) -> Result<(), FijError> {
        use RegisterId::*;
        match id {
            Ra => frame.ra = value,
            Sp => frame.sp = value,
            Gp => frame.gp = value,
            Tp => frame.tp = value,
            T0 => frame.t0 = value,
            T1 => frame.t1 = value,
            T2 => frame.t2 = value,
            S0 => frame.s0 = value,
            S1 => frame.s1 = value,
            A0 => frame.a0 = value,
            A1 => frame.a1 = value,
            A2 => frame.a2 = value,
            A3 => frame.a3 = value,
            A4 => frame.a4 = value,
            A5 => frame.a5 = value,
            A6 => frame.a6 = value,
            A7 => frame.a7 = value,
            S2 => frame.s2 = value,
            S3 => frame.s3 = value,
            S4 => frame.s4 = value,
            S5 => frame.s5 = value,
            S6 => frame.s6 = value,
            S7 => frame.s7 = value,
            S8 => frame.s8 = value,
            S9 => frame.s9 = value,
            S10 => frame.s10 = value,
            S11 => frame.s11 = value,
            T3 => frame.t3 = value,
            T4 => frame.t4 = value,
            T5 => frame.t5 = value,
            T6 => frame.t6 = value,
            Pc => frame.pc = value,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_gpr() {
        let mut frame = Frame::default();
        for &id in Riscv64::general_purpose_registers() {
            Riscv64::write(&mut frame, id, 0x7777_7777_7777_7777).unwrap();
            assert_eq!(Riscv64::read(&frame, id).unwrap(), 0x7777_7777_7777_7777);
        }
    }

    #[test]
    fn rejects_unknown_register_id() {
        assert!(RegisterId::try_from(31).is_err());
    }
}
