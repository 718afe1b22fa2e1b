//! Instruction operands.
//!
//! Every entry of the opcode table names its operands with one of these
//! variants; the CPU resolves them through the intercepted bus path, so
//! memory operands see the same side effects as any other CPU access.

use std::fmt;

use crate::mmu::Mmu;
use crate::registers::{Reg, Registers};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Operand {
    #[default]
    None,
    /// A register value.
    Register(Reg),
    /// Memory addressed by a register. 8-bit registers address the high
    /// page, as in `LD (C),A`.
    RegisterAddress(Reg),
    /// `d8` from the instruction stream.
    ImmediateByte,
    /// `r8` from the instruction stream, sign extended.
    ImmediateSignedByte,
    /// `d16` from the instruction stream.
    ImmediateWord,
    /// Memory at `(a16)`.
    AbsoluteAddress,
    /// Memory at `(0xFF00 + a8)`.
    HighPageAddress,
}

#[inline]
pub(crate) fn fetch_byte(regs: &mut Registers, mmu: &mut Mmu) -> u8 {
    let val = mmu.read(regs.pc);
    regs.pc = regs.pc.wrapping_add(1);
    val
}

#[inline]
pub(crate) fn fetch_word(regs: &mut Registers, mmu: &mut Mmu) -> u16 {
    let lo = fetch_byte(regs, mmu);
    let hi = fetch_byte(regs, mmu);
    u16::from_le_bytes([lo, hi])
}

impl Operand {
    /// Whether the operand carries a 16-bit value.
    pub fn is_wide(self) -> bool {
        match self {
            Operand::Register(reg) => reg.is_wide(),
            Operand::ImmediateWord => true,
            _ => false,
        }
    }

    pub fn is_memory(self) -> bool {
        matches!(
            self,
            Operand::RegisterAddress(_) | Operand::AbsoluteAddress | Operand::HighPageAddress
        )
    }

    /// Resolve a memory operand to its address, consuming stream bytes.
    fn address(self, regs: &mut Registers, mmu: &mut Mmu) -> Option<u16> {
        match self {
            Operand::RegisterAddress(reg) if reg.is_wide() => Some(regs.get(reg)),
            Operand::RegisterAddress(reg) => Some(0xFF00 | regs.get(reg)),
            Operand::AbsoluteAddress => Some(fetch_word(regs, mmu)),
            Operand::HighPageAddress => Some(0xFF00 | fetch_byte(regs, mmu) as u16),
            _ => None,
        }
    }

    pub fn read(self, regs: &mut Registers, mmu: &mut Mmu) -> u16 {
        match self {
            Operand::None => 0,
            Operand::Register(reg) => regs.get(reg),
            Operand::ImmediateByte => fetch_byte(regs, mmu) as u16,
            Operand::ImmediateSignedByte => fetch_byte(regs, mmu) as i8 as i16 as u16,
            Operand::ImmediateWord => fetch_word(regs, mmu),
            _ => match self.address(regs, mmu) {
                Some(addr) => mmu.read(addr) as u16,
                None => 0xFF,
            },
        }
    }

    pub fn write(self, regs: &mut Registers, mmu: &mut Mmu, val: u16) {
        match self {
            Operand::Register(reg) => regs.set(reg, val),
            _ => {
                if let Some(addr) = self.address(regs, mmu) {
                    mmu.write(addr, val as u8);
                }
            }
        }
    }

    /// Store a 16-bit value little endian at a memory operand.
    pub fn write_word(self, regs: &mut Registers, mmu: &mut Mmu, val: u16) {
        match self {
            Operand::Register(reg) => regs.set(reg, val),
            _ => {
                if let Some(addr) = self.address(regs, mmu) {
                    let [lo, hi] = val.to_le_bytes();
                    mmu.write(addr, lo);
                    mmu.write(addr.wrapping_add(1), hi);
                }
            }
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Register(reg) => write!(f, "{reg}"),
            Operand::RegisterAddress(reg) => write!(f, "({reg})"),
            Operand::ImmediateByte => f.write_str("d8"),
            Operand::ImmediateSignedByte => f.write_str("r8"),
            Operand::ImmediateWord => f.write_str("d16"),
            Operand::AbsoluteAddress => f.write_str("(a16)"),
            Operand::HighPageAddress => f.write_str("(a8)"),
        }
    }
}
