//! Declarative instruction table.
//!
//! Entries 0x000-0x0FF are the base opcodes; 0x100-0x1FF are the
//! `0xCB`-prefixed extension opcodes. Cycle counts are in T-cycles
//! (gbdev.io/gb-opcodes/optables/).

use std::fmt;
use std::sync::OnceLock;

use crate::binding::Operand;
use crate::registers::Reg;

pub const PREFIX_CB: u8 = 0xCB;
pub const TABLE_SIZE: usize = 0x200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    Always,
    NZ,
    Z,
    NC,
    C,
}

impl Cond {
    const fn from_index(index: u8) -> Cond {
        match index & 0x03 {
            0 => Cond::NZ,
            1 => Cond::Z,
            2 => Cond::NC,
            _ => Cond::C,
        }
    }

    const fn prefix(self) -> &'static str {
        match self {
            Cond::Always => "",
            Cond::NZ => "NZ,",
            Cond::Z => "Z,",
            Cond::NC => "NC,",
            Cond::C => "C,",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Nop,
    Stop,
    Halt,
    Di,
    Ei,
    /// Placeholder for the 0xCB prefix byte itself.
    Prefix,
    Illegal,

    Ld,
    Ldi,
    Ldd,
    LdHlSp,
    Push,
    Pop,

    Inc,
    Dec,
    Inc16,
    Dec16,
    Add,
    AddHl,
    AddSp,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,

    Daa,
    Cpl,
    Scf,
    Ccf,
    Rlca,
    Rrca,
    Rla,
    Rra,

    Jp(Cond),
    Jr(Cond),
    Call(Cond),
    Ret(Cond),
    Reti,
    Rst(u8),

    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Swap,
    Srl,
    Bit(u8),
    Res(u8),
    Set(u8),
}

impl Op {
    fn mnemonic(self) -> &'static str {
        match self {
            Op::Nop => "NOP",
            Op::Stop => "STOP",
            Op::Halt => "HALT",
            Op::Di => "DI",
            Op::Ei => "EI",
            Op::Prefix => "PREFIX CB",
            Op::Illegal => "ILLEGAL",
            Op::Ld | Op::LdHlSp => "LD",
            Op::Ldi => "LDI",
            Op::Ldd => "LDD",
            Op::Push => "PUSH",
            Op::Pop => "POP",
            Op::Inc | Op::Inc16 => "INC",
            Op::Dec | Op::Dec16 => "DEC",
            Op::Add | Op::AddHl | Op::AddSp => "ADD",
            Op::Adc => "ADC",
            Op::Sub => "SUB",
            Op::Sbc => "SBC",
            Op::And => "AND",
            Op::Xor => "XOR",
            Op::Or => "OR",
            Op::Cp => "CP",
            Op::Daa => "DAA",
            Op::Cpl => "CPL",
            Op::Scf => "SCF",
            Op::Ccf => "CCF",
            Op::Rlca => "RLCA",
            Op::Rrca => "RRCA",
            Op::Rla => "RLA",
            Op::Rra => "RRA",
            Op::Jp(_) => "JP",
            Op::Jr(_) => "JR",
            Op::Call(_) => "CALL",
            Op::Ret(_) => "RET",
            Op::Reti => "RETI",
            Op::Rst(_) => "RST",
            Op::Rlc => "RLC",
            Op::Rrc => "RRC",
            Op::Rl => "RL",
            Op::Rr => "RR",
            Op::Sla => "SLA",
            Op::Sra => "SRA",
            Op::Swap => "SWAP",
            Op::Srl => "SRL",
            Op::Bit(_) => "BIT",
            Op::Res(_) => "RES",
            Op::Set(_) => "SET",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub op: Op,
    pub dst: Operand,
    pub src: Operand,
    /// Cost when no branch is taken (or the only cost).
    pub cycles: u8,
    /// Cost of a taken conditional branch.
    pub branch_cycles: u8,
}

impl Instruction {
    const fn new(op: Op, dst: Operand, src: Operand, cycles: u8) -> Self {
        Self {
            op,
            dst,
            src,
            cycles,
            branch_cycles: cycles,
        }
    }

    const fn branch(op: Op, dst: Operand, cycles: u8, branch_cycles: u8) -> Self {
        Self {
            op,
            dst,
            src: Operand::None,
            cycles,
            branch_cycles,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.op.mnemonic())?;
        match self.op {
            Op::Jp(cond) | Op::Jr(cond) | Op::Call(cond) => {
                return write!(f, " {}{}", cond.prefix(), self.dst);
            }
            Op::Ret(Cond::Always) => return Ok(()),
            Op::Ret(cond) => {
                return write!(f, " {}", cond.prefix().trim_end_matches(','));
            }
            Op::Rst(vector) => return write!(f, " {vector:02X}H"),
            Op::Bit(bit) | Op::Res(bit) | Op::Set(bit) => {
                return write!(f, " {bit},{}", self.dst);
            }
            Op::LdHlSp => return f.write_str(" HL,SP+r8"),
            _ => {}
        }
        match (self.dst, self.src) {
            (Operand::None, Operand::None) => Ok(()),
            (dst, Operand::None) => write!(f, " {dst}"),
            (Operand::None, src) => write!(f, " {src}"),
            (dst, src) => write!(f, " {dst},{src}"),
        }
    }
}

/// Operand for grid index `i` in B C D E H L (HL) A order.
fn grid(i: u8) -> Operand {
    match Reg::from_index(i) {
        Some(reg) => Operand::Register(reg),
        None => Operand::RegisterAddress(Reg::HL),
    }
}

fn cost(i: u8, reg_cycles: u8, mem_cycles: u8) -> u8 {
    if i & 0x07 == 6 { mem_cycles } else { reg_cycles }
}

fn build() -> Vec<Instruction> {
    use Operand::*;
    use Reg::*;

    const ILLEGAL: [u8; 11] = [
        0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD,
    ];
    let pairs = [BC, DE, HL, SP];
    let stack_pairs = [BC, DE, HL, AF];
    let alu = [
        Op::Add,
        Op::Adc,
        Op::Sub,
        Op::Sbc,
        Op::And,
        Op::Xor,
        Op::Or,
        Op::Cp,
    ];
    let shifts = [
        Op::Rlc,
        Op::Rrc,
        Op::Rl,
        Op::Rr,
        Op::Sla,
        Op::Sra,
        Op::Swap,
        Op::Srl,
    ];

    let mut t = vec![Instruction::new(Op::Illegal, None, None, 4); TABLE_SIZE];
    let a = Register(A);

    t[0x00] = Instruction::new(Op::Nop, None, None, 4);
    t[0x08] = Instruction::new(Op::Ld, AbsoluteAddress, Register(SP), 20);
    t[0x10] = Instruction::new(Op::Stop, None, None, 4);
    t[0x18] = Instruction::branch(Op::Jr(Cond::Always), ImmediateSignedByte, 12, 12);

    for (i, &rr) in pairs.iter().enumerate() {
        let row = (i as usize) << 4;
        t[row | 0x01] = Instruction::new(Op::Ld, Register(rr), ImmediateWord, 12);
        t[row | 0x03] = Instruction::new(Op::Inc16, Register(rr), None, 8);
        t[row | 0x09] = Instruction::new(Op::AddHl, Register(HL), Register(rr), 8);
        t[row | 0x0B] = Instruction::new(Op::Dec16, Register(rr), None, 8);
    }
    t[0x02] = Instruction::new(Op::Ld, RegisterAddress(BC), a, 8);
    t[0x12] = Instruction::new(Op::Ld, RegisterAddress(DE), a, 8);
    t[0x22] = Instruction::new(Op::Ldi, RegisterAddress(HL), a, 8);
    t[0x32] = Instruction::new(Op::Ldd, RegisterAddress(HL), a, 8);
    t[0x0A] = Instruction::new(Op::Ld, a, RegisterAddress(BC), 8);
    t[0x1A] = Instruction::new(Op::Ld, a, RegisterAddress(DE), 8);
    t[0x2A] = Instruction::new(Op::Ldi, a, RegisterAddress(HL), 8);
    t[0x3A] = Instruction::new(Op::Ldd, a, RegisterAddress(HL), 8);

    for i in 0..8u8 {
        let base = (i as usize) << 3;
        let r = grid(i);
        t[base | 0x04] = Instruction::new(Op::Inc, r, None, cost(i, 4, 12));
        t[base | 0x05] = Instruction::new(Op::Dec, r, None, cost(i, 4, 12));
        t[base | 0x06] = Instruction::new(Op::Ld, r, ImmediateByte, cost(i, 8, 12));
    }
    t[0x07] = Instruction::new(Op::Rlca, None, None, 4);
    t[0x0F] = Instruction::new(Op::Rrca, None, None, 4);
    t[0x17] = Instruction::new(Op::Rla, None, None, 4);
    t[0x1F] = Instruction::new(Op::Rra, None, None, 4);
    t[0x27] = Instruction::new(Op::Daa, None, None, 4);
    t[0x2F] = Instruction::new(Op::Cpl, None, None, 4);
    t[0x37] = Instruction::new(Op::Scf, None, None, 4);
    t[0x3F] = Instruction::new(Op::Ccf, None, None, 4);

    for c in 0..4u8 {
        let cond = Cond::from_index(c);
        let n = (c as usize) << 3;
        t[0x20 | n] = Instruction::branch(Op::Jr(cond), ImmediateSignedByte, 8, 12);
        t[0xC0 | n] = Instruction::branch(Op::Ret(cond), None, 8, 20);
        t[0xC2 | n] = Instruction::branch(Op::Jp(cond), ImmediateWord, 12, 16);
        t[0xC4 | n] = Instruction::branch(Op::Call(cond), ImmediateWord, 12, 24);
    }

    for opcode in 0x40..=0x7Fu8 {
        let dst = (opcode >> 3) & 0x07;
        let src = opcode & 0x07;
        let cycles = if dst == 6 || src == 6 { 8 } else { 4 };
        t[opcode as usize] = Instruction::new(Op::Ld, grid(dst), grid(src), cycles);
    }
    t[0x76] = Instruction::new(Op::Halt, None, None, 4);

    for opcode in 0x80..=0xBFu8 {
        let op = alu[((opcode >> 3) & 0x07) as usize];
        let src = opcode & 0x07;
        t[opcode as usize] = Instruction::new(op, a, grid(src), cost(src, 4, 8));
    }
    for (i, &op) in alu.iter().enumerate() {
        t[0xC6 | (i << 3)] = Instruction::new(op, a, ImmediateByte, 8);
    }

    for (i, &rr) in stack_pairs.iter().enumerate() {
        let row = i << 4;
        t[0xC1 | row] = Instruction::new(Op::Pop, Register(rr), None, 12);
        t[0xC5 | row] = Instruction::new(Op::Push, None, Register(rr), 16);
    }
    for n in 0..8u8 {
        t[0xC7 | ((n as usize) << 3)] = Instruction::new(Op::Rst(n << 3), None, None, 16);
    }

    t[0xC3] = Instruction::branch(Op::Jp(Cond::Always), ImmediateWord, 16, 16);
    t[0xC9] = Instruction::branch(Op::Ret(Cond::Always), None, 16, 16);
    t[0xCB] = Instruction::new(Op::Prefix, None, None, 4);
    t[0xCD] = Instruction::branch(Op::Call(Cond::Always), ImmediateWord, 24, 24);
    t[0xD9] = Instruction::new(Op::Reti, None, None, 16);
    t[0xE0] = Instruction::new(Op::Ld, HighPageAddress, a, 12);
    t[0xF0] = Instruction::new(Op::Ld, a, HighPageAddress, 12);
    t[0xE2] = Instruction::new(Op::Ld, RegisterAddress(C), a, 8);
    t[0xF2] = Instruction::new(Op::Ld, a, RegisterAddress(C), 8);
    t[0xE8] = Instruction::new(Op::AddSp, Register(SP), ImmediateSignedByte, 16);
    t[0xE9] = Instruction::branch(Op::Jp(Cond::Always), Register(HL), 4, 4);
    t[0xEA] = Instruction::new(Op::Ld, AbsoluteAddress, a, 16);
    t[0xFA] = Instruction::new(Op::Ld, a, AbsoluteAddress, 16);
    t[0xF3] = Instruction::new(Op::Di, None, None, 4);
    t[0xFB] = Instruction::new(Op::Ei, None, None, 4);
    t[0xF8] = Instruction::new(Op::LdHlSp, Register(HL), ImmediateSignedByte, 12);
    t[0xF9] = Instruction::new(Op::Ld, Register(SP), Register(HL), 8);

    for opcode in ILLEGAL {
        t[opcode as usize] = Instruction::new(Op::Illegal, None, None, 4);
    }

    for opcode in 0x00..=0xFFu8 {
        let r = grid(opcode);
        let group = (opcode >> 3) & 0x07;
        let entry = match opcode >> 6 {
            0 => Instruction::new(shifts[group as usize], r, None, cost(opcode, 8, 16)),
            1 => Instruction::new(Op::Bit(group), r, None, cost(opcode, 8, 12)),
            2 => Instruction::new(Op::Res(group), r, None, cost(opcode, 8, 16)),
            _ => Instruction::new(Op::Set(group), r, None, cost(opcode, 8, 16)),
        };
        t[0x100 | opcode as usize] = entry;
    }

    t
}

/// The full 512-entry instruction table.
pub fn table() -> &'static [Instruction] {
    static TABLE: OnceLock<Vec<Instruction>> = OnceLock::new();
    TABLE.get_or_init(build)
}

#[inline]
pub fn lookup(index: u16) -> &'static Instruction {
    &table()[index as usize & (TABLE_SIZE - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disassembles_common_forms() {
        assert_eq!(lookup(0x7E).to_string(), "LD A,(HL)");
        assert_eq!(lookup(0x20).to_string(), "JR NZ,r8");
        assert_eq!(lookup(0xC3).to_string(), "JP d16");
        assert_eq!(lookup(0xFF).to_string(), "RST 38H");
        assert_eq!(lookup(0xC8).to_string(), "RET Z");
        assert_eq!(lookup(0xE0).to_string(), "LD (a8),A");
        assert_eq!(lookup(0x17C).to_string(), "BIT 7,H");
        assert_eq!(lookup(0x136).to_string(), "SWAP (HL)");
    }

    #[test]
    fn illegal_opcodes_are_marked() {
        for opcode in [0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD] {
            assert_eq!(lookup(opcode).op, Op::Illegal, "{opcode:02X}");
        }
        assert_eq!(lookup(0xF0).op, Op::Ld);
    }

    #[test]
    fn memory_operands_cost_more() {
        assert_eq!(lookup(0x46).cycles, 8);
        assert_eq!(lookup(0x36).cycles, 12);
        assert_eq!(lookup(0x34).cycles, 12);
        assert_eq!(lookup(0x86).cycles, 8);
        assert_eq!(lookup(0x106).cycles, 16);
        assert_eq!(lookup(0x146).cycles, 12);
        assert_eq!(lookup(0x100).cycles, 8);
    }

    #[test]
    fn conditional_branches_have_two_costs() {
        let call = lookup(0xC4);
        assert_eq!((call.cycles, call.branch_cycles), (12, 24));
        let ret = lookup(0xD8);
        assert_eq!((ret.cycles, ret.branch_cycles), (8, 20));
    }
}
