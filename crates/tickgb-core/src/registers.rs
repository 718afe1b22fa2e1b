use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Condition bits of the F register (gbdev.io/pandocs/The_CPU_Flags.html)
pub enum Flag {
    Z,
    N,
    H,
    C,
}

impl Flag {
    #[inline]
    pub const fn mask(self) -> u8 {
        match self {
            Flag::Z => 0x80, // Zero
            Flag::N => 0x40, // Subtract
            Flag::H => 0x20, // Half Carry
            Flag::C => 0x10, // Carry
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Addressable register, 8 or 16 bits wide.
pub enum Reg {
    A,
    F,
    B,
    C,
    D,
    E,
    H,
    L,
    AF,
    BC,
    DE,
    HL,
    SP,
    PC,
}

impl Reg {
    /// Operand order used by the opcode grid: B C D E H L (HL) A.
    /// Index 6 is the memory operand and has no register.
    pub const fn from_index(index: u8) -> Option<Reg> {
        match index & 0x07 {
            0 => Some(Reg::B),
            1 => Some(Reg::C),
            2 => Some(Reg::D),
            3 => Some(Reg::E),
            4 => Some(Reg::H),
            5 => Some(Reg::L),
            6 => None,
            _ => Some(Reg::A),
        }
    }

    #[inline]
    pub const fn is_wide(self) -> bool {
        matches!(
            self,
            Reg::AF | Reg::BC | Reg::DE | Reg::HL | Reg::SP | Reg::PC
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            Reg::A => "A",
            Reg::F => "F",
            Reg::B => "B",
            Reg::C => "C",
            Reg::D => "D",
            Reg::E => "E",
            Reg::H => "H",
            Reg::L => "L",
            Reg::AF => "AF",
            Reg::BC => "BC",
            Reg::DE => "DE",
            Reg::HL => "HL",
            Reg::SP => "SP",
            Reg::PC => "PC",
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// LR35902 register file.
///
/// 16-bit pairs are composed from their 8-bit halves; the low nibble of F
/// is always zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
}

impl Registers {
    #[inline]
    pub fn f(&self) -> u8 {
        self.f
    }

    #[inline]
    pub fn set_f(&mut self, val: u8) {
        self.f = val & 0xF0;
    }

    #[inline]
    pub fn flag(&self, flag: Flag) -> bool {
        self.f & flag.mask() != 0
    }

    #[inline]
    pub fn set_flag(&mut self, flag: Flag, state: bool) {
        if state {
            self.f |= flag.mask();
        } else {
            self.f &= !flag.mask();
        }
    }

    /// Overwrite all four flags at once.
    #[inline]
    pub fn set_flags(&mut self, z: bool, n: bool, h: bool, c: bool) {
        self.f = (z as u8) << 7 | (n as u8) << 6 | (h as u8) << 5 | (c as u8) << 4;
    }

    #[inline]
    pub fn af(&self) -> u16 {
        u16::from_be_bytes([self.a, self.f])
    }

    #[inline]
    pub fn bc(&self) -> u16 {
        u16::from_be_bytes([self.b, self.c])
    }

    #[inline]
    pub fn de(&self) -> u16 {
        u16::from_be_bytes([self.d, self.e])
    }

    #[inline]
    pub fn hl(&self) -> u16 {
        u16::from_be_bytes([self.h, self.l])
    }

    pub fn set_af(&mut self, val: u16) {
        let [hi, lo] = val.to_be_bytes();
        self.a = hi;
        self.set_f(lo);
    }

    pub fn set_bc(&mut self, val: u16) {
        [self.b, self.c] = val.to_be_bytes();
    }

    pub fn set_de(&mut self, val: u16) {
        [self.d, self.e] = val.to_be_bytes();
    }

    pub fn set_hl(&mut self, val: u16) {
        [self.h, self.l] = val.to_be_bytes();
    }

    /// Read any register, zero-extended to 16 bits.
    pub fn get(&self, reg: Reg) -> u16 {
        match reg {
            Reg::A => self.a as u16,
            Reg::F => self.f as u16,
            Reg::B => self.b as u16,
            Reg::C => self.c as u16,
            Reg::D => self.d as u16,
            Reg::E => self.e as u16,
            Reg::H => self.h as u16,
            Reg::L => self.l as u16,
            Reg::AF => self.af(),
            Reg::BC => self.bc(),
            Reg::DE => self.de(),
            Reg::HL => self.hl(),
            Reg::SP => self.sp,
            Reg::PC => self.pc,
        }
    }

    /// Write any register, truncating to its width.
    pub fn set(&mut self, reg: Reg, val: u16) {
        match reg {
            Reg::A => self.a = val as u8,
            Reg::F => self.set_f(val as u8),
            Reg::B => self.b = val as u8,
            Reg::C => self.c = val as u8,
            Reg::D => self.d = val as u8,
            Reg::E => self.e = val as u8,
            Reg::H => self.h = val as u8,
            Reg::L => self.l = val as u8,
            Reg::AF => self.set_af(val),
            Reg::BC => self.set_bc(val),
            Reg::DE => self.set_de(val),
            Reg::HL => self.set_hl(val),
            Reg::SP => self.sp = val,
            Reg::PC => self.pc = val,
        }
    }
}
