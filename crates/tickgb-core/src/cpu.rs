use log::error;

use crate::binding::{fetch_byte, Operand};
use crate::hardware::HardwareMode;
use crate::mmu::Mmu;
use crate::opcodes::{self, Cond, Instruction, Op, PREFIX_CB};
use crate::registers::{Flag, Reg, Registers};
use crate::savestate::{SaveStateError, StateReader, StateWriter};

// Post-boot CPU state from gbdev.io/pandocs/Power_Up_State.html
const BOOT_PC: u16 = 0x0100;
const BOOT_SP: u16 = 0xFFFE;
const BOOT_AF: u16 = 0x1180;
const CGB_BOOT_DE: u16 = 0xFF56;
const CGB_BOOT_HL: u16 = 0x000D;
const DMG_BOOT_DE: u16 = 0x0008;
const DMG_BOOT_HL: u16 = 0x007C;

pub const KEY1: u16 = 0xFF4D;

const HALTED_TICK_CYCLES: u32 = 4;
/// Delay between an interrupt becoming pending and HALT resuming.
const UNHALT_CYCLES: u32 = 12;
const INTERRUPT_DISPATCH_CYCLES: u32 = 20;
/// EI takes effect once the following instruction has run.
const EI_DELAY: i32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CpuStatus {
    #[default]
    Running,
    Stopped,
    Halted,
}

impl CpuStatus {
    fn to_u8(self) -> u8 {
        match self {
            CpuStatus::Running => 0,
            CpuStatus::Stopped => 1,
            CpuStatus::Halted => 2,
        }
    }

    fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(CpuStatus::Running),
            1 => Some(CpuStatus::Stopped),
            2 => Some(CpuStatus::Halted),
            _ => None,
        }
    }
}

pub struct Cpu {
    pub regs: Registers,
    status: CpuStatus,
    halt_bug: bool,
    unhalt_cycles: u32,
    /// Set after an illegal opcode; the CPU then idles forever.
    locked: bool,
    mode: HardwareMode,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub fn new() -> Self {
        let mut cpu = Self {
            regs: Registers::default(),
            status: CpuStatus::Running,
            halt_bug: false,
            unhalt_cycles: 0,
            locked: false,
            mode: HardwareMode::Dmg,
        };
        cpu.reset(HardwareMode::Dmg);
        cpu
    }

    /// Load the post-boot register state for `mode`.
    pub fn reset(&mut self, mode: HardwareMode) {
        self.mode = mode;
        self.regs = Registers::default();
        self.regs.set_af(BOOT_AF);
        self.regs.set_bc(0);
        if mode.is_cgb() {
            self.regs.set_de(CGB_BOOT_DE);
            self.regs.set_hl(CGB_BOOT_HL);
        } else {
            self.regs.set_de(DMG_BOOT_DE);
            self.regs.set_hl(DMG_BOOT_HL);
        }
        self.regs.sp = BOOT_SP;
        self.regs.pc = BOOT_PC;
        self.status = CpuStatus::Running;
        self.halt_bug = false;
        self.unhalt_cycles = 0;
        self.locked = false;
    }

    #[inline]
    pub fn status(&self) -> CpuStatus {
        self.status
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Leave STOP mode, as a joypad press does on hardware.
    pub fn wake(&mut self) {
        if self.status == CpuStatus::Stopped {
            self.status = CpuStatus::Running;
        }
    }

    /// Whether the CGB double-speed clock is active.
    pub fn double_speed(&self, mmu: &Mmu) -> bool {
        self.mode.is_cgb() && mmu.bus.get(KEY1) & 0x80 != 0
    }

    /// Run one instruction, one halted step or one interrupt dispatch plus
    /// instruction. Returns the T-cycles consumed.
    pub fn tick(&mut self, mmu: &mut Mmu) -> u32 {
        let mut elapsed = 0;
        let mut enable_interrupts = false;

        if self.status == CpuStatus::Halted {
            elapsed += HALTED_TICK_CYCLES;
            if self.unhalt_cycles > 0 {
                self.unhalt_cycles = self.unhalt_cycles.saturating_sub(HALTED_TICK_CYCLES);
                if self.unhalt_cycles == 0 {
                    self.status = CpuStatus::Running;
                }
            } else if mmu.interrupts.is_interrupt_pending(&mmu.bus) {
                self.unhalt_cycles = UNHALT_CYCLES;
            }
        }

        if self.status == CpuStatus::Running {
            if self.locked {
                elapsed += HALTED_TICK_CYCLES;
            } else {
                if let Some(interrupt) = mmu.interrupts.pending_interrupt(&mmu.bus) {
                    mmu.interrupts.set_ime(false, 0);
                    mmu.interrupts
                        .set_requested(&mut mmu.bus, interrupt, false);
                    let pc = self.regs.pc;
                    self.push(mmu, pc);
                    self.regs.pc = interrupt.vector();
                    elapsed += INTERRUPT_DISPATCH_CYCLES;
                }

                let pc = self.regs.pc;
                let mut opcode = mmu.read(pc) as u16;
                if !self.halt_bug {
                    self.regs.pc = pc.wrapping_add(1);
                }
                self.halt_bug = false;
                if opcode == PREFIX_CB as u16 {
                    opcode = 0x100 | fetch_byte(&mut self.regs, mmu) as u16;
                }

                let instr = opcodes::lookup(opcode);
                #[cfg(feature = "cpu-trace")]
                log::trace!("{pc:04X}: {instr}");
                if instr.op == Op::Ei {
                    enable_interrupts = true;
                }
                elapsed += self.execute(instr, opcode, pc, mmu);
            }
        }

        mmu.interrupts.tick(elapsed);
        if enable_interrupts {
            mmu.interrupts.set_ime(true, EI_DELAY);
        }
        elapsed
    }

    fn push(&mut self, mmu: &mut Mmu, val: u16) {
        let [hi, lo] = val.to_be_bytes();
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        mmu.write(self.regs.sp, hi);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        mmu.write(self.regs.sp, lo);
    }

    fn pop(&mut self, mmu: &mut Mmu) -> u16 {
        let lo = mmu.read(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = mmu.read(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        u16::from_le_bytes([lo, hi])
    }

    fn condition(&self, cond: Cond) -> bool {
        match cond {
            Cond::Always => true,
            Cond::NZ => !self.regs.flag(Flag::Z),
            Cond::Z => self.regs.flag(Flag::Z),
            Cond::NC => !self.regs.flag(Flag::C),
            Cond::C => self.regs.flag(Flag::C),
        }
    }

    #[inline]
    fn read(&mut self, operand: Operand, mmu: &mut Mmu) -> u16 {
        operand.read(&mut self.regs, mmu)
    }

    #[inline]
    fn write(&mut self, operand: Operand, mmu: &mut Mmu, val: u16) {
        operand.write(&mut self.regs, mmu, val);
    }

    fn add_sp_signed(&mut self, offset: u16) -> u16 {
        let sp = self.regs.sp;
        let h = (sp & 0x0F) + (offset & 0x0F) > 0x0F;
        let c = (sp & 0xFF) + (offset & 0xFF) > 0xFF;
        self.regs.set_flags(false, false, h, c);
        sp.wrapping_add(offset)
    }

    fn alu(&mut self, op: Op, b: u8) {
        let a = self.regs.a;
        let carry = self.regs.flag(Flag::C) as u8;
        match op {
            Op::Add | Op::Adc => {
                let carry = if op == Op::Adc { carry } else { 0 };
                let sum = a as u16 + b as u16 + carry as u16;
                let h = (a & 0x0F) + (b & 0x0F) + carry > 0x0F;
                self.regs.a = sum as u8;
                self.regs.set_flags(sum as u8 == 0, false, h, sum > 0xFF);
            }
            Op::Sub | Op::Sbc | Op::Cp => {
                let carry = if op == Op::Sbc { carry } else { 0 };
                let diff = a as i16 - b as i16 - carry as i16;
                let h = (a & 0x0F) as i16 - (b & 0x0F) as i16 - (carry as i16) < 0;
                if op != Op::Cp {
                    self.regs.a = diff as u8;
                }
                self.regs.set_flags(diff as u8 == 0, true, h, diff < 0);
            }
            Op::And => {
                self.regs.a = a & b;
                self.regs.set_flags(self.regs.a == 0, false, true, false);
            }
            Op::Xor => {
                self.regs.a = a ^ b;
                self.regs.set_flags(self.regs.a == 0, false, false, false);
            }
            Op::Or => {
                self.regs.a = a | b;
                self.regs.set_flags(self.regs.a == 0, false, false, false);
            }
            _ => unreachable!("{op:?} is not an accumulator operation"),
        }
    }

    /// Rotates and shifts shared by the CB table and the accumulator forms.
    fn shift(&mut self, op: Op, val: u8) -> u8 {
        let carry = self.regs.flag(Flag::C) as u8;
        let (result, c) = match op {
            Op::Rlc | Op::Rlca => (val.rotate_left(1), val & 0x80 != 0),
            Op::Rrc | Op::Rrca => (val.rotate_right(1), val & 0x01 != 0),
            Op::Rl | Op::Rla => (val << 1 | carry, val & 0x80 != 0),
            Op::Rr | Op::Rra => (val >> 1 | carry << 7, val & 0x01 != 0),
            Op::Sla => (val << 1, val & 0x80 != 0),
            Op::Sra => (val >> 1 | (val & 0x80), val & 0x01 != 0),
            Op::Swap => (val.rotate_left(4), false),
            Op::Srl => (val >> 1, val & 0x01 != 0),
            _ => unreachable!("{op:?} is not a shift"),
        };
        self.regs.set_flags(result == 0, false, false, c);
        result
    }

    fn daa(&mut self) {
        let mut a = self.regs.a;
        let n = self.regs.flag(Flag::N);
        let h = self.regs.flag(Flag::H);
        let mut c = self.regs.flag(Flag::C);
        if !n {
            if c || a > 0x99 {
                a = a.wrapping_add(0x60);
                c = true;
            }
            if h || a & 0x0F > 0x09 {
                a = a.wrapping_add(0x06);
            }
        } else {
            if c {
                a = a.wrapping_sub(0x60);
            }
            if h {
                a = a.wrapping_sub(0x06);
            }
        }
        self.regs.a = a;
        self.regs.set_flag(Flag::Z, a == 0);
        self.regs.set_flag(Flag::H, false);
        self.regs.set_flag(Flag::C, c);
    }

    fn halt(&mut self, mmu: &Mmu) {
        if mmu.interrupts.ime() || !mmu.interrupts.is_interrupt_pending(&mmu.bus) {
            self.status = CpuStatus::Halted;
            self.unhalt_cycles = 0;
        } else {
            self.halt_bug = true;
        }
    }

    fn stop(&mut self, mmu: &mut Mmu) {
        let key1 = mmu.bus.get(KEY1);
        if self.mode.is_cgb() && key1 & 0x01 != 0 {
            mmu.bus.set(KEY1, if key1 & 0x80 != 0 { 0x7E } else { 0xFE });
        } else {
            self.status = CpuStatus::Stopped;
        }
    }

    fn execute(&mut self, instr: &Instruction, opcode: u16, pc: u16, mmu: &mut Mmu) -> u32 {
        let Instruction { op, dst, src, .. } = *instr;
        let mut cycles = instr.cycles as u32;

        match op {
            Op::Nop | Op::Prefix => {}
            Op::Stop => self.stop(mmu),
            Op::Halt => self.halt(mmu),
            Op::Di => mmu.interrupts.set_ime(false, 0),
            // Enabled in `tick` once the interrupt delays have advanced.
            Op::Ei => {}
            Op::Illegal => {
                error!("Illegal opcode {opcode:#04X} at {pc:#06X}; CPU locked");
                self.locked = true;
            }

            Op::Ld => {
                let val = self.read(src, mmu);
                if src.is_wide() && dst.is_memory() {
                    dst.write_word(&mut self.regs, mmu, val);
                } else {
                    self.write(dst, mmu, val);
                }
            }
            Op::Ldi | Op::Ldd => {
                let val = self.read(src, mmu);
                self.write(dst, mmu, val);
                let hl = self.regs.hl();
                self.regs.set_hl(if op == Op::Ldi {
                    hl.wrapping_add(1)
                } else {
                    hl.wrapping_sub(1)
                });
            }
            Op::LdHlSp => {
                let offset = self.read(src, mmu);
                let val = self.add_sp_signed(offset);
                self.write(dst, mmu, val);
            }
            Op::Push => {
                let val = self.read(src, mmu);
                self.push(mmu, val);
            }
            Op::Pop => {
                let val = self.pop(mmu);
                self.write(dst, mmu, val);
            }

            Op::Inc | Op::Dec => {
                let val = self.read(dst, mmu) as u8;
                let result = if op == Op::Inc {
                    val.wrapping_add(1)
                } else {
                    val.wrapping_sub(1)
                };
                self.regs.set_flag(Flag::Z, result == 0);
                self.regs.set_flag(Flag::N, op == Op::Dec);
                self.regs.set_flag(
                    Flag::H,
                    if op == Op::Inc {
                        result & 0x0F == 0
                    } else {
                        result & 0x0F == 0x0F
                    },
                );
                self.write(dst, mmu, result as u16);
            }
            Op::Inc16 | Op::Dec16 => {
                let val = self.read(dst, mmu);
                let result = if op == Op::Inc16 {
                    val.wrapping_add(1)
                } else {
                    val.wrapping_sub(1)
                };
                self.write(dst, mmu, result);
            }
            Op::Add | Op::Adc | Op::Sub | Op::Sbc | Op::And | Op::Xor | Op::Or | Op::Cp => {
                let val = self.read(src, mmu) as u8;
                self.alu(op, val);
            }
            Op::AddHl => {
                let hl = self.regs.hl();
                let val = self.read(src, mmu);
                let (sum, c) = hl.overflowing_add(val);
                let h = (hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF;
                self.regs.set_flag(Flag::N, false);
                self.regs.set_flag(Flag::H, h);
                self.regs.set_flag(Flag::C, c);
                self.regs.set_hl(sum);
            }
            Op::AddSp => {
                let offset = self.read(src, mmu);
                self.regs.sp = self.add_sp_signed(offset);
            }

            Op::Daa => self.daa(),
            Op::Cpl => {
                self.regs.a = !self.regs.a;
                self.regs.set_flag(Flag::N, true);
                self.regs.set_flag(Flag::H, true);
            }
            Op::Scf | Op::Ccf => {
                let c = op == Op::Scf || !self.regs.flag(Flag::C);
                self.regs.set_flag(Flag::N, false);
                self.regs.set_flag(Flag::H, false);
                self.regs.set_flag(Flag::C, c);
            }
            Op::Rlca | Op::Rrca | Op::Rla | Op::Rra => {
                let a = self.regs.a;
                self.regs.a = self.shift(op, a);
                self.regs.set_flag(Flag::Z, false);
            }

            Op::Jp(cond) => {
                let target = self.read(dst, mmu);
                if self.condition(cond) {
                    self.regs.pc = target;
                    cycles = instr.branch_cycles as u32;
                }
            }
            Op::Jr(cond) => {
                let offset = self.read(dst, mmu);
                if self.condition(cond) {
                    self.regs.pc = self.regs.pc.wrapping_add(offset);
                    cycles = instr.branch_cycles as u32;
                }
            }
            Op::Call(cond) => {
                let target = self.read(dst, mmu);
                if self.condition(cond) {
                    let ret = self.regs.pc;
                    self.push(mmu, ret);
                    self.regs.pc = target;
                    cycles = instr.branch_cycles as u32;
                }
            }
            Op::Ret(cond) => {
                if self.condition(cond) {
                    self.regs.pc = self.pop(mmu);
                    cycles = instr.branch_cycles as u32;
                }
            }
            Op::Reti => {
                self.regs.pc = self.pop(mmu);
                mmu.interrupts.set_ime(true, 0);
            }
            Op::Rst(vector) => {
                let ret = self.regs.pc;
                self.push(mmu, ret);
                self.regs.pc = vector as u16;
            }

            Op::Rlc | Op::Rrc | Op::Rl | Op::Rr | Op::Sla | Op::Sra | Op::Swap | Op::Srl => {
                let val = self.read(dst, mmu) as u8;
                let result = self.shift(op, val);
                self.write(dst, mmu, result as u16);
            }
            Op::Bit(bit) => {
                let val = self.read(dst, mmu) as u8;
                self.regs.set_flag(Flag::Z, val & (1 << bit) == 0);
                self.regs.set_flag(Flag::N, false);
                self.regs.set_flag(Flag::H, true);
            }
            Op::Res(bit) | Op::Set(bit) => {
                let val = self.read(dst, mmu) as u8;
                let result = if matches!(op, Op::Set(_)) {
                    val | (1 << bit)
                } else {
                    val & !(1 << bit)
                };
                self.write(dst, mmu, result as u16);
            }
        }

        cycles
    }

    /// Registers and run state for the debugger readout.
    pub fn debug_state(&self) -> String {
        format!(
            "AF={:04X} BC={:04X} DE={:04X} HL={:04X} SP={:04X} PC={:04X} {:?}",
            self.regs.af(),
            self.regs.bc(),
            self.regs.de(),
            self.regs.hl(),
            self.regs.sp,
            self.regs.pc,
            self.status
        )
    }

    pub fn serialize(&self, mmu: &Mmu, out: &mut StateWriter) {
        out.marker();
        for reg in [Reg::AF, Reg::BC, Reg::DE, Reg::HL, Reg::SP, Reg::PC] {
            out.u16(self.regs.get(reg));
        }
        out.u8(self.status.to_u8());
        out.bool(self.halt_bug);
        out.u8(self.unhalt_cycles as u8);
        out.bool(self.locked);
        mmu.interrupts.serialize(out);
    }

    pub fn deserialize(
        &mut self,
        mmu: &mut Mmu,
        input: &mut StateReader<'_>,
    ) -> Result<(), SaveStateError> {
        input.marker("processor")?;
        for reg in [Reg::AF, Reg::BC, Reg::DE, Reg::HL, Reg::SP, Reg::PC] {
            let val = input.u16()?;
            self.regs.set(reg, val);
        }
        let status = input.u8()?;
        self.status = CpuStatus::from_u8(status).ok_or_else(|| input.invalid(status as u32))?;
        self.halt_bug = input.bool()?;
        self.unhalt_cycles = input.u8()? as u32;
        self.locked = input.bool()?;
        mmu.interrupts.deserialize(input)
    }
}
