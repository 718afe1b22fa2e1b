use crate::bus::{Bus, Unit};
use crate::hardware::HardwareMode;
use crate::savestate::{SaveStateError, StateReader, StateWriter};

pub const IF: u16 = 0xFF0F;
pub const IE: u16 = 0xFFFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Interrupt lines in priority order.
pub enum Interrupt {
    VBlank,
    LcdStat,
    Timer,
    Serial,
    Joypad,
}

impl Interrupt {
    pub const ALL: [Interrupt; 5] = [
        Interrupt::VBlank,
        Interrupt::LcdStat,
        Interrupt::Timer,
        Interrupt::Serial,
        Interrupt::Joypad,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }

    /// Dispatch address (gbdev.io/pandocs/Interrupts.html)
    #[inline]
    pub const fn vector(self) -> u16 {
        0x40 + 8 * self as u16
    }

    /// Cycles between a line being raised and it becoming eligible.
    #[inline]
    pub const fn delay(self, mode: HardwareMode) -> i32 {
        match (self, mode) {
            (Interrupt::VBlank, HardwareMode::Dmg) => 4,
            _ => 0,
        }
    }
}

/// Interrupt master enable plus per-line activation delays.
///
/// The IF and IE registers themselves live in bus memory.
pub struct Interrupts {
    mode: HardwareMode,
    ime: bool,
    ime_delay: i32,
    delays: [i32; 5],
}

impl Interrupts {
    pub fn new(bus: &mut Bus) -> Self {
        bus.set_owner(Unit::Interrupts, IF..=IF);
        bus.set_owner(Unit::Interrupts, IE..=IE);
        Self {
            mode: HardwareMode::Dmg,
            ime: false,
            ime_delay: 0,
            delays: [0; 5],
        }
    }

    pub fn reset(&mut self, bus: &mut Bus, mode: HardwareMode) {
        self.mode = mode;
        self.ime = false;
        self.ime_delay = 0;
        self.delays = [0; 5];
        bus.set(IF, 0);
        bus.set(IE, 0);
    }

    pub fn read(&self, bus: &Bus, addr: u16) -> u8 {
        match addr {
            IF => 0xE0 | bus.get(IF),
            _ => bus.get(addr),
        }
    }

    pub fn write(&mut self, bus: &mut Bus, addr: u16, val: u8) {
        bus.set(addr, val);
    }

    #[inline]
    pub fn ime(&self) -> bool {
        self.ime
    }

    /// Set the master enable. `delay` cycles must elapse before it takes effect.
    pub fn set_ime(&mut self, enabled: bool, delay: i32) {
        self.ime = enabled;
        self.ime_delay = if enabled { delay } else { 0 };
    }

    fn set_bit(&mut self, bus: &mut Bus, reg: u16, interrupt: Interrupt, state: bool) {
        let val = bus.get(reg);
        if state {
            bus.set(reg, val | interrupt.bit());
            self.delays[interrupt.index()] = interrupt.delay(self.mode);
        } else {
            bus.set(reg, val & !interrupt.bit());
            self.delays[interrupt.index()] = 0;
        }
    }

    pub fn set_requested(&mut self, bus: &mut Bus, interrupt: Interrupt, state: bool) {
        self.set_bit(bus, IF, interrupt, state);
    }

    pub fn set_enabled(&mut self, bus: &mut Bus, interrupt: Interrupt, state: bool) {
        self.set_bit(bus, IE, interrupt, state);
    }

    pub fn is_requested(&self, bus: &Bus, interrupt: Interrupt) -> bool {
        bus.get(IF) & interrupt.bit() != 0
    }

    pub fn is_enabled(&self, bus: &Bus, interrupt: Interrupt) -> bool {
        bus.get(IE) & interrupt.bit() != 0
    }

    pub fn tick(&mut self, cycles: u32) {
        let cycles = cycles as i32;
        for delay in self.delays.iter_mut().filter(|d| **d > 0) {
            *delay -= cycles;
        }
        self.ime_delay = (self.ime_delay - cycles).max(0);
    }

    /// Highest-priority line that is requested, enabled and past its delay,
    /// provided the master enable is active.
    pub fn pending_interrupt(&self, bus: &Bus) -> Option<Interrupt> {
        if !self.ime || self.ime_delay > 0 {
            return None;
        }
        let active = bus.get(IF) & bus.get(IE);
        Interrupt::ALL
            .into_iter()
            .find(|i| active & i.bit() != 0 && self.delays[i.index()] <= 0)
    }

    /// Whether any enabled line is requested, ignoring the master enable.
    pub fn is_interrupt_pending(&self, bus: &Bus) -> bool {
        bus.get(IF) & bus.get(IE) & 0x1F != 0
    }

    pub fn serialize(&self, out: &mut StateWriter) {
        out.marker();
        out.bool(self.ime);
        out.u8(self.ime_delay.clamp(0, 0xFF) as u8);
        for delay in self.delays {
            out.u8(delay.clamp(0, 0xFF) as u8);
        }
    }

    pub fn deserialize(&mut self, input: &mut StateReader<'_>) -> Result<(), SaveStateError> {
        input.marker("interrupts")?;
        self.ime = input.bool()?;
        self.ime_delay = input.u8()? as i32;
        for delay in self.delays.iter_mut() {
            *delay = input.u8()? as i32;
        }
        Ok(())
    }
}
