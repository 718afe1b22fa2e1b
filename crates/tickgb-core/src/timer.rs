use crate::bus::{Bus, Unit};
use crate::hardware::HardwareMode;
use crate::interrupts::{Interrupt, Interrupts};
use crate::savestate::{SaveStateError, StateReader, StateWriter};

pub const DIV: u16 = 0xFF04;
pub const TIMA: u16 = 0xFF05;
pub const TMA: u16 = 0xFF06;
pub const TAC: u16 = 0xFF07;

// Internal counter value right after the boot ROM hands over.
const DMG_BOOT_CLOCK: u16 = 0x267C;
const CGB_BOOT_CLOCK: u16 = 0x1EA0;

/// Counter bit sampled for each TAC frequency selection
/// (gbdev.io/pandocs/Timer_Obscure_Behaviour.html)
const SIGNAL_BITS: [u16; 4] = [9, 3, 5, 7];

/// Cycles between TIMA overflowing and the TMA reload plus interrupt.
const OVERFLOW_DELAY: i32 = 4;

/// DIV/TIMA/TMA/TAC. The registers live in bus memory; this keeps the
/// 16-bit internal counter and the overflow state.
pub struct Timer {
    clock: u16,
    signal: bool,
    overflow_delay: i32,
}

impl Timer {
    pub fn new(bus: &mut Bus) -> Self {
        bus.set_owner(Unit::Timer, DIV..=TAC);
        Self {
            clock: 0,
            signal: false,
            overflow_delay: 0,
        }
    }

    pub fn reset(&mut self, bus: &mut Bus, mode: HardwareMode) {
        self.clock = if mode.is_cgb() {
            CGB_BOOT_CLOCK
        } else {
            DMG_BOOT_CLOCK
        };
        self.signal = false;
        self.overflow_delay = 0;
        bus.set(DIV, (self.clock >> 8) as u8);
        bus.set(TIMA, 0);
        bus.set(TMA, 0);
        bus.set(TAC, 0xF8);
    }

    #[inline]
    pub fn clock(&self) -> u16 {
        self.clock
    }

    pub fn write(&mut self, bus: &mut Bus, addr: u16, val: u8) {
        match addr {
            DIV => {
                self.clock = 0;
                bus.set(DIV, 0);
                self.update_signal(bus);
            }
            TAC => {
                bus.set(TAC, val);
                self.update_signal(bus);
            }
            TIMA => {
                // A write inside the overflow window cancels the reload.
                bus.set(TIMA, val);
                self.overflow_delay = 0;
            }
            _ => bus.set(addr, val),
        }
    }

    /// Recompute the timer signal; a falling edge increments TIMA.
    fn update_signal(&mut self, bus: &mut Bus) {
        let tac = bus.get(TAC);
        let bit = SIGNAL_BITS[(tac & 0x03) as usize];
        let signal = tac & 0x04 != 0 && self.clock & (1 << bit) != 0;
        if self.signal && !signal {
            let tima = bus.get(TIMA);
            if tima == 0xFF {
                bus.set(TIMA, 0);
                self.overflow_delay = OVERFLOW_DELAY;
            } else {
                bus.set(TIMA, tima + 1);
            }
        }
        self.signal = signal;
    }

    pub fn tick(&mut self, bus: &mut Bus, irq: &mut Interrupts, cycles: u32) {
        if self.overflow_delay > 0 {
            self.overflow_delay -= cycles as i32;
            if self.overflow_delay <= 0 {
                self.overflow_delay = 0;
                bus.set(TIMA, bus.get(TMA));
                irq.set_requested(bus, Interrupt::Timer, true);
            }
        }
        for _ in 0..cycles / 4 {
            self.clock = self.clock.wrapping_add(4);
            bus.set(DIV, (self.clock >> 8) as u8);
            self.update_signal(bus);
        }
    }

    pub fn serialize(&self, out: &mut StateWriter) {
        out.marker();
        out.u16(self.clock);
        out.u8(self.overflow_delay as u8);
        out.bool(self.signal);
    }

    pub fn deserialize(&mut self, input: &mut StateReader<'_>) -> Result<(), SaveStateError> {
        input.marker("timer")?;
        self.clock = input.u16()?;
        self.overflow_delay = input.u8()? as i32;
        self.signal = input.bool()?;
        Ok(())
    }
}
