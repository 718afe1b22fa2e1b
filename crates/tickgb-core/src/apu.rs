//! Sound registers without synthesis.
//!
//! Programs still read back what they wrote, so the register block keeps
//! its power gate and post-boot values; no samples are produced.

use crate::bus::{Bus, Unit};
use crate::savestate::{SaveStateError, StateReader, StateWriter};

pub const NR10: u16 = 0xFF10;
pub const NR51: u16 = 0xFF25;
pub const NR52: u16 = 0xFF26;
pub const WAVE_START: u16 = 0xFF30;
pub const WAVE_END: u16 = 0xFF3F;

// Register contents after the boot ROM (gbdev.io/pandocs/Power_Up_State.html)
const POST_BOOT: [(u16, u8); 16] = [
    (0xFF10, 0x80),
    (0xFF11, 0xBF),
    (0xFF12, 0xF3),
    (0xFF13, 0xFF),
    (0xFF14, 0xBF),
    (0xFF16, 0x3F),
    (0xFF18, 0xFF),
    (0xFF19, 0xBF),
    (0xFF1A, 0x7F),
    (0xFF1B, 0xFF),
    (0xFF1C, 0x9F),
    (0xFF1E, 0xBF),
    (0xFF20, 0xFF),
    (0xFF23, 0xBF),
    (0xFF24, 0x77),
    (0xFF25, 0xF3),
];

pub struct Apu {
    powered: bool,
}

impl Apu {
    pub fn new(bus: &mut Bus) -> Self {
        bus.set_owner(Unit::Audio, NR10..=NR52);
        bus.set_owner(Unit::Audio, WAVE_START..=WAVE_END);
        Self { powered: true }
    }

    pub fn reset(&mut self, bus: &mut Bus) {
        self.powered = true;
        for (addr, val) in POST_BOOT {
            bus.set(addr, val);
        }
        // Channel status bits stay clear since nothing is playing.
        bus.set(NR52, 0xF0);
    }

    #[inline]
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn write(&mut self, bus: &mut Bus, addr: u16, val: u8) {
        match addr {
            NR52 => {
                let powered = val & 0x80 != 0;
                if self.powered && !powered {
                    for reg in NR10..=NR51 {
                        bus.set(reg, 0);
                    }
                }
                self.powered = powered;
                bus.set(NR52, (val & 0x80) | 0x70);
            }
            WAVE_START..=WAVE_END => bus.set(addr, val),
            _ if self.powered => bus.set(addr, val),
            _ => {}
        }
    }

    pub fn serialize(&self, out: &mut StateWriter) {
        out.marker();
        out.bool(self.powered);
    }

    pub fn deserialize(&mut self, input: &mut StateReader<'_>) -> Result<(), SaveStateError> {
        input.marker("audio")?;
        self.powered = input.bool()?;
        Ok(())
    }
}
