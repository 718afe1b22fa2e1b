use crate::bank::MemoryBank;
use crate::bus::{Bus, Unit};
use crate::hardware::HardwareMode;
use crate::savestate::{SaveStateError, StateReader, StateWriter};

const WRAM_START: u16 = 0xC000;
const WRAM_END: u16 = 0xDFFF;
const ECHO_START: u16 = 0xE000;
const ECHO_END: u16 = 0xFDFF;
const WRAM_BANK_SIZE: usize = 0x1000;
const WRAM_BANKS: usize = 8;
pub const SVBK: u16 = 0xFF70;

const UNUSED_START: u16 = 0xFEA0;
const UNUSED_MIRROR_START: u16 = 0xFEC0;
const UNUSED_END: u16 = 0xFEFF;

/// Work RAM, its echo region and the CGB bank select register.
pub struct Wram {
    banks: MemoryBank,
    mode: HardwareMode,
}

impl Wram {
    pub fn new(bus: &mut Bus) -> Self {
        bus.set_owner(Unit::Wram, WRAM_START..=WRAM_END);
        bus.set_owner(Unit::Wram, ECHO_START..=ECHO_END);
        bus.set_owner(Unit::Wram, SVBK..=SVBK);
        Self {
            banks: MemoryBank::new("wram", false, true, WRAM_START, WRAM_BANKS, WRAM_BANK_SIZE),
            mode: HardwareMode::Dmg,
        }
    }

    pub fn reset(&mut self, bus: &mut Bus, mode: HardwareMode) {
        self.mode = mode;
        self.banks.reset(bus, None);
        bus.set(SVBK, if mode.is_cgb() { 0xF9 } else { 0xFF });
    }

    #[inline]
    fn resolve(addr: u16) -> u16 {
        if (ECHO_START..=ECHO_END).contains(&addr) {
            addr - 0x2000
        } else {
            addr
        }
    }

    pub fn read(&self, bus: &Bus, addr: u16) -> u8 {
        if addr == SVBK && !self.mode.is_cgb() {
            return 0xFF;
        }
        bus.get(Self::resolve(addr))
    }

    pub fn write(&mut self, bus: &mut Bus, addr: u16, val: u8) {
        if addr == SVBK && self.mode.is_cgb() {
            self.banks.set_active_bank(bus, ((val & 0x07) as usize).max(1));
        }
        bus.set(Self::resolve(addr), val);
    }

    pub fn active_bank(&self) -> usize {
        self.banks.active_bank()
    }

    pub fn serialize(&mut self, bus: &Bus, out: &mut StateWriter) {
        self.banks.serialize(bus, out);
    }

    pub fn deserialize(
        &mut self,
        bus: &mut Bus,
        input: &mut StateReader<'_>,
    ) -> Result<(), SaveStateError> {
        self.banks.deserialize(bus, input)
    }
}

/// The unusable region between OAM and the I/O page.
///
/// Its upper half mirrors a single nibble-addressed row on CGB hardware.
pub struct UnusedRegion;

impl UnusedRegion {
    pub fn new(bus: &mut Bus) -> Self {
        bus.set_owner(Unit::Unused, UNUSED_START..=UNUSED_END);
        Self
    }

    pub fn reset(&mut self, bus: &mut Bus) {
        for addr in UNUSED_START..UNUSED_MIRROR_START {
            bus.set(addr, (addr - UNUSED_START) as u8);
        }
        for addr in UNUSED_MIRROR_START..=UNUSED_END {
            bus.set(addr, 0x20 + (addr & 0x0F) as u8);
        }
    }

    pub fn write(&mut self, bus: &mut Bus, addr: u16, val: u8) {
        if addr < UNUSED_MIRROR_START {
            bus.set(addr, val);
            return;
        }
        let mut mirror = UNUSED_MIRROR_START + (val & 0x0F) as u16;
        while mirror <= UNUSED_END {
            bus.set(mirror, val);
            mirror += 0x10;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_region_aliases_wram() {
        let mut bus = Bus::new();
        let mut wram = Wram::new(&mut bus);
        wram.reset(&mut bus, HardwareMode::Cgb);
        wram.write(&mut bus, 0xE010, 0x5A);
        assert_eq!(wram.read(&bus, 0xC010), 0x5A);
    }

    #[test]
    fn owns_wram_and_echo_ranges() {
        let mut bus = Bus::new();
        Wram::new(&mut bus);
        for addr in [WRAM_START, WRAM_END, ECHO_START, ECHO_END, SVBK] {
            assert_eq!(bus.owner(addr), Unit::Wram, "{addr:04X}");
        }
        assert_ne!(bus.owner(ECHO_END + 1), Unit::Wram);
    }

    #[test]
    fn svbk_zero_selects_bank_one() {
        let mut bus = Bus::new();
        let mut wram = Wram::new(&mut bus);
        wram.reset(&mut bus, HardwareMode::Cgb);
        wram.write(&mut bus, 0xD000, 0x11);
        wram.write(&mut bus, SVBK, 0x03);
        assert_eq!(wram.active_bank(), 3);
        assert_eq!(wram.read(&bus, 0xD000), 0x00);
        wram.write(&mut bus, SVBK, 0x00);
        assert_eq!(wram.active_bank(), 1);
        assert_eq!(wram.read(&bus, 0xD000), 0x11);
    }

    #[test]
    fn svbk_is_inert_on_dmg() {
        let mut bus = Bus::new();
        let mut wram = Wram::new(&mut bus);
        wram.reset(&mut bus, HardwareMode::Dmg);
        wram.write(&mut bus, SVBK, 0x05);
        assert_eq!(wram.active_bank(), 1);
        assert_eq!(wram.read(&bus, SVBK), 0xFF);
    }

    #[test]
    fn unused_upper_half_mirrors_by_low_nibble() {
        let mut bus = Bus::new();
        let mut unused = UnusedRegion::new(&mut bus);
        unused.reset(&mut bus);
        assert_eq!(bus.get(0xFEA5), 0x05);
        assert_eq!(bus.get(0xFEC3), 0x23);

        unused.write(&mut bus, 0xFEC0, 0x47);
        for addr in [0xFEC7, 0xFED7, 0xFEE7, 0xFEF7] {
            assert_eq!(bus.get(addr), 0x47);
        }
        assert_eq!(bus.get(0xFEC0), 0x20);
    }
}
