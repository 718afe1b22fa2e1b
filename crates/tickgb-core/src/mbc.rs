//! Memory bank controllers.
//!
//! ROM banks live in the bus at 0x0000-0x7FFF and external RAM at
//! 0xA000-0xBFFF; the controller only decides which banks are mapped.

use std::sync::Arc;

use log::{debug, warn};

use crate::bank::MemoryBank;
use crate::bus::{Bus, CRAM_END, CRAM_START};
use crate::cartridge::{CartridgeHeader, MbcType};
use crate::savestate::{SaveStateError, StateReader, StateWriter};

pub const ROM_BANK_SIZE: usize = 0x4000;
pub const RAM_BANK_SIZE: usize = 0x2000;
/// MBC2 carries 512 nibbles of RAM on the controller itself.
pub const MBC2_RAM_SIZE: usize = 0x200;

const ROM_START: u16 = 0x0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MbcState {
    NoMbc,
    Mbc1 { ram_mode: bool, bank_register: u8 },
    Mbc2,
    Mbc3 { ram_bank: u8 },
    Mbc5 { rom_bank: u16, rumble: bool },
}

#[derive(Clone)]
pub struct Mbc {
    rom: MemoryBank,
    ram: Option<MemoryBank>,
    rom_data: Arc<[u8]>,
    ram_enabled: bool,
    has_rtc: bool,
    state: MbcState,
}

fn ram_banks(header: &CartridgeHeader) -> Option<MemoryBank> {
    if header.mbc_type == MbcType::Mbc2 {
        return Some(MemoryBank::new(
            "cartridge ram",
            true,
            true,
            CRAM_START,
            1,
            MBC2_RAM_SIZE,
        ));
    }
    if !header.has_sram || header.ram_size == 0 {
        return None;
    }
    let bank_size = header.ram_size.min(RAM_BANK_SIZE);
    Some(MemoryBank::new(
        "cartridge ram",
        true,
        true,
        CRAM_START,
        header.ram_size / bank_size,
        bank_size,
    ))
}

impl Mbc {
    pub fn new(header: &CartridgeHeader, rom: Vec<u8>) -> Self {
        let state = match header.mbc_type {
            MbcType::None => MbcState::NoMbc,
            MbcType::Mbc1 => MbcState::Mbc1 {
                ram_mode: false,
                bank_register: 0x01,
            },
            MbcType::Mbc2 => MbcState::Mbc2,
            MbcType::Mbc3 => MbcState::Mbc3 { ram_bank: 0 },
            MbcType::Mbc5 => MbcState::Mbc5 {
                rom_bank: 0x01,
                rumble: header.has_rumble,
            },
        };
        Self {
            rom: MemoryBank::new(
                "cartridge rom",
                false,
                false,
                ROM_START,
                rom.len() / ROM_BANK_SIZE,
                ROM_BANK_SIZE,
            ),
            ram: ram_banks(header),
            rom_data: rom.into(),
            ram_enabled: false,
            has_rtc: header.has_rtc,
            state,
        }
    }

    pub fn reset(&mut self, bus: &mut Bus) {
        self.ram_enabled = false;
        self.rom.reset(bus, Some(&self.rom_data));
        if let Some(ram) = self.ram.as_mut() {
            ram.reset(bus, None);
        }
        self.state = match self.state {
            MbcState::NoMbc => MbcState::NoMbc,
            MbcState::Mbc1 { .. } => MbcState::Mbc1 {
                ram_mode: false,
                bank_register: 0x01,
            },
            MbcState::Mbc2 => MbcState::Mbc2,
            MbcState::Mbc3 { .. } => MbcState::Mbc3 { ram_bank: 0 },
            MbcState::Mbc5 { rumble, .. } => MbcState::Mbc5 {
                rom_bank: 0x01,
                rumble,
            },
        };
    }

    #[inline]
    pub fn rom_bank(&self) -> usize {
        self.rom.active_bank()
    }

    pub fn ram_bank(&self) -> Option<usize> {
        self.ram.as_ref().map(MemoryBank::active_bank)
    }

    #[inline]
    pub fn is_ram_enabled(&self) -> bool {
        self.ram_enabled
    }

    fn select_rom_bank(&mut self, bus: &mut Bus, bank: usize) {
        let count = self.rom.num_banks();
        if bank >= count {
            warn!("ROM bank {bank:#04X} beyond {count} banks, wrapping");
        }
        let bank = bank % count;
        debug!("ROM bank {bank:#04X}");
        self.rom.set_active_bank(bus, bank);
    }

    fn select_ram_bank(&mut self, bus: &mut Bus, bank: usize) {
        if let Some(ram) = self.ram.as_mut() {
            let bank = bank % ram.num_banks();
            ram.set_active_bank(bus, bank);
        }
    }

    /// Bus address backing `addr` in the external RAM window. Small RAM
    /// chips mirror across the window.
    fn ram_addr(ram: &MemoryBank, addr: u16) -> u16 {
        CRAM_START + ((addr - CRAM_START) as usize % ram.bank_size()) as u16
    }

    fn rtc_selected(&self) -> bool {
        matches!(self.state, MbcState::Mbc3 { ram_bank } if ram_bank >= 0x08)
    }

    pub fn read(&self, bus: &Bus, addr: u16) -> u8 {
        if !(CRAM_START..=CRAM_END).contains(&addr) {
            return bus.get(addr);
        }
        let Some(ram) = self.ram.as_ref() else {
            return if self.has_rtc && self.ram_enabled && self.rtc_selected() {
                0x00
            } else {
                0xFF
            };
        };
        match self.state {
            MbcState::NoMbc => bus.get(Self::ram_addr(ram, addr)),
            _ if !self.ram_enabled => 0xFF,
            MbcState::Mbc2 => bus.get(Self::ram_addr(ram, addr)) | 0xF0,
            // Clock registers are not emulated.
            MbcState::Mbc3 { ram_bank } if ram_bank >= 0x08 => 0x00,
            _ => bus.get(Self::ram_addr(ram, addr)),
        }
    }

    pub fn write(&mut self, bus: &mut Bus, addr: u16, val: u8) {
        match (self.state, addr) {
            (MbcState::NoMbc, CRAM_START..=CRAM_END) => {
                if let Some(ram) = self.ram.as_ref() {
                    bus.set(Self::ram_addr(ram, addr), val);
                }
            }
            (MbcState::NoMbc, _) => {}

            // Address bit 8 picks between RAM enable and ROM bank.
            (MbcState::Mbc2, 0x0000..=0x3FFF) => {
                if addr & 0x0100 == 0 {
                    self.ram_enabled = val & 0x0F == 0x0A;
                } else {
                    self.select_rom_bank(bus, (val & 0x0F).max(1) as usize);
                }
            }
            (MbcState::Mbc2, CRAM_START..=CRAM_END) => {
                if let (true, Some(ram)) = (self.ram_enabled, self.ram.as_ref()) {
                    bus.set(Self::ram_addr(ram, addr), val & 0x0F);
                }
            }

            (_, 0x0000..=0x1FFF) => {
                if self.ram.is_some() || self.has_rtc {
                    self.ram_enabled = val & 0x0F == 0x0A;
                }
            }

            (
                MbcState::Mbc1 {
                    ram_mode,
                    bank_register,
                },
                0x2000..=0x3FFF,
            ) => {
                let low = (val & 0x1F).max(1);
                let bank_register = (bank_register & 0x60) | low;
                self.state = MbcState::Mbc1 {
                    ram_mode,
                    bank_register,
                };
                let bank = if ram_mode { low } else { bank_register };
                self.select_rom_bank(bus, bank as usize);
            }
            (
                MbcState::Mbc1 {
                    ram_mode,
                    bank_register,
                },
                0x4000..=0x5FFF,
            ) => {
                let high = val & 0x03;
                let bank_register = (high << 5) | (bank_register & 0x1F);
                self.state = MbcState::Mbc1 {
                    ram_mode,
                    bank_register,
                };
                if ram_mode {
                    self.select_ram_bank(bus, high as usize);
                } else {
                    self.select_rom_bank(bus, bank_register as usize);
                }
            }
            (
                MbcState::Mbc1 {
                    ram_mode,
                    bank_register,
                },
                0x6000..=0x7FFF,
            ) => {
                let new_mode = val & 0x01 != 0;
                if new_mode != ram_mode {
                    self.state = MbcState::Mbc1 {
                        ram_mode: new_mode,
                        bank_register,
                    };
                    if new_mode {
                        self.select_rom_bank(bus, (bank_register & 0x1F) as usize);
                        self.select_ram_bank(bus, ((bank_register >> 5) & 0x03) as usize);
                    } else {
                        self.select_rom_bank(bus, bank_register as usize);
                        self.select_ram_bank(bus, 0);
                    }
                }
            }

            (MbcState::Mbc3 { .. }, 0x2000..=0x3FFF) => {
                self.select_rom_bank(bus, (val & 0x7F).max(1) as usize);
            }
            (MbcState::Mbc3 { .. }, 0x4000..=0x5FFF) => {
                self.state = MbcState::Mbc3 { ram_bank: val };
                if val < 0x08 {
                    self.select_ram_bank(bus, val as usize);
                }
            }
            // Clock latch, not emulated.
            (MbcState::Mbc3 { .. }, 0x6000..=0x7FFF) => {}

            (MbcState::Mbc5 { rom_bank, rumble }, 0x2000..=0x2FFF) => {
                let rom_bank = (rom_bank & 0x0100) | val as u16;
                self.state = MbcState::Mbc5 { rom_bank, rumble };
                self.select_rom_bank(bus, rom_bank as usize);
            }
            (MbcState::Mbc5 { rom_bank, rumble }, 0x3000..=0x3FFF) => {
                let rom_bank = ((val as u16 & 0x01) << 8) | (rom_bank & 0x00FF);
                self.state = MbcState::Mbc5 { rom_bank, rumble };
                self.select_rom_bank(bus, rom_bank as usize);
            }
            (MbcState::Mbc5 { rumble, .. }, 0x4000..=0x5FFF) => {
                // Bit 3 drives the rumble motor on rumble carts.
                let bank = if rumble { val & 0x07 } else { val & 0x0F };
                self.select_ram_bank(bus, bank as usize);
            }

            (_, CRAM_START..=CRAM_END) => {
                if !self.ram_enabled || self.rtc_selected() {
                    return;
                }
                if let Some(ram) = self.ram.as_ref() {
                    bus.set(Self::ram_addr(ram, addr), val);
                }
            }
            _ => {}
        }
    }

    /// Every external RAM bank, live bytes included.
    pub fn ram_contents(&self, bus: &Bus) -> Option<Vec<u8>> {
        self.ram.as_ref().map(|ram| ram.contents(bus))
    }

    pub fn load_ram(&mut self, bus: &mut Bus, data: &[u8]) {
        let nibbles = matches!(self.state, MbcState::Mbc2);
        if let Some(ram) = self.ram.as_mut() {
            if nibbles {
                let masked: Vec<u8> = data.iter().map(|b| b & 0x0F).collect();
                ram.load_contents(bus, &masked);
            } else {
                ram.load_contents(bus, data);
            }
        }
    }

    pub fn serialize(&mut self, bus: &Bus, out: &mut StateWriter) {
        out.marker();
        out.bool(self.ram_enabled);
        self.rom.serialize(bus, out);
        if let Some(ram) = self.ram.as_mut() {
            ram.serialize(bus, out);
        }
        match self.state {
            MbcState::NoMbc | MbcState::Mbc2 => {}
            MbcState::Mbc1 {
                ram_mode,
                bank_register,
            } => {
                out.bool(ram_mode);
                out.u8(bank_register);
            }
            MbcState::Mbc3 { ram_bank } => out.u8(ram_bank),
            MbcState::Mbc5 { rom_bank, .. } => out.u16(rom_bank),
        }
    }

    pub fn deserialize(
        &mut self,
        bus: &mut Bus,
        input: &mut StateReader<'_>,
    ) -> Result<(), SaveStateError> {
        input.marker("mbc")?;
        self.ram_enabled = input.bool()?;
        self.rom.deserialize(bus, input)?;
        if let Some(ram) = self.ram.as_mut() {
            ram.deserialize(bus, input)?;
        }
        self.state = match self.state {
            MbcState::NoMbc => MbcState::NoMbc,
            MbcState::Mbc2 => MbcState::Mbc2,
            MbcState::Mbc1 { .. } => MbcState::Mbc1 {
                ram_mode: input.bool()?,
                bank_register: input.u8()?,
            },
            MbcState::Mbc3 { .. } => MbcState::Mbc3 {
                ram_bank: input.u8()?,
            },
            MbcState::Mbc5 { rumble, .. } => {
                let rom_bank = input.u16()?;
                if rom_bank > 0x01FF {
                    return Err(input.invalid(rom_bank as u32));
                }
                MbcState::Mbc5 { rom_bank, rumble }
            }
        };
        Ok(())
    }
}
