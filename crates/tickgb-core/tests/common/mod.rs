//! Synthetic cartridge images for integration tests.

#![allow(dead_code)]

use tickgb_core::cartridge::CartridgeHeader;
use tickgb_core::GameBoy;

pub const ENTRY: usize = 0x0100;

pub struct RomBuilder {
    rom: Vec<u8>,
}

impl RomBuilder {
    /// `rom_code` and `ram_code` are the raw header size codes.
    pub fn new(cart_type: u8, rom_code: u8, ram_code: u8) -> Self {
        let mut rom = vec![0u8; 0x8000 << rom_code];
        rom[0x134..0x134 + 5].copy_from_slice(b"TICKS");
        rom[0x147] = cart_type;
        rom[0x148] = rom_code;
        rom[0x149] = ram_code;
        rom[0x14A] = 0x01;
        rom[0x14E] = 0xBE;
        rom[0x14F] = 0xEF;
        // Tag every switchable bank with its number.
        for (bank, chunk) in rom.chunks_mut(0x4000).enumerate().skip(1) {
            chunk[0] = bank as u8;
        }
        Self { rom }
    }

    pub fn rom_only() -> Self {
        Self::new(0x00, 0x00, 0x00)
    }

    pub fn cgb(mut self, flag: u8) -> Self {
        self.rom[0x143] = flag;
        self
    }

    pub fn global_checksum(mut self, checksum: u16) -> Self {
        self.rom[0x14E..0x150].copy_from_slice(&checksum.to_be_bytes());
        self
    }

    pub fn code(mut self, addr: usize, bytes: &[u8]) -> Self {
        self.rom[addr..addr + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.rom[0x14D] = CartridgeHeader::compute_header_checksum(&self.rom);
        self.rom
    }
}

/// A machine running `program` from the entry point of a ROM-only cartridge.
pub fn machine(program: &[u8]) -> GameBoy {
    let mut gb = GameBoy::new();
    gb.load_cartridge(RomBuilder::rom_only().code(ENTRY, program).build())
        .expect("synthetic ROM loads");
    gb
}

pub fn run_ticks(gb: &mut GameBoy, ticks: usize) {
    for _ in 0..ticks {
        gb.tick();
    }
}
