use log::{info, warn};
use thiserror::Error;

use crate::bus::Bus;
use crate::mbc::Mbc;
use crate::savestate::{SaveStateError, StateReader, StateWriter};

const HEADER_TITLE: usize = 0x134;
const HEADER_CGB_FLAG: usize = 0x143;
const HEADER_SGB_FLAG: usize = 0x146;
const HEADER_TYPE: usize = 0x147;
const HEADER_ROM_SIZE: usize = 0x148;
const HEADER_RAM_SIZE: usize = 0x149;
const HEADER_DESTINATION: usize = 0x14A;
const HEADER_VERSION: usize = 0x14C;
const HEADER_CHECKSUM: usize = 0x14D;
const HEADER_GLOBAL_CHECKSUM: usize = 0x14E;

/// Smallest image the bus can map: one fixed and one switchable bank.
pub const MIN_ROM_SIZE: usize = 0x8000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CartridgeError {
    #[error("ROM image is {0} bytes, expected at least 32768")]
    TooSmall(usize),
    #[error("Unsupported cartridge type: 0x{0:02X}")]
    UnsupportedCartridgeType(u8),
    #[error("Cartridge has unsupported ROM size: 0x{0:02X}")]
    UnsupportedRomSize(u8),
    #[error("Cartridge has unsupported RAM size: 0x{0:02X}")]
    UnsupportedRamSize(u8),
    #[error("Cartridge has invalid CGB support code: 0x{0:02X}")]
    UnsupportedCgbCode(u8),
    #[error("Cartridge has invalid SGB support code: 0x{0:02X}")]
    UnsupportedSgbCode(u8),
    #[error("Cartridge has invalid destination code: 0x{0:02X}")]
    UnsupportedDestination(u8),
    #[error("header declares a {expected} byte ROM but the image is {actual} bytes")]
    RomSizeMismatch { expected: usize, actual: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CgbSupport {
    Incompatible,
    Compatible,
    Exclusive,
}

impl CgbSupport {
    pub fn supports_cgb(self) -> bool {
        !matches!(self, CgbSupport::Incompatible)
    }

    pub fn supports_dmg(self) -> bool {
        !matches!(self, CgbSupport::Exclusive)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    Japan,
    Worldwide,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MbcType {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
}

/// Parsed cartridge header (gbdev.io/pandocs/The_Cartridge_Header.html)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CartridgeHeader {
    pub title: String,
    pub cgb_support: CgbSupport,
    pub sgb_support: bool,
    pub cartridge_type: u8,
    pub mbc_type: MbcType,
    pub has_sram: bool,
    pub has_battery: bool,
    pub has_rtc: bool,
    pub has_rumble: bool,
    pub rom_size: usize,
    pub ram_size: usize,
    pub destination: Destination,
    pub version: u8,
    pub header_checksum: u8,
    pub global_checksum: u16,
}

struct TypeFlags {
    mbc: MbcType,
    sram: bool,
    battery: bool,
    rtc: bool,
    rumble: bool,
}

const fn flags(mbc: MbcType, sram: bool, battery: bool, rtc: bool, rumble: bool) -> TypeFlags {
    TypeFlags {
        mbc,
        sram,
        battery,
        rtc,
        rumble,
    }
}

fn type_flags(code: u8) -> Option<TypeFlags> {
    use MbcType::*;
    let f = match code {
        0x00 => flags(None, false, false, false, false),
        0x01 => flags(Mbc1, false, false, false, false),
        0x02 => flags(Mbc1, true, false, false, false),
        0x03 => flags(Mbc1, true, true, false, false),
        0x05 => flags(Mbc2, false, false, false, false),
        0x06 => flags(Mbc2, false, true, false, false),
        0x08 => flags(None, true, false, false, false),
        0x09 => flags(None, true, true, false, false),
        0x0F => flags(Mbc3, false, true, true, false),
        0x10 => flags(Mbc3, true, true, true, false),
        0x11 => flags(Mbc3, false, false, false, false),
        0x12 => flags(Mbc3, true, false, false, false),
        0x13 => flags(Mbc3, true, true, false, false),
        0x19 => flags(Mbc5, false, false, false, false),
        0x1A => flags(Mbc5, true, false, false, false),
        0x1B => flags(Mbc5, true, true, false, false),
        0x1C => flags(Mbc5, false, false, false, true),
        0x1D => flags(Mbc5, true, false, false, true),
        0x1E => flags(Mbc5, true, true, false, true),
        _ => return Option::None,
    };
    Some(f)
}

impl CartridgeHeader {
    pub fn parse(rom: &[u8]) -> Result<Self, CartridgeError> {
        if rom.len() < MIN_ROM_SIZE {
            return Err(CartridgeError::TooSmall(rom.len()));
        }

        let cgb_support = match rom[HEADER_CGB_FLAG] {
            0x00 => CgbSupport::Incompatible,
            0x80 => CgbSupport::Compatible,
            0xC0 => CgbSupport::Exclusive,
            code => return Err(CartridgeError::UnsupportedCgbCode(code)),
        };
        let sgb_support = match rom[HEADER_SGB_FLAG] {
            0x00 => false,
            0x03 => true,
            code => return Err(CartridgeError::UnsupportedSgbCode(code)),
        };
        // CGB titles give their last bytes to the manufacturer code.
        let title_len = if cgb_support.supports_cgb() { 11 } else { 16 };
        let title = rom[HEADER_TITLE..HEADER_TITLE + title_len]
            .iter()
            .filter(|&&b| b != 0)
            .map(|&b| b as char)
            .collect();

        let cartridge_type = rom[HEADER_TYPE];
        let f = type_flags(cartridge_type)
            .ok_or(CartridgeError::UnsupportedCartridgeType(cartridge_type))?;

        let rom_size = match rom[HEADER_ROM_SIZE] {
            code @ 0x00..=0x08 => MIN_ROM_SIZE << code,
            code => return Err(CartridgeError::UnsupportedRomSize(code)),
        };
        let ram_size = match rom[HEADER_RAM_SIZE] {
            0x00 => 0,
            0x01 => 0x800,
            0x02 => 0x2000,
            0x03 => 0x8000,
            0x04 => 0x20000,
            0x05 => 0x10000,
            code => return Err(CartridgeError::UnsupportedRamSize(code)),
        };
        let destination = match rom[HEADER_DESTINATION] {
            0x00 => Destination::Japan,
            0x01 => Destination::Worldwide,
            code => return Err(CartridgeError::UnsupportedDestination(code)),
        };

        Ok(Self {
            title,
            cgb_support,
            sgb_support,
            cartridge_type,
            mbc_type: f.mbc,
            has_sram: f.sram,
            has_battery: f.battery,
            has_rtc: f.rtc,
            has_rumble: f.rumble,
            rom_size,
            ram_size,
            destination,
            version: rom[HEADER_VERSION],
            header_checksum: rom[HEADER_CHECKSUM],
            global_checksum: u16::from_be_bytes([
                rom[HEADER_GLOBAL_CHECKSUM],
                rom[HEADER_GLOBAL_CHECKSUM + 1],
            ]),
        })
    }

    #[inline]
    pub fn supports_cgb(&self) -> bool {
        self.cgb_support.supports_cgb()
    }

    /// Header checksum over 0x134-0x14C as the boot ROM computes it.
    pub fn compute_header_checksum(rom: &[u8]) -> u8 {
        rom[HEADER_TITLE..=HEADER_VERSION]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_sub(b).wrapping_sub(1))
    }

    /// RAM bytes the battery keeps alive, if any.
    pub fn battery_ram_size(&self) -> usize {
        match (self.has_battery, self.mbc_type) {
            (false, _) => 0,
            (true, MbcType::Mbc2) => crate::mbc::MBC2_RAM_SIZE,
            (true, _) if self.has_sram => self.ram_size,
            _ => 0,
        }
    }
}

/// A loaded cartridge: its header plus the bank controller that owns the
/// ROM and external RAM windows.
#[derive(Clone)]
pub struct Cartridge {
    header: CartridgeHeader,
    mbc: Mbc,
}

impl Cartridge {
    /// Validate `rom` and build its controller. Nothing is mapped until
    /// [`reset`](Self::reset).
    pub fn load(mut rom: Vec<u8>) -> Result<Self, CartridgeError> {
        let header = CartridgeHeader::parse(&rom)?;
        if rom.len() < header.rom_size {
            return Err(CartridgeError::RomSizeMismatch {
                expected: header.rom_size,
                actual: rom.len(),
            });
        }
        if rom.len() > header.rom_size {
            warn!(
                "ROM image is {} bytes, header declares {}; ignoring the excess",
                rom.len(),
                header.rom_size
            );
            rom.truncate(header.rom_size);
        }
        if CartridgeHeader::compute_header_checksum(&rom) != header.header_checksum {
            warn!("Header checksum mismatch for \"{}\"", header.title);
        }
        info!(
            "Cartridge \"{}\": type 0x{:02X} ({:?}), {} KiB ROM, {} KiB RAM",
            header.title,
            header.cartridge_type,
            header.mbc_type,
            header.rom_size / 1024,
            header.ram_size / 1024
        );
        let mbc = Mbc::new(&header, rom);
        Ok(Self { header, mbc })
    }

    pub fn header(&self) -> &CartridgeHeader {
        &self.header
    }

    pub fn mbc(&self) -> &Mbc {
        &self.mbc
    }

    pub fn reset(&mut self, bus: &mut Bus) {
        self.mbc.reset(bus);
    }

    pub fn read(&self, bus: &Bus, addr: u16) -> u8 {
        self.mbc.read(bus, addr)
    }

    pub fn write(&mut self, bus: &mut Bus, addr: u16, val: u8) {
        self.mbc.write(bus, addr, val);
    }

    #[inline]
    pub fn has_battery(&self) -> bool {
        self.header.battery_ram_size() > 0
    }

    /// Battery-backed RAM contents for a `.sav` file.
    pub fn battery_ram(&self, bus: &Bus) -> Option<Vec<u8>> {
        let size = self.header.battery_ram_size();
        if size == 0 {
            return None;
        }
        let mut ram = self.mbc.ram_contents(bus)?;
        ram.truncate(size);
        Some(ram)
    }

    pub fn load_battery_ram(&mut self, bus: &mut Bus, data: &[u8]) {
        if self.header.battery_ram_size() == 0 {
            return;
        }
        self.mbc.load_ram(bus, data);
    }

    pub fn serialize(&mut self, bus: &Bus, out: &mut StateWriter) {
        self.mbc.serialize(bus, out);
    }

    pub fn deserialize(
        &mut self,
        bus: &mut Bus,
        input: &mut StateReader<'_>,
    ) -> Result<(), SaveStateError> {
        self.mbc.deserialize(bus, input)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal image with a valid header for `cart_type`.
    pub(crate) fn rom_image(cart_type: u8, rom_code: u8, ram_code: u8) -> Vec<u8> {
        let mut rom = vec![0u8; MIN_ROM_SIZE << rom_code];
        rom[HEADER_TITLE..HEADER_TITLE + 4].copy_from_slice(b"TEST");
        rom[HEADER_TYPE] = cart_type;
        rom[HEADER_ROM_SIZE] = rom_code;
        rom[HEADER_RAM_SIZE] = ram_code;
        rom[HEADER_DESTINATION] = 0x01;
        rom[HEADER_CHECKSUM] = CartridgeHeader::compute_header_checksum(&rom);
        for (bank, chunk) in rom.chunks_mut(0x4000).enumerate().skip(1) {
            chunk[0] = bank as u8;
        }
        rom
    }

    #[test]
    fn parses_header_fields() {
        let mut rom = rom_image(0x1B, 0x02, 0x03);
        rom[HEADER_CGB_FLAG] = 0x80;
        rom[HEADER_GLOBAL_CHECKSUM] = 0x12;
        rom[HEADER_GLOBAL_CHECKSUM + 1] = 0x34;
        let header = CartridgeHeader::parse(&rom).unwrap();
        assert_eq!(header.title, "TEST");
        assert_eq!(header.mbc_type, MbcType::Mbc5);
        assert!(header.has_sram && header.has_battery && !header.has_rumble);
        assert_eq!(header.rom_size, 128 * 1024);
        assert_eq!(header.ram_size, 32 * 1024);
        assert_eq!(header.destination, Destination::Worldwide);
        assert_eq!(header.global_checksum, 0x1234);
        assert!(header.supports_cgb());
    }

    #[test]
    fn rejects_unknown_codes() {
        let mut rom = rom_image(0x00, 0x00, 0x00);
        rom[HEADER_TYPE] = 0x20;
        let err = CartridgeHeader::parse(&rom).unwrap_err();
        assert_eq!(err, CartridgeError::UnsupportedCartridgeType(0x20));
        assert_eq!(err.to_string(), "Unsupported cartridge type: 0x20");

        let mut rom = rom_image(0x00, 0x00, 0x00);
        rom[HEADER_RAM_SIZE] = 0x07;
        assert_eq!(
            CartridgeHeader::parse(&rom),
            Err(CartridgeError::UnsupportedRamSize(0x07))
        );

        let mut rom = rom_image(0x00, 0x00, 0x00);
        rom[HEADER_CGB_FLAG] = 0x42;
        assert_eq!(
            CartridgeHeader::parse(&rom),
            Err(CartridgeError::UnsupportedCgbCode(0x42))
        );
    }

    #[test]
    fn short_images_are_rejected() {
        assert!(matches!(
            Cartridge::load(vec![0; 0x4000]),
            Err(CartridgeError::TooSmall(0x4000))
        ));
        let mut rom = rom_image(0x01, 0x00, 0x00);
        rom[HEADER_ROM_SIZE] = 0x01;
        assert_eq!(
            Cartridge::load(rom).err(),
            Some(CartridgeError::RomSizeMismatch {
                expected: 0x10000,
                actual: 0x8000
            })
        );
    }

    #[test]
    fn header_checksum_matches_boot_rom_algorithm() {
        let rom = rom_image(0x00, 0x00, 0x00);
        let header = CartridgeHeader::parse(&rom).unwrap();
        assert_eq!(
            CartridgeHeader::compute_header_checksum(&rom),
            header.header_checksum
        );
    }

    #[test]
    fn battery_ram_size_follows_type() {
        let header = CartridgeHeader::parse(&rom_image(0x03, 0x00, 0x02)).unwrap();
        assert_eq!(header.battery_ram_size(), 0x2000);
        let header = CartridgeHeader::parse(&rom_image(0x06, 0x00, 0x00)).unwrap();
        assert_eq!(header.battery_ram_size(), 0x200);
        let header = CartridgeHeader::parse(&rom_image(0x02, 0x00, 0x02)).unwrap();
        assert_eq!(header.battery_ram_size(), 0);
    }
}
