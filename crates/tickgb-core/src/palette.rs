/// 5-bit channel to 8-bit intensity, following the CGB LCD response.
#[rustfmt::skip]
const CGB_TO_RGB: [u8; 32] = [
    0, 8, 16, 25, 33, 41, 49, 58, 66, 74, 82, 90, 99, 107, 115, 123,
    132, 140, 148, 156, 165, 173, 181, 189, 197, 206, 214, 222, 230, 239, 247, 255,
];

pub const COLORS_PER_PALETTE: usize = 4;
pub const PALETTES: usize = 8;

/// A CGB palette entry in RGB555 (`0bbbbbgggggrrrrr`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PaletteColor(u16);

impl PaletteColor {
    pub const fn from_rgb555(r: u8, g: u8, b: u8) -> Self {
        Self(((b as u16 & 0x1F) << 10) | ((g as u16 & 0x1F) << 5) | (r as u16 & 0x1F))
    }

    pub const fn from_raw(color15: u16) -> Self {
        Self(color15 & 0x7FFF)
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    pub fn low(self) -> u8 {
        self.0 as u8
    }

    pub fn high(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn set_low(&mut self, val: u8) {
        self.0 = (self.0 & 0x7F00) | val as u16;
    }

    pub fn set_high(&mut self, val: u8) {
        self.0 = (((val & 0x7F) as u16) << 8) | (self.0 & 0x00FF);
    }

    pub fn red(self) -> u8 {
        (self.0 & 0x1F) as u8
    }

    pub fn green(self) -> u8 {
        ((self.0 >> 5) & 0x1F) as u8
    }

    pub fn blue(self) -> u8 {
        ((self.0 >> 10) & 0x1F) as u8
    }

    /// `0x00RRGGBB`.
    pub fn rgb24(self) -> u32 {
        (CGB_TO_RGB[self.red() as usize] as u32) << 16
            | (CGB_TO_RGB[self.green() as usize] as u32) << 8
            | CGB_TO_RGB[self.blue() as usize] as u32
    }
}

/// Grey ramp used for monochrome shades and as the CGB power-on palette.
pub const DEFAULT_PALETTE: [PaletteColor; COLORS_PER_PALETTE] = [
    PaletteColor::from_rgb555(28, 28, 28),
    PaletteColor::from_rgb555(19, 19, 19),
    PaletteColor::from_rgb555(11, 11, 11),
    PaletteColor::from_rgb555(2, 2, 2),
];

pub type Palette = [PaletteColor; COLORS_PER_PALETTE];

/// Resolve a 2-bit color through a DMG palette register (BGP/OBP0/OBP1).
#[inline]
pub fn dmg_shade(palette: u8, color: u8) -> PaletteColor {
    DEFAULT_PALETTE[((palette >> (color * 2)) & 0x03) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extremes_map_to_black_and_white() {
        assert_eq!(PaletteColor::from_rgb555(0, 0, 0).rgb24(), 0x000000);
        assert_eq!(PaletteColor::from_rgb555(31, 31, 31).rgb24(), 0xFFFFFF);
        assert_eq!(PaletteColor::from_rgb555(31, 0, 0).rgb24(), 0xFF0000);
    }

    #[test]
    fn default_ramp_is_grey() {
        assert_eq!(DEFAULT_PALETTE[0].rgb24(), 0xE6E6E6);
        assert_eq!(DEFAULT_PALETTE[3].rgb24(), 0x101010);
    }

    #[test]
    fn byte_halves_compose_and_drop_bit_15() {
        let mut color = PaletteColor::default();
        color.set_low(0x1F);
        color.set_high(0xFC);
        assert_eq!(color.raw(), 0x7C1F);
        assert_eq!(color.red(), 31);
        assert_eq!(color.blue(), 31);
        assert_eq!(color.green(), 0);
    }

    #[test]
    fn bgp_selects_shade_per_color() {
        assert_eq!(dmg_shade(0xE4, 0), DEFAULT_PALETTE[0]);
        assert_eq!(dmg_shade(0xE4, 3), DEFAULT_PALETTE[3]);
        assert_eq!(dmg_shade(0x1B, 0), DEFAULT_PALETTE[3]);
    }
}
