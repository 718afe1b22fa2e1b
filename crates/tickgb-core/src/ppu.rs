//! Pixel-FIFO video controller.
//!
//! The LCD runs a four-mode state machine per scanline. During pixel
//! transfer a tile fetcher feeds a 16-entry FIFO that emits one pixel per
//! dot; sprites are overlaid onto the queued background pixels when the
//! beam reaches them. Scroll and window registers are latched when
//! transfer starts.

use log::debug;

use crate::bank::MemoryBank;
use crate::bus::{Bus, Unit, OAM_START, VRAM_END, VRAM_START};
use crate::hardware::HardwareMode;
use crate::interrupts::{Interrupt, Interrupts};
use crate::palette::{dmg_shade, Palette, PaletteColor, DEFAULT_PALETTE, PALETTES};
use crate::savestate::{SaveStateError, StateReader, StateWriter};

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

pub const LCDC: u16 = 0xFF40;
pub const STAT: u16 = 0xFF41;
pub const SCY: u16 = 0xFF42;
pub const SCX: u16 = 0xFF43;
pub const LY: u16 = 0xFF44;
pub const LYC: u16 = 0xFF45;
pub const BGP: u16 = 0xFF47;
pub const OBP0: u16 = 0xFF48;
pub const OBP1: u16 = 0xFF49;
pub const WY: u16 = 0xFF4A;
pub const WX: u16 = 0xFF4B;
pub const VBK: u16 = 0xFF4F;
pub const BCPS: u16 = 0xFF68;
pub const BCPD: u16 = 0xFF69;
pub const OCPS: u16 = 0xFF6A;
pub const OCPD: u16 = 0xFF6B;

// Timing in T-cycles (gbdev.io/pandocs/Rendering.html)
pub const SCANLINE_CYCLES: u32 = 456;
pub const FRAME_CYCLES: u32 = SCANLINE_CYCLES * VBLANK_END as u32;
const OAM_SEARCH_CYCLES: u32 = 80;
const VBLANK_START: u8 = 144;
const VBLANK_END: u8 = 154;

const SPRITE_COUNT: u16 = 40;
const MAX_VISIBLE_SPRITES: usize = 10;

const VRAM_BANK_SIZE: usize = 0x2000;
const TILE_MAP_0: u16 = 0x9800;
const TILE_MAP_1: u16 = 0x9C00;
const TILE_DATA_UNSIGNED: u16 = 0x8000;
const TILE_DATA_SIGNED: u16 = 0x9000;

const FIFO_CAPACITY: usize = 16;
const FETCH_READY: u8 = 3;

const WHITE: u32 = 0xFFFFFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LcdMode {
    HBlank = 0,
    VBlank = 1,
    OamSearch = 2,
    Transfer = 3,
}

impl LcdMode {
    pub fn from_stat(stat: u8) -> Self {
        match stat & 0x03 {
            0 => LcdMode::HBlank,
            1 => LcdMode::VBlank,
            2 => LcdMode::OamSearch,
            _ => LcdMode::Transfer,
        }
    }

    /// STAT enable bit for this mode. Pixel transfer has no STAT source.
    pub fn interrupt_bit(self) -> Option<u8> {
        match self {
            LcdMode::HBlank => Some(3),
            LcdMode::VBlank => Some(4),
            LcdMode::OamSearch => Some(5),
            LcdMode::Transfer => None,
        }
    }
}

/// RGB888 frame, row-major, 3 bytes per pixel.
#[derive(Clone)]
pub struct Framebuffer {
    pixels: Box<[u8]>,
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framebuffer {
    pub fn new() -> Self {
        Self {
            pixels: vec![0xFF; SCREEN_WIDTH * SCREEN_HEIGHT * 3].into_boxed_slice(),
        }
    }

    pub fn width(&self) -> usize {
        SCREEN_WIDTH
    }

    pub fn height(&self) -> usize {
        SCREEN_HEIGHT
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// `0x00RRGGBB` at (`x`, `y`).
    pub fn pixel(&self, x: usize, y: usize) -> u32 {
        let i = (y * SCREEN_WIDTH + x) * 3;
        u32::from_be_bytes([0, self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]])
    }

    fn set_pixel(&mut self, x: usize, y: usize, rgb: u32) {
        if x >= SCREEN_WIDTH || y >= SCREEN_HEIGHT {
            return;
        }
        let i = (y * SCREEN_WIDTH + x) * 3;
        let [_, r, g, b] = rgb.to_be_bytes();
        self.pixels[i..i + 3].copy_from_slice(&[r, g, b]);
    }

    fn fill(&mut self, rgb: u32) {
        let [_, r, g, b] = rgb.to_be_bytes();
        for px in self.pixels.chunks_exact_mut(3) {
            px.copy_from_slice(&[r, g, b]);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
enum PixelSource {
    #[default]
    Background,
    Window,
    Sprite,
}

impl PixelSource {
    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(PixelSource::Background),
            1 => Some(PixelSource::Window),
            2 => Some(PixelSource::Sprite),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
struct Pixel {
    source: PixelSource,
    color: u8,
    palette: u8,
    priority: bool,
    sprite_x: u8,
    sprite_id: u8,
}

#[derive(Clone, Default)]
struct PixelFifo {
    entries: [Pixel; FIFO_CAPACITY],
    head: usize,
    len: usize,
}

impl PixelFifo {
    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    fn push(&mut self, pixel: Pixel) {
        if self.len == FIFO_CAPACITY {
            return;
        }
        self.entries[(self.head + self.len) % FIFO_CAPACITY] = pixel;
        self.len += 1;
    }

    fn pop(&mut self) -> Option<Pixel> {
        if self.len == 0 {
            return None;
        }
        let pixel = self.entries[self.head];
        self.head = (self.head + 1) % FIFO_CAPACITY;
        self.len -= 1;
        Some(pixel)
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut Pixel> {
        (index < self.len).then(|| &mut self.entries[(self.head + index) % FIFO_CAPACITY])
    }

    fn iter(&self) -> impl Iterator<Item = &Pixel> {
        (0..self.len).map(|i| &self.entries[(self.head + i) % FIFO_CAPACITY])
    }
}

pub struct Video {
    mode: HardwareMode,
    vram: MemoryBank,
    bg_palettes: [Palette; PALETTES],
    obj_palettes: [Palette; PALETTES],
    framebuffer: Framebuffer,
    fifo: PixelFifo,
    /// OAM indices selected for the current line, ordered by X then index.
    visible_sprites: Vec<u8>,

    scanline_cycles: u32,
    /// Cycles carried from OAM search into pixel transfer.
    overflow_cycles: u32,
    stat_signal: bool,
    lcd_enabled: bool,
    /// Set while the first frame after switching the LCD on is drawn.
    lcd_enabling: bool,

    // Latched when pixel transfer starts.
    scx: u8,
    scy: u8,
    wx: i32,
    wy: u8,

    lx: u32,
    fetching_window: bool,
    fetching_sprite: bool,
    discard: u8,
    fetcher_state: u8,
    fetcher_phase: bool,

    events: Vec<LcdMode>,
}

impl Video {
    pub fn new(bus: &mut Bus) -> Self {
        bus.set_owner(Unit::Video, VRAM_START..=VRAM_END);
        bus.set_owner(Unit::Video, LCDC..=LYC);
        bus.set_owner(Unit::Video, BGP..=WX);
        bus.set_owner(Unit::Video, VBK..=VBK);
        bus.set_owner(Unit::Video, BCPS..=OCPD);
        Self {
            mode: HardwareMode::Dmg,
            vram: MemoryBank::new("vram", true, true, VRAM_START, 2, VRAM_BANK_SIZE),
            bg_palettes: [DEFAULT_PALETTE; PALETTES],
            obj_palettes: [DEFAULT_PALETTE; PALETTES],
            framebuffer: Framebuffer::new(),
            fifo: PixelFifo::default(),
            visible_sprites: Vec::with_capacity(MAX_VISIBLE_SPRITES),
            scanline_cycles: 0,
            overflow_cycles: 0,
            stat_signal: false,
            lcd_enabled: true,
            lcd_enabling: false,
            scx: 0,
            scy: 0,
            wx: 0,
            wy: 0,
            lx: 0,
            fetching_window: false,
            fetching_sprite: false,
            discard: 0,
            fetcher_state: 0,
            fetcher_phase: false,
            events: Vec::new(),
        }
    }

    pub fn reset(&mut self, bus: &mut Bus, irq: &mut Interrupts, mode: HardwareMode) {
        self.mode = mode;
        self.vram.reset(bus, None);
        self.bg_palettes = [DEFAULT_PALETTE; PALETTES];
        self.obj_palettes = [DEFAULT_PALETTE; PALETTES];
        self.framebuffer.fill(WHITE);
        self.fifo.clear();
        self.visible_sprites.clear();
        self.scanline_cycles = 0;
        self.overflow_cycles = 0;
        self.stat_signal = false;
        self.lcd_enabled = true;
        self.lcd_enabling = false;
        self.scx = 0;
        self.scy = 0;
        self.wx = 0;
        self.wy = 0;
        self.lx = 0;
        self.fetching_window = false;
        self.fetching_sprite = false;
        self.discard = 0;
        self.fetcher_state = 0;
        self.fetcher_phase = false;
        self.events.clear();

        bus.set(LCDC, 0x91);
        bus.set(STAT, 0x80);
        bus.set(SCY, 0);
        bus.set(SCX, 0);
        bus.set(LYC, 0);
        bus.set(BGP, 0xFC);
        bus.set(OBP0, 0xFF);
        bus.set(OBP1, 0xFF);
        bus.set(WY, 0);
        bus.set(WX, 7);
        bus.set(VBK, if mode.is_cgb() { 0xFE } else { 0xFF });
        self.set_ly(bus, irq, 0);
        self.set_mode(bus, irq, LcdMode::OamSearch, 0);
    }

    /// Mode changes since the last drain, oldest first.
    pub fn mode_events(&mut self) -> std::vec::Drain<'_, LcdMode> {
        self.events.drain(..)
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    #[inline]
    pub fn lcd_mode(&self, bus: &Bus) -> LcdMode {
        LcdMode::from_stat(bus.get(STAT))
    }

    pub fn is_lcd_enabled(&self) -> bool {
        self.lcd_enabled
    }

    pub fn bg_palette(&self, index: usize) -> Palette {
        self.bg_palettes[index]
    }

    pub fn obj_palette(&self, index: usize) -> Palette {
        self.obj_palettes[index]
    }

    pub fn vram_bank(&self) -> usize {
        self.vram.active_bank()
    }

    /// Read a VRAM byte from either bank regardless of VBK.
    pub fn vram_byte(&self, bus: &Bus, bank: usize, addr: u16) -> u8 {
        self.vram.get(bus, bank, addr)
    }

    pub fn read(&self, bus: &Bus, addr: u16) -> u8 {
        let cgb = self.mode.is_cgb();
        match addr {
            VBK | BCPS..=OCPD if !cgb => 0xFF,
            BCPD => palette_byte(bus.get(BCPS), &self.bg_palettes),
            OCPD => palette_byte(bus.get(OCPS), &self.obj_palettes),
            _ => bus.get(addr),
        }
    }

    pub fn write(&mut self, bus: &mut Bus, irq: &mut Interrupts, addr: u16, val: u8) {
        let cgb = self.mode.is_cgb();
        match addr {
            LY => return,
            VBK | BCPS..=OCPD if !cgb => return,
            _ => {}
        }
        bus.set(addr, val);
        match addr {
            LCDC => self.update_lcdc(bus, irq),
            STAT => self.update_stat_signal(bus, irq),
            LYC => self.update_lyc(bus, irq),
            VBK => self.vram.set_active_bank(bus, (val & 0x01) as usize),
            BCPD => write_palette(bus, BCPS, val, &mut self.bg_palettes),
            OCPD => write_palette(bus, OCPS, val, &mut self.obj_palettes),
            _ => {}
        }
    }

    /// Advance the LCD by `cycles` dots. Returns true when a frame is
    /// complete: on entering V-blank, or once per frame period while the
    /// LCD is off.
    pub fn tick(&mut self, bus: &mut Bus, irq: &mut Interrupts, cycles: u32) -> bool {
        if !self.lcd_enabled {
            self.scanline_cycles += cycles;
            if self.scanline_cycles >= FRAME_CYCLES {
                self.scanline_cycles -= FRAME_CYCLES;
                return true;
            }
            return false;
        }

        let work = cycles + self.overflow_cycles;
        self.overflow_cycles = 0;
        self.scanline_cycles += cycles;

        match self.lcd_mode(bus) {
            LcdMode::HBlank => {
                if self.scanline_cycles >= SCANLINE_CYCLES {
                    self.scanline_cycles -= SCANLINE_CYCLES;
                    let ly = bus.get(LY) + 1;
                    self.set_ly(bus, irq, ly);
                    if ly == VBLANK_START {
                        self.set_mode(bus, irq, LcdMode::VBlank, 0);
                        return true;
                    }
                    self.set_mode(bus, irq, LcdMode::OamSearch, 0);
                }
            }
            LcdMode::VBlank => {
                if self.scanline_cycles >= SCANLINE_CYCLES {
                    self.scanline_cycles -= SCANLINE_CYCLES;
                    let ly = bus.get(LY) + 1;
                    if ly == VBLANK_END {
                        self.set_ly(bus, irq, 0);
                        self.set_mode(bus, irq, LcdMode::OamSearch, 0);
                    } else {
                        self.set_ly(bus, irq, ly);
                    }
                }
            }
            LcdMode::OamSearch => {
                if self.scanline_cycles >= OAM_SEARCH_CYCLES {
                    self.select_sprites(bus);
                    let overflow = self.scanline_cycles - OAM_SEARCH_CYCLES;
                    self.set_mode(bus, irq, LcdMode::Transfer, overflow);
                }
            }
            LcdMode::Transfer => {
                for _ in 0..work {
                    if !self.tick_fifo(bus) {
                        self.set_mode(bus, irq, LcdMode::HBlank, 0);
                        break;
                    }
                    self.fetcher_phase = !self.fetcher_phase;
                    if !self.fetcher_phase {
                        self.tick_fetcher(bus);
                    }
                }
            }
        }
        false
    }

    fn set_ly(&mut self, bus: &mut Bus, irq: &mut Interrupts, ly: u8) {
        bus.set(LY, ly);
        self.update_lyc(bus, irq);
    }

    fn update_lyc(&mut self, bus: &mut Bus, irq: &mut Interrupts) {
        let stat = bus.get(STAT);
        let stat = if bus.get(LY) == bus.get(LYC) {
            stat | 0x04
        } else {
            stat & !0x04
        };
        bus.set(STAT, stat);
        self.update_stat_signal(bus, irq);
    }

    /// The STAT line is the OR of every enabled source; a rising edge
    /// requests the interrupt.
    fn update_stat_signal(&mut self, bus: &mut Bus, irq: &mut Interrupts) {
        let stat = bus.get(STAT);
        let mode = LcdMode::from_stat(stat);
        let mode_source = mode
            .interrupt_bit()
            .is_some_and(|bit| stat & (1 << bit) != 0);
        let lyc_source = stat & 0x40 != 0 && stat & 0x04 != 0;
        let signal = self.lcd_enabled && (mode_source || lyc_source);
        if signal && !self.stat_signal {
            irq.set_requested(bus, Interrupt::LcdStat, true);
        }
        self.stat_signal = signal;
    }

    fn set_mode(&mut self, bus: &mut Bus, irq: &mut Interrupts, mode: LcdMode, overflow: u32) {
        #[cfg(feature = "ppu-trace")]
        log::trace!("LY={} mode {:?} overflow={}", bus.get(LY), mode, overflow);
        bus.set(STAT, (bus.get(STAT) & !0x03) | mode as u8);
        self.overflow_cycles = overflow;
        self.update_stat_signal(bus, irq);

        match mode {
            LcdMode::VBlank => {
                irq.set_requested(bus, Interrupt::VBlank, true);
                if self.lcd_enabling {
                    self.lcd_enabling = false;
                    self.framebuffer.fill(WHITE);
                }
            }
            LcdMode::Transfer => {
                self.scx = bus.get(SCX);
                self.scy = bus.get(SCY);
                self.wx = bus.get(WX) as i32 - 7;
                self.wy = bus.get(WY);
                self.fetching_window = false;
                self.fetching_sprite = false;
                self.fetcher_state = 0;
                self.fetcher_phase = false;
                self.discard = self.scx % 8;
                self.fifo.clear();
                self.set_lx(bus, 0);
            }
            _ => {}
        }
        self.events.push(mode);
    }

    fn update_lcdc(&mut self, bus: &mut Bus, irq: &mut Interrupts) {
        let enabled = bus.get(LCDC) & 0x80 != 0;
        if enabled == self.lcd_enabled {
            return;
        }
        self.lcd_enabled = enabled;
        self.scanline_cycles = 0;
        self.overflow_cycles = 0;
        self.fetching_window = false;
        self.fetching_sprite = false;
        self.fifo.clear();
        self.visible_sprites.clear();
        if enabled {
            debug!("LCD on");
            self.lcd_enabling = true;
        } else {
            debug!("LCD off");
            self.set_ly(bus, irq, 0);
            self.set_mode(bus, irq, LcdMode::HBlank, 0);
        }
    }

    fn select_sprites(&mut self, bus: &Bus) {
        self.visible_sprites.clear();
        let lcdc = bus.get(LCDC);
        if lcdc & 0x02 == 0 {
            return;
        }
        let height = sprite_height(lcdc);
        let line = bus.get(LY) as i32 + 16;
        for id in 0..SPRITE_COUNT {
            let y = bus.get(OAM_START + id * 4) as i32;
            let x = bus.get(OAM_START + id * 4 + 1);
            if x != 0 && line >= y && line < y + height {
                self.visible_sprites.push(id as u8);
                if self.visible_sprites.len() == MAX_VISIBLE_SPRITES {
                    break;
                }
            }
        }
        // Stable sort keeps OAM order among sprites sharing an X.
        self.visible_sprites
            .sort_by_key(|&id| bus.get(OAM_START + id as u16 * 4 + 1));
    }

    fn set_lx(&mut self, bus: &Bus, lx: u32) {
        self.lx = lx;
        let lcdc = bus.get(LCDC);
        let window = lcdc & 0x20 != 0 && lx as i32 >= self.wx && bus.get(LY) >= self.wy;
        if window != self.fetching_window {
            self.fetching_window = window;
            self.fetcher_state = 0;
            self.fifo.clear();
        }
        self.check_fetch_sprite(bus);
    }

    fn check_fetch_sprite(&mut self, bus: &Bus) {
        self.fetching_sprite = false;
        if bus.get(LCDC) & 0x02 == 0 {
            return;
        }
        if let Some(&id) = self.visible_sprites.first() {
            let x = bus.get(OAM_START + id as u16 * 4 + 1) as u32;
            if self.lx + 8 >= x {
                self.fetching_sprite = true;
                self.fetcher_state = 0;
            }
        }
    }

    /// Emit at most one pixel. Returns false once the line is complete.
    fn tick_fifo(&mut self, bus: &Bus) -> bool {
        if self.fetching_sprite || self.fifo.len() <= 8 {
            return true;
        }
        let Some(pixel) = self.fifo.pop() else {
            return true;
        };
        if pixel.source == PixelSource::Background && self.discard > 0 {
            self.discard -= 1;
            return true;
        }
        let rgb = self.pixel_color(bus, pixel);
        self.framebuffer
            .set_pixel(self.lx as usize, bus.get(LY) as usize, rgb);
        self.set_lx(bus, self.lx + 1);
        self.lx < SCREEN_WIDTH as u32
    }

    fn tick_fetcher(&mut self, bus: &Bus) {
        if self.fetcher_state < FETCH_READY {
            self.fetcher_state += 1;
            return;
        }
        if self.fetching_sprite && self.fifo.len() >= 8 {
            self.fetcher_state = 0;
            self.fetch_sprite(bus);
            self.check_fetch_sprite(bus);
        } else if self.fifo.len() <= 8 {
            self.fetcher_state = 0;
            self.fetch_background(bus);
        }
    }

    fn fetch_background(&mut self, bus: &Bus) {
        let lcdc = bus.get(LCDC);
        let ly = bus.get(LY) as i32;
        let queued = self.fifo.len() as i32;
        let (source, map_x, map_y, map_select) = if self.fetching_window {
            (
                PixelSource::Window,
                (self.lx as i32 - self.wx + queued) & 0xFF,
                (ly - self.wy as i32) & 0xFF,
                0x40,
            )
        } else {
            (
                PixelSource::Background,
                (self.scx as i32 + self.lx as i32 + queued) & 0xFF,
                (self.scy as i32 + ly) & 0xFF,
                0x08,
            )
        };
        let map_base = if lcdc & map_select != 0 {
            TILE_MAP_1
        } else {
            TILE_MAP_0
        };
        let map_addr = map_base + (map_y as u16 / 8) * 32 + map_x as u16 / 8;
        let tile = self.vram.get(bus, 0, map_addr);
        let attrs = if self.mode.is_cgb() {
            self.vram.get(bus, 1, map_addr)
        } else {
            0
        };

        let mut row = (map_y % 8) as u16;
        if attrs & 0x40 != 0 {
            row = 7 - row;
        }
        let tile_addr = if lcdc & 0x10 != 0 {
            TILE_DATA_UNSIGNED + tile as u16 * 16
        } else {
            TILE_DATA_SIGNED.wrapping_add((tile as i8 as i16 * 16) as u16)
        };
        let bank = ((attrs >> 3) & 0x01) as usize;
        let (low, high) = self.tile_row(bus, bank, tile_addr + row * 2);
        let flip = attrs & 0x20 != 0;

        for i in 0..8 {
            self.fifo.push(Pixel {
                source,
                color: tile_color(low, high, i, flip),
                palette: attrs & 0x07,
                priority: attrs & 0x80 != 0,
                sprite_x: 0,
                sprite_id: 0,
            });
        }
    }

    fn fetch_sprite(&mut self, bus: &Bus) {
        if self.visible_sprites.is_empty() {
            return;
        }
        let id = self.visible_sprites.remove(0);
        let base = OAM_START + id as u16 * 4;
        let y = bus.get(base) as i32;
        let x = bus.get(base + 1);
        let mut tile = bus.get(base + 2);
        let flags = bus.get(base + 3);

        let lcdc = bus.get(LCDC);
        let height = sprite_height(lcdc);
        let mut row = bus.get(LY) as i32 + 16 - y;
        if flags & 0x40 != 0 {
            row = height - 1 - row;
        }
        if height == 16 {
            tile = if row < 8 { tile & 0xFE } else { tile | 0x01 };
        }
        let tile_addr = TILE_DATA_UNSIGNED + tile as u16 * 16 + (row as u16 % 8) * 2;

        let cgb = self.mode.is_cgb();
        let (palette, bank) = if cgb {
            (flags & 0x07, ((flags >> 3) & 0x01) as usize)
        } else {
            ((flags >> 4) & 0x01, 0)
        };
        let (low, high) = self.tile_row(bus, bank, tile_addr);
        let flip = flags & 0x20 != 0;
        let sprite = Pixel {
            source: PixelSource::Sprite,
            color: 0,
            palette,
            priority: flags & 0x80 == 0,
            sprite_x: x,
            sprite_id: id,
        };
        // Columns of the sprite already left of the beam are skipped.
        let clip = (self.lx as i32 + 8 - x as i32).clamp(0, 8) as usize;
        let bg_master_priority = !cgb || lcdc & 0x01 != 0;

        for i in clip..8 {
            let color = tile_color(low, high, i, flip);
            if color == 0 {
                continue;
            }
            let Some(entry) = self.fifo.get_mut(i - clip) else {
                break;
            };
            let replace = if entry.source != PixelSource::Sprite {
                !bg_master_priority || entry.color == 0 || (!entry.priority && sprite.priority)
            } else if !cgb && entry.sprite_x != sprite.sprite_x {
                sprite.sprite_x < entry.sprite_x
            } else {
                sprite.sprite_id < entry.sprite_id
            };
            if replace {
                *entry = Pixel { color, ..sprite };
            }
        }
    }

    fn tile_row(&self, bus: &Bus, bank: usize, addr: u16) -> (u8, u8) {
        (
            self.vram.get(bus, bank, addr),
            self.vram.get(bus, bank, addr + 1),
        )
    }

    fn pixel_color(&self, bus: &Bus, pixel: Pixel) -> u32 {
        let color = if self.mode.is_cgb() {
            let palettes = if pixel.source == PixelSource::Sprite {
                &self.obj_palettes
            } else {
                &self.bg_palettes
            };
            palettes[pixel.palette as usize][pixel.color as usize]
        } else if pixel.source == PixelSource::Sprite {
            let reg = if pixel.palette == 0 { OBP0 } else { OBP1 };
            dmg_shade(bus.get(reg), pixel.color)
        } else if bus.get(LCDC) & 0x01 == 0 {
            DEFAULT_PALETTE[0]
        } else {
            dmg_shade(bus.get(BGP), pixel.color)
        };
        color.rgb24()
    }

    pub fn serialize(&mut self, bus: &Bus, out: &mut StateWriter) {
        out.marker();
        out.u16(self.scanline_cycles as u16);
        out.bool(self.stat_signal);
        out.u16(self.overflow_cycles as u16);
        out.u8(self.scx);
        out.u8(self.scy);
        out.u8((self.wx + 7) as u8);
        out.u8(self.wy);
        out.u8(self.lx as u8);
        out.bool(self.fetching_window);
        out.bool(self.fetching_sprite);
        out.u8(self.discard);
        out.u8(self.fetcher_state);
        out.bool(self.fetcher_phase);
        out.bool(self.lcd_enabled);
        out.bool(self.lcd_enabling);

        out.marker();
        for (bg, obj) in self.bg_palettes.iter().zip(self.obj_palettes.iter()) {
            for (bg_color, obj_color) in bg.iter().zip(obj.iter()) {
                out.u16(bg_color.raw());
                out.u16(obj_color.raw());
            }
        }

        out.marker();
        out.bytes(self.framebuffer.pixels());

        out.marker();
        out.u8(self.visible_sprites.len() as u8);
        for id in &self.visible_sprites {
            out.u8(*id);
        }

        out.marker();
        out.u8(self.fifo.len() as u8);
        for pixel in self.fifo.iter() {
            out.u8(pixel.source.to_u8());
            out.u8(pixel.color);
            out.u8(pixel.palette);
            out.bool(pixel.priority);
            if pixel.source == PixelSource::Sprite {
                out.u8(pixel.sprite_x);
                out.u8(pixel.sprite_id);
            }
        }

        self.vram.serialize(bus, out);
    }

    pub fn deserialize(
        &mut self,
        bus: &mut Bus,
        input: &mut StateReader<'_>,
    ) -> Result<(), SaveStateError> {
        input.marker("video")?;
        self.scanline_cycles = input.u16()? as u32;
        self.stat_signal = input.bool()?;
        self.overflow_cycles = input.u16()? as u32;
        self.scx = input.u8()?;
        self.scy = input.u8()?;
        self.wx = input.u8()? as i32 - 7;
        self.wy = input.u8()?;
        self.lx = input.u8()? as u32;
        self.fetching_window = input.bool()?;
        self.fetching_sprite = input.bool()?;
        self.discard = input.u8()?;
        self.fetcher_state = input.u8()?;
        self.fetcher_phase = input.bool()?;
        self.lcd_enabled = input.bool()?;
        self.lcd_enabling = input.bool()?;

        input.marker("video palettes")?;
        for i in 0..PALETTES {
            for j in 0..DEFAULT_PALETTE.len() {
                self.bg_palettes[i][j] = PaletteColor::from_raw(input.u16()?);
                self.obj_palettes[i][j] = PaletteColor::from_raw(input.u16()?);
            }
        }

        input.marker("video framebuffer")?;
        input.fill(&mut self.framebuffer.pixels)?;

        input.marker("video sprites")?;
        let count = input.u8()? as usize;
        if count > MAX_VISIBLE_SPRITES {
            return Err(input.invalid(count as u32));
        }
        self.visible_sprites.clear();
        for _ in 0..count {
            let id = input.u8()?;
            if id as u16 >= SPRITE_COUNT {
                return Err(input.invalid(id as u32));
            }
            self.visible_sprites.push(id);
        }

        input.marker("video fifo")?;
        let len = input.u8()? as usize;
        if len > FIFO_CAPACITY {
            return Err(input.invalid(len as u32));
        }
        self.fifo.clear();
        for _ in 0..len {
            let source = input.u8()?;
            let source = PixelSource::from_u8(source).ok_or_else(|| input.invalid(source as u32))?;
            let mut pixel = Pixel {
                source,
                color: input.u8()? & 0x03,
                palette: input.u8()? & 0x07,
                priority: input.bool()?,
                ..Pixel::default()
            };
            if source == PixelSource::Sprite {
                pixel.sprite_x = input.u8()?;
                pixel.sprite_id = input.u8()?;
            }
            self.fifo.push(pixel);
        }

        self.events.clear();
        self.vram.deserialize(bus, input)
    }
}

#[inline]
fn sprite_height(lcdc: u8) -> i32 {
    if lcdc & 0x04 != 0 { 16 } else { 8 }
}

/// 2-bit color of column `i` (0 = leftmost) of a tile row.
#[inline]
fn tile_color(low: u8, high: u8, i: usize, flip: bool) -> u8 {
    let bit = if flip { i } else { 7 - i };
    ((high >> bit) & 0x01) << 1 | ((low >> bit) & 0x01)
}

fn palette_byte(selector: u8, palettes: &[Palette; PALETTES]) -> u8 {
    let color = palettes[((selector >> 3) & 0x07) as usize][((selector >> 1) & 0x03) as usize];
    if selector & 0x01 != 0 {
        color.high()
    } else {
        color.low()
    }
}

/// Store a BCPD/OCPD byte at the entry BCPS/OCPS points to, then advance
/// the index if auto-increment is set.
fn write_palette(bus: &mut Bus, selector_addr: u16, val: u8, palettes: &mut [Palette; PALETTES]) {
    let selector = bus.get(selector_addr);
    let color = &mut palettes[((selector >> 3) & 0x07) as usize][((selector >> 1) & 0x03) as usize];
    if selector & 0x01 != 0 {
        color.set_high(val);
    } else {
        color.set_low(val);
    }
    if selector & 0x80 != 0 {
        bus.set(selector_addr, (selector & 0xC0) | (selector.wrapping_add(1) & 0x3F));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::IF;

    fn setup(mode: HardwareMode) -> (Bus, Interrupts, Video) {
        let mut bus = Bus::new();
        let mut irq = Interrupts::new(&mut bus);
        let mut video = Video::new(&mut bus);
        bus.reset();
        irq.reset(&mut bus, mode);
        video.reset(&mut bus, &mut irq, mode);
        (bus, irq, video)
    }

    fn run(bus: &mut Bus, irq: &mut Interrupts, video: &mut Video, cycles: u32) -> bool {
        let mut frame = false;
        for _ in 0..cycles / 4 {
            frame |= video.tick(bus, irq, 4);
        }
        frame
    }

    const DARKEST: u32 = 0x101010;
    const LIGHTEST: u32 = 0xE6E6E6;

    #[test]
    fn reset_state() {
        let (bus, _irq, video) = setup(HardwareMode::Dmg);
        assert_eq!(bus.get(LCDC), 0x91);
        assert_eq!(bus.get(BGP), 0xFC);
        assert_eq!(bus.get(WX), 7);
        assert_eq!(video.lcd_mode(&bus), LcdMode::OamSearch);
        assert_eq!(video.framebuffer().pixel(0, 0), WHITE);
    }

    #[test]
    fn mode_sequence_within_a_line() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        run(&mut bus, &mut irq, &mut video, 76);
        assert_eq!(video.lcd_mode(&bus), LcdMode::OamSearch);
        run(&mut bus, &mut irq, &mut video, 4);
        assert_eq!(video.lcd_mode(&bus), LcdMode::Transfer);
        run(&mut bus, &mut irq, &mut video, 300);
        assert_eq!(video.lcd_mode(&bus), LcdMode::HBlank);
        run(&mut bus, &mut irq, &mut video, 76);
        assert_eq!(bus.get(LY), 1);
        assert_eq!(video.lcd_mode(&bus), LcdMode::OamSearch);
    }

    #[test]
    fn frame_completes_at_vblank_and_requests_interrupt() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Cgb);
        assert!(!run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES * 144 - 4));
        assert_eq!(bus.get(IF) & 0x01, 0);
        assert!(run(&mut bus, &mut irq, &mut video, 4));
        assert_eq!(bus.get(LY), 144);
        assert_eq!(video.lcd_mode(&bus), LcdMode::VBlank);
        assert_ne!(bus.get(IF) & 0x01, 0);

        run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES * 10);
        assert_eq!(bus.get(LY), 0);
        assert_eq!(video.lcd_mode(&bus), LcdMode::OamSearch);
    }

    #[test]
    fn background_scanline_matches_tile_data() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        // Tile 1: every row is color 3. Tile 2: left half color 1.
        for row in 0..8 {
            bus.set(0x8010 + row * 2, 0xFF);
            bus.set(0x8011 + row * 2, 0xFF);
            bus.set(0x8020 + row * 2, 0xF0);
        }
        bus.set(0x9800, 1);
        bus.set(0x9802, 2);
        bus.set(BGP, 0xE4);
        run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES);

        let fb = video.framebuffer();
        for x in 0..8 {
            assert_eq!(fb.pixel(x, 0), DARKEST, "x={x}");
        }
        assert_eq!(fb.pixel(8, 0), LIGHTEST);
        assert_eq!(fb.pixel(16, 0), DEFAULT_PALETTE[1].rgb24());
        assert_eq!(fb.pixel(20, 0), LIGHTEST);
        assert_eq!(fb.pixel(159, 0), LIGHTEST);
    }

    #[test]
    fn fine_scroll_discards_leading_pixels() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        for row in 0..8 {
            bus.set(0x8010 + row * 2, 0xFF);
            bus.set(0x8011 + row * 2, 0xFF);
        }
        bus.set(0x9800, 1);
        bus.set(BGP, 0xE4);
        bus.set(SCX, 3);
        run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES);

        let fb = video.framebuffer();
        assert_eq!(fb.pixel(4, 0), DARKEST);
        assert_eq!(fb.pixel(5, 0), LIGHTEST);
    }

    #[test]
    fn sprite_draws_over_background() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        bus.set(LCDC, 0x93);
        // Tile 1 solid color 1 for the sprite.
        for row in 0..8 {
            bus.set(0x8010 + row * 2, 0xFF);
        }
        bus.set(OAM_START, 16);
        bus.set(OAM_START + 1, 8 + 10);
        bus.set(OAM_START + 2, 1);
        bus.set(OAM_START + 3, 0);
        bus.set(OBP0, 0xE4);
        run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES);

        let fb = video.framebuffer();
        assert_eq!(fb.pixel(9, 0), DEFAULT_PALETTE[0].rgb24());
        for x in 10..18 {
            assert_eq!(fb.pixel(x, 0), DEFAULT_PALETTE[1].rgb24(), "x={x}");
        }
        assert_eq!(fb.pixel(18, 0), DEFAULT_PALETTE[0].rgb24());
    }

    /// Fill every row of `tile` (unsigned addressing) with one 2-bit color.
    fn solid_tile(bus: &mut Bus, tile: u16, color: u8) {
        let low = if color & 0x01 != 0 { 0xFF } else { 0x00 };
        let high = if color & 0x02 != 0 { 0xFF } else { 0x00 };
        for row in 0..8 {
            bus.set(0x8000 + tile * 16 + row * 2, low);
            bus.set(0x8001 + tile * 16 + row * 2, high);
        }
    }

    fn place_sprite(bus: &mut Bus, id: u16, x: u8, tile: u8, flags: u8) {
        let base = OAM_START + id * 4;
        bus.set(base, 16);
        bus.set(base + 1, x);
        bus.set(base + 2, tile);
        bus.set(base + 3, flags);
    }

    fn run_to_vblank(bus: &mut Bus, irq: &mut Interrupts, video: &mut Video) {
        for _ in 0..FRAME_CYCLES / 4 + SCANLINE_CYCLES {
            if video.tick(bus, irq, 4) {
                return;
            }
        }
        panic!("no V-blank within a frame");
    }

    #[test]
    fn window_replaces_background_from_wx() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        solid_tile(&mut bus, 1, 3);
        for i in 0..32 {
            bus.set(TILE_MAP_1 + i, 1);
        }
        bus.set(BGP, 0xE4);
        bus.set(WX, 87);
        bus.set(WY, 0);
        // Window on, window map at 0x9C00, background map at 0x9800.
        bus.set(LCDC, 0xF1);
        run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES);

        let fb = video.framebuffer();
        for x in 0..80 {
            assert_eq!(fb.pixel(x, 0), LIGHTEST, "x={x}");
        }
        for x in 80..SCREEN_WIDTH {
            assert_eq!(fb.pixel(x, 0), DARKEST, "x={x}");
        }
    }

    #[test]
    fn window_waits_for_wy() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        solid_tile(&mut bus, 1, 3);
        for i in 0..32 * 2 {
            bus.set(TILE_MAP_1 + i, 1);
        }
        bus.set(BGP, 0xE4);
        bus.set(WX, 7);
        bus.set(WY, 1);
        bus.set(LCDC, 0xF1);
        run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES * 2);

        let fb = video.framebuffer();
        assert_eq!(fb.pixel(0, 0), LIGHTEST);
        assert_eq!(fb.pixel(0, 1), DARKEST);
        assert_eq!(fb.pixel(159, 1), DARKEST);
    }

    #[test]
    fn dmg_overlapping_sprites_resolve_by_x() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        bus.set(LCDC, 0x93);
        bus.set(OBP0, 0xE4);
        solid_tile(&mut bus, 1, 1);
        solid_tile(&mut bus, 2, 2);
        // OAM 0 covers 8..15 and OAM 1 covers 4..11.
        place_sprite(&mut bus, 0, 16, 2, 0);
        place_sprite(&mut bus, 1, 12, 1, 0);
        run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES);

        let fb = video.framebuffer();
        for x in 4..12 {
            assert_eq!(fb.pixel(x, 0), DEFAULT_PALETTE[1].rgb24(), "x={x}");
        }
        for x in 12..16 {
            assert_eq!(fb.pixel(x, 0), DEFAULT_PALETTE[2].rgb24(), "x={x}");
        }
    }

    #[test]
    fn dmg_sprites_sharing_x_resolve_by_oam_index() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        bus.set(LCDC, 0x93);
        bus.set(OBP0, 0xE4);
        solid_tile(&mut bus, 1, 1);
        solid_tile(&mut bus, 2, 2);
        place_sprite(&mut bus, 0, 16, 2, 0);
        place_sprite(&mut bus, 1, 16, 1, 0);
        run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES);

        let fb = video.framebuffer();
        for x in 8..16 {
            assert_eq!(fb.pixel(x, 0), DEFAULT_PALETTE[2].rgb24(), "x={x}");
        }
    }

    #[test]
    fn cgb_overlapping_sprites_resolve_by_oam_index() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Cgb);
        bus.set(LCDC, 0x93);
        solid_tile(&mut bus, 1, 1);
        solid_tile(&mut bus, 2, 2);
        place_sprite(&mut bus, 0, 16, 2, 0);
        place_sprite(&mut bus, 1, 12, 1, 0);
        run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES);

        let fb = video.framebuffer();
        for x in 4..8 {
            assert_eq!(fb.pixel(x, 0), DEFAULT_PALETTE[1].rgb24(), "x={x}");
        }
        for x in 8..16 {
            assert_eq!(fb.pixel(x, 0), DEFAULT_PALETTE[2].rgb24(), "x={x}");
        }
    }

    #[test]
    fn background_priority_sprite_shows_only_over_color_zero() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        bus.set(LCDC, 0x93);
        bus.set(BGP, 0xE4);
        bus.set(OBP0, 0xE4);
        solid_tile(&mut bus, 1, 3);
        solid_tile(&mut bus, 2, 1);
        bus.set(0x9800, 1);
        place_sprite(&mut bus, 0, 12, 2, 0x80);
        run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES);

        let fb = video.framebuffer();
        for x in 4..8 {
            assert_eq!(fb.pixel(x, 0), DARKEST, "x={x}");
        }
        for x in 8..12 {
            assert_eq!(fb.pixel(x, 0), DEFAULT_PALETTE[1].rgb24(), "x={x}");
        }
        assert_eq!(fb.pixel(12, 0), LIGHTEST);
    }

    #[test]
    fn first_frame_after_power_on_is_white() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        solid_tile(&mut bus, 1, 3);
        for i in 0..32 * 32 {
            bus.set(TILE_MAP_0 + i, 1);
        }
        bus.set(BGP, 0xE4);
        run_to_vblank(&mut bus, &mut irq, &mut video);
        assert_eq!(video.framebuffer().pixel(0, 5), DARKEST);

        video.write(&mut bus, &mut irq, LCDC, 0x11);
        video.write(&mut bus, &mut irq, LCDC, 0x91);
        run_to_vblank(&mut bus, &mut irq, &mut video);
        let fb = video.framebuffer();
        assert!(fb.pixels().iter().all(|&b| b == 0xFF));

        run_to_vblank(&mut bus, &mut irq, &mut video);
        assert_eq!(video.framebuffer().pixel(0, 5), DARKEST);
        assert_eq!(video.framebuffer().pixel(159, 143), DARKEST);
    }

    #[test]
    fn scroll_is_latched_when_transfer_starts() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        solid_tile(&mut bus, 1, 3);
        bus.set(0x9800, 1);
        bus.set(BGP, 0xE4);
        run(&mut bus, &mut irq, &mut video, OAM_SEARCH_CYCLES + 4);
        assert_eq!(video.lcd_mode(&bus), LcdMode::Transfer);

        video.write(&mut bus, &mut irq, SCX, 4);
        run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES - OAM_SEARCH_CYCLES - 4);

        let fb = video.framebuffer();
        assert_eq!(fb.pixel(7, 0), DARKEST);
        assert_eq!(fb.pixel(8, 0), LIGHTEST);
    }

    #[test]
    fn lyc_match_requests_stat_once() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        video.write(&mut bus, &mut irq, LYC, 2);
        let stat = bus.mask_io_write(STAT, 0x40);
        video.write(&mut bus, &mut irq, STAT, stat);
        run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES);
        assert_eq!(bus.get(IF) & 0x02, 0);
        run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES);
        assert_eq!(bus.get(LY), 2);
        assert_ne!(bus.get(STAT) & 0x04, 0);
        assert_ne!(bus.get(IF) & 0x02, 0);
    }

    #[test]
    fn lcd_off_resets_ly_and_still_paces_frames() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        run(&mut bus, &mut irq, &mut video, SCANLINE_CYCLES * 3);
        video.write(&mut bus, &mut irq, LCDC, 0x11);
        assert_eq!(bus.get(LY), 0);
        assert_eq!(video.lcd_mode(&bus), LcdMode::HBlank);
        assert!(!run(&mut bus, &mut irq, &mut video, FRAME_CYCLES - 4));
        assert!(run(&mut bus, &mut irq, &mut video, 4));
    }

    #[test]
    fn ly_writes_are_ignored() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        video.write(&mut bus, &mut irq, LY, 0x50);
        assert_eq!(bus.get(LY), 0);
    }

    #[test]
    fn palette_data_auto_increments() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Cgb);
        video.write(&mut bus, &mut irq, BCPS, 0x88);
        video.write(&mut bus, &mut irq, BCPD, 0x1F);
        video.write(&mut bus, &mut irq, BCPD, 0x00);
        assert_eq!(bus.get(BCPS) & 0x3F, 0x0A);
        assert_eq!(video.bg_palette(1)[0].raw(), 0x001F);

        video.write(&mut bus, &mut irq, BCPS, 0x08);
        assert_eq!(video.read(&bus, BCPD), 0x1F);
        video.write(&mut bus, &mut irq, BCPS, 0x09);
        assert_eq!(video.read(&bus, BCPD), 0x00);
    }

    #[test]
    fn vram_bank_switch_is_cgb_only() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Cgb);
        bus.set(0x8000, 0x11);
        video.write(&mut bus, &mut irq, VBK, 0x01);
        assert_eq!(video.vram_bank(), 1);
        assert_eq!(bus.get(0x8000), 0x00);
        assert_eq!(video.vram_byte(&bus, 0, 0x8000), 0x11);

        let (mut bus, mut irq, mut video) = setup(HardwareMode::Dmg);
        video.write(&mut bus, &mut irq, VBK, 0x01);
        assert_eq!(video.vram_bank(), 0);
        assert_eq!(video.read(&bus, VBK), 0xFF);
    }

    #[test]
    fn serialize_round_trip_mid_line() {
        let (mut bus, mut irq, mut video) = setup(HardwareMode::Cgb);
        run(&mut bus, &mut irq, &mut video, 120);
        let mut out = StateWriter::new();
        video.serialize(&bus, &mut out);
        let bytes = out.into_inner();

        let mut restored = Video::new(&mut bus);
        restored.reset(&mut bus, &mut irq, HardwareMode::Cgb);
        let mut input = StateReader::new(&bytes);
        restored.deserialize(&mut bus, &mut input).unwrap();
        input.finish().unwrap();
        assert_eq!(restored.lx, video.lx);
        assert_eq!(restored.fifo.len(), video.fifo.len());
        assert_eq!(restored.scanline_cycles, video.scanline_cycles);
    }
}
