//! Memory map and hardware plumbing.
//!
//! The [`Mmu`] owns the bus and every memory-mapped unit. CPU accesses go
//! through [`Mmu::read`]/[`Mmu::write`], which consult the bus owner table
//! and hand the access to the owning unit.

use crate::apu::Apu;
use crate::bus::{Bus, CRAM_END, CRAM_START, OAM_START, Unit};
use crate::cartridge::Cartridge;
use crate::cpu::KEY1;
use crate::dma::{Hdma, OAM_DMA_LEN, OAM_DMA_STEP_CYCLES, OamDma};
use crate::hardware::HardwareMode;
use crate::input::Joypad;
use crate::interrupts::Interrupts;
use crate::ppu::{LcdMode, Video};
use crate::savestate::{SaveStateError, StateReader, StateWriter};
use crate::serial::Serial;
use crate::timer::Timer;
use crate::wram::{UnusedRegion, Wram};

const ROM_END: u16 = 0x7FFF;
/// OAM, the unused region, I/O page, HRAM and IE.
const HIGH_PAGE_LEN: usize = 0x200;

pub type VideoModeListener = Box<dyn FnMut(LcdMode) + Send>;

pub struct Mmu {
    pub bus: Bus,
    pub interrupts: Interrupts,
    pub cartridge: Option<Cartridge>,
    pub video: Video,
    pub wram: Wram,
    pub unused: UnusedRegion,
    pub timer: Timer,
    pub serial: Serial,
    pub dma: OamDma,
    pub hdma: Hdma,
    pub joypad: Joypad,
    pub apu: Apu,
    mode: HardwareMode,
    video_listeners: Vec<VideoModeListener>,
}

impl Mmu {
    pub fn new() -> Self {
        let mut bus = Bus::new();
        bus.set_owner(Unit::Cartridge, 0x0000..=ROM_END);
        bus.set_owner(Unit::Cartridge, CRAM_START..=CRAM_END);
        bus.set_owner(Unit::Processor, KEY1..=KEY1);
        let interrupts = Interrupts::new(&mut bus);
        let video = Video::new(&mut bus);
        let wram = Wram::new(&mut bus);
        let unused = UnusedRegion::new(&mut bus);
        let timer = Timer::new(&mut bus);
        let serial = Serial::new(&mut bus);
        let dma = OamDma::new(&mut bus);
        let hdma = Hdma::new(&mut bus);
        let joypad = Joypad::new(&mut bus);
        let apu = Apu::new(&mut bus);
        let mut mmu = Self {
            bus,
            interrupts,
            cartridge: None,
            video,
            wram,
            unused,
            timer,
            serial,
            dma,
            hdma,
            joypad,
            apu,
            mode: HardwareMode::Dmg,
            video_listeners: Vec::new(),
        };
        mmu.reset(HardwareMode::Dmg);
        mmu
    }

    #[inline]
    pub fn mode(&self) -> HardwareMode {
        self.mode
    }

    /// Return every unit to its post-boot state. Raw memory is cleared
    /// first so units see the power-on I/O page while reinitializing.
    pub fn reset(&mut self, mode: HardwareMode) {
        self.mode = mode;
        self.bus.reset();
        if let Some(cart) = self.cartridge.as_mut() {
            cart.reset(&mut self.bus);
        }
        self.interrupts.reset(&mut self.bus, mode);
        self.wram.reset(&mut self.bus, mode);
        self.unused.reset(&mut self.bus);
        self.joypad.reset(&mut self.bus);
        self.video.reset(&mut self.bus, &mut self.interrupts, mode);
        self.timer.reset(&mut self.bus, mode);
        self.serial.reset(&mut self.bus, mode);
        self.dma.reset(&mut self.bus);
        self.hdma.reset(&mut self.bus, mode);
        self.apu.reset(&mut self.bus);
    }

    pub fn read(&self, addr: u16) -> u8 {
        match self.bus.owner(addr) {
            Unit::None => 0xFF,
            Unit::Storage
            | Unit::Unused
            | Unit::Timer
            | Unit::Serial
            | Unit::Input
            | Unit::Audio
            | Unit::Dma => self.bus.get(addr),
            Unit::Cartridge => match self.cartridge.as_ref() {
                Some(cart) => cart.read(&self.bus, addr),
                None => 0xFF,
            },
            Unit::Video => self.video.read(&self.bus, addr),
            Unit::Wram => self.wram.read(&self.bus, addr),
            Unit::Interrupts => self.interrupts.read(&self.bus, addr),
            Unit::Processor if self.mode.is_cgb() => self.bus.get(addr),
            Unit::Processor => 0xFF,
            Unit::Hdma => self.hdma.read(&self.bus, addr),
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        let owner = self.bus.owner(addr);
        if owner == Unit::None {
            return;
        }
        let val = self.bus.mask_io_write(addr, val);
        match owner {
            Unit::None => {}
            Unit::Storage => self.bus.set(addr, val),
            Unit::Cartridge => {
                if let Some(cart) = self.cartridge.as_mut() {
                    cart.write(&mut self.bus, addr, val);
                }
            }
            Unit::Video => {
                self.video
                    .write(&mut self.bus, &mut self.interrupts, addr, val);
                self.dispatch_video_events();
            }
            Unit::Wram => self.wram.write(&mut self.bus, addr, val),
            Unit::Unused => self.unused.write(&mut self.bus, addr, val),
            Unit::Interrupts => self.interrupts.write(&mut self.bus, addr, val),
            Unit::Processor => {
                if self.mode.is_cgb() {
                    self.bus.set(addr, val);
                }
            }
            Unit::Timer => self.timer.write(&mut self.bus, addr, val),
            Unit::Serial => self.serial.write(&mut self.bus, addr, val),
            Unit::Dma => self.dma.write(&mut self.bus, val),
            Unit::Hdma => {
                let hblank = self.video.is_lcd_enabled()
                    && self.video.lcd_mode(&self.bus) == LcdMode::HBlank;
                self.hdma.write(&mut self.bus, addr, val, hblank);
            }
            Unit::Input => self.joypad.write(&mut self.bus, val),
            Unit::Audio => self.apu.write(&mut self.bus, addr, val),
        }
    }

    pub fn read_word(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.read(addr), self.read(addr.wrapping_add(1))])
    }

    pub fn write_word(&mut self, addr: u16, val: u16) {
        let [low, high] = val.to_le_bytes();
        self.write(addr, low);
        self.write(addr.wrapping_add(1), high);
    }

    pub fn add_video_listener(&mut self, listener: VideoModeListener) {
        self.video_listeners.push(listener);
    }

    fn dispatch_video_events(&mut self) {
        for mode in self.video.mode_events() {
            if mode == LcdMode::HBlank {
                self.hdma.on_hblank(&mut self.bus);
            }
            for listener in self.video_listeners.iter_mut() {
                listener(mode);
            }
        }
    }

    /// Advance an active OAM DMA. Each step copies the byte fetched by the
    /// previous one, so the transfer takes one step more than its length.
    pub fn tick_dma(&mut self, cycles: u32) {
        let mut cycles = cycles as i32;
        while self.dma.is_active() && cycles > 0 {
            let step = self.dma.step;
            if step > 0 {
                self.bus.set(OAM_START + step - 1, self.dma.value);
            }
            if step < OAM_DMA_LEN {
                self.dma.value = self.read(self.dma.source.wrapping_add(step));
            }
            self.dma.step += 1;
            cycles -= OAM_DMA_STEP_CYCLES;
        }
    }

    pub fn tick_timer(&mut self, cycles: u32) {
        self.timer.tick(&mut self.bus, &mut self.interrupts, cycles);
    }

    pub fn tick_serial(&mut self, cycles: u32) {
        self.serial.tick(&mut self.bus, &mut self.interrupts, cycles);
    }

    pub fn tick_input(&mut self) {
        self.joypad.tick(&mut self.bus, &mut self.interrupts);
    }

    /// Returns true when the video unit completed a frame.
    pub fn tick_video(&mut self, cycles: u32) -> bool {
        let frame = self
            .video
            .tick(&mut self.bus, &mut self.interrupts, cycles);
        self.dispatch_video_events();
        frame
    }

    pub fn serialize(&mut self, out: &mut StateWriter) {
        out.marker();
        self.wram.serialize(&self.bus, out);
        out.bytes(self.bus.bytes(OAM_START, HIGH_PAGE_LEN));
    }

    pub fn deserialize(&mut self, input: &mut StateReader<'_>) -> Result<(), SaveStateError> {
        input.marker("memory")?;
        self.wram.deserialize(&mut self.bus, input)?;
        let high = input.bytes(HIGH_PAGE_LEN)?;
        self.bus.set_bytes(OAM_START, high);
        Ok(())
    }

    pub(crate) fn take_video_listeners(&mut self) -> Vec<VideoModeListener> {
        std::mem::take(&mut self.video_listeners)
    }

    pub(crate) fn restore_video_listeners(&mut self, listeners: Vec<VideoModeListener>) {
        self.video_listeners = listeners;
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::HRAM_START;
    use crate::cartridge::tests::rom_image;
    use crate::dma::{DMA, HDMA1, HDMA2, HDMA3, HDMA4, HDMA5, OAM_DMA_STEPS};
    use crate::interrupts::{IE, IF};
    use crate::ppu::{LCDC, LY, STAT};
    use crate::timer::DIV;

    fn cgb_mmu() -> Mmu {
        let mut mmu = Mmu::new();
        mmu.reset(HardwareMode::Cgb);
        mmu
    }

    #[test]
    fn unowned_reads_ff_and_drops_writes() {
        let mut mmu = Mmu::new();
        assert_eq!(mmu.read(0xFF03), 0xFF);
        mmu.write(0xFF03, 0x12);
        assert_eq!(mmu.bus.get(0xFF03), 0xFF);
        assert_eq!(mmu.read(0x0000), 0xFF);
        assert_eq!(mmu.read(0xA000), 0xFF);
    }

    #[test]
    fn hram_and_wram_echo() {
        let mut mmu = Mmu::new();
        mmu.write(HRAM_START, 0x5A);
        assert_eq!(mmu.read(HRAM_START), 0x5A);
        mmu.write(0xC010, 0x77);
        assert_eq!(mmu.read(0xE010), 0x77);
        mmu.write(0xE020, 0x66);
        assert_eq!(mmu.read(0xC020), 0x66);
    }

    #[test]
    fn io_writes_keep_read_only_bits() {
        let mut mmu = Mmu::new();
        let stat = mmu.read(STAT);
        mmu.write(STAT, 0x00);
        assert_eq!(mmu.read(STAT) & 0x87, stat & 0x87);
        let ly = mmu.read(LY);
        mmu.write(LY, ly.wrapping_add(0x20));
        assert_eq!(mmu.read(LY), ly);
        mmu.write(IF, 0x00);
        assert_eq!(mmu.read(IF), 0xE0);
    }

    #[test]
    fn div_write_resets_divider() {
        let mut mmu = Mmu::new();
        assert_ne!(mmu.read(DIV), 0);
        mmu.write(DIV, 0x55);
        assert_eq!(mmu.read(DIV), 0);
    }

    #[test]
    fn key1_only_exists_on_cgb() {
        let mut mmu = Mmu::new();
        mmu.write(KEY1, 0x01);
        assert_eq!(mmu.read(KEY1), 0xFF);

        let mut mmu = cgb_mmu();
        assert_eq!(mmu.read(KEY1), 0x7E);
        mmu.write(KEY1, 0x01);
        assert_eq!(mmu.read(KEY1), 0x7F);
    }

    #[test]
    fn oam_dma_copies_after_one_setup_step() {
        let mut mmu = Mmu::new();
        for i in 0..OAM_DMA_LEN {
            mmu.write(0xC100 + i, i as u8 ^ 0xA5);
        }
        mmu.write(DMA, 0xC1);
        assert!(mmu.dma.is_active());

        mmu.tick_dma(4);
        assert_eq!(mmu.bus.get(OAM_START), 0x00);
        mmu.tick_dma(4);
        assert_eq!(mmu.bus.get(OAM_START), 0xA5);

        mmu.tick_dma(((OAM_DMA_STEPS - 2) * 4) as u32);
        assert!(!mmu.dma.is_active());
        assert_eq!(mmu.bus.get(OAM_START + 0x9F), 0x9F ^ 0xA5);
        assert_eq!(mmu.read(DMA), 0xC1);
    }

    #[test]
    fn general_dma_fills_vram_immediately() {
        let mut mmu = cgb_mmu();
        for i in 0..0x20u16 {
            mmu.write(0xC000 + i, i as u8 + 1);
        }
        mmu.write(HDMA1, 0xC0);
        mmu.write(HDMA2, 0x00);
        mmu.write(HDMA3, 0x01);
        mmu.write(HDMA4, 0x00);
        mmu.write(HDMA5, 0x01);
        assert_eq!(mmu.read(0x8100), 1);
        assert_eq!(mmu.read(0x811F), 0x20);
        assert_eq!(mmu.read(HDMA5), 0xFF);
    }

    #[test]
    fn hblank_dma_copies_one_block_per_hblank() {
        let mut mmu = cgb_mmu();
        for i in 0..0x20u16 {
            mmu.write(0xC000 + i, 0x40 + i as u8);
        }
        // Hold the LCD off while programming so no H-blank is pending.
        mmu.write(LCDC, 0x11);
        mmu.write(HDMA1, 0xC0);
        mmu.write(HDMA2, 0x00);
        mmu.write(HDMA3, 0x00);
        mmu.write(HDMA4, 0x00);
        mmu.write(HDMA5, 0x81);
        assert_eq!(mmu.read(HDMA5), 0x01);
        assert_eq!(mmu.read(0x8000), 0x00);

        mmu.write(LCDC, 0x91);
        let mut frames = 0;
        while mmu.read(HDMA5) != 0xFF && frames < 2 {
            if mmu.tick_video(4) {
                frames += 1;
            }
        }
        assert_eq!(mmu.read(0x8000), 0x40);
        assert_eq!(mmu.read(0x801F), 0x5F);
    }

    #[test]
    fn cartridge_rom_and_ram_route_through_mbc() {
        let mut mmu = Mmu::new();
        mmu.cartridge = Some(Cartridge::load(rom_image(0x03, 0x01, 0x02)).unwrap());
        mmu.reset(HardwareMode::Dmg);
        assert_eq!(mmu.read(0x4000), 1);
        mmu.write(0x2000, 0x03);
        assert_eq!(mmu.read(0x4000), 3);

        mmu.write(0xA000, 0x12);
        assert_eq!(mmu.read(0xA000), 0xFF);
        mmu.write(0x0000, 0x0A);
        mmu.write(0xA000, 0x12);
        assert_eq!(mmu.read(0xA000), 0x12);
    }

    #[test]
    fn memory_section_round_trips_high_page() {
        let mut mmu = Mmu::new();
        mmu.write(0xFE10, 0x11);
        mmu.write(0xFF90, 0x22);
        mmu.write(IE, 0x1F);
        mmu.write(0xC555, 0x33);
        let mut out = StateWriter::new();
        mmu.serialize(&mut out);
        let data = out.into_inner();

        let mut other = Mmu::new();
        let mut input = StateReader::new(&data);
        other.deserialize(&mut input).unwrap();
        input.finish().unwrap();
        assert_eq!(other.read(0xFE10), 0x11);
        assert_eq!(other.read(0xFF90), 0x22);
        assert_eq!(other.read(IE), 0x1F);
        assert_eq!(other.read(0xC555), 0x33);
    }
}
