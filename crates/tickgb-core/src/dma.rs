//! OAM DMA and CGB VRAM DMA (HDMA/GDMA).

use log::debug;

use crate::bus::{Bus, Unit, VRAM_START};
use crate::hardware::HardwareMode;
use crate::savestate::{SaveStateError, StateReader, StateWriter};

pub const DMA: u16 = 0xFF46;
pub const HDMA1: u16 = 0xFF51;
pub const HDMA2: u16 = 0xFF52;
pub const HDMA3: u16 = 0xFF53;
pub const HDMA4: u16 = 0xFF54;
pub const HDMA5: u16 = 0xFF55;

/// One startup step plus one step per OAM byte.
pub const OAM_DMA_STEPS: u16 = 0xA1;
pub const OAM_DMA_STEP_CYCLES: i32 = 4;
pub const OAM_DMA_LEN: u16 = 0xA0;
const HDMA_BLOCK_LEN: u16 = 0x10;

/// OAM DMA bookkeeping. The copy itself goes through the intercepted bus,
/// so [`Mmu::tick_dma`](crate::mmu::Mmu::tick_dma) drives the steps.
pub struct OamDma {
    pub(crate) source: u16,
    pub(crate) step: u16,
    pub(crate) value: u8,
}

impl OamDma {
    pub fn new(bus: &mut Bus) -> Self {
        bus.set_owner(Unit::Dma, DMA..=DMA);
        Self {
            source: 0,
            step: OAM_DMA_STEPS,
            value: 0,
        }
    }

    pub fn reset(&mut self, bus: &mut Bus) {
        self.source = 0;
        self.step = OAM_DMA_STEPS;
        self.value = 0;
        bus.set(DMA, 0xFF);
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.step < OAM_DMA_STEPS
    }

    pub fn write(&mut self, bus: &mut Bus, val: u8) {
        bus.set(DMA, val);
        self.source = (val as u16) << 8;
        self.step = 0;
        self.value = 0;
        debug!("OAM DMA from {:04X}", self.source);
    }

    pub fn serialize(&self, out: &mut StateWriter) {
        out.marker();
        out.u16(self.source);
        out.u8(self.step as u8);
        out.u8(self.value);
    }

    pub fn deserialize(&mut self, input: &mut StateReader<'_>) -> Result<(), SaveStateError> {
        input.marker("dma")?;
        self.source = input.u16()?;
        self.step = input.u8()? as u16;
        self.value = input.u8()?;
        if self.step > OAM_DMA_STEPS {
            return Err(input.invalid(self.step as u32));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HdmaMode {
    /// One 16-byte block per H-blank.
    Hdma,
    /// Everything at once.
    Gdma,
    #[default]
    Idle,
}

impl HdmaMode {
    fn to_u8(self) -> u8 {
        match self {
            HdmaMode::Hdma => 0,
            HdmaMode::Gdma => 1,
            HdmaMode::Idle => 2,
        }
    }

    fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(HdmaMode::Hdma),
            1 => Some(HdmaMode::Gdma),
            2 => Some(HdmaMode::Idle),
            _ => None,
        }
    }
}

/// CGB VRAM DMA (gbdev.io/pandocs/CGB_Registers.html#lcd-vram-dma-transfers)
pub struct Hdma {
    mode: HardwareMode,
    source: u16,
    destination: u16,
    blocks: u16,
    transfer: HdmaMode,
}

impl Hdma {
    pub fn new(bus: &mut Bus) -> Self {
        bus.set_owner(Unit::Hdma, HDMA1..=HDMA5);
        Self {
            mode: HardwareMode::Dmg,
            source: 0,
            destination: 0,
            blocks: 0,
            transfer: HdmaMode::Idle,
        }
    }

    pub fn reset(&mut self, bus: &mut Bus, mode: HardwareMode) {
        self.mode = mode;
        self.source = 0;
        self.destination = 0;
        self.blocks = 0;
        self.transfer = HdmaMode::Idle;
        for addr in HDMA1..=HDMA5 {
            bus.set(addr, 0xFF);
        }
    }

    #[inline]
    pub fn transfer_mode(&self) -> HdmaMode {
        self.transfer
    }

    pub fn read(&self, bus: &Bus, addr: u16) -> u8 {
        if !self.mode.is_cgb() || addr != HDMA5 {
            return 0xFF;
        }
        if self.transfer == HdmaMode::Hdma {
            (self.blocks - 1) as u8 & 0x7F
        } else {
            bus.get(HDMA5)
        }
    }

    /// `hblank` tells whether the LCD is currently in H-blank, in which case
    /// a freshly started HDMA copies its first block right away.
    pub fn write(&mut self, bus: &mut Bus, addr: u16, val: u8, hblank: bool) {
        if !self.mode.is_cgb() {
            return;
        }
        if addr != HDMA5 {
            bus.set(addr, val);
            return;
        }
        if self.transfer == HdmaMode::Hdma {
            if val & 0x80 == 0 {
                // Cancel; the remaining length stays readable with bit 7 set.
                bus.set(HDMA5, 0x80 | ((self.blocks - 1) as u8 & 0x7F));
                self.blocks = 0;
                self.transfer = HdmaMode::Idle;
                debug!("HDMA cancelled");
            } else {
                self.blocks = (val & 0x7F) as u16 + 1;
            }
            return;
        }

        self.source = u16::from_be_bytes([bus.get(HDMA1), bus.get(HDMA2)]) & 0xFFF0;
        self.destination =
            VRAM_START | (u16::from_be_bytes([bus.get(HDMA3), bus.get(HDMA4)]) & 0x1FF0);
        self.blocks = (val & 0x7F) as u16 + 1;

        if val & 0x80 != 0 {
            self.transfer = HdmaMode::Hdma;
            bus.set(HDMA5, val & 0x7F);
            debug!(
                "HDMA {:04X} -> {:04X}, {} blocks",
                self.source, self.destination, self.blocks
            );
            if hblank {
                self.on_hblank(bus);
            }
        } else {
            self.transfer = HdmaMode::Gdma;
            debug!(
                "GDMA {:04X} -> {:04X}, {} blocks",
                self.source, self.destination, self.blocks
            );
            while self.blocks > 0 {
                self.copy_block(bus);
            }
            self.finish(bus);
        }
    }

    fn copy_block(&mut self, bus: &mut Bus) {
        let mut block = [0u8; HDMA_BLOCK_LEN as usize];
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = bus.get(self.source.wrapping_add(i as u16));
        }
        bus.set_bytes(self.destination, &block);
        self.source = self.source.wrapping_add(HDMA_BLOCK_LEN);
        self.destination = VRAM_START | (self.destination.wrapping_add(HDMA_BLOCK_LEN) & 0x1FF0);
        self.blocks -= 1;
    }

    fn finish(&mut self, bus: &mut Bus) {
        self.transfer = HdmaMode::Idle;
        self.blocks = 0;
        bus.set(HDMA5, 0xFF);
    }

    /// Copy one block at the start of H-blank.
    pub fn on_hblank(&mut self, bus: &mut Bus) {
        if self.transfer != HdmaMode::Hdma {
            return;
        }
        self.copy_block(bus);
        if self.blocks == 0 {
            self.finish(bus);
        }
    }

    pub fn serialize(&self, out: &mut StateWriter) {
        out.marker();
        out.u16(self.source);
        out.u16(self.destination);
        out.u8(self.blocks as u8);
        out.u8(self.transfer.to_u8());
    }

    pub fn deserialize(&mut self, input: &mut StateReader<'_>) -> Result<(), SaveStateError> {
        input.marker("hdma")?;
        self.source = input.u16()?;
        self.destination = input.u16()?;
        self.blocks = input.u8()? as u16;
        let mode = input.u8()?;
        self.transfer = HdmaMode::from_u8(mode).ok_or_else(|| input.invalid(mode as u32))?;
        if self.transfer == HdmaMode::Hdma && self.blocks == 0 {
            return Err(input.invalid(0));
        }
        Ok(())
    }
}
