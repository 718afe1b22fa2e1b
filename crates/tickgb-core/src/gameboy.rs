use log::{debug, info};

use crate::bus::{MemoryObserver, ObserverHandle};
use crate::cartridge::{Cartridge, CartridgeError, CartridgeHeader};
use crate::cpu::{Cpu, CpuStatus};
use crate::hardware::{EmulationMode, HardwareMode};
use crate::input::Button;
use crate::mmu::{Mmu, VideoModeListener};
use crate::ppu::Framebuffer;
use crate::savestate::{SaveStateError, StateReader, StateWriter};
use crate::serial::{LinkPort, NullLinkPort};

pub type CartridgeListener = Box<dyn FnMut(&CartridgeHeader) + Send>;

/// High-level facade that wires the CPU and MMU into a single machine.
pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
    emulation_mode: EmulationMode,
    cartridge_listeners: Vec<CartridgeListener>,
}

impl GameBoy {
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            mmu: Mmu::new(),
            emulation_mode: EmulationMode::Auto,
            cartridge_listeners: Vec::new(),
        }
    }

    /// Hardware mode of the running machine.
    #[inline]
    pub fn mode(&self) -> HardwareMode {
        self.mmu.mode()
    }

    pub fn emulation_mode(&self) -> EmulationMode {
        self.emulation_mode
    }

    /// Takes effect on the next cartridge load or reset.
    pub fn set_emulation_mode(&mut self, mode: EmulationMode) {
        self.emulation_mode = mode;
    }

    fn resolve_mode(&self) -> HardwareMode {
        let cgb = self
            .mmu
            .cartridge
            .as_ref()
            .is_some_and(|cart| cart.header().supports_cgb());
        self.emulation_mode.resolve(cgb)
    }

    /// Validate and insert a ROM image, then reset into the resolved
    /// hardware mode. On error the previous cartridge stays loaded.
    pub fn load_cartridge(&mut self, rom: Vec<u8>) -> Result<(), CartridgeError> {
        let cart = Cartridge::load(rom)?;
        self.mmu.cartridge = Some(cart);
        self.reset();
        info!("Running in {:?} mode", self.mode());
        if let Some(cart) = self.mmu.cartridge.as_ref() {
            for listener in self.cartridge_listeners.iter_mut() {
                listener(cart.header());
            }
        }
        Ok(())
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.mmu.cartridge.is_some()
    }

    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.mmu.cartridge.as_ref()
    }

    /// Return to the post-boot state, keeping the cartridge ROM but
    /// clearing its RAM.
    pub fn reset(&mut self) {
        let mode = self.resolve_mode();
        self.mmu.reset(mode);
        self.cpu.reset(mode);
    }

    /// Run one CPU step and advance the peripherals by the cycles it took.
    /// Returns true when a frame finished, or while the CPU is stopped.
    pub fn tick(&mut self) -> bool {
        let cycles = self.cpu.tick(&mut self.mmu);
        self.mmu.tick_serial(cycles);
        self.mmu.tick_input();

        if self.cpu.status() == CpuStatus::Stopped {
            if self.mmu.joypad.any_pressed() {
                self.cpu.wake();
            }
            return true;
        }

        if self.mmu.dma.is_active() {
            self.mmu.tick_dma(cycles);
        }
        self.mmu.tick_timer(cycles);

        // The LCD keeps its own pace in double speed.
        let video_cycles = if self.cpu.double_speed(&self.mmu) {
            cycles / 2
        } else {
            cycles
        };
        self.mmu.tick_video(video_cycles)
    }

    pub fn run_frame(&mut self) {
        if !self.is_loaded() {
            return;
        }
        while !self.tick() {}
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        self.mmu.video.framebuffer()
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.mmu.joypad.set_button(button, pressed);
    }

    pub fn connect_link(&mut self, port: Box<dyn LinkPort>) {
        self.mmu.serial.connect(port);
    }

    /// Bytes the program sent over the link cable since the last call.
    pub fn take_serial_output(&mut self) -> Vec<u8> {
        self.mmu.serial.take_output()
    }

    pub fn subscribe_memory(&mut self, observer: MemoryObserver) -> ObserverHandle {
        self.mmu.bus.subscribe(observer)
    }

    pub fn unsubscribe_memory(&mut self, handle: ObserverHandle) -> bool {
        self.mmu.bus.unsubscribe(handle)
    }

    pub fn on_cartridge_loaded(&mut self, listener: CartridgeListener) {
        self.cartridge_listeners.push(listener);
    }

    pub fn on_video_mode(&mut self, listener: VideoModeListener) {
        self.mmu.add_video_listener(listener);
    }

    /// Battery-backed cartridge RAM, if the cartridge keeps any.
    pub fn battery_ram(&self) -> Option<Vec<u8>> {
        self.mmu.cartridge.as_ref()?.battery_ram(&self.mmu.bus)
    }

    pub fn load_battery_ram(&mut self, data: &[u8]) {
        if let Some(cart) = self.mmu.cartridge.as_mut() {
            cart.load_battery_ram(&mut self.mmu.bus, data);
        }
    }

    pub fn save_state(&mut self) -> Result<Vec<u8>, SaveStateError> {
        let mode = self.mode();
        let Some(cart) = self.mmu.cartridge.as_mut() else {
            return Err(SaveStateError::NoCartridge);
        };
        let mut out = StateWriter::new();
        out.marker();
        out.bool(mode.is_cgb());
        out.u16(cart.header().global_checksum);

        cart.serialize(&self.mmu.bus, &mut out);
        self.mmu.serialize(&mut out);
        self.cpu.serialize(&self.mmu, &mut out);
        self.mmu.serial.serialize(&mut out);
        self.mmu.timer.serialize(&mut out);
        self.mmu.dma.serialize(&mut out);
        self.mmu.hdma.serialize(&mut out);
        self.mmu.video.serialize(&self.mmu.bus, &mut out);
        self.mmu.apu.serialize(&mut out);
        self.mmu.joypad.serialize(&mut out);
        debug!("Saved state, {} bytes", out.len());
        Ok(out.into_inner())
    }

    fn deserialize_units(&mut self, input: &mut StateReader<'_>) -> Result<(), SaveStateError> {
        if let Some(cart) = self.mmu.cartridge.as_mut() {
            cart.deserialize(&mut self.mmu.bus, input)?;
        }
        self.mmu.deserialize(input)?;
        self.cpu.deserialize(&mut self.mmu, input)?;
        self.mmu.serial.deserialize(input)?;
        self.mmu.timer.deserialize(input)?;
        self.mmu.dma.deserialize(input)?;
        self.mmu.hdma.deserialize(input)?;
        self.mmu.video.deserialize(&mut self.mmu.bus, input)?;
        self.mmu.apu.deserialize(input)?;
        self.mmu.joypad.deserialize(input)
    }

    /// Restore a state produced by [`save_state`](Self::save_state) for the
    /// same cartridge. The state is decoded into a scratch machine first, so
    /// a rejected state leaves this one untouched.
    pub fn load_state(&mut self, data: &[u8]) -> Result<(), SaveStateError> {
        let Some(cart) = self.mmu.cartridge.as_ref() else {
            return Err(SaveStateError::NoCartridge);
        };

        let mut input = StateReader::new(data);
        input.marker("machine")?;
        let mode = HardwareMode::from_cgb(input.bool()?);
        let checksum = input.u16()?;
        if checksum != cart.header().global_checksum {
            return Err(input.invalid(checksum as u32));
        }

        let mut scratch = GameBoy::new();
        scratch.emulation_mode = self.emulation_mode;
        scratch.mmu.cartridge = Some(cart.clone());
        scratch.mmu.reset(mode);
        scratch.cpu.reset(mode);
        scratch.deserialize_units(&mut input)?;
        input.finish()?;

        // Host attachments move over to the restored machine.
        scratch
            .mmu
            .bus
            .restore_observers(self.mmu.bus.take_observers());
        let port = self
            .mmu
            .serial
            .replace_port(Box::new(NullLinkPort::default()));
        scratch.mmu.serial.replace_port(port);
        scratch.mmu.serial.out_buf = std::mem::take(&mut self.mmu.serial.out_buf);
        scratch
            .mmu
            .restore_video_listeners(self.mmu.take_video_listeners());

        self.cpu = scratch.cpu;
        self.mmu = scratch.mmu;
        self.mmu.bus.broadcast_global();
        debug!("Loaded state in {mode:?} mode");
        Ok(())
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::bus::MemoryChange;
    use crate::cartridge::tests::rom_image;

    /// ROM-only image whose entry point spins on `JR -2`.
    fn looping_rom(cgb_flag: u8) -> Vec<u8> {
        let mut rom = rom_image(0x00, 0x00, 0x00);
        rom[0x143] = cgb_flag;
        rom[0x100] = 0x18;
        rom[0x101] = 0xFE;
        rom
    }

    #[test]
    fn run_frame_without_cartridge_is_a_no_op() {
        let mut gb = GameBoy::new();
        let pc = gb.cpu.regs.pc;
        gb.run_frame();
        assert_eq!(gb.cpu.regs.pc, pc);
        assert!(!gb.is_loaded());
    }

    #[test]
    fn mode_follows_header_and_preference() {
        let mut gb = GameBoy::new();
        gb.load_cartridge(looping_rom(0x80)).unwrap();
        assert_eq!(gb.mode(), HardwareMode::Cgb);

        gb.set_emulation_mode(EmulationMode::ForceDmg);
        gb.reset();
        assert_eq!(gb.mode(), HardwareMode::Dmg);

        gb.set_emulation_mode(EmulationMode::Auto);
        gb.load_cartridge(looping_rom(0x00)).unwrap();
        assert_eq!(gb.mode(), HardwareMode::Dmg);
    }

    #[test]
    fn rejected_rom_keeps_previous_cartridge() {
        let mut gb = GameBoy::new();
        gb.load_cartridge(looping_rom(0x00)).unwrap();
        let mut bad = looping_rom(0x00);
        bad[0x147] = 0xFC;
        assert_eq!(
            gb.load_cartridge(bad),
            Err(CartridgeError::UnsupportedCartridgeType(0xFC))
        );
        assert!(gb.is_loaded());
        assert_eq!(gb.cartridge().unwrap().header().title, "TEST");
    }

    #[test]
    fn cartridge_listeners_see_header() {
        let titles = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&titles);
        let mut gb = GameBoy::new();
        gb.on_cartridge_loaded(Box::new(move |header| {
            sink.lock().unwrap().push(header.title.clone())
        }));
        gb.load_cartridge(looping_rom(0x00)).unwrap();
        assert_eq!(*titles.lock().unwrap(), vec!["TEST".to_string()]);
    }

    #[test]
    fn frames_complete_with_vblank() {
        let mut gb = GameBoy::new();
        gb.load_cartridge(looping_rom(0x00)).unwrap();
        gb.run_frame();
        assert_eq!(gb.mmu.read(crate::ppu::LY), 144);
        assert_eq!(gb.cpu.regs.pc, 0x0100);
    }

    #[test]
    fn state_round_trip_and_rejection() {
        let mut gb = GameBoy::new();
        gb.load_cartridge(looping_rom(0x00)).unwrap();
        gb.run_frame();
        gb.mmu.write(0xC000, 0x42);
        let state = gb.save_state().unwrap();

        gb.mmu.write(0xC000, 0x00);
        gb.run_frame();
        gb.load_state(&state).unwrap();
        assert_eq!(gb.mmu.read(0xC000), 0x42);
        assert_eq!(gb.save_state().unwrap(), state);

        let mut corrupt = state.clone();
        corrupt[0] ^= 0xFF;
        assert_eq!(
            gb.load_state(&corrupt),
            Err(SaveStateError::IntegrityCheck { section: "machine" })
        );
        let truncated = &state[..state.len() - 1];
        assert!(gb.load_state(truncated).is_err());
        assert_eq!(gb.mmu.read(0xC000), 0x42);
    }

    #[test]
    fn save_state_needs_cartridge() {
        let mut gb = GameBoy::new();
        assert_eq!(gb.save_state(), Err(SaveStateError::NoCartridge));
        assert_eq!(gb.load_state(&[]), Err(SaveStateError::NoCartridge));
    }

    #[test]
    fn observers_survive_state_load() {
        let hits = Arc::new(AtomicUsize::new(0));
        let globals = Arc::clone(&hits);
        let mut gb = GameBoy::new();
        gb.load_cartridge(looping_rom(0x00)).unwrap();
        let state = gb.save_state().unwrap();
        gb.subscribe_memory(Box::new(move |change| {
            if change == MemoryChange::GLOBAL {
                globals.fetch_add(1, Ordering::Relaxed);
            }
        }));
        gb.load_state(&state).unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        gb.mmu.write(0xC000, 1);
    }
}
