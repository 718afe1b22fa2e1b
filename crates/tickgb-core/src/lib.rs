//! Cycle-accurate Game Boy / Game Boy Color emulation core.
//!
//! This crate contains the platform-agnostic emulator logic (CPU/MMU/PPU and
//! the memory-mapped peripherals). Hosts drive the core through the
//! [`gameboy`] facade and never touch the filesystem through it.

/// Sound register file (no synthesis).
pub mod apu;

/// Switchable memory banks backed by the bus.
pub mod bank;

/// LR35902 operand addressing modes.
pub mod binding;

/// Flat address space, owner table and memory-changed observers.
pub mod bus;

/// Cartridge header parsing and loading.
pub mod cartridge;

/// LR35902 CPU core.
pub mod cpu;

/// OAM DMA and CGB HDMA/GDMA controllers.
pub mod dma;

/// High-level facade that wires the CPU and MMU into a single machine.
pub mod gameboy;

/// Hardware models and mode selection.
pub mod hardware;

/// Joypad input register and edge-triggered interrupt behavior.
pub mod input;

/// Interrupt flags, enables and the master enable delay.
pub mod interrupts;

/// Cartridge memory bank controllers.
pub mod mbc;

/// Memory map and hardware plumbing.
pub mod mmu;

/// Instruction table.
pub mod opcodes;

/// CGB palette colors and DMG shades.
pub mod palette;

/// Pixel Processing Unit (PPU) emulation.
pub mod ppu;

/// CPU register file.
pub mod registers;

/// Binary save-state encoding.
pub mod savestate;

/// Serial unit and link cable plumbing.
pub mod serial;

/// Divider/timer unit.
pub mod timer;

/// Work RAM and the unused region above OAM.
pub mod wram;

pub use cartridge::{Cartridge, CartridgeError, CartridgeHeader};
pub use gameboy::GameBoy;
pub use hardware::{EmulationMode, HardwareMode};
pub use input::Button;
pub use savestate::SaveStateError;
