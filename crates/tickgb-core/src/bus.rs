//! Flat 64KB address space with a per-address owner table.
//!
//! Every hardware unit keeps its memory-mapped state directly in the bus
//! storage. The [`Mmu`](crate::mmu::Mmu) routes intercepted accesses to the
//! unit recorded in the owner table; units themselves use the raw
//! `get`/`set` path, which bypasses interception and notifies observers.

use std::ops::RangeInclusive;

pub const MEMORY_MAP_SIZE: usize = 0x10000;

// Address map
pub const VRAM_START: u16 = 0x8000;
pub const VRAM_END: u16 = 0x9FFF;
pub const CRAM_START: u16 = 0xA000;
pub const CRAM_END: u16 = 0xBFFF;
pub const OAM_START: u16 = 0xFE00;
pub const OAM_END: u16 = 0xFE9F;
pub const IO_START: u16 = 0xFF00;
pub const IO_END: u16 = 0xFF7F;
pub const HRAM_START: u16 = 0xFF80;
pub const HRAM_END: u16 = 0xFFFE;

/// Bits that always read back as 1 in the I/O page (0xFF00-0xFF7F).
#[rustfmt::skip]
const IO_UNUSABLE: [u8; 0x80] = [
    0xC0, 0x00, 0x7C, 0xFF, 0x00, 0x00, 0x00, 0xF8, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xE0,
    0x80, 0x00, 0x00, 0x00, 0x38, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x7F, 0x00, 0x9F, 0x00, 0x00, 0xFF,
    0xC0, 0x00, 0x00, 0x3F, 0x00, 0x00, 0x70, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x7E, 0xFF, 0xFE,
    0xFF, 0x00, 0x0F, 0xE0, 0x0F, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x40, 0x00, 0x40, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
    0xF8, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

/// Bits the CPU may change through an intercepted write in the I/O page.
const IO_WRITABLE: [u8; 0x80] = {
    let mut masks = [0xFF; 0x80];
    masks[0x00] = 0x30; // P1: only the select lines
    masks[0x41] = 0xF8; // STAT: mode and coincidence are read-only
    masks[0x44] = 0x00; // LY
    masks[0x4D] = 0x01; // KEY1: prepare bit
    masks[0x4F] = 0x01; // VBK
    masks[0x52] = 0xF0; // HDMA2
    masks[0x53] = 0x1F; // HDMA3
    masks[0x54] = 0xF0; // HDMA4
    masks
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
/// Hardware unit that intercepts accesses to an address.
pub enum Unit {
    /// Unowned: reads return 0xFF and writes are dropped.
    #[default]
    None,
    /// Plain storage (OAM, HRAM).
    Storage,
    Cartridge,
    Video,
    Wram,
    Unused,
    Interrupts,
    Processor,
    Timer,
    Serial,
    Dma,
    Hdma,
    Input,
    Audio,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Notification that raw memory in `address..address + len` changed.
pub struct MemoryChange {
    pub address: usize,
    pub len: usize,
}

impl MemoryChange {
    pub const GLOBAL: MemoryChange = MemoryChange {
        address: 0,
        len: MEMORY_MAP_SIZE,
    };

    pub fn contains(&self, address: u16) -> bool {
        let address = address as usize;
        address >= self.address && address < self.address + self.len
    }
}

pub type MemoryObserver = Box<dyn FnMut(MemoryChange) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Token returned by [`Bus::subscribe`], used to remove the observer later.
pub struct ObserverHandle(u64);

/// Ordered list of memory-changed callbacks.
#[derive(Default)]
pub struct Observers {
    next_id: u64,
    entries: Vec<(ObserverHandle, MemoryObserver)>,
}

impl Observers {
    fn notify(&mut self, change: MemoryChange) {
        for (_, observer) in self.entries.iter_mut() {
            observer(change);
        }
    }
}

pub struct Bus {
    data: Box<[u8]>,
    owners: Box<[Unit]>,
    observers: Observers,
}

impl Bus {
    pub fn new() -> Self {
        let mut bus = Self {
            data: vec![0; MEMORY_MAP_SIZE].into_boxed_slice(),
            owners: vec![Unit::None; MEMORY_MAP_SIZE].into_boxed_slice(),
            observers: Observers::default(),
        };
        bus.set_owner(Unit::Storage, OAM_START..=OAM_END);
        bus.set_owner(Unit::Storage, HRAM_START..=HRAM_END);
        bus
    }

    /// Register `unit` as the owner of `range`. Later registrations replace
    /// earlier ones.
    pub fn set_owner(&mut self, unit: Unit, range: RangeInclusive<u16>) {
        for addr in range {
            self.owners[addr as usize] = unit;
        }
    }

    #[inline]
    pub fn owner(&self, addr: u16) -> Unit {
        self.owners[addr as usize]
    }

    /// Fill raw memory with its power-on contents.
    ///
    /// The I/O page starts out with every unusable bit set; everything else
    /// is cleared. Units reinitialize their own registers afterwards.
    pub fn reset(&mut self) {
        for (i, byte) in self.data.iter_mut().enumerate() {
            *byte = if (IO_START as usize..=IO_END as usize).contains(&i) {
                IO_UNUSABLE[i - IO_START as usize]
            } else {
                0
            };
        }
        self.broadcast_global();
    }

    /// Apply the I/O forced-one and writable masks to a CPU write.
    #[inline]
    pub fn mask_io_write(&self, addr: u16, val: u8) -> u8 {
        if (IO_START..=IO_END).contains(&addr) {
            let index = (addr - IO_START) as usize;
            let writable = IO_WRITABLE[index];
            (val & writable) | IO_UNUSABLE[index] | (self.get(addr) & !writable)
        } else {
            val
        }
    }

    #[inline]
    pub fn get(&self, addr: u16) -> u8 {
        self.data[addr as usize]
    }

    #[inline]
    pub fn set(&mut self, addr: u16, val: u8) {
        self.data[addr as usize] = val;
        self.observers.notify(MemoryChange {
            address: addr as usize,
            len: 1,
        });
    }

    /// Copy `values` into raw memory starting at `addr`.
    pub fn set_bytes(&mut self, addr: u16, values: &[u8]) {
        let start = addr as usize;
        let end = start + values.len();
        assert!(
            end <= MEMORY_MAP_SIZE,
            "raw write of {} bytes at {addr:04X} runs past the memory map",
            values.len()
        );
        self.data[start..end].copy_from_slice(values);
        self.observers.notify(MemoryChange {
            address: start,
            len: values.len(),
        });
    }

    pub fn bytes(&self, addr: u16, len: usize) -> &[u8] {
        let start = addr as usize;
        &self.data[start..start + len]
    }

    pub fn subscribe(&mut self, observer: MemoryObserver) -> ObserverHandle {
        let handle = ObserverHandle(self.observers.next_id);
        self.observers.next_id += 1;
        self.observers.entries.push((handle, observer));
        handle
    }

    /// Remove a previously registered observer. Returns whether it existed.
    pub fn unsubscribe(&mut self, handle: ObserverHandle) -> bool {
        let before = self.observers.entries.len();
        self.observers.entries.retain(|(h, _)| *h != handle);
        self.observers.entries.len() != before
    }

    pub fn broadcast_global(&mut self) {
        self.observers.notify(MemoryChange::GLOBAL);
    }

    pub(crate) fn take_observers(&mut self) -> Observers {
        std::mem::take(&mut self.observers)
    }

    pub(crate) fn restore_observers(&mut self, observers: Observers) {
        self.observers = observers;
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
