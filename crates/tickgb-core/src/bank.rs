use crate::bus::Bus;
use crate::savestate::{SaveStateError, StateReader, StateWriter};

/// A region backed by several physical banks, one of which is mapped into
/// the bus at a time.
///
/// A *unified* bank maps its active bank at `base`. A non-unified bank keeps
/// bank 0 fixed at `base` and maps the active bank right after it, the way
/// cartridge ROM and WRAM are laid out. Mapped bytes live in the bus; the
/// backing store of the mapped bank is only refreshed when it is switched
/// out or serialized.
#[derive(Clone)]
pub struct MemoryBank {
    name: &'static str,
    unified: bool,
    mutable: bool,
    base: u16,
    num_banks: usize,
    bank_size: usize,
    active: usize,
    banks: Vec<u8>,
}

impl MemoryBank {
    pub fn new(
        name: &'static str,
        unified: bool,
        mutable: bool,
        base: u16,
        num_banks: usize,
        bank_size: usize,
    ) -> Self {
        assert!(num_banks > 0, "{name}: a memory bank needs at least one bank");
        Self {
            name,
            unified,
            mutable,
            base,
            num_banks,
            bank_size,
            active: 0,
            banks: vec![0; num_banks * bank_size],
        }
    }

    pub fn num_banks(&self) -> usize {
        self.num_banks
    }

    pub fn bank_size(&self) -> usize {
        self.bank_size
    }

    pub fn active_bank(&self) -> usize {
        self.active
    }

    fn default_bank(&self) -> usize {
        if self.unified || self.num_banks == 1 { 0 } else { 1 }
    }

    /// Bus address where `bank` is mapped when it is visible.
    fn slot_base(&self, bank: usize) -> u16 {
        if self.unified || bank == 0 {
            self.base
        } else {
            self.base + self.bank_size as u16
        }
    }

    fn switchable_base(&self) -> u16 {
        if self.unified {
            self.base
        } else {
            self.base + self.bank_size as u16
        }
    }

    fn is_mapped(&self, bank: usize) -> bool {
        bank == self.active || (!self.unified && bank == 0)
    }

    fn bank_data(&self, bank: usize) -> &[u8] {
        &self.banks[bank * self.bank_size..(bank + 1) * self.bank_size]
    }

    fn bank_data_mut(&mut self, bank: usize) -> &mut [u8] {
        let size = self.bank_size;
        &mut self.banks[bank * size..(bank + 1) * size]
    }

    /// Reload every bank from `data` (or zero them) and map the default banks.
    ///
    /// # Panics
    /// Panics if `data` does not cover exactly every bank.
    pub fn reset(&mut self, bus: &mut Bus, data: Option<&[u8]>) {
        self.active = self.default_bank();
        match data {
            Some(data) => {
                assert_eq!(
                    data.len(),
                    self.banks.len(),
                    "{}: bank data length mismatch",
                    self.name
                );
                self.banks.copy_from_slice(data);
            }
            None => self.banks.fill(0),
        }
        self.map_all(bus);
    }

    fn map_all(&mut self, bus: &mut Bus) {
        if !self.unified {
            let base = self.base;
            bus.set_bytes(base, self.bank_data(0));
        }
        let slot = self.switchable_base();
        bus.set_bytes(slot, self.bank_data(self.active));
    }

    /// Copy the live bytes of the switchable slot back into its bank.
    fn sync_active(&mut self, bus: &Bus) {
        if !self.mutable {
            return;
        }
        let slot = self.switchable_base();
        let active = self.active;
        let size = self.bank_size;
        self.bank_data_mut(active)
            .copy_from_slice(bus.bytes(slot, size));
    }

    fn sync_all(&mut self, bus: &Bus) {
        if !self.mutable {
            return;
        }
        if !self.unified {
            let base = self.base;
            let size = self.bank_size;
            self.bank_data_mut(0).copy_from_slice(bus.bytes(base, size));
        }
        self.sync_active(bus);
    }

    /// Map `bank` into the switchable slot.
    ///
    /// # Panics
    /// Panics if `bank` is out of range.
    pub fn set_active_bank(&mut self, bus: &mut Bus, bank: usize) {
        assert!(
            bank < self.num_banks,
            "{}: bank {bank} out of range (0..{})",
            self.name,
            self.num_banks
        );
        if bank == self.active {
            return;
        }
        self.sync_active(bus);
        self.active = bank;
        let slot = self.switchable_base();
        bus.set_bytes(slot, self.bank_data(bank));
    }

    /// Read a byte of `bank` whether or not it is currently mapped.
    pub fn get(&self, bus: &Bus, bank: usize, addr: u16) -> u8 {
        let offset = (addr.wrapping_sub(self.base)) as usize % self.bank_size;
        if self.is_mapped(bank) {
            bus.get(self.slot_base(bank) + offset as u16)
        } else {
            self.bank_data(bank)[offset]
        }
    }

    /// Snapshot of every bank including live mapped bytes.
    pub fn contents(&self, bus: &Bus) -> Vec<u8> {
        let mut out = self.banks.clone();
        if !self.unified {
            out[..self.bank_size].copy_from_slice(bus.bytes(self.base, self.bank_size));
        }
        let start = self.active * self.bank_size;
        out[start..start + self.bank_size]
            .copy_from_slice(bus.bytes(self.switchable_base(), self.bank_size));
        out
    }

    /// Replace bank contents from a snapshot produced by [`contents`](Self::contents).
    /// Short snapshots only overwrite their prefix.
    pub fn load_contents(&mut self, bus: &mut Bus, data: &[u8]) {
        let len = data.len().min(self.banks.len());
        self.banks[..len].copy_from_slice(&data[..len]);
        self.map_all(bus);
    }

    pub fn serialize(&mut self, bus: &Bus, out: &mut StateWriter) {
        self.sync_all(bus);
        out.marker();
        out.u16(self.active as u16);
        if self.mutable {
            out.bytes(&self.banks);
        }
    }

    pub fn deserialize(
        &mut self,
        bus: &mut Bus,
        input: &mut StateReader<'_>,
    ) -> Result<(), SaveStateError> {
        input.marker(self.name)?;
        let active = input.u16()? as usize;
        if active >= self.num_banks {
            return Err(input.invalid(active as u32));
        }
        if self.mutable {
            input.fill(&mut self.banks)?;
            self.active = active;
            self.map_all(bus);
        } else {
            self.set_active_bank(bus, active);
        }
        Ok(())
    }
}
