use crate::bus::{Bus, Unit};
use crate::hardware::HardwareMode;
use crate::interrupts::{Interrupt, Interrupts};
use crate::savestate::{SaveStateError, StateReader, StateWriter};

pub const SB: u16 = 0xFF01;
pub const SC: u16 = 0xFF02;

/// Cycles per shifted bit with the internal 8192 Hz clock.
const BIT_CYCLES: u32 = 512;
/// CGB high-speed clock (SC bit 1), 262144 Hz.
const FAST_BIT_CYCLES: u32 = 16;

pub trait LinkPort: Send {
    /// Exchange a byte with the partner. Returns the byte it sent back.
    fn transfer(&mut self, byte: u8) -> u8;
}

/// Used when no cable is attached. Incoming bits read as 1, so every
/// transfer receives 0xFF unless `loopback` echoes the sent byte.
#[derive(Default)]
pub struct NullLinkPort {
    loopback: bool,
}

impl NullLinkPort {
    pub fn new(loopback: bool) -> Self {
        Self { loopback }
    }
}

impl LinkPort for NullLinkPort {
    fn transfer(&mut self, byte: u8) -> u8 {
        if self.loopback { byte } else { 0xFF }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TransferState {
    remaining_bits: u8,
    incoming: u8,
    cycles: u32,
}

/// SB/SC shift register. Raises the serial interrupt when all eight bits
/// have been shifted.
pub struct Serial {
    mode: HardwareMode,
    transfer: Option<TransferState>,
    port: Box<dyn LinkPort>,
    pub(crate) out_buf: Vec<u8>,
}

impl Serial {
    pub fn new(bus: &mut Bus) -> Self {
        bus.set_owner(Unit::Serial, SB..=SC);
        Self {
            mode: HardwareMode::Dmg,
            transfer: None,
            port: Box::new(NullLinkPort::default()),
            out_buf: Vec::new(),
        }
    }

    pub fn reset(&mut self, bus: &mut Bus, mode: HardwareMode) {
        self.mode = mode;
        self.transfer = None;
        bus.set(SB, 0);
        bus.set(SC, if mode.is_cgb() { 0x7F } else { 0x7E });
    }

    pub fn connect(&mut self, port: Box<dyn LinkPort>) {
        self.port = port;
    }

    pub(crate) fn replace_port(&mut self, port: Box<dyn LinkPort>) -> Box<dyn LinkPort> {
        std::mem::replace(&mut self.port, port)
    }

    /// Bytes sent so far, drained.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out_buf)
    }

    pub fn peek_output(&self) -> &[u8] {
        &self.out_buf
    }

    pub fn is_transferring(&self) -> bool {
        self.transfer.is_some()
    }

    pub fn write(&mut self, bus: &mut Bus, addr: u16, val: u8) {
        bus.set(addr, val);
        if addr != SC {
            return;
        }
        if val & 0x80 == 0 {
            self.transfer = None;
            return;
        }
        // The partner's byte is exchanged up front and shifted in bit by bit.
        let outgoing = bus.get(SB);
        self.out_buf.push(outgoing);
        let incoming = self.port.transfer(outgoing);
        self.transfer = Some(TransferState {
            remaining_bits: 8,
            incoming,
            cycles: 0,
        });
    }

    fn bit_cycles(&self, sc: u8) -> u32 {
        if self.mode.is_cgb() && sc & 0x02 != 0 {
            FAST_BIT_CYCLES
        } else {
            BIT_CYCLES
        }
    }

    fn shift(&mut self, bus: &mut Bus, irq: &mut Interrupts) {
        let Some(state) = self.transfer.as_mut() else {
            return;
        };
        let bit = state.incoming >> 7;
        state.incoming <<= 1;
        state.remaining_bits -= 1;
        bus.set(SB, bus.get(SB) << 1 | bit);
        if state.remaining_bits == 0 {
            self.transfer = None;
            bus.set(SC, bus.get(SC) & 0x7F);
            irq.set_requested(bus, Interrupt::Serial, true);
        }
    }

    /// Advance an internally clocked transfer.
    pub fn tick(&mut self, bus: &mut Bus, irq: &mut Interrupts, cycles: u32) {
        let sc = bus.get(SC);
        if sc & 0x01 == 0 {
            return;
        }
        let bit_cycles = self.bit_cycles(sc);
        let Some(state) = self.transfer.as_mut() else {
            return;
        };
        state.cycles += cycles;
        while let Some(state) = self.transfer.as_mut() {
            if state.cycles < bit_cycles {
                break;
            }
            state.cycles -= bit_cycles;
            self.shift(bus, irq);
        }
    }

    /// Clock pulses from the link partner for externally clocked transfers.
    pub fn external_clock_pulse(&mut self, bus: &mut Bus, irq: &mut Interrupts, count: u8) {
        if bus.get(SC) & 0x01 != 0 {
            return;
        }
        for _ in 0..count {
            if self.transfer.is_none() {
                break;
            }
            self.shift(bus, irq);
        }
    }

    pub fn serialize(&self, out: &mut StateWriter) {
        out.marker();
        let state = self.transfer.unwrap_or(TransferState {
            remaining_bits: 0,
            incoming: 0,
            cycles: 0,
        });
        out.u16(state.cycles as u16);
        out.u8(state.remaining_bits);
        out.u8(state.incoming);
    }

    pub fn deserialize(&mut self, input: &mut StateReader<'_>) -> Result<(), SaveStateError> {
        input.marker("serial")?;
        let cycles = input.u16()? as u32;
        let remaining_bits = input.u8()?;
        let incoming = input.u8()?;
        if remaining_bits > 8 {
            return Err(input.invalid(remaining_bits as u32));
        }
        self.transfer = (remaining_bits > 0).then_some(TransferState {
            remaining_bits,
            incoming,
            cycles,
        });
        Ok(())
    }
}
