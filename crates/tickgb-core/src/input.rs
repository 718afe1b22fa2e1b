use crate::bus::{Bus, Unit};
use crate::interrupts::{Interrupt, Interrupts};
use crate::savestate::{SaveStateError, StateReader, StateWriter};

pub const P1: u16 = 0xFF00;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Right,
    Left,
    Up,
    Down,
}

impl Button {
    pub const ALL: [Button; 8] = [
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
        Button::Right,
        Button::Left,
        Button::Up,
        Button::Down,
    ];

    /// Bit in the pressed-state byte: action buttons in the low nibble,
    /// directions in the high nibble.
    #[inline]
    pub const fn mask(self) -> u8 {
        1 << self as u8
    }
}

/// Joypad matrix behind P1. Pressed buttons read as 0.
pub struct Joypad {
    state: u8,
    lines_high: bool,
}

impl Joypad {
    pub fn new(bus: &mut Bus) -> Self {
        bus.set_owner(Unit::Input, P1..=P1);
        Self {
            state: 0xFF,
            lines_high: true,
        }
    }

    pub fn reset(&mut self, bus: &mut Bus) {
        self.state = 0xFF;
        self.lines_high = true;
        bus.set(P1, 0xFF);
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        if pressed {
            self.state &= !button.mask();
        } else {
            self.state |= button.mask();
        }
    }

    pub fn button_state(&self, button: Button) -> bool {
        self.state & button.mask() == 0
    }

    #[inline]
    pub fn any_pressed(&self) -> bool {
        self.state != 0xFF
    }

    pub fn write(&mut self, bus: &mut Bus, val: u8) {
        bus.set(P1, val);
    }

    /// Refresh the low nibble of P1 from the selected lines and raise the
    /// joypad interrupt when one of them goes low.
    pub fn tick(&mut self, bus: &mut Bus, irq: &mut Interrupts) {
        let p1 = bus.get(P1);
        let nibble = match p1 & 0x30 {
            0x10 => self.state & 0x0F,
            0x20 => self.state >> 4,
            0x00 => (self.state & 0x0F) & (self.state >> 4),
            _ => 0x0F,
        };
        bus.set(P1, (p1 & 0xF0) | nibble);

        let lines_high = nibble == 0x0F;
        if self.lines_high && !lines_high {
            irq.set_requested(bus, Interrupt::Joypad, true);
        }
        self.lines_high = lines_high;
    }

    pub fn serialize(&self, out: &mut StateWriter) {
        out.marker();
        out.u8(self.state);
        out.bool(self.lines_high);
    }

    pub fn deserialize(&mut self, input: &mut StateReader<'_>) -> Result<(), SaveStateError> {
        input.marker("input")?;
        self.state = input.u8()?;
        self.lines_high = input.bool()?;
        Ok(())
    }
}
