//! Button presses scheduled by frame number, e.g. `start:120` or `a:300:10`.

use std::str::FromStr;

use log::debug;
use thiserror::Error;
use tickgb_core::{Button, GameBoy};

/// Frames a press is held when the script gives no length.
pub const DEFAULT_PRESS_FRAMES: u64 = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("expected BUTTON:FRAME[:LEN], got `{0}`")]
    Syntax(String),
    #[error("unknown button `{0}`")]
    UnknownButton(String),
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    #[error("press length must be at least one frame")]
    ZeroLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedPress {
    pub button: Button,
    pub frame: u64,
    pub len: u64,
}

impl ScriptedPress {
    fn is_held(&self, frame: u64) -> bool {
        frame >= self.frame && frame - self.frame < self.len
    }
}

fn parse_button(name: &str) -> Result<Button, ScriptError> {
    let button = match name.to_ascii_lowercase().as_str() {
        "a" => Button::A,
        "b" => Button::B,
        "select" => Button::Select,
        "start" => Button::Start,
        "right" => Button::Right,
        "left" => Button::Left,
        "up" => Button::Up,
        "down" => Button::Down,
        _ => return Err(ScriptError::UnknownButton(name.to_string())),
    };
    Ok(button)
}

fn parse_number(text: &str) -> Result<u64, ScriptError> {
    text.parse()
        .map_err(|_| ScriptError::InvalidNumber(text.to_string()))
}

impl FromStr for ScriptedPress {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (button, frame, len) = match parts.as_slice() {
            [button, frame] => (*button, *frame, None),
            [button, frame, len] => (*button, *frame, Some(*len)),
            _ => return Err(ScriptError::Syntax(s.to_string())),
        };
        let len = match len {
            Some(len) => parse_number(len)?,
            None => DEFAULT_PRESS_FRAMES,
        };
        if len == 0 {
            return Err(ScriptError::ZeroLength);
        }
        Ok(Self {
            button: parse_button(button)?,
            frame: parse_number(frame)?,
            len,
        })
    }
}

/// Drives [`GameBoy::set_button`] from a list of presses.
///
/// Call [`init`](Self::init) once before the first frame, [`poll`](Self::poll)
/// before every frame and [`shutdown`](Self::shutdown) when done, which
/// releases anything still held.
#[derive(Debug, Default)]
pub struct InputScript {
    presses: Vec<ScriptedPress>,
    held: u8,
}

impl InputScript {
    pub fn new(presses: Vec<ScriptedPress>) -> Self {
        Self { presses, held: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.presses.is_empty()
    }

    pub fn init(&mut self, gb: &mut GameBoy) {
        for button in Button::ALL {
            gb.set_button(button, false);
        }
        self.held = 0;
    }

    pub fn poll(&mut self, gb: &mut GameBoy, frame: u64) {
        let wanted = self
            .presses
            .iter()
            .filter(|press| press.is_held(frame))
            .fold(0u8, |mask, press| mask | press.button.mask());

        for button in Button::ALL {
            let pressed = wanted & button.mask() != 0;
            if pressed != (self.held & button.mask() != 0) {
                debug!("Frame {frame}: {button:?} {}", if pressed { "down" } else { "up" });
                gb.set_button(button, pressed);
            }
        }
        self.held = wanted;
    }

    pub fn shutdown(&mut self, gb: &mut GameBoy) {
        for button in Button::ALL {
            if self.held & button.mask() != 0 {
                gb.set_button(button, false);
            }
        }
        self.held = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_presses() {
        assert_eq!(
            "Start:120".parse::<ScriptedPress>(),
            Ok(ScriptedPress {
                button: Button::Start,
                frame: 120,
                len: DEFAULT_PRESS_FRAMES
            })
        );
        assert_eq!(
            "a:3:1".parse::<ScriptedPress>().map(|p| (p.frame, p.len)),
            Ok((3, 1))
        );
        assert_eq!(
            "turbo:1".parse::<ScriptedPress>(),
            Err(ScriptError::UnknownButton("turbo".into()))
        );
        assert_eq!(
            "a".parse::<ScriptedPress>(),
            Err(ScriptError::Syntax("a".into()))
        );
        assert_eq!(
            "a:x".parse::<ScriptedPress>(),
            Err(ScriptError::InvalidNumber("x".into()))
        );
        assert_eq!("a:1:0".parse::<ScriptedPress>(), Err(ScriptError::ZeroLength));
    }

    #[test]
    fn press_window_is_half_open() {
        let press = ScriptedPress {
            button: Button::A,
            frame: 10,
            len: 2,
        };
        assert!(!press.is_held(9));
        assert!(press.is_held(10));
        assert!(press.is_held(11));
        assert!(!press.is_held(12));
    }
}
