//! Headless host for the `tickgb_core` emulator: configuration, file output,
//! scripted input and frame pacing used by the `tickgb` binary.

pub mod config;
pub mod fps;
pub mod input_script;
pub mod persist;
