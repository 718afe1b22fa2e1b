//! File output for the host. Every write goes through a temporary file in
//! the destination directory that is renamed into place, so an interrupted
//! save never leaves a truncated file behind.

use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use log::{debug, info};
use tempfile::NamedTempFile;
use thiserror::Error;
use tickgb_core::ppu::Framebuffer;
use tickgb_core::{CartridgeHeader, GameBoy};

#[derive(Error, Debug)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to encode screenshot: {0}")]
    Image(#[from] image::ImageError),
    #[error("framebuffer has {0} bytes, which is not a 160x144 RGB frame")]
    FrameSize(usize),
}

pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}

/// `game.gb` keeps its cartridge RAM in `game.sav`.
pub fn battery_path(rom: &Path) -> PathBuf {
    rom.with_extension("sav")
}

/// `<save_dir>/<TITLE_WITH_UNDERSCORES><global checksum>/quicksave-<slot>.dat`
pub fn quick_save_path(save_dir: &Path, header: &CartridgeHeader, slot: u8) -> PathBuf {
    let game = format!(
        "{}{}",
        header.title.replace(' ', "_"),
        header.global_checksum
    );
    save_dir
        .join(game)
        .join(format!("quicksave-{slot}.dat"))
}

pub fn encode_png(frame: &Framebuffer) -> Result<Vec<u8>, PersistError> {
    let pixels = frame.pixels().to_vec();
    let len = pixels.len();
    let img = RgbImage::from_raw(frame.width() as u32, frame.height() as u32, pixels)
        .ok_or(PersistError::FrameSize(len))?;
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

pub fn save_screenshot(path: &Path, frame: &Framebuffer) -> Result<(), PersistError> {
    write_atomic(path, &encode_png(frame)?)?;
    info!("Saved screenshot to {}", path.display());
    Ok(())
}

/// Restore cartridge RAM from `<rom>.sav`. Returns whether a file was applied.
pub fn load_battery(gb: &mut GameBoy, rom: &Path) -> io::Result<bool> {
    if !gb.cartridge().is_some_and(|cart| cart.has_battery()) {
        return Ok(false);
    }
    let path = battery_path(rom);
    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    gb.load_battery_ram(&data);
    info!("Loaded battery RAM from {}", path.display());
    Ok(true)
}

/// Write cartridge RAM next to the ROM. Returns whether anything was written.
pub fn save_battery(gb: &GameBoy, rom: &Path) -> io::Result<bool> {
    let Some(ram) = gb.battery_ram() else {
        return Ok(false);
    };
    let path = battery_path(rom);
    write_atomic(&path, &ram)?;
    info!("Saved battery RAM to {}", path.display());
    Ok(true)
}
