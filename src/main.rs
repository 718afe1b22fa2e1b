use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use log::{LevelFilter, debug, error, info, warn};
use tickgb::config::{self, Config};
use tickgb::fps::{FRAME_TIME, FramePacer, FrameRateTicker};
use tickgb::input_script::{InputScript, ScriptedPress};
use tickgb::persist;
use tickgb_core::{EmulationMode, GameBoy};

#[derive(Parser)]
#[command(version, about = "Headless Game Boy / Game Boy Color emulator")]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// Number of frames to run
    #[arg(long, default_value_t = 600)]
    frames: u64,

    /// Force DMG mode
    #[arg(long, conflicts_with = "cgb")]
    dmg: bool,

    /// Force CGB mode
    #[arg(long, conflicts_with = "dmg")]
    cgb: bool,

    /// Configuration file (defaults to the per-user config path)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the last frame as PNG
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Write a save state after the last frame
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// Restore a save state before the first frame
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Save to the quick-save slot after the last frame
    #[arg(long)]
    quick_save: bool,

    /// Restore the quick-save slot before the first frame
    #[arg(long, conflicts_with = "load_state")]
    quick_load: bool,

    /// Quick-save slot (overrides the config file)
    #[arg(long)]
    slot: Option<u8>,

    /// Scripted button press, BUTTON:FRAME[:LEN]; may be repeated
    #[arg(long = "press", value_name = "BUTTON:FRAME[:LEN]")]
    presses: Vec<ScriptedPress>,

    /// Pace emulation at the hardware frame rate
    #[arg(long)]
    realtime: bool,

    /// Print serial output at exit
    #[arg(long)]
    serial: bool,

    /// Enable debug logging of CPU state and serial output
    #[arg(long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if debug {
        builder.filter_module("tickgb_core", LevelFilter::Debug);
        builder.filter_module("tickgb", LevelFilter::Debug);
    }
    builder.init();
}

fn format_serial(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for b in bytes {
        if b.is_ascii_graphic() || *b == b' ' || *b == b'\n' {
            text.push(*b as char);
        } else {
            text.push_str(&format!("\\x{b:02X}"));
        }
    }
    text
}

fn emulation_mode(args: &Args, cfg: &Config) -> EmulationMode {
    if args.dmg {
        EmulationMode::ForceDmg
    } else if args.cgb {
        EmulationMode::ForceCgb
    } else {
        cfg.emulation_mode.into()
    }
}

fn quick_save_path(gb: &GameBoy, cfg: &Config, slot: u8) -> Option<PathBuf> {
    let cart = gb.cartridge()?;
    Some(persist::quick_save_path(&cfg.save_dir, cart.header(), slot))
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let cfg = config::load_from_file(&config_path);
    debug!("Using config {}: {cfg:?}", config_path.display());
    let slot = args.slot.unwrap_or(cfg.quick_slot);

    let rom = std::fs::read(&args.rom)
        .map_err(|e| format!("Failed to read ROM {}: {e}", args.rom.display()))?;
    let mut gb = GameBoy::new();
    gb.set_emulation_mode(emulation_mode(&args, &cfg));
    gb.load_cartridge(rom)
        .map_err(|e| format!("Failed to load ROM: {e}"))?;
    info!("Emulator initialized in {:?} mode", gb.mode());

    if cfg.battery_saves {
        persist::load_battery(&mut gb, &args.rom)?;
    }

    let state_in = if args.quick_load {
        quick_save_path(&gb, &cfg, slot)
    } else {
        args.load_state.clone()
    };
    if let Some(path) = state_in {
        let data = std::fs::read(&path)
            .map_err(|e| format!("Failed to read save state {}: {e}", path.display()))?;
        gb.load_state(&data)?;
        info!("Loaded state from {}", path.display());
    }

    let mut script = InputScript::new(args.presses.clone());
    script.init(&mut gb);
    let mut pacer = (args.realtime || cfg.realtime).then(|| FramePacer::new(FRAME_TIME));
    let mut ticker = FrameRateTicker::new();

    for frame in 0..args.frames {
        script.poll(&mut gb, frame);
        gb.run_frame();

        if let Some(pacer) = pacer.as_mut() {
            pacer.wait();
        }
        if let Some(fps) = ticker.tick(Instant::now()) {
            info!("{fps:.1} fps");
        }

        if args.debug && frame % 60 == 0 {
            debug!("{}", gb.cpu.debug_state());
        }
    }
    script.shutdown(&mut gb);
    if gb.cpu.is_locked() {
        warn!("CPU locked up on an illegal opcode");
    }

    if let Some(path) = args.screenshot.as_deref() {
        persist::save_screenshot(path, gb.framebuffer())?;
    }

    let state_out = if args.quick_save {
        quick_save_path(&gb, &cfg, slot)
    } else {
        args.save_state.clone()
    };
    if let Some(path) = state_out {
        persist::write_atomic(&path, &gb.save_state()?)?;
        info!("Saved state to {}", path.display());
    }

    if cfg.battery_saves {
        persist::save_battery(&gb, &args.rom)?;
    }

    if args.serial {
        let serial = gb.take_serial_output();
        println!("[SERIAL] {}", format_serial(&serial));
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
