use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmulationMode {
    #[default]
    Auto,
    ForceDmg,
    ForceCgb,
}

impl From<EmulationMode> for tickgb_core::EmulationMode {
    fn from(mode: EmulationMode) -> Self {
        match mode {
            EmulationMode::Auto => Self::Auto,
            EmulationMode::ForceDmg => Self::ForceDmg,
            EmulationMode::ForceCgb => Self::ForceCgb,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub emulation_mode: EmulationMode,
    /// Root directory for quick saves.
    pub save_dir: PathBuf,
    pub quick_slot: u8,
    /// Pace emulation to the hardware frame rate instead of running flat out.
    pub realtime: bool,
    /// Keep battery-backed cartridge RAM in `<rom>.sav`.
    pub battery_saves: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            emulation_mode: EmulationMode::Auto,
            save_dir: PathBuf::from("saves"),
            quick_slot: 0,
            realtime: false,
            battery_saves: true,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("tickgb").join("config.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("tickgb").join("config.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("tickgb")
            .join("config.toml");
    }

    PathBuf::from("tickgb.toml")
}

/// Missing files give the defaults silently; unparsable ones with a warning.
pub fn load_from_file(path: &Path) -> Config {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return Config::default(),
    };

    match toml::from_str::<Config>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Failed to parse config {}: {e}; using defaults",
                path.display()
            );
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            emulation-mode = "force-cgb"
            quick-slot = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.emulation_mode, EmulationMode::ForceCgb);
        assert_eq!(cfg.quick_slot, 3);
        assert_eq!(cfg.save_dir, PathBuf::from("saves"));
        assert!(cfg.battery_saves);
        assert!(!cfg.realtime);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "emulation-mode = \"gba\"\n").unwrap();
        assert_eq!(load_from_file(&path), Config::default());
        assert_eq!(
            load_from_file(&dir.path().join("missing.toml")),
            Config::default()
        );
    }

    #[test]
    fn mode_maps_onto_core_preference() {
        assert_eq!(
            tickgb_core::EmulationMode::from(EmulationMode::ForceDmg),
            tickgb_core::EmulationMode::ForceDmg
        );
        let text = toml::to_string(&Config::default()).unwrap();
        assert!(text.contains("emulation-mode = \"auto\""));
    }
}
