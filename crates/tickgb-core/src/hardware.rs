#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
/// Hardware model being emulated.
///
/// The mode is chosen once per cartridge load and drives every
/// mode-dependent quirk (boot register values, interrupt delays, timer
/// phase, palette handling).
pub enum HardwareMode {
    #[default]
    Dmg,
    Cgb,
}

impl HardwareMode {
    #[inline]
    pub const fn is_cgb(self) -> bool {
        matches!(self, HardwareMode::Cgb)
    }

    #[inline]
    pub const fn from_cgb(cgb: bool) -> Self {
        if cgb { HardwareMode::Cgb } else { HardwareMode::Dmg }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
/// Host preference for picking the hardware mode of a cartridge.
pub enum EmulationMode {
    /// Use CGB mode when the cartridge header advertises CGB support.
    #[default]
    Auto,
    ForceDmg,
    ForceCgb,
}

impl EmulationMode {
    #[inline]
    /// Resolve the hardware mode for a cartridge with the given CGB support.
    pub const fn resolve(self, cartridge_supports_cgb: bool) -> HardwareMode {
        match self {
            EmulationMode::Auto => HardwareMode::from_cgb(cartridge_supports_cgb),
            EmulationMode::ForceDmg => HardwareMode::Dmg,
            EmulationMode::ForceCgb => HardwareMode::Cgb,
        }
    }
}
