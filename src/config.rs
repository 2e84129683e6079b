/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
//! The start-up configuration selecting the expansion personality.
use core::fmt;
use std::error::Error;
use std::io;
use std::path::PathBuf;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::peripherals::georam::{validate_pool_size, RamWindowError, DEFAULT_SIZE_KIB};
use crate::peripherals::sound::{SoundConfig, SoundConfigError};

/// Selects the personality of the expansion and its parameters.
///
/// With the `snapshot` feature the configuration can be deserialized, e.g. from JSON:
///
/// ```text
/// {"personality": "bank-switch", "image": "/boot/cart.crt", "jumper": true}
/// {"personality": "ram-window", "sizeKib": 4096}
/// {"personality": "sound-chips", "dualSid": false, "mixer": "sid-stereo"}
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(tag = "personality", rename_all = "kebab-case"))]
pub enum ExpansionConfig {
    /// A ROM cartridge served from a `.CRT` image.
    BankSwitch {
        image: PathBuf,
        /// The EasyFlash boot jumper.
        #[cfg_attr(feature = "snapshot", serde(default))]
        jumper: bool
    },
    /// A GeoRAM/NeoRAM compatible RAM expansion.
    RamWindow {
        #[cfg_attr(feature = "snapshot", serde(default = "default_size_kib", rename = "sizeKib"))]
        size_kib: u32
    },
    /// SID and FM sound chips.
    SoundChips(SoundConfig)
}

#[cfg(feature = "snapshot")]
fn default_size_kib() -> u32 {
    DEFAULT_SIZE_KIB
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        ExpansionConfig::RamWindow { size_kib: DEFAULT_SIZE_KIB }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The cartridge image path is empty.
    MissingImage,
    RamWindow(RamWindowError),
    Sound(SoundConfigError),
}

impl ExpansionConfig {
    /// Returns the name of the personality.
    pub fn personality(&self) -> &'static str {
        match self {
            ExpansionConfig::BankSwitch {..} => "bank-switch",
            ExpansionConfig::RamWindow {..} => "ram-window",
            ExpansionConfig::SoundChips(..) => "sound-chips",
        }
    }
    /// Checks the parameters without touching any files.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ExpansionConfig::BankSwitch { image, .. } if image.as_os_str().is_empty() => {
                Err(ConfigError::MissingImage)
            }
            ExpansionConfig::BankSwitch {..} => Ok(()),
            ExpansionConfig::RamWindow { size_kib } => Ok(validate_pool_size(*size_kib)?),
            ExpansionConfig::SoundChips(config) => Ok(config.validate()?),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::MissingImage => None,
            ConfigError::RamWindow(e) => Some(e),
            ConfigError::Sound(e) => Some(e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingImage => f.write_str("no cartridge image given"),
            ConfigError::RamWindow(e) => e.fmt(f),
            ConfigError::Sound(e) => e.fmt(f),
        }
    }
}

impl From<RamWindowError> for ConfigError {
    fn from(e: RamWindowError) -> Self {
        ConfigError::RamWindow(e)
    }
}

impl From<SoundConfigError> for ConfigError {
    fn from(e: SoundConfigError) -> Self {
        ConfigError::Sound(e)
    }
}

impl From<ConfigError> for io::Error {
    fn from(e: ConfigError) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, e)
    }
}

/// An error aborting the start-up.
#[derive(Debug)]
pub enum LoadError {
    /// The cartridge image could not be read or parsed.
    Io(io::Error),
    Config(ConfigError),
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LoadError::Io(e) => Some(e),
            LoadError::Config(e) => Some(e),
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "can't load the cartridge image: {}", e),
            LoadError::Config(e) => write!(f, "invalid configuration: {}", e),
        }
    }
}

impl From<io::Error> for LoadError {
    fn from(e: io::Error) -> Self {
        LoadError::Io(e)
    }
}

impl From<ConfigError> for LoadError {
    fn from(e: ConfigError) -> Self {
        LoadError::Config(e)
    }
}

impl From<LoadError> for io::Error {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::Io(e) => e,
            LoadError::Config(e) => e.into(),
        }
    }
}
