use crate::gpio::SYSFS_GPIO_ROOT;
use crate::spi::SpiSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub spi: SpiConfig,
    pub gpio: GpioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiConfig {
    /// Device node, e.g. /dev/spidev0.0. The first spidev under /dev is
    /// used when unset.
    pub device: Option<PathBuf>,
    #[serde(flatten)]
    pub settings: SpiSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub sysfs_root: PathBuf,
    /// Data/command select line
    pub dc_pin: u32,
    pub reset_pin: u32,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            device: None,
            settings: SpiSettings::default(),
        }
    }
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(SYSFS_GPIO_ROOT),
            dc_pin: 25,
            reset_pin: 27,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spi: SpiConfig::default(),
            gpio: GpioConfig::default(),
        }
    }
}

impl Config {
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse configuration file")
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).context(format!("Failed to read config file: {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.spi.device, None);
        assert_eq!(config.spi.settings, SpiSettings::default());
        assert_eq!(config.gpio.sysfs_root, Path::new("/sys/class/gpio"));
    }

    #[test]
    fn test_partial_yaml() {
        let config = Config::parse(
            "spi:\n  device: /dev/spidev0.1\n  speed_hz: 31000000\ngpio:\n  dc_pin: 24\n",
        )
        .unwrap();
        assert_eq!(config.spi.device, Some(PathBuf::from("/dev/spidev0.1")));
        assert_eq!(config.spi.settings.speed_hz, 31_000_000);
        assert_eq!(config.spi.settings.bits_per_word, 8);
        assert_eq!(config.gpio.dc_pin, 24);
        assert_eq!(config.gpio.reset_pin, 27);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.yaml")).unwrap();
        assert_eq!(config.spi.settings.mode, 0);
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(Config::parse("spi: [").is_err());
    }
}
