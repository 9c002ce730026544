//! Configuration management for stlink-bridge.
//!
//! Configuration comes from a TOML file named by `STLINK_BRIDGE_CONFIG`, or
//! from built-in defaults when the variable is unset. A few environment
//! variables override individual settings afterwards.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::virtual_probe::VirtualProbeConfig;
use crate::hw_trait::GpioConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "STLINK_BRIDGE_CONFIG";
/// Environment override for `probe.backend`.
pub const BACKEND_ENV: &str = "STLINK_BRIDGE_BACKEND";
/// Environment override for `gpio_test.toggle_cycles`.
pub const TOGGLE_CYCLES_ENV: &str = "STLINK_BRIDGE_TOGGLE_CYCLES";

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Probe and driver selection
    pub probe: ProbeConfig,

    /// Bridge GPIO test settings
    pub gpio_test: GpioTestConfig,

    /// Simulated probe used by the `virtual` backend
    #[serde(rename = "virtual")]
    pub virtual_probe: VirtualProbeConfig,
}

/// Probe and driver selection.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Registered backend name
    pub backend: String,

    /// Directory holding the native USB driver library; empty means the
    /// loader's default search path
    pub library_path: Option<PathBuf>,

    /// Open the probe exclusively
    pub exclusive: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            backend: "virtual".to_string(),
            library_path: None,
            exclusive: true,
        }
    }
}

/// Bridge GPIO test settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GpioTestConfig {
    /// Set/reset cycles to run; unset runs until interrupted
    pub toggle_cycles: Option<u32>,

    /// Delay between writes to consecutive pins (ms)
    pub step_ms: u64,

    /// Time pins stay all set or all reset (ms)
    pub hold_ms: u64,

    /// Configuration applied to every pin
    pub pin: GpioConfig,
}

impl Default for GpioTestConfig {
    fn default() -> Self {
        Self {
            toggle_cycles: None,
            step_ms: 1,
            hold_ms: 3000,
            pin: GpioConfig::toggle_output(),
        }
    }
}

impl GpioTestConfig {
    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }

    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

impl Config {
    /// Load configuration from the file named by `STLINK_BRIDGE_CONFIG`, or
    /// defaults, then apply environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load_from(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply overrides looked up by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup(BACKEND_ENV) {
            self.probe.backend = backend;
        }

        if let Some(cycles) = lookup(TOGGLE_CYCLES_ENV) {
            let cycles = cycles.trim();
            self.gpio_test.toggle_cycles = if cycles.is_empty() {
                None
            } else {
                match cycles.parse::<u32>() {
                    Ok(n) => Some(n),
                    Err(e) => bail!(
                        "{} must be a cycle count, got '{}': {}",
                        TOGGLE_CYCLES_ENV,
                        cycles,
                        e
                    ),
                }
            };
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw_trait::{GpioMode, GpioPull};
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.probe.backend, "virtual");
        assert!(config.probe.exclusive);
        assert_eq!(config.gpio_test.toggle_cycles, None);
        assert_eq!(config.gpio_test.hold(), Duration::from_secs(3));
        assert_eq!(config.gpio_test.pin, GpioConfig::toggle_output());
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_file() {
        let config = Config::from_toml(
            r#"
            [probe]
            exclusive = false
            library_path = "/opt/stlink/lib"

            [gpio_test]
            toggle_cycles = 2
            hold_ms = 10

            [gpio_test.pin]
            mode = "output"
            pull = "down"

            [virtual]
            target_voltage = 1.8
            "#,
        )
        .unwrap();

        assert_eq!(config.probe.backend, "virtual");
        assert!(!config.probe.exclusive);
        assert_eq!(config.probe.library_path, Some(PathBuf::from("/opt/stlink/lib")));
        assert_eq!(config.gpio_test.toggle_cycles, Some(2));
        assert_eq!(config.gpio_test.step_ms, 1);
        assert_eq!(config.gpio_test.pin.mode, GpioMode::Output);
        assert_eq!(config.gpio_test.pin.pull, GpioPull::Down);
        assert_eq!(config.virtual_probe.target_voltage, 1.8);
        assert_eq!(config.virtual_probe.devices.len(), 1);
    }

    #[test]
    fn test_invalid_file() {
        assert!(Config::from_toml("[gpio_test]\nhold_ms = \"long\"").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load_from(Path::new("/nonexistent/stlink-bridge.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("reading config file"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup_from(&[
                (BACKEND_ENV, "native"),
                (TOGGLE_CYCLES_ENV, " 5 "),
            ]))
            .unwrap();
        assert_eq!(config.probe.backend, "native");
        assert_eq!(config.gpio_test.toggle_cycles, Some(5));

        config
            .apply_overrides(lookup_from(&[(TOGGLE_CYCLES_ENV, "")]))
            .unwrap();
        assert_eq!(config.gpio_test.toggle_cycles, None);
    }

    #[test]
    fn test_bad_cycle_override() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup_from(&[(TOGGLE_CYCLES_ENV, "forever")]))
            .unwrap_err();
        assert!(err.to_string().contains(TOGGLE_CYCLES_ENV));
    }
}
