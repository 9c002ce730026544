//! Bridge GPIO pin types.
//!
//! The STLINK-V3 bridge exposes four GPIO pins. Configuration and values are
//! passed per pin, selected by a [`GpioMask`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::error::{Error, Result};

/// Number of GPIO pins on the bridge.
pub const GPIO_MAX_NB: usize = 4;

bitflags! {
    /// Set of bridge GPIO pins.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GpioMask: u8 {
        const GPIO_0 = 0x01;
        const GPIO_1 = 0x02;
        const GPIO_2 = 0x04;
        const GPIO_3 = 0x08;
        const ALL = 0x0F;
    }
}

impl GpioMask {
    /// Mask for a single pin, or None if the index is past the last pin.
    pub fn pin(index: usize) -> Option<Self> {
        if index < GPIO_MAX_NB {
            Some(Self::from_bits_truncate(1 << index))
        } else {
            None
        }
    }

    /// Indices of the pins in this mask, lowest first.
    pub fn pins(self) -> impl Iterator<Item = usize> {
        (0..GPIO_MAX_NB).filter(move |&i| self.bits() & (1 << i) != 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum GpioMode {
    #[default]
    Input,
    Output,
    Analog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum GpioSpeed {
    #[default]
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum GpioPull {
    #[default]
    None,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum GpioOutputType {
    #[default]
    PushPull,
    OpenDrain,
}

/// Electrical configuration of one GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub mode: GpioMode,
    pub speed: GpioSpeed,
    pub pull: GpioPull,
    pub output_type: GpioOutputType,
}

impl GpioConfig {
    /// Push-pull output with pull-up at medium speed, as used by the
    /// bridge GPIO toggle test.
    pub const fn toggle_output() -> Self {
        Self {
            mode: GpioMode::Output,
            speed: GpioSpeed::Medium,
            pull: GpioPull::Up,
            output_type: GpioOutputType::PushPull,
        }
    }

    /// Expand a configuration list into one entry per pin.
    ///
    /// A single entry applies to every pin; `GPIO_MAX_NB` entries apply in
    /// pin order. Any other length is rejected.
    pub fn per_pin(configs: &[GpioConfig]) -> Result<[GpioConfig; GPIO_MAX_NB]> {
        match configs.len() {
            1 => Ok([configs[0]; GPIO_MAX_NB]),
            GPIO_MAX_NB => {
                let mut expanded = [GpioConfig::default(); GPIO_MAX_NB];
                expanded.copy_from_slice(configs);
                Ok(expanded)
            }
            n => Err(Error::GpioConfig(format!(
                "{} configurations given, expected 1 or {}",
                n, GPIO_MAX_NB
            ))),
        }
    }
}

/// Output state of one GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum GpioValue {
    #[default]
    Reset,
    Set,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_pin_masks() {
        assert_eq!(GpioMask::pin(0), Some(GpioMask::GPIO_0));
        assert_eq!(GpioMask::pin(3), Some(GpioMask::GPIO_3));
        assert_eq!(GpioMask::pin(4), None);
        assert_eq!(GpioMask::ALL.bits(), 0x0F);
    }

    #[test]
    fn test_mask_pins_iteration() {
        let mask = GpioMask::GPIO_1 | GpioMask::GPIO_3;
        assert_eq!(mask.pins().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(GpioMask::ALL.pins().count(), GPIO_MAX_NB);
        assert_eq!(GpioMask::empty().pins().count(), 0);
    }

    #[test]
    fn test_single_config_applies_to_all_pins() {
        let expanded = GpioConfig::per_pin(&[GpioConfig::toggle_output()]).unwrap();
        assert!(expanded.iter().all(|c| *c == GpioConfig::toggle_output()));
    }

    #[test]
    fn test_full_config_list_applies_per_pin() {
        let mut configs = [GpioConfig::default(); GPIO_MAX_NB];
        configs[2] = GpioConfig::toggle_output();
        configs[3].pull = GpioPull::Down;

        let expanded = GpioConfig::per_pin(&configs).unwrap();
        assert_eq!(expanded, configs);
    }

    #[test_case(0 ; "empty list")]
    #[test_case(2 ; "two entries")]
    #[test_case(3 ; "three entries")]
    #[test_case(5 ; "more than pin count")]
    fn test_config_length_rejected(len: usize) {
        let configs = vec![GpioConfig::default(); len];
        let err = GpioConfig::per_pin(&configs).unwrap_err();
        assert!(matches!(err, Error::GpioConfig(_)), "unexpected error: {err}");
    }

    #[test]
    fn test_config_names() {
        assert_eq!(GpioSpeed::VeryHigh.to_string(), "very-high");
        assert_eq!(GpioOutputType::OpenDrain.to_string(), "open-drain");
    }
}
