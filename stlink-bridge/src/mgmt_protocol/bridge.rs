//! Bridge tier call contract and status codes.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use thiserror::Error;

use crate::hw_trait::{GpioConfig, GpioMask, GpioValue, GPIO_MAX_NB};
use crate::transport::InterfaceError;

/// Communication channels multiplexed by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum ComChannel {
    #[strum(serialize = "SPI")]
    Spi,
    #[strum(serialize = "I2C")]
    I2c,
    #[strum(serialize = "CAN")]
    Can,
    #[strum(serialize = "GPIO")]
    Gpio,
}

/// Clocks reported for one com channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComClock {
    /// Input clock of the com peripheral (kHz)
    pub input_khz: u32,
    /// Probe core clock, HCLK (kHz)
    pub core_khz: u32,
}

/// Firmware version of an opened probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareVersion {
    pub major: u8,
    pub jtag: u8,
    pub swim: u8,
    pub mass_storage: u8,
    pub bridge: u8,
    pub api: u8,
    pub vid: u16,
    pub pid: u16,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "V{}J{}M{}B{}S{}",
            self.major, self.jtag, self.mass_storage, self.bridge, self.swim
        )
    }
}

/// Successful outcome of opening a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    /// Firmware is recent enough
    Current,
    /// Firmware is older than the driver expects but still usable
    OldFirmware,
}

/// Result of reading bridge GPIO pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpioReadout {
    /// Pin values, indexed by pin number; pins outside the mask are Reset
    pub values: [GpioValue; GPIO_MAX_NB],
    /// Pins that could not be read
    pub error_mask: GpioMask,
}

/// Failure statuses of the bridge tier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("USB connection error")]
    Connect,
    #[error("USB driver library error")]
    Dll,
    #[error("USB communication error")]
    UsbComm,
    #[error("No bridge device")]
    NoDevice,
    #[error("Target command error")]
    TargetCmd,
    #[error("Invalid parameter")]
    Param,
    #[error("Command not supported by this firmware")]
    CmdNotSupported,
    #[error("Could not read device information")]
    GetInfo,
    #[error("Probe serial number not found")]
    SerialNotFound,
    #[error("Device is not an STLink")]
    NoStlink,
    #[error("Bridge not supported by this device")]
    NotSupported,
    #[error("Permission denied")]
    Permission,
    #[error("Enumeration error")]
    Enum,
    #[error("Target command timeout")]
    TargetCmdTimeout,
    #[error("Com channel not initialised")]
    ComInitNotDone,
    #[error("Com command out of order")]
    ComCmdOrder,
    #[error("GPIO error")]
    Gpio,
    #[error("Bridge busy")]
    CmdBusy,
    #[error("Error closing the bridge")]
    Close,
    #[error("Device interface error")]
    Interface,
}

impl BridgeError {
    /// Numeric status in the driver's bridge-tier numbering.
    ///
    /// Code 0 is success and 5 is the old-firmware warning, neither of which
    /// is an error.
    pub fn code(&self) -> u32 {
        match self {
            BridgeError::Connect => 1,
            BridgeError::Dll => 2,
            BridgeError::UsbComm => 3,
            BridgeError::NoDevice => 4,
            BridgeError::TargetCmd => 6,
            BridgeError::Param => 7,
            BridgeError::CmdNotSupported => 8,
            BridgeError::GetInfo => 9,
            BridgeError::SerialNotFound => 10,
            BridgeError::NoStlink => 11,
            BridgeError::NotSupported => 12,
            BridgeError::Permission => 13,
            BridgeError::Enum => 14,
            BridgeError::TargetCmdTimeout => 20,
            BridgeError::ComInitNotDone => 21,
            BridgeError::ComCmdOrder => 22,
            BridgeError::Gpio => 26,
            BridgeError::CmdBusy => 28,
            BridgeError::Close => 29,
            BridgeError::Interface => 30,
        }
    }
}

impl From<InterfaceError> for BridgeError {
    fn from(err: InterfaceError) -> Self {
        match err {
            InterfaceError::Connect => BridgeError::Connect,
            InterfaceError::Dll => BridgeError::Dll,
            InterfaceError::UsbComm => BridgeError::UsbComm,
            InterfaceError::Param => BridgeError::Param,
            InterfaceError::NoStlink => BridgeError::NoStlink,
            InterfaceError::NotSupported => BridgeError::NotSupported,
            InterfaceError::Permission { .. } => BridgeError::Permission,
            InterfaceError::Enum => BridgeError::Enum,
            InterfaceError::GetInfo => BridgeError::GetInfo,
            InterfaceError::SerialNotFound => BridgeError::SerialNotFound,
            InterfaceError::Close => BridgeError::Close,
        }
    }
}

/// Bridge handle of a probe driver.
///
/// Created from a [`crate::transport::ProbeInterface`] and only valid while
/// that interface is alive. Dropping the handle releases it.
pub trait Bridge: Send {
    /// Select exclusive or shared open mode for the next `open_stlink`.
    fn set_open_mode_exclusive(&mut self, exclusive: bool);

    /// Open the probe at `device_index` of the interface's enumeration.
    fn open_stlink(&mut self, device_index: u32) -> Result<OpenStatus, BridgeError>;

    /// Close the probe USB connection.
    fn close_stlink(&mut self) -> Result<(), BridgeError>;

    /// Firmware version of the opened probe, None before a successful open.
    fn firmware_version(&self) -> Option<FirmwareVersion>;

    /// Voltage seen on the T_VCC pin of the debug connector, in volts.
    fn target_voltage(&mut self) -> Result<f32, BridgeError>;

    /// Input and core clocks for a com channel.
    fn clock(&mut self, com: ComChannel) -> Result<ComClock, BridgeError>;

    /// Configure the pins in `mask`, one configuration per pin.
    fn init_gpio(
        &mut self,
        mask: GpioMask,
        configs: &[GpioConfig; GPIO_MAX_NB],
    ) -> Result<(), BridgeError>;

    /// Drive the pins in `mask` to `values` (indexed by pin). Returns the
    /// pins that failed.
    fn set_reset_gpio(
        &mut self,
        mask: GpioMask,
        values: &[GpioValue; GPIO_MAX_NB],
    ) -> Result<GpioMask, BridgeError>;

    /// Read the pins in `mask`.
    fn read_gpio(&mut self, mask: GpioMask) -> Result<GpioReadout, BridgeError>;

    /// Close one com channel.
    fn close_bridge(&mut self, com: ComChannel) -> Result<(), BridgeError>;

    /// Close every com channel.
    fn close_all_bridges(&mut self) -> Result<(), BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(InterfaceError::Connect, BridgeError::Connect ; "connect")]
    #[test_case(InterfaceError::Dll, BridgeError::Dll ; "library")]
    #[test_case(InterfaceError::Permission { devices: 3 }, BridgeError::Permission ; "permission")]
    #[test_case(InterfaceError::NotSupported, BridgeError::NotSupported ; "not supported")]
    #[test_case(InterfaceError::Close, BridgeError::Close ; "close")]
    fn test_interface_status_mapping(from: InterfaceError, expected: BridgeError) {
        assert_eq!(BridgeError::from(from), expected);
    }

    #[test]
    fn test_codes_skip_success_and_warning() {
        use std::collections::HashSet;
        let all = [
            BridgeError::Connect,
            BridgeError::Dll,
            BridgeError::UsbComm,
            BridgeError::NoDevice,
            BridgeError::TargetCmd,
            BridgeError::Param,
            BridgeError::CmdNotSupported,
            BridgeError::GetInfo,
            BridgeError::SerialNotFound,
            BridgeError::NoStlink,
            BridgeError::NotSupported,
            BridgeError::Permission,
            BridgeError::Enum,
            BridgeError::TargetCmdTimeout,
            BridgeError::ComInitNotDone,
            BridgeError::ComCmdOrder,
            BridgeError::Gpio,
            BridgeError::CmdBusy,
            BridgeError::Close,
            BridgeError::Interface,
        ];
        let codes: HashSet<u32> = all.iter().map(BridgeError::code).collect();
        assert_eq!(codes.len(), all.len(), "codes must be unique");
        assert!(!codes.contains(&0));
        assert!(!codes.contains(&5));
    }

    #[test]
    fn test_channel_names() {
        use strum::IntoEnumIterator;
        let names: Vec<String> = ComChannel::iter().map(|c| c.to_string()).collect();
        assert_eq!(names, ["SPI", "I2C", "CAN", "GPIO"]);
    }

    #[test]
    fn test_firmware_display() {
        let version = FirmwareVersion {
            major: 3,
            jtag: 7,
            swim: 1,
            mass_storage: 3,
            bridge: 5,
            ..Default::default()
        };
        assert_eq!(version.to_string(), "V3J7M3B5S1");
    }
}
