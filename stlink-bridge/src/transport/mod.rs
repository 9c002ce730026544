//! Device-interface tier of the probe driver.
//!
//! This is the lower of the two driver tiers: it loads the native USB
//! driver library, enumerates probes and hands out bridge handles bound to
//! itself. It knows nothing about the bridge command set.

use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::mgmt_protocol::bridge::Bridge;

/// A probe found during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Position in the driver's enumeration list, used to open the device
    pub index: u32,
    /// USB product id
    pub product_id: u16,
    /// Serial number (USB enumeration unique id)
    pub serial_number: String,
    /// Device already opened by another process
    pub in_use: bool,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bridge {} PID: 0X{:04x} SN:{}",
            self.index, self.product_id, self.serial_number
        )
    }
}

/// Failure statuses of the device-interface tier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("No probe connected")]
    Connect,
    #[error("USB driver library could not be loaded")]
    Dll,
    #[error("USB communication error")]
    UsbComm,
    #[error("Invalid parameter")]
    Param,
    #[error("Device is not an STLink")]
    NoStlink,
    #[error("Operation not supported by this device")]
    NotSupported,
    #[error("Permission denied ({devices} device(s) enumerated)")]
    Permission { devices: u32 },
    #[error("Enumeration failed")]
    Enum,
    #[error("Could not read device information")]
    GetInfo,
    #[error("Serial number not found")]
    SerialNotFound,
    #[error("Error closing the device")]
    Close,
}

impl InterfaceError {
    /// Numeric status in the driver's interface-tier numbering.
    pub fn code(&self) -> u32 {
        match self {
            InterfaceError::Connect => 1,
            InterfaceError::Dll => 2,
            InterfaceError::UsbComm => 3,
            InterfaceError::Param => 4,
            InterfaceError::NoStlink => 5,
            InterfaceError::NotSupported => 6,
            InterfaceError::Permission { .. } => 7,
            InterfaceError::Enum => 8,
            InterfaceError::GetInfo => 9,
            InterfaceError::SerialNotFound => 10,
            InterfaceError::Close => 11,
        }
    }
}

/// Device-interface handle of a probe driver.
///
/// Dropping the handle releases it. Bridges created by
/// [`ProbeInterface::create_bridge`] use this handle underneath and must be
/// dropped before it.
pub trait ProbeInterface: Send {
    /// Load the native USB driver library found in `dir`.
    fn load_library(&mut self, dir: &Path) -> Result<(), InterfaceError>;

    /// Refresh the device list and return the number of probes found.
    ///
    /// A permission failure still reports the number of probes seen through
    /// [`InterfaceError::Permission`]; their info remains readable.
    fn enum_devices(&mut self, clear_list: bool) -> Result<u32, InterfaceError>;

    /// Information about the probe at `index` in the last enumeration.
    fn device_info(&self, index: u32) -> Result<DeviceDescriptor, InterfaceError>;

    /// Construct a bridge handle on top of this interface.
    fn create_bridge(&mut self) -> Box<dyn Bridge>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_display() {
        let desc = DeviceDescriptor {
            index: 1,
            product_id: 0x374f,
            serial_number: "003A00253438510A34313939".to_string(),
            in_use: false,
        };
        assert_eq!(
            desc.to_string(),
            "Bridge 1 PID: 0X374f SN:003A00253438510A34313939"
        );
    }

    #[test]
    fn test_permission_error_keeps_count() {
        let err = InterfaceError::Permission { devices: 2 };
        assert_eq!(err.code(), 7);
        assert_eq!(err.to_string(), "Permission denied (2 device(s) enumerated)");
    }
}
