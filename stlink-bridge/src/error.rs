//! Common error types for stlink-bridge.
//!
//! Driver failures arrive as [`BridgeError`] (the bridge tier, which already
//! absorbs interface-tier failures through its `From` mapping). This module
//! adds the failures detected by the session itself.

use thiserror::Error;

use crate::mgmt_protocol::bridge::BridgeError;
use crate::session::SessionState;

/// Main error type for stlink-bridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Status returned by the bridge driver
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Driver reported success but the target voltage reads 0 V
    #[error("Target voltage is 0 V (check that T_VCC is connected to the target)")]
    NoTargetVoltage,

    /// Every enumerated probe is already in use
    #[error("No free bridge device among {0} enumerated")]
    NoFreeDevice(usize),

    /// GPIO configuration rejected before reaching the driver
    #[error("GPIO configuration error: {0}")]
    GpioConfig(String),

    /// Operation called out of lifecycle order
    #[error("Operation '{operation}' not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Vendor status code best describing this error.
    ///
    /// Session-level failures map onto the closest bridge status so the
    /// console verdict stays in the driver's numbering.
    pub fn status_code(&self) -> u32 {
        match self {
            Error::Bridge(e) => e.code(),
            Error::NoTargetVoltage => BridgeError::TargetCmd.code(),
            Error::NoFreeDevice(_) => BridgeError::NoDevice.code(),
            Error::GpioConfig(_) => BridgeError::Param.code(),
            Error::InvalidState { .. } => BridgeError::ComCmdOrder.code(),
            Error::Config(_) => BridgeError::Param.code(),
        }
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Bridge(BridgeError::NotSupported).status_code(), 12);
        assert_eq!(Error::NoTargetVoltage.status_code(), 6);
        assert_eq!(Error::NoFreeDevice(2).status_code(), 4);
        assert_eq!(Error::GpioConfig("x".into()).status_code(), 7);
    }

    #[test]
    fn test_invalid_state_message() {
        let err = Error::InvalidState {
            operation: "write_gpio",
            state: SessionState::Opened,
        };
        assert_eq!(err.to_string(), "Operation 'write_gpio' not allowed in state Opened");
    }
}
