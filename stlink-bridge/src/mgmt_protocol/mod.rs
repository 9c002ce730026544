//! Bridge management protocol.
//!
//! The bridge is the upper driver tier: once a probe is opened through it,
//! it queries firmware, target voltage and com clocks, and drives the
//! bridge GPIO pins. The command framing on the wire belongs to the native
//! driver; this module only fixes the call contract.

pub mod bridge;

pub use bridge::{
    Bridge, BridgeError, ComChannel, ComClock, FirmwareVersion, GpioReadout, OpenStatus,
};
