//! Hardware abstraction types shared by the driver boundary and the session.
//!
//! Only GPIO is exercised through the bridge here; SPI, I2C and CAN appear
//! solely as com channels whose clocks can be queried.

pub mod gpio;

pub use gpio::{
    GpioConfig, GpioMask, GpioMode, GpioOutputType, GpioPull, GpioSpeed, GpioValue, GPIO_MAX_NB,
};
