//! Session lifecycle and GPIO test flow for STLINK-V3 bridge probes.
//!
//! The probe driver is reached through two traits:
//! [`transport::ProbeInterface`] for the device-interface tier and
//! [`mgmt_protocol::bridge::Bridge`] for the bridge tier.
//! [`session::BridgeSession`] pairs the two handles and releases them in
//! order, and [`bridge_test`] runs the console GPIO test on a session.

pub mod backend;
pub mod config;
pub mod error;
pub mod hw_trait;
pub mod mgmt_protocol;
pub mod session;
pub mod tracing;
pub mod transport;
