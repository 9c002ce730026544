//! Bridge session lifecycle.
//!
//! A [`BridgeSession`] owns the device-interface handle of a probe driver and
//! the bridge handle built on top of it. It walks the linear lifecycle
//! Created, Bound, Opened, Configured, Operating, Closed and reports the
//! status of every driver call to the caller, which decides whether to go on.
//! Nothing is retried.
//!
//! The bridge handle is always released before the interface handle. Both
//! [`BridgeSession::close`] and `Drop` enforce this, so early returns and
//! unwinding keep the order too.

use std::path::Path;

use strum::Display;

use crate::error::{Error, Result};
use crate::hw_trait::{GpioConfig, GpioMask, GpioValue, GPIO_MAX_NB};
use crate::mgmt_protocol::bridge::{
    Bridge, BridgeError, ComChannel, ComClock, FirmwareVersion, GpioReadout, OpenStatus,
};
use crate::tracing::prelude::*;
use crate::transport::{DeviceDescriptor, InterfaceError, ProbeInterface};

/// Lifecycle position of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    /// Holds an interface handle, nothing chosen yet
    Created,
    /// A free device was chosen from the enumeration
    Bound,
    /// Probe opened through the bridge
    Opened,
    /// GPIO pins configured
    Configured,
    /// GPIO pins written at least once
    Operating,
    /// Handles released
    Closed,
}

const BEFORE_OPEN: &[SessionState] = &[SessionState::Created, SessionState::Bound];
const OPENED: &[SessionState] = &[
    SessionState::Opened,
    SessionState::Configured,
    SessionState::Operating,
];
const GPIO_READY: &[SessionState] = &[SessionState::Configured, SessionState::Operating];

/// Paired interface and bridge handles of one probe connection.
pub struct BridgeSession {
    // Released before `interface` in close().
    bridge: Option<Box<dyn Bridge>>,
    interface: Option<Box<dyn ProbeInterface>>,
    state: SessionState,
    exclusive: bool,
    old_firmware: Option<FirmwareVersion>,
}

impl BridgeSession {
    /// Create a session around a device-interface handle.
    pub fn new(interface: Box<dyn ProbeInterface>) -> Self {
        Self {
            bridge: None,
            interface: Some(interface),
            state: SessionState::Created,
            exclusive: false,
            old_firmware: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Open mode used by the last `open`.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Firmware version if `open` reported the old-firmware warning.
    pub fn old_firmware_warning(&self) -> Option<FirmwareVersion> {
        self.old_firmware
    }

    /// Load the native USB driver library from `dir`.
    pub fn load_library(&mut self, dir: &Path) -> Result<()> {
        let interface = self.interface_mut("load_library", BEFORE_OPEN)?;
        interface.load_library(dir).map_err(BridgeError::from)?;
        debug!(dir = %dir.display(), "Driver library loaded");
        Ok(())
    }

    /// Enumerate the connected probes.
    ///
    /// On a permission failure the probes that could be seen are still
    /// logged before the error is returned.
    pub fn enumerate(&mut self) -> Result<Vec<DeviceDescriptor>> {
        let interface = self.interface_mut("enumerate", BEFORE_OPEN)?;

        let (count, denied) = match interface.enum_devices(false) {
            Ok(count) => (count, None),
            Err(InterfaceError::Permission { devices }) => {
                (devices, Some(InterfaceError::Permission { devices }))
            }
            Err(InterfaceError::Connect) => {
                warn!("No STLink BRIDGE device detected");
                return Err(BridgeError::Connect.into());
            }
            Err(e) => {
                error!(error = %e, "Enumeration error");
                return Err(BridgeError::from(e).into());
            }
        };

        info!("{} BRIDGE device found", count);
        let mut devices = Vec::with_capacity(count as usize);
        for index in 0..count {
            match interface.device_info(index) {
                Ok(desc) => {
                    info!(in_use = desc.in_use, "{}", desc);
                    devices.push(desc);
                }
                // The permission status outranks a failed lookup.
                Err(e) if denied.is_some() => {
                    warn!(index, error = %e, "Cannot read BRIDGE device info");
                }
                Err(e) => return Err(BridgeError::from(e).into()),
            }
        }

        if let Some(e) = denied {
            warn!(error = %e, "Insufficient permission on USB devices");
            return Err(BridgeError::from(e).into());
        }
        if devices.is_empty() {
            warn!("No STLink BRIDGE device detected");
            return Err(BridgeError::Connect.into());
        }
        Ok(devices)
    }

    /// Bind the session to the first device that is not in use.
    pub fn select_free_device(&mut self, devices: &[DeviceDescriptor]) -> Result<DeviceDescriptor> {
        self.check_state("select_free_device", BEFORE_OPEN)?;
        let device = first_free_device(devices)
            .cloned()
            .ok_or(Error::NoFreeDevice(devices.len()))?;

        info!("SELECTED BRIDGE Stlink SN:{}", device.serial_number);
        self.state = SessionState::Bound;
        Ok(device)
    }

    /// Build the bridge on the interface and open the probe at
    /// `device_index`.
    ///
    /// The old-firmware warning is a success: it is returned as
    /// [`OpenStatus::OldFirmware`], remembered on the session and later
    /// calls proceed normally.
    ///
    /// A failed open releases the bridge it built and leaves the session
    /// where it was, so another device can be tried.
    pub fn open(&mut self, device_index: u32, exclusive: bool) -> Result<OpenStatus> {
        let interface = self.interface_mut("open", BEFORE_OPEN)?;
        let mut bridge = interface.create_bridge();
        bridge.set_open_mode_exclusive(exclusive);

        let status = match bridge.open_stlink(device_index) {
            Ok(status) => status,
            Err(e) => {
                // The interface is still held here, so the bridge goes first.
                if let Err(close_err) = bridge.close_stlink() {
                    trace!(error = %close_err, "Closing a probe that failed to open");
                }
                drop(bridge);
                trace!("Bridge handle released.");
                self.log_open_failure(device_index, &e);
                return Err(e.into());
            }
        };

        let firmware = bridge.firmware_version();
        self.bridge = Some(bridge);
        self.exclusive = exclusive;
        self.state = SessionState::Opened;

        match status {
            OpenStatus::Current => {
                debug!(device_index, exclusive, firmware = ?firmware, "Probe opened");
            }
            OpenStatus::OldFirmware => {
                warn!(device_index, firmware = ?firmware, "Probe firmware is outdated");
                self.old_firmware = Some(firmware.unwrap_or_default());
            }
        }
        Ok(status)
    }

    fn log_open_failure(&self, device_index: u32, err: &BridgeError) {
        if *err != BridgeError::NotSupported {
            error!(device_index, error = %err, "Failed to open probe");
            return;
        }
        let info = self
            .interface
            .as_ref()
            .map(|interface| interface.device_info(device_index));
        match info {
            Some(Ok(desc)) => warn!(
                "BRIDGE not supported PID: 0X{:04x} SN:{}",
                desc.product_id, desc.serial_number
            ),
            Some(Err(e)) => warn!(error = %e, device_index, "BRIDGE not supported"),
            None => warn!(device_index, "BRIDGE not supported"),
        }
    }

    /// Firmware version of the opened probe.
    pub fn firmware_version(&self) -> Option<FirmwareVersion> {
        self.bridge.as_ref().and_then(|b| b.firmware_version())
    }

    /// Voltage on the target's T_VCC pin.
    ///
    /// A reading of exactly 0 V means the pin is not connected and is an
    /// error even though the driver succeeded.
    pub fn target_voltage(&mut self) -> Result<f32> {
        let voltage = self.bridge_mut("target_voltage", OPENED)?.target_voltage()?;
        if voltage == 0.0 {
            return Err(Error::NoTargetVoltage);
        }
        Ok(voltage)
    }

    /// Input and core clocks of a com channel, in kHz.
    pub fn clock_khz(&mut self, com: ComChannel) -> Result<ComClock> {
        Ok(self.bridge_mut("clock_khz", OPENED)?.clock(com)?)
    }

    /// Configure the pins in `mask`.
    ///
    /// `configs` holds one entry for all pins or exactly `GPIO_MAX_NB`
    /// entries, one per pin. Other lengths are rejected without calling the
    /// driver.
    pub fn init_gpio(&mut self, mask: GpioMask, configs: &[GpioConfig]) -> Result<()> {
        self.check_state("init_gpio", OPENED)?;
        let per_pin = GpioConfig::per_pin(configs)?;
        self.bridge_mut("init_gpio", OPENED)?.init_gpio(mask, &per_pin)?;
        debug!(mask = mask.bits(), "GPIO configured");
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Drive the pins in `mask` to `values`, indexed by pin number.
    ///
    /// Returns the pins the bridge could not drive; an empty mask means all
    /// writes took effect.
    pub fn write_gpio(
        &mut self,
        mask: GpioMask,
        values: &[GpioValue; GPIO_MAX_NB],
    ) -> Result<GpioMask> {
        let error_mask = self.bridge_mut("write_gpio", GPIO_READY)?.set_reset_gpio(mask, values)?;
        trace!(mask = mask.bits(), values = ?values, "GPIO write");
        if !error_mask.is_empty() {
            warn!(mask = mask.bits(), failed = error_mask.bits(), "GPIO write failed on some pins");
        }
        self.state = SessionState::Operating;
        Ok(error_mask)
    }

    /// Read the pins in `mask`.
    pub fn read_gpio(&mut self, mask: GpioMask) -> Result<GpioReadout> {
        Ok(self.bridge_mut("read_gpio", GPIO_READY)?.read_gpio(mask)?)
    }

    /// Close one com channel of the bridge. Closing GPIO returns the session
    /// to Opened.
    pub fn close_bridge(&mut self, com: ComChannel) -> Result<()> {
        self.bridge_mut("close_bridge", OPENED)?.close_bridge(com)?;
        if com == ComChannel::Gpio {
            self.state = SessionState::Opened;
        }
        Ok(())
    }

    /// Close the probe and release both handles, bridge first.
    ///
    /// Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(mut bridge) = self.bridge.take() {
            if let Err(e) = bridge.close_all_bridges() {
                warn!(error = %e, "Failed to close bridge com channels");
            }
            if let Err(e) = bridge.close_stlink() {
                warn!(error = %e, "Failed to close probe");
            }
            drop(bridge);
            trace!("Bridge handle released.");
        }
        if let Some(interface) = self.interface.take() {
            drop(interface);
            trace!("Interface handle released.");
        }
        if self.state != SessionState::Closed {
            debug!(from = %self.state, "Session closed");
            self.state = SessionState::Closed;
        }
    }

    fn check_state(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn interface_mut(
        &mut self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<&mut Box<dyn ProbeInterface>> {
        self.check_state(operation, allowed)?;
        let state = self.state;
        self.interface
            .as_mut()
            .ok_or(Error::InvalidState { operation, state })
    }

    fn bridge_mut(
        &mut self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<&mut Box<dyn Bridge>> {
        self.check_state(operation, allowed)?;
        let state = self.state;
        self.bridge
            .as_mut()
            .ok_or(Error::InvalidState { operation, state })
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// First descriptor not marked in use.
pub fn first_free_device(devices: &[DeviceDescriptor]) -> Option<&DeviceDescriptor> {
    devices.iter().find(|d| !d.in_use)
}
