//! In-memory probe driver.
//!
//! Behaves like a native bridge driver with a configurable set of probes, so
//! the session and the GPIO test can run without hardware. Every handle
//! release and driver call is written to a journal that tests inspect.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::hw_trait::{GpioConfig, GpioMask, GpioMode, GpioValue, GPIO_MAX_NB};
use crate::mgmt_protocol::bridge::{
    Bridge, BridgeError, ComChannel, ComClock, FirmwareVersion, GpioReadout, OpenStatus,
};
use crate::tracing::prelude::*;
use crate::transport::{DeviceDescriptor, InterfaceError, ProbeInterface};

/// STLINK-V3SET bridge product id.
pub const STLINK_V3SET_PID: u16 = 0x374f;

/// One simulated probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualDevice {
    pub product_id: u16,
    pub serial_number: String,
    /// Already opened by someone else
    pub in_use: bool,
    /// Firmware has the bridge feature
    pub bridge_supported: bool,
    /// Open reports the old-firmware warning
    pub old_firmware: bool,
    pub firmware: FirmwareVersion,
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self {
            product_id: STLINK_V3SET_PID,
            serial_number: "VIRTUAL00000001".to_string(),
            in_use: false,
            bridge_supported: true,
            old_firmware: false,
            firmware: FirmwareVersion {
                major: 3,
                jtag: 7,
                swim: 1,
                mass_storage: 3,
                bridge: 5,
                api: 3,
                vid: 0x0483,
                pid: STLINK_V3SET_PID,
            },
        }
    }
}

/// Clocks reported per com channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualClocks {
    pub spi_khz: u32,
    pub i2c_khz: u32,
    pub can_khz: u32,
    pub gpio_khz: u32,
    pub core_khz: u32,
    /// Channel whose clock query fails
    pub failing: Option<ComChannel>,
}

impl Default for VirtualClocks {
    fn default() -> Self {
        Self {
            spi_khz: 48_000,
            i2c_khz: 48_000,
            can_khz: 48_000,
            gpio_khz: 48_000,
            core_khz: 192_000,
            failing: None,
        }
    }
}

/// Description of the simulated probe environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualProbeConfig {
    /// Loading the driver library succeeds
    pub library_available: bool,
    /// Enumeration reports a permission failure
    pub permission_denied: bool,
    pub devices: Vec<VirtualDevice>,
    /// Voltage on T_VCC; 0 simulates an unconnected target
    pub target_voltage: f32,
    pub clocks: VirtualClocks,
    /// Pins whose writes fail (bit mask)
    pub failing_gpio: u8,
}

impl Default for VirtualProbeConfig {
    fn default() -> Self {
        Self {
            library_available: true,
            permission_denied: false,
            devices: vec![VirtualDevice::default()],
            target_voltage: 3.3,
            clocks: VirtualClocks::default(),
            failing_gpio: 0,
        }
    }
}

/// Driver calls and handle releases, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeEvent {
    LibraryLoaded,
    Enumerated(u32),
    DeviceInfoRead(u32),
    Opened { index: u32, exclusive: bool },
    GpioInit(GpioMask),
    GpioWrite { mask: GpioMask, values: [GpioValue; GPIO_MAX_NB] },
    BridgeClosed(ComChannel),
    AllBridgesClosed,
    StlinkClosed,
    BridgeReleased,
    InterfaceReleased,
}

#[derive(Debug)]
struct ProbeState {
    config: VirtualProbeConfig,
    library_loaded: bool,
    enumerated: Option<u32>,
    /// Devices currently opened through a virtual bridge
    opened: Vec<u32>,
    gpio_configs: [Option<GpioConfig>; GPIO_MAX_NB],
    gpio_values: [GpioValue; GPIO_MAX_NB],
    journal: Vec<ProbeEvent>,
}

/// Handle on a simulated probe environment.
///
/// Clones share the same state, so a test can keep one to observe what the
/// interface and bridges handed to a session did.
#[derive(Debug, Clone)]
pub struct VirtualProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl VirtualProbe {
    pub fn new(config: VirtualProbeConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProbeState {
                config,
                library_loaded: false,
                enumerated: None,
                opened: Vec::new(),
                gpio_configs: [None; GPIO_MAX_NB],
                gpio_values: [GpioValue::Reset; GPIO_MAX_NB],
                journal: Vec::new(),
            })),
        }
    }

    /// A device-interface handle on this probe environment.
    pub fn interface(&self) -> Box<dyn ProbeInterface> {
        Box::new(VirtualInterface {
            state: Arc::clone(&self.state),
        })
    }

    /// Everything recorded so far.
    pub fn journal(&self) -> Vec<ProbeEvent> {
        self.state.lock().journal.clone()
    }

    /// Pin configurations last applied by `init_gpio`.
    pub fn gpio_configs(&self) -> [Option<GpioConfig>; GPIO_MAX_NB] {
        self.state.lock().gpio_configs
    }

    /// Current pin levels.
    pub fn gpio_values(&self) -> [GpioValue; GPIO_MAX_NB] {
        self.state.lock().gpio_values
    }
}

struct VirtualInterface {
    state: Arc<Mutex<ProbeState>>,
}

impl ProbeInterface for VirtualInterface {
    fn load_library(&mut self, dir: &Path) -> Result<(), InterfaceError> {
        let mut state = self.state.lock();
        if !state.config.library_available {
            return Err(InterfaceError::Dll);
        }
        debug!(dir = %dir.display(), "Virtual driver library loaded");
        state.library_loaded = true;
        state.journal.push(ProbeEvent::LibraryLoaded);
        Ok(())
    }

    fn enum_devices(&mut self, clear_list: bool) -> Result<u32, InterfaceError> {
        let mut state = self.state.lock();
        if !state.library_loaded {
            return Err(InterfaceError::Dll);
        }
        trace!(clear_list, "Enumerating virtual probes");

        let count = state.config.devices.len() as u32;
        state.enumerated = Some(count);
        state.journal.push(ProbeEvent::Enumerated(count));

        if count == 0 {
            Err(InterfaceError::Connect)
        } else if state.config.permission_denied {
            Err(InterfaceError::Permission { devices: count })
        } else {
            Ok(count)
        }
    }

    fn device_info(&self, index: u32) -> Result<DeviceDescriptor, InterfaceError> {
        let mut state = self.state.lock();
        let count = state.enumerated.ok_or(InterfaceError::GetInfo)?;
        if index >= count {
            return Err(InterfaceError::Param);
        }
        let device = &state.config.devices[index as usize];
        let desc = DeviceDescriptor {
            index,
            product_id: device.product_id,
            serial_number: device.serial_number.clone(),
            in_use: device.in_use || state.opened.contains(&index),
        };
        state.journal.push(ProbeEvent::DeviceInfoRead(index));
        Ok(desc)
    }

    fn create_bridge(&mut self) -> Box<dyn Bridge> {
        Box::new(VirtualBridge {
            state: Arc::clone(&self.state),
            exclusive: false,
            device: None,
            gpio_ready: false,
        })
    }
}

impl Drop for VirtualInterface {
    fn drop(&mut self) {
        self.state.lock().journal.push(ProbeEvent::InterfaceReleased);
    }
}

struct VirtualBridge {
    state: Arc<Mutex<ProbeState>>,
    exclusive: bool,
    device: Option<u32>,
    gpio_ready: bool,
}

impl VirtualBridge {
    fn opened_device(&self) -> Result<u32, BridgeError> {
        self.device.ok_or(BridgeError::Connect)
    }
}

impl Bridge for VirtualBridge {
    fn set_open_mode_exclusive(&mut self, exclusive: bool) {
        self.exclusive = exclusive;
    }

    fn open_stlink(&mut self, device_index: u32) -> Result<OpenStatus, BridgeError> {
        let mut state = self.state.lock();
        let count = state.enumerated.ok_or(BridgeError::Enum)?;
        if device_index >= count {
            return Err(BridgeError::NoDevice);
        }

        let device = &state.config.devices[device_index as usize];
        if !device.bridge_supported {
            return Err(BridgeError::NotSupported);
        }
        if device.in_use || state.opened.contains(&device_index) {
            return Err(BridgeError::Permission);
        }
        let old_firmware = device.old_firmware;

        state.opened.push(device_index);
        state.journal.push(ProbeEvent::Opened {
            index: device_index,
            exclusive: self.exclusive,
        });
        self.device = Some(device_index);

        Ok(if old_firmware {
            OpenStatus::OldFirmware
        } else {
            OpenStatus::Current
        })
    }

    fn close_stlink(&mut self) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        if let Some(index) = self.device.take() {
            state.opened.retain(|&i| i != index);
        }
        self.gpio_ready = false;
        state.journal.push(ProbeEvent::StlinkClosed);
        Ok(())
    }

    fn firmware_version(&self) -> Option<FirmwareVersion> {
        let index = self.device?;
        let state = self.state.lock();
        state.config.devices.get(index as usize).map(|d| d.firmware)
    }

    fn target_voltage(&mut self) -> Result<f32, BridgeError> {
        self.opened_device()?;
        Ok(self.state.lock().config.target_voltage)
    }

    fn clock(&mut self, com: ComChannel) -> Result<ComClock, BridgeError> {
        self.opened_device()?;
        let state = self.state.lock();
        let clocks = &state.config.clocks;
        if clocks.failing == Some(com) {
            return Err(BridgeError::CmdNotSupported);
        }
        let input_khz = match com {
            ComChannel::Spi => clocks.spi_khz,
            ComChannel::I2c => clocks.i2c_khz,
            ComChannel::Can => clocks.can_khz,
            ComChannel::Gpio => clocks.gpio_khz,
        };
        Ok(ComClock {
            input_khz,
            core_khz: clocks.core_khz,
        })
    }

    fn init_gpio(
        &mut self,
        mask: GpioMask,
        configs: &[GpioConfig; GPIO_MAX_NB],
    ) -> Result<(), BridgeError> {
        self.opened_device()?;
        if mask.is_empty() {
            return Err(BridgeError::Param);
        }
        let mut state = self.state.lock();
        for pin in mask.pins() {
            state.gpio_configs[pin] = Some(configs[pin]);
        }
        state.journal.push(ProbeEvent::GpioInit(mask));
        self.gpio_ready = true;
        Ok(())
    }

    fn set_reset_gpio(
        &mut self,
        mask: GpioMask,
        values: &[GpioValue; GPIO_MAX_NB],
    ) -> Result<GpioMask, BridgeError> {
        self.opened_device()?;
        if !self.gpio_ready {
            return Err(BridgeError::ComInitNotDone);
        }
        let mut state = self.state.lock();
        let failing = GpioMask::from_bits_truncate(state.config.failing_gpio);
        let mut error_mask = GpioMask::empty();

        for pin in mask.pins() {
            let pin_mask = GpioMask::pin(pin).unwrap_or_default();
            let drivable = matches!(
                state.gpio_configs[pin],
                Some(GpioConfig { mode: GpioMode::Output, .. })
            );
            if failing.contains(pin_mask) || !drivable {
                error_mask |= pin_mask;
            } else {
                state.gpio_values[pin] = values[pin];
            }
        }
        state.journal.push(ProbeEvent::GpioWrite { mask, values: *values });
        Ok(error_mask)
    }

    fn read_gpio(&mut self, mask: GpioMask) -> Result<GpioReadout, BridgeError> {
        self.opened_device()?;
        if !self.gpio_ready {
            return Err(BridgeError::ComInitNotDone);
        }
        let state = self.state.lock();
        let mut readout = GpioReadout::default();
        for pin in mask.pins() {
            if state.gpio_configs[pin].is_some_and(|c| c.mode == GpioMode::Analog) {
                readout.error_mask |= GpioMask::pin(pin).unwrap_or_default();
            } else {
                readout.values[pin] = state.gpio_values[pin];
            }
        }
        Ok(readout)
    }

    fn close_bridge(&mut self, com: ComChannel) -> Result<(), BridgeError> {
        if com == ComChannel::Gpio {
            self.gpio_ready = false;
        }
        self.state.lock().journal.push(ProbeEvent::BridgeClosed(com));
        Ok(())
    }

    fn close_all_bridges(&mut self) -> Result<(), BridgeError> {
        self.gpio_ready = false;
        self.state.lock().journal.push(ProbeEvent::AllBridgesClosed);
        Ok(())
    }
}

impl Drop for VirtualBridge {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(index) = self.device.take() {
            state.opened.retain(|&i| i != index);
        }
        state.journal.push(ProbeEvent::BridgeReleased);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(config: VirtualProbeConfig) -> (VirtualProbe, Box<dyn ProbeInterface>) {
        let probe = VirtualProbe::new(config);
        let mut iface = probe.interface();
        iface.load_library(Path::new("")).unwrap();
        (probe, iface)
    }

    #[test]
    fn test_enumeration_requires_library() {
        let probe = VirtualProbe::new(VirtualProbeConfig::default());
        let mut iface = probe.interface();
        assert_eq!(iface.enum_devices(false), Err(InterfaceError::Dll));
    }

    #[test]
    fn test_missing_library() {
        let probe = VirtualProbe::new(VirtualProbeConfig {
            library_available: false,
            ..Default::default()
        });
        let mut iface = probe.interface();
        assert_eq!(iface.load_library(Path::new("")), Err(InterfaceError::Dll));
    }

    #[test]
    fn test_no_devices_is_connect_error() {
        let (_probe, mut iface) = loaded(VirtualProbeConfig {
            devices: Vec::new(),
            ..Default::default()
        });
        assert_eq!(iface.enum_devices(false), Err(InterfaceError::Connect));
    }

    #[test]
    fn test_open_marks_device_in_use() {
        let (_probe, mut iface) = loaded(VirtualProbeConfig::default());
        assert_eq!(iface.enum_devices(false), Ok(1));
        let mut bridge = iface.create_bridge();
        assert_eq!(bridge.open_stlink(0), Ok(OpenStatus::Current));
        assert!(iface.device_info(0).unwrap().in_use);

        // A second bridge cannot take the same probe
        let mut other = iface.create_bridge();
        assert_eq!(other.open_stlink(0), Err(BridgeError::Permission));

        bridge.close_stlink().unwrap();
        assert!(!iface.device_info(0).unwrap().in_use);
    }

    #[test]
    fn test_gpio_write_reports_failing_and_input_pins() {
        let (probe, mut iface) = loaded(VirtualProbeConfig {
            failing_gpio: GpioMask::GPIO_1.bits(),
            ..Default::default()
        });
        iface.enum_devices(false).unwrap();
        let mut bridge = iface.create_bridge();
        bridge.open_stlink(0).unwrap();

        let mut configs = [GpioConfig::toggle_output(); GPIO_MAX_NB];
        configs[3] = GpioConfig::default();
        bridge.init_gpio(GpioMask::ALL, &configs).unwrap();

        let errors = bridge
            .set_reset_gpio(GpioMask::ALL, &[GpioValue::Set; GPIO_MAX_NB])
            .unwrap();
        assert_eq!(errors, GpioMask::GPIO_1 | GpioMask::GPIO_3);
        assert_eq!(
            probe.gpio_values(),
            [GpioValue::Set, GpioValue::Reset, GpioValue::Set, GpioValue::Reset]
        );

        let readout = bridge.read_gpio(GpioMask::GPIO_0 | GpioMask::GPIO_1).unwrap();
        assert_eq!(readout.values[0], GpioValue::Set);
        assert_eq!(readout.values[1], GpioValue::Reset);
        assert!(readout.error_mask.is_empty());
    }

    #[test]
    fn test_gpio_write_before_init() {
        let (_probe, mut iface) = loaded(VirtualProbeConfig::default());
        iface.enum_devices(false).unwrap();
        let mut bridge = iface.create_bridge();
        bridge.open_stlink(0).unwrap();
        assert_eq!(
            bridge.set_reset_gpio(GpioMask::ALL, &[GpioValue::Set; GPIO_MAX_NB]),
            Err(BridgeError::ComInitNotDone)
        );
    }

    #[test]
    fn test_config_from_toml() {
        let config: VirtualProbeConfig = toml::from_str(
            r#"
            target_voltage = 0.0
            failing_gpio = 4

            [[devices]]
            serial_number = "A"
            in_use = true

            [[devices]]
            serial_number = "B"
            old_firmware = true

            [clocks]
            failing = "can"
            "#,
        )
        .unwrap();

        assert_eq!(config.devices.len(), 2);
        assert!(config.devices[0].in_use);
        assert_eq!(config.devices[1].product_id, STLINK_V3SET_PID);
        assert!(config.devices[1].old_firmware);
        assert_eq!(config.clocks.failing, Some(ComChannel::Can));
        assert_eq!(config.clocks.core_khz, 192_000);
        assert!(config.library_available);
    }
}
