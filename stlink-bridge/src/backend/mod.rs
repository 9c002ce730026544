//! Probe driver backends.
//!
//! A backend turns the configuration into a device-interface handle. Backends
//! register themselves with `inventory::submit!` and are picked by the name
//! in `[probe] backend`.

pub mod virtual_probe;

use crate::{
    config::Config,
    error::{Error, Result},
    tracing::prelude::*,
    transport::ProbeInterface,
};

/// Registration record of a probe backend.
pub struct BackendDescriptor {
    /// Name used in the configuration
    pub name: &'static str,
    /// One-line description for logs
    pub description: &'static str,
    /// Build a device-interface handle
    pub create_fn: fn(&Config) -> Result<Box<dyn ProbeInterface>>,
}

inventory::collect!(BackendDescriptor);

/// Registry that uses inventory to find registered backends.
pub struct BackendRegistry;

impl BackendRegistry {
    /// Find the backend registered under `name`.
    pub fn find(&self, name: &str) -> Option<&'static BackendDescriptor> {
        inventory::iter::<BackendDescriptor>().find(|desc| desc.name == name)
    }

    /// Names of all registered backends, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = inventory::iter::<BackendDescriptor>()
            .map(|desc| desc.name)
            .collect();
        names.sort_unstable();
        names
    }

    /// Create the interface of the backend selected in `config`.
    pub fn create(&self, config: &Config) -> Result<Box<dyn ProbeInterface>> {
        let name = config.probe.backend.as_str();
        let Some(descriptor) = self.find(name) else {
            return Err(Error::Config(format!(
                "unknown probe backend '{}' (available: {})",
                name,
                self.names().join(", ")
            )));
        };
        debug!(
            backend = descriptor.name,
            description = descriptor.description,
            "Creating probe interface"
        );
        (descriptor.create_fn)(config)
    }
}

fn create_virtual(config: &Config) -> Result<Box<dyn ProbeInterface>> {
    let probe = virtual_probe::VirtualProbe::new(config.virtual_probe.clone());
    Ok(probe.interface())
}

inventory::submit! {
    BackendDescriptor {
        name: "virtual",
        description: "In-memory probe described by the [virtual] config section",
        create_fn: create_virtual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_virtual_backend_registered() {
        let registry = BackendRegistry;
        assert!(registry.find("virtual").is_some());
        assert!(registry.names().contains(&"virtual"));
    }

    #[test]
    fn test_create_from_config() {
        let config = Config::default();
        let mut iface = BackendRegistry.create(&config).unwrap();
        iface.load_library(Path::new("")).unwrap();
        assert_eq!(iface.enum_devices(false).unwrap(), 1);
    }

    #[test]
    fn test_unknown_backend() {
        let mut config = Config::default();
        config.probe.backend = "stlink-usb".to_string();
        let err = BackendRegistry.create(&config).err().unwrap();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("virtual")), "{err}");
    }
}
