//! Runtime registration of transport drivers compiled as loadable modules.
//!
//! A module exports a C-compatible entry point that is handed a
//! `*mut DriverRegistry` once after loading and calls
//! [`DriverRegistry::register`] with its factory and usage function. The
//! registry is plain state owned by the startup code (there is no global
//! singleton) and it holds a single slot: one loaded driver per process.
//! Built-in backends are selected by name before the registry is consulted
//! at all.

use crate::{JtagDriver, error::DriverError};

/// Configuration handed to driver factories.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Transport-specific target, e.g. a UDP address or a script path.
    pub target: String,
    /// Per-call vector limit the driver should declare, in bytes.
    pub max_vector_size: usize,
    /// Test-mode bit flags (bit 0: periodic datagram drop).
    pub test_mode: u32,
}

/// Constructs a driver from the process configuration.
pub type DriverFactory = fn(&DriverConfig) -> Result<Box<dyn JtagDriver>, DriverError>;

/// Returns the driver's usage/help text.
pub type UsageFn = fn() -> &'static str;

/// Single-slot table for a dynamically loaded transport driver.
#[derive(Default)]
pub struct DriverRegistry {
    slot: Option<(DriverFactory, UsageFn)>,
}

impl DriverRegistry {
    pub fn new() -> DriverRegistry {
        DriverRegistry::default()
    }

    /// Registers a factory and its usage text, replacing any previously
    /// registered driver.
    pub fn register(&mut self, factory: DriverFactory, usage: UsageFn) {
        if self.slot.is_some() {
            log::warn!("replacing previously registered transport driver");
        }
        self.slot = Some((factory, usage));
    }

    /// Instantiates the registered driver, or fails if none registered.
    pub fn create(&self, config: &DriverConfig) -> Result<Box<dyn JtagDriver>, DriverError> {
        match self.slot {
            Some((factory, _)) => factory(config),
            None => Err(DriverError::NotRegistered),
        }
    }

    /// The registered driver's usage text, if any driver is registered.
    pub fn usage(&self) -> Option<&'static str> {
        self.slot.map(|(_, usage)| usage())
    }
}
