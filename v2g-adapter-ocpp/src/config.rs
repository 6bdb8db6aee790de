//! Configuration for the V2G-OCPP bridge
//!
//! Combines the charge point identity, the connection supervisor timing and
//! the endpoint rotation settings.

use std::net::Ipv4Addr;
use std::time::Duration;

/// Complete bridge configuration for one charge point
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Station identity and BootNotification fields
    pub station: StationConfig,

    /// Endpoint rotation settings
    pub rotation: RotationConfig,

    /// Delay between connection attempts (fixed, no backoff)
    pub retry_delay: Duration,

    /// Cadence of ISO 15118 state polling
    pub poll_interval: Duration,

    /// Timeout for a single OCPP request
    pub request_timeout: Duration,
}

/// Station identity reported to the CSMS
#[derive(Debug, Clone)]
pub struct StationConfig {
    /// Charge point identity (appended to the WebSocket URL)
    pub identity: String,

    /// Vendor name for BootNotification
    pub vendor: String,

    /// Model name for BootNotification
    pub model: String,

    /// Serial number (optional)
    pub serial_number: Option<String>,

    /// Firmware version (optional)
    pub firmware_version: Option<String>,

    /// EVSE id; derived from the host address or identity when unset
    pub evse_id: Option<i32>,
}

/// Endpoint rotation settings
///
/// The window bounds and port range are experiment parameters, not protocol
/// requirements; defaults reproduce the local-loopback fleet setup.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Addresses tried before generating subnet addresses
    pub preferred: Vec<Ipv4Addr>,

    /// Subnet base for generated addresses; derived from the host address
    /// when unset
    pub subnet: Option<Ipv4Addr>,

    /// Inclusive last-octet window for generated addresses
    pub octet_window: (u8, u8),

    /// First CSMS listener port
    pub port_base: u16,

    /// Last CSMS listener port (inclusive)
    pub port_ceiling: u16,

    /// Address used when the host address cannot be determined
    pub fallback: Ipv4Addr,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            station: StationConfig::default(),
            rotation: RotationConfig::default(),
            retry_delay: Duration::from_secs(1),
            poll_interval: Duration::from_millis(250),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            identity: "CP001".to_string(),
            vendor: "Elektrokombinacija".to_string(),
            model: "EK3-V2G".to_string(),
            serial_number: None,
            firmware_version: Some("0.1.0".to_string()),
            evse_id: None,
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            preferred: vec![Ipv4Addr::LOCALHOST],
            subnet: None,
            octet_window: (20, 30),
            port_base: 2910,
            port_ceiling: 2920,
            fallback: Ipv4Addr::LOCALHOST,
        }
    }
}

impl BridgeConfig {
    /// Create config for one identified charge point
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            station: StationConfig {
                identity: identity.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Set vendor info
    pub fn with_vendor(mut self, vendor: impl Into<String>, model: impl Into<String>) -> Self {
        self.station.vendor = vendor.into();
        self.station.model = model.into();
        self
    }

    /// Set serial number
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.station.serial_number = Some(serial.into());
        self
    }

    /// Pin the EVSE id instead of deriving it
    pub fn with_evse_id(mut self, evse_id: i32) -> Self {
        self.station.evse_id = Some(evse_id);
        self
    }

    /// Set the retry delay between connection attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the CSMS listener port range
    pub fn with_port_range(mut self, base: u16, ceiling: u16) -> Self {
        self.rotation.port_base = base;
        self.rotation.port_ceiling = ceiling;
        self
    }

    /// Set the generated-address octet window
    pub fn with_octet_window(mut self, low: u8, high: u8) -> Self {
        self.rotation.octet_window = (low, high);
        self
    }

    /// Replace the preferred address list
    pub fn with_preferred(mut self, preferred: Vec<Ipv4Addr>) -> Self {
        self.rotation.preferred = preferred;
        self
    }
}
