use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Physical speed unit a translator produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedUnit {
    /// Miles per hour
    Miles,
}

impl fmt::Display for SpeedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Miles => write!(f, "mph"),
        }
    }
}

/// Belt operating mode as reported in telemetry byte 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BeltMode {
    /// Speed follows the user's position on the belt
    Auto = 0,
    /// Speed is set explicitly by commands
    Manual = 1,
    /// Belt is idle and waiting
    Standby = 2,
}

impl BeltMode {
    /// Convert from the wire value, `None` for codes the device does not define
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Auto),
            1 => Some(Self::Manual),
            2 => Some(Self::Standby),
            _ => None,
        }
    }
}

impl fmt::Display for BeltMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "Auto"),
            Self::Manual => write!(f, "Manual"),
            Self::Standby => write!(f, "Standby"),
        }
    }
}

/// One decoded and translated telemetry snapshot
///
/// `belt_speed` is `None` when no translator is registered for the connected
/// model. In that case only `raw_speed` is meaningful and the snapshot is
/// flagged as degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreadmillStats {
    /// Raw belt status code
    pub belt_state: u8,
    /// Speed in device units, exactly as received
    pub raw_speed: u8,
    /// Speed in physical units, if the model is known
    pub belt_speed: Option<f64>,
    /// Belt operating mode
    pub belt_mode: BeltMode,
    /// Running time of the current session in seconds
    pub running_time_secs: u32,
    /// Distance of the current session, device-defined unit
    pub distance: u32,
    /// Step count of the current session
    pub steps: u32,
}

impl TreadmillStats {
    /// True when the speed could not be translated to physical units
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.belt_speed.is_none()
    }

    /// True when the belt is moving
    #[must_use]
    pub fn is_moving(&self) -> bool {
        self.belt_speed
            .map_or(self.raw_speed > 0, |speed| speed > 0.0)
    }

    /// Compare the speed of two snapshots, falling back to raw units when
    /// either side is untranslated
    #[must_use]
    pub fn speed_differs(&self, other: &Self) -> bool {
        match (self.belt_speed, other.belt_speed) {
            (Some(a), Some(b)) => (a - b).abs() > f64::EPSILON,
            _ => self.raw_speed != other.raw_speed,
        }
    }

    /// Running time as a [`Duration`]
    #[must_use]
    pub fn running_time(&self) -> Duration {
        Duration::from_secs(u64::from(self.running_time_secs))
    }
}

/// Peripheral found during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Advertised local name, used as the model identifier
    pub name: String,
    /// Device MAC address
    pub mac_address: Option<String>,
    /// Signal strength (RSSI)
    pub rssi: i16,
}

impl DeviceInfo {
    /// Create new device info
    #[must_use]
    pub const fn new(name: String, mac_address: Option<String>, rssi: i16) -> Self {
        Self {
            name,
            mac_address,
            rssi,
        }
    }
}

/// Connection parameters for the BLE adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Scan duration in milliseconds
    pub scan_timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Only accept peripherals advertising this name. When unset, any name
    /// with a registered translator matches.
    pub model_name: Option<String>,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 10_000,
            connect_timeout_ms: 30_000,
            model_name: None,
        }
    }
}

/// Controller timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Minimum spacing between two transmitted commands
    pub min_command_interval: Duration,
    /// Interval used by [`crate::TreadmillController::start_default_polling`]
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_command_interval: Duration::from_millis(700),
            poll_interval: Duration::from_secs(1),
        }
    }
}
