use thiserror::Error;

/// Errors that can occur when driving a treadmill
#[derive(Error, Debug)]
pub enum KspadError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Device not found during scanning
    #[error("Treadmill not found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// Device disconnected unexpectedly
    #[error("Device disconnected")]
    Disconnected,

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Command argument outside the range the frame format can carry
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Telemetry frame too short or carrying an unknown field value
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Transport cannot accept writes right now
    #[error("Transport not ready: {reason}")]
    NotReady {
        /// Reason why the transport is not ready
        reason: String,
    },

    /// No speed translator is registered for the connected model
    #[error("Unknown treadmill model: {model}")]
    UnknownModel {
        /// Advertised model name
        model: String,
    },

    /// GATT layout did not match what the treadmill is expected to expose
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type for treadmill operations
pub type Result<T> = std::result::Result<T, KspadError>;

impl KspadError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_) | Self::ConnectionFailed(_) | Self::Disconnected | Self::DeviceNotFound
        )
    }

    /// Check if the caller can recover by retrying the original intent
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::NotReady { .. }
                | Self::InvalidArgument(_)
                | Self::MalformedFrame(_)
                | Self::UnknownModel { .. }
        )
    }
}
