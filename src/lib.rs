#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # kspad
//!
//! A Rust library for driving KingSmith-style walking-pad treadmills over
//! Bluetooth Low Energy.
//!
//! The device speaks a tiny framed protocol on two GATT characteristics:
//! commands are written to `FE02` as 6-byte frames and telemetry arrives as
//! notifications on `FE01`. This crate covers the whole path:
//!
//! - **Frame codec** ([`protocol`]): command encoding with checksum, telemetry decoding
//! - **Model translators** ([`translator`]): raw speed byte to physical units per model
//! - **Command dispatcher** ([`dispatcher`]): FIFO queue with a minimum gap between writes
//! - **Telemetry processor** ([`telemetry`]): snapshots and transition events
//! - **Polling scheduler** ([`polling`]): periodic stats requests
//!
//! [`TreadmillController`] wires these together on top of a [`btleplug`]
//! connection, or any other [`Transport`].
//!
//! ## Safety Warning
//!
//! ⚠️ **Important**: This library controls physical exercise equipment.
//! Commands are queued and sent with a delay, so a stop command may take
//! several hundred milliseconds to reach the belt. Keep the physical stop
//! button within reach.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kspad::{event_channel, TreadmillController};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (tx, _events) = event_channel();
//!     let treadmill = TreadmillController::connect_first(Arc::new(tx)).await?;
//!
//!     treadmill.select_manual_mode()?;
//!     treadmill.start_belt()?;
//!     treadmill.set_speed(2.0)?;
//!
//!     treadmill.stop_belt()?;
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy discovery and link
pub mod ble;
/// Main treadmill control interface
pub mod controller;
/// Rate-limited command queue
pub mod dispatcher;
/// Error types and handling
pub mod error;
/// Events reported to the application
pub mod events;
/// Periodic stats requests
pub mod polling;
/// Wire frame encoding and decoding
pub mod protocol;
/// Telemetry snapshots and transition detection
pub mod telemetry;
/// Per-model speed conversion
pub mod translator;
/// Type definitions and data structures
pub mod types;

#[cfg(test)]
mod testing;

// Re-export the main types for convenient usage
pub use controller::{ConnectionContext, TreadmillController};
pub use dispatcher::{CommandDispatcher, DispatchState, Transport};
pub use error::{KspadError, Result};
pub use events::{event_channel, EventSink, NullSink, TreadmillEvent};
pub use protocol::{CommandFrame, Opcode};
pub use translator::ModelTranslator;
pub use types::{
    BeltMode, ConnectionParams, ControllerConfig, DeviceInfo, SpeedUnit, TreadmillStats,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Treadmill GATT service UUID (16-bit `0xFE00`)
pub const SERVICE_UUID: &str = "0000FE00-0000-1000-8000-00805F9B34FB";

/// Stats characteristic UUID for device-to-app notifications
///
/// Every telemetry frame arrives here, whether solicited by a stats request
/// or pushed by the device on its own.
pub const STATS_CHAR_UUID: &str = "0000FE01-0000-1000-8000-00805F9B34FB";

/// Command characteristic UUID for app-to-device writes
pub const COMMAND_CHAR_UUID: &str = "0000FE02-0000-1000-8000-00805F9B34FB";
