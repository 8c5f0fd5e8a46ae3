use crate::types::TreadmillStats;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Notification emitted by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum TreadmillEvent {
    /// A telemetry frame was decoded, emitted for every valid frame
    StatsUpdated(TreadmillStats),
    /// Belt speed differs from the previous snapshot
    SpeedChanged(TreadmillStats),
    /// Belt went from standstill to moving
    BeltStarted(TreadmillStats),
    /// Belt went from moving to standstill
    BeltStopped(TreadmillStats),
    /// Belt mode differs from the previous snapshot
    ModeChanged(TreadmillStats),
    /// A queued command was dropped because the transport could not take it
    DispatchNotReady {
        /// Opcode byte of the dropped command
        opcode: u8,
        /// Why the transport refused it
        reason: String,
    },
    /// A telemetry notification could not be decoded
    MalformedTelemetry {
        /// Bytes as received
        raw: Bytes,
        /// Decode failure
        reason: String,
    },
}

impl TreadmillEvent {
    /// Snapshot carried by the event, if any
    #[must_use]
    pub const fn stats(&self) -> Option<&TreadmillStats> {
        match self {
            Self::StatsUpdated(stats)
            | Self::SpeedChanged(stats)
            | Self::BeltStarted(stats)
            | Self::BeltStopped(stats)
            | Self::ModeChanged(stats) => Some(stats),
            Self::DispatchNotReady { .. } | Self::MalformedTelemetry { .. } => None,
        }
    }

    /// True for the error variants
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(
            self,
            Self::DispatchNotReady { .. } | Self::MalformedTelemetry { .. }
        )
    }
}

/// Receiver of controller events
///
/// `emit` is called from the dispatcher's drain task and from whatever
/// context delivers telemetry, so it must not block.
pub trait EventSink: Send + Sync {
    /// Deliver one event
    fn emit(&self, event: TreadmillEvent);
}

impl EventSink for mpsc::UnboundedSender<TreadmillEvent> {
    fn emit(&self, event: TreadmillEvent) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.send(event);
    }
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: TreadmillEvent) {}
}

/// Create an unbounded event channel suitable as a controller sink
#[must_use]
pub fn event_channel() -> (
    mpsc::UnboundedSender<TreadmillEvent>,
    mpsc::UnboundedReceiver<TreadmillEvent>,
) {
    mpsc::unbounded_channel()
}
