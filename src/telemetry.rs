use crate::{
    error::Result,
    events::{EventSink, TreadmillEvent},
    protocol::decode_telemetry,
    translator::ModelTranslator,
    types::TreadmillStats,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Decode a telemetry frame and translate its speed
///
/// Without a translator the snapshot carries only the raw speed and is
/// flagged as degraded.
///
/// # Errors
///
/// Returns [`crate::KspadError::MalformedFrame`] if the frame cannot be decoded.
pub fn decode_stats(raw: &[u8], translator: Option<ModelTranslator>) -> Result<TreadmillStats> {
    let fields = decode_telemetry(raw)?;

    Ok(TreadmillStats {
        belt_state: fields.belt_state,
        raw_speed: fields.raw_speed,
        belt_speed: translator.map(|t| t.to_physical(fields.raw_speed)),
        belt_mode: fields.belt_mode,
        running_time_secs: fields.running_time_secs,
        distance: fields.distance,
        steps: fields.steps,
    })
}

/// Transition events between two consecutive snapshots
///
/// Order is fixed: speed changed, belt started, belt stopped, mode changed.
/// With no previous snapshot, speed and mode always count as changed.
#[must_use]
pub fn derive_events(
    previous: Option<&TreadmillStats>,
    current: &TreadmillStats,
) -> Vec<TreadmillEvent> {
    let mut events = Vec::new();

    let was_moving = previous.is_some_and(TreadmillStats::is_moving);
    let is_moving = current.is_moving();

    if previous.map_or(true, |prev| prev.speed_differs(current)) {
        events.push(TreadmillEvent::SpeedChanged(current.clone()));
    }

    if !was_moving && is_moving {
        events.push(TreadmillEvent::BeltStarted(current.clone()));
    }

    if was_moving && !is_moving {
        events.push(TreadmillEvent::BeltStopped(current.clone()));
    }

    if previous.map_or(true, |prev| prev.belt_mode != current.belt_mode) {
        events.push(TreadmillEvent::ModeChanged(current.clone()));
    }

    events
}

/// Turns raw notifications into snapshots and transition events
pub struct TelemetryProcessor {
    translator: Option<ModelTranslator>,
    last: Mutex<Option<TreadmillStats>>,
    // Serializes whole frames so events from two frames never interleave.
    // Never taken by `last_stats`, so sinks may read the snapshot.
    delivery: Mutex<()>,
    sink: Arc<dyn EventSink>,
}

impl TelemetryProcessor {
    /// Create a processor with no previous snapshot
    #[must_use]
    pub fn new(translator: Option<ModelTranslator>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            translator,
            last: Mutex::new(None),
            delivery: Mutex::new(()),
            sink,
        }
    }

    /// Handle one notification from the stats channel
    ///
    /// Stores the snapshot, then emits [`TreadmillEvent::StatsUpdated`]
    /// followed by any transition events. A frame that fails to decode is
    /// reported as [`TreadmillEvent::MalformedTelemetry`] and leaves the
    /// stored snapshot untouched.
    ///
    /// # Errors
    ///
    /// Returns [`crate::KspadError::MalformedFrame`] if the frame cannot be decoded.
    pub fn on_telemetry(&self, raw: &[u8]) -> Result<TreadmillStats> {
        let _delivery = self.delivery.lock();

        let stats = match decode_stats(raw, self.translator) {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Discarding telemetry {:02X?}: {}", raw, e);
                self.sink.emit(TreadmillEvent::MalformedTelemetry {
                    raw: Bytes::copy_from_slice(raw),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        debug!("Telemetry: {:?}", stats);

        let transitions = {
            let mut last = self.last.lock();
            let transitions = derive_events(last.as_ref(), &stats);
            *last = Some(stats.clone());
            transitions
        };

        self.sink.emit(TreadmillEvent::StatsUpdated(stats.clone()));
        for event in transitions {
            self.sink.emit(event);
        }

        Ok(stats)
    }

    /// Most recent valid snapshot
    #[must_use]
    pub fn last_stats(&self) -> Option<TreadmillStats> {
        self.last.lock().clone()
    }

    /// Translator applied to the speed field
    #[must_use]
    pub const fn translator(&self) -> Option<ModelTranslator> {
        self.translator
    }
}
