use crate::{dispatcher::CommandDispatcher, error::Result, protocol::CommandFrame};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info, warn};

#[derive(Default)]
struct PollState {
    interval_us: AtomicU64,
    generation: AtomicU64,
}

impl PollState {
    fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us.load(Ordering::SeqCst))
    }
}

/// Periodic "request stats" source
///
/// Polling only enqueues commands, so stopping takes effect at the next
/// tick rather than interrupting anything in flight.
pub struct PollingScheduler {
    dispatcher: Arc<CommandDispatcher>,
    state: Arc<PollState>,
}

impl PollingScheduler {
    /// Create a stopped scheduler feeding `dispatcher`
    #[must_use]
    pub fn new(dispatcher: Arc<CommandDispatcher>) -> Self {
        Self {
            dispatcher,
            state: Arc::new(PollState::default()),
        }
    }

    /// Request stats now, then every `interval` until stopped
    ///
    /// A zero interval polls once. Calling this again replaces the previous
    /// schedule.
    ///
    /// # Errors
    ///
    /// Returns [`crate::KspadError::NotReady`] if there is no Tokio runtime
    /// to run the schedule on.
    pub fn start_polling(&self, interval: Duration) -> Result<()> {
        let runtime = self.dispatcher.runtime()?;
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let interval_us = u64::try_from(interval.as_micros()).unwrap_or(u64::MAX);
        self.state.interval_us.store(interval_us, Ordering::SeqCst);

        info!("Polling stats every {:?}", interval);
        self.dispatcher.enqueue(CommandFrame::request_stats())?;

        if interval.is_zero() {
            return Ok(());
        }

        let state = Arc::clone(&self.state);
        let dispatcher = Arc::clone(&self.dispatcher);
        runtime.spawn(async move {
            loop {
                tokio::time::sleep(state.interval()).await;

                if state.generation.load(Ordering::SeqCst) != generation {
                    debug!("Polling schedule {} superseded", generation);
                    break;
                }
                if state.interval().is_zero() {
                    debug!("Polling stopped");
                    break;
                }

                if let Err(e) = dispatcher.enqueue(CommandFrame::request_stats()) {
                    warn!("Polling stopped: {}", e);
                    break;
                }
            }
        });
        Ok(())
    }

    /// Stop repeating; observed at the next scheduled tick
    pub fn stop_polling(&self) {
        info!("Stopping stats polling");
        self.state.interval_us.store(0, Ordering::SeqCst);
    }

    /// Current polling interval, zero when stopped
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.state.interval()
    }

    /// True while a repeating schedule is active
    #[must_use]
    pub fn is_polling(&self) -> bool {
        !self.interval().is_zero()
    }
}
