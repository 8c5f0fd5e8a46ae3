use crate::{
    error::{KspadError, Result},
    events::{EventSink, TreadmillEvent},
    protocol::CommandFrame,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Write side of the link to the treadmill
///
/// Implementations wrap whatever physically carries the bytes (a GATT
/// characteristic, a test recorder). Writes are fire-and-forget: the device
/// never acknowledges individual commands.
#[async_trait]
pub trait Transport: Send + Sync {
    /// True when a peripheral is connected and its command channel is known
    async fn is_ready(&self) -> bool;

    /// Write one frame to the command channel
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    async fn send_bytes(&self, frame: &[u8]) -> Result<()>;
}

/// Drain state of the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// No drain task is running
    Idle,
    /// A drain task is sending queued frames
    Draining,
}

#[derive(Default)]
struct PendingQueue {
    frames: VecDeque<CommandFrame>,
    draining: bool,
}

struct Shared {
    queue: Mutex<PendingQueue>,
    runtime: Option<Handle>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    min_interval: Duration,
}

/// Rate-limited FIFO command queue
///
/// Frames reach the transport one at a time, in the order they were
/// enqueued, with at least `min_interval` between two transmissions.
/// Frames that cannot be written are dropped and reported as
/// [`TreadmillEvent::DispatchNotReady`]; nothing is retried.
pub struct CommandDispatcher {
    shared: Arc<Shared>,
}

impl CommandDispatcher {
    /// Create an idle dispatcher with an empty queue
    ///
    /// When called inside a Tokio runtime, that runtime runs the drain task
    /// for frames enqueued from any thread.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        min_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(PendingQueue::default()),
                runtime: Handle::try_current().ok(),
                transport,
                sink,
                min_interval,
            }),
        }
    }

    /// Append a frame and start draining if idle
    ///
    /// Returns immediately; transmission happens on a spawned task.
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::NotReady`] if the dispatcher was created outside
    /// a Tokio runtime and is called outside one too. The frame is not queued.
    pub fn enqueue(&self, frame: CommandFrame) -> Result<()> {
        let runtime = self.runtime()?;

        let start_drain = {
            let mut queue = self.shared.queue.lock();
            queue.frames.push_back(frame);
            !std::mem::replace(&mut queue.draining, true)
        };

        if start_drain {
            runtime.spawn(drain(Arc::clone(&self.shared)));
        }
        Ok(())
    }

    /// Runtime that drives the drain task, falling back to the caller's
    pub(crate) fn runtime(&self) -> Result<Handle> {
        self.shared
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or_else(|| KspadError::NotReady {
                reason: "no Tokio runtime to send commands".to_string(),
            })
    }

    /// Current drain state
    #[must_use]
    pub fn state(&self) -> DispatchState {
        if self.shared.queue.lock().draining {
            DispatchState::Draining
        } else {
            DispatchState::Idle
        }
    }

    /// Number of frames waiting to be sent
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().frames.len()
    }

}

impl Shared {
    /// Pop the head frame, or go idle when the queue is empty
    fn next_frame(&self) -> Option<CommandFrame> {
        let mut queue = self.queue.lock();
        let frame = queue.frames.pop_front();
        if frame.is_none() {
            queue.draining = false;
        }
        frame
    }

    async fn write(&self, frame: &CommandFrame) -> Result<()> {
        if !self.transport.is_ready().await {
            return Err(KspadError::NotReady {
                reason: "no connected peripheral or command channel".to_string(),
            });
        }

        debug!("Sending command: {:02X?}", frame.as_bytes());
        self.transport.send_bytes(frame.as_bytes()).await
    }

    /// Hand one frame to the transport; returns whether it was written
    async fn transmit(&self, frame: &CommandFrame) -> bool {
        match self.write(frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping command {:02X?}: {}", frame.as_bytes(), e);
                self.sink.emit(TreadmillEvent::DispatchNotReady {
                    opcode: frame.opcode(),
                    reason: e.to_string(),
                });
                false
            }
        }
    }
}

async fn drain(shared: Arc<Shared>) {
    // The pause follows every written frame, so a frame enqueued just after
    // the queue ran dry still respects the spacing.
    while let Some(frame) = shared.next_frame() {
        if shared.transmit(&frame).await {
            tokio::time::sleep(shared.min_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::event_channel,
        protocol::Opcode,
        testing::RecordingTransport,
        types::BeltMode,
    };
    use tokio::time::{sleep, Instant};

    const INTERVAL: Duration = Duration::from_millis(700);

    fn dispatcher(
        transport: &Arc<RecordingTransport>,
    ) -> (
        CommandDispatcher,
        tokio::sync::mpsc::UnboundedReceiver<TreadmillEvent>,
    ) {
        let (tx, rx) = event_channel();
        let dispatcher = CommandDispatcher::new(transport.clone(), Arc::new(tx), INTERVAL);
        (dispatcher, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order_and_spacing() {
        let transport = Arc::new(RecordingTransport::ready());
        let (dispatcher, _rx) = dispatcher(&transport);

        let a = CommandFrame::start_belt();
        let b = CommandFrame::set_speed(0x20);
        let c = CommandFrame::set_mode(BeltMode::Manual).unwrap();

        let start = Instant::now();
        dispatcher.enqueue(a.clone()).unwrap();
        dispatcher.enqueue(b.clone()).unwrap();
        dispatcher.enqueue(c.clone()).unwrap();
        assert_eq!(dispatcher.state(), DispatchState::Draining);

        sleep(Duration::from_secs(3)).await;

        let sent = transport.sent();
        assert_eq!(
            sent.iter().map(|(_, f)| f.clone()).collect::<Vec<_>>(),
            vec![a.as_bytes().to_vec(), b.as_bytes().to_vec(), c.as_bytes().to_vec()]
        );
        assert_eq!(sent[0].0, start);
        for pair in sent.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= INTERVAL);
        }
        assert_eq!(dispatcher.state(), DispatchState::Idle);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_holds_across_idle_gap() {
        let transport = Arc::new(RecordingTransport::ready());
        let (dispatcher, _rx) = dispatcher(&transport);

        dispatcher.enqueue(CommandFrame::request_stats()).unwrap();
        sleep(Duration::from_millis(100)).await;
        dispatcher.enqueue(CommandFrame::request_stats()).unwrap();
        sleep(Duration::from_secs(2)).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].0 - sent[0].0 >= INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_drops_and_recovers() {
        let transport = Arc::new(RecordingTransport::not_ready());
        let (dispatcher, mut rx) = dispatcher(&transport);

        dispatcher.enqueue(CommandFrame::start_belt()).unwrap();
        sleep(Duration::from_millis(10)).await;

        assert!(transport.sent().is_empty());
        assert_eq!(
            rx.try_recv().unwrap(),
            TreadmillEvent::DispatchNotReady {
                opcode: Opcode::StartBelt as u8,
                reason: "Transport not ready: no connected peripheral or command channel"
                    .to_string(),
            }
        );
        assert_eq!(dispatcher.state(), DispatchState::Idle);

        transport.set_ready(true);
        dispatcher.enqueue(CommandFrame::stop_belt()).unwrap();
        sleep(Duration::from_millis(10)).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, CommandFrame::stop_belt().as_bytes());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_reported_not_retried() {
        let transport = Arc::new(RecordingTransport::ready());
        transport.fail_writes(true);
        let (dispatcher, mut rx) = dispatcher(&transport);

        dispatcher.enqueue(CommandFrame::start_belt()).unwrap();
        dispatcher.enqueue(CommandFrame::request_stats()).unwrap();
        sleep(Duration::from_secs(1)).await;

        assert!(transport.sent().is_empty());
        assert!(matches!(
            rx.try_recv().unwrap(),
            TreadmillEvent::DispatchNotReady { opcode: 0x04, .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            TreadmillEvent::DispatchNotReady { opcode: 0x00, .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_enqueue_keeps_spacing() {
        let transport = Arc::new(RecordingTransport::ready());
        let (dispatcher, _rx) = dispatcher(&transport);
        let dispatcher = Arc::new(dispatcher);

        let mut handles = Vec::new();
        for raw in 1..=8u8 {
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                dispatcher.enqueue(CommandFrame::set_speed(raw)).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        sleep(Duration::from_secs(10)).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 8);
        for pair in sent.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= INTERVAL);
        }
        let mut arguments: Vec<u8> = sent.iter().map(|(_, f)| f[3]).collect();
        arguments.sort_unstable();
        assert_eq!(arguments, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn test_enqueue_without_runtime_is_rejected_and_recoverable() {
        let transport = Arc::new(RecordingTransport::ready());
        let (dispatcher, _rx) = dispatcher(&transport);

        let err = dispatcher.enqueue(CommandFrame::stop_belt()).unwrap_err();
        assert!(matches!(err, KspadError::NotReady { .. }));
        assert_eq!(dispatcher.state(), DispatchState::Idle);
        assert_eq!(dispatcher.pending(), 0);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        runtime.block_on(async {
            dispatcher.enqueue(CommandFrame::start_belt()).unwrap();
            sleep(Duration::from_secs(1)).await;
        });

        assert_eq!(
            transport.sent_frames(),
            vec![CommandFrame::start_belt().as_bytes().to_vec()]
        );
        assert_eq!(dispatcher.state(), DispatchState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_enqueue_from_plain_thread_uses_creating_runtime() {
        let transport = Arc::new(RecordingTransport::ready());
        let (dispatcher, _rx) = dispatcher(&transport);
        let dispatcher = Arc::new(dispatcher);

        let worker = Arc::clone(&dispatcher);
        std::thread::spawn(move || worker.enqueue(CommandFrame::stop_belt()))
            .join()
            .unwrap()
            .unwrap();

        sleep(Duration::from_millis(200)).await;
        assert_eq!(
            transport.sent_frames(),
            vec![CommandFrame::stop_belt().as_bytes().to_vec()]
        );
    }
}
