//! In-memory transport used by the unit tests.

use crate::{
    dispatcher::Transport,
    error::{KspadError, Result},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Instant;

/// Records every written frame with the (virtual) instant it was written
pub(crate) struct RecordingTransport {
    ready: AtomicBool,
    fail: AtomicBool,
    sent: Mutex<Vec<(Instant, Vec<u8>)>>,
}

impl RecordingTransport {
    pub(crate) fn ready() -> Self {
        Self {
            ready: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn not_ready() -> Self {
        let transport = Self::ready();
        transport.set_ready(false);
        transport
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<(Instant, Vec<u8>)> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().iter().map(|(_, f)| f.clone()).collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn send_bytes(&self, frame: &[u8]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(KspadError::Protocol("write rejected".to_string()));
        }
        self.sent.lock().push((Instant::now(), frame.to_vec()));
        Ok(())
    }
}
