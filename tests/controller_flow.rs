use async_trait::async_trait;
use kspad::{
    event_channel, ConnectionContext, ControllerConfig, KspadError, Result, Transport,
    TreadmillController, TreadmillEvent,
};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::{sleep, Instant};

/// Fake link that records writes and can drop off mid-session
#[derive(Default)]
struct FakeLink {
    down: AtomicBool,
    writes: Mutex<Vec<(Instant, Vec<u8>)>>,
}

#[async_trait]
impl Transport for FakeLink {
    async fn is_ready(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }

    async fn send_bytes(&self, frame: &[u8]) -> Result<()> {
        self.writes.lock().push((Instant::now(), frame.to_vec()));
        Ok(())
    }
}

fn telemetry(state: u8, raw_speed: u8, mode: u8, secs: u32) -> Vec<u8> {
    let t = secs.to_be_bytes();
    vec![
        0xF8, 0xA2, state, raw_speed, mode, t[1], t[2], t[3], 0x00, 0x00, 0x0A, 0x00, 0x00, 0x03,
    ]
}

#[tokio::test(start_paused = true)]
async fn test_walking_session() {
    let link = Arc::new(FakeLink::default());
    let (tx, mut rx) = event_channel();
    let treadmill = TreadmillController::new(
        link.clone(),
        ConnectionContext::new("KS-ST-A1P"),
        Arc::new(tx),
        ControllerConfig::default(),
    );

    treadmill.select_manual_mode().unwrap();
    treadmill.start_belt().unwrap();
    treadmill.set_speed(1.5).unwrap();
    sleep(Duration::from_secs(3)).await;

    let writes = link.writes.lock().clone();
    assert_eq!(writes.len(), 3);
    assert_eq!(writes[2].1, vec![0xF7, 0xA2, 0x01, 0x18, 0xBB, 0xFD]);
    for pair in writes.windows(2) {
        assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(700));
    }

    treadmill.on_telemetry(&telemetry(1, 0x18, 1, 60)).unwrap();
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen[0], TreadmillEvent::StatsUpdated(_)));
    assert!(seen
        .iter()
        .any(|e| matches!(e, TreadmillEvent::SpeedChanged(s) if s.belt_speed == Some(1.5))));

    let stats = treadmill.last_stats().unwrap();
    assert_eq!(stats.running_time(), Duration::from_secs(60));
    assert!(stats.is_moving());
}

#[tokio::test(start_paused = true)]
async fn test_commands_dropped_while_link_down() {
    let link = Arc::new(FakeLink::default());
    let (tx, mut rx) = event_channel();
    let treadmill = TreadmillController::new(
        link.clone(),
        ConnectionContext::new("KS-ST-A1P"),
        Arc::new(tx),
        ControllerConfig {
            min_command_interval: Duration::from_millis(100),
            ..ControllerConfig::default()
        },
    );

    link.down.store(true, Ordering::SeqCst);
    treadmill.start_belt().unwrap();
    sleep(Duration::from_millis(50)).await;

    assert!(link.writes.lock().is_empty());
    assert!(matches!(
        rx.recv().await,
        Some(TreadmillEvent::DispatchNotReady { opcode: 0x04, .. })
    ));

    link.down.store(false, Ordering::SeqCst);
    treadmill.stop_belt().unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(
        link.writes.lock()[0].1,
        vec![0xF7, 0xA2, 0x01, 0x00, 0xA3, 0xFD]
    );
}

#[tokio::test]
async fn test_malformed_telemetry_is_reported() {
    let link = Arc::new(FakeLink::default());
    let (tx, mut rx) = event_channel();
    let treadmill = TreadmillController::new(
        link,
        ConnectionContext::new("KS-ST-A1P"),
        Arc::new(tx),
        ControllerConfig::default(),
    );

    let err = treadmill.on_telemetry(&[0xF8, 0xA2, 0x01]).unwrap_err();
    assert!(matches!(err, KspadError::MalformedFrame(_)));
    assert!(matches!(
        rx.recv().await,
        Some(TreadmillEvent::MalformedTelemetry { .. })
    ));
    assert!(treadmill.last_stats().is_none());
}
