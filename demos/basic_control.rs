use kspad::{event_channel, Result, TreadmillController, TreadmillEvent};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🏃‍♂️ kspad Basic Control Example");
    info!("Searching for treadmills...");

    let (tx, mut events) = event_channel();
    let treadmill = match TreadmillController::connect_first(Arc::new(tx)).await {
        Ok(controller) => {
            info!("✅ Connected to: {}", controller.model_name());
            controller
        }
        Err(e) => {
            error!("❌ Failed to connect to device: {}", e);
            return Err(e);
        }
    };

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TreadmillEvent::StatsUpdated(_) => {}
                TreadmillEvent::SpeedChanged(stats) => match stats.belt_speed {
                    Some(speed) => info!("⚡ Speed now {:.2}", speed),
                    None => info!("⚡ Raw speed now {}", stats.raw_speed),
                },
                TreadmillEvent::BeltStarted(_) => info!("▶️  Belt started"),
                TreadmillEvent::BeltStopped(_) => info!("⏹️  Belt stopped"),
                TreadmillEvent::ModeChanged(stats) => info!("🔀 Mode now {}", stats.belt_mode),
                other if other.is_error() => error!("❌ {:?}", other),
                _ => {}
            }
        }
    });

    treadmill.start_polling(Duration::from_secs(1))?;

    info!("🔀 Switching to manual mode...");
    treadmill.select_manual_mode()?;

    info!("▶️  Starting belt...");
    treadmill.start_belt()?;
    sleep(Duration::from_secs(3)).await;

    if treadmill.is_degraded() {
        info!("Model has no speed translator, skipping speed changes");
    } else {
        for speed in [1.0, 1.5, 2.0] {
            info!("⚡ Setting speed to {:.1}...", speed);
            if let Err(e) = treadmill.set_speed(speed) {
                error!("❌ Failed to set speed: {}", e);
                break;
            }
            sleep(Duration::from_secs(5)).await;
        }
    }

    if let Some(stats) = treadmill.last_stats() {
        info!("📊 Current Status:");
        info!("  Running time: {:?}", stats.running_time());
        info!("  Distance: {}", stats.distance);
        info!("  Steps: {}", stats.steps);
    }

    info!("⏹️  Stopping belt...");
    treadmill.stop_belt()?;
    treadmill.select_standby_mode()?;
    sleep(Duration::from_secs(3)).await;

    info!("🔌 Disconnecting...");
    treadmill.disconnect().await?;
    info!("✅ Disconnected successfully");

    info!("🎉 Basic control example completed!");
    Ok(())
}
