use kspad::{event_channel, Result, TreadmillController, TreadmillEvent};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("📊 kspad Status Monitor Example");
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

    let unit = treadmill
        .translator()
        .map_or_else(|| "raw".to_string(), |t| t.unit().to_string());

    info!("🔍 Starting status monitoring...");
    info!("Press Ctrl+C to stop monitoring");
    treadmill.start_default_polling()?;

    let start_time = Instant::now();
    let mut max_speed = 0.0_f64;
    let mut last_distance = 0;

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(event) = event else {
            break;
        };

        match event {
            TreadmillEvent::StatsUpdated(stats) => {
                let speed = stats
                    .belt_speed
                    .unwrap_or_else(|| f64::from(stats.raw_speed));
                max_speed = max_speed.max(speed);
                let distance_delta = stats.distance.saturating_sub(last_distance);
                last_distance = stats.distance;

                let elapsed = start_time.elapsed();
                println!(
                    "\n📊 Status Update ({:02}:{:02})",
                    elapsed.as_secs() / 60,
                    elapsed.as_secs() % 60
                );
                println!("┌─────────────────────────────────────────┐");
                println!("│ Speed: {speed:8.2} {unit:6}                  │");
                println!("│ Mode:  {:20}             │", stats.belt_mode.to_string());
                println!("│ Belt state: {:3}                         │", stats.belt_state);
                println!("│ Running: {:8} s                     │", stats.running_time_secs);
                println!("│ Distance: {:10}                    │", stats.distance);
                println!("│ Steps: {:12}                     │", stats.steps);
                println!("└─────────────────────────────────────────┘");
                if distance_delta > 0 {
                    println!("  Pace: +{distance_delta} this update");
                }
            }
            TreadmillEvent::BeltStarted(_) => println!("▶️  Belt started"),
            TreadmillEvent::BeltStopped(_) => println!("⏹️  Belt stopped"),
            TreadmillEvent::ModeChanged(stats) => println!("🔀 Mode: {}", stats.belt_mode),
            TreadmillEvent::SpeedChanged(_) => {}
            TreadmillEvent::DispatchNotReady { opcode, reason } => {
                warn!("❌ Command 0x{:02X} dropped: {}", opcode, reason);
                if !treadmill.is_connected().await {
                    warn!("❌ Device disconnected");
                    break;
                }
            }
            TreadmillEvent::MalformedTelemetry { raw, reason } => {
                warn!("Ignoring telemetry {:02X?}: {}", raw.as_ref(), reason);
            }
        }
    }

    treadmill.stop_polling();

    info!("🔌 Disconnecting...");
    if let Err(e) = treadmill.disconnect().await {
        error!("❌ Failed to disconnect: {}", e);
    } else {
        info!("✅ Disconnected successfully");
    }

    println!("\n📊 Final Session Summary:");
    println!(
        "  Duration: {:02}:{:02}",
        start_time.elapsed().as_secs() / 60,
        start_time.elapsed().as_secs() % 60
    );
    println!("  Max Speed: {max_speed:.2} {unit}");
    println!("  Total Distance: {last_distance}");

    info!("🎉 Status monitoring completed!");
    Ok(())
}
