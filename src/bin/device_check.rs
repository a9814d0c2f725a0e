//! Device check
//!
//! Lists microphones, samples the input level of one of them, then releases
//! it. Usage: `device-check [microphone] [samples]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use teleconsult::config::CallConfig;
use teleconsult::media::{CpalMicrophones, DeviceManager, StreamConstraints};

const DEFAULT_SAMPLES: usize = 40;
const SAMPLE_CADENCE: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    teleconsult::init_logging();

    let config = CallConfig::from_env().context("invalid TELECONSULT_* environment")?;
    tracing::info!("Checking devices for {}", config.sip.identity());

    let mut args = std::env::args().skip(1);
    let microphone = args.next();
    let samples = match args.next() {
        Some(n) => n.parse().context("sample count must be a number")?,
        None => DEFAULT_SAMPLES,
    };

    let devices = DeviceManager::new(Arc::new(CpalMicrophones::new()));
    let set = devices.list_devices().await.context("listing devices")?;
    if set.microphones.is_empty() {
        anyhow::bail!("no microphones found");
    }
    println!("Microphones:");
    for mic in &set.microphones {
        println!("  {}", mic.label);
    }

    let constraints = StreamConstraints {
        microphone_id: microphone,
        audio: true,
        ..StreamConstraints::default()
    };
    let stream = devices
        .acquire_stream(&constraints)
        .await
        .context("opening microphone")?;

    let monitor = devices.monitor_input_level(&stream)?;
    let mut levels = std::pin::pin!(monitor.into_stream(SAMPLE_CADENCE).take(samples));
    while let Some(level) = levels.next().await {
        let bar = "#".repeat(usize::from(level) / 2);
        println!("{:>3} {}", level, bar);
    }

    devices.release_stream(Some(&stream));
    tracing::info!("Device check finished");
    Ok(())
}
