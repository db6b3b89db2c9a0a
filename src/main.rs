mod args;
mod console;
mod emulator;
#[cfg(feature = "display")]
mod window;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use vmu_bridge::{
    bridge::UpdateCallback,
    config::{Config, DisplayConfig},
    display::{DisplayEvent, VmuDisplay},
    snapshot, VmuBridge, VmuButtons,
};

use crate::args::{Args, Commands, RunArgs};
use crate::console::Console;
use crate::emulator::Emulator;

fn main() -> Result<()> {
    env_logger::builder()
        .parse_filters("vmu_bridge=info")
        .parse_default_env()
        .init();

    let args = Args::parse();
    let config = Config::load_or_default(args.config.as_deref())?;

    let bridge = Arc::new(VmuBridge::new(config.bridge.clone()));
    bridge.init();
    let mut emulator = Emulator::spawn(bridge.clone(), args.slots)?;

    let result = match args.command {
        Commands::Run(run) => run_headless(&bridge, &config, &run),
        Commands::Console => Console::new().map(|mut console| console.run(&bridge)),
        #[cfg(feature = "display")]
        Commands::Window => window::run(bridge.clone(), config.display.clone()),
    };

    // The producer has to be gone before the bridge shuts down, or its last frames get rejected.
    emulator.stop();
    bridge.term();
    result
}

fn run_headless(bridge: &VmuBridge, config: &Config, args: &RunArgs) -> Result<()> {
    if let Some(dir) = &args.snapshot_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create snapshot directory {}", dir.display()))?;
    }

    let published = Arc::new(AtomicU64::new(0));
    let counter = published.clone();
    let callback: UpdateCallback = Arc::new(move |_vmu_id: usize, _pixels: &[u32], _stamp: u64| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    bridge.register_update_callback(Some(callback));

    let mut display = VmuDisplay::new(DisplayConfig {
        enabled: true,
        ..config.display.clone()
    });
    let interval = display.config().update_interval();
    let scale = display.config().scale_factor.round().max(1.0) as u32;
    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    info!(
        "Polling the bridge every {}ms{}",
        interval.as_millis(),
        match args.seconds {
            Some(s) => format!(" for {}s", s),
            None => String::new(),
        }
    );

    let mut displayed = 0u64;
    let mut last_tap = Instant::now();
    while deadline.map_or(true, |d| Instant::now() < d) {
        match display.poll(bridge) {
            Some(DisplayEvent::Connected(id)) => info!("Showing VMU {}", id),
            Some(DisplayEvent::Disconnected) => info!("No VMU connected"),
            Some(DisplayEvent::Updated(id)) => {
                displayed += 1;
                debug!("VMU {} updated at {}ms", id, bridge.last_update(id));
                if let Some(dir) = &args.snapshot_dir {
                    save_snapshot(dir, id, displayed, display.colors(), scale)?;
                }
            }
            None => (),
        }

        // Tap A once a second so the simulated VMU has something to react to.
        if let Some(id) = display.active_vmu() {
            if bridge.button_state(id).contains(VmuButtons::A) {
                bridge.send_button(id, VmuButtons::A, false);
            } else if last_tap.elapsed() >= Duration::from_secs(1) {
                bridge.send_button(id, VmuButtons::A, true);
                last_tap = Instant::now();
            }
        }

        thread::sleep(interval);
    }

    bridge.register_update_callback(None);
    info!(
        "{} frames published, {} displayed, {} VMU(s) connected",
        published.load(Ordering::Relaxed),
        displayed,
        bridge.connected_count()
    );
    Ok(())
}

fn save_snapshot(dir: &Path, vmu_id: usize, n: u64, pixels: &[u32], scale: u32) -> Result<()> {
    let path = dir.join(format!("vmu{}-{:05}.png", vmu_id, n));
    snapshot::write_png(&path, pixels, scale)
}
