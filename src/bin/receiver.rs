//! Demo receiver
//!
//! Binds the default endpoints, receives a stream and logs reception
//! statistics once per second. The first argument is an optional TOML
//! configuration file.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_link::{
    config::{self, ReceiverConfig, StreamConfig},
    constants::DEFAULT_CONTROL_PORT,
    fec::FecConfig,
    frame::FrameSource,
    latency::LatencyConfig,
    packet::Substream,
    session::ReceiverSession,
};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config: ReceiverConfig = match std::env::args().nth(1) {
        Some(path) => config::load(&path)?,
        None => ReceiverConfig::new(
            StreamConfig::default(),
            FecConfig::default(),
            LatencyConfig::default(),
        )?
        .bind(Substream::Control, "", DEFAULT_CONTROL_PORT)?,
    };

    tracing::info!(media = %config.media, "starting receiver");
    let mut session = ReceiverSession::open(config)?;

    let mut frames = 0u64;
    let mut gap_frames = 0u64;
    let mut last_stats = Instant::now();
    loop {
        // Stand-in for an audio device callback: frames are pulled and
        // dropped on the floor instead of played.
        if let Some(frame) = session.read_frame(Duration::from_millis(100))? {
            frames += 1;
            if frame.is_gap {
                gap_frames += 1;
            }
        }

        if last_stats.elapsed() >= Duration::from_secs(1) {
            last_stats = Instant::now();
            let stats = session.stats();
            tracing::info!(
                frames,
                gap_frames,
                packets = stats.packets_received,
                gaps = stats.jitter.gaps,
                recovered = stats.fec.packets_recovered,
                pacing = format!("{:.4}", stats.pacing_ratio),
                fault = ?stats.last_fault,
                "receiving"
            );
        }
    }
}
