//! Demo sender
//!
//! Streams a 440 Hz test tone to a receiver. The first argument is either
//! a TOML configuration file or the receiver's host address.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_link::{
    config::{self, SenderConfig, StreamConfig},
    constants::{DEFAULT_CONTROL_PORT, DEFAULT_MEDIA_PORT},
    fec::FecConfig,
    frame::{Frame, FrameSink},
    packet::Substream,
    session::SenderSession,
};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let arg = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1".into());
    let config: SenderConfig = if arg.ends_with(".toml") {
        config::load(&arg)?
    } else {
        SenderConfig::new(StreamConfig::default(), FecConfig::default())?
            .connect(Substream::Media, arg.clone(), DEFAULT_MEDIA_PORT)?
            .connect(Substream::Control, arg, DEFAULT_CONTROL_PORT)?
    };

    tracing::info!(media = %config.media, "starting sender");
    let stream = config.stream;
    let mut session = SenderSession::open(config)?;

    let samples_per_frame = stream.samples_per_packet();
    let frame_period = stream.packet_length;
    let mut phase = 0.0f32;
    let step = 440.0 * std::f32::consts::TAU / stream.sample_rate as f32;

    let started = Instant::now();
    let mut next_deadline = started;
    let mut frame_index = 0u64;
    let mut last_stats = started;

    loop {
        let mut samples = Vec::with_capacity(samples_per_frame * stream.channels as usize);
        for _ in 0..samples_per_frame {
            let s = (phase).sin() * 0.2;
            phase = (phase + step) % std::f32::consts::TAU;
            for _ in 0..stream.channels {
                samples.push(s);
            }
        }

        let frame = Frame::new(
            samples,
            stream.channels,
            stream.sample_rate,
            frame_index * samples_per_frame as u64,
            frame_index as u32,
        );
        if !session.write_frame(frame, Duration::from_millis(100))? {
            tracing::warn!("frame dropped, channel full");
        }
        frame_index += 1;

        next_deadline += frame_period;
        if let Some(wait) = next_deadline.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }

        if last_stats.elapsed() >= Duration::from_secs(1) {
            last_stats = Instant::now();
            let stats = session.stats();
            tracing::info!(
                packets = stats.packets_sent,
                repair = stats.repair_packets_sent,
                kbytes = stats.bytes_sent / 1024,
                peer_loss_q8 = stats.peer_fraction_lost,
                "sending"
            );
        }
    }
}
