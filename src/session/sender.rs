//! Sender session
//!
//! Owns one worker thread per session. The host pushes frames through a
//! bounded channel; the worker packetizes, runs the FEC encoder, puts
//! datagrams on the wire and polls the control socket for receiver
//! feedback. The channel's `recv_timeout` is the worker's poll tick, and a
//! channel disconnect is the teardown wakeup.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::SenderConfig;
use crate::control::{ControlMessage, SenderReport, REPORT_INTERVAL};
use crate::error::{Error, Result};
use crate::fec::BlockEncoder;
use crate::frame::{Frame, FrameSink};
use crate::net::{self, POLL_TICK};
use crate::packet::{Packet, PacketCodec, Substream};

/// Frames buffered between the host and the worker
const CHANNEL_CAPACITY: usize = 64;

/// Sender transmission statistics
#[derive(Debug, Default, Clone)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub repair_packets_sent: u64,
    pub reports_received: u64,
    pub send_errors: u64,
    /// Loss fraction from the most recent receiver report, Q8
    pub peer_fraction_lost: u8,
}

struct Worker {
    config: SenderConfig,
    media: UdpSocket,
    repair: Option<UdpSocket>,
    control: Option<UdpSocket>,
    rx: Receiver<Frame>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<Mutex<SenderStats>>,
}

pub struct SenderSession {
    tx: Option<Sender<Frame>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<Mutex<SenderStats>>,
}

impl SenderSession {
    /// Validate the configuration, open the sockets and start the worker.
    pub fn open(config: SenderConfig) -> Result<Self> {
        config.validate()?;

        let media = net::connect_socket(config.media.connect_addr()?)?;
        let repair = match &config.repair {
            Some(endpoint) => Some(net::connect_socket(endpoint.connect_addr()?)?),
            None => None,
        };
        let control = match &config.control {
            Some(endpoint) => {
                let socket = net::connect_socket(endpoint.connect_addr()?)?;
                // Control is drained opportunistically inside the media
                // tick; it must never add its own blocking delay.
                socket.set_nonblocking(true)?;
                Some(socket)
            }
            None => None,
        };

        info!(media = %config.media, fec = ?config.fec.scheme, "sender session open");

        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(SenderStats::default()));

        let worker = Worker {
            config,
            media,
            repair,
            control,
            rx,
            shutdown: Arc::clone(&shutdown),
            stats: Arc::clone(&stats),
        };
        let handle = std::thread::Builder::new()
            .name("al-sender".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            tx: Some(tx),
            shutdown,
            worker: Some(handle),
            stats,
        })
    }

    pub fn stats(&self) -> SenderStats {
        self.stats.lock().clone()
    }

    /// Stop the worker and flush the final partial FEC block. Idempotent.
    pub fn close(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Dropping the channel wakes the worker out of recv_timeout.
        self.tx.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("sender worker panicked");
            }
        }
    }
}

impl FrameSink for SenderSession {
    fn write_frame(&mut self, frame: Frame, timeout: Duration) -> Result<bool> {
        let tx = self.tx.as_ref().ok_or(Error::SessionClosed)?;
        match tx.send_timeout(frame, timeout) {
            Ok(()) => Ok(true),
            Err(crossbeam_channel::SendTimeoutError::Timeout(_)) => Ok(false),
            Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                Err(Error::SessionClosed)
            }
        }
    }
}

impl Drop for SenderSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl Worker {
    fn run(self) {
        let encoding = self.config.stream.packet_encoding();
        let codec = PacketCodec::new(encoding);
        let mut fec = BlockEncoder::new(self.config.fec);

        let samples_per_packet =
            self.config.stream.samples_per_packet() * encoding.channels as usize;
        let mut pcm: Vec<f32> = Vec::with_capacity(samples_per_packet * 2);
        let mut seq: u32 = 0;
        let mut stream_ts: u64 = 0;
        let mut control_seq: u32 = 0;
        let mut last_report = Instant::now();

        loop {
            match self.rx.recv_timeout(POLL_TICK) {
                Ok(frame) => pcm.extend_from_slice(&frame.samples),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            while pcm.len() >= samples_per_packet {
                let chunk: Vec<f32> = pcm.drain(..samples_per_packet).collect();
                match codec.encode(&chunk, seq, stream_ts) {
                    Ok(packet) => {
                        seq = seq.wrapping_add(1);
                        stream_ts += self.config.stream.samples_per_packet() as u64;
                        for out in fec.push(packet) {
                            self.send(&out);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "dropping unencodable packet");
                        self.stats.lock().send_errors += 1;
                    }
                }
            }

            self.drain_control();

            if last_report.elapsed() >= REPORT_INTERVAL {
                last_report = Instant::now();
                self.send_report(control_seq, stream_ts);
                control_seq = control_seq.wrapping_add(1);
            }
        }

        // Final partial block still gets its repair packets.
        for out in fec.flush() {
            self.send(&out);
        }
        debug!("sender worker stopped");
    }

    fn send(&self, packet: &Packet) {
        let socket = match packet.kind {
            Substream::Repair => match &self.repair {
                Some(s) => s,
                None => return,
            },
            _ => &self.media,
        };

        let bytes = match packet.to_bytes() {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "packet serialization failed");
                self.stats.lock().send_errors += 1;
                return;
            }
        };

        match socket.send(&bytes) {
            Ok(n) => {
                let mut stats = self.stats.lock();
                stats.bytes_sent += n as u64;
                match packet.kind {
                    Substream::Repair => stats.repair_packets_sent += 1,
                    _ => stats.packets_sent += 1,
                }
            }
            Err(e) => {
                warn!(error = %e, kind = %packet.kind, "send failed");
                self.stats.lock().send_errors += 1;
            }
        }
    }

    fn drain_control(&self) {
        let Some(control) = &self.control else {
            return;
        };
        let mut buf = [0u8; crate::packet::MAX_PACKET_SIZE];
        loop {
            let len = match control.recv(&mut buf) {
                Ok(len) => len,
                Err(e) if net::is_poll_timeout(&e) => return,
                Err(e) => {
                    debug!(error = %e, "control receive failed");
                    return;
                }
            };
            let packet = match Packet::parse(&buf[..len]) {
                Ok(p) if p.kind == Substream::Control => p,
                Ok(_) | Err(_) => continue,
            };
            if let Ok(ControlMessage::Receiver(report)) = ControlMessage::parse(&packet.payload)
            {
                let mut stats = self.stats.lock();
                stats.reports_received += 1;
                stats.peer_fraction_lost = report.fraction_lost;
                drop(stats);
                debug!(
                    fraction_lost = report.fraction_lost,
                    latency_us = report.measured_latency_us,
                    "receiver report"
                );
            }
        }
    }

    fn send_report(&self, control_seq: u32, stream_ts: u64) {
        let Some(control) = &self.control else {
            return;
        };
        let stats = self.stats.lock().clone();
        let wallclock_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        let report = SenderReport {
            stream_ts,
            wallclock_us,
            packet_count: stats.packets_sent.min(u32::MAX as u64) as u32,
            byte_count: stats.bytes_sent.min(u32::MAX as u64) as u32,
        };
        let packet = ControlMessage::Sender(report).into_packet(control_seq, stream_ts);
        if let Ok(bytes) = packet.to_bytes() {
            if let Err(e) = control.send(&bytes) {
                debug!(error = %e, "control send failed");
            }
        }
    }
}
