//! Receiver session
//!
//! One worker thread per session polls the media, repair and control
//! sockets, feeds packets through the FEC assembler into the jitter
//! buffer, and releases ordered frames into a bounded channel the host
//! drains with `read_frame`. The media socket's read timeout is the
//! worker's poll tick; only the first media read of a tick may block, and
//! repair and control are drained opportunistically.
//!
//! Timing faults and transient socket errors are counted and reported,
//! never fatal. The host decides when a session is beyond saving.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ReceiverConfig;
use crate::control::{
    ControlMessage, JitterEstimator, ReportBuilder, REPORT_INTERVAL,
};
use crate::error::{Error, Result, TimingFault};
use crate::fec::{BlockAssembler, FecStats};
use crate::frame::{Frame, FrameSource};
use crate::jitter::{JitterBuffer, JitterPop, JitterStats};
use crate::latency::{LatencyTuner, PlaybackWatchdog, TUNER_TICK};
use crate::net;
use crate::packet::{Packet, PacketCodec, Substream, MAX_PACKET_SIZE};

/// Frames buffered between the worker and the host
const CHANNEL_CAPACITY: usize = 64;

/// Datagrams handled per socket per poll iteration
const DRAIN_BUDGET: usize = 32;

/// Receiver reception statistics
#[derive(Debug, Clone)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub malformed_packets: u64,
    pub io_errors: u64,
    pub fec: FecStats,
    pub jitter: JitterStats,
    /// Playback pacing ratio from the latency tuner (1.0 = neutral)
    pub pacing_ratio: f64,
    pub last_fault: Option<TimingFault>,
}

impl Default for ReceiverStats {
    fn default() -> Self {
        Self {
            packets_received: 0,
            malformed_packets: 0,
            io_errors: 0,
            fec: FecStats::default(),
            jitter: JitterStats::default(),
            pacing_ratio: 1.0,
            last_fault: None,
        }
    }
}

struct Worker {
    config: ReceiverConfig,
    media: UdpSocket,
    repair: Option<UdpSocket>,
    control: Option<UdpSocket>,
    tx: Sender<Frame>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<Mutex<ReceiverStats>>,
}

pub struct ReceiverSession {
    rx: Option<Receiver<Frame>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<Mutex<ReceiverStats>>,
    media_addr: SocketAddr,
    control_addr: Option<SocketAddr>,
}

impl ReceiverSession {
    /// Validate the configuration, bind the sockets and start the worker.
    pub fn open(config: ReceiverConfig) -> Result<Self> {
        config.validate()?;

        let media = net::bind_socket(config.media.bind_addr()?)?;
        let media_addr = media.local_addr()?;
        let repair = match &config.repair {
            Some(endpoint) => {
                let socket = net::bind_socket(endpoint.bind_addr()?)?;
                socket.set_nonblocking(true)?;
                Some(socket)
            }
            None => None,
        };
        let control = match &config.control {
            Some(endpoint) => {
                let socket = net::bind_socket(endpoint.bind_addr()?)?;
                socket.set_nonblocking(true)?;
                Some(socket)
            }
            None => None,
        };
        let control_addr = match &control {
            Some(socket) => Some(socket.local_addr()?),
            None => None,
        };

        info!(
            media = %config.media,
            fec = ?config.fec.scheme,
            resampler = ?config.latency.resampler_backend,
            "receiver session open"
        );

        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(ReceiverStats::default()));

        let worker = Worker {
            config,
            media,
            repair,
            control,
            tx,
            shutdown: Arc::clone(&shutdown),
            stats: Arc::clone(&stats),
        };
        let handle = std::thread::Builder::new()
            .name("al-receiver".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            rx: Some(rx),
            shutdown,
            worker: Some(handle),
            stats,
            media_addr,
            control_addr,
        })
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats.lock().clone()
    }

    /// Bound address of the media socket. With port 0 in the endpoint this
    /// reveals the ephemeral port actually chosen.
    pub fn media_addr(&self) -> SocketAddr {
        self.media_addr
    }

    /// Bound address of the control socket, if one is configured.
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control_addr
    }

    /// Stop the worker and drop the sockets. Idempotent.
    pub fn close(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Dropping the channel lets the worker notice on its next release.
        self.rx.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("receiver worker panicked");
            }
        }
    }
}

impl FrameSource for ReceiverSession {
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        let rx = self.rx.as_ref().ok_or(Error::SessionClosed)?;
        match rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(None),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(Error::SessionClosed),
        }
    }
}

impl Drop for ReceiverSession {
    fn drop(&mut self) {
        self.close();
    }
}

struct Pipeline {
    codec: PacketCodec,
    assembler: BlockAssembler,
    jitter: JitterBuffer,
    estimator: JitterEstimator,
    highest_seq: u32,
    epoch: Instant,
    sample_rate: u32,
}

impl Pipeline {
    /// Route one datagram through parse, FEC and into the jitter buffer.
    fn ingest(&mut self, data: &[u8], stats: &Mutex<ReceiverStats>) {
        let packet = match Packet::parse(data) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "dropping malformed datagram");
                stats.lock().malformed_packets += 1;
                return;
            }
        };
        stats.lock().packets_received += 1;

        // Control packets are expected on the control socket; one arriving
        // here is counted and ignored.
        if packet.kind == Substream::Control {
            return;
        }

        if packet.kind == Substream::Media {
            let arrival = self.arrival_samples();
            self.estimator.update(arrival, packet.timestamp);
            if crate::packet::seq_lt(self.highest_seq, packet.seq) {
                self.highest_seq = packet.seq;
            }
        }
        for media in self.assembler.push(packet) {
            match self.codec.decode(&media) {
                Ok((seq, ts, samples)) => {
                    let frame = Frame::new(
                        samples,
                        self.codec.encoding().channels,
                        self.sample_rate,
                        ts,
                        seq,
                    );
                    self.jitter.insert(frame);
                }
                Err(e) => {
                    debug!(error = %e, "dropping undecodable media packet");
                    stats.lock().malformed_packets += 1;
                }
            }
        }
    }

    fn arrival_samples(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64 * self.sample_rate as u64 / 1_000_000
    }
}

impl Worker {
    fn run(self) {
        let encoding = self.config.stream.packet_encoding();
        let mut pipeline = Pipeline {
            codec: PacketCodec::new(encoding),
            assembler: BlockAssembler::new(self.config.fec),
            jitter: JitterBuffer::new(
                self.config.latency.target,
                encoding.sample_rate,
                encoding.channels,
            ),
            estimator: JitterEstimator::new(),
            highest_seq: 0,
            epoch: Instant::now(),
            sample_rate: encoding.sample_rate,
        };

        let mut tuner = LatencyTuner::new(&self.config.latency);
        let mut watchdog = PlaybackWatchdog::new(
            self.config.no_playback_timeout,
            self.config.choppy_playback_timeout,
            Instant::now(),
        );
        let mut report_builder = ReportBuilder::new();
        let mut control_peer: Option<SocketAddr> = None;
        let mut control_seq: u32 = 0;
        let mut last_report = Instant::now();
        let mut last_tuner_tick = Instant::now();
        let mut reported_fault: Option<TimingFault> = None;

        let mut buf = [0u8; MAX_PACKET_SIZE];
        'outer: loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            // Only the first media read of a tick blocks (up to the poll
            // tick, the socket's read timeout); the rest of the drain is
            // nonblocking so a busy stream cannot starve frame release and
            // housekeeping below.
            let mut blocking = true;
            for _ in 0..DRAIN_BUDGET {
                match self.media.recv_from(&mut buf) {
                    Ok((len, _)) => {
                        pipeline.ingest(&buf[..len], &self.stats);
                        if blocking {
                            blocking = false;
                            if let Err(e) = self.media.set_nonblocking(true) {
                                warn!(error = %e, "media socket mode change failed");
                                break;
                            }
                        }
                    }
                    Err(e) if net::is_poll_timeout(&e) => break,
                    Err(e) => {
                        warn!(error = %e, "media receive failed");
                        self.stats.lock().io_errors += 1;
                        break;
                    }
                }
            }
            if !blocking {
                if let Err(e) = self.media.set_nonblocking(false) {
                    warn!(error = %e, "media socket mode change failed");
                }
            }

            if let Some(repair) = &self.repair {
                for _ in 0..DRAIN_BUDGET {
                    match repair.recv_from(&mut buf) {
                        Ok((len, _)) => {
                            pipeline.ingest(&buf[..len], &self.stats);
                        }
                        Err(e) if net::is_poll_timeout(&e) => break,
                        Err(e) => {
                            warn!(error = %e, "repair receive failed");
                            self.stats.lock().io_errors += 1;
                            break;
                        }
                    }
                }
            }

            if let Some(control) = &self.control {
                for _ in 0..DRAIN_BUDGET {
                    match control.recv_from(&mut buf) {
                        Ok((len, from)) => {
                            if let Ok(packet) = Packet::parse(&buf[..len]) {
                                if packet.kind == Substream::Control {
                                    control_peer = Some(from);
                                    if let Ok(ControlMessage::Sender(report)) =
                                        ControlMessage::parse(&packet.payload)
                                    {
                                        debug!(
                                            stream_ts = report.stream_ts,
                                            packets = report.packet_count,
                                            "sender report"
                                        );
                                    }
                                }
                            }
                        }
                        Err(e) if net::is_poll_timeout(&e) => break,
                        Err(e) => {
                            debug!(error = %e, "control receive failed");
                            break;
                        }
                    }
                }
            }

            // Release whatever is due, up to the channel's capacity. A full
            // channel is host backpressure; frames stay buffered.
            let now = Instant::now();
            while !self.tx.is_full() {
                match pipeline.jitter.pop() {
                    JitterPop::Frame(frame) => {
                        if frame.is_gap {
                            watchdog.record_gap(now);
                        } else {
                            watchdog.record_frame(now);
                        }
                        match self.tx.try_send(frame) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => break,
                            Err(TrySendError::Disconnected(_)) => break 'outer,
                        }
                    }
                    JitterPop::NotReady => break,
                }
            }

            if now.duration_since(last_tuner_tick) >= TUNER_TICK {
                last_tuner_tick = now;
                let adjustment = tuner.tick(pipeline.jitter.occupancy());

                let fault = watchdog.check(now);
                if fault != reported_fault {
                    if let Some(f) = fault {
                        warn!(fault = %f, "playback timing fault");
                    }
                    reported_fault = fault;
                }

                let mut stats = self.stats.lock();
                stats.pacing_ratio = adjustment.ratio;
                stats.last_fault = fault;
                stats.fec = pipeline.assembler.stats();
                stats.jitter = pipeline.jitter.stats();
            }

            if now.duration_since(last_report) >= REPORT_INTERVAL {
                last_report = now;
                self.send_report(
                    &mut report_builder,
                    &pipeline,
                    control_peer,
                    control_seq,
                );
                control_seq = control_seq.wrapping_add(1);
            }
        }
        debug!("receiver worker stopped");
    }

    fn send_report(
        &self,
        builder: &mut ReportBuilder,
        pipeline: &Pipeline,
        peer: Option<SocketAddr>,
        control_seq: u32,
    ) {
        let (Some(control), Some(peer)) = (&self.control, peer) else {
            return;
        };

        let js = pipeline.jitter.stats();
        // Gaps are confirmed losses; everything received counts as such.
        let expected = js.received + js.gaps;
        let report = builder.build(
            expected,
            js.received,
            pipeline.highest_seq,
            pipeline.estimator.jitter_samples(),
            pipeline.jitter.occupancy(),
        );
        let packet =
            ControlMessage::Receiver(report).into_packet(control_seq, pipeline.arrival_samples());
        if let Ok(bytes) = packet.to_bytes() {
            if let Err(e) = control.send_to(&bytes, peer) {
                debug!(error = %e, "control send failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::fec::FecConfig;
    use crate::latency::LatencyConfig;
    use crate::session::endpoint::{Endpoint, EndpointProtocol};

    fn loopback_config(port: u16) -> ReceiverConfig {
        ReceiverConfig {
            stream: StreamConfig::default(),
            fec: FecConfig::default(),
            latency: LatencyConfig {
                target: Duration::from_millis(10),
                ..Default::default()
            },
            media: Endpoint::new(EndpointProtocol::Rtp, "127.0.0.1", port),
            repair: None,
            control: None,
            no_playback_timeout: Duration::from_secs(2),
            choppy_playback_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let mut config = loopback_config(0);
        config.media.host = "bogus".into();
        assert!(ReceiverSession::open(config).is_err());
    }

    #[test]
    fn test_read_after_close_fails() {
        let mut session = ReceiverSession::open(loopback_config(0)).unwrap();
        session.close();
        session.close(); // idempotent
        assert!(matches!(
            session.read_frame(Duration::from_millis(1)),
            Err(Error::SessionClosed)
        ));
    }

    #[test]
    fn test_steady_traffic_does_not_stall_releases() {
        let mut session = ReceiverSession::open(loopback_config(0)).unwrap();
        let sender = net::connect_socket(session.media_addr()).unwrap();

        // One 5 ms packet every 5 ms: the media socket is never idle, so
        // frame release must not wait for the drain budget to fill.
        let feeder = std::thread::spawn(move || {
            let codec = PacketCodec::new(StreamConfig::default().packet_encoding());
            let samples = vec![0.25f32; 440];
            for seq in 0..200u32 {
                let packet = codec.encode(&samples, seq, seq as u64 * 220).unwrap();
                sender.send(&packet.to_bytes().unwrap()).unwrap();
                std::thread::sleep(Duration::from_millis(5));
            }
        });

        let mut frames = 0u32;
        let mut last_release = Instant::now();
        let mut max_gap = Duration::ZERO;
        let deadline = Instant::now() + Duration::from_secs(3);
        while frames < 100 && Instant::now() < deadline {
            if let Ok(Some(_)) = session.read_frame(Duration::from_millis(50)) {
                let now = Instant::now();
                if frames > 0 {
                    max_gap = max_gap.max(now - last_release);
                }
                last_release = now;
                frames += 1;
            }
        }
        feeder.join().unwrap();

        assert!(frames >= 100, "only {} frames released", frames);
        assert!(
            max_gap < Duration::from_millis(60),
            "frame release stalled for {:?}",
            max_gap
        );
    }

    #[test]
    fn test_malformed_datagrams_counted_not_fatal() {
        let mut session = ReceiverSession::open(loopback_config(0)).unwrap();
        let sender = net::connect_socket(session.media_addr()).unwrap();
        sender.send(b"not an engine datagram").unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while session.stats().malformed_packets == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(session.stats().malformed_packets, 1);

        // The session is still alive and readable.
        assert!(matches!(
            session.read_frame(Duration::from_millis(10)),
            Ok(None)
        ));
    }
}
