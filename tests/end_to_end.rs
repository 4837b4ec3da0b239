//! Loopback sender-to-receiver tests over real UDP sockets.

use std::time::{Duration, Instant};

use audio_link::{
    config::{ReceiverConfig, SenderConfig, StreamConfig},
    fec::FecConfig,
    frame::{Frame, FrameSink, FrameSource},
    latency::LatencyConfig,
    session::{Endpoint, EndpointProtocol, ReceiverSession, SenderSession},
};

fn stream_config() -> StreamConfig {
    StreamConfig::default()
}

fn receiver_config(port: u16) -> ReceiverConfig {
    ReceiverConfig {
        stream: stream_config(),
        fec: FecConfig::default(),
        latency: LatencyConfig {
            target: Duration::from_millis(20),
            ..Default::default()
        },
        media: Endpoint::new(EndpointProtocol::Rtp, "127.0.0.1", port),
        repair: None,
        control: None,
        no_playback_timeout: Duration::from_secs(2),
        choppy_playback_timeout: Duration::from_secs(2),
    }
}

fn sender_config(media_port: u16) -> SenderConfig {
    SenderConfig {
        stream: stream_config(),
        fec: FecConfig::default(),
        media: Endpoint::new(EndpointProtocol::Rtp, "127.0.0.1", media_port),
        repair: None,
        control: None,
    }
}

/// One 5 ms frame of the default stream config.
fn tone_frame(index: u32) -> Frame {
    let samples_per_channel = 220;
    let samples: Vec<f32> = (0..samples_per_channel * 2)
        .map(|i| ((index as usize * 220 + i / 2) as f32 * 0.001).sin() * 0.5)
        .collect();
    Frame::new(
        samples,
        2,
        44100,
        index as u64 * samples_per_channel as u64,
        index,
    )
}

#[test]
fn frames_arrive_in_order_without_gaps() {
    let mut receiver = ReceiverSession::open(receiver_config(0)).unwrap();
    let mut sender =
        SenderSession::open(sender_config(receiver.media_addr().port())).unwrap();

    let frame_count = 20u32;
    for i in 0..frame_count {
        assert!(sender
            .write_frame(tone_frame(i), Duration::from_millis(100))
            .unwrap());
        // Pace roughly at real time so the jitter buffer sees a stream.
        std::thread::sleep(Duration::from_millis(5));
    }

    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    while received.len() < 10 && Instant::now() < deadline {
        if let Some(frame) = receiver.read_frame(Duration::from_millis(50)).unwrap() {
            received.push(frame);
        }
    }

    assert!(received.len() >= 10, "only {} frames arrived", received.len());
    for (i, frame) in received.iter().enumerate() {
        assert_eq!(frame.sequence, received[0].sequence + i as u32);
        assert!(!frame.is_gap, "unexpected gap at {}", i);
        assert_eq!(frame.samples_per_channel(), 220);
    }

    let stats = receiver.stats();
    assert_eq!(stats.jitter.gaps, 0);
    assert_eq!(stats.malformed_packets, 0);

    sender.close();
    receiver.close();
}

#[test]
fn payload_survives_the_wire() {
    let mut receiver = ReceiverSession::open(receiver_config(0)).unwrap();
    let mut sender =
        SenderSession::open(sender_config(receiver.media_addr().port())).unwrap();

    for i in 0..10u32 {
        sender
            .write_frame(tone_frame(i), Duration::from_millis(100))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
    }

    let deadline = Instant::now() + Duration::from_secs(3);
    let first = loop {
        assert!(Instant::now() < deadline, "no frame arrived");
        if let Some(frame) = receiver.read_frame(Duration::from_millis(50)).unwrap() {
            break frame;
        }
    };

    let expected = tone_frame(first.sequence);
    assert_eq!(first.samples.len(), expected.samples.len());
    for (a, b) in first.samples.iter().zip(&expected.samples) {
        // 16-bit wire quantization
        assert!((a - b).abs() < 1.0 / 16384.0);
    }

    sender.close();
    receiver.close();
}

#[test]
fn control_channel_reports_flow_both_ways() {
    let mut rc = receiver_config(0);
    rc.control = Some(Endpoint::new(EndpointProtocol::Rtcp, "127.0.0.1", 0));
    let mut receiver = ReceiverSession::open(rc).unwrap();

    let mut sc = sender_config(receiver.media_addr().port());
    sc.control = Some(Endpoint::new(
        EndpointProtocol::Rtcp,
        "127.0.0.1",
        receiver.control_addr().unwrap().port(),
    ));
    let mut sender = SenderSession::open(sc).unwrap();

    // Keep a stream going; reports ride alongside it.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut i = 0u32;
    while sender.stats().reports_received == 0 && Instant::now() < deadline {
        sender
            .write_frame(tone_frame(i), Duration::from_millis(100))
            .unwrap();
        i += 1;
        while receiver
            .read_frame(Duration::from_millis(1))
            .unwrap()
            .is_some()
        {}
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(
        sender.stats().reports_received > 0,
        "no receiver report reached the sender"
    );

    sender.close();
    receiver.close();
}
