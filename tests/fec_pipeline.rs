//! Deterministic loss-injection tests through the full packet pipeline:
//! packetizer, FEC encoder, FEC assembler, jitter buffer.

use std::time::Duration;

use audio_link::{
    fec::{BlockAssembler, BlockEncoder, FecConfig, FecScheme},
    frame::Frame,
    jitter::{JitterBuffer, JitterPop},
    packet::{Packet, PacketCodec, PacketEncoding, Substream},
};

const SAMPLES_PER_PACKET: usize = 220;

fn codec() -> PacketCodec {
    PacketCodec::new(PacketEncoding::L16_STEREO)
}

fn media_packet(codec: &PacketCodec, seq: u32) -> Packet {
    let samples: Vec<f32> = (0..SAMPLES_PER_PACKET * 2)
        .map(|i| (((seq as usize * SAMPLES_PER_PACKET + i / 2) % 100) as f32 / 100.0) - 0.5)
        .collect();
    codec
        .encode(&samples, seq, seq as u64 * SAMPLES_PER_PACKET as u64)
        .unwrap()
}

/// Run `packet_count` media packets through encode, the loss filter, the
/// assembler and the jitter buffer; returns the released frames and the
/// buffer's stats.
fn run_pipeline(
    fec: FecConfig,
    packet_count: u32,
    mut drop_media: impl FnMut(u32) -> bool,
) -> (Vec<Frame>, JitterBuffer) {
    let codec = codec();
    let mut encoder = BlockEncoder::new(fec);
    let mut assembler = BlockAssembler::new(fec);
    // Tiny target so everything buffered is released immediately.
    let mut jitter = JitterBuffer::new(Duration::from_millis(5), 44100, 2);

    let mut wire: Vec<Packet> = Vec::new();
    for seq in 0..packet_count {
        wire.extend(encoder.push(media_packet(&codec, seq)));
    }
    wire.extend(encoder.flush());

    for packet in wire {
        if packet.kind == Substream::Media && drop_media(packet.seq) {
            continue;
        }
        for media in assembler.push(packet) {
            let (seq, ts, samples) = codec.decode(&media).unwrap();
            jitter.insert(Frame::new(samples, 2, 44100, ts, seq));
        }
    }

    let mut frames = Vec::new();
    while let JitterPop::Frame(frame) = jitter.pop() {
        frames.push(frame);
    }
    (frames, jitter)
}

#[test]
fn reed_solomon_recovers_up_to_repair_count() {
    let fec = FecConfig {
        scheme: FecScheme::ReedSolomon,
        source_count: 10,
        repair_count: 3,
        ..Default::default()
    };

    // Drop 3 packets of the first block, the maximum the code can absorb.
    let (frames, jitter) = run_pipeline(fec, 30, |seq| matches!(seq, 2 | 5 | 9));

    assert_eq!(frames.len(), 30);
    assert_eq!(jitter.stats().gaps, 0);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.sequence, i as u32);
        assert!(!frame.is_gap);
    }

    // Recovered packets carry the same audio as the originals.
    let codec = codec();
    let reference = media_packet(&codec, 5);
    let (_, _, expected) = codec.decode(&reference).unwrap();
    assert_eq!(frames[5].samples, expected);
    assert_eq!(frames[5].timestamp, 5 * SAMPLES_PER_PACKET as u64);
}

#[test]
fn reed_solomon_loss_beyond_repair_becomes_gaps() {
    let fec = FecConfig {
        scheme: FecScheme::ReedSolomon,
        source_count: 10,
        repair_count: 2,
        lookahead_blocks: 1,
        ..Default::default()
    };

    // 4 losses in block 1 with only 2 repairs; later blocks are clean and
    // push block 1 past the lookahead horizon.
    let (frames, jitter) = run_pipeline(fec, 40, |seq| (10..14).contains(&seq));

    let gaps: Vec<u32> = frames
        .iter()
        .filter(|f| f.is_gap)
        .map(|f| f.sequence)
        .collect();
    assert_eq!(gaps, vec![10, 11, 12, 13]);

    // The stream continues after the damage.
    let clean: Vec<u32> = frames
        .iter()
        .filter(|f| !f.is_gap)
        .map(|f| f.sequence)
        .collect();
    let expected: Vec<u32> = (0..10).chain(14..40).collect();
    assert_eq!(clean, expected);
    assert_eq!(jitter.stats().gaps, 4);
}

#[test]
fn staircase_recovers_one_loss_per_stripe() {
    let fec = FecConfig {
        scheme: FecScheme::Staircase,
        source_count: 9,
        repair_count: 3,
        ..Default::default()
    };

    // One loss in each of the three stripes (indices mod 3).
    let (frames, jitter) = run_pipeline(fec, 18, |seq| matches!(seq, 3 | 4 | 8));

    assert_eq!(frames.len(), 18);
    assert_eq!(jitter.stats().gaps, 0);
    assert!(frames.iter().all(|f| !f.is_gap));
}

#[test]
fn disabled_fec_passes_loss_through_as_gaps() {
    let fec = FecConfig::default();

    let (frames, jitter) = run_pipeline(fec, 20, |seq| seq == 7);

    assert_eq!(jitter.stats().gaps, 1);
    let gap = frames.iter().find(|f| f.is_gap).unwrap();
    assert_eq!(gap.sequence, 7);
    assert_eq!(gap.samples_per_channel(), SAMPLES_PER_PACKET);
}

#[test]
fn short_final_block_is_protected() {
    let fec = FecConfig {
        scheme: FecScheme::ReedSolomon,
        source_count: 10,
        repair_count: 2,
        ..Default::default()
    };

    // 14 packets: one full block and a short 4-packet block sealed by
    // flush. Drop one packet of the short block.
    let (frames, jitter) = run_pipeline(fec, 14, |seq| seq == 12);

    assert_eq!(frames.len(), 14);
    assert_eq!(jitter.stats().gaps, 0);
    assert_eq!(frames[12].sequence, 12);
    assert!(!frames[12].is_gap);
}
