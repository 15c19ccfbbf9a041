//! Delimited, checksummed packet framing.
//!
//! Serializes one forwarded reading into a fixed 9-byte frame and emits it
//! byte-by-byte under a ready/valid handshake with the downstream byte
//! transmitter: state only advances on acceptance, exactly one byte per
//! accepted call, and a new frame never starts before the previous end
//! delimiter has been accepted.
//!
//! Wire layout, big-endian multi-byte fields:
//!
//! ```text
//! 0x7E  source  0x09  ts_hi  ts_lo  val_hi  val_lo  checksum  0x7E
//! ```
//!
//! The checksum is the two's complement of the running sum (mod 256) of the
//! bytes from the start delimiter through the value low byte, so the eight
//! bytes preceding the end delimiter sum to zero mod 256 — the invariant a
//! receiver checks.

use crate::sensors::{Reading, SourceId};
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use thiserror::Error;

/// Total frame length in bytes.
pub const FRAME_LEN: usize = 9;
/// Start and end delimiter byte.
pub const FRAME_DELIMITER: u8 = 0x7E;
/// Fixed length byte carried inside every frame.
pub const FRAME_LENGTH_BYTE: u8 = FRAME_LEN as u8;
/// Bytes covered by the checksum (start delimiter through value low).
const CHECKSUM_SPAN: usize = 7;

const_assert_eq!(FRAME_LEN, CHECKSUM_SPAN + 2);

/// Byte-transmitter handshake consumed by the framer. `accept` returns
/// whether the byte was taken this tick; the framer holds the byte and
/// retries next tick otherwise.
pub trait ByteSink {
    fn accept(&mut self, byte: u8) -> bool;
}

/// Two's-complement checksum over `bytes`, mod 256.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes
        .iter()
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte));
    sum.wrapping_neg()
}

/// Encode one reading into its 9-byte wire frame. The timestamp field is
/// the low 16 bits of the capture tick.
#[must_use]
pub fn encode(reading: &Reading) -> [u8; FRAME_LEN] {
    let timestamp = reading.capture_tick as u16;
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = FRAME_DELIMITER;
    // 2-bit source id, upper 6 bits reserved-zero
    frame[1] = reading.source.index() as u8;
    frame[2] = FRAME_LENGTH_BYTE;
    frame[3] = (timestamp >> 8) as u8;
    frame[4] = (timestamp & 0xFF) as u8;
    frame[5] = (reading.value >> 8) as u8;
    frame[6] = (reading.value & 0xFF) as u8;
    frame[7] = checksum(&frame[..CHECKSUM_SPAN]);
    frame[8] = FRAME_DELIMITER;
    frame
}

/// Decode errors for the receiver-side validation helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame must be exactly {FRAME_LEN} bytes")]
    BadLength,
    #[error("missing start or end delimiter")]
    BadDelimiter,
    #[error("length byte mismatch")]
    BadLengthByte,
    #[error("source id out of range")]
    BadSource,
    #[error("checksum mismatch")]
    BadChecksum,
}

/// A frame decoded and validated back into its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedFrame {
    pub source: SourceId,
    pub value: u16,
    pub timestamp: u16,
}

/// Validate and decode one wire frame.
pub fn decode(bytes: &[u8]) -> Result<DecodedFrame, FrameError> {
    if bytes.len() != FRAME_LEN {
        return Err(FrameError::BadLength);
    }
    if bytes[0] != FRAME_DELIMITER || bytes[FRAME_LEN - 1] != FRAME_DELIMITER {
        return Err(FrameError::BadDelimiter);
    }
    if bytes[2] != FRAME_LENGTH_BYTE {
        return Err(FrameError::BadLengthByte);
    }
    if checksum(&bytes[..CHECKSUM_SPAN]) != bytes[CHECKSUM_SPAN] {
        return Err(FrameError::BadChecksum);
    }
    let source = match bytes[1] & 0x03 {
        0 => SourceId::Thermo,
        1 => SourceId::Baro,
        2 => SourceId::Motion,
        _ => return Err(FrameError::BadSource),
    };
    Ok(DecodedFrame {
        source,
        value: (u16::from(bytes[5]) << 8) | u16::from(bytes[6]),
        timestamp: (u16::from(bytes[3]) << 8) | u16::from(bytes[4]),
    })
}

/// Framer state: one per-byte emission state plus a one-tick settle before
/// the next frame may load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FramerState {
    Idle,
    StartDelim,
    SourceId,
    Length,
    TsHigh,
    TsLow,
    ValHigh,
    ValLow,
    Checksum,
    EndDelim,
    Settle,
}

impl FramerState {
    /// Index of the byte emitted in this state, if any.
    fn byte_index(self) -> Option<usize> {
        match self {
            FramerState::Idle | FramerState::Settle => None,
            FramerState::StartDelim => Some(0),
            FramerState::SourceId => Some(1),
            FramerState::Length => Some(2),
            FramerState::TsHigh => Some(3),
            FramerState::TsLow => Some(4),
            FramerState::ValHigh => Some(5),
            FramerState::ValLow => Some(6),
            FramerState::Checksum => Some(7),
            FramerState::EndDelim => Some(8),
        }
    }

    fn next(self) -> FramerState {
        match self {
            FramerState::Idle => FramerState::Idle,
            FramerState::StartDelim => FramerState::SourceId,
            FramerState::SourceId => FramerState::Length,
            FramerState::Length => FramerState::TsHigh,
            FramerState::TsHigh => FramerState::TsLow,
            FramerState::TsLow => FramerState::ValHigh,
            FramerState::ValHigh => FramerState::ValLow,
            FramerState::ValLow => FramerState::Checksum,
            FramerState::Checksum => FramerState::EndDelim,
            FramerState::EndDelim => FramerState::Settle,
            FramerState::Settle => FramerState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FramerStats {
    pub frames_emitted: u32,
    pub bytes_emitted: u32,
    pub rejected_ticks: u32,
}

/// The packet framer state machine.
///
/// No error states: malformed decisions are rejected upstream, so the
/// framer assumes every loaded reading is valid.
#[derive(Debug)]
pub struct PacketFramer {
    state: FramerState,
    frame: ArrayVec<u8, FRAME_LEN>,
    stats: FramerStats,
}

impl PacketFramer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: FramerState::Idle,
            frame: ArrayVec::new(),
            stats: FramerStats::default(),
        }
    }

    /// Whether a new reading may be loaded this tick.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.state == FramerState::Idle
    }

    /// Load one forwarded reading. Must only be called when [`ready`].
    ///
    /// [`ready`]: PacketFramer::ready
    pub fn load(&mut self, reading: &Reading) {
        debug_assert!(
            self.ready(),
            "framer loaded while a frame is still in flight"
        );
        self.frame.clear();
        self.frame.extend(encode(reading));
        self.state = FramerState::StartDelim;
    }

    /// Advance one tick: offer at most one byte to the sink, move on only
    /// if it was accepted.
    pub fn step(&mut self, sink: &mut dyn ByteSink) {
        match self.state.byte_index() {
            Some(index) => {
                if sink.accept(self.frame[index]) {
                    self.stats.bytes_emitted += 1;
                    if self.state == FramerState::EndDelim {
                        self.stats.frames_emitted += 1;
                    }
                    self.state = self.state.next();
                } else {
                    self.stats.rejected_ticks += 1;
                }
            }
            None => {
                // Settle decays to Idle on its own; Idle holds
                self.state = self.state.next();
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> FramerState {
        self.state
    }

    #[must_use]
    pub fn stats(&self) -> &FramerStats {
        &self.stats
    }
}

impl Default for PacketFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Capture {
        bytes: Vec<u8>,
        accepting: bool,
    }

    impl Capture {
        fn new() -> Self {
            Self {
                bytes: Vec::new(),
                accepting: true,
            }
        }
    }

    impl ByteSink for Capture {
        fn accept(&mut self, byte: u8) -> bool {
            if self.accepting {
                self.bytes.push(byte);
            }
            self.accepting
        }
    }

    fn reading(source: SourceId, value: u16, capture_tick: u64) -> Reading {
        Reading {
            source,
            value,
            capture_tick,
        }
    }

    #[test]
    fn test_encode_reference_frame() {
        // Thermo value 0x1234 captured at tick 100
        let frame = encode(&reading(SourceId::Thermo, 0x1234, 100));
        assert_eq!(
            frame,
            [0x7E, 0x00, 0x09, 0x00, 0x64, 0x12, 0x34, 0xCF, 0x7E]
        );
    }

    #[test]
    fn test_checksum_invariant_holds_for_varied_inputs() {
        let cases = [
            reading(SourceId::Thermo, 0x0000, 0),
            reading(SourceId::Baro, 0xFFFF, 0xFFFF),
            reading(SourceId::Motion, 0xA5C3, 123_456),
            reading(SourceId::Thermo, 0x8001, 1),
        ];
        for case in &cases {
            let frame = encode(case);
            let sum = frame[..FRAME_LEN - 1]
                .iter()
                .fold(0u8, |acc, b| acc.wrapping_add(*b));
            assert_eq!(sum, 0, "pre-delimiter bytes must sum to zero mod 256");
        }
    }

    #[test]
    fn test_decode_round_trip_and_rejection() {
        let original = reading(SourceId::Baro, 0xBEEF, 0x0102);
        let frame = encode(&original);
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.source, SourceId::Baro);
        assert_eq!(decoded.value, 0xBEEF);
        assert_eq!(decoded.timestamp, 0x0102);

        let mut corrupted = frame;
        corrupted[5] ^= 0x10;
        assert_eq!(decode(&corrupted), Err(FrameError::BadChecksum));
        assert_eq!(decode(&frame[..8]), Err(FrameError::BadLength));
    }

    #[test]
    fn test_one_byte_per_tick() {
        let mut framer = PacketFramer::new();
        let mut sink = Capture::new();

        framer.load(&reading(SourceId::Thermo, 0x1234, 100));
        for emitted in 1..=FRAME_LEN {
            framer.step(&mut sink);
            assert_eq!(sink.bytes.len(), emitted);
        }
        assert_eq!(framer.state(), FramerState::Settle);
        framer.step(&mut sink);
        assert!(framer.ready());
        assert_eq!(framer.stats().frames_emitted, 1);
    }

    #[test]
    fn test_backpressure_holds_state() {
        let mut framer = PacketFramer::new();
        let mut sink = Capture::new();

        framer.load(&reading(SourceId::Motion, 0xAAAA, 7));
        framer.step(&mut sink);
        assert_eq!(sink.bytes, vec![FRAME_DELIMITER]);

        // The sink refusing bytes must freeze the framer mid-frame
        sink.accepting = false;
        for _ in 0..5 {
            framer.step(&mut sink);
        }
        assert_eq!(sink.bytes.len(), 1);
        assert_eq!(framer.stats().rejected_ticks, 5);
        assert!(!framer.ready());

        sink.accepting = true;
        for _ in 0..(FRAME_LEN - 1) {
            framer.step(&mut sink);
        }
        assert_eq!(sink.bytes.len(), FRAME_LEN);
        assert_eq!(decode(&sink.bytes).unwrap().value, 0xAAAA);
    }
}
