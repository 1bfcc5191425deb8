//! PBD8 packed-bit-difference byte codec.
//!
//! A PBD8 stream is a sequence of records, each introduced by one control
//! byte `v`:
//!
//! ```text
//!   0..=32    literal run     v + 1 bytes copied verbatim
//!  33..=127   difference run  v - 32 output bytes, four 2-bit deltas per input byte
//! 128..=255   repeat run      v - 127 copies of the following byte
//! ```
//!
//! Difference codes `0, 1, 2, 3` mean `+0, +1, +2, -1` and are applied with
//! wrapping arithmetic to the last emitted byte (the prior), least
//! significant bit pair first. There is no end marker: the consumer stops
//! reading once it has the bytes it expects.
//!
//! [`Pbd8Decoder`] resumes mid-record, so it can be drained through a
//! destination buffer of any size.

use std::io::{self, Read};

use crate::error::IoError;

/// Largest control value that starts a literal run.
const LITERAL_MAX_CONTROL: u8 = 32;

/// Largest control value that starts a difference run.
const DIFFERENCE_MAX_CONTROL: u8 = 127;

/// Longest run each record kind can express.
pub const MAX_LITERAL_RUN: usize = 33;
pub const MAX_DIFFERENCE_RUN: usize = 95;
pub const MAX_REPEAT_RUN: usize = 128;

// =============================================================================
// Decoder
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Next input byte is a control byte.
    Begin,
    /// Copying `remaining` literal bytes.
    Literal { remaining: usize },
    /// `remaining` delta outputs left; next input byte is a packed delta byte.
    Difference { remaining: usize },
    /// Partway through one packed delta byte.
    DifferenceSubpixel {
        packed: u8,
        shift: u8,
        remaining: usize,
    },
    /// Emitting `remaining` more copies of `value`.
    Repeat { remaining: usize, value: u8 },
}

/// Streaming PBD8 decoder over any byte source.
///
/// Reads return `Ok(0)` only when the source is exhausted at a record
/// boundary. A source that ends inside a record yields an
/// [`io::ErrorKind::UnexpectedEof`] error.
pub struct Pbd8Decoder<R> {
    inner: R,
    state: DecodeState,
    prior: u8,
    produced: u64,
}

impl<R: Read> Pbd8Decoder<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: DecodeState::Begin,
            prior: 0,
            produced: 0,
        }
    }

    /// Total bytes produced so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read one byte from the source; `None` on clean end of input.
    fn next_input(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn require_input(&mut self, what: &str) -> io::Result<u8> {
        self.next_input()?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "PBD8 stream ended inside a {} record after {} bytes",
                    what, self.produced
                ),
            )
        })
    }
}

impl<R: Read> Read for Pbd8Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;

        while written < buf.len() {
            match self.state {
                DecodeState::Begin => {
                    let Some(control) = self.next_input()? else {
                        break;
                    };
                    self.state = if control <= LITERAL_MAX_CONTROL {
                        DecodeState::Literal {
                            remaining: control as usize + 1,
                        }
                    } else if control <= DIFFERENCE_MAX_CONTROL {
                        DecodeState::Difference {
                            remaining: (control - LITERAL_MAX_CONTROL) as usize,
                        }
                    } else {
                        let value = self.require_input("repeat")?;
                        DecodeState::Repeat {
                            remaining: (control - DIFFERENCE_MAX_CONTROL) as usize,
                            value,
                        }
                    };
                }

                DecodeState::Literal { remaining } => {
                    let n = remaining.min(buf.len() - written);
                    let dest = &mut buf[written..written + n];
                    self.inner.read_exact(dest).map_err(|e| {
                        if e.kind() == io::ErrorKind::UnexpectedEof {
                            io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                format!(
                                    "PBD8 stream ended inside a literal record after {} bytes",
                                    self.produced
                                ),
                            )
                        } else {
                            e
                        }
                    })?;
                    self.prior = dest[n - 1];
                    written += n;
                    self.produced += n as u64;
                    self.state = if remaining == n {
                        DecodeState::Begin
                    } else {
                        DecodeState::Literal {
                            remaining: remaining - n,
                        }
                    };
                }

                DecodeState::Difference { remaining } => {
                    let packed = self.require_input("difference")?;
                    self.state = DecodeState::DifferenceSubpixel {
                        packed,
                        shift: 0,
                        remaining,
                    };
                }

                DecodeState::DifferenceSubpixel {
                    packed,
                    mut shift,
                    mut remaining,
                } => {
                    while shift < 8 && remaining > 0 && written < buf.len() {
                        self.prior = apply_delta(self.prior, (packed >> shift) & 0b11);
                        buf[written] = self.prior;
                        written += 1;
                        self.produced += 1;
                        remaining -= 1;
                        shift += 2;
                    }
                    self.state = if remaining == 0 {
                        DecodeState::Begin
                    } else if shift == 8 {
                        DecodeState::Difference { remaining }
                    } else {
                        DecodeState::DifferenceSubpixel {
                            packed,
                            shift,
                            remaining,
                        }
                    };
                }

                DecodeState::Repeat { remaining, value } => {
                    let n = remaining.min(buf.len() - written);
                    buf[written..written + n].fill(value);
                    self.prior = value;
                    written += n;
                    self.produced += n as u64;
                    self.state = if remaining == n {
                        DecodeState::Begin
                    } else {
                        DecodeState::Repeat {
                            remaining: remaining - n,
                            value,
                        }
                    };
                }
            }
        }

        Ok(written)
    }
}

#[inline]
fn apply_delta(prior: u8, code: u8) -> u8 {
    match code {
        3 => prior.wrapping_sub(1),
        d => prior.wrapping_add(d),
    }
}

/// Decode exactly `len` bytes from an in-memory PBD8 stream.
pub fn decode_pbd8(compressed: &[u8], len: usize) -> Result<Vec<u8>, IoError> {
    let mut out = vec![0u8; len];
    Pbd8Decoder::new(compressed).read_exact(&mut out)?;
    Ok(out)
}

// =============================================================================
// Encoder
// =============================================================================

/// Encode bytes as a PBD8 stream.
///
/// Runs of three or more equal bytes become repeat records, stretches whose
/// successive steps all fall in `-1..=2` become difference records when that
/// is shorter, and everything else is emitted as literal records.
pub fn encode_pbd8(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2 + 16);
    let mut prior = 0u8;
    let mut i = 0;

    while i < data.len() {
        let repeat = repeat_len(data, i);
        if repeat >= 3 {
            out.push(DIFFERENCE_MAX_CONTROL + repeat as u8);
            out.push(data[i]);
            prior = data[i];
            i += repeat;
            continue;
        }

        let diff = difference_len(data, i, prior);
        if diff >= 4 {
            out.push(LITERAL_MAX_CONTROL + diff as u8);
            let mut last = prior;
            for chunk in data[i..i + diff].chunks(4) {
                let mut packed = 0u8;
                for (k, &b) in chunk.iter().enumerate() {
                    packed |= delta_code(last, b) << (2 * k);
                    last = b;
                }
                out.push(packed);
            }
            prior = last;
            i += diff;
            continue;
        }

        let mut end = i + 1;
        while end < data.len()
            && end - i < MAX_LITERAL_RUN
            && repeat_len(data, end) < 3
            && difference_len(data, end, data[end - 1]) < 4
        {
            end += 1;
        }
        out.push((end - i - 1) as u8);
        out.extend_from_slice(&data[i..end]);
        prior = data[end - 1];
        i = end;
    }

    out
}

fn repeat_len(data: &[u8], start: usize) -> usize {
    let value = data[start];
    data[start..]
        .iter()
        .take(MAX_REPEAT_RUN)
        .take_while(|&&b| b == value)
        .count()
}

fn difference_len(data: &[u8], start: usize, prior: u8) -> usize {
    let mut last = prior;
    let mut n = 0;
    for &b in data[start..].iter().take(MAX_DIFFERENCE_RUN) {
        let step = b.wrapping_sub(last);
        if !(step <= 2 || step == u8::MAX) {
            break;
        }
        last = b;
        n += 1;
    }
    n
}

#[inline]
fn delta_code(from: u8, to: u8) -> u8 {
    match to.wrapping_sub(from) {
        u8::MAX => 3,
        step => step,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_with_chunk(stream: &[u8], total: usize, chunk: usize) -> Vec<u8> {
        let mut decoder = Pbd8Decoder::new(stream);
        let mut out = Vec::with_capacity(total);
        let mut buf = vec![0u8; chunk];
        while out.len() < total {
            let want = chunk.min(total - out.len());
            let n = decoder.read(&mut buf[..want]).unwrap();
            assert!(n > 0, "decoder stalled at {}", out.len());
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    // -------------------------------------------------------------------------
    // Record kinds
    // -------------------------------------------------------------------------

    #[test]
    fn test_literal_record() {
        let stream = [2u8, 10, 20, 30];
        assert_eq!(decode_pbd8(&stream, 3).unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn test_repeat_record() {
        // 128 -> one copy, 255 -> 128 copies
        assert_eq!(decode_pbd8(&[128, 7], 1).unwrap(), vec![7]);
        assert_eq!(decode_pbd8(&[255, 9], 128).unwrap(), vec![9; 128]);
    }

    #[test]
    fn test_difference_record_uses_prior() {
        // Literal 100, then 5 deltas: +1, +2, -1, +0 | +1
        let packed0 = 0b00_11_10_01;
        let packed1 = 0b01;
        let stream = [0u8, 100, 32 + 5, packed0, packed1];
        assert_eq!(
            decode_pbd8(&stream, 6).unwrap(),
            vec![100, 101, 103, 102, 102, 103]
        );
    }

    #[test]
    fn test_difference_wraps_bytes() {
        let stream = [0u8, 0, 32 + 2, 0b11_11];
        assert_eq!(decode_pbd8(&stream, 3).unwrap(), vec![0, 255, 254]);
    }

    #[test]
    fn test_difference_first_record_starts_from_zero() {
        let stream = [32 + 4, 0b01_01_01_01];
        assert_eq!(decode_pbd8(&stream, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    // -------------------------------------------------------------------------
    // Resumability
    // -------------------------------------------------------------------------

    #[test]
    fn test_resume_across_every_buffer_size() {
        let stream = [
            3u8, 1, 2, 3, 4, // literal
            32 + 7, 0b10_01_00_01, 0b11_10_01, // difference
            130, 42, // repeat x3
            0, 9, // literal
        ];
        let expected = decode_pbd8(&stream, 15).unwrap();
        for chunk in 1..=15 {
            assert_eq!(drain_with_chunk(&stream, 15, chunk), expected, "chunk {}", chunk);
        }
    }

    #[test]
    fn test_clean_end_returns_zero() {
        let mut decoder = Pbd8Decoder::new(&[128u8, 5][..]);
        let mut buf = [0u8; 4];
        assert_eq!(decoder.read(&mut buf).unwrap(), 1);
        assert_eq!(decoder.read(&mut buf).unwrap(), 0);
        assert_eq!(decoder.produced(), 1);
    }

    // -------------------------------------------------------------------------
    // Truncation
    // -------------------------------------------------------------------------

    #[test]
    fn test_truncated_literal_is_unexpected_eof() {
        let err = decode_pbd8(&[4, 1, 2], 5).unwrap_err();
        assert!(matches!(err, IoError::UnexpectedEof(_)));
    }

    #[test]
    fn test_truncated_repeat_is_unexpected_eof() {
        let mut decoder = Pbd8Decoder::new(&[200u8][..]);
        let mut buf = [0u8; 4];
        let err = decoder.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_stream_shorter_than_requested() {
        let err = decode_pbd8(&[0, 1], 2).unwrap_err();
        assert!(matches!(err, IoError::UnexpectedEof(_)));
    }

    // -------------------------------------------------------------------------
    // Encoder
    // -------------------------------------------------------------------------

    #[test]
    fn test_encoder_picks_repeat_for_runs() {
        let data = vec![0x40u8; 12];
        assert_eq!(encode_pbd8(&data), vec![127 + 12, 0x40]);
    }

    #[test]
    fn test_encoder_splits_long_runs() {
        let data = vec![3u8; 300];
        let encoded = encode_pbd8(&data);
        assert_eq!(encoded, vec![255, 3, 255, 3, 127 + 44, 3]);
        assert_eq!(decode_pbd8(&encoded, 300).unwrap(), data);
    }

    #[test]
    fn test_encoder_uses_difference_for_ramps() {
        let data: Vec<u8> = (0..40u8).collect();
        let encoded = encode_pbd8(&data);
        assert!(encoded.len() < data.len() / 2);
        assert_eq!(decode_pbd8(&encoded, data.len()).unwrap(), data);
    }

    #[test]
    fn test_encoder_noise_round_trips() {
        let mut state = 0x2545F491u32;
        let data: Vec<u8> = (0..1000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect();
        let encoded = encode_pbd8(&data);
        assert_eq!(decode_pbd8(&encoded, data.len()).unwrap(), data);
    }
}
