//! PBD8 codec tests through the public API.

use std::io::Read;

use volscope::codec::{decode_pbd8, encode_pbd8, Pbd8Decoder};

use super::test_utils::Lcg;

/// Flat runs, gentle ramps and noise, so every record kind appears.
fn mixed_signal() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend(std::iter::repeat(0u8).take(300));
    data.extend((0..200u32).map(|i| (i / 2) as u8));
    data.extend((0..150u32).map(|i| (i.wrapping_mul(97) ^ 0x5A) as u8));
    data.extend((0..80u32).map(|i| 200 - (i % 3) as u8));
    data.extend(std::iter::repeat(255u8).take(129));
    data
}

/// Random walk made of small steps, flat stretches and the odd jump.
fn random_walk(rng: &mut Lcg, len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(len);
    let mut value = rng.next_u32() as u8;
    while data.len() < len {
        let stretch = 1 + rng.next_u32() as usize % 48;
        let mode = rng.next_u32() % 8;
        for _ in 0..stretch.min(len - data.len()) {
            value = match mode {
                0..=4 => value.wrapping_add((rng.next_u32() % 4) as u8).wrapping_sub(1),
                5 | 6 => value,
                _ => rng.next_u32() as u8,
            };
            data.push(value);
        }
    }
    data
}

/// Difference records in a stream, and how many end part way into a byte.
fn difference_records(stream: &[u8]) -> (usize, usize) {
    let (mut records, mut partial) = (0, 0);
    let mut at = 0;
    while at < stream.len() {
        let control = stream[at];
        at += 1 + match control {
            0..=32 => control as usize + 1,
            33..=127 => {
                let count = (control - 32) as usize;
                records += 1;
                if count % 4 != 0 {
                    partial += 1;
                }
                (count + 3) / 4
            }
            _ => 1,
        };
    }
    (records, partial)
}

fn decode_in_chunks(compressed: &[u8], chunk: usize) -> Vec<u8> {
    let mut decoder = Pbd8Decoder::new(compressed);
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        let n = decoder.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(decoder.produced(), out.len() as u64);
    out
}

#[test]
fn test_hand_written_records() {
    // literal 10; diff +1 +2 -1 +0 packed low bits first; repeat 7 three times
    let stream = [0x00, 10, 36, 0b00_11_10_01, 130, 7];
    let out = decode_pbd8(&stream, 8).unwrap();
    assert_eq!(out, vec![10, 11, 13, 12, 12, 7, 7, 7]);
}

#[test]
fn test_diff_wraps_around() {
    // literal 255 then +1 wraps to 0; literal 0 then -1 wraps to 255
    let up = decode_pbd8(&[0x00, 255, 33, 0b01], 2).unwrap();
    assert_eq!(up, vec![255, 0]);
    let down = decode_pbd8(&[0x00, 0, 33, 0b11], 2).unwrap();
    assert_eq!(down, vec![0, 255]);
}

#[test]
fn test_round_trip_mixed_signal() {
    let data = mixed_signal();
    let compressed = encode_pbd8(&data);
    assert!(compressed.len() < data.len());
    assert_eq!(decode_pbd8(&compressed, data.len()).unwrap(), data);
}

#[test]
fn test_resumes_at_every_buffer_size() {
    let data = mixed_signal();
    let compressed = encode_pbd8(&data);
    for chunk in 1..=64 {
        assert_eq!(decode_in_chunks(&compressed, chunk), data, "chunk size {}", chunk);
    }
}

#[test]
fn test_random_walks_resume_at_every_buffer_size() {
    let mut rng = Lcg::new(0x9BD8_5EED);
    let (mut records, mut partial) = (0, 0);
    for _ in 0..120 {
        let len = 1 + rng.next_u32() as usize % 300;
        let data = random_walk(&mut rng, len);
        let compressed = encode_pbd8(&data);
        let (r, p) = difference_records(&compressed);
        records += r;
        partial += p;

        for chunk in 1..=len {
            assert_eq!(
                decode_in_chunks(&compressed, chunk),
                data,
                "length {} chunk size {}",
                len,
                chunk
            );
        }
    }
    assert!(records > 0);
    assert!(partial > 0);
}

#[test]
fn test_truncated_record_is_an_error() {
    // literal run of 6 with only 2 bytes present
    assert!(decode_pbd8(&[0x05, 1, 2], 6).is_err());

    let mut decoder = Pbd8Decoder::new(&[0x05u8, 1, 2][..]);
    let mut out = Vec::new();
    let err = decoder.read_to_end(&mut out).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[test]
fn test_empty_stream() {
    assert_eq!(decode_in_chunks(&[], 16), Vec::<u8>::new());
    assert!(encode_pbd8(&[]).is_empty());
}
