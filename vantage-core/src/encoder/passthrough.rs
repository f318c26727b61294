//! Dependency-free encoder backend.
//!
//! Emits a tiny length-delimited digest unit per picture instead of
//! real compressed output, at sizes comparable to codec output so the
//! transport's backpressure behaves realistically. Stands in for a
//! real codec in tests and in the host's loopback mode; the unit
//! layout is private to this backend and its paired test decoder.

use std::collections::VecDeque;
use std::marker::PhantomData;

use crate::encoder::{EncoderBackend, EncoderConfig};
use crate::error::{Result, VantageError};
use crate::pipeline::TexturePixels;

/// Unit layout: `pts: i64 | key: u8 | w: u32 | h: u32 | len: u32 | payload`.
const UNIT_HEADER: usize = 21;

/// Packets this backend is still holding (mimics codec delay 0: one
/// in, one out).
pub struct PassthroughBackend<T> {
    pending: VecDeque<(Vec<u8>, bool)>,
    fail_next: bool,
    _texture: PhantomData<T>,
}

impl<T: TexturePixels> PassthroughBackend<T> {
    pub fn new(_config: &EncoderConfig) -> Self {
        Self {
            pending: VecDeque::new(),
            fail_next: false,
            _texture: PhantomData,
        }
    }

    /// Make the next `submit` fail (error-path injection for tests).
    pub fn fail_next(&mut self) {
        self.fail_next = true;
    }

    /// Decode a unit produced by this backend: `(pts, key, w, h, payload)`.
    pub fn decode_unit(data: &[u8]) -> Result<(i64, bool, u32, u32, &[u8])> {
        if data.len() < UNIT_HEADER {
            return Err(VantageError::ShortMessage {
                expected: UNIT_HEADER,
                actual: data.len(),
            });
        }
        let pts = i64::from_le_bytes(data[0..8].try_into().unwrap());
        let key = data[8] != 0;
        let w = u32::from_le_bytes(data[9..13].try_into().unwrap());
        let h = u32::from_le_bytes(data[13..17].try_into().unwrap());
        let len = u32::from_le_bytes(data[17..21].try_into().unwrap()) as usize;
        if data.len() < UNIT_HEADER + len {
            return Err(VantageError::ProtocolViolation("truncated unit"));
        }
        Ok((pts, key, w, h, &data[UNIT_HEADER..UNIT_HEADER + len]))
    }
}

impl<T: TexturePixels + Send> EncoderBackend for PassthroughBackend<T> {
    type Texture = T;

    fn submit(&mut self, texture: &T, pts: i64, force_key: bool) -> Result<()> {
        if self.fail_next {
            self.fail_next = false;
            return Err(VantageError::Encode("injected failure".into()));
        }
        let (w, h) = texture.dimensions();
        let pixels = texture.pixels();
        // Keyframes carry a per-16×16-block digest, deltas one byte
        // per row — sized like real intra/inter output rather than
        // raw pixels.
        let payload = if force_key {
            let blocks_x = (w as usize).div_ceil(16).max(1);
            let blocks_y = (h as usize).div_ceil(16).max(1);
            let mut digest = Vec::with_capacity(blocks_x * blocks_y);
            for by in 0..blocks_y {
                for bx in 0..blocks_x {
                    let offset = (by * 16 * w as usize + bx * 16) * 4;
                    digest.push(*pixels.get(offset).unwrap_or(&0));
                }
            }
            digest
        } else {
            let row = (w as usize * 4).max(1);
            pixels
                .chunks(row)
                .map(|r| r.iter().fold(0u8, |a, &b| a.wrapping_add(b)))
                .collect()
        };

        let mut unit = Vec::with_capacity(UNIT_HEADER + payload.len());
        unit.extend_from_slice(&pts.to_le_bytes());
        unit.push(force_key as u8);
        unit.extend_from_slice(&w.to_le_bytes());
        unit.extend_from_slice(&h.to_le_bytes());
        unit.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        unit.extend_from_slice(&payload);
        self.pending.push_back((unit, force_key));
        Ok(())
    }

    fn drain(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        let mut saw_key = false;
        while let Some((unit, key)) = self.pending.pop_front() {
            saw_key |= key;
            out.extend_from_slice(&unit);
        }
        Ok(saw_key)
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTexture;

    impl TexturePixels for FakeTexture {
        fn dimensions(&self) -> (u32, u32) {
            (4, 2)
        }
        fn pixels(&self) -> Vec<u8> {
            vec![9; 32]
        }
    }

    #[test]
    fn key_unit_carries_block_digest() {
        let cfg = EncoderConfig::new(4, 2, 30);
        let mut backend = PassthroughBackend::new(&cfg);
        backend.submit(&FakeTexture, 7, true).unwrap();

        let mut out = Vec::new();
        assert!(backend.drain(&mut out).unwrap());
        let (pts, key, w, h, payload) = PassthroughBackend::<FakeTexture>::decode_unit(&out).unwrap();
        assert_eq!(pts, 7);
        assert!(key);
        assert_eq!((w, h), (4, 2));
        assert_eq!(payload.len(), 1, "one digest byte per 16x16 block");
        assert_eq!(payload[0], 9);
    }

    #[test]
    fn drain_concatenates_units_and_keeps_key_flag() {
        let cfg = EncoderConfig::new(4, 2, 30);
        let mut backend = PassthroughBackend::new(&cfg);
        backend.submit(&FakeTexture, 0, true).unwrap();
        backend.submit(&FakeTexture, 1, false).unwrap();

        let mut out = Vec::new();
        // Drains both units at once; key flag from the first survives.
        assert!(backend.drain(&mut out).unwrap());
        let (_, key0, _, _, digest0) =
            PassthroughBackend::<FakeTexture>::decode_unit(&out).unwrap();
        assert!(key0);
        let rest = &out[UNIT_HEADER + digest0.len()..];
        let (_, key, _, _, digest) = PassthroughBackend::<FakeTexture>::decode_unit(rest).unwrap();
        assert!(!key);
        assert_eq!(digest.len(), 2, "one digest byte per row");
    }

    #[test]
    fn reset_discards_pending() {
        let cfg = EncoderConfig::new(4, 2, 30);
        let mut backend = PassthroughBackend::new(&cfg);
        backend.submit(&FakeTexture, 0, true).unwrap();
        backend.reset();
        let mut out = Vec::new();
        assert!(!backend.drain(&mut out).unwrap());
        assert!(out.is_empty());
    }
}
