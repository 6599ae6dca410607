//! Quantized byte layout shared by the cache payload and the snapshot file.
//!
//! ```text
//! payload := record_size:u8 records
//! records := count:i32 (item_id:i32 scaled:i8){count}
//! ```
//!
//! All integers are little endian. `scaled` is `trunc(score / scale * 128)`
//! clamped to [-127, 127], so the decode error is at most `scale / 128`.

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use super::{ItemId, SparseVector, UserId};

/// Bytes per encoded record (4-byte id + 1-byte score).
pub const RECORD_SIZE: u8 = 5;

/// Score extent published next to a quantized payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    pub min: f32,
    pub max: f32,
}

impl Scale {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Divisor used for quantization: `max(-min, max)`.
    pub fn extent(&self) -> f32 {
        (-self.min).max(self.max)
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.min.to_le_bytes());
        out[4..].copy_from_slice(&self.max.to_le_bytes());
        out
    }

    /// `None` unless exactly two little-endian f32 values are present.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(bytes);
        let min = cursor.read_f32::<LittleEndian>().ok()?;
        let max = cursor.read_f32::<LittleEndian>().ok()?;
        (cursor.position() as usize == bytes.len()).then_some(Self { min, max })
    }
}

fn quantize_score(score: f32, scale: f32) -> i8 {
    ((score / scale * 128.0) as i32).clamp(-127, 127) as i8
}

impl SparseVector {
    /// Encodes the vector as a cache payload.
    ///
    /// With `rescale` the scores are divided by the vector's extent, otherwise
    /// by 1. The returned [`Scale`] is the vector's `(min, max)` and must be
    /// stored alongside the bytes for [`dequantize`](Self::dequantize).
    pub fn quantize(&self, rescale: bool) -> (Vec<u8>, Scale) {
        let (min, max) = self.min_max();
        let scale = Scale::new(min, max);
        let divisor = if rescale { scale.extent() } else { 1.0 };

        let mut buf = Vec::with_capacity(5 + self.len() * RECORD_SIZE as usize);
        buf.push(RECORD_SIZE);
        // Writing into a Vec cannot fail.
        let _ = self.write_records(&mut buf, divisor);
        (buf, scale)
    }

    /// Decodes a cache payload produced by [`quantize`](Self::quantize).
    ///
    /// Malformed or truncated input yields whatever records could be read.
    pub fn dequantize(owner: UserId, bytes: &[u8], scale: f32) -> SparseVector {
        let Some((&record_size, rest)) = bytes.split_first() else {
            return SparseVector::new(owner);
        };
        if record_size != RECORD_SIZE {
            log::warn!(
                "[codec] unexpected record size {} for user {}",
                record_size,
                owner
            );
            return SparseVector::new(owner);
        }
        let (vector, _) = Self::read_records(&mut Cursor::new(rest), owner, scale);
        vector
    }

    /// Writes `count` followed by the records, highest score first.
    ///
    /// A zero `scale` writes an empty record list.
    pub fn write_records<W: Write>(&self, writer: &mut W, scale: f32) -> io::Result<()> {
        if scale == 0.0 || !scale.is_finite() {
            writer.write_i32::<LittleEndian>(0)?;
            return Ok(());
        }

        writer.write_i32::<LittleEndian>(self.len() as i32)?;
        for (item, score) in self.sorted_by_score() {
            writer.write_i32::<LittleEndian>(item as i32)?;
            writer.write_i8(quantize_score(score, scale))?;
        }
        Ok(())
    }

    /// Reads a record list written by [`write_records`](Self::write_records).
    ///
    /// Never fails: a short read stops decoding. The flag is `true` only when
    /// the full declared record count was read.
    pub fn read_records<R: Read>(reader: &mut R, owner: UserId, scale: f32) -> (SparseVector, bool) {
        let Ok(count) = reader.read_i32::<LittleEndian>() else {
            return (SparseVector::new(owner), false);
        };
        let count = count.max(0) as usize;
        let mut vector = SparseVector::with_capacity(owner, count.min(4096));

        for _ in 0..count {
            let Ok(item) = reader.read_i32::<LittleEndian>() else {
                return (vector, false);
            };
            let Ok(scaled) = reader.read_i8() else {
                return (vector, false);
            };
            vector.set(item as ItemId, scaled as f32 * scale / 128.0);
        }
        (vector, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    #[test]
    fn test_quantize_known_values() {
        let v: SparseVector = [(10, 1.0), (20, -0.5)].into_iter().collect();
        let (bytes, scale) = v.quantize(true);

        assert_eq!(scale.extent(), 1.0);
        assert_eq!(bytes[0], RECORD_SIZE);
        assert_eq!(i32::from_le_bytes(bytes[1..5].try_into().unwrap()), 2);
        assert_eq!(i32::from_le_bytes(bytes[5..9].try_into().unwrap()), 10);
        assert_eq!(bytes[9] as i8, 127);
        assert_eq!(i32::from_le_bytes(bytes[10..14].try_into().unwrap()), 20);
        assert_eq!(bytes[14] as i8, -64);

        let back = SparseVector::dequantize(7, &bytes, scale.extent());
        assert_eq!(back.owner(), 7);
        assert!((back.get(10) - 1.0).abs() <= 1.0 / 128.0);
        assert!((back.get(20) + 0.5).abs() <= 1.0 / 128.0);
    }

    #[test]
    fn test_records_sorted_descending() {
        let v: SparseVector = [(1, -0.2), (2, 0.9), (3, 0.1)].into_iter().collect();
        let (bytes, scale) = v.quantize(true);
        let back = SparseVector::dequantize(0, &bytes, scale.extent());
        let order: Vec<u32> = back.items().collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_round_trip_error_bound() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let magnitude = rng.random_range(0.1f32..50.0);
            let v: SparseVector = (0..rng.random_range(1..40u32))
                .map(|i| (i, (rng.random::<f32>() * 2.0 - 1.0) * magnitude))
                .collect();
            let (bytes, scale) = v.quantize(true);
            let extent = scale.extent();
            let back = SparseVector::dequantize(0, &bytes, extent);

            assert_eq!(back.len(), v.len());
            for (item, score) in v.iter() {
                let decoded = back.get(item);
                assert!(
                    (decoded - score).abs() <= extent / 128.0 + 1e-5,
                    "item {}: {} vs {}",
                    item,
                    score,
                    decoded
                );
                if score.abs() > extent / 128.0 {
                    assert_eq!(decoded.signum(), score.signum());
                }
            }
        }
    }

    #[test]
    fn test_all_zero_vector_encodes_no_records() {
        let v: SparseVector = [(1, 0.0), (2, 0.0)].into_iter().collect();
        let (bytes, scale) = v.quantize(true);
        assert_eq!(scale, Scale::new(0.0, 0.0));
        assert_eq!(bytes.len(), 5);
        assert!(SparseVector::dequantize(0, &bytes, 0.0).is_empty());
    }

    #[test]
    fn test_unscaled_clamps_large_scores() {
        let v: SparseVector = [(1, 3.0), (2, -3.0)].into_iter().collect();
        let (bytes, _) = v.quantize(false);
        let back = SparseVector::dequantize(0, &bytes, 1.0);
        assert!((back.get(1) - 127.0 / 128.0).abs() < 1e-6);
        assert!((back.get(2) + 127.0 / 128.0).abs() < 1e-6);
    }

    #[test]
    fn test_truncated_payload_decodes_prefix() {
        let v: SparseVector = [(1, 1.0), (2, 0.5), (3, 0.25)].into_iter().collect();
        let (bytes, scale) = v.quantize(true);
        let cut = &bytes[..bytes.len() - 3];
        let back = SparseVector::dequantize(0, cut, scale.extent());
        assert_eq!(back.len(), 2);

        assert!(SparseVector::dequantize(0, &[], 1.0).is_empty());
        assert!(SparseVector::dequantize(0, &[9, 1, 0, 0, 0], 1.0).is_empty());
    }

    #[test]
    fn test_scale_bytes() {
        let scale = Scale::new(-0.25, 2.0);
        assert_eq!(Scale::from_bytes(&scale.to_bytes()), Some(scale));
        assert_eq!(Scale::from_bytes(&[0, 0, 0]), None);
        assert_eq!(scale.extent(), 2.0);
    }
}
