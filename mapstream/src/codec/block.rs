//! Code-block coefficient coding.
//!
//! A code-block covers a rectangle of one subband. Its magnitude bit-planes
//! are coded most significant first: a per-sample tag tree resolves the first
//! plane on which each sample becomes significant, the sign follows as one
//! raw bit, and every later plane contributes one raw refinement bit per
//! already-significant sample. Samples are visited in raster order within
//! each plane.
//!
//! The tier header tells the decoder how many leading all-zero planes the
//! block skips; only the remaining planes are coded. Quality layers split
//! those planes into consecutive runs, one byte-aligned segment per layer.

use super::bits::{BitReader, BitWriter};
use super::tagtree::{TagTreeDecoder, TagTreeEncoder};
use super::{try_zeroed, CodecError};

/// Planes carried by quality layer `layer` when `total` coded planes are
/// split over `layers` layers. Earlier layers carry the more significant
/// planes and take the remainder.
pub(crate) fn planes_for_layer(total: u32, layers: u32, layer: u32) -> u32 {
    let base = total / layers;
    let rem = total % layers;
    if layer < rem {
        base + 1
    } else {
        base
    }
}

/// Decoder state for one code-block, persistent across quality layers.
pub(crate) struct BlockDecoder {
    width: usize,
    height: usize,
    tree: TagTreeDecoder,
    /// Magnitude accumulated so far, one entry per sample.
    mag: Vec<u32>,
    negative: Vec<bool>,
    significant: Vec<bool>,
    /// Coded plane count (magnitude bits minus skipped planes).
    planes: u32,
    /// Planes consumed so far.
    done: u32,
}

impl BlockDecoder {
    pub fn new(
        width: usize,
        height: usize,
        magnitude_bits: u32,
        skipped: u32,
    ) -> Result<Self, CodecError> {
        if skipped > magnitude_bits {
            return Err(CodecError::Malformed("skipped planes exceed magnitude bits"));
        }
        Ok(Self {
            width,
            height,
            tree: TagTreeDecoder::new(height, width),
            mag: try_zeroed(width * height)?,
            negative: try_zeroed(width * height)?,
            significant: try_zeroed(width * height)?,
            planes: magnitude_bits - skipped,
            done: 0,
        })
    }

    /// Decodes one byte-aligned segment carrying `planes` further planes.
    pub fn decode_segment(&mut self, data: &[u8], planes: u32) -> Result<(), CodecError> {
        if self.done + planes > self.planes {
            return Err(CodecError::Malformed("segment exceeds coded planes"));
        }
        let mut reader = BitReader::new(data);
        for _ in 0..planes {
            let plane = self.done;
            let bit = 1 << (self.planes - 1 - plane);
            for m in 0..self.height {
                for n in 0..self.width {
                    let idx = m * self.width + n;
                    if self.significant[idx] {
                        self.mag[idx] |= reader.read_bit()? * bit;
                    } else {
                        let v = self.tree.update(m, n, plane + 1, &mut reader)?;
                        if v <= plane {
                            self.significant[idx] = true;
                            self.mag[idx] |= bit;
                            self.negative[idx] = reader.read_bit()? == 1;
                        }
                    }
                }
            }
            self.done += 1;
        }
        Ok(())
    }

    /// Writes the signed coefficients into a subband-sized destination at
    /// offset `(x0, y0)`.
    pub fn write_into(&self, dest: &mut [i32], dest_width: usize, x0: usize, y0: usize) {
        for m in 0..self.height {
            for n in 0..self.width {
                let v = self.mag[m * self.width + n] as i32;
                dest[(y0 + m) * dest_width + (x0 + n)] =
                    if self.negative[m * self.width + n] { -v } else { v };
            }
        }
    }
}

/// Encoder mirror of [`BlockDecoder`].
pub(crate) struct BlockEncoder {
    width: usize,
    height: usize,
    tree: TagTreeEncoder,
    mag: Vec<u32>,
    negative: Vec<bool>,
    significant: Vec<bool>,
    planes: u32,
    done: u32,
    /// Leading all-zero planes, reported in the tier header.
    pub skipped: u32,
}

impl BlockEncoder {
    /// Builds an encoder over the block's signed coefficients, row-major
    /// `height` x `width`. Magnitudes must fit in `magnitude_bits` bits.
    pub fn new(width: usize, height: usize, magnitude_bits: u32, coeffs: &[i32]) -> Self {
        debug_assert_eq!(coeffs.len(), width * height);
        let mag: Vec<u32> = coeffs.iter().map(|&c| c.unsigned_abs()).collect();
        let negative: Vec<bool> = coeffs.iter().map(|&c| c < 0).collect();
        let top = mag.iter().copied().max().unwrap_or(0);
        debug_assert!(magnitude_bits == 32 || top < (1u32 << magnitude_bits));

        let used = 32 - top.leading_zeros();
        let skipped = magnitude_bits - used;
        let planes = used;

        // Leaf values: first significant plane index for each sample, or the
        // plane count for all-zero samples (never resolved).
        let leaves: Vec<u32> = mag
            .iter()
            .map(|&m| {
                if m == 0 {
                    planes
                } else {
                    planes - (32 - m.leading_zeros())
                }
            })
            .collect();

        Self {
            width,
            height,
            tree: TagTreeEncoder::new(height, width, &leaves),
            mag,
            negative,
            significant: vec![false; width * height],
            planes,
            done: 0,
            skipped,
        }
    }

    /// Encodes the next `planes` planes as one byte-aligned segment.
    pub fn encode_segment(&mut self, planes: u32) -> Vec<u8> {
        debug_assert!(self.done + planes <= self.planes);
        let mut writer = BitWriter::new();
        for _ in 0..planes {
            let plane = self.done;
            let bit = 1 << (self.planes - 1 - plane);
            for m in 0..self.height {
                for n in 0..self.width {
                    let idx = m * self.width + n;
                    if self.significant[idx] {
                        writer.write_bit(u32::from(self.mag[idx] & bit != 0));
                    } else {
                        self.tree.encode(m, n, plane + 1, &mut writer);
                        if self.mag[idx] & bit != 0 {
                            self.significant[idx] = true;
                            writer.write_bit(u32::from(self.negative[idx]));
                        }
                    }
                }
            }
            self.done += 1;
        }
        writer.finish()
    }

    /// Coded plane count after skipping leading zero planes.
    pub fn coded_planes(&self) -> u32 {
        self.planes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(width: usize, height: usize, magbits: u32, coeffs: &[i32], layers: u32) {
        let mut enc = BlockEncoder::new(width, height, magbits, coeffs);
        let total = enc.coded_planes();
        let skipped = enc.skipped;

        let mut dec = BlockDecoder::new(width, height, magbits, skipped).unwrap();
        for layer in 0..layers {
            let planes = planes_for_layer(total, layers, layer);
            let segment = enc.encode_segment(planes);
            dec.decode_segment(&segment, planes).unwrap();
        }

        let mut out = vec![0i32; width * height];
        dec.write_into(&mut out, width, 0, 0);
        assert_eq!(out, coeffs);
    }

    #[test]
    fn test_single_layer_round_trip() {
        let coeffs = [0, 5, -3, 12, -128, 1, 0, 77, -1];
        round_trip(3, 3, 10, &coeffs, 1);
    }

    #[test]
    fn test_multi_layer_round_trip() {
        let coeffs = [14, -200, 3, 0, 0, -7, 255, 1, -90, 31, 0, 6];
        round_trip(4, 3, 12, &coeffs, 3);
    }

    #[test]
    fn test_all_zero_block_codes_nothing() {
        let coeffs = [0i32; 16];
        let enc = BlockEncoder::new(4, 4, 8, &coeffs);
        assert_eq!(enc.coded_planes(), 0);
        assert_eq!(enc.skipped, 8);
    }

    #[test]
    fn test_skipped_planes_beyond_magbits_rejected() {
        assert!(matches!(
            BlockDecoder::new(4, 4, 6, 7),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_partial_segments_leave_low_planes_unset() {
        // Decoding only the first of two layers yields coefficients with the
        // undelivered low planes still zero.
        let coeffs = [96, -80, 0, 48];
        let mut enc = BlockEncoder::new(2, 2, 8, coeffs.as_slice());
        let total = enc.coded_planes();
        let first = planes_for_layer(total, 2, 0);
        let segment = enc.encode_segment(first);

        let mut dec = BlockDecoder::new(2, 2, 8, enc.skipped).unwrap();
        dec.decode_segment(&segment, first).unwrap();
        let mut out = vec![0i32; 4];
        dec.write_into(&mut out, 2, 0, 0);

        let mask = !((1i32 << (total - first)) - 1);
        for (got, want) in out.iter().zip(coeffs.iter()) {
            let expect = if *want < 0 {
                -((-want) & mask)
            } else {
                want & mask
            };
            assert_eq!(*got, expect);
        }
    }
}
