//! Stream header parsing and pyramid geometry.
//!
//! The header is fixed-layout big-endian: magic, image geometry, the
//! per-subband quantization exponents, per-tier body byte ranges, and an
//! explicit index of every code-block segment. Everything a caller needs to
//! issue one ranged fetch per tier, or to seek straight to a block segment,
//! is resolved here up front.

use super::{CodecError, MAX_TIERS};

/// Stream magic, first four bytes of every tile stream.
pub const MAGIC: [u8; 4] = *b"WTS1";

/// Largest code-block side accepted from a header.
const MAX_CBLK_SIZE: u16 = 1024;

/// Subband identity within a resolution tier.
///
/// Tier 0 consists of the single base band; every higher tier adds the three
/// detail subbands produced by one 2D lifting split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubbandKind {
    /// Base band (tier 0 only).
    LowLow,
    /// Horizontal detail, right quadrant.
    HighLow,
    /// Vertical detail, lower quadrant.
    LowHigh,
    /// Diagonal detail, corner quadrant.
    HighHigh,
}

/// One code-block segment's position within the stream body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    /// Byte offset relative to the body start.
    pub offset: u32,
    /// Segment length in bytes; zero means the block contributes nothing
    /// in this quality layer.
    pub length: u16,
}

/// Geometry of one subband: sample dimensions and its code-block grid.
#[derive(Debug, Clone, Copy)]
pub struct SubbandGeometry {
    pub kind: SubbandKind,
    pub width: usize,
    pub height: usize,
    pub blocks_wide: usize,
    pub blocks_high: usize,
}

impl SubbandGeometry {
    fn new(kind: SubbandKind, width: usize, height: usize, cblk: usize) -> Self {
        Self {
            kind,
            width,
            height,
            blocks_wide: if width == 0 { 0 } else { width.div_ceil(cblk) },
            blocks_high: if height == 0 { 0 } else { height.div_ceil(cblk) },
        }
    }
}

/// Geometry of one resolution tier: the band dimensions after this tier's
/// synthesis and the subbands whose coefficients it carries.
#[derive(Debug, Clone)]
pub struct TierLayout {
    pub tier: usize,
    /// Band width once this tier is synthesized.
    pub width: usize,
    /// Band height once this tier is synthesized.
    pub height: usize,
    /// Tier 0: the lone base band. Higher tiers: HL, LH, HH in coding order.
    pub subbands: Vec<SubbandGeometry>,
}

/// Parsed stream header plus the code-block index.
#[derive(Debug, Clone)]
pub struct StreamHeader {
    pub width: u16,
    pub height: u16,
    pub components: u8,
    pub tiers: u8,
    pub layers: u8,
    pub cblk_size: u16,
    pub guard_bits: u8,
    /// Total header length; the body starts at this offset.
    pub header_len: usize,
    /// Quantization exponent per (tier, subband), tier-major.
    exponents: Vec<u8>,
    /// Body-relative (start, end) byte range per tier.
    tier_ranges: Vec<(u32, u32)>,
    /// Flattened block index, component / tier / subband / row / col / layer.
    index: Vec<BlockSpan>,
    /// Start of each (component, tier, subband) run within `index`.
    segment_starts: Vec<usize>,
}

/// Little cursor over the header bytes.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated)?;
        let slice = self.data.get(self.pos..end).ok_or(CodecError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Subbands coded in tier `t`: the base band alone at tier 0, the three
/// detail bands above.
pub(crate) fn subband_count(tier: usize) -> usize {
    if tier == 0 {
        1
    } else {
        3
    }
}

/// Index of the (tier, subband) pair in a tier-major flat table.
fn tier_subband_index(tier: usize, subband: usize) -> usize {
    if tier == 0 {
        0
    } else {
        1 + 3 * (tier - 1) + subband
    }
}

impl StreamHeader {
    /// Parses the header and block index from the front of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Cursor { data, pos: 0 };

        if cur.take(4)? != MAGIC {
            return Err(CodecError::Malformed("bad magic"));
        }
        let width = cur.u16()?;
        let height = cur.u16()?;
        let components = cur.u8()?;
        let tiers = cur.u8()?;
        let layers = cur.u8()?;
        let cblk_size = cur.u16()?;
        let guard_bits = cur.u8()?;

        if width == 0 || height == 0 {
            return Err(CodecError::Malformed("zero image dimension"));
        }
        if components == 0 || components > 4 {
            return Err(CodecError::Malformed("unsupported component count"));
        }
        if tiers == 0 || tiers as usize > MAX_TIERS {
            return Err(CodecError::Malformed("tier count out of range"));
        }
        if layers == 0 {
            return Err(CodecError::Malformed("zero quality layers"));
        }
        if cblk_size == 0 || cblk_size > MAX_CBLK_SIZE {
            return Err(CodecError::Malformed("code-block size out of range"));
        }
        if guard_bits == 0 || guard_bits > 8 {
            return Err(CodecError::Malformed("guard bits out of range"));
        }

        let tiers_usize = tiers as usize;
        let exponent_count = 1 + 3 * (tiers_usize - 1);
        let mut exponents = Vec::with_capacity(exponent_count);
        for _ in 0..exponent_count {
            let e = cur.u8()?;
            if e == 0 || e as u32 + guard_bits as u32 > 32 {
                return Err(CodecError::Malformed("quantization exponent out of range"));
            }
            exponents.push(e);
        }

        let mut tier_ranges = Vec::with_capacity(tiers_usize);
        let mut prev_end = 0u32;
        for _ in 0..tiers_usize {
            let start = cur.u32()?;
            let end = cur.u32()?;
            if start > end || start < prev_end {
                return Err(CodecError::Malformed("tier byte ranges not monotonic"));
            }
            prev_end = end;
            tier_ranges.push((start, end));
        }

        let mut header = Self {
            width,
            height,
            components,
            tiers,
            layers,
            cblk_size,
            guard_bits,
            header_len: 0,
            exponents,
            tier_ranges,
            index: Vec::new(),
            segment_starts: Vec::new(),
        };

        let mut segment_starts =
            Vec::with_capacity(components as usize * exponent_count);
        let mut index = Vec::new();
        for _component in 0..components {
            for tier in 0..tiers_usize {
                let layout = header.tier_layout(tier);
                for sb in &layout.subbands {
                    segment_starts.push(index.len());
                    let spans =
                        sb.blocks_wide * sb.blocks_high * layers as usize;
                    index.try_reserve(spans)?;
                    for _ in 0..spans {
                        index.push(BlockSpan {
                            offset: cur.u32()?,
                            length: cur.u16()?,
                        });
                    }
                }
            }
        }

        header.index = index;
        header.segment_starts = segment_starts;
        header.header_len = cur.pos;
        Ok(header)
    }

    /// Band dimensions once tier `tier` is synthesized.
    pub fn band_dims(&self, tier: usize) -> (usize, usize) {
        let shift = self.tiers as usize - 1 - tier;
        (
            (self.width as usize).div_ceil(1 << shift),
            (self.height as usize).div_ceil(1 << shift),
        )
    }

    /// Full geometry of tier `tier`.
    pub fn tier_layout(&self, tier: usize) -> TierLayout {
        let (w, h) = self.band_dims(tier);
        let cblk = self.cblk_size as usize;
        let subbands = if tier == 0 {
            vec![SubbandGeometry::new(SubbandKind::LowLow, w, h, cblk)]
        } else {
            // Quadrant split of the tier band: the previous tier's band is
            // the low-low quadrant, details fill the rest.
            let lw = w.div_ceil(2);
            let lh = h.div_ceil(2);
            vec![
                SubbandGeometry::new(SubbandKind::HighLow, w - lw, lh, cblk),
                SubbandGeometry::new(SubbandKind::LowHigh, lw, h - lh, cblk),
                SubbandGeometry::new(SubbandKind::HighHigh, w - lw, h - lh, cblk),
            ]
        };
        TierLayout {
            tier,
            width: w,
            height: h,
            subbands,
        }
    }

    /// Body-relative byte range holding everything tier `tier` needs.
    pub fn tier_range(&self, tier: usize) -> (usize, usize) {
        let (s, e) = self.tier_ranges[tier];
        (s as usize, e as usize)
    }

    /// Magnitude bit count for (tier, subband): guard bits plus the
    /// quantization exponent, minus the sign-free normalization bit.
    pub fn magnitude_bits(&self, tier: usize, subband: usize) -> u32 {
        self.guard_bits as u32 + self.exponents[tier_subband_index(tier, subband)] as u32 - 1
    }

    /// Block segment location for one (component, tier, subband, block,
    /// quality layer) coordinate.
    pub fn block_span(
        &self,
        component: usize,
        tier: usize,
        subband: usize,
        block_row: usize,
        block_col: usize,
        layer: usize,
    ) -> BlockSpan {
        let per_component = 1 + 3 * (self.tiers as usize - 1);
        let segment = component * per_component + tier_subband_index(tier, subband);
        let base = self.segment_starts[segment];
        let geo = &self.tier_layout(tier).subbands[if tier == 0 { 0 } else { subband }];
        let block = block_row * geo.blocks_wide + block_col;
        self.index[base + block * self.layers as usize + layer]
    }
}
