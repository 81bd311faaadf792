//! Progressive decode session.
//!
//! A [`DecodeSession`] owns everything one tile's decode needs between tier
//! requests: the parsed header, the reconstructed base band per component,
//! and the lifting line buffers. Tiers decode strictly in increasing order;
//! each call consumes exactly the byte range the header declares for that
//! tier and leaves the session ready for the next one. Dropping the session
//! frees all scratch; there is no shared decoder state.

use tracing::debug;

use super::block::{planes_for_layer, BlockDecoder};
use super::header::{subband_count, StreamHeader, SubbandGeometry};
use super::lifting::synthesize_lowpass;
use super::tagtree::TagTreeDecoder;
use super::{try_zeroed, BitReader, CodecError};

/// One decoded resolution tier, 8-bit samples with components interleaved.
#[derive(Debug, Clone)]
pub struct TierPixels {
    pub tier: u32,
    pub width: usize,
    pub height: usize,
    pub components: usize,
    /// `width * height * components` samples, row-major, component-minor.
    pub samples: Vec<u8>,
}

/// Tier-header side data for one (component, subband) block grid.
struct GridInfo {
    included: Vec<bool>,
    skipped: Vec<u32>,
}

pub struct DecodeSession {
    header: StreamHeader,
    /// Reconstructed base band per component, sized to the last decoded
    /// tier's dimensions. Carried in full precision so later tiers refine
    /// the exact coefficients, not the clamped pixels.
    base: Vec<Vec<i32>>,
    /// Next tier this session will accept.
    next: u32,
    line: Vec<i32>,
    col_out: Vec<i32>,
}

impl DecodeSession {
    /// Creates a session for one stream. All scratch is sized here; failure
    /// surfaces as [`CodecError::Resource`] and leaves nothing allocated.
    pub fn new(header: StreamHeader) -> Result<Self, CodecError> {
        let side = (header.width as usize).max(header.height as usize);
        let line = try_zeroed(side)?;
        let col_out = try_zeroed(side)?;
        let base = vec![Vec::new(); header.components as usize];
        Ok(Self {
            header,
            base,
            next: 0,
            line,
            col_out,
        })
    }

    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    /// The tier the next [`decode_tier`](Self::decode_tier) call expects.
    pub fn next_tier(&self) -> u32 {
        self.next
    }

    /// Decodes tier `tier` from its body byte range.
    ///
    /// `tier_bytes` must hold exactly the range `header.tier_range(tier)`
    /// covers, as delivered by a ranged fetch. Tier 0 reconstructs the base
    /// band; tier N adds the three detail subbands onto the retained tier
    /// N-1 band and runs the inverse lifting.
    pub fn decode_tier(&mut self, tier_bytes: &[u8], tier: u32) -> Result<TierPixels, CodecError> {
        if tier != self.next {
            return Err(CodecError::OutOfOrder {
                expected: self.next,
                got: tier,
            });
        }
        if tier as usize >= self.header.tiers as usize {
            return Err(CodecError::Malformed("tier beyond stream tier count"));
        }

        let t = tier as usize;
        let layout = self.header.tier_layout(t);
        let (range_start, range_end) = self.header.tier_range(t);
        if tier_bytes.len() < range_end - range_start {
            return Err(CodecError::Truncated);
        }

        let components = self.header.components as usize;
        let layers = self.header.layers as u32;

        // Tier header segment: inclusion and skipped-plane tag trees per
        // (component, subband), from the start of the tier range.
        let mut reader = BitReader::new(tier_bytes);
        let mut grids: Vec<GridInfo> = Vec::new();
        for _component in 0..components {
            for sb in &layout.subbands {
                grids.push(read_grid_info(sb, layers, &mut reader)?);
            }
        }

        // Code-block segments, located through the header index.
        let mut coeffs: Vec<Vec<i32>> = Vec::new();
        for component in 0..components {
            for (sb_idx, sb) in layout.subbands.iter().enumerate() {
                let grid = &grids[component * subband_count(t) + sb_idx];
                coeffs.push(self.decode_subband(
                    tier_bytes,
                    range_start,
                    component,
                    t,
                    sb_idx,
                    sb,
                    grid,
                )?);
            }
        }

        // Assemble and synthesize per component.
        for component in 0..components {
            if t == 0 {
                self.base[component] = std::mem::take(&mut coeffs[component]);
            } else {
                let details = &coeffs[component * 3..component * 3 + 3];
                let band = self.assemble_band(component, &layout, details)?;
                self.base[component] = band;
                self.synthesize_band(component, layout.width, layout.height);
            }
        }
        debug!(tier, width = layout.width, height = layout.height, "tier synthesized");

        let pixels = self.emit_pixels(tier, layout.width, layout.height)?;
        self.next += 1;
        Ok(pixels)
    }

    /// Decodes every included block of one subband into a coefficient
    /// rectangle.
    #[allow(clippy::too_many_arguments)]
    fn decode_subband(
        &self,
        tier_bytes: &[u8],
        range_start: usize,
        component: usize,
        tier: usize,
        sb_idx: usize,
        sb: &SubbandGeometry,
        grid: &GridInfo,
    ) -> Result<Vec<i32>, CodecError> {
        let mut out = try_zeroed(sb.width * sb.height)?;
        if sb.blocks_wide == 0 || sb.blocks_high == 0 {
            return Ok(out);
        }
        let cblk = self.header.cblk_size as usize;
        let magbits = self.header.magnitude_bits(tier, sb_idx);
        let layers = self.header.layers as u32;

        for brow in 0..sb.blocks_high {
            for bcol in 0..sb.blocks_wide {
                let block = brow * sb.blocks_wide + bcol;
                if !grid.included[block] {
                    continue;
                }
                let skipped = grid.skipped[block];
                let x0 = bcol * cblk;
                let y0 = brow * cblk;
                let bw = cblk.min(sb.width - x0);
                let bh = cblk.min(sb.height - y0);

                let mut dec = BlockDecoder::new(bw, bh, magbits, skipped)?;
                let total = magbits - skipped;
                for layer in 0..layers {
                    let planes = planes_for_layer(total, layers, layer);
                    let span = self.header.block_span(
                        component,
                        tier,
                        sb_idx,
                        brow,
                        bcol,
                        layer as usize,
                    );
                    let rel = (span.offset as usize)
                        .checked_sub(range_start)
                        .ok_or(CodecError::Malformed("block span before tier range"))?;
                    let seg = tier_bytes
                        .get(rel..rel + span.length as usize)
                        .ok_or(CodecError::Truncated)?;
                    dec.decode_segment(seg, planes)?;
                }
                dec.write_into(&mut out, sb.width, x0, y0);
            }
        }
        Ok(out)
    }

    /// Places the retained base band and the three detail subbands into one
    /// quadrant-layout array for this tier.
    fn assemble_band(
        &self,
        component: usize,
        layout: &super::header::TierLayout,
        details: &[Vec<i32>],
    ) -> Result<Vec<i32>, CodecError> {
        let (w, h) = (layout.width, layout.height);
        let lw = w.div_ceil(2);
        let lh = h.div_ceil(2);
        let prev = &self.base[component];
        if prev.len() != lw * lh {
            return Err(CodecError::Malformed("base band size mismatch"));
        }

        let mut band = try_zeroed(w * h)?;
        for row in 0..lh {
            band[row * w..row * w + lw].copy_from_slice(&prev[row * lw..(row + 1) * lw]);
        }
        let hl = &details[0];
        for row in 0..lh {
            band[row * w + lw..(row + 1) * w]
                .copy_from_slice(&hl[row * (w - lw)..(row + 1) * (w - lw)]);
        }
        let lhb = &details[1];
        for row in 0..h - lh {
            band[(lh + row) * w..(lh + row) * w + lw]
                .copy_from_slice(&lhb[row * lw..(row + 1) * lw]);
        }
        let hh = &details[2];
        for row in 0..h - lh {
            band[(lh + row) * w + lw..(lh + row + 1) * w]
                .copy_from_slice(&hh[row * (w - lw)..(row + 1) * (w - lw)]);
        }
        Ok(band)
    }

    /// Inverse 2D lifting over the quadrant layout: rows first, undoing the
    /// horizontal analysis, then columns.
    fn synthesize_band(&mut self, component: usize, w: usize, h: usize) {
        let band = &mut self.base[component];
        let lw = w.div_ceil(2);
        let lh = h.div_ceil(2);

        for row in 0..h {
            let src = &band[row * w..(row + 1) * w];
            self.line[..w].copy_from_slice(src);
            synthesize_lowpass(
                &self.line[..lw],
                &self.line[lw..w],
                &mut band[row * w..(row + 1) * w],
            );
        }
        for col in 0..w {
            for row in 0..h {
                self.line[row] = band[row * w + col];
            }
            synthesize_lowpass(
                &self.line[..lh],
                &self.line[lh..h],
                &mut self.col_out[..h],
            );
            for row in 0..h {
                band[row * w + col] = self.col_out[row];
            }
        }
    }

    /// Clamped 8-bit output with the DC level shift undone.
    fn emit_pixels(&self, tier: u32, w: usize, h: usize) -> Result<TierPixels, CodecError> {
        let components = self.header.components as usize;
        let mut samples: Vec<u8> = try_zeroed(w * h * components)?;
        for (component, base) in self.base.iter().enumerate() {
            for (i, &v) in base.iter().enumerate() {
                samples[i * components + component] = (v + 128).clamp(0, 255) as u8;
            }
        }
        Ok(TierPixels {
            tier,
            width: w,
            height: h,
            components,
            samples,
        })
    }
}

/// Reads one (component, subband) grid's inclusion and skipped-plane trees
/// from the tier header segment.
fn read_grid_info(
    sb: &SubbandGeometry,
    layers: u32,
    reader: &mut BitReader<'_>,
) -> Result<GridInfo, CodecError> {
    let blocks = sb.blocks_wide * sb.blocks_high;
    if blocks == 0 {
        return Ok(GridInfo {
            included: Vec::new(),
            skipped: Vec::new(),
        });
    }

    let mut inclusion = TagTreeDecoder::new(sb.blocks_high, sb.blocks_wide);
    let mut included = vec![false; blocks];
    for layer in 0..layers {
        for brow in 0..sb.blocks_high {
            for bcol in 0..sb.blocks_wide {
                let block = brow * sb.blocks_wide + bcol;
                if included[block] {
                    continue;
                }
                let v = inclusion.update(brow, bcol, layer + 1, reader)?;
                if v <= layer {
                    included[block] = true;
                }
            }
        }
    }

    let mut skip_tree = TagTreeDecoder::new(sb.blocks_high, sb.blocks_wide);
    let mut skipped = vec![0u32; blocks];
    for brow in 0..sb.blocks_high {
        for bcol in 0..sb.blocks_wide {
            let block = brow * sb.blocks_wide + bcol;
            if !included[block] {
                continue;
            }
            // Rising threshold until the leaf resolves; bounded so corrupt
            // bits cannot spin the loop.
            let mut t = 1;
            loop {
                let v = skip_tree.update(brow, bcol, t, reader)?;
                if v < t {
                    skipped[block] = v;
                    break;
                }
                t += 1;
                if t > 33 {
                    return Err(CodecError::Malformed("skipped-plane tree unresolved"));
                }
            }
        }
    }

    Ok(GridInfo { included, skipped })
}
