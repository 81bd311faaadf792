//! Forward tile-stream encoder.
//!
//! Produces streams the decode side accepts: forward 5/3 lifting into the
//! tier pyramid, tag-tree coded tier headers, bit-plane coded block
//! segments, and the explicit block index. Exists for offline tile
//! preparation and the test suite; it always codes the full image losslessly
//! and makes no rate-control decisions beyond splitting bit-planes evenly
//! across quality layers.

use super::bits::BitWriter;
use super::block::{planes_for_layer, BlockEncoder};
use super::header::MAGIC;
use super::lifting::analyze_lowpass;
use super::tagtree::TagTreeEncoder;
use super::{CodecError, MAX_TIERS};

/// Encoder knobs.
#[derive(Debug, Clone, Copy)]
pub struct EncodeParams {
    pub tiers: u8,
    pub layers: u8,
    pub cblk_size: u16,
    pub guard_bits: u8,
}

impl Default for EncodeParams {
    fn default() -> Self {
        Self {
            tiers: 3,
            layers: 1,
            cblk_size: 32,
            guard_bits: 2,
        }
    }
}

/// Subband coefficient rectangle produced by the analysis stage.
struct Subband {
    width: usize,
    height: usize,
    coeffs: Vec<i32>,
}

/// Runs the wavelet analysis for one component, returning per-tier subband
/// lists: tier 0 holds the base band alone, higher tiers HL, LH, HH.
fn analyze_component(
    width: usize,
    height: usize,
    samples: &[u8],
    tiers: usize,
) -> Vec<Vec<Subband>> {
    let mut cur: Vec<i32> = samples.iter().map(|&s| s as i32 - 128).collect();
    let (mut w, mut h) = (width, height);
    let mut line = vec![0i32; width.max(height)];
    let mut split = vec![0i32; width.max(height)];

    let mut out: Vec<Vec<Subband>> = (0..tiers).map(|_| Vec::new()).collect();

    for tier in (1..tiers).rev() {
        let lw = w.div_ceil(2);
        let lh = h.div_ceil(2);

        // Vertical analysis per column: lowpass to the top rows, highpass
        // below.
        for col in 0..w {
            for row in 0..h {
                line[row] = cur[row * w + col];
            }
            let (low, high) = split.split_at_mut(lh);
            analyze_lowpass(&line[..h], low, &mut high[..h - lh]);
            for row in 0..h {
                cur[row * w + col] = split[row];
            }
        }
        // Horizontal analysis per row completes the quadrant layout.
        for row in 0..h {
            line[..w].copy_from_slice(&cur[row * w..(row + 1) * w]);
            let dest = &mut cur[row * w..(row + 1) * w];
            let (low, high) = dest.split_at_mut(lw);
            analyze_lowpass(&line[..w], low, high);
        }

        out[tier] = vec![
            extract(&cur, w, lw, 0, w - lw, lh),
            extract(&cur, w, 0, lh, lw, h - lh),
            extract(&cur, w, lw, lh, w - lw, h - lh),
        ];

        let ll = extract(&cur, w, 0, 0, lw, lh);
        cur = ll.coeffs;
        w = lw;
        h = lh;
    }

    out[0] = vec![Subband {
        width: w,
        height: h,
        coeffs: cur,
    }];
    out
}

fn extract(band: &[i32], band_width: usize, x0: usize, y0: usize, w: usize, h: usize) -> Subband {
    let mut coeffs = Vec::with_capacity(w * h);
    for row in 0..h {
        let start = (y0 + row) * band_width + x0;
        coeffs.extend_from_slice(&band[start..start + w]);
    }
    Subband {
        width: w,
        height: h,
        coeffs,
    }
}

fn magnitude_bits_needed(subbands: &[&Subband]) -> u32 {
    let top = subbands
        .iter()
        .flat_map(|sb| sb.coeffs.iter())
        .map(|&c| c.unsigned_abs())
        .max()
        .unwrap_or(0);
    (32 - top.leading_zeros()).max(1)
}

/// Encodes one image as a complete tile stream.
///
/// `channels` holds one `width * height` sample plane per component.
pub fn encode_stream(
    width: usize,
    height: usize,
    channels: &[Vec<u8>],
    params: &EncodeParams,
) -> Result<Vec<u8>, CodecError> {
    if width == 0 || height == 0 || width > u16::MAX as usize || height > u16::MAX as usize {
        return Err(CodecError::Malformed("image dimensions out of range"));
    }
    if channels.is_empty() || channels.len() > 4 {
        return Err(CodecError::Malformed("unsupported component count"));
    }
    if channels.iter().any(|c| c.len() != width * height) {
        return Err(CodecError::Malformed("channel size mismatch"));
    }
    let tiers = params.tiers as usize;
    if tiers == 0 || tiers > MAX_TIERS {
        return Err(CodecError::Malformed("tier count out of range"));
    }
    if params.layers == 0 {
        return Err(CodecError::Malformed("zero quality layers"));
    }
    if params.cblk_size == 0 || params.cblk_size > 1024 {
        return Err(CodecError::Malformed("code-block size out of range"));
    }
    if params.guard_bits == 0 || params.guard_bits > 8 {
        return Err(CodecError::Malformed("guard bits out of range"));
    }
    // The coarsest band must not collapse to zero samples.
    if width.div_ceil(1 << (tiers - 1)) == 0 || height.div_ceil(1 << (tiers - 1)) == 0 {
        return Err(CodecError::Malformed("too many tiers for image size"));
    }

    let components = channels.len();
    let layers = params.layers as u32;
    let guard = params.guard_bits as u32;
    let cblk = params.cblk_size as usize;

    // [component][tier][subband]
    let analyzed: Vec<Vec<Vec<Subband>>> = channels
        .iter()
        .map(|chan| analyze_component(width, height, chan, tiers))
        .collect();

    // One quantization exponent per (tier, subband), shared by components.
    let mut exponents: Vec<u8> = Vec::new();
    for tier in 0..tiers {
        for sb in 0..analyzed[0][tier].len() {
            let all: Vec<&Subband> = (0..components).map(|c| &analyzed[c][tier][sb]).collect();
            let needed = magnitude_bits_needed(&all);
            let e = (needed + 1).saturating_sub(guard).max(1);
            if e + guard > 32 {
                return Err(CodecError::Malformed("coefficients exceed representable range"));
            }
            exponents.push(e as u8);
        }
    }

    let mut body: Vec<u8> = Vec::new();
    let mut tier_ranges: Vec<(u32, u32)> = Vec::new();
    // Spans per component in (tier, subband, row, col, layer) order.
    let mut spans: Vec<Vec<(u32, u16)>> = vec![Vec::new(); components];

    let mut exp_idx = 0usize;
    for tier in 0..tiers {
        let tier_start = body.len() as u32;
        let sb_count = analyzed[0][tier].len();

        // Build every block encoder first: the tier header needs inclusion
        // and skipped-plane values before any segment is placed.
        // [component][subband][block]
        let mut encoders: Vec<Vec<Vec<Option<BlockEncoder>>>> = Vec::new();
        for component in 0..components {
            let mut per_sb = Vec::new();
            for sb_idx in 0..sb_count {
                let sb = &analyzed[component][tier][sb_idx];
                let magbits = guard + exponents[exp_idx + sb_idx] as u32 - 1;
                per_sb.push(build_block_encoders(sb, cblk, magbits));
            }
            encoders.push(per_sb);
        }

        // Tier header segment.
        let mut writer = BitWriter::new();
        for component in 0..components {
            for sb_idx in 0..sb_count {
                let sb = &analyzed[component][tier][sb_idx];
                let (bw, bh) = block_grid(sb, cblk);
                if bw == 0 || bh == 0 {
                    continue;
                }
                let blocks = &encoders[component][sb_idx];
                write_grid_info(bw, bh, blocks, layers, &mut writer);
            }
        }
        body.extend_from_slice(&writer.finish());

        // Block segments, recorded in index order.
        for component in 0..components {
            for sb_idx in 0..sb_count {
                let blocks = &mut encoders[component][sb_idx];
                for enc in blocks.iter_mut() {
                    match enc {
                        Some(enc) => {
                            let total = enc.coded_planes();
                            for layer in 0..layers {
                                let planes = planes_for_layer(total, layers, layer);
                                let seg = enc.encode_segment(planes);
                                if seg.len() > u16::MAX as usize {
                                    return Err(CodecError::Malformed(
                                        "block segment exceeds index length field",
                                    ));
                                }
                                spans[component].push((body.len() as u32, seg.len() as u16));
                                body.extend_from_slice(&seg);
                            }
                        }
                        None => {
                            for _ in 0..layers {
                                spans[component].push((body.len() as u32, 0));
                            }
                        }
                    }
                }
            }
        }

        exp_idx += sb_count;
        tier_ranges.push((tier_start, body.len() as u32));
    }

    // Header, then body.
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&(width as u16).to_be_bytes());
    out.extend_from_slice(&(height as u16).to_be_bytes());
    out.push(components as u8);
    out.push(params.tiers);
    out.push(params.layers);
    out.extend_from_slice(&params.cblk_size.to_be_bytes());
    out.push(params.guard_bits);
    out.extend_from_slice(&exponents);
    for (start, end) in &tier_ranges {
        out.extend_from_slice(&start.to_be_bytes());
        out.extend_from_slice(&end.to_be_bytes());
    }
    for component_spans in &spans {
        for (offset, length) in component_spans {
            out.extend_from_slice(&offset.to_be_bytes());
            out.extend_from_slice(&length.to_be_bytes());
        }
    }
    out.extend_from_slice(&body);
    Ok(out)
}

fn block_grid(sb: &Subband, cblk: usize) -> (usize, usize) {
    if sb.width == 0 || sb.height == 0 {
        (0, 0)
    } else {
        (sb.width.div_ceil(cblk), sb.height.div_ceil(cblk))
    }
}

/// Builds an encoder per block, `None` for all-zero blocks (excluded from
/// every layer).
fn build_block_encoders(sb: &Subband, cblk: usize, magbits: u32) -> Vec<Option<BlockEncoder>> {
    let (bw, bh) = block_grid(sb, cblk);
    let mut out = Vec::with_capacity(bw * bh);
    for brow in 0..bh {
        for bcol in 0..bw {
            let x0 = bcol * cblk;
            let y0 = brow * cblk;
            let w = cblk.min(sb.width - x0);
            let h = cblk.min(sb.height - y0);
            let mut coeffs = Vec::with_capacity(w * h);
            for row in 0..h {
                let start = (y0 + row) * sb.width + x0;
                coeffs.extend_from_slice(&sb.coeffs[start..start + w]);
            }
            if coeffs.iter().all(|&c| c == 0) {
                out.push(None);
            } else {
                out.push(Some(BlockEncoder::new(w, h, magbits, &coeffs)));
            }
        }
    }
    out
}

/// Writes one grid's inclusion and skipped-plane tag trees, mirroring the
/// decode side bit for bit.
fn write_grid_info(
    bw: usize,
    bh: usize,
    blocks: &[Option<BlockEncoder>],
    layers: u32,
    writer: &mut BitWriter,
) {
    // Inclusion leaves: layer 0 for coded blocks, past the last layer for
    // all-zero blocks so they never resolve.
    let leaves: Vec<u32> = blocks
        .iter()
        .map(|b| if b.is_some() { 0 } else { layers })
        .collect();
    let mut inclusion = TagTreeEncoder::new(bh, bw, &leaves);
    let mut included = vec![false; blocks.len()];
    for layer in 0..layers {
        for brow in 0..bh {
            for bcol in 0..bw {
                let block = brow * bw + bcol;
                if included[block] {
                    continue;
                }
                inclusion.encode(brow, bcol, layer + 1, writer);
                if leaves[block] <= layer {
                    included[block] = true;
                }
            }
        }
    }

    // Skipped-plane leaves; excluded blocks never get queried, their leaf
    // only participates in the internal minimum reduction.
    let skip_leaves: Vec<u32> = blocks
        .iter()
        .map(|b| b.as_ref().map_or(u32::MAX >> 1, |e| e.skipped))
        .collect();
    let mut skip_tree = TagTreeEncoder::new(bh, bw, &skip_leaves);
    for brow in 0..bh {
        for bcol in 0..bw {
            let block = brow * bw + bcol;
            if !included[block] {
                continue;
            }
            for t in 1..=skip_leaves[block] + 1 {
                skip_tree.encode(brow, bcol, t, writer);
            }
        }
    }
}
