//! Tag-tree coding.
//!
//! A tag tree codes a 2D matrix of non-negative integers with minimal bits.
//! Each decode step answers, for one element and one threshold, whether the
//! element's value is greater than or equal to the threshold, refining the
//! decoder's lower bound as a side effect. Thresholds for a given element
//! must never decrease across calls; the established lower bound is
//! monotonic.
//!
//! The tree is a quad-tree: level 0 holds the matrix leaves, each higher
//! level halves both dimensions (rounding up), and every internal node's
//! value is the minimum of its children.

use super::bits::{BitReader, BitWriter};
use super::CodecError;

/// Value meaning "nothing decoded yet" / "not resolved below threshold".
const UNKNOWN: u32 = u32::MAX;

fn level_count(mut w: usize, mut h: usize) -> usize {
    if w == 0 || h == 0 {
        return 0;
    }
    let mut lvls = 1;
    while w != 1 || h != 1 {
        w = (w + 1) >> 1;
        h = (h + 1) >> 1;
        lvls += 1;
    }
    lvls
}

fn level_width(w: usize, k: usize) -> usize {
    (w + (1 << k) - 1) >> k
}

fn node_index(m: usize, n: usize, w: usize, k: usize) -> usize {
    (m >> k) * level_width(w, k) + (n >> k)
}

/// Decoder half of the tag tree.
pub struct TagTreeDecoder {
    w: usize,
    h: usize,
    lvls: usize,
    /// Decoded values per level; `UNKNOWN` until resolved.
    values: Vec<Vec<u32>>,
    /// Per-node threshold state.
    states: Vec<Vec<u32>>,
}

impl TagTreeDecoder {
    /// Creates a decoder for an `h` x `w` matrix.
    pub fn new(h: usize, w: usize) -> Self {
        let lvls = level_count(w, h);
        let mut values = Vec::with_capacity(lvls);
        let mut states = Vec::with_capacity(lvls);
        let (mut lw, mut lh) = (w, h);
        for _ in 0..lvls {
            values.push(vec![UNKNOWN; lw * lh]);
            states.push(vec![0; lw * lh]);
            lw = (lw + 1) >> 1;
            lh = (lh + 1) >> 1;
        }
        Self {
            w,
            h,
            lvls,
            values,
            states,
        }
    }

    /// Decodes information for element `(m, n)` against threshold `t`,
    /// returning the updated value lower bound.
    ///
    /// The bound is exact once it drops below `t`. Thresholds for one
    /// element must be non-decreasing across calls.
    pub fn update(
        &mut self,
        m: usize,
        n: usize,
        t: u32,
        reader: &mut BitReader<'_>,
    ) -> Result<u32, CodecError> {
        debug_assert!(m < self.h && n < self.w);

        let mut k = self.lvls - 1;
        let mut tmin = self.states[k][0];
        let mut idx = node_index(m, n, self.w, k);

        loop {
            let mut ts = self.states[k][idx].max(tmin);
            let mut tv = self.values[k][idx];

            while t > ts {
                if tv >= ts {
                    if reader.read_bit()? == 0 {
                        // Value is known to exceed the current state.
                        ts += 1;
                    } else {
                        // Value equals the current state; node resolved.
                        tv = ts;
                        ts += 1;
                    }
                } else {
                    ts = t;
                    break;
                }
            }

            self.states[k][idx] = ts;
            self.values[k][idx] = tv;

            if k == 0 {
                return Ok(tv);
            }
            tmin = ts.min(tv);
            k -= 1;
            idx = node_index(m, n, self.w, k);
        }
    }

    /// The last established bound for `(m, n)` without consuming bits.
    pub fn value(&self, m: usize, n: usize) -> u32 {
        self.values[0][m * self.w + n]
    }
}

/// Encoder half of the tag tree; emits exactly the bits the decoder reads.
pub struct TagTreeEncoder {
    w: usize,
    h: usize,
    lvls: usize,
    /// True values per level (internal nodes = min of children).
    values: Vec<Vec<u32>>,
    /// Per-node threshold state, mirroring the decoder.
    states: Vec<Vec<u32>>,
}

impl TagTreeEncoder {
    /// Creates an encoder over a row-major `h` x `w` value matrix.
    pub fn new(h: usize, w: usize, leaves: &[u32]) -> Self {
        debug_assert_eq!(leaves.len(), w * h);
        let lvls = level_count(w, h);
        let mut values: Vec<Vec<u32>> = Vec::with_capacity(lvls);
        let mut states = Vec::with_capacity(lvls);

        let (mut lw, mut lh) = (w, h);
        for k in 0..lvls {
            if k == 0 {
                values.push(leaves.to_vec());
            } else {
                let (pw, ph) = (level_width(w, k - 1), level_width(h, k - 1));
                let mut level = vec![UNKNOWN; lw * lh];
                for m in 0..ph {
                    for n in 0..pw {
                        let child = values[k - 1][m * pw + n];
                        let parent = &mut level[(m >> 1) * lw + (n >> 1)];
                        *parent = (*parent).min(child);
                    }
                }
                values.push(level);
            }
            states.push(vec![0; lw * lh]);
            lw = (lw + 1) >> 1;
            lh = (lh + 1) >> 1;
        }

        Self {
            w,
            h,
            lvls,
            values,
            states,
        }
    }

    /// Encodes element `(m, n)` against threshold `t`.
    pub fn encode(&mut self, m: usize, n: usize, t: u32, writer: &mut BitWriter) {
        debug_assert!(m < self.h && n < self.w);

        let mut k = self.lvls - 1;
        let mut tmin = self.states[k][0];
        let mut idx = node_index(m, n, self.w, k);

        loop {
            let mut ts = self.states[k][idx].max(tmin);
            let v = self.values[k][idx];

            while t > ts {
                if v >= ts {
                    // The decoder's bound is still at `ts`; tell it whether
                    // the true value stops here.
                    if v == ts {
                        writer.write_bit(1);
                    } else {
                        writer.write_bit(0);
                    }
                    ts += 1;
                } else {
                    ts = t;
                    break;
                }
            }

            self.states[k][idx] = ts;

            if k == 0 {
                return;
            }
            // Mirror the decoder's knowledge: the value is only visible to
            // it once resolved strictly below the state.
            let tv = if v < ts { v } else { UNKNOWN };
            tmin = ts.min(tv);
            k -= 1;
            idx = node_index(m, n, self.w, k);
        }
    }
}
