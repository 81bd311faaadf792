//! Progressive imagery codec (WTS, "wavelet tile stream").
//!
//! A WTS stream holds one map tile as a reversible 5/3 wavelet pyramid. The
//! header carries the image geometry, the per-subband quantization table and
//! an explicit byte index of every code-block segment; the body carries, per
//! resolution tier, a bit-stuffed tier header (code-block inclusion and
//! skipped bit-planes, coded with tag trees over the block grid) followed by
//! the code-block segments themselves (per-sample significance via a tag
//! tree with rising bit-plane thresholds, then raw sign and refinement
//! bits).
//!
//! Decoding is progressive: a [`DecodeSession`] consumes one tier per call,
//! strictly in increasing order, carrying the reconstructed base band
//! forward between calls. Tier 0 is the base band alone; higher tiers add
//! the three detail subbands and run the inverse lifting.
//!
//! The matching forward encoder lives in [`encode`]; it exists for offline
//! tile preparation and for the test suite, not as a general-purpose image
//! coder.

mod bits;
mod block;
pub mod encode;
mod header;
mod lifting;
mod session;
mod tagtree;

pub use bits::{BitReader, BitWriter};
pub use header::{StreamHeader, SubbandKind, TierLayout};
pub use lifting::{
    analyze_highpass, analyze_lowpass, synthesize_highpass, synthesize_lowpass,
};
pub use session::{DecodeSession, TierPixels};
pub use tagtree::{TagTreeDecoder, TagTreeEncoder};

use thiserror::Error;

/// Largest tier count a stream may declare.
pub const MAX_TIERS: usize = 8;

/// Errors raised while parsing or decoding a tile stream.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The stream ended before the expected data.
    #[error("truncated stream")]
    Truncated,

    /// The stream violates the format.
    #[error("malformed stream: {0}")]
    Malformed(&'static str),

    /// Tiers must be decoded strictly in increasing order.
    #[error("tier {got} decoded out of order (expected {expected})")]
    OutOfOrder { expected: u32, got: u32 },

    /// Scratch allocation failed; the session must be discarded.
    #[error("decoder scratch allocation failed")]
    Resource,
}

impl From<std::collections::TryReserveError> for CodecError {
    fn from(_: std::collections::TryReserveError) -> Self {
        CodecError::Resource
    }
}

/// Allocates a zero-filled buffer, reporting failure instead of aborting.
///
/// Decoder scratch can be large (a full tier of coefficients); an allocation
/// failure must surface as [`CodecError::Resource`] so the decode worker can
/// drop the session and keep running.
pub(crate) fn try_zeroed<T: Clone + Default>(len: usize) -> Result<Vec<T>, CodecError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)?;
    v.resize(len, T::default());
    Ok(v)
}
