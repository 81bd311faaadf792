//! Reversible 5/3 wavelet lifting, one-dimensional.
//!
//! Synthesis interleaves a lowpass and a highpass half back into a full
//! signal; analysis is its exact inverse. Two phase variants exist: the
//! lowpass variant for signals whose first sample is an even-phase (lowpass)
//! sample, and the highpass variant for odd-phase starts. Boundary handling
//! uses symmetric extension. The odd-length and length <= 2 cases are exact
//! inverses of the analysis side; any deviation breaks reversibility by
//! integer offsets.
//!
//! All arithmetic is on `i32` with arithmetic shifts, so negative
//! coefficients round the same way on both sides.

/// Inverse lifting, even-phase start.
///
/// `low` has `(n + 1) / 2` samples, `high` has `n / 2`, where `n` is the
/// output length. Even output samples come from the lowpass half, odd ones
/// from the highpass half.
pub fn synthesize_lowpass(low: &[i32], high: &[i32], out: &mut [i32]) {
    let n = out.len();
    debug_assert_eq!(low.len(), n.div_ceil(2));
    debug_assert_eq!(high.len(), n / 2);

    if n == 1 {
        out[0] = low[0];
        return;
    }

    // Even samples (inverse lowpass filter).
    out[0] = low[0] - ((high[0] + 1) >> 1);
    let mut i = 2;
    while i < n - 1 {
        out[i] = low[i / 2] - ((high[i / 2 - 1] + high[i / 2] + 2) >> 2);
        i += 2;
    }
    if n % 2 == 1 && n > 2 {
        // Tail boundary, symmetric extension of the highpass half.
        out[n - 1] = low[(n - 1) / 2] - ((2 * high[(n - 1) / 2 - 1] + 2) >> 2);
    }

    // Odd samples (inverse highpass filter).
    let mut i = 1;
    while i < n - 1 {
        out[i] = high[(i - 1) / 2] + ((out[i - 1] + out[i + 1]) >> 1);
        i += 2;
    }
    if n % 2 == 0 {
        out[n - 1] = high[(n - 2) / 2] + out[n - 2];
    }
}

/// Forward lifting, even-phase start. Exact inverse of
/// [`synthesize_lowpass`].
pub fn analyze_lowpass(input: &[i32], low: &mut [i32], high: &mut [i32]) {
    let n = input.len();
    debug_assert_eq!(low.len(), n.div_ceil(2));
    debug_assert_eq!(high.len(), n / 2);

    if n == 1 {
        low[0] = input[0];
        return;
    }

    // Predict: highpass from odd samples.
    let mut i = 1;
    while i < n - 1 {
        high[(i - 1) / 2] = input[i] - ((input[i - 1] + input[i + 1]) >> 1);
        i += 2;
    }
    if n % 2 == 0 {
        high[(n - 2) / 2] = input[n - 1] - input[n - 2];
    }

    // Update: lowpass from even samples.
    low[0] = input[0] + ((high[0] + 1) >> 1);
    let mut i = 2;
    while i < n - 1 {
        low[i / 2] = input[i] + ((high[i / 2 - 1] + high[i / 2] + 2) >> 2);
        i += 2;
    }
    if n % 2 == 1 && n > 2 {
        low[(n - 1) / 2] = input[n - 1] + ((2 * high[(n - 1) / 2 - 1] + 2) >> 2);
    }
}

/// Inverse lifting, odd-phase start.
///
/// `low` has `n / 2` samples, `high` has `(n + 1) / 2`. Odd output samples
/// come from the lowpass half, even ones from the highpass half. A length-1
/// signal is a lone highpass sample and is normalized for the Nyquist gain.
pub fn synthesize_highpass(low: &[i32], high: &[i32], out: &mut [i32]) {
    let n = out.len();
    debug_assert_eq!(low.len(), n / 2);
    debug_assert_eq!(high.len(), n.div_ceil(2));

    if n == 1 {
        out[0] = high[0] >> 1;
        return;
    }

    // Odd samples (inverse lowpass filter).
    let mut i = 1;
    while i < n - 1 {
        out[i] = low[(i - 1) / 2] - ((high[(i - 1) / 2] + high[(i - 1) / 2 + 1] + 2) >> 2);
        i += 2;
    }
    if n % 2 == 0 {
        out[n - 1] = low[(n - 2) / 2] - ((2 * high[(n - 2) / 2] + 2) >> 2);
    }

    // Even samples (inverse highpass filter).
    out[0] = high[0] + out[1];
    let mut i = 2;
    while i < n - 1 {
        out[i] = high[i / 2] + ((out[i - 1] + out[i + 1]) >> 1);
        i += 2;
    }
    if n % 2 == 1 {
        out[n - 1] = high[(n - 1) / 2] + out[n - 2];
    }
}

/// Forward lifting, odd-phase start. Exact inverse of
/// [`synthesize_highpass`].
pub fn analyze_highpass(input: &[i32], low: &mut [i32], high: &mut [i32]) {
    let n = input.len();
    debug_assert_eq!(low.len(), n / 2);
    debug_assert_eq!(high.len(), n.div_ceil(2));

    if n == 1 {
        high[0] = input[0] << 1;
        return;
    }

    // Predict: highpass from even samples.
    high[0] = input[0] - input[1];
    let mut i = 2;
    while i < n - 1 {
        high[i / 2] = input[i] - ((input[i - 1] + input[i + 1]) >> 1);
        i += 2;
    }
    if n % 2 == 1 {
        high[(n - 1) / 2] = input[n - 1] - input[n - 2];
    }

    // Update: lowpass from odd samples.
    let mut i = 1;
    while i < n - 1 {
        low[(i - 1) / 2] = input[i] + ((high[(i - 1) / 2] + high[(i - 1) / 2 + 1] + 2) >> 2);
        i += 2;
    }
    if n % 2 == 0 {
        low[(n - 2) / 2] = input[n - 1] + ((2 * high[(n - 2) / 2] + 2) >> 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip_lowpass(signal: &[i32]) -> Vec<i32> {
        let n = signal.len();
        let mut low = vec![0; n.div_ceil(2)];
        let mut high = vec![0; n / 2];
        analyze_lowpass(signal, &mut low, &mut high);
        let mut out = vec![0; n];
        synthesize_lowpass(&low, &high, &mut out);
        out
    }

    fn round_trip_highpass(signal: &[i32]) -> Vec<i32> {
        let n = signal.len();
        let mut low = vec![0; n / 2];
        let mut high = vec![0; n.div_ceil(2)];
        analyze_highpass(signal, &mut low, &mut high);
        let mut out = vec![0; n];
        synthesize_highpass(&low, &high, &mut out);
        out
    }

    #[test]
    fn test_length_one_signals() {
        assert_eq!(round_trip_lowpass(&[42]), vec![42]);
        assert_eq!(round_trip_highpass(&[42]), vec![42]);
        assert_eq!(round_trip_highpass(&[-17]), vec![-17]);
    }

    #[test]
    fn test_length_two_signals() {
        assert_eq!(round_trip_lowpass(&[5, -3]), vec![5, -3]);
        assert_eq!(round_trip_highpass(&[5, -3]), vec![5, -3]);
    }

    #[test]
    fn test_odd_length_signal() {
        let signal = [1, 5, -2, 9, 0, -7, 3];
        assert_eq!(round_trip_lowpass(&signal), signal.to_vec());
        assert_eq!(round_trip_highpass(&signal), signal.to_vec());
    }

    #[test]
    fn test_ramp_lowpass_half_is_smooth() {
        // A linear ramp has zero highpass response away from boundaries.
        let signal: Vec<i32> = (0..16).map(|i| i * 4).collect();
        let mut low = vec![0; 8];
        let mut high = vec![0; 8];
        analyze_lowpass(&signal, &mut low, &mut high);
        for &h in &high[..7] {
            assert_eq!(h, 0);
        }
    }

    proptest! {
        #[test]
        fn prop_lowpass_round_trip(signal in prop::collection::vec(-512i32..512, 1..64)) {
            prop_assert_eq!(round_trip_lowpass(&signal), signal);
        }

        #[test]
        fn prop_highpass_round_trip(signal in prop::collection::vec(-512i32..512, 1..64)) {
            prop_assert_eq!(round_trip_highpass(&signal), signal);
        }
    }
}
