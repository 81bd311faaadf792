//! Regular elevation grid.

use super::FormatError;

/// A square grid of big-endian `i16` height samples, row-major, north-west
/// origin. A tile subdivided into `cells` quads carries `(cells + 1)^2`
/// samples, so the sample count must be a perfect square of side >= 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevationGrid {
    side: usize,
    samples: Vec<i16>,
}

impl ElevationGrid {
    /// Parses a grid payload.
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        if data.is_empty() {
            return Err(FormatError::Truncated);
        }
        if data.len() % 2 != 0 {
            return Err(FormatError::Corrupt("odd byte length"));
        }
        let count = data.len() / 2;
        let side = (count as f64).sqrt() as usize;
        // Integer square root check, guarding against rounding either way.
        let side = if (side + 1) * (side + 1) == count {
            side + 1
        } else {
            side
        };
        if side < 2 || side * side != count {
            return Err(FormatError::Corrupt("sample count is not a square grid"));
        }

        let samples = data
            .chunks_exact(2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .collect();
        Ok(Self { side, samples })
    }

    /// Samples per edge.
    pub fn side(&self) -> usize {
        self.side
    }

    /// Height at grid node `(col, row)`.
    pub fn sample(&self, col: usize, row: usize) -> i16 {
        self.samples[row * self.side + col]
    }

    /// The four corner heights, clockwise from north-west.
    pub fn corner_heights(&self) -> [i16; 4] {
        let last = self.side - 1;
        [
            self.sample(0, 0),
            self.sample(last, 0),
            self.sample(last, last),
            self.sample(0, last),
        ]
    }

    /// Bilinear height at a normalized position within the tile.
    ///
    /// `fx` runs west to east and `fy` north to south, both in `[0, 1]`;
    /// values outside are clamped to the tile edge.
    pub fn height_at(&self, fx: f64, fy: f64) -> f64 {
        let last = (self.side - 1) as f64;
        let x = (fx.clamp(0.0, 1.0)) * last;
        let y = (fy.clamp(0.0, 1.0)) * last;
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.side - 1);
        let y1 = (y0 + 1).min(self.side - 1);
        let tx = x - x0 as f64;
        let ty = y - y0 as f64;

        let top = f64::from(self.sample(x0, y0)) * (1.0 - tx) + f64::from(self.sample(x1, y0)) * tx;
        let bottom =
            f64::from(self.sample(x0, y1)) * (1.0 - tx) + f64::from(self.sample(x1, y1)) * tx;
        top * (1.0 - ty) + bottom * ty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_be_bytes()).collect()
    }

    #[test]
    fn test_parse_square_grid() {
        let samples: Vec<i16> = (0..9).collect();
        let grid = ElevationGrid::parse(&grid_bytes(&samples)).unwrap();
        assert_eq!(grid.side(), 3);
        assert_eq!(grid.sample(2, 0), 2);
        assert_eq!(grid.sample(0, 2), 6);
        assert_eq!(grid.corner_heights(), [0, 2, 8, 6]);
    }

    #[test]
    fn test_non_square_count_rejected() {
        let samples: Vec<i16> = (0..8).collect();
        assert!(matches!(
            ElevationGrid::parse(&grid_bytes(&samples)),
            Err(FormatError::Corrupt(_))
        ));
    }

    #[test]
    fn test_odd_length_rejected() {
        assert!(matches!(
            ElevationGrid::parse(&[0, 1, 2]),
            Err(FormatError::Corrupt(_))
        ));
    }

    #[test]
    fn test_empty_payload_truncated() {
        assert!(matches!(
            ElevationGrid::parse(&[]),
            Err(FormatError::Truncated)
        ));
    }

    #[test]
    fn test_single_sample_rejected() {
        // One sample is a valid square but not a grid.
        assert!(matches!(
            ElevationGrid::parse(&grid_bytes(&[42])),
            Err(FormatError::Corrupt(_))
        ));
    }

    #[test]
    fn test_bilinear_interpolation() {
        let samples = [0i16, 100, 200, 300];
        let grid = ElevationGrid::parse(&grid_bytes(&samples)).unwrap();
        assert_eq!(grid.height_at(0.0, 0.0), 0.0);
        assert_eq!(grid.height_at(1.0, 0.0), 100.0);
        assert_eq!(grid.height_at(0.5, 0.0), 50.0);
        assert_eq!(grid.height_at(0.5, 0.5), 150.0);
        // Out-of-range positions clamp to the edge.
        assert_eq!(grid.height_at(-1.0, 2.0), 200.0);
    }

    #[test]
    fn test_negative_heights() {
        let samples = [-500i16, -500, -500, -500];
        let grid = ElevationGrid::parse(&grid_bytes(&samples)).unwrap();
        assert_eq!(grid.height_at(0.3, 0.7), -500.0);
    }
}
