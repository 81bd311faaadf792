//! Pre-triangulated elevation mesh.

use super::FormatError;

/// A mesh payload: a point cloud plus triangle strips indexing into it.
///
/// All integers are big-endian `u32`, floats big-endian `f32`:
/// point count, tile width, then `(x, height, y)` per point; strip count,
/// then per strip a vertex count followed by that many point indices.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationMesh {
    tile_width: u32,
    points: Vec<[f32; 3]>,
    strips: Vec<Vec<u32>>,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn u32(&mut self) -> Result<u32, FormatError> {
        let end = self.pos + 4;
        let b = self.data.get(self.pos..end).ok_or(FormatError::Truncated)?;
        self.pos = end;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32, FormatError> {
        Ok(f32::from_bits(self.u32()?))
    }
}

impl ElevationMesh {
    /// Parses a mesh payload.
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        let mut cur = Cursor { data, pos: 0 };

        let point_count = cur.u32()? as usize;
        let tile_width = cur.u32()?;
        // Each point needs 12 bytes; reject counts the payload cannot hold
        // before allocating for them.
        if data.len().saturating_sub(cur.pos) / 12 < point_count {
            return Err(FormatError::Truncated);
        }
        let mut points = Vec::with_capacity(point_count);
        for _ in 0..point_count {
            points.push([cur.f32()?, cur.f32()?, cur.f32()?]);
        }

        let strip_count = cur.u32()? as usize;
        if data.len().saturating_sub(cur.pos) / 4 < strip_count {
            return Err(FormatError::Truncated);
        }
        let mut strips = Vec::with_capacity(strip_count);
        for _ in 0..strip_count {
            let vertex_count = cur.u32()? as usize;
            if data.len().saturating_sub(cur.pos) / 4 < vertex_count {
                return Err(FormatError::Truncated);
            }
            let mut strip = Vec::with_capacity(vertex_count);
            for _ in 0..vertex_count {
                let index = cur.u32()?;
                if index as usize >= point_count {
                    return Err(FormatError::Corrupt("strip index out of range"));
                }
                strip.push(index);
            }
            strips.push(strip);
        }

        Ok(Self {
            tile_width,
            points,
            strips,
        })
    }

    /// Width of the tile the mesh coordinates are expressed in.
    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    /// Mesh points as `(x, height, y)` triples.
    pub fn points(&self) -> &[[f32; 3]] {
        &self.points
    }

    /// Triangle strips, each a list of point indices.
    pub fn strips(&self) -> &[Vec<u32>] {
        &self.strips
    }
}
