//! Regular grid partition of a dataset's bounding box.
//!
//! Cells are numbered by the 3-D Morton code of their grid coordinate so
//! that file order keeps spatial neighbours close together.

use canopy_core::models::Aabb;

/// Upper bound on divisions along one axis
pub const MAX_DIVISIONS: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    bounds: Aabb,
    divisions: [u32; 3],
}

impl Grid {
    /// Choose divisions so that cells hold about `max_cell_points` points
    ///
    /// Starting from a single cell, every axis whose cell edge is at least
    /// half of the longest cell edge is split in two, until the grid has
    /// `ceil(point_count / max_cell_points)` cells. Flat inputs therefore
    /// stay one cell thick along their short axis.
    pub fn plan(bounds: Aabb, point_count: u64, max_cell_points: u64) -> Self {
        let target = point_count.div_ceil(max_cell_points.max(1)).max(1);
        let extent = bounds.extent();
        let mut divisions = [1u32; 3];

        while Self::product(divisions) < target {
            let edges: [f64; 3] = std::array::from_fn(|i| extent[i] / divisions[i] as f64);
            let longest = edges.iter().cloned().fold(0.0, f64::max);
            if longest <= 0.0 {
                break;
            }

            let mut split = false;
            for axis in 0..3 {
                if edges[axis] >= longest / 2.0 && divisions[axis] < MAX_DIVISIONS {
                    divisions[axis] *= 2;
                    split = true;
                }
            }
            if !split {
                break;
            }
        }

        Self { bounds, divisions }
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn divisions(&self) -> [u32; 3] {
        self.divisions
    }

    pub fn cell_count(&self) -> u64 {
        Self::product(self.divisions)
    }

    /// Grid coordinate of the cell containing `p`; points on the max face
    /// belong to the last cell
    pub fn coordinate(&self, p: [f64; 3]) -> [u32; 3] {
        let extent = self.bounds.extent();
        std::array::from_fn(|axis| {
            if extent[axis] <= 0.0 {
                return 0;
            }
            let t = (p[axis] - self.bounds.min[axis]) / extent[axis];
            let i = (t * self.divisions[axis] as f64).floor();
            (i.max(0.0) as u32).min(self.divisions[axis] - 1)
        })
    }

    pub fn code(&self, p: [f64; 3]) -> u64 {
        morton_encode(self.coordinate(p))
    }

    fn product(divisions: [u32; 3]) -> u64 {
        divisions.iter().map(|d| *d as u64).product()
    }
}

/// Interleave the low 21 bits of each coordinate
pub fn morton_encode(coordinate: [u32; 3]) -> u64 {
    spread(coordinate[0]) | (spread(coordinate[1]) << 1) | (spread(coordinate[2]) << 2)
}

pub fn morton_decode(code: u64) -> [u32; 3] {
    [compact(code), compact(code >> 1), compact(code >> 2)]
}

fn spread(v: u32) -> u64 {
    let mut x = (v as u64) & 0x1f_ffff;
    x = (x | (x << 32)) & 0x001f_0000_0000_ffff;
    x = (x | (x << 16)) & 0x001f_0000_ff00_00ff;
    x = (x | (x << 8)) & 0x100f_00f0_0f00_f00f;
    x = (x | (x << 4)) & 0x10c3_0c30_c30c_30c3;
    x = (x | (x << 2)) & 0x1249_2492_4924_9249;
    x
}

fn compact(code: u64) -> u32 {
    let mut x = code & 0x1249_2492_4924_9249;
    x = (x | (x >> 2)) & 0x10c3_0c30_c30c_30c3;
    x = (x | (x >> 4)) & 0x100f_00f0_0f00_f00f;
    x = (x | (x >> 8)) & 0x001f_0000_ff00_00ff;
    x = (x | (x >> 16)) & 0x001f_0000_0000_ffff;
    x = (x | (x >> 32)) & 0x1f_ffff;
    x as u32
}
