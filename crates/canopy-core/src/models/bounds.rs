//! Axis-aligned bounding boxes in dataset coordinates.

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box
///
/// A freshly created box is empty (min = +inf, max = -inf) and grows with
/// [`Aabb::extend`]. Boundaries are inclusive on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Aabb {
    /// Create a box from explicit corners
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// Create an empty box that contains nothing
    pub fn empty() -> Self {
        Self { min: [f64::INFINITY; 3], max: [f64::NEG_INFINITY; 3] }
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|axis| self.min[axis] > self.max[axis])
    }

    /// Grow the box to include a point
    pub fn extend(&mut self, p: [f64; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(p[axis]);
            self.max[axis] = self.max[axis].max(p[axis]);
        }
    }

    /// Grow the box to include another box
    pub fn merge(&mut self, other: &Aabb) {
        if other.is_empty() {
            return;
        }
        self.extend(other.min);
        self.extend(other.max);
    }

    /// Smallest box containing both inputs
    pub fn union(a: &Aabb, b: &Aabb) -> Aabb {
        let mut out = *a;
        out.merge(b);
        out
    }

    pub fn contains(&self, p: [f64; 3]) -> bool {
        (0..3).all(|axis| p[axis] >= self.min[axis] && p[axis] <= self.max[axis])
    }

    pub fn contains_box(&self, other: &Aabb) -> bool {
        !other.is_empty() && self.contains(other.min) && self.contains(other.max)
    }

    /// Check if two boxes share at least one point (touching counts)
    pub fn intersects(&self, other: &Aabb) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        (0..3).all(|axis| self.min[axis] <= other.max[axis] && other.min[axis] <= self.max[axis])
    }

    /// Check if the interiors of two boxes overlap (shared faces do not count)
    pub fn overlaps_interior(&self, other: &Aabb) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        (0..3).all(|axis| self.min[axis] < other.max[axis] && other.min[axis] < self.max[axis])
    }

    pub fn extent(&self) -> [f64; 3] {
        if self.is_empty() {
            return [0.0; 3];
        }
        [self.max[0] - self.min[0], self.max[1] - self.min[1], self.max[2] - self.min[2]]
    }

    pub fn center(&self) -> [f64; 3] {
        [
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
            0.5 * (self.min[2] + self.max[2]),
        ]
    }

    /// Squared distance from a point to the box (zero inside)
    pub fn distance_squared(&self, p: [f64; 3]) -> f64 {
        (0..3)
            .map(|axis| {
                let d = if p[axis] < self.min[axis] {
                    self.min[axis] - p[axis]
                } else if p[axis] > self.max[axis] {
                    p[axis] - self.max[axis]
                } else {
                    0.0
                };
                d * d
            })
            .sum()
    }

    /// All six coordinates are finite and min <= max on every axis
    pub fn is_valid(&self) -> bool {
        self.min.iter().chain(self.max.iter()).all(|v| v.is_finite()) && !self.is_empty()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}
