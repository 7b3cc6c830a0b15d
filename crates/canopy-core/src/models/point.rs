//! Fixed-size point record shared by raw and indexed files.

use serde::{Deserialize, Serialize};

/// Size in bytes of one encoded [`Point`]
pub const POINT_RECORD_SIZE: usize = 36;

/// One LiDAR sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: u16,
    pub return_number: u8,
    pub number_of_returns: u8,
    pub classification: u8,
    pub color: [u16; 3],
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z, ..Default::default() }
    }

    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Encode into `out[..POINT_RECORD_SIZE]` (little-endian)
    pub fn encode(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.x.to_le_bytes());
        out[8..16].copy_from_slice(&self.y.to_le_bytes());
        out[16..24].copy_from_slice(&self.z.to_le_bytes());
        out[24..26].copy_from_slice(&self.intensity.to_le_bytes());
        out[26] = self.return_number;
        out[27] = self.number_of_returns;
        out[28] = self.classification;
        out[29] = 0;
        out[30..32].copy_from_slice(&self.color[0].to_le_bytes());
        out[32..34].copy_from_slice(&self.color[1].to_le_bytes());
        out[34..36].copy_from_slice(&self.color[2].to_le_bytes());
    }

    /// Decode from `data[..POINT_RECORD_SIZE]`
    pub fn decode(data: &[u8]) -> Self {
        Self {
            x: f64::from_le_bytes(le8(&data[0..8])),
            y: f64::from_le_bytes(le8(&data[8..16])),
            z: f64::from_le_bytes(le8(&data[16..24])),
            intensity: u16::from_le_bytes([data[24], data[25]]),
            return_number: data[26],
            number_of_returns: data[27],
            classification: data[28],
            color: [
                u16::from_le_bytes([data[30], data[31]]),
                u16::from_le_bytes([data[32], data[33]]),
                u16::from_le_bytes([data[34], data[35]]),
            ],
        }
    }

    /// Decode a buffer holding a whole number of records
    pub fn decode_all(data: &[u8]) -> Vec<Point> {
        data.chunks_exact(POINT_RECORD_SIZE).map(Point::decode).collect()
    }
}

fn le8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_decode() {
        let p = Point {
            x: 1.5,
            y: -2.25,
            z: 1024.125,
            intensity: 4000,
            return_number: 2,
            number_of_returns: 3,
            classification: 5,
            color: [100, 200, 65535],
        };
        let mut buf = [0xffu8; POINT_RECORD_SIZE];
        p.encode(&mut buf);

        assert_eq!(buf[29], 0, "reserved byte is zeroed");
        assert_eq!(Point::decode(&buf), p);
    }

    #[test]
    fn test_decode_all_ignores_partial_tail() {
        let mut buf = vec![0u8; POINT_RECORD_SIZE * 2 + 5];
        Point::new(1.0, 2.0, 3.0).encode(&mut buf[..POINT_RECORD_SIZE]);
        Point::new(4.0, 5.0, 6.0).encode(&mut buf[POINT_RECORD_SIZE..2 * POINT_RECORD_SIZE]);

        let points = Point::decode_all(&buf);
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].position(), [4.0, 5.0, 6.0]);
    }

    proptest! {
        #[test]
        fn prop_record_preserves_point(
            x in -1.0e7f64..1.0e7, y in -1.0e7f64..1.0e7, z in -1.0e4f64..1.0e4,
            intensity: u16, returns in (1u8..8, 1u8..8), classification: u8, color: [u16; 3],
        ) {
            let p = Point {
                x, y, z, intensity,
                return_number: returns.0.min(returns.1),
                number_of_returns: returns.1,
                classification, color,
            };
            let mut buf = [0u8; POINT_RECORD_SIZE];
            p.encode(&mut buf);
            prop_assert_eq!(Point::decode(&buf), p);
        }
    }
}
