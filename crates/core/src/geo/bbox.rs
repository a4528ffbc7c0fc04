use serde::{Deserialize, Serialize};

/// Geographic bounding box in WGS84 degrees.
///
/// Construction does not validate; range and orientation checks belong to
/// the request validator so they can report which limit was broken.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Longitude span in degrees
    pub fn width_deg(&self) -> f64 {
        self.east - self.west
    }

    /// Latitude span in degrees
    pub fn height_deg(&self) -> f64 {
        self.north - self.south
    }

    /// Center as (lon, lat)
    pub fn center(&self) -> (f64, f64) {
        (
            (self.west + self.east) / 2.0,
            (self.south + self.north) / 2.0,
        )
    }

    /// Corners as `[west, south, east, north]`
    pub fn to_array(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }

    /// Whether every coordinate is a finite number
    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}
