//! North-up georeferencing for geographic (lon/lat) rasters

use serde::{Deserialize, Serialize};

use crate::geo::BoundingBox;

/// Affine coefficients mapping pixel coordinates to longitude/latitude.
///
/// Rasters returned by the imagery provider are always north-up in WGS84,
/// so there are no rotation terms:
/// ```text
/// lon = origin_x + col * pixel_width
/// lat = origin_y + row * pixel_height   (pixel_height < 0)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// Longitude of the upper-left corner
    pub origin_x: f64,
    /// Latitude of the upper-left corner
    pub origin_y: f64,
    /// Pixel width in degrees
    pub pixel_width: f64,
    /// Pixel height in degrees (negative for north-up grids)
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// Transform that spreads a `cols` x `rows` grid over `bbox`.
    pub fn for_bbox(bbox: &BoundingBox, cols: usize, rows: usize) -> Self {
        let cols = cols.max(1) as f64;
        let rows = rows.max(1) as f64;
        Self::new(
            bbox.west,
            bbox.north,
            bbox.width_deg() / cols,
            -bbox.height_deg() / rows,
        )
    }

    /// Bounds (min_x, min_y, max_x, max_y) covered by a `width` x `height` grid
    pub fn bounds(&self, width: usize, height: usize) -> (f64, f64, f64, f64) {
        let x1 = self.origin_x + width as f64 * self.pixel_width;
        let y1 = self.origin_y + height as f64 * self.pixel_height;
        (
            self.origin_x.min(x1),
            self.origin_y.min(y1),
            self.origin_x.max(x1),
            self.origin_y.max(y1),
        )
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_for_bbox_covers_bbox() {
        let bbox = BoundingBox::new(-122.52, 37.70, -122.15, 37.90);
        let gt = GeoTransform::for_bbox(&bbox, 370, 200);
        let (min_x, min_y, max_x, max_y) = gt.bounds(370, 200);

        assert_relative_eq!(min_x, -122.52, epsilon = 1e-9);
        assert_relative_eq!(min_y, 37.70, epsilon = 1e-9);
        assert_relative_eq!(max_x, -122.15, epsilon = 1e-9);
        assert_relative_eq!(max_y, 37.90, epsilon = 1e-9);
    }
}
