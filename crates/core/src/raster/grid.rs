//! Main Raster type

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterElement};
use ndarray::{Array2, Zip};

/// A georeferenced 2D raster grid.
///
/// `Raster<T>` stores values of type `T` row-major together with the
/// north-up transform that places it on the requested bounding box.
/// Cells without a provider sample hold `NaN`.
///
/// # Example
///
/// ```
/// use aquasat_core::Raster;
///
/// let mut raster: Raster<f64> = Raster::new(4, 4);
/// raster.set(1, 2, 0.25).unwrap();
/// assert_eq!(raster.get(1, 2).unwrap(), 0.25);
/// ```
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    data: Array2<T>,
    transform: GeoTransform,
}

impl<T: RasterElement> Raster<T> {
    /// Create a new raster filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    /// Create a new raster filled with a specific value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Create a raster from row-major data
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;

        Ok(Self::from_array(array))
    }

    /// Create a raster from an ndarray
    pub fn from_array(data: Array2<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
        }
    }

    /// Create a zeroed raster of another element type sharing this transform
    pub fn with_same_meta<U: RasterElement>(&self, rows: usize, cols: usize) -> Raster<U> {
        Raster {
            data: Array2::zeros((rows, cols)),
            transform: self.transform,
        }
    }

    /// Apply `f` to every cell, keeping shape and transform
    pub fn map<U, F>(&self, f: F) -> Raster<U>
    where
        U: RasterElement,
        F: Fn(T) -> U,
    {
        Raster {
            data: self.data.mapv(f),
            transform: self.transform,
        }
    }

    /// Combine two rasters of equal shape cell by cell
    pub fn zip_map<U, V, F>(&self, other: &Raster<U>, f: F) -> Result<Raster<V>>
    where
        U: RasterElement,
        V: RasterElement,
        F: Fn(T, U) -> V,
    {
        self.check_same_shape(other)?;
        let mut out = Array2::zeros(self.data.dim());
        Zip::from(&mut out)
            .and(&self.data)
            .and(other.data())
            .for_each(|o, &a, &b| *o = f(a, b));
        Ok(Raster {
            data: out,
            transform: self.transform,
        })
    }

    /// Error unless `other` has exactly this raster's shape
    pub fn check_same_shape<U: RasterElement>(&self, other: &Raster<U>) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(Error::SizeMismatch {
                er: self.rows(),
                ec: self.cols(),
                ar: other.rows(),
                ac: other.cols(),
            });
        }
        Ok(())
    }

    // Dimensions

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // Data access

    /// Get value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    /// Set value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        if row >= self.rows() || col >= self.cols() {
            return Err(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        self.data[(row, col)] = value;
        Ok(())
    }

    /// Get a reference to the underlying array
    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    /// Get a mutable reference to the underlying array
    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    // Metadata

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    /// Geographic bounds (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols(), self.rows())
    }

    // Statistics

    /// Number of cells holding a sample
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nodata()).count()
    }

    /// Min, max, mean and standard deviation over cells holding a sample
    pub fn statistics(&self) -> RasterStatistics<T> {
        let mut min: Option<T> = None;
        let mut max: Option<T> = None;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut count: usize = 0;

        for &value in self.data.iter() {
            if value.is_nodata() {
                continue;
            }

            if min.map_or(true, |m| value < m) {
                min = Some(value);
            }
            if max.map_or(true, |m| value > m) {
                max = Some(value);
            }

            if let Some(v) = value.to_f64() {
                sum += v;
                sum_sq += v * v;
                count += 1;
            }
        }

        let (mean, std_dev) = if count > 0 {
            let n = count as f64;
            let mean = sum / n;
            let variance = (sum_sq / n - mean * mean).max(0.0);
            (Some(mean), Some(variance.sqrt()))
        } else {
            (None, None)
        };

        RasterStatistics {
            min,
            max,
            mean,
            std_dev,
            valid_count: count,
            nodata_count: self.len() - count,
        }
    }
}

/// Basic statistics for a raster
#[derive(Debug, Clone)]
pub struct RasterStatistics<T> {
    pub min: Option<T>,
    pub max: Option<T>,
    pub mean: Option<f64>,
    /// Population standard deviation
    pub std_dev: Option<f64>,
    pub valid_count: usize,
    pub nodata_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_raster_creation() {
        let raster: Raster<f32> = Raster::new(100, 200);
        assert_eq!(raster.rows(), 100);
        assert_eq!(raster.cols(), 200);
        assert_eq!(raster.shape(), (100, 200));
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        let result = Raster::<f64>::from_vec(vec![1.0, 2.0, 3.0], 2, 2);
        assert!(matches!(result, Err(Error::InvalidDimensions { .. })));
    }

    #[test]
    fn test_out_of_bounds() {
        let mut raster: Raster<f64> = Raster::new(2, 2);
        assert!(raster.get(2, 0).is_err());
        assert!(raster.set(0, 5, 1.0).is_err());
    }

    #[test]
    fn test_statistics_skip_nan() {
        let raster =
            Raster::from_vec(vec![1.0, f64::NAN, 3.0, f64::NAN], 2, 2).unwrap();
        let stats = raster.statistics();

        assert_eq!(stats.valid_count, 2);
        assert_eq!(stats.nodata_count, 2);
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(3.0));
        assert_relative_eq!(stats.mean.unwrap(), 2.0);
        assert_relative_eq!(stats.std_dev.unwrap(), 1.0);
    }

    #[test]
    fn test_statistics_all_nodata() {
        let raster: Raster<f64> = Raster::filled(3, 3, f64::NAN);
        let stats = raster.statistics();
        assert_eq!(stats.valid_count, 0);
        assert!(stats.mean.is_none());
        assert!(stats.std_dev.is_none());
    }

    #[test]
    fn test_zip_map_shape_mismatch() {
        let a: Raster<f64> = Raster::new(2, 3);
        let b: Raster<f64> = Raster::new(3, 2);
        assert!(matches!(
            a.zip_map(&b, |x, y| x + y),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_map_keeps_transform() {
        let mut raster: Raster<f32> = Raster::filled(2, 2, 0.5);
        raster.set_transform(GeoTransform::new(10.0, 50.0, 0.1, -0.1));
        let doubled: Raster<f64> = raster.map(|v| v as f64 * 2.0);

        assert_eq!(doubled.transform(), raster.transform());
        assert_relative_eq!(doubled.get(1, 1).unwrap(), 1.0);
    }
}
