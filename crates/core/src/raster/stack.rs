//! Named collection of co-registered bands

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::raster::Raster;

/// Logical band name (`"green"`, `"nir"`, ...) to raster, all of one shape.
///
/// The first inserted band fixes the shape; later bands must match it.
#[derive(Debug, Clone, Default)]
pub struct BandStack {
    bands: BTreeMap<String, Raster<f64>>,
}

impl BandStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a band, rejecting one whose shape differs from the stack
    pub fn insert(&mut self, name: impl Into<String>, raster: Raster<f64>) -> Result<()> {
        if let Some((rows, cols)) = self.shape() {
            if raster.shape() != (rows, cols) {
                return Err(Error::SizeMismatch {
                    er: rows,
                    ec: cols,
                    ar: raster.rows(),
                    ac: raster.cols(),
                });
            }
        }
        self.bands.insert(name.into(), raster);
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with_band(mut self, name: impl Into<String>, raster: Raster<f64>) -> Result<Self> {
        self.insert(name, raster)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Raster<f64>> {
        self.bands.get(name)
    }

    /// Like [`get`](Self::get) but reports the missing band
    pub fn require(&self, name: &str) -> Result<&Raster<f64>> {
        self.bands.get(name).ok_or_else(|| {
            Error::Algorithm(format!(
                "Band '{}' not found. Available: {:?}",
                name,
                self.names().collect::<Vec<_>>()
            ))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bands.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bands.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Raster<f64>)> {
        self.bands.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Shape shared by every band, `None` when empty
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.bands.values().next().map(Raster::shape)
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// True when no band carries a single sample
    pub fn is_all_nodata(&self) -> bool {
        self.bands.values().all(|r| r.valid_count() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_shape() {
        let stack = BandStack::new()
            .with_band("green", Raster::filled(3, 4, 0.1))
            .unwrap()
            .with_band("nir", Raster::filled(3, 4, 0.2))
            .unwrap();

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.shape(), Some((3, 4)));
        assert_eq!(stack.names().collect::<Vec<_>>(), vec!["green", "nir"]);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut stack = BandStack::new();
        stack.insert("green", Raster::new(3, 4)).unwrap();
        let err = stack.insert("nir", Raster::new(4, 3));
        assert!(matches!(err, Err(Error::SizeMismatch { .. })));
    }

    #[test]
    fn test_require_missing() {
        let stack = BandStack::new();
        assert!(stack.require("red").is_err());
        assert!(stack.is_all_nodata());
    }
}
