//! Raster element trait for generic cell values

use num_traits::{NumCast, Zero};
use std::fmt::Debug;

/// Trait for types that can be stored in a raster cell.
///
/// Provider samples arrive as `f32` and every derived index is computed in
/// `f64`; both treat `NaN` as "no sample".
pub trait RasterElement:
    Copy + Clone + Debug + PartialOrd + PartialEq + NumCast + Zero + Send + Sync + 'static
{
    /// Value used to mark a cell without a sample
    fn nodata() -> Self;

    /// Whether this value marks a cell without a sample
    fn is_nodata(&self) -> bool;

    /// Convert self to f64
    fn to_f64(self) -> Option<f64> {
        NumCast::from(self)
    }
}

macro_rules! impl_raster_element_float {
    ($t:ty) => {
        impl RasterElement for $t {
            fn nodata() -> Self {
                <$t>::NAN
            }

            fn is_nodata(&self) -> bool {
                !self.is_finite()
            }
        }
    };
}

impl_raster_element_float!(f32);
impl_raster_element_float!(f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_is_nodata() {
        assert!(f64::NAN.is_nodata());
        assert!(f32::nodata().is_nodata());
        assert!(!0.25_f64.is_nodata());
    }

    #[test]
    fn test_infinity_is_nodata() {
        assert!(f64::INFINITY.is_nodata());
        assert!(f32::NEG_INFINITY.is_nodata());
    }
}
