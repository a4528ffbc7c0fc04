//! Spectral index evaluation over a band stack

use ndarray::Array2;
use crate::maybe_rayon::*;
use crate::imagery::Expr;
use aquasat_core::raster::{BandStack, Raster};
use aquasat_core::{Error, Result};

/// Evaluate `formula` at every pixel of `bands`.
///
/// Every band the formula references must be present in the stack. A pixel
/// where any referenced band is `NaN` is `NaN` in the output; zero
/// denominators evaluate to `0.0`.
///
/// # Errors
/// - If a referenced band is missing from the stack
/// - If the formula references no band at all
pub fn compute_index(bands: &BandStack, formula: &Expr) -> Result<Raster<f64>> {
    let names = formula.bands();
    if names.is_empty() {
        return Err(Error::Algorithm(format!(
            "Formula '{}' references no band",
            formula
        )));
    }

    let band_refs: Vec<&Raster<f64>> = names
        .iter()
        .map(|name| bands.require(name))
        .collect::<Result<_>>()?;
    let bound = formula.bind(&names)?;

    let first = band_refs[0];
    let (rows, cols) = first.shape();

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            let mut samples = vec![0.0; band_refs.len()];

            for (col, out) in row_data.iter_mut().enumerate() {
                let mut any_nan = false;
                for (slot, band) in band_refs.iter().enumerate() {
                    let v = band.data()[(row, col)];
                    if v.is_nan() {
                        any_nan = true;
                        break;
                    }
                    samples[slot] = v;
                }

                if !any_nan {
                    *out = bound.eval(&samples);
                }
            }
            row_data
        })
        .collect();

    build_output(first, rows, cols, data)
}

/// `(a - b) / (a + b)` for two rasters of equal shape
pub fn normalized_difference(band_a: &Raster<f64>, band_b: &Raster<f64>) -> Result<Raster<f64>> {
    let stack = BandStack::new()
        .with_band("a", band_a.clone())?
        .with_band("b", band_b.clone())?;
    compute_index(&stack, &Expr::nd(Expr::band("a"), Expr::band("b")))
}

fn build_output(template: &Raster<f64>, rows: usize, cols: usize, data: Vec<f64>) -> Result<Raster<f64>> {
    let mut output = template.with_same_meta::<f64>(rows, cols);
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use aquasat_core::GeoTransform;

    fn band(rows: usize, cols: usize, value: f64) -> Raster<f64> {
        let mut r = Raster::filled(rows, cols, value);
        r.set_transform(GeoTransform::new(0.0, rows as f64, 0.01, -0.01));
        r
    }

    fn stack(pairs: &[(&str, Raster<f64>)]) -> BandStack {
        let mut stack = BandStack::new();
        for (name, raster) in pairs {
            stack.insert(*name, raster.clone()).unwrap();
        }
        stack
    }

    #[test]
    fn test_ndwi_value() {
        let bands = stack(&[("green", band(4, 4, 0.3)), ("nir", band(4, 4, 0.1))]);
        let ndwi = Expr::nd(Expr::band("green"), Expr::band("nir"));
        let result = compute_index(&bands, &ndwi).unwrap();

        assert_eq!(result.shape(), (4, 4));
        assert_relative_eq!(result.get(2, 2).unwrap(), 0.5, epsilon = 1e-12);
        assert_eq!(result.transform(), bands.require("green").unwrap().transform());
    }

    #[test]
    fn test_zero_bands_give_zero() {
        let bands = stack(&[("green", band(3, 3, 0.0)), ("nir", band(3, 3, 0.0))]);
        let result = compute_index(&bands, &Expr::nd(Expr::band("green"), Expr::band("nir"))).unwrap();

        assert!(result.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_nan_sample_is_nodata() {
        let mut green = band(3, 3, 0.3);
        green.set(1, 1, f64::NAN).unwrap();
        let bands = stack(&[("green", green), ("nir", band(3, 3, 0.1))]);
        let result = compute_index(&bands, &Expr::parse("nd(green, nir)").unwrap()).unwrap();

        assert!(result.get(1, 1).unwrap().is_nan());
        assert_eq!(result.valid_count(), 8);
    }

    #[test]
    fn test_missing_band_error() {
        let bands = stack(&[("green", band(3, 3, 0.3))]);
        let result = compute_index(&bands, &Expr::parse("green / red").unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_constant_formula_rejected() {
        let bands = stack(&[("green", band(3, 3, 0.3))]);
        assert!(compute_index(&bands, &Expr::lit(1.0)).is_err());
    }

    #[test]
    fn test_normalized_difference_helper() {
        let nd = normalized_difference(&band(2, 2, 0.8), &band(2, 2, 0.2)).unwrap();
        assert_relative_eq!(nd.get(0, 0).unwrap(), 0.6, epsilon = 1e-12);
    }
}
