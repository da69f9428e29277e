//! Rescaling of raw pixel values into the 0–100 range.
//!
//! Bounds are taken from the valid pixels only (NaN and the no-data sentinel never
//! enter the statistics), after a z-score outlier filter. The linear map is then applied
//! to every valid pixel of the original array, so filtered outliers saturate at 0 or 100.

use ndarray::{Array, ArrayBase, ArrayView1, Data, Dimension};

/// Z-score above which a value is considered an outlier.
pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 3.0;

/// Upper end of the output scale.
pub const SCALE_MAX: f64 = 100.0;

/// Returns true when `value` is missing: NaN, or equal to the sentinel.
pub fn is_nodata(value: f64, nodata: Option<f64>) -> bool {
    if value.is_nan() {
        return true;
    }
    match nodata {
        Some(ndv) => value == ndv || (value - ndv).abs() < 1e-9,
        None => false,
    }
}

/// Removes values whose z-score (population standard deviation) is not below `threshold`.
///
/// A zero-variance input has no defined z-scores, so nothing survives.
pub fn remove_outliers(values: &[f64], threshold: f64) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    let view = ArrayView1::from(values);
    let mean = view.mean().unwrap_or(0.0);
    let std = view.std(0.0);
    if std == 0.0 || !std.is_finite() {
        return Vec::new();
    }

    values
        .iter()
        .copied()
        .filter(|v| ((v - mean) / std).abs() < threshold)
        .collect()
}

/// Computes the `(min, max)` used for rescaling.
///
/// Returns `None` when no valid value survives the outlier filter or when the
/// surviving values are all equal.
pub fn rescale_bounds<S, D>(
    data: &ArrayBase<S, D>,
    nodata: Option<f64>,
    threshold: f64,
) -> Option<(f64, f64)>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let valid: Vec<f64> = data
        .iter()
        .copied()
        .filter(|v| !is_nodata(*v, nodata))
        .collect();

    let kept = remove_outliers(&valid, threshold);
    if kept.is_empty() {
        return None;
    }

    let min_val = kept.iter().copied().fold(f64::INFINITY, f64::min);
    let max_val = kept.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max_val == min_val {
        return None;
    }
    Some((min_val, max_val))
}

/// Maps valid pixels through `bounds`, leaving no-data pixels untouched.
/// Degenerate bounds (`None`) turn every valid pixel into zero.
pub fn apply_bounds<S, D>(
    data: &ArrayBase<S, D>,
    nodata: Option<f64>,
    bounds: Option<(f64, f64)>,
) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    match bounds {
        Some((min_val, max_val)) => {
            let range = max_val - min_val;
            data.mapv(|v| {
                if is_nodata(v, nodata) {
                    v
                } else {
                    ((v - min_val) / range * SCALE_MAX).clamp(0.0, SCALE_MAX)
                }
            })
        }
        None => data.mapv(|v| if is_nodata(v, nodata) { v } else { 0.0 }),
    }
}

/// Rescales `data` to 0–100 using outlier-filtered bounds of its own valid pixels.
pub fn rescale<S, D>(data: &ArrayBase<S, D>, nodata: Option<f64>, threshold: f64) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    apply_bounds(data, nodata, rescale_bounds(data, nodata, threshold))
}
