//! Rounding applied to aggregate results after collection.

/// Half away from zero; `None` for NaN, infinities and out-of-range values.
pub fn round_to_i32(value: f64) -> Option<i32> {
    let rounded = value.round();
    (rounded.is_finite() && rounded >= i32::MIN as f64 && rounded <= i32::MAX as f64)
        .then_some(rounded as i32)
}

pub fn round_to_i64(value: f64) -> Option<i64> {
    let rounded = value.round();
    (rounded.is_finite() && rounded >= i64::MIN as f64 && rounded < i64::MAX as f64)
        .then_some(rounded as i64)
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
