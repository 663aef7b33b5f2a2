//! Small aggregation helpers with SQL-like NULL handling.
//!
//! Every helper returns `None` for an empty input instead of dividing by zero.

/// Arithmetic mean of the values.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Mean of the present values, skipping `None`.
pub fn mean_present<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let present: Vec<f64> = values.into_iter().flatten().collect();
    mean(&present)
}

/// Population standard deviation.
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Minimum of the present values.
pub fn min_present<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    values.into_iter().flatten().reduce(f64::min)
}

/// Maximum of the present values.
pub fn max_present<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    values.into_iter().flatten().reduce(f64::max)
}

/// Share of `total` items matching a predicate; `None` when `total` is zero.
pub fn ratio(matching: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| matching as f64 / total as f64)
}

/// Difference of two optional values.
pub fn diff(value: Option<f64>, reference: Option<f64>) -> Option<f64> {
    Some(value? - reference?)
}

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
