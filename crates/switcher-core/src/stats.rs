//! Mean and median over small samples.
//!
//! Both return `NaN` for an empty sample, so comparisons against a threshold are `false`
//! and callers must treat the result as "no data".

/// Arithmetic mean.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Middle element of the sorted sample, or the mean of the two middle elements.
#[must_use]
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        mean(&sorted[mid - 1..=mid])
    }
}
