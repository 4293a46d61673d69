// Descriptive statistics over one slice window of dBFS values

/// Summary of a non-empty set of values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
}

/// Percentile of an ascending-sorted slice, linearly interpolated between
/// the closest ranks
///
/// Returns `None` for an empty slice; a single value is its own percentile.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = p.clamp(0.0, 1.0) * last as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Mean, max, median and 95th percentile; `None` when `values` is empty
pub fn summarize(values: &[f64]) -> Option<WindowStats> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
    let max = *sorted.last()?;
    let p50 = percentile(&sorted, 0.50)?;
    // Interpolation can land a hair above max from rounding; keep the ordering exact
    let p95 = percentile(&sorted, 0.95)?.min(max);

    Some(WindowStats {
        mean,
        max,
        p50: p50.min(p95),
        p95,
    })
}
