//! Pointwise and aggregate error metrics, and error-pattern tagging.

use serde::{Deserialize, Serialize};

/// Shape of the pointwise error series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPattern {
    /// Errors spread evenly, or a constant-ratio scaling of the original.
    Uniform,
    /// Large isolated error next to a jump in the original (Gibbs overshoot).
    PeakAtDiscontinuities,
    /// Large isolated error with no nearby jump.
    Peak,
    /// Error magnitude drifts between the first and second half of the range.
    Systematic,
    Mixed,
}

impl ErrorPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::PeakAtDiscontinuities => "peak_at_discontinuities",
            Self::Peak => "peak",
            Self::Systematic => "systematic",
            Self::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for ErrorPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate error metrics over one sampling plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub max_relative_error: f64,
    pub mean_relative_error: f64,
    pub max_absolute_error: f64,
    pub mean_absolute_error: f64,
    /// Sample point `t` of the peak absolute error.
    pub max_error_location: f64,
    pub max_error_index: usize,
    pub max_error_original_value: f64,
    pub max_error_reconstruction_value: f64,
    pub error_pattern: ErrorPattern,
}

/// Relative error at one point.
///
/// Falls back to the absolute error when `|original| <= zero_threshold`;
/// non-finite results are coerced to 0.
pub fn relative_error(original: f64, reconstructed: f64, zero_threshold: f64) -> f64 {
    let abs = (original - reconstructed).abs();
    let rel = if original.abs() > zero_threshold {
        abs / original.abs()
    } else {
        abs
    };
    if rel.is_finite() {
        rel
    } else {
        0.0
    }
}

/// Compute metrics and pointwise absolute errors. The three slices must have equal,
/// non-zero length.
pub(crate) fn compute(
    points: &[f64],
    original: &[f64],
    reconstructed: &[f64],
    zero_threshold: f64,
) -> (ErrorMetrics, Vec<f64>) {
    let absolute: Vec<f64> = original
        .iter()
        .zip(reconstructed)
        .map(|(o, r)| (o - r).abs())
        .collect();
    let relative: Vec<f64> = original
        .iter()
        .zip(reconstructed)
        .map(|(o, r)| relative_error(*o, *r, zero_threshold))
        .collect();

    let max_index = argmax(&absolute);
    let error_pattern = detect_pattern(&absolute, original, zero_threshold);

    let metrics = ErrorMetrics {
        max_relative_error: max(&relative),
        mean_relative_error: mean(&relative),
        max_absolute_error: absolute[max_index],
        mean_absolute_error: mean(&absolute),
        max_error_location: points[max_index],
        max_error_index: max_index,
        max_error_original_value: original[max_index],
        max_error_reconstruction_value: reconstructed[max_index],
        error_pattern,
    };
    (metrics, absolute)
}

/// Tag the error series, first match wins: uniform, peak (with or without a
/// nearby discontinuity), systematic drift, mixed.
pub(crate) fn detect_pattern(
    absolute: &[f64],
    original: &[f64],
    zero_threshold: f64,
) -> ErrorPattern {
    let n = absolute.len();
    let mean_err = mean(absolute);
    let max_err = max(absolute);
    let std_err = std_dev(absolute, mean_err);

    if std_err < 0.1 * mean_err || constant_ratio(absolute, original, zero_threshold) {
        return ErrorPattern::Uniform;
    }

    if max_err > 3.0 * mean_err {
        let peak = argmax(absolute);
        let window = (n / 50).max(2);
        if jump_near(original, peak, window) {
            return ErrorPattern::PeakAtDiscontinuities;
        }
        return ErrorPattern::Peak;
    }

    if n > 10 {
        let (first, second) = absolute.split_at(n / 2);
        if (mean(second) - mean(first)).abs() > 0.5 * mean_err {
            return ErrorPattern::Systematic;
        }
    }

    ErrorPattern::Mixed
}

// |err|/|orig| nearly constant wherever the original is away from zero.
fn constant_ratio(absolute: &[f64], original: &[f64], zero_threshold: f64) -> bool {
    let ratios: Vec<f64> = absolute
        .iter()
        .zip(original)
        .filter(|(_, o)| o.abs() > zero_threshold)
        .map(|(e, o)| e / o.abs())
        .filter(|r| r.is_finite())
        .collect();
    if ratios.len() < 2 {
        return false;
    }
    let m = mean(&ratios);
    m > 0.0 && std_dev(&ratios, m) < 0.1 * m
}

// The samples cover whole periods, so differences wrap from the last point to the first.
fn jump_near(original: &[f64], peak: usize, window: usize) -> bool {
    let n = original.len();
    if n < 2 {
        return false;
    }
    let diffs: Vec<f64> = (0..n)
        .map(|j| original[(j + 1) % n] - original[j])
        .collect();
    let threshold = 2.0 * std_dev(&diffs, mean(&diffs));

    diffs.iter().enumerate().any(|(j, d)| {
        if d.abs() <= threshold {
            return false;
        }
        let near = |i: usize| {
            let dist = i.abs_diff(peak);
            dist.min(n - dist) <= window
        };
        near(j) || near((j + 1) % n)
    })
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

fn max(values: &[f64]) -> f64 {
    values.iter().copied().fold(0.0, f64::max)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_error_zero_fallback() {
        let rel = relative_error(0.0, 0.000_000_5, 1e-6);
        assert_eq!(rel, 0.000_000_5);
    }

    #[test]
    fn test_relative_error_ratio() {
        let rel = relative_error(2.0, 1.0, 1e-6);
        assert!((rel - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_relative_error_non_finite_coerced() {
        assert_eq!(relative_error(f64::INFINITY, f64::INFINITY, 1e-6), 0.0);
        assert_eq!(relative_error(1.0, f64::NAN, 1e-6), 0.0);
    }

    #[test]
    fn test_uniform_constant_offset() {
        let original: Vec<f64> = (0..100).map(|i| (i as f64 * 0.1).sin()).collect();
        let absolute = vec![0.2; 100];
        assert_eq!(detect_pattern(&absolute, &original, 1e-6), ErrorPattern::Uniform);
    }

    #[test]
    fn test_uniform_constant_ratio() {
        let original: Vec<f64> = (0..100).map(|i| (i as f64 * 0.1).sin()).collect();
        let absolute: Vec<f64> = original.iter().map(|o| 0.5 * o.abs()).collect();
        assert_eq!(detect_pattern(&absolute, &original, 1e-6), ErrorPattern::Uniform);
    }

    #[test]
    fn test_isolated_peak_without_jump() {
        let original: Vec<f64> = (0..100).map(|i| (i as f64 * 0.05).sin()).collect();
        let mut absolute: Vec<f64> = (0..100).map(|i| 0.01 + 0.001 * (i % 7) as f64).collect();
        absolute[40] = 1.0;
        assert_eq!(detect_pattern(&absolute, &original, 1e-6), ErrorPattern::Peak);
    }

    #[test]
    fn test_peak_at_jump() {
        let original: Vec<f64> = (0..100).map(|i| if i < 50 { 1.0 } else { -1.0 }).collect();
        let mut absolute: Vec<f64> = (0..100).map(|i| 0.01 + 0.001 * (i % 7) as f64).collect();
        absolute[51] = 0.9;
        assert_eq!(
            detect_pattern(&absolute, &original, 1e-6),
            ErrorPattern::PeakAtDiscontinuities
        );
    }

    #[test]
    fn test_systematic_drift() {
        let original: Vec<f64> = (0..100).map(|i| 1.0 + (i as f64 * 0.3).sin()).collect();
        let absolute: Vec<f64> = (0..100).map(|i| 0.01 + 0.002 * i as f64).collect();
        assert_eq!(detect_pattern(&absolute, &original, 1e-6), ErrorPattern::Systematic);
    }

    #[test]
    fn test_compute_locates_peak() {
        let points = vec![0.0, 1.0, 2.0, 3.0];
        let original = vec![1.0, 2.0, 3.0, 4.0];
        let reconstructed = vec![1.0, 2.5, 3.0, 4.0];
        let (metrics, absolute) = compute(&points, &original, &reconstructed, 1e-6);
        assert_eq!(metrics.max_error_index, 1);
        assert_eq!(metrics.max_error_location, 1.0);
        assert_eq!(metrics.max_absolute_error, 0.5);
        assert_eq!(metrics.max_relative_error, 0.25);
        assert_eq!(absolute, vec![0.0, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_pattern_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorPattern::PeakAtDiscontinuities).expect("serialize");
        assert_eq!(json, "\"peak_at_discontinuities\"");
    }
}
