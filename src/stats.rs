//! Summary statistics over per-clade attribute samples.

/// Arithmetic mean. Returns 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median of the values (midpoint of the two central order statistics for an
/// even count).
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Minimum and maximum of the values.
pub fn min_max(values: &[f64]) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in values {
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }
    (min, max)
}

/// Fraction of values strictly below zero.
pub fn negative_proportion(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|&&v| v < 0.0).count() as f64 / values.len() as f64
}

/// Shortest interval containing `mass` of the sampled values.
///
/// The algorithm sorts the samples, sets the window size to `round(mass * n)`
/// and scans every window of that many consecutive order statistics, keeping
/// the first window of minimum width. The window size is clamped to at least
/// one sample so tiny masses degrade to a point interval instead of failing.
pub fn hpd_interval(mass: f64, values: &[f64]) -> (f64, f64) {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let diff = ((mass * n as f64).round() as usize).clamp(1, n);

    let mut best_start = 0;
    let mut min_range = f64::INFINITY;
    for i in 0..=(n - diff) {
        let range = (sorted[i + diff - 1] - sorted[i]).abs();
        if range < min_range {
            min_range = range;
            best_start = i;
        }
    }
    (sorted[best_start], sorted[best_start + diff - 1])
}

/// Effective sample size of an autocorrelated MCMC trace.
///
/// Autocovariances are accumulated in even-lag pairs until a pair sum turns
/// negative, the usual initial-positive-sequence truncation. The result is
/// bounded above by the number of samples for well-behaved traces; degenerate
/// traces (fewer than three samples, or zero variance) report the sample
/// count itself.
pub fn effective_sample_size(values: &[f64]) -> f64 {
    const MAX_LAG: usize = 2000;

    let n = values.len();
    if n < 3 {
        return n as f64;
    }
    let m = mean(values);
    let max_lag = (n - 1).min(MAX_LAG);

    let mut gamma = vec![0.0f64; max_lag];
    let mut var_stat = 0.0f64;
    let mut lag = 0;
    while lag < max_lag {
        let mut sum = 0.0;
        for i in 0..(n - lag) {
            sum += (values[i] - m) * (values[i + lag] - m);
        }
        gamma[lag] = sum / (n - lag) as f64;

        if lag == 0 {
            var_stat = gamma[0];
        } else if lag % 2 == 0 {
            if gamma[lag - 1] + gamma[lag] > 0.0 {
                var_stat += 2.0 * (gamma[lag - 1] + gamma[lag]);
            } else {
                break;
            }
        }
        lag += 1;
    }

    if gamma[0] <= 0.0 || var_stat <= 0.0 {
        return n as f64;
    }
    n as f64 * gamma[0] / var_stat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_median() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(mean(&v), 3.0);
        assert_eq!(median(&v), 3.0);
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn test_min_max_and_signs() {
        let v = [-2.0, -1.0, 3.0, 4.0];
        assert_eq!(min_max(&v), (-2.0, 4.0));
        assert_eq!(negative_proportion(&v), 0.5);
        assert_eq!(negative_proportion(&[1.0, 2.0]), 0.0);
    }

    /// For 1..=10 at mass 0.5 the window size is round(5.0) = 5; all windows
    /// of five consecutive values tie at width 4, so the scan must keep the
    /// first one.
    #[test]
    fn test_hpd_uniform_ties_pick_first_window() {
        let v: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        let (lower, upper) = hpd_interval(0.5, &v);
        assert_eq!((lower, upper), (1.0, 5.0));
    }

    #[test]
    fn test_hpd_prefers_dense_region() {
        // Clustered values around 0 with two outliers; the 60% window must
        // stay inside the cluster.
        let v = [-50.0, 0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 50.0];
        let (lower, upper) = hpd_interval(0.6, &v);
        assert!(lower >= 0.0 && upper <= 0.7);
        assert_eq!(upper - lower, 0.5);
    }

    #[test]
    fn test_hpd_degenerate_zero_width() {
        let v = [2.0, 2.0, 2.0, 2.0];
        assert_eq!(hpd_interval(0.95, &v), (2.0, 2.0));
    }

    #[test]
    fn test_hpd_unsorted_input() {
        let v = [5.0, 1.0, 4.0, 2.0, 3.0, 9.0, 8.0, 10.0, 7.0, 6.0];
        assert_eq!(hpd_interval(0.5, &v), (1.0, 5.0));
    }

    #[test]
    fn test_ess_bounds() {
        // Alternating trace has negative lag-1 autocorrelation; truncation
        // keeps the estimate finite and positive.
        let v: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let ess = effective_sample_size(&v);
        assert!(ess > 0.0);

        // A strongly autocorrelated ramp has far fewer effective samples.
        let ramp: Vec<f64> = (0..100).map(|i| i as f64).collect();
        assert!(effective_sample_size(&ramp) < 100.0);
    }

    #[test]
    fn test_ess_degenerate() {
        assert_eq!(effective_sample_size(&[1.0, 1.0]), 2.0);
        assert_eq!(effective_sample_size(&[3.0, 3.0, 3.0, 3.0]), 4.0);
    }
}
