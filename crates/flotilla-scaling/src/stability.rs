use crate::event::ScalingMetrics;

/// Population variance. Zero for an empty slice.
pub fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Variance of queue depth and response time across a metrics window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityReport {
    pub samples: usize,
    pub queue_depth_variance: f64,
    pub response_time_variance: f64,
}

impl StabilityReport {
    pub fn from_window(window: &[ScalingMetrics]) -> Self {
        let queue: Vec<f64> = window.iter().map(|m| m.queue_depth as f64).collect();
        let response: Vec<f64> = window.iter().map(|m| m.avg_response_time).collect();
        Self {
            samples: window.len(),
            queue_depth_variance: population_variance(&queue),
            response_time_variance: population_variance(&response),
        }
    }

    pub fn is_stable(&self, min_samples: usize, queue_tolerance: f64, response_tolerance: f64) -> bool {
        self.samples >= min_samples
            && self.queue_depth_variance < queue_tolerance
            && self.response_time_variance < response_tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_population_variance() {
        assert_eq!(population_variance(&[]), 0.0);
        assert_eq!(population_variance(&[4.0, 4.0, 4.0]), 0.0);
        // mean 5, squared deviations 9,1,1,9 -> 20 / 4
        assert!((population_variance(&[2.0, 4.0, 6.0, 8.0]) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_too_few_samples_is_unstable() {
        let window = vec![ScalingMetrics::new(2), ScalingMetrics::new(2)];
        let report = StabilityReport::from_window(&window);
        assert!(!report.is_stable(3, 25.0, 0.25));
    }

    #[test]
    fn test_spiky_queue_is_unstable() {
        let window: Vec<ScalingMetrics> = [0, 50, 0, 50]
            .into_iter()
            .map(|q| ScalingMetrics::new(3).with_queue_depth(q))
            .collect();
        let report = StabilityReport::from_window(&window);
        assert!(report.queue_depth_variance > 25.0);
        assert!(!report.is_stable(3, 25.0, 0.25));
    }

    #[test]
    fn test_jittery_response_time_is_unstable() {
        let window: Vec<ScalingMetrics> = [0.5, 2.0, 0.5, 2.0]
            .into_iter()
            .map(|secs| ScalingMetrics::new(3).with_queue_depth(4).with_response_time(secs))
            .collect();
        let report = StabilityReport::from_window(&window);
        assert_eq!(report.queue_depth_variance, 0.0);
        // mean 1.25, every deviation 0.75
        assert!((report.response_time_variance - 0.5625).abs() < 1e-9);
        assert!(!report.is_stable(3, 25.0, 0.25));
    }

    proptest! {
        #[test]
        fn prop_constant_series_has_zero_variance(value in 0.0f64..1e6, n in 1usize..50) {
            let values = vec![value; n];
            prop_assert!(population_variance(&values).abs() < 1e-6);
        }
    }
}
