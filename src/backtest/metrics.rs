use serde::{Serialize, Serializer};

/// Error statistics over (actual, predicted) pairs, in the order they were
/// observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastMetrics {
    pairs: Vec<(f64, f64)>,
}

impl ForecastMetrics {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            pairs: Vec::with_capacity(n),
        }
    }

    /// Non-finite pairs and zero actuals are ignored.
    pub fn observe(&mut self, actual: f64, predicted: f64) {
        if !actual.is_finite() || !predicted.is_finite() || actual == 0.0 {
            return;
        }
        self.pairs.push((actual, predicted));
    }

    pub fn sample_count(&self) -> u64 {
        self.pairs.len() as u64
    }

    pub fn mape(&self) -> Option<f64> {
        let n = self.pairs.len();
        if n == 0 {
            return None;
        }
        let sum = self
            .pairs
            .iter()
            .filter_map(|(y, yhat)| percentage_error(*y, *yhat))
            .sum::<f64>();
        Some(sum / n as f64)
    }

    pub fn mae(&self) -> Option<f64> {
        let n = self.pairs.len();
        if n == 0 {
            return None;
        }
        let sum_abs = self
            .pairs
            .iter()
            .map(|(y, yhat)| (y - yhat).abs())
            .sum::<f64>();
        Some(sum_abs / n as f64)
    }

    pub fn rmse(&self) -> Option<f64> {
        let n = self.pairs.len();
        if n == 0 {
            return None;
        }
        let sse = self
            .pairs
            .iter()
            .map(|(y, yhat)| (y - yhat) * (y - yhat))
            .sum::<f64>();
        Some((sse / n as f64).sqrt())
    }
}

#[derive(Serialize)]
struct MetricsSummary {
    samples: u64,
    mape: Option<f64>,
    mae: Option<f64>,
    rmse: Option<f64>,
}

impl Serialize for ForecastMetrics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MetricsSummary {
            samples: self.sample_count(),
            mape: self.mape(),
            mae: self.mae(),
            rmse: self.rmse(),
        }
        .serialize(serializer)
    }
}

/// `|actual - predicted| / |actual| * 100`, or `None` when undefined.
pub fn percentage_error(actual: f64, predicted: f64) -> Option<f64> {
    if !actual.is_finite() || !predicted.is_finite() || actual == 0.0 {
        return None;
    }
    Some((actual - predicted).abs() / actual.abs() * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_metrics_are_undefined() {
        let m = ForecastMetrics::default();
        assert_eq!(m.sample_count(), 0);
        assert!(m.mape().is_none());
        assert!(m.mae().is_none());
        assert!(m.rmse().is_none());
    }

    #[test]
    fn metrics_match_hand_computed_values() {
        let mut m = ForecastMetrics::with_capacity(2);
        m.observe(100.0, 110.0);
        m.observe(200.0, 190.0);
        m.observe(0.0, 1.0);
        m.observe(f64::NAN, 1.0);
        assert_eq!(m.sample_count(), 2);
        assert!((m.mape().unwrap() - 7.5).abs() < 1e-12);
        assert!((m.mae().unwrap() - 10.0).abs() < 1e-12);
        assert!((m.rmse().unwrap() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn percentage_error_is_undefined_for_zero_actual() {
        assert_eq!(percentage_error(0.0, 1.0), None);
        assert_eq!(percentage_error(-50.0, -40.0), Some(20.0));
    }
}
