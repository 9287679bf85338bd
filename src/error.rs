use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("market data error: {0}")]
    MarketData(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-window fit/predict failure. The evaluator treats every variant the
/// same way: the window is dropped from the aggregate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("window too short: need at least {required} observations, got {actual}")]
    WindowTooShort { required: usize, actual: usize },

    #[error("non-finite observation at offset {0}")]
    NonFiniteInput(usize),

    #[error("model has not been fitted")]
    NotFitted,

    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("degenerate forecast: {0}")]
    DegenerateForecast(f64),

    #[error("actual value is zero, percentage error undefined")]
    ZeroActual,
}

/// Rejects empty-ish windows and NaN/inf observations before a model sees them.
pub fn check_window(window: &[f64], required: usize) -> Result<(), ForecastError> {
    if window.len() < required {
        return Err(ForecastError::WindowTooShort {
            required,
            actual: window.len(),
        });
    }
    if let Some(pos) = window.iter().position(|v| !v.is_finite()) {
        return Err(ForecastError::NonFiniteInput(pos));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_window_reports_length_and_position() {
        assert_eq!(
            check_window(&[1.0], 2),
            Err(ForecastError::WindowTooShort {
                required: 2,
                actual: 1
            })
        );
        assert_eq!(
            check_window(&[1.0, f64::NAN, 3.0], 2),
            Err(ForecastError::NonFiniteInput(1))
        );
        assert!(check_window(&[1.0, 2.0], 2).is_ok());
    }
}
