use crate::error::{check_window, ForecastError};

use super::Forecaster;

/// Random-walk baseline: tomorrow looks like today.
#[derive(Debug, Clone, Default)]
pub struct PersistenceModel {
    last: Option<f64>,
}

impl Forecaster for PersistenceModel {
    fn fit(&mut self, window: &[f64]) -> Result<(), ForecastError> {
        check_window(window, 1)?;
        self.last = window.last().copied();
        Ok(())
    }

    fn predict(&self) -> Result<f64, ForecastError> {
        self.last.ok_or(ForecastError::NotFitted)
    }
}
