use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::error::{check_window, ForecastError};

use super::{variance, Forecaster};

/// Relative noise floor: sigma never drops below this fraction of mean |y|,
/// which keeps flat windows from making the normal equations singular.
const RELATIVE_SIGMA_FLOOR: f64 = 1e-3;

#[derive(Debug, Clone, Copy)]
pub struct BayesArModelConfig {
    pub lags: usize,
    pub prior_sd_intercept: f64,
    pub prior_sd_coef: f64,
    /// Scale of the half-normal prior on the noise standard deviation.
    pub sigma_prior_scale: f64,
    pub min_sigma: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for BayesArModelConfig {
    fn default() -> Self {
        Self {
            lags: 1,
            prior_sd_intercept: 10.0,
            prior_sd_coef: 10.0,
            sigma_prior_scale: 10.0,
            min_sigma: 1e-6,
            max_iter: 100,
            tol: 1e-10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArCoefficients {
    pub intercept: f64,
    /// `lags[k]` multiplies the value `k + 1` steps back.
    pub lags: Vec<f64>,
    pub sigma: f64,
}

#[derive(Debug, Clone)]
struct FittedAr {
    coef: ArCoefficients,
    recent: Vec<f64>,
    iterations: usize,
}

/// Linear-Gaussian AR(p) with Gaussian coefficient priors and a half-normal
/// noise prior, fit to its posterior mode.
#[derive(Debug, Clone, Default)]
pub struct BayesArModel {
    cfg: BayesArModelConfig,
    fitted: Option<FittedAr>,
}

impl BayesArModel {
    pub fn new(cfg: BayesArModelConfig) -> Self {
        Self { cfg, fitted: None }
    }

    pub fn coefficients(&self) -> Option<&ArCoefficients> {
        self.fitted.as_ref().map(|f| &f.coef)
    }

    pub fn iterations(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.iterations)
    }

    fn prior_precisions(&self, dim: usize) -> Vec<f64> {
        let precision = |sd: f64| {
            if sd.is_finite() && sd > 0.0 {
                1.0 / (sd * sd)
            } else {
                0.0
            }
        };
        (0..dim)
            .map(|i| {
                if i == 0 {
                    precision(self.cfg.prior_sd_intercept)
                } else {
                    precision(self.cfg.prior_sd_coef)
                }
            })
            .collect()
    }

    /// Mode of sigma^2 given the residual sum of squares. Solves
    /// `u^2 / tau^2 + n u - ssr = 0` for the positive root.
    fn sigma2_mode(&self, ssr: f64, rows: usize) -> f64 {
        let n = rows as f64;
        let tau = self.cfg.sigma_prior_scale;
        if tau.is_finite() && tau > 0.0 {
            2.0 * ssr / (n + (n * n + 4.0 * ssr / (tau * tau)).sqrt())
        } else {
            ssr / n
        }
    }
}

impl Forecaster for BayesArModel {
    fn fit(&mut self, window: &[f64]) -> Result<(), ForecastError> {
        self.fitted = None;
        let p = self.cfg.lags.max(1);
        check_window(window, p + 1)?;

        let rows = window.len() - p;
        let dim = p + 1;
        let x = DMatrix::from_fn(rows, dim, |r, c| {
            if c == 0 {
                1.0
            } else {
                window[r + p - c]
            }
        });
        let y = DVector::from_fn(rows, |r, _| window[r + p]);
        let xtx = x.transpose() * &x;
        let xty = x.transpose() * &y;
        let precisions = self.prior_precisions(dim);

        let scale = y.iter().map(|v| v.abs()).sum::<f64>() / rows as f64;
        let sigma_floor = self.cfg.min_sigma.max(RELATIVE_SIGMA_FLOOR * scale);
        let floor2 = (sigma_floor * sigma_floor).max(f64::MIN_POSITIVE);
        let y_values: Vec<f64> = y.iter().copied().collect();
        let mut sigma2 = variance(&y_values).max(floor2);

        let mut theta = DVector::<f64>::zeros(dim);
        let mut iterations = 0;
        while iterations < self.cfg.max_iter.max(1) {
            let mut a = xtx.clone();
            for (i, prec) in precisions.iter().enumerate() {
                a[(i, i)] += sigma2 * prec;
            }
            let chol = a.cholesky().ok_or_else(|| {
                ForecastError::Numerical("AR normal equations are not positive definite".into())
            })?;
            let next = chol.solve(&xty);
            let ssr = (&y - &x * &next).norm_squared();
            sigma2 = self.sigma2_mode(ssr, rows).max(floor2);
            let step = (&next - &theta).amax();
            let size = next.amax();
            theta = next;
            iterations += 1;
            if !step.is_finite() {
                return Err(ForecastError::Numerical(
                    "non-finite AR coefficients".to_string(),
                ));
            }
            if step <= self.cfg.tol * (1.0 + size) {
                break;
            }
        }

        self.fitted = Some(FittedAr {
            coef: ArCoefficients {
                intercept: theta[0],
                lags: theta.iter().skip(1).copied().collect(),
                sigma: sigma2.sqrt(),
            },
            recent: window[window.len() - p..].to_vec(),
            iterations,
        });
        Ok(())
    }

    fn predict(&self) -> Result<f64, ForecastError> {
        let fitted = self.fitted.as_ref().ok_or(ForecastError::NotFitted)?;
        let forecast = fitted.coef.intercept
            + fitted
                .coef
                .lags
                .iter()
                .zip(fitted.recent.iter().rev())
                .map(|(b, y)| b * y)
                .sum::<f64>();
        if !forecast.is_finite() {
            return Err(ForecastError::DegenerateForecast(forecast));
        }
        Ok(forecast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigma_mode_shrinks_towards_zero_with_tight_prior() {
        let m = BayesArModel::new(BayesArModelConfig {
            sigma_prior_scale: 0.01,
            ..BayesArModelConfig::default()
        });
        let loose = BayesArModel::default();
        assert!(m.sigma2_mode(100.0, 10) < loose.sigma2_mode(100.0, 10));
        assert!((loose.sigma2_mode(0.0, 10)).abs() < 1e-15);
    }

    #[test]
    fn two_lag_forecast_uses_most_recent_values() {
        // y_t = 1 + 0.5 y_{t-1} + 0.25 y_{t-2}
        let mut window = vec![4.0, 6.0];
        for _ in 0..40 {
            let n = window.len();
            window.push(1.0 + 0.5 * window[n - 1] + 0.25 * window[n - 2] + (n % 3) as f64);
        }
        let mut m = BayesArModel::new(BayesArModelConfig {
            lags: 2,
            ..BayesArModelConfig::default()
        });
        m.fit(&window).unwrap();
        let c = m.coefficients().unwrap();
        assert_eq!(c.lags.len(), 2);
        let n = window.len();
        let expected = c.intercept + c.lags[0] * window[n - 1] + c.lags[1] * window[n - 2];
        assert!((m.predict().unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn needs_more_points_than_lags() {
        let mut m = BayesArModel::new(BayesArModelConfig {
            lags: 3,
            ..BayesArModelConfig::default()
        });
        assert_eq!(
            m.fit(&[1.0, 2.0, 3.0]),
            Err(ForecastError::WindowTooShort {
                required: 4,
                actual: 3
            })
        );
    }
}
