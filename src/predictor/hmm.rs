use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};

use crate::error::{check_window, ForecastError};

use super::{variance, Forecaster};

#[derive(Debug, Clone, Copy)]
pub struct GaussianHmmModelConfig {
    pub n_states: usize,
    pub max_iter: usize,
    /// Stop once the log-likelihood gain of an EM step falls below this.
    pub tol: f64,
    /// Added to every state variance after each M-step.
    pub min_var: f64,
}

impl Default for GaussianHmmModelConfig {
    fn default() -> Self {
        Self {
            n_states: 4,
            max_iter: 100,
            tol: 1e-4,
            min_var: 1e-3,
        }
    }
}

#[derive(Debug, Clone)]
struct HmmParams {
    start: DVector<f64>,
    trans: DMatrix<f64>,
    means: DVector<f64>,
    vars: DVector<f64>,
}

#[derive(Debug, Clone)]
struct EStep {
    alphas: Vec<DVector<f64>>,
    gammas: Vec<DVector<f64>>,
    xi_sum: DMatrix<f64>,
    log_likelihood: f64,
}

#[derive(Debug, Clone)]
struct FittedHmm {
    params: HmmParams,
    last_filtered: DVector<f64>,
    log_likelihood: f64,
    iterations: usize,
}

/// One-dimensional Gaussian-emission hidden Markov model fit by Baum-Welch.
#[derive(Debug, Clone, Default)]
pub struct GaussianHmmModel {
    cfg: GaussianHmmModelConfig,
    fitted: Option<FittedHmm>,
}

impl GaussianHmmModel {
    pub fn new(cfg: GaussianHmmModelConfig) -> Self {
        Self { cfg, fitted: None }
    }

    pub fn means(&self) -> Option<Vec<f64>> {
        self.fitted
            .as_ref()
            .map(|f| f.params.means.iter().copied().collect())
    }

    pub fn variances(&self) -> Option<Vec<f64>> {
        self.fitted
            .as_ref()
            .map(|f| f.params.vars.iter().copied().collect())
    }

    pub fn transition_matrix(&self) -> Option<&DMatrix<f64>> {
        self.fitted.as_ref().map(|f| &f.params.trans)
    }

    pub fn log_likelihood(&self) -> Option<f64> {
        self.fitted.as_ref().map(|f| f.log_likelihood)
    }

    pub fn iterations(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.iterations)
    }

    fn initial_params(&self, window: &[f64]) -> HmmParams {
        let k = self.cfg.n_states.max(1);
        let mut sorted = window.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let means = DVector::from_fn(k, |i, _| {
            let q = (i + 1) as f64 / (k + 1) as f64;
            sorted[((sorted.len() - 1) as f64 * q) as usize]
        });
        let var0 = variance(window) / k as f64 + self.cfg.min_var.max(0.0);
        let vars = DVector::from_element(k, var0.max(f64::MIN_POSITIVE));
        let trans = if k == 1 {
            DMatrix::from_element(1, 1, 1.0)
        } else {
            let off = 0.3 / (k - 1) as f64;
            DMatrix::from_fn(k, k, |i, j| if i == j { 0.7 } else { off })
        };
        HmmParams {
            start: DVector::from_element(k, 1.0 / k as f64),
            trans,
            means,
            vars,
        }
    }

    fn e_step(params: &HmmParams, window: &[f64]) -> Result<EStep, ForecastError> {
        let k = params.means.len();
        let t_len = window.len();
        let emissions: Vec<(DVector<f64>, f64)> =
            window.iter().map(|x| scaled_emission(params, *x)).collect();

        let mut alphas: Vec<DVector<f64>> = Vec::with_capacity(t_len);
        let mut scales: Vec<f64> = Vec::with_capacity(t_len);
        let mut log_likelihood = 0.0;
        for (t, (b, shift)) in emissions.iter().enumerate() {
            let mut alpha = if t == 0 {
                params.start.component_mul(b)
            } else {
                (params.trans.transpose() * &alphas[t - 1]).component_mul(b)
            };
            let c = alpha.sum();
            if !(c.is_finite() && c > 0.0) {
                return Err(ForecastError::Numerical(format!(
                    "forward pass lost all probability mass at step {t}"
                )));
            }
            alpha /= c;
            log_likelihood += c.ln() + shift;
            alphas.push(alpha);
            scales.push(c);
        }
        if !log_likelihood.is_finite() {
            return Err(ForecastError::Numerical(
                "non-finite HMM log-likelihood".to_string(),
            ));
        }

        let mut betas = vec![DVector::from_element(k, 1.0); t_len];
        for t in (0..t_len.saturating_sub(1)).rev() {
            let weighted = emissions[t + 1].0.component_mul(&betas[t + 1]);
            betas[t] = (&params.trans * weighted) / scales[t + 1];
        }

        let mut gammas = Vec::with_capacity(t_len);
        for (alpha, beta) in alphas.iter().zip(&betas) {
            let mut g = alpha.component_mul(beta);
            let s = g.sum();
            if s > 0.0 {
                g /= s;
            }
            gammas.push(g);
        }

        let mut xi_sum = DMatrix::zeros(k, k);
        for t in 0..t_len.saturating_sub(1) {
            let weighted = emissions[t + 1].0.component_mul(&betas[t + 1]);
            let outer = &alphas[t] * weighted.transpose();
            xi_sum += outer.component_mul(&params.trans) / scales[t + 1];
        }

        Ok(EStep {
            alphas,
            gammas,
            xi_sum,
            log_likelihood,
        })
    }

    fn m_step(&self, params: &HmmParams, pass: &EStep, window: &[f64]) -> HmmParams {
        let k = params.means.len();
        let mut next = params.clone();

        let g0 = &pass.gammas[0];
        if g0.sum() > 0.0 {
            next.start = g0 / g0.sum();
        }

        for i in 0..k {
            let row_sum: f64 = pass.xi_sum.row(i).sum();
            if row_sum > 1e-300 {
                for j in 0..k {
                    next.trans[(i, j)] = pass.xi_sum[(i, j)] / row_sum;
                }
            }
        }

        for j in 0..k {
            let weight: f64 = pass.gammas.iter().map(|g| g[j]).sum();
            if weight <= 1e-12 {
                continue;
            }
            let mean = pass
                .gammas
                .iter()
                .zip(window)
                .map(|(g, x)| g[j] * x)
                .sum::<f64>()
                / weight;
            let var = pass
                .gammas
                .iter()
                .zip(window)
                .map(|(g, x)| g[j] * (x - mean) * (x - mean))
                .sum::<f64>()
                / weight;
            next.means[j] = mean;
            next.vars[j] = (var + self.cfg.min_var.max(0.0)).max(f64::MIN_POSITIVE);
        }
        next
    }
}

/// Gaussian likelihoods of `x` under each state, divided by the largest one.
/// Returns the scaled vector and the log of the divisor.
fn scaled_emission(params: &HmmParams, x: f64) -> (DVector<f64>, f64) {
    let log_b = DVector::from_fn(params.means.len(), |j, _| {
        let var = params.vars[j];
        let d = x - params.means[j];
        -0.5 * ((2.0 * PI * var).ln() + d * d / var)
    });
    let shift = log_b.max();
    (log_b.map(|v| (v - shift).exp()), shift)
}

impl Forecaster for GaussianHmmModel {
    fn fit(&mut self, window: &[f64]) -> Result<(), ForecastError> {
        self.fitted = None;
        check_window(window, self.cfg.n_states.max(2))?;

        let mut params = self.initial_params(window);
        let mut pass = Self::e_step(&params, window)?;
        let mut iterations = 0;
        while iterations < self.cfg.max_iter {
            let next = self.m_step(&params, &pass, window);
            let next_pass = Self::e_step(&next, window)?;
            iterations += 1;
            let gain = next_pass.log_likelihood - pass.log_likelihood;
            params = next;
            pass = next_pass;
            if gain.abs() < self.cfg.tol {
                break;
            }
        }

        let last_filtered = pass
            .alphas
            .last()
            .cloned()
            .ok_or(ForecastError::NotFitted)?;
        self.fitted = Some(FittedHmm {
            params,
            last_filtered,
            log_likelihood: pass.log_likelihood,
            iterations,
        });
        Ok(())
    }

    fn predict(&self) -> Result<f64, ForecastError> {
        let fitted = self.fitted.as_ref().ok_or(ForecastError::NotFitted)?;
        let next_state = fitted.params.trans.transpose() * &fitted.last_filtered;
        let mass = next_state.sum();
        if !(mass.is_finite() && mass > 0.0) {
            return Err(ForecastError::Numerical(
                "next-state distribution has no mass".to_string(),
            ));
        }
        let forecast = next_state.dot(&fitted.params.means) / mass;
        if !forecast.is_finite() {
            return Err(ForecastError::DegenerateForecast(forecast));
        }
        Ok(forecast)
    }
}
