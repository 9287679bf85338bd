use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::data::yahoo::DEFAULT_CHART_BASE_URL;
use crate::error::AppError;
use crate::predictor::{default_predictor_specs, select_predictor_specs, PredictorOverrides, PredictorSpecs};

pub const CONFIG_PATH_ENV: &str = "SANDBOX_FORECAST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub predictor: PredictorOverrides,
    #[serde(default)]
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub symbol: String,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WindowRange {
    pub start: usize,
    /// Exclusive.
    pub stop: usize,
    pub step: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BacktestConfig {
    #[serde(default)]
    pub window_sizes: Vec<usize>,
    #[serde(default)]
    pub window_range: Option<WindowRange>,
    #[serde(default = "default_stride")]
    pub stride: usize,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub report_path: Option<String>,
    #[serde(default)]
    pub chart_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_base_url() -> String {
    DEFAULT_CHART_BASE_URL.to_string()
}

fn default_stride() -> usize {
    1
}

fn default_parallel() -> bool {
    true
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}': expected YYYY-MM-DD", s))
}

impl DataConfig {
    pub fn date_range(&self) -> Result<(NaiveDate, NaiveDate)> {
        let start = parse_date(&self.start).context("data.start is invalid")?;
        let end = parse_date(&self.end).context("data.end is invalid")?;
        if start >= end {
            bail!("data.start ({}) must be before data.end ({})", start, end);
        }
        Ok((start, end))
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.snapshot_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

impl BacktestConfig {
    /// Explicit `window_sizes` followed by the expanded `window_range`,
    /// sorted and deduplicated.
    pub fn resolved_window_sizes(&self) -> Result<Vec<usize>> {
        let mut sizes = self.window_sizes.clone();
        if let Some(range) = self.window_range {
            if range.step == 0 {
                bail!("backtest.window_range.step must be > 0");
            }
            if range.start >= range.stop {
                bail!(
                    "backtest.window_range is empty: start {} >= stop {}",
                    range.start,
                    range.stop
                );
            }
            sizes.extend((range.start..range.stop).step_by(range.step));
        }
        sizes.sort_unstable();
        sizes.dedup();
        if sizes.is_empty() {
            bail!("backtest needs window_sizes or window_range");
        }
        if sizes[0] == 0 {
            bail!("window sizes must be >= 1");
        }
        Ok(sizes)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data.symbol.trim().is_empty() {
            bail!("data.symbol must not be empty");
        }
        self.data.date_range()?;
        self.backtest.resolved_window_sizes()?;
        self.predictor_specs()?;
        Ok(())
    }

    /// Default specs with overrides applied, restricted to `backtest.models`.
    pub fn predictor_specs(&self) -> Result<PredictorSpecs> {
        if self.backtest.models.is_empty() {
            bail!("backtest.models must list at least one model");
        }
        let mut specs = default_predictor_specs();
        self.predictor.apply(&mut specs);
        match select_predictor_specs(&specs, &self.backtest.models) {
            Ok(selected) => Ok(selected),
            Err(unknown) => {
                let known: Vec<&str> = specs.iter().map(|(id, _)| id.as_str()).collect();
                Err(AppError::Config(format!(
                    "unknown model id(s) {:?}; expected one of {:?}",
                    unknown, known
                ))
                .into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backtest(sizes: Vec<usize>, range: Option<WindowRange>) -> BacktestConfig {
        BacktestConfig {
            window_sizes: sizes,
            window_range: range,
            stride: 1,
            parallel: true,
            models: vec!["hmm-v1".to_string()],
        }
    }

    #[test]
    fn window_sizes_merge_list_and_range() {
        let cfg = backtest(
            vec![50, 10],
            Some(WindowRange {
                start: 10,
                stop: 40,
                step: 10,
            }),
        );
        assert_eq!(cfg.resolved_window_sizes().unwrap(), vec![10, 20, 30, 50]);
    }

    #[test]
    fn window_sizes_reject_zero_and_empty() {
        assert!(backtest(vec![], None).resolved_window_sizes().is_err());
        assert!(backtest(vec![0, 5], None).resolved_window_sizes().is_err());
        let bad_step = backtest(
            vec![],
            Some(WindowRange {
                start: 5,
                stop: 10,
                step: 0,
            }),
        );
        assert!(bad_step.resolved_window_sizes().is_err());
    }

    #[test]
    fn parse_date_valid_and_invalid() {
        assert_eq!(
            parse_date("2020-02-29").unwrap(),
            NaiveDate::from_ymd_opt(2020, 2, 29).unwrap()
        );
        assert!(parse_date("2021-02-29").is_err());
        assert!(parse_date("02/01/2020").is_err());
    }

    #[test]
    fn blank_snapshot_path_is_none() {
        let cfg = DataConfig {
            base_url: default_base_url(),
            symbol: "^GSPC".to_string(),
            start: "2020-01-01".to_string(),
            end: "2021-01-01".to_string(),
            snapshot_path: Some("  ".to_string()),
        };
        assert!(cfg.snapshot_path().is_none());
        assert!(cfg.date_range().is_ok());
    }
}
