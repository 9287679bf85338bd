pub mod backtest;
#[cfg(feature = "chart")]
pub mod chart;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod predictor;
pub mod report;
