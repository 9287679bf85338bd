use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

use sandbox_forecast::backtest::{run_sweep, EvaluatorConfig, WindowedEvaluator};
use sandbox_forecast::config::{Config, LoggingConfig};
use sandbox_forecast::data::load_price_series;
use sandbox_forecast::report::{render_table, write_json};

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.trim()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // reqwest's rustls backend needs a process-wide crypto provider.
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set SANDBOX_FORECAST_CONFIG or create config/default.toml");
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging);

    let window_sizes = config.backtest.resolved_window_sizes()?;
    let specs = config.predictor_specs()?;
    tracing::info!(
        symbol = %config.data.symbol,
        start = %config.data.start,
        end = %config.data.end,
        windows = ?window_sizes,
        models = ?specs.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(),
        "Starting sandbox-forecast"
    );

    let series = load_price_series(&config.data)
        .await
        .context("failed to load price series")?;
    let closes = series.closes();
    if let Some(&largest) = window_sizes.last() {
        if largest >= closes.len() {
            tracing::warn!(
                largest,
                bars = closes.len(),
                "Largest window leaves no point to forecast; its score will be NaN"
            );
        }
    }

    let evaluator = WindowedEvaluator::new(EvaluatorConfig {
        stride: config.backtest.stride,
        parallel: config.backtest.parallel,
    });
    let symbol = series.symbol.clone();
    let report = tokio::task::spawn_blocking(move || {
        run_sweep(&symbol, &closes, &window_sizes, &specs, &evaluator)
    })
    .await
    .context("sweep task panicked")?;

    println!("{}", render_table(&report));

    if let Some(path) = config.output.report_path.as_deref() {
        write_json(&report, Path::new(path))?;
        tracing::info!(path, "Wrote sweep report");
    }

    if let Some(path) = config.output.chart_path.as_deref() {
        render_chart(&report, Path::new(path))?;
    }

    tracing::info!("Sweep complete");
    Ok(())
}

#[cfg(feature = "chart")]
fn render_chart(report: &sandbox_forecast::backtest::SweepReport, path: &Path) -> Result<()> {
    sandbox_forecast::chart::render_mape_chart(report, path)
}

#[cfg(not(feature = "chart"))]
fn render_chart(_report: &sandbox_forecast::backtest::SweepReport, path: &Path) -> Result<()> {
    tracing::warn!(
        path = %path.display(),
        "output.chart_path is set but the binary was built without the `chart` feature"
    );
    Ok(())
}
