use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

use crate::backtest::SweepReport;

fn format_mape(v: f64) -> String {
    if v.is_finite() {
        format!("{:.4}", v)
    } else {
        "NaN".to_string()
    }
}

/// Fixed-width MAPE table: one row per window size, one column per model.
pub fn render_table(report: &SweepReport) -> String {
    let ids = report.model_ids();
    let col = ids.iter().map(|id| id.len()).max().unwrap_or(0).max(10);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "MAPE (%) for {} | stride {}",
        report.symbol, report.stride
    );
    let _ = write!(out, "{:>8}", "window");
    for id in &ids {
        let _ = write!(out, "  {:>col$}", id, col = col);
    }
    out.push('\n');

    for (row, size) in report.window_sizes.iter().enumerate() {
        let _ = write!(out, "{:>8}", size);
        for id in &ids {
            let cell = report
                .scores
                .get(*id)
                .and_then(|scores| scores.get(row))
                .map(|s| format_mape(s.mean_ape))
                .unwrap_or_else(|| "-".to_string());
            let _ = write!(out, "  {:>col$}", cell, col = col);
        }
        out.push('\n');
    }

    for id in &ids {
        if let Some((size, mape)) = report.best_window(id) {
            let _ = writeln!(out, "best {}: window {} ({})", id, size, format_mape(mape));
        }
    }
    out
}

pub fn write_json(report: &SweepReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
