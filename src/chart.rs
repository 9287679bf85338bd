use std::path::Path;

use anyhow::{Context, Result};
use plotters::prelude::*;

use crate::backtest::SweepReport;

/// PNG line chart of MAPE against window size, one line per model. Undefined
/// (NaN) cells are left out of each line; when nothing is defined no file is
/// written.
pub fn render_mape_chart(report: &SweepReport, path: &Path) -> Result<()> {
    let curves: Vec<(&str, Vec<(f64, f64)>)> = report
        .model_ids()
        .into_iter()
        .map(|id| {
            let points = report
                .window_sizes
                .iter()
                .zip(report.mape_curve(id).unwrap_or_default())
                .filter(|(_, mape)| mape.is_finite())
                .map(|(size, mape)| (*size as f64, mape))
                .collect();
            (id, points)
        })
        .collect();

    let all: Vec<(f64, f64)> = curves.iter().flat_map(|(_, p)| p.iter().copied()).collect();
    if all.is_empty() {
        tracing::warn!(
            path = %path.display(),
            "No window size produced a defined MAPE; skipping chart"
        );
        return Ok(());
    }
    let x_min = all.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let x_max = all.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let y_max = all.iter().map(|p| p.1).fold(0.0, f64::max);
    let x_pad = ((x_max - x_min) * 0.05).max(1.0);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let root = BitMapBackend::new(path, (1024, 640)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("{} one-step MAPE by window size", report.symbol),
            ("sans-serif", 24),
        )
        .margin(16)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d((x_min - x_pad)..(x_max + x_pad), 0.0..(y_max * 1.1).max(1e-6))?;
    chart
        .configure_mesh()
        .x_desc("window size")
        .y_desc("MAPE (%)")
        .draw()?;

    for (idx, (id, points)) in curves.into_iter().enumerate() {
        let style = Palette99::pick(idx).to_rgba().stroke_width(2);
        chart
            .draw_series(LineSeries::new(points, style))?
            .label(id)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], style));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()
        .with_context(|| format!("failed to write chart {}", path.display()))?;
    tracing::info!(path = %path.display(), "Wrote MAPE chart");
    Ok(())
}
