use sandbox_forecast::backtest::{run_sweep, EvaluatorConfig, WindowedEvaluator};
use sandbox_forecast::predictor::{default_predictor_specs, select_predictor_specs};
use sandbox_forecast::report::{render_table, write_json};

fn sample_report() -> sandbox_forecast::backtest::SweepReport {
    let series: Vec<f64> = (0..40).map(|i| 50.0 + (i % 5) as f64).collect();
    let specs = select_predictor_specs(
        &default_predictor_specs(),
        &["persistence-v1".to_string(), "bayes-ar1-v1".to_string()],
    )
    .unwrap();
    let evaluator = WindowedEvaluator::new(EvaluatorConfig {
        stride: 1,
        parallel: false,
    });
    run_sweep("^TEST", &series, &[10, 40], &specs, &evaluator)
}

#[test]
fn table_lists_models_sizes_and_nan_cells() {
    let table = render_table(&sample_report());
    let lines: Vec<&str> = table.lines().collect();
    assert!(lines[0].contains("^TEST"));
    assert!(lines[1].contains("window"));
    assert!(lines[1].contains("persistence-v1"));
    assert!(lines[1].contains("bayes-ar1-v1"));
    assert!(lines[2].trim_start().starts_with("10"));
    assert!(lines[3].trim_start().starts_with("40"));
    assert!(lines[3].contains("NaN"));
    assert!(table.contains("best persistence-v1: window 10"));
}

#[test]
fn json_report_round_trips_through_value() {
    let report = sample_report();
    let path = std::env::temp_dir()
        .join(format!("sandbox-forecast-report-{}", std::process::id()))
        .join("sweep.json");
    write_json(&report, &path).unwrap();

    let body = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["symbol"], "^TEST");
    assert_eq!(value["window_sizes"], serde_json::json!([10, 40]));
    let persistence = value["scores"]["persistence-v1"].as_array().unwrap();
    assert_eq!(persistence.len(), 2);
    assert_eq!(persistence[0]["attempted"], 30);
    assert!(persistence[0]["mean_ape"].as_f64().unwrap() > 0.0);
    // serde_json writes NaN as null
    assert!(persistence[1]["mean_ape"].is_null());
    assert!(persistence[0]["metrics"]["samples"].as_u64().unwrap() == 30);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}
