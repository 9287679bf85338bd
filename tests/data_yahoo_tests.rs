use chrono::NaiveDate;
use mockito::{Matcher, Server};

use sandbox_forecast::config::DataConfig;
use sandbox_forecast::data::{load_price_series, parse_chart_response, YahooClient};

const CHART_BODY: &str = r#"{
  "chart": {
    "result": [{
      "meta": { "symbol": "^GSPC", "currency": "USD" },
      "timestamp": [1704205800, 1704292200, 1704378600, 1704465000],
      "indicators": {
        "quote": [{
          "open": [4745.2, 4725.1, 4697.4, 4690.6],
          "close": [4742.83, 4704.81, null, 4697.24],
          "volume": [3743050000, 3950760000, 3715480000, 3844370000]
        }],
        "adjclose": [{
          "adjclose": [4742.83, 4704.81, 4688.68, null]
        }]
      }
    }],
    "error": null
  }
}"#;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn temp_path(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("sandbox-forecast-{}-{}", tag, std::process::id()))
        .join("snapshot.json")
}

#[test]
fn parse_prefers_adjclose_and_falls_back_to_close() {
    let series = parse_chart_response("^GSPC", CHART_BODY).unwrap();
    assert_eq!(series.symbol, "^GSPC");
    assert_eq!(series.len(), 4);
    assert_eq!(series.closes(), vec![4742.83, 4704.81, 4688.68, 4697.24]);
    let bars = series.bars();
    // Missing close falls back to the adjusted close and vice versa.
    assert_eq!(bars[2].close, 4688.68);
    assert_eq!(bars[3].adj_close, 4697.24);
    assert_eq!(bars[0].date, date(2024, 1, 2));
    assert_eq!(series.first_date(), Some(date(2024, 1, 2)));
    assert_eq!(series.last_date(), Some(date(2024, 1, 5)));
}

#[test]
fn parse_uses_close_when_adjclose_block_is_missing() {
    let body = r#"{"chart":{"result":[{"timestamp":[1704205800,1704292200],
        "indicators":{"quote":[{"close":[10.5, 11.0]}]}}],"error":null}}"#;
    let series = parse_chart_response("SPY", body).unwrap();
    assert_eq!(series.closes(), vec![10.5, 11.0]);
}

#[test]
fn parse_skips_null_and_non_positive_rows() {
    let body = r#"{"chart":{"result":[{"timestamp":[1704205800,1704292200,1704378600],
        "indicators":{"quote":[{"close":[null, 0.0, 12.0]}],
        "adjclose":[{"adjclose":[null, 0.0, 12.0]}]}}],"error":null}}"#;
    let series = parse_chart_response("SPY", body).unwrap();
    assert_eq!(series.closes(), vec![12.0]);
}

#[test]
fn parse_surfaces_chart_error() {
    let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
    let err = parse_chart_response("NOPE", body).unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("Not Found"), "{msg}");
}

#[test]
fn parse_rejects_body_without_usable_prices() {
    let body = r#"{"chart":{"result":[{"timestamp":[1704205800],
        "indicators":{"quote":[{"close":[null]}]}}],"error":null}}"#;
    assert!(parse_chart_response("SPY", body).is_err());
    assert!(parse_chart_response("SPY", "not json").is_err());
}

#[tokio::test]
async fn fetch_daily_sends_range_query_and_parses_body() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", Matcher::Any)
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("interval".into(), "1d".into()),
            Matcher::UrlEncoded("period1".into(), "1704067200".into()),
            Matcher::UrlEncoded("period2".into(), "1704585600".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(CHART_BODY)
        .create_async()
        .await;

    let client = YahooClient::new(&server.url()).unwrap();
    let series = client
        .fetch_daily("^GSPC", date(2024, 1, 1), date(2024, 1, 6))
        .await
        .unwrap();
    assert_eq!(series.len(), 4);
    mock.assert_async().await;
}

#[tokio::test]
async fn fetch_daily_reports_http_status() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", Matcher::Any)
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body("upstream    exploded")
        .create_async()
        .await;

    let client = YahooClient::new(&server.url()).unwrap();
    let err = client
        .fetch_daily("^GSPC", date(2024, 1, 1), date(2024, 1, 6))
        .await
        .unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("500"), "{msg}");
    assert!(msg.contains("upstream exploded"), "{msg}");
}

#[tokio::test]
async fn load_price_series_prefers_existing_snapshot() {
    let path = temp_path("snapshot-read");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, CHART_BODY).unwrap();

    let cfg = DataConfig {
        // Unroutable: the snapshot must be used instead of the network.
        base_url: "http://127.0.0.1:9/chart".to_string(),
        symbol: "^GSPC".to_string(),
        start: "2024-01-01".to_string(),
        end: "2024-01-06".to_string(),
        snapshot_path: Some(path.to_string_lossy().into_owned()),
    };
    let series = load_price_series(&cfg).await.unwrap();
    assert_eq!(series.len(), 4);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[tokio::test]
async fn load_price_series_writes_snapshot_after_download() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", Matcher::Any)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(CHART_BODY)
        .expect(1)
        .create_async()
        .await;

    let path = temp_path("snapshot-write");
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
    let cfg = DataConfig {
        base_url: server.url(),
        symbol: "^GSPC".to_string(),
        start: "2024-01-01".to_string(),
        end: "2024-01-06".to_string(),
        snapshot_path: Some(path.to_string_lossy().into_owned()),
    };

    let first = load_price_series(&cfg).await.unwrap();
    assert!(path.exists());
    let second = load_price_series(&cfg).await.unwrap();
    assert_eq!(first.closes(), second.closes());
    mock.assert_async().await;

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}
