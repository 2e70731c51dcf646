//! Alpha Vantage daily time series client
//!
//! Only `TIME_SERIES_DAILY` is used. The API answers rate limiting and bad
//! symbols with HTTP 200 and a `Note` / `Information` / `Error Message`
//! body, so a missing time series key is the failure signal.

use crate::config::MarketDataConfig;
use crate::error::{Result, TraderError};
use crate::types::HistoricalPrice;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

const OPEN_KEY: &str = "1. open";
const HIGH_KEY: &str = "2. high";
const LOW_KEY: &str = "3. low";
const CLOSE_KEY: &str = "4. close";
const VOLUME_KEY: &str = "5. volume";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// How much history to request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSize {
    /// Latest 100 days
    Compact,
    /// Full history
    Full,
}

impl OutputSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputSize::Compact => "compact",
            OutputSize::Full => "full",
        }
    }
}

/// Shape of a raw response, for diagnosing API trouble
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub symbol: String,
    pub top_level_keys: Vec<String>,
    pub time_series_key: Option<String>,
    pub latest_date: Option<String>,
    pub latest_fields: Vec<String>,
    pub api_message: Option<String>,
}

#[derive(Clone)]
pub struct AlphaVantageClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantageClient {
    pub fn new(config: &MarketDataConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn time_series_daily(&self, symbol: &str, size: OutputSize) -> Result<Value> {
        let url = format!("{}/query", self.base_url);
        debug!("GET {} TIME_SERIES_DAILY {} ({})", url, symbol, size.as_str());

        let data: Value = self
            .http
            .get(&url)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", symbol),
                ("outputsize", size.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(data)
    }

    /// Full daily history, oldest first
    pub async fn fetch_daily_history(&self, symbol: &str) -> Result<Vec<HistoricalPrice>> {
        let data = self.time_series_daily(symbol, OutputSize::Full).await?;
        parse_daily_series(symbol, &data)
    }

    /// Close of the most recent trading day
    pub async fn fetch_current_price(&self, symbol: &str) -> Result<Decimal> {
        let data = self.time_series_daily(symbol, OutputSize::Compact).await?;
        latest_close(symbol, &data)
    }

    pub async fn probe(&self, symbol: &str) -> Result<ProbeReport> {
        let data = self.time_series_daily(symbol, OutputSize::Compact).await?;
        Ok(probe_response(symbol, &data))
    }
}

/// First top-level key that names a daily time series
pub fn find_time_series_key(data: &Map<String, Value>) -> Option<&str> {
    data.keys()
        .map(String::as_str)
        .find(|k| k.contains("Time Series") && k.contains("(Daily)"))
}

/// Explanation the API put in place of data, if any
pub fn api_message(data: &Value) -> Option<String> {
    ["Note", "Information", "Error Message"]
        .iter()
        .find_map(|k| data.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn series<'a>(symbol: &str, data: &'a Value) -> Result<&'a Map<String, Value>> {
    let missing = || {
        let reason = api_message(data)
            .unwrap_or_else(|| "no 'Time Series (Daily)' key in response".to_string());
        TraderError::MarketData(format!("{}: {}", symbol, reason))
    };

    let obj = data.as_object().ok_or_else(missing)?;
    let key = find_time_series_key(obj).ok_or_else(missing)?;
    obj.get(key).and_then(Value::as_object).ok_or_else(missing)
}

fn decimal_field(values: &Value, key: &str) -> std::result::Result<Decimal, String> {
    let raw = values
        .get(key)
        .ok_or_else(|| format!("missing expected key '{}'", key))?;
    let text = raw.as_str().map(str::to_string).unwrap_or_else(|| raw.to_string());
    Decimal::from_str(text.trim()).map_err(|e| format!("bad '{}' value {}: {}", key, text, e))
}

fn parse_bar(symbol: &str, date: &str, values: &Value) -> std::result::Result<HistoricalPrice, String> {
    let date = NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|e| format!("bad date: {}", e))?;
    let volume_raw = values
        .get(VOLUME_KEY)
        .ok_or_else(|| format!("missing expected key '{}'", VOLUME_KEY))?;
    let volume = match volume_raw {
        Value::String(s) => s.trim().parse::<i64>().map_err(|e| format!("bad volume {}: {}", s, e))?,
        Value::Number(n) => n.as_i64().ok_or_else(|| format!("bad volume {}", n))?,
        other => return Err(format!("bad volume {}", other)),
    };

    Ok(HistoricalPrice {
        symbol: symbol.to_string(),
        date,
        open_price: decimal_field(values, OPEN_KEY)?,
        high_price: decimal_field(values, HIGH_KEY)?,
        low_price: decimal_field(values, LOW_KEY)?,
        close_price: decimal_field(values, CLOSE_KEY)?,
        volume,
    })
}

/// Parse every day of a daily series, skipping malformed days
pub fn parse_daily_series(symbol: &str, data: &Value) -> Result<Vec<HistoricalPrice>> {
    let series = series(symbol, data)?;

    let mut bars: Vec<HistoricalPrice> = series
        .iter()
        .filter_map(|(date, values)| match parse_bar(symbol, date, values) {
            Ok(bar) => Some(bar),
            Err(e) => {
                warn!("{} for {} on {}. Skipping this data point.", e, symbol, date);
                None
            }
        })
        .collect();

    bars.sort_by_key(|b| b.date);
    Ok(bars)
}

/// Close of the latest date in the series
pub fn latest_close(symbol: &str, data: &Value) -> Result<Decimal> {
    let series = series(symbol, data)?;

    let latest = series
        .keys()
        .max()
        .ok_or_else(|| TraderError::MarketData(format!("{}: empty time series", symbol)))?;

    decimal_field(&series[latest], CLOSE_KEY)
        .map_err(|e| TraderError::MarketData(format!("{} on {}: {}", symbol, latest, e)))
}

pub fn probe_response(symbol: &str, data: &Value) -> ProbeReport {
    let obj = data.as_object();
    let top_level_keys = obj
        .map(|o| o.keys().cloned().collect())
        .unwrap_or_default();
    let time_series_key = obj.and_then(find_time_series_key).map(str::to_string);

    let latest = time_series_key
        .as_deref()
        .and_then(|k| data.get(k))
        .and_then(Value::as_object)
        .and_then(|s| s.iter().max_by(|a, b| a.0.cmp(b.0)));

    ProbeReport {
        symbol: symbol.to_string(),
        top_level_keys,
        time_series_key,
        latest_date: latest.map(|(d, _)| d.clone()),
        latest_fields: latest
            .and_then(|(_, v)| v.as_object())
            .map(|v| v.keys().cloned().collect())
            .unwrap_or_default(),
        api_message: api_message(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn sample_response() -> Value {
        json!({
            "Meta Data": {
                "1. Information": "Daily Prices (open, high, low, close) and Volumes",
                "2. Symbol": "IBM",
                "3. Last Refreshed": "2024-05-03"
            },
            "Time Series (Daily)": {
                "2024-05-03": {
                    "1. open": "166.8000",
                    "2. high": "167.0000",
                    "3. low": "164.5500",
                    "4. close": "165.7100",
                    "5. volume": "3898104"
                },
                "2024-05-02": {
                    "1. open": "164.3500",
                    "2. high": "166.2400",
                    "3. low": "163.8100",
                    "4. close": "166.0000",
                    "5. volume": "4203391"
                },
                "2024-05-01": {
                    "1. open": "165.6900",
                    "2. high": "166.2700",
                    "3. low": "164.3000",
                    "4. close": "164.4300",
                    "5. volume": "4030180"
                }
            }
        })
    }

    #[test]
    fn test_find_time_series_key() {
        let data = sample_response();
        let key = find_time_series_key(data.as_object().unwrap());
        assert_eq!(key, Some("Time Series (Daily)"));
    }

    #[test]
    fn test_find_time_series_key_ignores_other_intervals() {
        let data = json!({ "Time Series (5min)": {} , "Meta Data": {} });
        assert_eq!(find_time_series_key(data.as_object().unwrap()), None);
    }

    #[test]
    fn test_latest_close() {
        let price = latest_close("IBM", &sample_response()).unwrap();
        assert_eq!(price, dec!(165.71));
    }

    #[test]
    fn test_parse_daily_series_sorted_oldest_first() {
        let bars = parse_daily_series("IBM", &sample_response()).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(bars[2].close_price, dec!(165.71));
        assert_eq!(bars[2].volume, 3898104);
        assert_eq!(bars[1].symbol, "IBM");
    }

    #[test]
    fn test_parse_skips_malformed_days() {
        let data = json!({
            "Time Series (Daily)": {
                "2024-05-03": {
                    "1. open": "1", "2. high": "2", "3. low": "0.5",
                    "4. close": "1.5", "5. volume": "100"
                },
                "2024-05-02": {
                    "1. open": "1", "2. high": "2", "3. low": "0.5",
                    "5. volume": "100"
                },
                "2024-05-01": {
                    "1. open": "abc", "2. high": "2", "3. low": "0.5",
                    "4. close": "1.5", "5. volume": "100"
                },
                "not-a-date": {
                    "1. open": "1", "2. high": "2", "3. low": "0.5",
                    "4. close": "1.5", "5. volume": "100"
                }
            }
        });
        let bars = parse_daily_series("X", &data).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close_price, dec!(1.5));
    }

    #[test]
    fn test_rate_limit_note_is_reported() {
        let data = json!({
            "Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."
        });
        let err = latest_close("IBM", &data).unwrap_err();
        match err {
            TraderError::MarketData(msg) => {
                assert!(msg.starts_with("IBM: Thank you for using Alpha Vantage"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_error_message_is_reported() {
        let data = json!({ "Error Message": "Invalid API call." });
        let err = parse_daily_series("NOPE", &data).unwrap_err();
        assert!(err.to_string().contains("Invalid API call."));
    }

    #[test]
    fn test_empty_series_has_no_latest_close() {
        let data = json!({ "Time Series (Daily)": {} });
        assert!(latest_close("IBM", &data).is_err());
        assert!(parse_daily_series("IBM", &data).unwrap().is_empty());
    }

    #[test]
    fn test_probe_response() {
        let report = probe_response("IBM", &sample_response());
        assert_eq!(report.top_level_keys, vec!["Meta Data", "Time Series (Daily)"]);
        assert_eq!(report.time_series_key.as_deref(), Some("Time Series (Daily)"));
        assert_eq!(report.latest_date.as_deref(), Some("2024-05-03"));
        assert_eq!(report.latest_fields.len(), 5);
        assert!(report.api_message.is_none());
    }

    #[tokio::test]
    async fn test_fetch_current_price_over_http() {
        use axum::{extract::Query, routing::get, Json, Router};
        use std::collections::HashMap;

        let app = Router::new().route(
            "/query",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("function").map(String::as_str), Some("TIME_SERIES_DAILY"));
                assert_eq!(params.get("outputsize").map(String::as_str), Some("compact"));
                assert_eq!(params.get("apikey").map(String::as_str), Some("test-key"));
                Json(sample_response())
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = AlphaVantageClient::new(&MarketDataConfig {
            base_url: format!("http://{}/", addr),
            api_key: "test-key".to_string(),
            timeout_secs: 5,
            cache_ttl_secs: 0,
        })
        .unwrap();

        let price = client.fetch_current_price("IBM").await.unwrap();
        assert_eq!(price, dec!(165.71));
    }
}
