use crate::error::FetchError;
use crate::models::{Candle, CandleSeries, Instrument, Timeframe};
use crate::storage_utils::{EndpointConfig, FetchConfig};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

#[derive(Deserialize)]
struct CandleResponse {
    s: Option<String>,
    data: Option<Vec<Candle>>,
}

/// Shared handles for every market-data request of a run.
///
/// Cloning is cheap: the HTTP pool and the limiter are shared between clones,
/// so one limiter bounds in-flight candle requests across all instruments.
#[derive(Clone)]
pub struct MarketClient {
    http: Client,
    limiter: Arc<Semaphore>,
    endpoints: EndpointConfig,
    failure_pause: Duration,
}

impl MarketClient {
    pub fn new(endpoints: EndpointConfig, fetch: &FetchConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .pool_max_idle_per_host(50)
            .timeout(Duration::from_secs(fetch.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            limiter: Arc::new(Semaphore::new(fetch.max_concurrent)),
            endpoints,
            failure_pause: Duration::from_millis(fetch.failure_pause_ms),
        })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn endpoints(&self) -> &EndpointConfig {
        &self.endpoints
    }

    pub fn limiter(&self) -> &Arc<Semaphore> {
        &self.limiter
    }
}

/// `(from, to)` unix seconds covering `periods` bars of `resolution` ending at `end`.
/// Daily bars span `periods` days; unknown codes fall back to `periods` hours.
pub fn query_window(resolution: &str, periods: u32, end: i64) -> (i64, i64) {
    let periods = periods as i64;
    let span = match resolution {
        "1D" => periods * 24 * 60 * 60,
        "15" | "30" | "60" | "240" => {
            let minutes: i64 = resolution.parse().unwrap_or(60);
            periods * minutes * 60
        }
        _ => periods * 60 * 60,
    };
    (end - span, end)
}

/// Fetches up to `periods` candles for one (instrument, timeframe) pair.
///
/// Waits for a limiter permit, which is released as soon as the request
/// resolves. Failed requests pause briefly before returning so quick
/// failures do not hammer the endpoint. There is no retry.
pub async fn fetch_candles(
    client: &MarketClient,
    instrument: &Instrument,
    timeframe: Timeframe,
    periods: u32,
) -> Result<CandleSeries, FetchError> {
    let result = {
        let _permit = client
            .limiter
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;
        request_candles(client, instrument, timeframe, periods).await
    };

    if let Err(e) = &result {
        debug!(instrument = %instrument, timeframe = %timeframe, error = %e, "candle fetch failed");
        tokio::time::sleep(client.failure_pause).await;
    }
    result
}

async fn request_candles(
    client: &MarketClient,
    instrument: &Instrument,
    timeframe: Timeframe,
    periods: u32,
) -> Result<CandleSeries, FetchError> {
    let (from, to) = query_window(timeframe.resolution(), periods, Utc::now().timestamp());
    let query = vec![
        ("pair", instrument.as_str().to_string()),
        ("from", from.to_string()),
        ("to", to.to_string()),
        ("resolution", timeframe.resolution().to_string()),
        ("pcode", client.endpoints.provider_code.clone()),
    ];

    let response = client
        .http
        .get(&client.endpoints.candles_url)
        .query(&query)
        .send()
        .await?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(FetchError::Status(status));
    }

    let bytes = response.bytes().await?;
    let body: CandleResponse = serde_json::from_slice(&bytes)?;

    if body.s.as_deref() != Some("ok") {
        return Err(FetchError::Malformed(format!(
            "status field is {:?}",
            body.s.unwrap_or_default()
        )));
    }

    let mut candles = match body.data {
        Some(candles) if !candles.is_empty() => candles,
        _ => return Err(FetchError::NoData),
    };
    candles.sort_by_key(|c| c.time);
    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const NOW: i64 = 1_700_000_000;

    fn client_for(server: &mockito::Server, max_concurrent: usize) -> MarketClient {
        let endpoints = EndpointConfig {
            instruments_url: format!("{}/instruments", server.url()),
            candles_url: format!("{}/candles", server.url()),
            provider_code: "f".to_string(),
        };
        let fetch = FetchConfig {
            max_concurrent,
            failure_pause_ms: 10,
            request_timeout_secs: 5,
            ..FetchConfig::default()
        };
        MarketClient::new(endpoints, &fetch).unwrap()
    }

    fn candles_body(count: usize) -> String {
        // newest first, to check the series gets sorted
        let data: Vec<serde_json::Value> = (0..count)
            .rev()
            .map(|i| {
                serde_json::json!({
                    "time": 1_700_000_000_000i64 + i as i64 * 900_000,
                    "open": 1.0, "high": 2.0, "low": 0.5,
                    "close": 1.0 + i as f64,
                    "volume": 10.0
                })
            })
            .collect();
        serde_json::json!({ "s": "ok", "data": data }).to_string()
    }

    #[test]
    fn window_per_resolution() {
        assert_eq!(query_window("15", 100, NOW), (NOW - 100 * 15 * 60, NOW));
        assert_eq!(query_window("240", 100, NOW), (NOW - 100 * 240 * 60, NOW));
        assert_eq!(query_window("1D", 100, NOW), (NOW - 100 * 86_400, NOW));
        assert_eq!(query_window("5", 10, NOW), (NOW - 10 * 3_600, NOW));
    }

    #[tokio::test]
    async fn successful_fetch_sends_expected_query_and_sorts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/candles")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("pair".into(), "B-BTC_USDT".into()),
                Matcher::UrlEncoded("resolution".into(), "240".into()),
                Matcher::UrlEncoded("pcode".into(), "f".into()),
                Matcher::Regex("from=\\d+".into()),
                Matcher::Regex("to=\\d+".into()),
            ]))
            .with_status(200)
            .with_body(candles_body(40))
            .create_async()
            .await;

        let client = client_for(&server, 2);
        let series = fetch_candles(&client, &Instrument::new("B-BTC_USDT"), Timeframe::H4, 100)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(series.len(), 40);
        assert!(series.windows(2).all(|w| w[0].time < w[1].time));
        assert_eq!(series[0].close, 1.0);
    }

    #[tokio::test]
    async fn non_ok_shapes_are_failures() {
        let mut server = mockito::Server::new_async().await;
        let client = client_for(&server, 2);
        let pair = Instrument::new("B-ETH_USDT");

        let cases: Vec<(usize, &str)> = vec![
            (500, r#"{"s":"ok","data":[]}"#),
            (200, r#"{"s":"no_data","data":[]}"#),
            (200, r#"{"s":"ok","data":[]}"#),
            (200, r#"{"data":[{"time":1,"open":1,"high":1,"low":1,"close":1,"volume":1}]}"#),
            (200, "not json"),
        ];

        for (status, body) in cases {
            let mock = server
                .mock("GET", "/candles")
                .match_query(Matcher::Any)
                .with_status(status)
                .with_body(body)
                .create_async()
                .await;

            let result = fetch_candles(&client, &pair, Timeframe::M15, 100).await;
            assert!(result.is_err(), "status {} body {} should fail", status, body);
            mock.remove_async().await;
        }

        assert_eq!(client.limiter().available_permits(), 2);
    }

    #[tokio::test]
    async fn failure_kinds_are_distinguished() {
        let mut server = mockito::Server::new_async().await;
        let client = client_for(&server, 1);
        let pair = Instrument::new("B-XRP_USDT");

        let mock = server
            .mock("GET", "/candles")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;
        let err = fetch_candles(&client, &pair, Timeframe::D1, 100).await.unwrap_err();
        assert!(matches!(err, FetchError::Status(s) if s == StatusCode::NOT_FOUND));
        mock.remove_async().await;

        let mock = server
            .mock("GET", "/candles")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"s":"ok","data":null}"#)
            .create_async()
            .await;
        let err = fetch_candles(&client, &pair, Timeframe::D1, 100).await.unwrap_err();
        assert!(matches!(err, FetchError::NoData));
        mock.remove_async().await;
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_failure() {
        let endpoints = EndpointConfig {
            instruments_url: "http://127.0.0.1:9/instruments".to_string(),
            candles_url: "http://127.0.0.1:9/candles".to_string(),
            provider_code: "f".to_string(),
        };
        let fetch = FetchConfig {
            failure_pause_ms: 0,
            request_timeout_secs: 2,
            ..FetchConfig::default()
        };
        let client = MarketClient::new(endpoints, &fetch).unwrap();
        let result = fetch_candles(&client, &Instrument::new("B-BTC_USDT"), Timeframe::M15, 100).await;
        assert!(matches!(result, Err(FetchError::Transport(_)) | Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn fetch_waits_for_a_limiter_permit() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/candles")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(candles_body(5))
            .create_async()
            .await;

        let client = client_for(&server, 1);
        let held = client.limiter().clone().acquire_owned().await.unwrap();

        let task_client = client.clone();
        let mut handle = tokio::spawn(async move {
            fetch_candles(&task_client, &Instrument::new("B-SOL_USDT"), Timeframe::M30, 100).await
        });

        let blocked = tokio::time::timeout(Duration::from_millis(100), &mut handle).await;
        assert!(blocked.is_err(), "fetch ran without a permit");

        drop(held);
        let series = handle.await.unwrap().unwrap();
        assert_eq!(series.len(), 5);
        assert_eq!(client.limiter().available_permits(), 1);
    }

    #[tokio::test]
    async fn silent_server_times_out_and_returns_the_permit() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accept connections and never answer them
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let endpoints = EndpointConfig {
            instruments_url: format!("http://{}/instruments", addr),
            candles_url: format!("http://{}/candles", addr),
            provider_code: "f".to_string(),
        };
        let fetch = FetchConfig {
            max_concurrent: 1,
            failure_pause_ms: 0,
            request_timeout_secs: 1,
            ..FetchConfig::default()
        };
        let client = MarketClient::new(endpoints, &fetch).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            fetch_candles(&client, &Instrument::new("B-BTC_USDT"), Timeframe::M15, 100),
        )
        .await
        .expect("request timeout did not fire");

        assert!(matches!(result, Err(FetchError::Timeout)), "got {:?}", result);
        assert_eq!(client.limiter().available_permits(), 1);
        server.abort();
    }
}
