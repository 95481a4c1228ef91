use crate::error::ExchangeError;
use crate::models::{Candle, Interval};
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.binance.com/api/v3";

/// Public market-data endpoints are generous, but stay well under the weight
/// limit so bursts from the breakout loop never trip 429s of our own making.
const RATE_LIMIT_RPM: u32 = 120;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
const NETWORK_RETRY_DELAY_SECS: u64 = 2;

// Type alias for the rate limiter to simplify signatures
type ExchangeRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Exchange REST client with client-side rate limiting.
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<ExchangeRateLimiter>,
}

/// Response from /ticker/price
#[derive(Debug, Deserialize)]
struct TickerPrice {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ExchangeError> {
        let client = Client::builder().timeout(timeout).build()?;

        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).unwrap());
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            client,
            base_url: base_url.into(),
            rate_limiter,
        })
    }

    /// Make a rate-limited request with the single-retry policy.
    ///
    /// 429 waits out the server's retry hint (default 60s) and retries exactly
    /// once; a second 429 surfaces as `RateLimited`. 418 is a ban and is never
    /// retried. Transient network failures also get one retry.
    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response, ExchangeError> {
        let mut retried = false;

        loop {
            self.rate_limiter.until_ready().await;

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    match status.as_u16() {
                        418 => return Err(ExchangeError::Banned),
                        429 => {
                            let wait = retry_after_secs(&response);
                            if retried {
                                return Err(ExchangeError::RateLimited {
                                    retry_after_secs: wait,
                                });
                            }
                            retried = true;
                            tracing::warn!(
                                "Rate limited by exchange (429), waiting {}s before single retry",
                                wait
                            );
                            tokio::time::sleep(Duration::from_secs(wait)).await;
                        }
                        s => return Err(ExchangeError::Status { status: s }),
                    }
                }
                Err(e) => {
                    if retried {
                        return Err(ExchangeError::Network(e));
                    }
                    retried = true;
                    tracing::warn!(
                        "Network error ({}), retrying once in {}s",
                        e,
                        NETWORK_RETRY_DELAY_SECS
                    );
                    tokio::time::sleep(Duration::from_secs(NETWORK_RETRY_DELAY_SECS)).await;
                }
            }
        }
    }
}

fn retry_after_secs(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

#[async_trait::async_trait]
impl super::MarketData for BinanceClient {
    /// Fetch klines and return them sorted ascending by close time.
    ///
    /// The endpoint hands back rows newest-first; every caller here relies on
    /// ascending order, so the re-sort happens once at this boundary.
    async fn candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut url = format!(
            "{}/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            interval.as_str(),
            limit
        );
        if let Some(end) = end_time {
            url.push_str(&format!("&endTime={}", end.timestamp_millis()));
        }

        let response = self.get_with_retry(&url).await?;
        let rows: Vec<Vec<serde_json::Value>> = response.json().await?;

        let mut candles = rows
            .iter()
            .map(|row| parse_kline_row(row))
            .collect::<Result<Vec<_>, _>>()?;
        candles.sort_by_key(|c| c.close_time);

        tracing::debug!(
            "Fetched {} {} candles for {}",
            candles.len(),
            interval.as_str(),
            symbol
        );

        Ok(candles)
    }

    async fn price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let url = format!("{}/ticker/price?symbol={}", self.base_url, symbol);

        let response = self.get_with_retry(&url).await?;
        let ticker: TickerPrice = response.json().await?;

        ticker
            .price
            .parse()
            .map_err(|_| ExchangeError::Malformed(format!("unparsable price: {}", ticker.price)))
    }
}

/// Parse one fixed-width kline row:
/// `[openTime, open, high, low, close, volume, closeTime, quoteVolume, ...]`
/// where timestamps are epoch millis and prices are decimal strings.
/// Trailing fields beyond closeTime are ignored.
fn parse_kline_row(row: &[serde_json::Value]) -> Result<Candle, ExchangeError> {
    if row.len() < 7 {
        return Err(ExchangeError::Malformed(format!(
            "kline row has {} fields, expected at least 7",
            row.len()
        )));
    }

    let open_time = millis_field(row, 0)?;
    let close_time = millis_field(row, 6)?;

    if open_time >= close_time {
        return Err(ExchangeError::Malformed(format!(
            "kline open time {} not before close time {}",
            open_time, close_time
        )));
    }

    Ok(Candle {
        open_time,
        close_time,
        open: price_field(row, 1)?,
        high: price_field(row, 2)?,
        low: price_field(row, 3)?,
        close: price_field(row, 4)?,
        volume: price_field(row, 5)?,
    })
}

fn millis_field(row: &[serde_json::Value], idx: usize) -> Result<DateTime<Utc>, ExchangeError> {
    let ms = row[idx]
        .as_i64()
        .ok_or_else(|| ExchangeError::Malformed(format!("kline field {} is not a timestamp", idx)))?;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| ExchangeError::Malformed(format!("kline timestamp {} out of range", ms)))
}

/// Prices arrive as decimal strings ("43521.10"); tolerate bare numbers too.
fn price_field(row: &[serde_json::Value], idx: usize) -> Result<f64, ExchangeError> {
    let value = &row[idx];
    if let Some(s) = value.as_str() {
        return s
            .parse()
            .map_err(|_| ExchangeError::Malformed(format!("kline field {} is not numeric: {}", idx, s)));
    }
    value
        .as_f64()
        .ok_or_else(|| ExchangeError::Malformed(format!("kline field {} is not numeric", idx)))
}
