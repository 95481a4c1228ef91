use crate::error::ExchangeError;
use crate::models::{Candle, Interval};
use chrono::{DateTime, Duration, Utc};

pub mod binance;

pub use binance::BinanceClient;

/// Largest `limit` the klines endpoint accepts per request.
pub const MAX_KLINE_LIMIT: u32 = 1000;

/// Read-only market data feed.
///
/// `candles` must return the series sorted ascending by close time; `end_time`
/// bounds the newest candle returned and is how history is paged backwards.
#[async_trait::async_trait]
pub trait MarketData: Send + Sync {
    async fn candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn price(&self, symbol: &str) -> Result<f64, ExchangeError>;
}

/// Drop any candle still forming at `now`.
///
/// The exchange includes the in-progress candle as the newest row; analytics
/// must only ever see closed candles.
pub fn closed_candles(mut candles: Vec<Candle>, now: DateTime<Utc>) -> Vec<Candle> {
    candles.retain(|c| c.is_closed(now));
    candles
}

/// Fetch all candles whose close time falls in `[from, to]`, paging backwards
/// with `end_time` when the window exceeds one request.
pub async fn candle_window<S>(
    source: &S,
    symbol: &str,
    interval: Interval,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Candle>, ExchangeError>
where
    S: MarketData + ?Sized,
{
    let mut pages: Vec<Vec<Candle>> = Vec::new();
    let mut end = to;

    loop {
        let batch = source
            .candles(symbol, interval, MAX_KLINE_LIMIT, Some(end))
            .await?;
        if batch.is_empty() {
            break;
        }

        let oldest = batch[0].open_time;
        let batch_len = batch.len();
        pages.push(batch);

        if oldest <= from || (batch_len as u32) < MAX_KLINE_LIMIT {
            break;
        }
        end = oldest - Duration::milliseconds(1);
    }

    let mut candles: Vec<Candle> = pages.into_iter().flatten().collect();
    candles.sort_by_key(|c| c.close_time);
    candles.dedup_by_key(|c| c.open_time);
    candles.retain(|c| c.close_time >= from && c.open_time <= to);

    Ok(candles)
}
