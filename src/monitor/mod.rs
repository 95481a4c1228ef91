use crate::api::{closed_candles, MarketData};
use crate::error::IndicatorError;
use crate::indicators::{rsi_moving_average, rsi_series};
use crate::models::{Candle, Interval, RsiReading};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// A reading whose latest candle closed more than this many hours ago is
/// flagged stale (two missed candles at the hourly cadence).
pub const STALE_AFTER_HOURS: i64 = 2;

/// Builds per-symbol RSI readings from hourly candles.
pub struct RsiMonitor {
    source: Arc<dyn MarketData>,
    period: usize,
    ma_period: usize,
    delay: std::time::Duration,
}

impl RsiMonitor {
    pub fn new(
        source: Arc<dyn MarketData>,
        period: usize,
        ma_period: usize,
        delay: std::time::Duration,
    ) -> Self {
        Self {
            source,
            period,
            ma_period,
            delay,
        }
    }

    /// Fetch and compute the current reading for one symbol.
    pub async fn reading(&self, symbol: &str, now: DateTime<Utc>) -> anyhow::Result<RsiReading> {
        // Enough closed candles for the RSI warm-up plus a full MA window on
        // the previous reading, with slack for the forming candle we drop.
        let limit = (self.period + self.ma_period + 4) as u32;

        let candles = self
            .source
            .candles(symbol, Interval::OneHour, limit, None)
            .await
            .with_context(|| format!("fetching hourly candles for {}", symbol))?;
        let candles = closed_candles(candles, now);

        let reading = reading_from_candles(symbol, &candles, self.period, self.ma_period, now)
            .with_context(|| format!("computing RSI for {}", symbol))?;
        Ok(reading)
    }

    /// Refresh a batch of symbols sequentially.
    ///
    /// Symbols are spaced by the configured delay to stay inside exchange
    /// rate limits; one symbol failing never aborts the rest.
    pub async fn readings(&self, symbols: &[String], now: DateTime<Utc>) -> Vec<RsiReading> {
        let mut readings = Vec::with_capacity(symbols.len());

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay).await;
            }

            match self.reading(symbol, now).await {
                Ok(reading) => readings.push(reading),
                Err(e) => {
                    tracing::error!("RSI refresh failed for {}: {:#}", symbol, e);
                }
            }
        }

        readings
    }
}

struct ReadingSlot {
    timestamp: DateTime<Utc>,
    price: f64,
    rsi: Option<f64>,
    rsi_ma: Option<f64>,
}

/// Build a reading from an already-fetched candle series.
///
/// The latest/previous pair is taken by position; if the positionally
/// previous candle closed after the positionally latest one, the two readings
/// are swapped so that `timestamp` always holds the most recent close. The
/// swap is logged as a warning, never raised as an error.
pub fn reading_from_candles(
    symbol: &str,
    candles: &[Candle],
    period: usize,
    ma_period: usize,
    now: DateTime<Utc>,
) -> Result<RsiReading, IndicatorError> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let series = rsi_series(&closes, period)?;

    // rsi_series guarantees at least period + 1 >= 2 candles here
    let last_idx = candles.len() - 1;
    let prev_idx = last_idx - 1;

    let last = ReadingSlot {
        timestamp: candles[last_idx].close_time,
        price: candles[last_idx].close,
        rsi: series[last_idx],
        rsi_ma: rsi_moving_average(&series[..=last_idx], ma_period),
    };
    let prev = ReadingSlot {
        timestamp: candles[prev_idx].close_time,
        price: candles[prev_idx].close,
        rsi: series[prev_idx],
        rsi_ma: rsi_moving_average(&series[..=prev_idx], ma_period),
    };

    let (latest, previous) = if prev.timestamp > last.timestamp {
        tracing::warn!(
            "Out-of-order candles for {}: previous closed {} after latest {}, swapping readings",
            symbol,
            prev.timestamp,
            last.timestamp
        );
        (prev, last)
    } else {
        (last, prev)
    };

    Ok(RsiReading {
        symbol: symbol.to_string(),
        timestamp: latest.timestamp,
        price: latest.price,
        rsi: latest.rsi,
        rsi_moving_average: latest.rsi_ma,
        previous_timestamp: Some(previous.timestamp),
        previous_price: Some(previous.price),
        previous_rsi: previous.rsi,
        previous_rsi_moving_average: previous.rsi_ma,
        is_stale: now - latest.timestamp > Duration::hours(STALE_AFTER_HOURS),
    })
}
