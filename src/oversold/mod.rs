use crate::api::{closed_candles, MarketData, MAX_KLINE_LIMIT};
use crate::error::IndicatorError;
use crate::indicators::rsi_series;
use crate::models::{Candle, Interval, OversoldEvent};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Scans hourly RSI history for threshold crossings.
pub struct OversoldScanner {
    source: Arc<dyn MarketData>,
    period: usize,
    threshold: f64,
    delay: std::time::Duration,
}

impl OversoldScanner {
    pub fn new(
        source: Arc<dyn MarketData>,
        period: usize,
        threshold: f64,
        delay: std::time::Duration,
    ) -> Self {
        Self {
            source,
            period,
            threshold,
            delay,
        }
    }

    /// Scan one symbol's lookback window.
    ///
    /// With `since`, only candles closing strictly after it are fetched and
    /// emitted (the incremental path); callers merge the result into their
    /// previously cached events.
    pub async fn scan(
        &self,
        symbol: &str,
        days: u32,
        since: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<OversoldEvent>> {
        let limit = self.fetch_limit(days, since, now);

        let candles = self
            .source
            .candles(symbol, Interval::OneHour, limit, None)
            .await
            .with_context(|| format!("fetching oversold history for {}", symbol))?;
        let candles = closed_candles(candles, now);

        let window_start = now - Duration::days(days as i64);
        let events = events_from_candles(
            symbol,
            &candles,
            self.period,
            self.threshold,
            window_start,
            since,
        )
        .with_context(|| format!("computing oversold events for {}", symbol))?;

        Ok(events)
    }

    /// Scan a batch sequentially with the configured inter-symbol delay,
    /// merging all results newest-first. Per-symbol failures are logged and
    /// skipped.
    pub async fn scan_many(
        &self,
        symbols: &[String],
        days: u32,
        since: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Vec<OversoldEvent> {
        let mut collected = Vec::new();

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay).await;
            }

            match self.scan(symbol, days, since, now).await {
                Ok(events) => {
                    tracing::debug!("{}: {} oversold events", symbol, events.len());
                    collected.extend(events);
                }
                Err(e) => {
                    tracing::error!("Oversold scan failed for {}: {:#}", symbol, e);
                }
            }
        }

        merge_events(Vec::new(), collected)
    }

    /// Candles needed: the lookback (or just the hours since the watermark)
    /// plus RSI warm-up, capped at the exchange page limit.
    fn fetch_limit(&self, days: u32, since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u32 {
        let hours = match since {
            Some(since) => (now - since).num_hours().max(0) as u32 + 2,
            None => days * 24,
        };
        (hours + self.period as u32 + 1).min(MAX_KLINE_LIMIT)
    }
}

/// Extract oversold events from an already-fetched hourly series.
///
/// An event is emitted per candle whose RSI is at or below the threshold and
/// whose close time falls inside the lookback window, strictly after `since`
/// when given.
pub fn events_from_candles(
    symbol: &str,
    candles: &[Candle],
    period: usize,
    threshold: f64,
    window_start: DateTime<Utc>,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<OversoldEvent>, IndicatorError> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let series = rsi_series(&closes, period)?;

    let mut events = Vec::new();
    for (i, candle) in candles.iter().enumerate() {
        let rsi = match series[i] {
            Some(v) => v,
            None => continue, // warm-up
        };
        if rsi > threshold || candle.close_time < window_start {
            continue;
        }
        if let Some(since) = since {
            if candle.close_time <= since {
                continue;
            }
        }

        events.push(OversoldEvent {
            symbol: symbol.to_string(),
            timestamp: candle.close_time,
            rsi,
            price: candle.close,
        });
    }

    Ok(events)
}

/// Merge two event collections: deduplicate by (symbol, timestamp), sort
/// newest-first. Merging the same increment twice is a no-op.
pub fn merge_events(existing: Vec<OversoldEvent>, new: Vec<OversoldEvent>) -> Vec<OversoldEvent> {
    let mut merged = existing;
    merged.extend(new);
    merged.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    merged.dedup_by(|a, b| a.symbol == b.symbol && a.timestamp == b.timestamp);
    merged
}
