use crate::api::MarketData;
use crate::breakout::{merge_signals, BreakoutDetector, SessionSpec};
use crate::cache::{cache_key, read_entry, write_entry, CacheStore};
use crate::config::Settings;
use crate::error::CacheError;
use crate::models::{BreakoutScan, CacheEntry, Interval, OversoldEvent, RsiReading};
use crate::monitor::RsiMonitor;
use crate::oversold::{merge_events, OversoldScanner};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Entries untouched for this long are pruned when the store runs out of
/// room, regardless of their own TTL.
const MAX_ENTRY_AGE_HOURS: i64 = 24;

/// Candle-cadence freshness.
///
/// Cached data is current while no newer candle could exist: either the
/// newest cached data point is the most recently closed candle, or the entry
/// itself was written after the last interval boundary. Wall-clock age alone
/// does not matter; an entry written at 14:00:30 serves until 15:00 and not
/// a second longer.
pub fn is_fresh(
    stored_at: DateTime<Utc>,
    latest_data: Option<DateTime<Utc>>,
    interval: Interval,
    now: DateTime<Utc>,
) -> bool {
    let boundary = interval.floor(now);
    if stored_at >= boundary {
        return true;
    }
    // Close timestamps sit 1ms before the boundary, so a data point from the
    // newest closed candle satisfies t + interval > boundary.
    latest_data.is_some_and(|t| t + interval.duration() > boundary)
}

/// Facade over the three analytics pipelines with cache-first reads,
/// incremental fetches, and per-key request coalescing.
///
/// Every method is total: cache trouble degrades to a direct computation and
/// per-symbol fetch failures are skipped upstream, so the scheduler loops
/// never die on a bad refresh.
pub struct CachedAnalytics {
    monitor: RsiMonitor,
    oversold: OversoldScanner,
    breakout: BreakoutDetector,
    store: Arc<dyn CacheStore>,
    rsi_period: usize,
    oversold_threshold: f64,
    oversold_days: u32,
    breakout_days: u32,
    rsi_ttl_ms: u64,
    oversold_ttl_ms: u64,
    breakout_ttl_ms: u64,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CachedAnalytics {
    pub fn new(
        source: Arc<dyn MarketData>,
        store: Arc<dyn CacheStore>,
        settings: &Settings,
    ) -> Self {
        let monitor = RsiMonitor::new(
            source.clone(),
            settings.rsi_period,
            settings.rsi_ma_period,
            settings.inter_symbol_delay,
        );
        let oversold = OversoldScanner::new(
            source.clone(),
            settings.rsi_period,
            settings.oversold_threshold,
            settings.inter_symbol_delay,
        );
        let breakout = BreakoutDetector::new(
            source,
            SessionSpec::new(settings.session_start_hour, settings.session_tz_offset_hours),
            settings.inter_symbol_delay,
        );

        Self {
            monitor,
            oversold,
            breakout,
            store,
            rsi_period: settings.rsi_period,
            oversold_threshold: settings.oversold_threshold,
            oversold_days: settings.oversold_days,
            breakout_days: settings.breakout_days,
            rsi_ttl_ms: settings.rsi_ttl_ms,
            oversold_ttl_ms: settings.oversold_ttl_ms,
            breakout_ttl_ms: settings.breakout_ttl_ms,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Latest RSI snapshot for the watchlist, recomputed at most once per
    /// hourly candle. The snapshot replaces the cached one wholesale; there
    /// is nothing incremental about point-in-time readings.
    pub async fn rsi_readings(
        &self,
        symbols: &[String],
        now: DateTime<Utc>,
    ) -> Vec<RsiReading> {
        let key = cache_key("rsi", symbols, &[self.rsi_period.to_string()]);
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        let cached = self.read::<Vec<RsiReading>>(&key).await;
        if let Some(entry) = &cached {
            let latest = entry.data.iter().map(|r| r.timestamp).max();
            if !entry.is_expired(now) && is_fresh(entry.stored_at, latest, Interval::OneHour, now)
            {
                tracing::debug!("Cache hit for {}", key);
                return entry.data.clone();
            }
        }

        let readings = self.monitor.readings(symbols, now).await;

        // A refresh where every symbol failed should not clobber good data
        if readings.is_empty() && !symbols.is_empty() {
            if let Some(entry) = cached {
                tracing::warn!("RSI refresh produced nothing, serving stale {}", key);
                return entry.data;
            }
            return readings;
        }

        let entry = CacheEntry::new(readings.clone(), now, self.rsi_ttl_ms);
        self.persist(&key, &entry, now).await;
        readings
    }

    /// Oversold events over the lookback window, newest first.
    ///
    /// On a stale cache only candles newer than the newest cached event are
    /// fetched and the increment is merged in; events that have aged out of
    /// the window are dropped at the same time.
    pub async fn oversold_events(
        &self,
        symbols: &[String],
        now: DateTime<Utc>,
    ) -> Vec<OversoldEvent> {
        let key = cache_key(
            "oversold",
            symbols,
            &[
                self.oversold_days.to_string(),
                self.oversold_threshold.to_string(),
            ],
        );
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        let cached = self.read::<Vec<OversoldEvent>>(&key).await;
        if let Some(entry) = &cached {
            let latest = entry.data.iter().map(|e| e.timestamp).max();
            if !entry.is_expired(now) && is_fresh(entry.stored_at, latest, Interval::OneHour, now)
            {
                tracing::debug!("Cache hit for {}", key);
                return entry.data.clone();
            }
        }

        let (existing, since) = match cached {
            Some(entry) => {
                let since = entry.data.iter().map(|e| e.timestamp).max();
                (entry.data, since)
            }
            None => (Vec::new(), None),
        };

        let fresh = self
            .oversold
            .scan_many(symbols, self.oversold_days, since, now)
            .await;

        let window_start = now - Duration::days(self.oversold_days as i64);
        let mut merged = merge_events(existing, fresh);
        merged.retain(|e| e.timestamp >= window_start);

        let entry = CacheEntry::new(merged.clone(), now, self.oversold_ttl_ms);
        self.persist(&key, &entry, now).await;
        merged
    }

    /// Breakout signals and pending setups, recomputed at most once per
    /// five-minute candle.
    ///
    /// Signals merge by trade identity with the fresh scan winning, which
    /// carries resolutions into previously cached pendings. Pending setups
    /// are ephemeral and come from the fresh scan alone.
    pub async fn breakout_scan(&self, symbols: &[String], now: DateTime<Utc>) -> BreakoutScan {
        let key = cache_key("breakout", symbols, &[self.breakout_days.to_string()]);
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        let cached = self.read::<BreakoutScan>(&key).await;
        if let Some(entry) = &cached {
            if !entry.is_expired(now)
                && is_fresh(entry.stored_at, None, Interval::FiveMin, now)
            {
                tracing::debug!("Cache hit for {}", key);
                return entry.data.clone();
            }
        }

        let scan = self
            .breakout
            .scan_many(symbols, self.breakout_days, now)
            .await;

        let existing = cached.map(|entry| entry.data.signals).unwrap_or_default();
        let mut signals = merge_signals(existing, scan.signals);
        let window_start = now - Duration::days(self.breakout_days as i64);
        signals.retain(|s| s.reentry_time >= window_start);

        let result = BreakoutScan {
            signals,
            pending: scan.pending,
        };

        let entry = CacheEntry::new(result.clone(), now, self.breakout_ttl_ms);
        self.persist(&key, &entry, now).await;
        result
    }

    /// Serialize concurrent refreshes of one key: the loser blocks, then
    /// finds the winner's entry fresh and skips its own fetch.
    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().await;
        inflight.entry(key.to_string()).or_default().clone()
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        match read_entry::<T>(self.store.as_ref(), key).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Write through, pruning dead entries and retrying once on quota.
    /// Persistence is best effort; a second failure only logs.
    async fn persist<T: Serialize>(&self, key: &str, entry: &CacheEntry<T>, now: DateTime<Utc>) {
        match write_entry(self.store.as_ref(), key, entry).await {
            Ok(()) => {}
            Err(CacheError::QuotaExceeded) => {
                tracing::warn!("Cache quota hit writing {}, pruning old entries", key);
                self.prune_dead_entries(now).await;
                if let Err(e) = write_entry(self.store.as_ref(), key, entry).await {
                    tracing::warn!("Cache write failed after pruning for {}: {}", key, e);
                }
            }
            Err(e) => {
                tracing::warn!("Cache write failed for {}: {}", key, e);
            }
        }
    }

    async fn prune_dead_entries(&self, now: DateTime<Utc>) {
        let keys = match self.store.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Cache prune could not list keys: {}", e);
                return;
            }
        };

        let mut removed = 0usize;
        for key in keys {
            let raw = match self.store.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(_) => continue,
            };

            let dead = match serde_json::from_str::<EnvelopeProbe>(&raw) {
                Ok(probe) => {
                    let age = now - probe.stored_at;
                    age > Duration::hours(MAX_ENTRY_AGE_HOURS)
                        || (probe.ttl_ms > 0 && age > Duration::milliseconds(probe.ttl_ms as i64))
                }
                // Unreadable entries free up room too
                Err(_) => true,
            };

            if dead && self.store.remove(&key).await.is_ok() {
                removed += 1;
            }
        }

        tracing::info!("Pruned {} dead cache entries", removed);
    }
}

/// Minimal view of the envelope for pruning, so expiry can be judged
/// without decoding the payload type.
#[derive(Deserialize)]
struct EnvelopeProbe {
    stored_at: DateTime<Utc>,
    #[serde(default)]
    ttl_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::error::ExchangeError;
    use crate::models::Candle;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap()
    }

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, 0).unwrap()
    }

    #[test]
    fn test_is_fresh_within_candle() {
        // Stored at 14:00:30 with the 13:00-14:00 candle as newest data
        let stored = ts(14, 0) + Duration::seconds(30);
        let latest = ts(14, 0) - Duration::milliseconds(1);

        assert!(is_fresh(stored, Some(latest), Interval::OneHour, ts(14, 45)));
        assert!(!is_fresh(
            stored,
            Some(latest),
            Interval::OneHour,
            ts(15, 1)
        ));
    }

    #[test]
    fn test_is_fresh_data_leg_alone() {
        // Old write, but the data itself covers the newest closed candle
        let stored = ts(13, 0);
        let latest = ts(15, 0) - Duration::milliseconds(1);

        assert!(is_fresh(
            stored,
            Some(latest),
            Interval::OneHour,
            ts(15, 30)
        ));
        // The candle before that is not enough
        let older = ts(14, 0) - Duration::milliseconds(1);
        assert!(!is_fresh(stored, Some(older), Interval::OneHour, ts(15, 30)));
    }

    #[test]
    fn test_is_fresh_without_data_timestamps() {
        assert!(is_fresh(ts(14, 2), None, Interval::FiveMin, ts(14, 4)));
        assert!(!is_fresh(ts(14, 2), None, Interval::FiveMin, ts(14, 6)));
    }

    /// Hourly closes ending at the newest closed candle before `now`, with a
    /// steep slide into the newest candles so oversold events exist.
    fn hourly_series(now: DateTime<Utc>, count: usize) -> Vec<Candle> {
        let newest_open = Interval::OneHour.floor(now) - Duration::hours(1);
        (0..count)
            .rev()
            .map(|i| {
                let open_time = newest_open - Duration::hours(i as i64);
                let close = if i < 8 {
                    100.0 - (8 - i) as f64 * 3.0
                } else {
                    100.0 + (i % 5) as f64
                };
                Candle {
                    open_time,
                    close_time: open_time + Duration::hours(1) - Duration::milliseconds(1),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 500.0,
                }
            })
            .collect()
    }

    struct CountingMarket {
        latest: DateTime<Utc>,
        candle_calls: AtomicUsize,
        fetch_delay: std::time::Duration,
    }

    impl CountingMarket {
        fn new(latest: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                latest,
                candle_calls: AtomicUsize::new(0),
                fetch_delay: std::time::Duration::from_millis(0),
            })
        }

        fn slow(latest: DateTime<Utc>, delay: std::time::Duration) -> Arc<Self> {
            Arc::new(Self {
                latest,
                candle_calls: AtomicUsize::new(0),
                fetch_delay: delay,
            })
        }
    }

    #[async_trait::async_trait]
    impl MarketData for CountingMarket {
        async fn candles(
            &self,
            _symbol: &str,
            _interval: Interval,
            limit: u32,
            _end_time: Option<DateTime<Utc>>,
        ) -> Result<Vec<Candle>, ExchangeError> {
            self.candle_calls.fetch_add(1, Ordering::SeqCst);
            if !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            Ok(hourly_series(self.latest, (limit as usize).min(48)))
        }

        async fn price(&self, _symbol: &str) -> Result<f64, ExchangeError> {
            Ok(100.0)
        }
    }

    fn analytics(market: Arc<CountingMarket>, store: Arc<dyn CacheStore>) -> CachedAnalytics {
        let mut settings = Settings::default();
        settings.inter_symbol_delay = std::time::Duration::from_millis(0);
        CachedAnalytics::new(market, store, &settings)
    }

    #[tokio::test]
    async fn test_rsi_cached_within_hour_and_refetched_after() {
        let market = CountingMarket::new(now0());
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let analytics = analytics(market.clone(), store);
        let symbols = vec!["BTCUSDT".to_string()];

        let first = analytics.rsi_readings(&symbols, now0()).await;
        assert_eq!(first.len(), 1);
        assert_eq!(market.candle_calls.load(Ordering::SeqCst), 1);

        // Same candle, later wall clock: served from cache
        let second = analytics
            .rsi_readings(&symbols, now0() + Duration::minutes(20))
            .await;
        assert_eq!(second.len(), 1);
        assert_eq!(market.candle_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first[0].timestamp, second[0].timestamp);

        // Past the next boundary the cache is stale
        let _ = analytics
            .rsi_readings(&symbols, now0() + Duration::hours(1))
            .await;
        assert_eq!(market.candle_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_coalesce() {
        let market = CountingMarket::slow(now0(), std::time::Duration::from_millis(30));
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let analytics = analytics(market.clone(), store);
        let symbols = vec!["BTCUSDT".to_string()];

        let (a, b) = tokio::join!(
            analytics.rsi_readings(&symbols, now0()),
            analytics.rsi_readings(&symbols, now0()),
        );

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        // The second caller waited on the key lock and hit the cache
        assert_eq!(market.candle_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oversold_incremental_merge_is_stable() {
        let market = CountingMarket::new(now0());
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let analytics = analytics(market.clone(), store);
        let symbols = vec!["BTCUSDT".to_string()];

        let first = analytics.oversold_events(&symbols, now0()).await;
        assert!(!first.is_empty());
        assert_eq!(market.candle_calls.load(Ordering::SeqCst), 1);

        // Next hourly boundary: incremental fetch, but the same history must
        // not duplicate events
        let second = analytics
            .oversold_events(&symbols, now0() + Duration::hours(1))
            .await;
        assert_eq!(market.candle_calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.len(), second.len());
    }

    #[tokio::test]
    async fn test_quota_prunes_dead_entries_and_retries() {
        let market = CountingMarket::new(now0());
        let store = Arc::new(MemoryStore::with_capacity_limit(2));
        let ancient = now0() - Duration::hours(30);
        write_entry(
            store.as_ref(),
            "old_a",
            &CacheEntry::new(vec![1u32], ancient, 1000),
        )
        .await
        .unwrap();
        write_entry(
            store.as_ref(),
            "old_b",
            &CacheEntry::new(vec![2u32], ancient, 1000),
        )
        .await
        .unwrap();

        let analytics = analytics(market, store.clone());
        let symbols = vec!["BTCUSDT".to_string()];
        let readings = analytics.rsi_readings(&symbols, now0()).await;
        assert_eq!(readings.len(), 1);

        // Both stale entries were pruned and the fresh write landed
        assert!(store.get("old_a").await.unwrap().is_none());
        assert!(store.get("old_b").await.unwrap().is_none());
        let key = cache_key("rsi", &symbols, &["14".to_string()]);
        assert!(store.get(&key).await.unwrap().is_some());
    }
}
