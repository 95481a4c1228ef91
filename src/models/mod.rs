use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Candle interval supported by the exchange endpoints we use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    FiveMin,
    OneHour,
    FourHour,
}

impl Interval {
    /// Interval string as the exchange expects it in query params
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::FiveMin => "5m",
            Interval::OneHour => "1h",
            Interval::FourHour => "4h",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Interval::FiveMin => Duration::minutes(5),
            Interval::OneHour => Duration::hours(1),
            Interval::FourHour => Duration::hours(4),
        }
    }

    /// Floor a timestamp to the most recent interval boundary.
    ///
    /// Exchange candles are aligned to the Unix epoch, so the boundary for
    /// e.g. 1h at 14:45 is 14:00, and the candle closing at that boundary is
    /// the most recently closed one.
    pub fn floor(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.duration().num_seconds();
        let floored = t.timestamp() - t.timestamp().rem_euclid(secs);
        DateTime::from_timestamp(floored, 0).unwrap_or(t)
    }
}

/// One OHLCV candle. Immutable once fetched.
///
/// A series is valid only when sorted ascending by `close_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Whether the candle has finished forming.
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        self.close_time <= now
    }
}

/// Per-symbol oscillator snapshot from the latest refresh.
///
/// `timestamp` is the close time of the most recently closed candle; the
/// `previous_*` fields describe the candle before it. `rsi` is `None` for a
/// symbol whose history is still inside the warm-up window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsiReading {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub rsi: Option<f64>,
    pub rsi_moving_average: Option<f64>,
    pub previous_timestamp: Option<DateTime<Utc>>,
    pub previous_price: Option<f64>,
    pub previous_rsi: Option<f64>,
    pub previous_rsi_moving_average: Option<f64>,
    /// Set when the latest candle is older than the freshness horizon
    pub is_stale: bool,
}

/// A historical sample where RSI fell to or below the configured threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OversoldEvent {
    pub symbol: String,
    /// Close time of the candle that produced the reading
    pub timestamp: DateTime<Utc>,
    pub rsi: f64,
    pub price: f64,
}

/// High/low of the daily detection window, used as the breakout reference.
///
/// `date` is the calendar day in the session's reference timezone, not UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRange {
    pub date: NaiveDate,
    pub high: f64,
    pub low: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
}

impl SessionRange {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }

    pub fn span(&self) -> f64 {
        self.high - self.low
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDirection {
    Long,
    Short,
}

/// Which side of the session range a breakout close landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeSide {
    Above,
    Below,
}

impl RangeSide {
    /// Direction a trade would take if price re-enters from this side.
    /// A close above the range re-enters downward (short), below upward (long).
    pub fn implied_direction(&self) -> TradeDirection {
        match self {
            RangeSide::Above => TradeDirection::Short,
            RangeSide::Below => TradeDirection::Long,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalOutcome {
    Pending,
    Win,
    Loss,
}

/// A completed breakout/re-entry pair with its risk bracket.
///
/// Created only once both the breakout and the re-entry close are observed.
/// `outcome` transitions from `Pending` to `Win`/`Loss` exactly once; the
/// signal is terminal after that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutSignal {
    pub id: Uuid,
    pub symbol: String,
    pub range: SessionRange,
    pub breakout_time: DateTime<Utc>,
    pub breakout_price: f64,
    pub breakout_side: RangeSide,
    pub reentry_time: DateTime<Utc>,
    pub reentry_price: f64,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub outcome: SignalOutcome,
    pub resolved_time: Option<DateTime<Utc>>,
}

impl BreakoutSignal {
    /// Stable identity for dedup and refresh diffing. The id is regenerated
    /// on every recompute, so equality goes by the trade itself.
    pub fn identity(&self) -> (String, DateTime<Utc>, DateTime<Utc>) {
        (self.symbol.clone(), self.breakout_time, self.reentry_time)
    }
}

/// A breakout still waiting for its re-entry close.
///
/// Ephemeral: recomputed on every refresh with a live price snapshot, never
/// persisted as a signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingBreakout {
    pub symbol: String,
    pub range: SessionRange,
    pub breakout_time: DateTime<Utc>,
    pub breakout_price: f64,
    pub side: RangeSide,
    pub direction: TradeDirection,
    pub current_price: f64,
}

impl PendingBreakout {
    pub fn identity(&self) -> (String, DateTime<Utc>) {
        (self.symbol.clone(), self.breakout_time)
    }

    /// Distance from the current price back to the range boundary the
    /// re-entry would cross, as a fraction of the boundary price.
    pub fn distance_to_range(&self) -> f64 {
        let boundary = match self.side {
            RangeSide::Above => self.range.high,
            RangeSide::Below => self.range.low,
        };
        (self.current_price - boundary) / boundary
    }
}

/// Result of one breakout scan: resolved/open signals plus breakouts that
/// never re-entered. Always both fields, even when empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakoutScan {
    pub signals: Vec<BreakoutSignal>,
    pub pending: Vec<PendingBreakout>,
}

/// JSON envelope persisted around every cached collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub stored_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, stored_at: DateTime<Utc>, ttl_ms: u64) -> Self {
        Self {
            data,
            stored_at,
            ttl_ms,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.stored_at > Duration::milliseconds(self.ttl_ms as i64)
    }
}
