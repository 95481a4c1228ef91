use crate::models::{BreakoutScan, BreakoutSignal, PendingBreakout, SignalOutcome};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Receives newly detected signals and setups.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify_signal(&self, signal: &BreakoutSignal);
    async fn notify_pending(&self, pending: &PendingBreakout);
    async fn notify_outcome(&self, signal: &BreakoutSignal);
}

/// Default sink, writes alerts to the log.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn notify_signal(&self, signal: &BreakoutSignal) {
        tracing::info!(
            "🚨 {} {:?} signal: entry {:.4}, stop {:.4}, target {:.4}",
            signal.symbol,
            signal.direction,
            signal.entry_price,
            signal.stop_loss,
            signal.take_profit
        );
    }

    async fn notify_pending(&self, pending: &PendingBreakout) {
        tracing::info!(
            "👀 {} broke {:?} the session range at {:.4}, waiting for re-entry (now {:.4}, {:+.2}% from range)",
            pending.symbol,
            pending.side,
            pending.breakout_price,
            pending.current_price,
            pending.distance_to_range() * 100.0
        );
    }

    async fn notify_outcome(&self, signal: &BreakoutSignal) {
        let emoji = match signal.outcome {
            SignalOutcome::Win => "✅",
            SignalOutcome::Loss => "❌",
            SignalOutcome::Pending => "⏳",
        };
        tracing::info!(
            "{} {} {:?} trade resolved: {:?} (entry {:.4})",
            emoji,
            signal.symbol,
            signal.direction,
            signal.outcome,
            signal.entry_price
        );
    }
}

/// Signals in `current` whose trade identity was not in `previous`.
pub fn diff_new_signals(
    previous: &[BreakoutSignal],
    current: &[BreakoutSignal],
) -> Vec<BreakoutSignal> {
    let seen: HashSet<_> = previous.iter().map(|s| s.identity()).collect();
    current
        .iter()
        .filter(|s| !seen.contains(&s.identity()))
        .cloned()
        .collect()
}

/// Pending setups in `current` that were not in `previous`.
pub fn diff_new_pending(
    previous: &[PendingBreakout],
    current: &[PendingBreakout],
) -> Vec<PendingBreakout> {
    let seen: HashSet<_> = previous.iter().map(|p| p.identity()).collect();
    current
        .iter()
        .filter(|p| !seen.contains(&p.identity()))
        .cloned()
        .collect()
}

/// Signals that were pending in `previous` and carry a resolution in
/// `current`.
pub fn diff_resolved(
    previous: &[BreakoutSignal],
    current: &[BreakoutSignal],
) -> Vec<BreakoutSignal> {
    let open_before: HashSet<_> = previous
        .iter()
        .filter(|s| s.outcome == SignalOutcome::Pending)
        .map(|s| s.identity())
        .collect();
    current
        .iter()
        .filter(|s| s.outcome != SignalOutcome::Pending && open_before.contains(&s.identity()))
        .cloned()
        .collect()
}

/// Publishes the delta between consecutive refreshes to a sink, so a signal
/// alerts once when it appears and once when it resolves.
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    last: Mutex<BreakoutScan>,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self {
            sink,
            last: Mutex::new(BreakoutScan::default()),
        }
    }

    /// Publish what changed since the previous refresh. The first call after
    /// startup announces the full current state once.
    pub async fn publish(&self, scan: &BreakoutScan) {
        let mut last = self.last.lock().await;

        for signal in diff_new_signals(&last.signals, &scan.signals) {
            self.sink.notify_signal(&signal).await;
        }
        for signal in diff_resolved(&last.signals, &scan.signals) {
            self.sink.notify_outcome(&signal).await;
        }
        for pending in diff_new_pending(&last.pending, &scan.pending) {
            self.sink.notify_pending(&pending).await;
        }

        *last = scan.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RangeSide, SessionRange, TradeDirection};
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use uuid::Uuid;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 12, minute, 0).unwrap()
    }

    fn signal(symbol: &str, reentry_min: u32, outcome: SignalOutcome) -> BreakoutSignal {
        BreakoutSignal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            range: SessionRange {
                date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
                high: 100.0,
                low: 95.0,
                open_time: Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap(),
                close_time: t(0) - Duration::milliseconds(1),
            },
            breakout_time: t(5),
            breakout_price: 102.0,
            breakout_side: RangeSide::Above,
            reentry_time: t(reentry_min),
            reentry_price: 98.0,
            direction: TradeDirection::Long,
            entry_price: 98.0,
            stop_loss: 97.02,
            take_profit: 99.96,
            outcome,
            resolved_time: None,
        }
    }

    fn pending(symbol: &str) -> PendingBreakout {
        PendingBreakout {
            symbol: symbol.to_string(),
            range: SessionRange {
                date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
                high: 100.0,
                low: 95.0,
                open_time: Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap(),
                close_time: t(0) - Duration::milliseconds(1),
            },
            breakout_time: t(40),
            breakout_price: 102.0,
            side: RangeSide::Above,
            direction: TradeDirection::Short,
            current_price: 101.0,
        }
    }

    #[test]
    fn test_diff_new_signals_by_identity() {
        let previous = vec![signal("BTCUSDT", 15, SignalOutcome::Pending)];
        let current = vec![
            signal("BTCUSDT", 15, SignalOutcome::Pending),
            signal("ETHUSDT", 20, SignalOutcome::Pending),
        ];

        let new = diff_new_signals(&previous, &current);
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].symbol, "ETHUSDT");
    }

    #[test]
    fn test_diff_ignores_regenerated_ids() {
        // Same trade, different uuid after a recompute
        let previous = vec![signal("BTCUSDT", 15, SignalOutcome::Pending)];
        let current = vec![signal("BTCUSDT", 15, SignalOutcome::Pending)];

        assert!(diff_new_signals(&previous, &current).is_empty());
    }

    #[test]
    fn test_diff_resolved_catches_transition() {
        let previous = vec![signal("BTCUSDT", 15, SignalOutcome::Pending)];
        let current = vec![signal("BTCUSDT", 15, SignalOutcome::Win)];

        let resolved = diff_resolved(&previous, &current);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].outcome, SignalOutcome::Win);

        // A signal that was already resolved does not alert again
        assert!(diff_resolved(&current, &current).is_empty());
    }

    struct RecordingSink {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn notify_signal(&self, signal: &BreakoutSignal) {
            self.calls
                .lock()
                .await
                .push(format!("signal:{}", signal.symbol));
        }

        async fn notify_pending(&self, pending: &PendingBreakout) {
            self.calls
                .lock()
                .await
                .push(format!("pending:{}", pending.symbol));
        }

        async fn notify_outcome(&self, signal: &BreakoutSignal) {
            self.calls
                .lock()
                .await
                .push(format!("outcome:{}", signal.symbol));
        }
    }

    #[tokio::test]
    async fn test_dispatcher_publishes_only_changes() {
        let sink = Arc::new(RecordingSink {
            calls: Mutex::new(Vec::new()),
        });
        let dispatcher = AlertDispatcher::new(sink.clone());

        let scan = BreakoutScan {
            signals: vec![signal("BTCUSDT", 15, SignalOutcome::Pending)],
            pending: vec![pending("ETHUSDT")],
        };

        dispatcher.publish(&scan).await;
        assert_eq!(
            *sink.calls.lock().await,
            vec!["signal:BTCUSDT".to_string(), "pending:ETHUSDT".to_string()]
        );

        // Unchanged refresh is silent
        dispatcher.publish(&scan).await;
        assert_eq!(sink.calls.lock().await.len(), 2);

        // Resolution alerts once, the vanished pending stays silent
        let next = BreakoutScan {
            signals: vec![signal("BTCUSDT", 15, SignalOutcome::Win)],
            pending: Vec::new(),
        };
        dispatcher.publish(&next).await;
        assert_eq!(
            sink.calls.lock().await.last(),
            Some(&"outcome:BTCUSDT".to_string())
        );
        assert_eq!(sink.calls.lock().await.len(), 3);
    }
}
