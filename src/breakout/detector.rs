use crate::api::{candle_window, closed_candles, MarketData, MAX_KLINE_LIMIT};
use crate::breakout::machine::{check_exit, pending_from_state, step, MachineState};
use crate::breakout::session::{session_ranges, SessionSpec};
use crate::models::{BreakoutScan, BreakoutSignal, Candle, Interval, SessionRange};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// An open bracket is abandoned if neither side is hit within a week.
const RESOLUTION_WINDOW_DAYS: i64 = 7;

/// Runs the breakout scan: session ranges from four-hour candles, the
/// re-entry machine over five-minute closes, then bracket resolution.
pub struct BreakoutDetector {
    source: Arc<dyn MarketData>,
    spec: SessionSpec,
    delay: std::time::Duration,
}

impl BreakoutDetector {
    pub fn new(source: Arc<dyn MarketData>, spec: SessionSpec, delay: std::time::Duration) -> Self {
        Self {
            source,
            spec,
            delay,
        }
    }

    /// Scan one symbol's recent sessions.
    ///
    /// The live price is fetched only when at least one breakout is still
    /// awaiting its re-entry, so a quiet symbol costs two candle requests.
    pub async fn scan(
        &self,
        symbol: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> anyhow::Result<BreakoutScan> {
        // Six 4h candles per day, plus slack for partial days at both ends
        let session_limit = (days * 6 + 8).min(MAX_KLINE_LIMIT);
        let four_hour = self
            .source
            .candles(symbol, Interval::FourHour, session_limit, None)
            .await
            .with_context(|| format!("fetching session candles for {}", symbol))?;
        let four_hour = closed_candles(four_hour, now);

        let window_start = now - Duration::days(days as i64);
        let ranges: Vec<SessionRange> = session_ranges(&four_hour, &self.spec)
            .into_iter()
            .filter(|r| r.close_time >= window_start)
            .collect();
        if ranges.is_empty() {
            return Ok(BreakoutScan::default());
        }

        // One five-minute fetch spans every range's scan day
        let five_min = candle_window(
            self.source.as_ref(),
            symbol,
            Interval::FiveMin,
            ranges[0].close_time,
            now,
        )
        .await
        .with_context(|| format!("fetching scan candles for {}", symbol))?;
        let five_min = closed_candles(five_min, now);

        let mut scan = BreakoutScan::default();
        let mut awaiting: Vec<(&SessionRange, MachineState)> = Vec::new();
        for range in &ranges {
            let (signals, state) = scan_range(symbol, range, &five_min);
            scan.signals.extend(signals);
            if let Some(state) = state {
                awaiting.push((range, state));
            }
        }

        if !awaiting.is_empty() {
            let price = self
                .source
                .price(symbol)
                .await
                .with_context(|| format!("fetching live price for {}", symbol))?;
            for (range, state) in awaiting {
                if let Some(pending) = pending_from_state(&state, range, symbol, price) {
                    scan.pending.push(pending);
                }
            }
        }

        Ok(scan)
    }

    /// Scan a batch sequentially with the configured inter-symbol delay.
    /// Per-symbol failures are logged and skipped; results are merged with
    /// signals newest-first.
    pub async fn scan_many(
        &self,
        symbols: &[String],
        days: u32,
        now: DateTime<Utc>,
    ) -> BreakoutScan {
        let mut combined = BreakoutScan::default();

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay).await;
            }

            match self.scan(symbol, days, now).await {
                Ok(scan) => {
                    tracing::debug!(
                        "{}: {} signals, {} pending",
                        symbol,
                        scan.signals.len(),
                        scan.pending.len()
                    );
                    combined.signals.extend(scan.signals);
                    combined.pending.extend(scan.pending);
                }
                Err(e) => {
                    tracing::error!("Breakout scan failed for {}: {:#}", symbol, e);
                }
            }
        }

        combined.signals.sort_by(|a, b| {
            b.reentry_time
                .cmp(&a.reentry_time)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        combined.pending.sort_by(|a, b| {
            a.symbol
                .cmp(&b.symbol)
                .then_with(|| b.breakout_time.cmp(&a.breakout_time))
        });
        combined
    }
}

/// Drive one range's machine over its scan day and resolve each signal.
///
/// The day window is the 24 hours after the range opens, exclusive of the
/// range candle itself. Resolution walks the uncut series so brackets can
/// close on a later calendar day, but scanning for further breakouts resumes
/// only with candles still inside the day window; an unresolved bracket ends
/// the range's scan.
fn scan_range(
    symbol: &str,
    range: &SessionRange,
    candles: &[Candle],
) -> (Vec<BreakoutSignal>, Option<MachineState>) {
    let day_end = range.open_time + Duration::hours(24);
    let day: Vec<usize> = candles
        .iter()
        .enumerate()
        .filter(|(_, c)| c.open_time > range.close_time && c.open_time < day_end)
        .map(|(i, _)| i)
        .collect();

    let mut signals = Vec::new();
    let mut state = MachineState::Scanning;
    let mut pos = 0;

    while pos < day.len() {
        let idx = day[pos];
        let (next, emitted) = step(state, range, symbol, &candles[idx]);
        state = next;
        pos += 1;

        if let Some(mut signal) = emitted {
            let deadline = signal.reentry_time + Duration::days(RESOLUTION_WINDOW_DAYS);
            let mut resume = None;

            for (j, c) in candles.iter().enumerate().skip(idx + 1) {
                if c.open_time >= deadline {
                    break;
                }
                if let Some(outcome) =
                    check_exit(signal.direction, signal.stop_loss, signal.take_profit, c)
                {
                    signal.outcome = outcome;
                    signal.resolved_time = Some(c.close_time);
                    resume = Some(j + 1);
                    break;
                }
            }
            signals.push(signal);

            match resume {
                Some(after) => {
                    pos = day.partition_point(|&i| i < after);
                }
                None => break,
            }
        }
    }

    let awaiting = match state {
        MachineState::AwaitingReentry { .. } => Some(state),
        MachineState::Scanning => None,
    };
    (signals, awaiting)
}

/// Merge signal sets by trade identity. The newer set wins on identity
/// collisions, which is how a pending outcome gets replaced by its
/// resolution on the next refresh. Sorted newest re-entry first.
pub fn merge_signals(
    existing: Vec<BreakoutSignal>,
    new: Vec<BreakoutSignal>,
) -> Vec<BreakoutSignal> {
    let mut merged = new;
    merged.extend(existing);
    merged.sort_by(|a, b| {
        b.reentry_time
            .cmp(&a.reentry_time)
            .then_with(|| a.symbol.cmp(&b.symbol))
            .then_with(|| b.breakout_time.cmp(&a.breakout_time))
    });
    merged.dedup_by(|a, b| a.identity() == b.identity());
    merged
}
