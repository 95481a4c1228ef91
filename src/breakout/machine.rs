use crate::models::{
    BreakoutSignal, Candle, PendingBreakout, RangeSide, SessionRange, SignalOutcome,
    TradeDirection,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Risk per signal is capped at 1% of the entry price.
const MAX_RISK_FRACTION: f64 = 0.01;

/// Scan state for one session range.
///
/// Only closes move the machine; wicks beyond the range while scanning do
/// not count as breakouts, and wicks back inside while awaiting do not count
/// as re-entries. Wicks do feed the excursion extremes, which set the risk
/// distance once a re-entry completes.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineState {
    /// Watching for the first close strictly outside the range.
    Scanning,
    /// Breakout seen, waiting for the first close back inside.
    AwaitingReentry {
        breakout_time: DateTime<Utc>,
        breakout_price: f64,
        side: RangeSide,
        /// Lowest low from the breakout candle onward, re-entry inclusive
        lowest_low: f64,
        /// Highest high from the breakout candle onward, re-entry inclusive
        highest_high: f64,
        prev_close: f64,
    },
}

/// Advance the machine by one closed candle.
///
/// Emits a signal exactly when the candle is the re-entry close; the machine
/// then returns to `Scanning` so a later breakout of the same range can form
/// another signal.
pub fn step(
    state: MachineState,
    range: &SessionRange,
    symbol: &str,
    candle: &Candle,
) -> (MachineState, Option<BreakoutSignal>) {
    match state {
        MachineState::Scanning => {
            let side = if candle.close > range.high {
                RangeSide::Above
            } else if candle.close < range.low {
                RangeSide::Below
            } else {
                return (MachineState::Scanning, None);
            };

            (
                MachineState::AwaitingReentry {
                    breakout_time: candle.close_time,
                    breakout_price: candle.close,
                    side,
                    lowest_low: candle.low,
                    highest_high: candle.high,
                    prev_close: candle.close,
                },
                None,
            )
        }
        MachineState::AwaitingReentry {
            breakout_time,
            breakout_price,
            side,
            lowest_low,
            highest_high,
            prev_close,
        } => {
            let lowest_low = lowest_low.min(candle.low);
            let highest_high = highest_high.max(candle.high);

            if !range.contains(candle.close) {
                // Still outside. A close on the far side of the range does
                // not restart the breakout; the original one stands.
                return (
                    MachineState::AwaitingReentry {
                        breakout_time,
                        breakout_price,
                        side,
                        lowest_low,
                        highest_high,
                        prev_close: candle.close,
                    },
                    None,
                );
            }

            // Direction follows the side price came back from: below the
            // range means an upward re-entry (long), above means short.
            let direction = if candle.low < range.low || prev_close < range.low {
                TradeDirection::Long
            } else if candle.high > range.high || prev_close > range.high {
                TradeDirection::Short
            } else {
                side.implied_direction()
            };

            let entry_price = candle.close;
            let adverse = match direction {
                TradeDirection::Long => entry_price - lowest_low,
                TradeDirection::Short => highest_high - entry_price,
            };
            let risk = adverse.min(entry_price * MAX_RISK_FRACTION);

            let (stop_loss, take_profit) = match direction {
                TradeDirection::Long => (entry_price - risk, entry_price + 2.0 * risk),
                TradeDirection::Short => (entry_price + risk, entry_price - 2.0 * risk),
            };

            let signal = BreakoutSignal {
                id: Uuid::new_v4(),
                symbol: symbol.to_string(),
                range: range.clone(),
                breakout_time,
                breakout_price,
                breakout_side: side,
                reentry_time: candle.close_time,
                reentry_price: candle.close,
                direction,
                entry_price,
                stop_loss,
                take_profit,
                outcome: SignalOutcome::Pending,
                resolved_time: None,
            };

            (MachineState::Scanning, Some(signal))
        }
    }
}

/// Test one candle against an open signal's bracket.
///
/// The stop is checked before the target: a candle whose wicks touch both is
/// a loss, since there is no way to know intra-candle ordering.
pub fn check_exit(
    direction: TradeDirection,
    stop_loss: f64,
    take_profit: f64,
    candle: &Candle,
) -> Option<SignalOutcome> {
    match direction {
        TradeDirection::Long => {
            if candle.low <= stop_loss {
                Some(SignalOutcome::Loss)
            } else if candle.high >= take_profit {
                Some(SignalOutcome::Win)
            } else {
                None
            }
        }
        TradeDirection::Short => {
            if candle.high >= stop_loss {
                Some(SignalOutcome::Loss)
            } else if candle.low <= take_profit {
                Some(SignalOutcome::Win)
            } else {
                None
            }
        }
    }
}

/// Snapshot an unfinished breakout as a pending setup.
pub fn pending_from_state(
    state: &MachineState,
    range: &SessionRange,
    symbol: &str,
    current_price: f64,
) -> Option<PendingBreakout> {
    match state {
        MachineState::AwaitingReentry {
            breakout_time,
            breakout_price,
            side,
            ..
        } => Some(PendingBreakout {
            symbol: symbol.to_string(),
            range: range.clone(),
            breakout_time: *breakout_time,
            breakout_price: *breakout_price,
            side: *side,
            direction: side.implied_direction(),
            current_price,
        }),
        MachineState::Scanning => None,
    }
}
