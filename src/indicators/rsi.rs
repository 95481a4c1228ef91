use crate::error::IndicatorError;

/// Calculate a Relative Strength Index series using Wilder's smoothing (RMA).
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// The output is index-aligned with the input: the first `period` entries are
/// `None` (warm-up), every later entry is `Some` in `[0, 100]`. The first
/// value seeds from a simple mean of the first `period` gains/losses, then
/// each subsequent average rolls forward as
/// `avg = (avg * (period - 1) + change) / period`.
///
/// A series with no losses yields 100 (maximum strength), mirroring the
/// standard Wilder convention.
pub fn rsi_series(prices: &[f64], period: usize) -> Result<Vec<Option<f64>>, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod);
    }
    if prices.len() < period + 1 {
        return Err(IndicatorError::InsufficientData {
            got: prices.len(),
            need: period + 1,
        });
    }

    let mut series = vec![None; prices.len()];

    // Seed averages from the first `period` deltas
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += change.abs();
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    series[period] = Some(rsi_value(avg_gain, avg_loss));

    // Wilder recurrence for the rest of the series
    for i in (period + 1)..prices.len() {
        let change = prices[i] - prices[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, change.abs())
        };

        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;

        series[i] = Some(rsi_value(avg_gain, avg_loss));
    }

    Ok(series)
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }

    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Simple mean over the last `ma_period` non-null values of an RSI series.
///
/// Returns `None` until `ma_period` non-null values exist.
pub fn rsi_moving_average(series: &[Option<f64>], ma_period: usize) -> Option<f64> {
    if ma_period == 0 {
        return None;
    }

    let values: Vec<f64> = series
        .iter()
        .rev()
        .filter_map(|v| *v)
        .take(ma_period)
        .collect();

    if values.len() < ma_period {
        return None;
    }

    Some(values.iter().sum::<f64>() / ma_period as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 15 closed prices, 14 deltas: total gains 3.8, total losses 3.3
    fn reference_prices() -> Vec<f64> {
        vec![
            44.0, 44.3, 44.1, 44.6, 43.6, 44.3, 44.8, 43.7, 44.0, 44.9, 45.1, 45.5, 45.1, 44.8,
            44.5,
        ]
    }

    #[test]
    fn test_warmup_nulls_then_bounded_values() {
        let series = rsi_series(&reference_prices(), 14).unwrap();

        assert_eq!(series.len(), 15);
        assert!(series[..14].iter().all(|v| v.is_none()));

        let value = series[14].unwrap();
        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn test_seed_value_matches_formula() {
        // avg_gain = 3.8/14, avg_loss = 3.3/14
        // RSI = 100 - 100 / (1 + 3.8/3.3) = 100 * 3.8 / 7.1
        let series = rsi_series(&reference_prices(), 14).unwrap();
        let expected = 100.0 * 3.8 / 7.1;

        assert!((series[14].unwrap() - expected).abs() < 1e-9);
        assert!((series[14].unwrap() - 53.52).abs() < 0.01);
    }

    #[test]
    fn test_wilder_recurrence_continues_series() {
        let mut prices = reference_prices();
        prices.push(44.9); // +0.4 gain

        let series = rsi_series(&prices, 14).unwrap();

        // avg_gain = (3.8/14 * 13 + 0.4) / 14, avg_loss = (3.3/14 * 13) / 14
        assert!((series[15].unwrap() - 56.18).abs() < 0.01);
    }

    #[test]
    fn test_insufficient_data() {
        let prices = vec![100.0, 102.0, 101.0];
        let err = rsi_series(&prices, 14).unwrap_err();
        assert_eq!(err, IndicatorError::InsufficientData { got: 3, need: 15 });
    }

    #[test]
    fn test_invalid_period() {
        let prices = vec![100.0, 101.0];
        assert_eq!(rsi_series(&prices, 0).unwrap_err(), IndicatorError::InvalidPeriod);
    }

    #[test]
    fn test_all_gains_is_100() {
        let prices = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0, 106.0];
        let series = rsi_series(&prices, 5).unwrap();

        assert_eq!(series[5], Some(100.0));
        assert_eq!(series[6], Some(100.0));
    }

    #[test]
    fn test_all_losses_is_0() {
        let prices = vec![106.0, 105.0, 104.0, 103.0, 102.0, 101.0];
        let series = rsi_series(&prices, 5).unwrap();

        assert!(series[5].unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_pure_function_same_output() {
        let prices = reference_prices();
        let first = rsi_series(&prices, 14).unwrap();
        let second = rsi_series(&prices, 14).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_moving_average_skips_nulls() {
        let series = vec![None, None, Some(30.0), Some(40.0), Some(50.0)];

        assert_eq!(rsi_moving_average(&series, 2), Some(45.0));
        assert_eq!(rsi_moving_average(&series, 3), Some(40.0));
        assert_eq!(rsi_moving_average(&series, 4), None);
        assert_eq!(rsi_moving_average(&series, 0), None);
    }
}
