use common::Candle;

use super::atr::true_range;

/// Wilder's ADX over `period`. Returns the latest value, `None` when the
/// series is shorter than `2 * period + 1` bars.
pub fn last_adx(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);
    let mut tr = Vec::with_capacity(candles.len() - 1);

    for pair in candles.windows(2) {
        let up = pair[1].high - pair[0].high;
        let down = pair[0].low - pair[1].low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        tr.push(true_range(pair[0].close, &pair[1]));
    }

    // Wilder smoothing: seed with the sum of the first `period` values.
    let mut sm_plus: f64 = plus_dm[..period].iter().sum();
    let mut sm_minus: f64 = minus_dm[..period].iter().sum();
    let mut sm_tr: f64 = tr[..period].iter().sum();

    let mut dx_values = Vec::new();
    for i in period..tr.len() {
        sm_plus = sm_plus - sm_plus / period as f64 + plus_dm[i];
        sm_minus = sm_minus - sm_minus / period as f64 + minus_dm[i];
        sm_tr = sm_tr - sm_tr / period as f64 + tr[i];

        if sm_tr == 0.0 {
            dx_values.push(0.0);
            continue;
        }
        let plus_di = 100.0 * sm_plus / sm_tr;
        let minus_di = 100.0 * sm_minus / sm_tr;
        let di_sum = plus_di + minus_di;
        dx_values.push(if di_sum == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / di_sum
        });
    }

    if dx_values.len() < period {
        return None;
    }
    let mut adx: f64 = dx_values[..period].iter().sum::<f64>() / period as f64;
    for &dx in &dx_values[period..] {
        adx = (adx * (period - 1) as f64 + dx) / period as f64;
    }
    Some(adx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn bar(low: f64, high: f64, close: f64) -> Candle {
        Candle {
            open_time: DateTime::from_timestamp_millis(0).unwrap(),
            open: close,
            high,
            low,
            close,
            volume: 1.0,
            close_time: DateTime::from_timestamp_millis(1).unwrap(),
            quote_volume: 1.0,
            taker_buy_base: 0.5,
        }
    }

    #[test]
    fn steady_uptrend_has_high_adx() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                bar(base - 1.0, base + 1.0, base)
            })
            .collect();
        let adx = last_adx(&candles, 14).unwrap();
        assert!(adx > 40.0, "trending series should show strong ADX, got {adx}");
    }

    #[test]
    fn perfect_oscillation_has_low_adx() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = if i % 2 == 0 { 100.0 } else { 102.0 };
                bar(base - 1.0, base + 1.0, base)
            })
            .collect();
        let adx = last_adx(&candles, 14).unwrap();
        assert!(adx < 25.0, "choppy series should show weak ADX, got {adx}");
    }

    #[test]
    fn requires_enough_history() {
        let candles: Vec<Candle> = (0..20).map(|_| bar(99.0, 101.0, 100.0)).collect();
        assert!(last_adx(&candles, 14).is_none());
    }
}
