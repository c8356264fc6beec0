use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};

use common::Timeframe;

/// Instant of the next cycle: the next close of the fastest traded
/// timeframe plus the settle delay, so the exchange has finalized the
/// bar before we fetch it.
pub fn next_cycle_time(now: DateTime<Utc>, settle: Duration) -> DateTime<Utc> {
    let tf = Timeframe::M15;
    let current_open = tf.align(now);
    let next_boundary = current_open + tf.duration();
    next_boundary + chrono::Duration::from_std(settle).unwrap_or_default()
}

/// Boundary of the cycle that `now` belongs to: the most recent close of
/// the fastest timeframe.
pub fn cycle_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    Timeframe::M15.align(now)
}

/// Timeframes whose candle closed exactly at `boundary`. 15m closes on
/// every boundary; the slower frames only on their own grid.
pub fn timeframes_closing_at(boundary: DateTime<Utc>) -> Vec<Timeframe> {
    let mut out = vec![Timeframe::M15];
    if boundary.minute() == 0 {
        out.push(Timeframe::H1);
        if boundary.hour() % 4 == 0 {
            out.push(Timeframe::H4);
        }
        if boundary.hour() == 0 {
            out.push(Timeframe::D1);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, s).unwrap()
    }

    #[test]
    fn next_cycle_lands_after_the_quarter_hour_plus_settle() {
        let now = at(10, 7, 12);
        let next = next_cycle_time(now, Duration::from_secs(31));
        assert_eq!(next, at(10, 15, 31));

        // Just after a boundary, the next cycle is the following one.
        let now = at(10, 15, 2);
        let next = next_cycle_time(now, Duration::from_secs(31));
        assert_eq!(next, at(10, 30, 31));
    }

    #[test]
    fn quarter_hours_refresh_only_15m() {
        let tfs = timeframes_closing_at(at(10, 15, 0));
        assert_eq!(tfs, vec![Timeframe::M15]);
    }

    #[test]
    fn top_of_hour_adds_1h() {
        let tfs = timeframes_closing_at(at(10, 0, 0));
        assert_eq!(tfs, vec![Timeframe::M15, Timeframe::H1]);
    }

    #[test]
    fn four_hour_grid_adds_4h() {
        let tfs = timeframes_closing_at(at(8, 0, 0));
        assert_eq!(tfs, vec![Timeframe::M15, Timeframe::H1, Timeframe::H4]);
    }

    #[test]
    fn midnight_adds_the_daily() {
        let tfs = timeframes_closing_at(at(0, 0, 0));
        assert_eq!(
            tfs,
            vec![Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1]
        );
    }
}
