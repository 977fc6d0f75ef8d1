//! Points awarded for an answer. Pure functions, identical on every caller.

use std::time::Duration;

/// Points for a correct answer given instantly.
pub const MAX_POINTS: f64 = 1000.0;

/// Points for `time_spent_secs` out of `time_limit_secs`.
///
/// Incorrect answers score 0. Correct ones score between 500 (at or past the
/// limit) and 1000 (instant). A limit below one second is treated as one
/// second and the time spent is clamped to `[0, limit]`.
pub fn score(time_limit_secs: f64, time_spent_secs: f64, is_correct: bool) -> i64 {
    if !is_correct {
        return 0;
    }

    let limit = if time_limit_secs.is_finite() {
        time_limit_secs.max(1.0)
    } else {
        1.0
    };
    let spent = clamp_time_spent(time_spent_secs, limit);
    let bonus = ((limit - spent) / limit).max(0.0);

    (MAX_POINTS * (0.5 + 0.5 * bonus)).round() as i64
}

/// Clamp a time to `[0, limit]`; non-finite values count as the full limit.
pub fn clamp_time_spent(time_spent_secs: f64, limit_secs: f64) -> f64 {
    if time_spent_secs.is_nan() {
        return limit_secs;
    }
    time_spent_secs.clamp(0.0, limit_secs)
}

/// Time a submission is charged with.
///
/// The client's claim is only trusted upwards: the server-measured elapsed
/// time minus a latency allowance is a floor, so a player cannot report an
/// answer faster than the server saw it.
pub fn effective_time_spent(
    claimed_secs: f64,
    server_elapsed: Duration,
    latency_allowance: Duration,
    limit_secs: f64,
) -> f64 {
    let floor = server_elapsed.saturating_sub(latency_allowance).as_secs_f64();
    clamp_time_spent(claimed_secs.max(floor), limit_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_values() {
        assert_eq!(score(30.0, 0.0, true), 1000);
        assert_eq!(score(30.0, 30.0, true), 500);
        assert_eq!(score(30.0, 15.0, true), 750);
        assert_eq!(score(30.0, 10.0, false), 0);
        assert_eq!(score(20.0, 5.0, true), 875);
    }

    #[test]
    fn out_of_range_times_are_clamped() {
        assert_eq!(score(30.0, 999.0, true), 500);
        assert_eq!(score(30.0, -5.0, true), 1000);
        assert_eq!(score(30.0, f64::INFINITY, true), 500);
    }

    #[test]
    fn degenerate_limits_do_not_divide_by_zero() {
        assert_eq!(score(0.0, 0.0, true), 1000);
        assert_eq!(score(-3.0, 0.5, true), 750);
        assert_eq!(score(f64::NAN, 0.0, true), 1000);
    }

    #[test]
    fn claims_faster_than_the_server_clock_are_raised() {
        let spent = effective_time_spent(
            1.0,
            Duration::from_secs(10),
            Duration::from_millis(1500),
            20.0,
        );
        assert!((spent - 8.5).abs() < 1e-9);

        let honest = effective_time_spent(5.0, Duration::from_millis(5200), Duration::from_millis(1500), 20.0);
        assert!((honest - 5.0).abs() < 1e-9);
    }
}
