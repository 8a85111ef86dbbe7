//! AIRAC cycle date arithmetic.

use chrono::NaiveDate;

/// Aeronautical data releases run on fixed 28-day cycles.
pub const CYCLE_LENGTH_DAYS: i64 = 28;

/// A known cycle effective date the 28-day grid is anchored on.
fn reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 25).unwrap()
}

/// The cycle effective on the given date.
pub fn current_cycle(today: NaiveDate) -> NaiveDate {
    let days = (today - reference_date()).num_days();
    let cycles = days.div_euclid(CYCLE_LENGTH_DAYS);
    reference_date() + chrono::Duration::days(cycles * CYCLE_LENGTH_DAYS)
}

/// The first cycle strictly after the given date.
pub fn next_cycle(today: NaiveDate) -> NaiveDate {
    current_cycle(today) + chrono::Duration::days(CYCLE_LENGTH_DAYS)
}
