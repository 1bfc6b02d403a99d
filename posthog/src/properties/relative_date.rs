use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static RELATIVE_DATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?(?P<number>[0-9]+)(?P<interval>[hdwmy])$").expect("Invalid regex pattern")
});

/// Parse a relative date string like "-30d" or "-12h" against the supplied
/// anchor time. Hours, days and weeks subtract fixed durations; months and
/// years walk the calendar so that "-1m" from March 31st lands on the last
/// day of February, matching the behavior of the other PostHog SDKs.
///
/// Returns None for anything that doesn't match the `-<N><unit>` shape or
/// where N is large enough to risk overflow.
pub fn parse_relative_date(date_str: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let captures = RELATIVE_DATE_REGEX.captures(date_str)?;

    let number: i64 = captures.name("number")?.as_str().parse().ok()?;
    if number >= 10_000 {
        // Guard against overflow, disallow numbers greater than 10_000
        return None;
    }

    let interval = captures.name("interval")?.as_str();

    match interval {
        "h" => Some(now - Duration::hours(number)),
        "d" => Some(now - Duration::days(number)),
        "w" => Some(now - Duration::weeks(number)),
        "m" => {
            let mut result = now;
            for _ in 0..number {
                let day = result.day();
                let month = result.month();
                let year = result.year();

                let (prev_year, prev_month) = if month == 1 {
                    (year - 1, 12)
                } else {
                    (year, month - 1)
                };

                // Clamp to the last day of the previous month
                let last_day = if prev_month == 2 {
                    if is_leap_year(prev_year) {
                        29
                    } else {
                        28
                    }
                } else if [4, 6, 9, 11].contains(&prev_month) {
                    30
                } else {
                    31
                };

                let new_day = day.min(last_day);
                result = Utc
                    .with_ymd_and_hms(
                        prev_year,
                        prev_month,
                        new_day,
                        result.hour(),
                        result.minute(),
                        result.second(),
                    )
                    .single()?
                    .with_nanosecond(result.nanosecond())?;
            }
            Some(result)
        }
        "y" => {
            let mut result = now;
            for _ in 0..number {
                let year = result.year() - 1;
                let month = result.month();
                let day = result.day();

                // February 29th only exists in leap years
                let new_day = if month == 2 && day == 29 && !is_leap_year(year) {
                    28
                } else {
                    day
                };

                result = Utc
                    .with_ymd_and_hms(
                        year,
                        month,
                        new_day,
                        result.hour(),
                        result.minute(),
                        result.second(),
                    )
                    .single()?
                    .with_nanosecond(result.nanosecond())?;
            }
            Some(result)
        }
        _ => None,
    }
}

fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}
