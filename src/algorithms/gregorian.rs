use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};

use crate::error::PeermitError;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 3_600_000;

/// Resolve a gregorian interval code to the next calendar boundary (UTC).
///
/// Codes: 0 minutes, 1 hours, 2 days, 3 weeks (Monday start), 4 months,
/// 5 years. The returned epoch milliseconds are strictly after `now_ms`, so
/// a counter created now always has a positive window.
pub(crate) fn next_boundary_ms(code: i64, now_ms: i64) -> Result<i64, PeermitError> {
    match code {
        0 => return Ok(now_ms.div_euclid(MINUTE_MS) * MINUTE_MS + MINUTE_MS),
        1 => return Ok(now_ms.div_euclid(HOUR_MS) * HOUR_MS + HOUR_MS),
        _ => {}
    }

    let date = DateTime::<Utc>::from_timestamp_millis(now_ms)
        .ok_or_else(|| {
            PeermitError::InvalidArgument("request time is outside the representable range".into())
        })?
        .date_naive();

    let boundary = match code {
        2 => date.succ_opt(),
        3 => {
            let days_to_monday = 7 - u64::from(date.weekday().num_days_from_monday());
            date.checked_add_days(Days::new(days_to_monday))
        }
        4 => date
            .with_day(1)
            .and_then(|first| first.checked_add_months(Months::new(1))),
        5 => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1),
        _ => {
            return Err(PeermitError::InvalidArgument(format!(
                "invalid gregorian interval {code}"
            )));
        }
    };

    let boundary = boundary.ok_or_else(|| {
        PeermitError::InvalidArgument("gregorian boundary is outside the representable range".into())
    })?;

    Ok(boundary
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time of day")
        .and_utc()
        .timestamp_millis())
}
