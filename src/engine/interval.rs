use chrono::{Days, NaiveDate};

use crate::limits::{MAX_QUERY_WINDOW_DAYS, MAX_VALID_DATE, MIN_VALID_DATE};
use crate::model::DateRange;

use super::error::{InvalidRange, QueryError};

/// Validate a stay for admission against `today`.
///
/// `grace_days` lets a check-in that many days before today through; 0 still
/// allows same-day check-in.
pub fn validate_range(
    range: &DateRange,
    today: NaiveDate,
    grace_days: u32,
    max_nights: i64,
) -> Result<(), InvalidRange> {
    validate_shape(range)?;
    let earliest = today
        .checked_sub_days(Days::new(grace_days.into()))
        .unwrap_or(MIN_VALID_DATE);
    if range.start < earliest {
        return Err(InvalidRange::InPast {
            start: range.start,
            earliest,
        });
    }
    let nights = range.nights();
    if nights > max_nights {
        return Err(InvalidRange::TooLong {
            nights,
            max: max_nights,
        });
    }
    Ok(())
}

/// Ordering and calendar bounds only.
pub fn validate_shape(range: &DateRange) -> Result<(), InvalidRange> {
    if range.start >= range.end {
        return Err(InvalidRange::Inverted {
            start: range.start,
            end: range.end,
        });
    }
    if range.start < MIN_VALID_DATE || range.end > MAX_VALID_DATE {
        return Err(InvalidRange::OutOfRange);
    }
    Ok(())
}

/// A calendar query window `[from, to)`.
pub fn query_window(from: NaiveDate, to: NaiveDate) -> Result<DateRange, QueryError> {
    let window = DateRange::unchecked(from, to);
    validate_shape(&window)?;
    if window.nights() > MAX_QUERY_WINDOW_DAYS {
        return Err(QueryError::LimitExceeded("query window too wide"));
    }
    Ok(window)
}
