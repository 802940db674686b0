use chrono::{Duration, NaiveDate};

use crate::error::{AppError, Result};

/// An inclusive, non-empty span of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(AppError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    /// Every date in the range, oldest first.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start.iter_days().take(self.len()).collect()
    }
}

/// Raw range parameters as supplied on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub days: i64,
}

impl RangeRequest {
    pub fn resolve(&self, today: NaiveDate) -> Result<DateRange> {
        resolve_date_range(self.days, self.start, self.end, today)
    }
}

/// Turn start/end/day-count parameters into a concrete range.
///
/// A missing bound is derived from the other one and `days`; with neither bound
/// the window ends at `today`. The end is clamped to `today` since there is no
/// picture for a future date.
pub fn resolve_date_range(
    days: i64,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<DateRange> {
    if days <= 0 {
        return Err(AppError::InvalidConfig(format!(
            "days must be a positive integer, got {}",
            days
        )));
    }
    let span = Duration::try_days(days - 1)
        .ok_or_else(|| AppError::InvalidConfig(format!("days out of range: {}", days)))?;

    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        (Some(start), None) => (start, offset(start, span, true)?),
        (None, Some(end)) => (offset(end, span, false)?, end),
        (None, None) => (offset(today, span, false)?, today),
    };

    let end = end.min(today);
    DateRange::new(start, end)
}

fn offset(date: NaiveDate, span: Duration, forward: bool) -> Result<NaiveDate> {
    let shifted = if forward {
        date.checked_add_signed(span)
    } else {
        date.checked_sub_signed(span)
    };
    shifted.ok_or_else(|| AppError::InvalidConfig(format!("date range overflows from {}", date)))
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        AppError::InvalidConfig(format!("Invalid date '{}', expected YYYY-MM-DD", value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn today() -> NaiveDate {
        d(2024, 6, 30)
    }

    #[test]
    fn both_bounds_give_inclusive_ascending_sequence() {
        let range = resolve_date_range(5, Some(d(2024, 2, 27)), Some(d(2024, 3, 2)), today()).unwrap();
        assert_eq!(
            range.dates(),
            vec![
                d(2024, 2, 27),
                d(2024, 2, 28),
                d(2024, 2, 29),
                d(2024, 3, 1),
                d(2024, 3, 2)
            ]
        );
        assert_eq!(range.len(), 5);
    }

    #[test]
    fn sequences_have_no_gaps_or_duplicates() {
        let start = d(2023, 12, 1);
        for span in 0..60 {
            let end = start + Duration::days(span);
            let dates = resolve_date_range(1, Some(start), Some(end), today())
                .unwrap()
                .dates();
            assert_eq!(dates.len() as i64, span + 1);
            assert_eq!(dates.first(), Some(&start));
            assert_eq!(dates.last(), Some(&end));
            for pair in dates.windows(2) {
                assert_eq!(pair[1] - pair[0], Duration::days(1));
            }
        }
    }

    #[test]
    fn start_only_spans_days() {
        for days in 1..=40 {
            let range = resolve_date_range(days, Some(d(2024, 1, 1)), None, today()).unwrap();
            let dates = range.dates();
            assert_eq!(dates.len() as i64, days);
            assert_eq!(dates[0], d(2024, 1, 1));
            assert_eq!(range.end(), d(2024, 1, 1) + Duration::days(days - 1));
        }
    }

    #[test]
    fn end_only_counts_backwards() {
        let range = resolve_date_range(3, None, Some(d(2024, 1, 3)), today()).unwrap();
        assert_eq!(range.start(), d(2024, 1, 1));
        assert_eq!(range.end(), d(2024, 1, 3));
    }

    #[test]
    fn no_bounds_ends_today() {
        let range = resolve_date_range(30, None, None, today()).unwrap();
        assert_eq!(range.end(), today());
        assert_eq!(range.start(), d(2024, 6, 1));
        assert_eq!(range.len(), 30);
    }

    #[test]
    fn future_end_is_clamped_to_today() {
        let range = resolve_date_range(10, Some(d(2024, 6, 25)), None, today()).unwrap();
        assert_eq!(range.end(), today());
        assert_eq!(range.len(), 6);
    }

    #[test]
    fn start_after_end_is_invalid_range() {
        let err = resolve_date_range(5, Some(d(2024, 1, 5)), Some(d(2024, 1, 1)), today()).unwrap_err();
        assert!(matches!(err, AppError::InvalidRange { .. }));
    }

    #[test]
    fn start_in_future_is_invalid_range() {
        let err = resolve_date_range(1, Some(d(2024, 7, 2)), None, today()).unwrap_err();
        assert!(matches!(err, AppError::InvalidRange { .. }));
    }

    #[test]
    fn non_positive_days_is_invalid_config() {
        for days in [0, -1, -30] {
            let err = resolve_date_range(days, Some(d(2024, 1, 1)), None, today()).unwrap_err();
            assert!(matches!(err, AppError::InvalidConfig(_)));
        }
    }

    #[test]
    fn parse_date_accepts_iso_only() {
        assert_eq!(parse_date("2024-01-31").unwrap(), d(2024, 1, 31));
        assert!(matches!(parse_date("01/31/2024"), Err(AppError::InvalidConfig(_))));
        assert!(parse_date("2024-02-30").is_err());
    }
}
