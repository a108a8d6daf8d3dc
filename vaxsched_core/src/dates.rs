//! Calendar arithmetic used by the eligibility rules.
//!
//! Month additions clamp the day to the end of the resulting month
//! (Jan 31 + 1 month = Feb 28/29). Overflow saturates at `NaiveDate::MAX`.

use chrono::{Datelike, Days, Months, NaiveDate};

/// Add calendar months to a date
pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

/// Add calendar days to a date
pub fn add_days(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_add_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MAX)
}

/// Completed months of age on `on` for someone born on `birth`
///
/// Returns 0 when `on` precedes `birth`.
pub fn age_in_months(birth: NaiveDate, on: NaiveDate) -> u32 {
    if on <= birth {
        return 0;
    }
    let mut months = (on.year() - birth.year()) * 12 + on.month() as i32 - birth.month() as i32;
    if months > 0 && add_months(birth, months as u32) > on {
        months -= 1;
    }
    months.max(0) as u32
}
