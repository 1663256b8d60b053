use chrono::{Datelike, Days, NaiveDate, Timelike, Weekday};

/// Calendar-derived fields for one hourly timestamp.
///
/// Every field is a pure function of the timestamp; the same hour always
/// produces the same features regardless of where it appears in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFeatures {
    pub hour_of_day: u32,
    /// 0 = Monday, 6 = Sunday.
    pub day_of_week: u32,
    pub month: u32,
    pub day_of_year: u32,
    /// ISO week number (1-53).
    pub week_of_year: u32,
    /// `day_of_week * 24 + hour_of_day`, range 0-167.
    pub week_hour: u32,
    pub is_weekend: bool,
    pub is_holiday: bool,
}

impl CalendarFeatures {
    /// Derive calendar features from any date-time value, naive or
    /// timezone-aware. Wall-clock fields are taken as-is; callers are
    /// responsible for keeping one timezone convention across the pipeline.
    pub fn for_hour<T: Datelike + Timelike>(t: &T) -> Self {
        let hour_of_day = t.hour();
        let day_of_week = t.weekday().num_days_from_monday();
        let is_holiday = NaiveDate::from_ymd_opt(t.year(), t.month(), t.day())
            .map(is_us_federal_holiday)
            .unwrap_or(false);

        Self {
            hour_of_day,
            day_of_week,
            month: t.month(),
            day_of_year: t.ordinal(),
            week_of_year: t.iso_week().week(),
            week_hour: day_of_week * 24 + hour_of_day,
            is_weekend: day_of_week >= 5,
            is_holiday,
        }
    }
}

/// Fixed-date federal holidays observed on the nearest weekday:
/// New Year's Day, Juneteenth, Independence Day, Veterans Day, Christmas.
const FIXED_DATE_HOLIDAYS: [(u32, u32); 5] = [(1, 1), (6, 19), (7, 4), (11, 11), (12, 25)];

/// Check if a date is a US federal holiday.
///
/// Fixed-date holidays follow the nearest-weekday observance rule (Saturday
/// is observed the Friday before, Sunday the Monday after), so the flag lands
/// on the observed date, not the nominal one. Floating holidays are never
/// shifted. Juneteenth counts from 2021 onward.
pub fn is_us_federal_holiday(date: NaiveDate) -> bool {
    let year = date.year();

    let floating = [
        nth_weekday_of_month(year, 1, Weekday::Mon, 3), // Martin Luther King Jr. Day
        nth_weekday_of_month(year, 2, Weekday::Mon, 3), // Washington's Birthday
        last_weekday_of_month(year, 5, Weekday::Mon),   // Memorial Day
        nth_weekday_of_month(year, 9, Weekday::Mon, 1), // Labor Day
        nth_weekday_of_month(year, 10, Weekday::Mon, 2), // Columbus Day
        nth_weekday_of_month(year, 11, Weekday::Thu, 4), // Thanksgiving
    ];
    if floating.iter().flatten().any(|d| *d == date) {
        return true;
    }

    // New Year's Day of the following year can be observed on December 31,
    // so the next year's fixed dates are checked as well.
    for y in [year, year + 1] {
        for (month, day) in FIXED_DATE_HOLIDAYS {
            if month == 6 && y < 2021 {
                continue;
            }
            if let Some(nominal) = NaiveDate::from_ymd_opt(y, month, day) {
                if observed(nominal) == date {
                    return true;
                }
            }
        }
    }

    false
}

/// Shift a nominal holiday date to its observed weekday.
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date.pred_opt().unwrap_or(date),
        Weekday::Sun => date.succ_opt().unwrap_or(date),
        _ => date,
    }
}

/// Date of the nth occurrence (1-based) of a weekday within a month.
fn nth_weekday_of_month(year: i32, month: u32, weekday: Weekday, n: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let offset =
        (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
    NaiveDate::from_ymd_opt(year, month, 1 + offset + (n - 1) * 7)
}

/// Date of the last occurrence of a weekday within a month.
fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let next_month_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last = next_month_first.pred_opt()?;
    let back = (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    last.checked_sub_days(Days::new(u64::from(back)))
}
