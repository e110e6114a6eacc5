//! Birthday arithmetic. Feb 29 birthdays fall on Feb 28 in non-leap years.

use time::{Date, Duration, Month};

pub const DEFAULT_WINDOW_DAYS: i64 = 7;
pub const MAX_WINDOW_DAYS: i64 = 366;

fn anniversary_in(birthday: Date, year: i32) -> Option<Date> {
    let month = birthday.month();
    let day = birthday.day().min(month.length(year));
    Date::from_calendar_date(year, month, day).ok()
}

/// First anniversary of `birthday` on or after `today`.
pub fn next_occurrence(birthday: Date, today: Date) -> Option<Date> {
    let this_year = anniversary_in(birthday, today.year())?;
    if this_year >= today {
        Some(this_year)
    } else {
        anniversary_in(birthday, today.year() + 1)
    }
}

pub fn days_until(birthday: Date, today: Date) -> Option<i64> {
    next_occurrence(birthday, today).map(|next| (next - today).whole_days())
}

/// `month * 100 + day` codes of every birth date whose anniversary falls in
/// the window. Lets the database match on month/day without date math.
pub fn month_day_codes(today: Date, window_days: i64) -> Vec<i32> {
    let mut codes = Vec::new();
    for offset in 0..=window_days.clamp(0, MAX_WINDOW_DAYS) {
        let Some(date) = today.checked_add(Duration::days(offset)) else {
            break;
        };
        let code = i32::from(u8::from(date.month())) * 100 + i32::from(date.day());
        if !codes.contains(&code) {
            codes.push(code);
        }
        if date.month() == Month::February
            && date.day() == 28
            && Month::February.length(date.year()) == 28
            && !codes.contains(&229)
        {
            codes.push(229);
        }
    }
    codes
}
