//! Built-in holiday calendar used for season block quick-add suggestions.
//!
//! Each holiday also carries the title keywords used to suggest matching
//! collections.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;

use crate::config::MonthDay;

/// How a holiday's date is found in a given year.
#[derive(Debug, Clone, Copy)]
enum HolidayRule {
    /// Fixed month/day range.
    Fixed {
        start: (u32, u32),
        end: (u32, u32),
    },
    /// Days relative to Easter Sunday.
    Easter { offset_start: i64, offset_end: i64 },
    /// The `nth` `weekday` of `month` (`-1` = last), lasting `duration_days`.
    NthWeekday {
        month: u32,
        weekday: Weekday,
        nth: i32,
        duration_days: i64,
    },
}

struct Holiday {
    name: &'static str,
    rule: HolidayRule,
    /// Lowercase fragments a matching collection title contains.
    keywords: &'static [&'static str],
}

const fn fixed(
    name: &'static str,
    start: (u32, u32),
    end: (u32, u32),
    keywords: &'static [&'static str],
) -> Holiday {
    Holiday {
        name,
        rule: HolidayRule::Fixed { start, end },
        keywords,
    }
}

const fn nth(
    name: &'static str,
    month: u32,
    weekday: Weekday,
    nth: i32,
    duration_days: i64,
    keywords: &'static [&'static str],
) -> Holiday {
    Holiday {
        name,
        rule: HolidayRule::NthWeekday {
            month,
            weekday,
            nth,
            duration_days,
        },
        keywords,
    }
}

const HOLIDAYS: &[Holiday] = &[
    fixed("New Year's Day", (1, 1), (1, 1), &["new year", "new years", "nyd"]),
    fixed("Valentine's Day", (2, 14), (2, 14), &["valentine", "vday"]),
    fixed(
        "St. Patrick's Day",
        (3, 17),
        (3, 17),
        &["st patrick", "saint patrick", "st patty"],
    ),
    fixed("April Fool's Day", (4, 1), (4, 1), &["april fool"]),
    fixed("Earth Day", (4, 22), (4, 22), &["earth day", "earthday"]),
    fixed("Cinco de Mayo", (5, 5), (5, 5), &["cinco de mayo"]),
    fixed(
        "Juneteenth",
        (6, 19),
        (6, 19),
        &["juneteenth", "june 19", "june nineteenth"],
    ),
    fixed(
        "Independence Day",
        (7, 4),
        (7, 4),
        &["independence day", "4th of july", "fourth of july", "july 4th", "july fourth"],
    ),
    fixed("Halloween", (10, 31), (10, 31), &["halloween"]),
    fixed(
        "Veterans Day",
        (11, 11),
        (11, 11),
        &["veterans day", "veteran's day", "veteransday"],
    ),
    fixed("Christmas", (12, 10), (12, 26), &["christmas", "xmas", "holiday"]),
    fixed(
        "New Year's Eve",
        (12, 27),
        (12, 31),
        &["new year's eve", "new years eve", "nye", "best of"],
    ),
    fixed("Pride Month", (6, 1), (6, 30), &["pride"]),
    Holiday {
        name: "Easter Week",
        rule: HolidayRule::Easter {
            offset_start: -2,
            offset_end: 2,
        },
        keywords: &["easter", "good friday"],
    },
    nth(
        "Golden Globes Week",
        1,
        Weekday::Sun,
        1,
        7,
        &["golden globe", "goldenglobes"],
    ),
    nth(
        "SAG Awards Week",
        1,
        Weekday::Sun,
        3,
        7,
        &["sag awards", "sag", "screen actors guild"],
    ),
    nth("Grammy Awards Week", 1, Weekday::Sun, 2, 7, &["grammy"]),
    nth(
        "Academy Awards Week",
        2,
        Weekday::Sun,
        -1,
        7,
        &["academy award", "oscars"],
    ),
    nth("Tony Awards Week", 6, Weekday::Sun, 1, 7, &["tony awards", "tony", "tonys"]),
    nth("Emmy Awards Week", 9, Weekday::Sun, 2, 7, &["emmy"]),
    nth("Memorial Day", 5, Weekday::Mon, -1, 1, &["memorial day"]),
    nth(
        "Labor Day Week",
        9,
        Weekday::Mon,
        1,
        7,
        &["labor day", "labour day", "laborday"],
    ),
    nth(
        "Thanksgiving Week",
        11,
        Weekday::Thu,
        4,
        7,
        &["thanksgiving", "turkey day"],
    ),
    nth(
        "Super Bowl Sunday",
        2,
        Weekday::Sun,
        1,
        1,
        &["super bowl", "superbowl"],
    ),
];

/// Days added on each side of a single-day observance.
const SINGLE_DAY_PADDING: i64 = 3;

/// A suggested season range for one holiday in one year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HolidayRange {
    pub name: String,
    #[serde(rename = "start_date")]
    pub start: NaiveDate,
    #[serde(rename = "end_date")]
    pub end: NaiveDate,
    /// `start` as a year-agnostic day, ready for a season block.
    pub start_md: MonthDay,
    pub end_md: MonthDay,
}

/// Title keywords for `holiday`.
///
/// Names match case-insensitively and curly apostrophes are accepted. An
/// unknown name is its own keyword, lowercased.
pub fn holiday_keywords(holiday: &str) -> Vec<String> {
    let wanted = holiday.trim().replace('\u{2019}', "'");
    HOLIDAYS
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(&wanted))
        .map(|h| h.keywords.iter().map(|k| k.to_string()).collect())
        .unwrap_or_else(|| vec![wanted.to_lowercase()])
}

/// Whether `title` contains any of `keywords` (already lowercase).
pub fn title_matches(title: &str, keywords: &[String]) -> bool {
    let title = title.to_lowercase();
    keywords.iter().any(|k| title.contains(k.as_str()))
}

/// Easter Sunday for `year` (anonymous Gregorian algorithm).
pub fn compute_easter(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = (19 * a + b - b / 4 - ((b - (b + 8) / 25 + 1) / 3) + 15) % 30;
    let e = (32 + 2 * (b % 4) + 2 * (c / 4) - d - (c % 4)) % 7;
    let f = d + e - 7 * ((a + 11 * d + 22 * e) / 451) + 114;
    let month = f / 31;
    let day = f % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

/// The `nth` occurrence of `weekday` in `month` (1-based; `-1` = last).
pub fn nth_weekday(year: i32, month: u32, weekday: Weekday, nth: i32) -> Option<NaiveDate> {
    if nth > 0 {
        let n = u8::try_from(nth).ok()?;
        return NaiveDate::from_weekday_of_month_opt(year, month, weekday, n);
    }

    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let mut day = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;
    while day.weekday() != weekday {
        day = day.pred_opt()?;
    }
    Some(day)
}

fn holiday_range(holiday: &Holiday, year: i32) -> Option<(NaiveDate, NaiveDate)> {
    match holiday.rule {
        HolidayRule::Fixed { start, end } => Some((
            NaiveDate::from_ymd_opt(year, start.0, start.1)?,
            NaiveDate::from_ymd_opt(year, end.0, end.1)?,
        )),
        HolidayRule::Easter {
            offset_start,
            offset_end,
        } => {
            let easter = compute_easter(year)?;
            Some((
                easter + Duration::days(offset_start),
                easter + Duration::days(offset_end),
            ))
        }
        HolidayRule::NthWeekday {
            month,
            weekday,
            nth,
            duration_days,
        } => {
            let start = nth_weekday(year, month, weekday, nth)?;
            Some((start, start + Duration::days(duration_days - 1)))
        }
    }
}

/// Default season ranges for `year`, in calendar-list order.
///
/// Single-day observances are widened by three days on each side.
pub fn default_season_ranges(year: i32) -> Vec<HolidayRange> {
    HOLIDAYS
        .iter()
        .filter_map(|holiday| {
            let (mut start, mut end) = holiday_range(holiday, year)?;
            if start == end {
                start -= Duration::days(SINGLE_DAY_PADDING);
                end += Duration::days(SINGLE_DAY_PADDING);
            }
            Some(HolidayRange {
                name: holiday.name.to_string(),
                start,
                end,
                start_md: MonthDay::from_date(start),
                end_md: MonthDay::from_date(end),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn range<'a>(ranges: &'a [HolidayRange], name: &str) -> &'a HolidayRange {
        ranges.iter().find(|r| r.name == name).unwrap()
    }

    #[test]
    fn test_easter_dates() {
        assert_eq!(compute_easter(2024), Some(date(2024, 3, 31)));
        assert_eq!(compute_easter(2025), Some(date(2025, 4, 20)));
        assert_eq!(compute_easter(2038), Some(date(2038, 4, 25)));
    }

    #[test]
    fn test_nth_weekday() {
        assert_eq!(nth_weekday(2024, 11, Weekday::Thu, 4), Some(date(2024, 11, 28)));
        assert_eq!(nth_weekday(2024, 5, Weekday::Mon, -1), Some(date(2024, 5, 27)));
        assert_eq!(nth_weekday(2024, 12, Weekday::Tue, -1), Some(date(2024, 12, 31)));
        assert_eq!(nth_weekday(2024, 2, Weekday::Thu, 5), Some(date(2024, 2, 29)));
        assert_eq!(nth_weekday(2023, 2, Weekday::Thu, 5), None);
    }

    #[test]
    fn test_default_ranges_2024() {
        let ranges = default_season_ranges(2024);
        assert_eq!(ranges.len(), HOLIDAYS.len());

        let thanksgiving = range(&ranges, "Thanksgiving Week");
        assert_eq!(thanksgiving.start, date(2024, 11, 28));
        assert_eq!(thanksgiving.end, date(2024, 12, 4));

        let easter = range(&ranges, "Easter Week");
        assert_eq!(easter.start, date(2024, 3, 29));
        assert_eq!(easter.end, date(2024, 4, 2));

        let christmas = range(&ranges, "Christmas");
        assert_eq!(christmas.start_md.to_string(), "12-10");
        assert_eq!(christmas.end_md.to_string(), "12-26");
    }

    #[test]
    fn test_single_day_observances_are_padded() {
        let ranges = default_season_ranges(2024);

        let new_year = range(&ranges, "New Year's Day");
        assert_eq!(new_year.start, date(2023, 12, 29));
        assert_eq!(new_year.end, date(2024, 1, 4));
        assert_eq!(new_year.start_md.to_string(), "12-29");

        let memorial = range(&ranges, "Memorial Day");
        assert_eq!(memorial.start, date(2024, 5, 24));
        assert_eq!(memorial.end, date(2024, 5, 30));
    }

    #[test]
    fn test_holiday_keywords() {
        assert!(holiday_keywords("christmas").contains(&"xmas".to_string()));
        assert_eq!(
            holiday_keywords("New Year\u{2019}s Eve"),
            holiday_keywords("New Year's Eve")
        );
        assert_eq!(holiday_keywords("Arbor Day"), vec!["arbor day"]);

        let keywords = holiday_keywords("Christmas");
        assert!(title_matches("A Very Merry XMAS", &keywords));
        assert!(!title_matches("Noir Classics", &keywords));
    }

    #[test]
    fn test_range_json_shape() {
        let ranges = default_season_ranges(2025);
        let json = serde_json::to_value(range(&ranges, "Halloween")).unwrap();
        assert_eq!(json["start_date"], "2025-10-28");
        assert_eq!(json["end_date"], "2025-11-03");
        assert_eq!(json["start_md"], "10-28");
    }
}
