//! Deterministic date and time normalization.
//!
//! Phrases are resolved against a reference date supplied by the caller, so
//! the same phrase and reference always give the same answer. Phrases that
//! need context we do not have ("the 15th", "at 3") are reported as
//! ambiguous instead of being guessed.

use chrono::{Datelike, Days, NaiveDate, NaiveTime, Weekday};
use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateTimeError {
    #[error("ambiguous expression: {0:?}")]
    Ambiguous(String),
    #[error("unrecognized expression: {0:?}")]
    Invalid(String),
}

static SLASH_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").unwrap());

static IN_N: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^in\s+(\d{1,3})\s+(day|days|week|weeks)$").unwrap());

static WEEKDAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(this|next|on)\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)$").unwrap()
});

static MONTH_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z]+)\.?\s+(\d{1,2})(?:st|nd|rd|th)?(?:,?\s+(\d{4}))?$").unwrap()
});

static DAY_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:the\s+)?(\d{1,2})(?:st|nd|rd|th)?\s+(?:of\s+)?([a-z]+)\.?(?:,?\s+(\d{4}))?$").unwrap()
});

static ORDINAL_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:the\s+)?\d{1,2}(?:st|nd|rd|th)$").unwrap());

static MERIDIEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})(?::(\d{2}))?\s*([ap])\.?\s*m\.?$").unwrap()
});

static CLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})(?::(\d{2}))?$").unwrap());

static BARE_HOUR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:at\s+)?(\d{1,2})(?:\s*o'?clock)?$").unwrap());

pub fn month_from_name(name: &str) -> Option<u32> {
    let month = match name {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sept" | "sep" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn weekday_from_name(name: &str) -> Option<Weekday> {
    name.parse::<Weekday>().ok()
}

fn clean(phrase: &str) -> String {
    let lowered = phrase.trim().to_lowercase();
    let trimmed = lowered.trim_end_matches(['.', ',', '!', '?']);
    let trimmed = trimmed.strip_prefix("on ").unwrap_or(trimmed);
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy)]
pub struct DateTimeNormalizer {
    today: NaiveDate,
}

impl DateTimeNormalizer {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn date(&self, phrase: &str) -> Result<NaiveDate, DateTimeError> {
        let text = clean(phrase);
        let invalid = || DateTimeError::Invalid(phrase.trim().to_string());

        if let Ok(date) = NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
            return Ok(date);
        }

        if let Some(caps) = SLASH_DATE.captures(&text) {
            let a: u32 = caps[1].parse().map_err(|_| invalid())?;
            let b: u32 = caps[2].parse().map_err(|_| invalid())?;
            let year: i32 = caps[3].parse().map_err(|_| invalid())?;
            // Month-first unless that is impossible; both readings valid and different is ambiguous
            let (month, day) = match (a <= 12, b <= 12) {
                (true, true) if a != b => return Err(DateTimeError::Ambiguous(phrase.trim().to_string())),
                (true, _) => (a, b),
                (false, true) => (b, a),
                (false, false) => return Err(invalid()),
            };
            return NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid);
        }

        match text.as_str() {
            "today" => return Ok(self.today),
            "tomorrow" => return self.today.checked_add_days(Days::new(1)).ok_or_else(invalid),
            "the day after tomorrow" | "day after tomorrow" => {
                return self.today.checked_add_days(Days::new(2)).ok_or_else(invalid);
            }
            _ => {}
        }

        if let Some(caps) = IN_N.captures(&text) {
            let n: u64 = caps[1].parse().map_err(|_| invalid())?;
            let days = if caps[2].starts_with("week") { n * 7 } else { n };
            return self.today.checked_add_days(Days::new(days)).ok_or_else(invalid);
        }

        if let Some(caps) = WEEKDAY.captures(&text) {
            let target = weekday_from_name(&caps[2]).ok_or_else(invalid)?;
            return Ok(self.upcoming(target));
        }

        if let Some(caps) = MONTH_DAY.captures(&text) {
            if let Some(month) = month_from_name(&caps[1]) {
                let day: u32 = caps[2].parse().map_err(|_| invalid())?;
                let year = caps.get(3).and_then(|m| m.as_str().parse().ok());
                return self.month_day(month, day, year).ok_or_else(invalid);
            }
        }

        if let Some(caps) = DAY_MONTH.captures(&text) {
            if let Some(month) = month_from_name(&caps[2]) {
                let day: u32 = caps[1].parse().map_err(|_| invalid())?;
                let year = caps.get(3).and_then(|m| m.as_str().parse().ok());
                return self.month_day(month, day, year).ok_or_else(invalid);
            }
        }

        if ORDINAL_ONLY.is_match(&text) {
            return Err(DateTimeError::Ambiguous(phrase.trim().to_string()));
        }

        Err(invalid())
    }

    pub fn time(&self, phrase: &str) -> Result<NaiveTime, DateTimeError> {
        let text = clean(phrase);
        let text = text.strip_prefix("at ").unwrap_or(&text);
        let invalid = || DateTimeError::Invalid(phrase.trim().to_string());

        match text {
            "noon" | "midday" => return NaiveTime::from_hms_opt(12, 0, 0).ok_or_else(invalid),
            "midnight" => return NaiveTime::from_hms_opt(0, 0, 0).ok_or_else(invalid),
            _ => {}
        }

        if let Some(caps) = MERIDIEM.captures(text) {
            let hour: u32 = caps[1].parse().map_err(|_| invalid())?;
            let minute: u32 = caps.get(2).map_or(Ok(0), |m| m.as_str().parse()).map_err(|_| invalid())?;
            if !(1..=12).contains(&hour) {
                return Err(invalid());
            }
            let hour = match (&caps[3], hour) {
                ("a", 12) => 0,
                ("a", h) => h,
                (_, 12) => 12,
                (_, h) => h + 12,
            };
            return NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid);
        }

        if let Some(caps) = CLOCK.captures(text) {
            let hour: u32 = caps[1].parse().map_err(|_| invalid())?;
            let minute: u32 = caps[2].parse().map_err(|_| invalid())?;
            let second: u32 = caps.get(3).map_or(Ok(0), |m| m.as_str().parse()).map_err(|_| invalid())?;
            return NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(invalid);
        }

        if let Some(caps) = BARE_HOUR.captures(text) {
            let hour: u32 = caps[1].parse().map_err(|_| invalid())?;
            // Without am/pm only afternoon 24h hours are unambiguous
            return match hour {
                13..=23 => NaiveTime::from_hms_opt(hour, 0, 0).ok_or_else(invalid),
                0..=12 => Err(DateTimeError::Ambiguous(phrase.trim().to_string())),
                _ => Err(invalid()),
            };
        }

        Err(invalid())
    }

    /// Next occurrence strictly after today
    fn upcoming(&self, target: Weekday) -> NaiveDate {
        let current = self.today.weekday().num_days_from_monday();
        let wanted = target.num_days_from_monday();
        let ahead = match (wanted + 7 - current) % 7 {
            0 => 7,
            n => n,
        };
        self.today + Days::new(ahead as u64)
    }

    /// With no year, the first such date on or after today
    fn month_day(&self, month: u32, day: u32, year: Option<i32>) -> Option<NaiveDate> {
        match year {
            Some(year) => NaiveDate::from_ymd_opt(year, month, day),
            None => {
                let this_year = NaiveDate::from_ymd_opt(self.today.year(), month, day);
                match this_year {
                    Some(date) if date >= self.today => Some(date),
                    _ => NaiveDate::from_ymd_opt(self.today.year() + 1, month, day),
                }
            }
        }
    }
}
