#![forbid(unsafe_code)]

use std::fmt;

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

const DATED_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
];

const YEARLESS_FORMATS: &[&str] = &["%B %d %Y", "%d %B %Y"];

/// Parses a booking date cell. Year-less inputs ("Jun 12") take `default_year`.
pub fn parse_calendar_date(raw: &str, default_year: i32) -> Option<NaiveDate> {
    let collapsed = collapse_whitespace(raw);
    let text = strip_weekday(&collapsed);
    if text.is_empty() {
        return None;
    }
    for format in DATED_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    // Spreadsheet exports append a time of day ("6/10/2025 0:00:00").
    if let Some((head, _)) = text.split_once(' ') {
        if head.contains('/') || head.contains('-') {
            for format in ["%Y-%m-%d", "%m/%d/%Y"] {
                if let Ok(date) = NaiveDate::parse_from_str(head, format) {
                    return Some(date);
                }
            }
        }
    }
    if let Some((day_part, _)) = text.split_once('T') {
        if let Ok(date) = NaiveDate::parse_from_str(day_part, ISO_DATE_FORMAT) {
            return Some(date);
        }
    }
    let with_year = format!("{} {}", text.trim_end_matches(','), default_year);
    for format in YEARLESS_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&with_year, format) {
            return Some(date);
        }
    }
    None
}

pub fn iso_date(date: NaiveDate) -> String {
    date.format(ISO_DATE_FORMAT).to_string()
}

/// Long form used on date header rows, e.g. "Tuesday, June 10, 2025".
pub fn long_date_label(date: NaiveDate) -> String {
    date.format("%A, %B %-d, %Y").to_string()
}

fn strip_weekday(text: &str) -> &str {
    if let Some((head, rest)) = text.split_once(',') {
        if head.trim().parse::<Weekday>().is_ok() {
            return rest.trim();
        }
    }
    text
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Start of a bookable time slot, as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotStart(u16);

impl SlotStart {
    pub fn from_minutes(minutes: u16) -> Option<Self> {
        if minutes < 24 * 60 {
            Some(SlotStart(minutes))
        } else {
            None
        }
    }

    /// Accepts "10:00 AM", "10am", "14:30" and ranges such as "10:00 AM - 11:00 AM".
    pub fn parse(raw: &str) -> Option<Self> {
        let start = raw
            .split(['-', '\u{2013}'])
            .next()
            .unwrap_or_default()
            .split(" to ")
            .next()
            .unwrap_or_default();
        let compact: String = start
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '.')
            .collect::<String>()
            .to_ascii_uppercase();
        if compact.is_empty() {
            return None;
        }
        let (clock, meridiem) = if let Some(head) = compact.strip_suffix("AM") {
            (head, Some(false))
        } else if let Some(head) = compact.strip_suffix("PM") {
            (head, Some(true))
        } else {
            (compact.as_str(), None)
        };
        let (hour_text, minute_text) = clock.split_once(':').unwrap_or((clock, "00"));
        if hour_text.is_empty() || hour_text.len() > 2 || minute_text.len() != 2 {
            return None;
        }
        let hour: u16 = hour_text.parse().ok()?;
        let minute: u16 = minute_text.parse().ok()?;
        if minute > 59 {
            return None;
        }
        let hour24 = match meridiem {
            Some(pm) => {
                if !(1..=12).contains(&hour) {
                    return None;
                }
                match (hour, pm) {
                    (12, false) => 0,
                    (12, true) => 12,
                    (h, false) => h,
                    (h, true) => h + 12,
                }
            }
            None => {
                if hour > 23 {
                    return None;
                }
                hour
            }
        };
        SlotStart::from_minutes(hour24 * 60 + minute)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    /// Canonical slot label, e.g. "10:00 AM".
    pub fn label(self) -> String {
        let hour24 = self.0 / 60;
        let minute = self.0 % 60;
        let (hour12, suffix) = match hour24 {
            0 => (12, "AM"),
            1..=11 => (hour24, "AM"),
            12 => (12, "PM"),
            _ => (hour24 - 12, "PM"),
        };
        format!("{hour12}:{minute:02} {suffix}")
    }
}

impl fmt::Display for SlotStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
