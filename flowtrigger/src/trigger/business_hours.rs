//! Weekly business hours window for gated triggers

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Offset, Utc, Weekday};

/// Weekly window used by `business_hours_only` triggers
///
/// The window is expressed in a fixed UTC offset. When `end` is earlier than
/// `start` the window spans midnight and belongs to the day it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessHours {
    /// Window start, inclusive
    pub start: NaiveTime,
    /// Window end, exclusive
    pub end: NaiveTime,
    /// Days on which the window opens
    pub weekdays: Vec<Weekday>,
    /// Offset of the business timezone from UTC
    pub utc_offset_minutes: i32,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            weekdays: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            utc_offset_minutes: 0,
        }
    }
}

impl BusinessHours {
    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }

    /// Whether `at` falls inside the window
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.offset());
        let time = local.time();
        let day = local.weekday();

        if self.start <= self.end {
            self.weekdays.contains(&day) && time >= self.start && time < self.end
        } else if time >= self.start {
            self.weekdays.contains(&day)
        } else if time < self.end {
            self.weekdays.contains(&day.pred())
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_default_window() {
        let hours = BusinessHours::default();
        // 2024-05-06 is a Monday
        assert!(hours.contains(at("2024-05-06T09:00:00Z")));
        assert!(hours.contains(at("2024-05-06T16:59:59Z")));
        assert!(!hours.contains(at("2024-05-06T17:00:00Z")));
        assert!(!hours.contains(at("2024-05-06T08:59:59Z")));
        assert!(!hours.contains(at("2024-05-05T12:00:00Z")));
    }

    #[test]
    fn test_offset_shifts_window() {
        let hours = BusinessHours {
            utc_offset_minutes: -300,
            ..BusinessHours::default()
        };
        assert!(hours.contains(at("2024-05-06T14:00:00Z")));
        assert!(!hours.contains(at("2024-05-06T10:00:00Z")));
    }

    #[test]
    fn test_overnight_window_belongs_to_start_day() {
        let hours = BusinessHours {
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            weekdays: vec![Weekday::Fri],
            utc_offset_minutes: 0,
        };
        // 2024-05-10 is a Friday
        assert!(hours.contains(at("2024-05-10T23:00:00Z")));
        assert!(hours.contains(at("2024-05-11T05:00:00Z")));
        assert!(!hours.contains(at("2024-05-11T23:00:00Z")));
        assert!(!hours.contains(at("2024-05-10T05:00:00Z")));
    }
}
