use chrono::{Datelike, Days, NaiveDate};

use crate::model::{Period, Week, Weekday};

/// Maps a calendar date to a 1-based week index within a term.
pub trait WeekCalendar {
    /// `None` when the date falls outside the term.
    fn week_of(&self, date: NaiveDate) -> Option<Week>;
}

/// Monday-based week grid anchored at the week containing the term start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermCalendar {
    first_monday: NaiveDate,
    week_count: Week,
}

impl TermCalendar {
    pub fn new(starts_on: NaiveDate, week_count: Week) -> Self {
        let back = u64::from(weekday_index(starts_on));
        let first_monday = starts_on
            .checked_sub_days(Days::new(back))
            .unwrap_or(starts_on);
        Self {
            first_monday,
            week_count,
        }
    }

    pub fn first_monday(&self) -> NaiveDate {
        self.first_monday
    }

    pub fn week_count(&self) -> Week {
        self.week_count
    }
}

impl From<&Period> for TermCalendar {
    fn from(period: &Period) -> Self {
        TermCalendar::new(period.starts_on, period.week_count)
    }
}

impl WeekCalendar for TermCalendar {
    fn week_of(&self, date: NaiveDate) -> Option<Week> {
        let days = (date - self.first_monday).num_days();
        if days < 0 {
            return None;
        }
        let week = days / 7 + 1;
        if week > i64::from(self.week_count) {
            return None;
        }
        Week::try_from(week).ok()
    }
}

/// Monday = 0 .. Sunday = 6.
pub fn weekday_index(date: NaiveDate) -> Weekday {
    date.weekday().num_days_from_monday() as Weekday
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn weekday_index_is_monday_based() {
        assert_eq!(weekday_index(d(2024, 9, 2)), 0); // Monday
        assert_eq!(weekday_index(d(2024, 9, 7)), 5); // Saturday
        assert_eq!(weekday_index(d(2024, 9, 8)), 6); // Sunday
    }

    #[test]
    fn first_week_starts_on_monday() {
        // Term starts on a Wednesday; the Monday before belongs to week 1.
        let cal = TermCalendar::new(d(2024, 9, 4), 16);
        assert_eq!(cal.first_monday(), d(2024, 9, 2));
        assert_eq!(cal.week_of(d(2024, 9, 2)), Some(1));
        assert_eq!(cal.week_of(d(2024, 9, 8)), Some(1));
        assert_eq!(cal.week_of(d(2024, 9, 9)), Some(2));
    }

    #[test]
    fn week_bounds() {
        let cal = TermCalendar::new(d(2024, 9, 2), 2);
        assert_eq!(cal.week_of(d(2024, 9, 1)), None);
        assert_eq!(cal.week_of(d(2024, 9, 15)), Some(2));
        assert_eq!(cal.week_of(d(2024, 9, 16)), None);
    }

    #[test]
    fn calendar_from_period() {
        let period = Period {
            id: 1,
            year_start: 2024,
            year_end: 2025,
            semester: 1,
            starts_on: d(2024, 9, 2),
            week_count: 16,
        };
        let cal = TermCalendar::from(&period);
        assert_eq!(cal.week_count(), 16);
        assert_eq!(cal.week_of(d(2024, 12, 22)), Some(16));
        assert_eq!(cal.week_of(d(2024, 12, 23)), None);
    }
}
