use std::collections::{BTreeSet, HashSet};

use crate::limits::MAX_WORKING_DAYS;
use crate::model::*;

use super::registry::require;
use super::{Engine, EngineError, Reference};

/// Slot capacity of a room over one term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub working_days: u32,
    pub calls_per_day: u32,
    pub weeks: u32,
}

impl Capacity {
    /// Six days, six calls a day, sixteen weeks.
    pub const NOMINAL: Capacity = Capacity {
        working_days: 6,
        calls_per_day: 6,
        weeks: 16,
    };

    pub fn slots(&self) -> u64 {
        u64::from(self.working_days) * u64::from(self.calls_per_day) * u64::from(self.weeks)
    }
}

/// Count distinct `(weekday, call_id, week)` slots taken by `lessons`.
///
/// Parallel lessons sharing a slot count once. Lessons whose call is not in
/// `calls` are ignored.
pub fn occupied_slots(lessons: &[Lesson], calls: &[LessonCall]) -> usize {
    let defined: HashSet<Id> = calls.iter().map(|c| c.id).collect();
    let mut seen: HashSet<(Weekday, Id, Week)> = HashSet::new();
    for lesson in lessons.iter().filter(|l| defined.contains(&l.call_id)) {
        for &week in &lesson.weeks {
            seen.insert((lesson.weekday, lesson.call_id, week));
        }
    }
    seen.len()
}

/// `occupied / capacity * 100`. Not clamped: lessons outside the capacity
/// grid can push it past 100.
pub fn occupancy_percent(occupied: usize, capacity: &Capacity) -> Result<f64, EngineError> {
    let slots = capacity.slots();
    if slots == 0 {
        return Err(EngineError::InvalidInput("capacity must be non-zero"));
    }
    Ok(occupied as f64 / slots as f64 * 100.0)
}

impl Engine {
    /// Share of the room's slots taken over a term, in percent.
    pub async fn room_occupancy(&self, room_id: Id, capacity: &Capacity) -> Result<f64, EngineError> {
        require(&self.refs.rooms, room_id)?;
        let lessons = self.lessons_by_room(room_id).await;
        let occupied = occupied_slots(&lessons, &self.calls());
        occupancy_percent(occupied, capacity)
    }

    /// Capacity from the defined calendar: distinct call numbers times
    /// `working_days` times the period's week count.
    pub fn derived_capacity(&self, period_id: Id, working_days: u32) -> Result<Capacity, EngineError> {
        if working_days == 0 || working_days > MAX_WORKING_DAYS {
            return Err(EngineError::InvalidInput("working days must be 1..=7"));
        }
        let period = self
            .refs
            .periods
            .get(period_id)
            .ok_or(EngineError::UnknownReference {
                kind: Period::KIND,
                id: period_id,
            })?;
        let nums: BTreeSet<u8> = self.refs.calls.all().iter().map(|c| c.num).collect();
        Ok(Capacity {
            working_days,
            calls_per_day: nums.len() as u32,
            weeks: u32::from(period.week_count),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;

    fn call(id: Id, num: u8) -> LessonCall {
        let h = u32::from(num) + 8;
        LessonCall {
            id,
            time_start: NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
            time_end: NaiveTime::from_hms_opt(h, 45, 0).unwrap(),
            num,
        }
    }

    fn lesson(id: Id, weekday: Weekday, call_id: Id, weeks: Vec<Week>) -> Lesson {
        Lesson {
            id,
            weekday,
            call_id,
            weeks,
            subgroup: 0,
            group_id: 1,
            room_id: 1,
            discipline_id: 1,
            lesson_type_id: 1,
            teacher_ids: vec![1],
        }
    }

    #[test]
    fn nominal_capacity_is_576() {
        assert_eq!(Capacity::NOMINAL.slots(), 576);
    }

    #[test]
    fn parallel_lessons_count_once() {
        let calls = vec![call(10, 1)];
        let lessons = vec![
            lesson(1, 0, 10, vec![1, 2, 3]),
            lesson(2, 0, 10, vec![1, 2, 3]),
        ];
        assert_eq!(occupied_slots(&lessons, &calls), 3);
    }

    #[test]
    fn undefined_calls_are_ignored() {
        let calls = vec![call(10, 1)];
        let lessons = vec![lesson(1, 0, 10, vec![1]), lesson(2, 0, 99, vec![1, 2])];
        assert_eq!(occupied_slots(&lessons, &calls), 1);
    }

    #[test]
    fn different_weekdays_are_distinct_slots() {
        let calls = vec![call(10, 1)];
        let lessons = vec![lesson(1, 0, 10, vec![1]), lesson(2, 3, 10, vec![1])];
        assert_eq!(occupied_slots(&lessons, &calls), 2);
    }

    #[test]
    fn percent_against_nominal() {
        let pct = occupancy_percent(3, &Capacity::NOMINAL).unwrap();
        assert!((pct - 0.5208).abs() < 0.001, "got {pct}");
        assert_eq!(occupancy_percent(0, &Capacity::NOMINAL).unwrap(), 0.0);
    }

    #[test]
    fn percent_is_not_clamped() {
        let tiny = Capacity {
            working_days: 1,
            calls_per_day: 1,
            weeks: 1,
        };
        assert_eq!(occupancy_percent(3, &tiny).unwrap(), 300.0);
    }

    #[test]
    fn zero_capacity_rejected() {
        let zero = Capacity {
            working_days: 6,
            calls_per_day: 0,
            weeks: 16,
        };
        assert!(matches!(
            occupancy_percent(1, &zero),
            Err(EngineError::InvalidInput(_))
        ));
    }
}
