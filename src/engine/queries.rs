use chrono::NaiveDate;

use crate::calendar::{weekday_index, WeekCalendar};
use crate::limits::*;
use crate::model::*;

use super::lessons::sort_by_slot;
use super::{Engine, EngineError, Reference};

fn check_search(needle: &str) -> Result<String, EngineError> {
    if needle.len() > MAX_SEARCH_LEN {
        return Err(EngineError::LimitExceeded("search string too long"));
    }
    Ok(needle.to_lowercase())
}

impl Engine {
    // ── Lessons ──────────────────────────────────────────

    pub async fn lesson(&self, id: Id) -> Option<Lesson> {
        self.lessons.read().await.get(id).cloned()
    }

    /// Every lesson held in a room, ordered by `(weekday, call_id)`.
    pub async fn lessons_by_room(&self, room_id: Id) -> Vec<Lesson> {
        let mut lessons: Vec<Lesson> = self.lessons.read().await.in_room(room_id).cloned().collect();
        sort_by_slot(&mut lessons);
        lessons
    }

    /// Lessons held in a room on a concrete date, ordered by `call_id`.
    ///
    /// Empty when `calendar` places the date outside the term.
    pub async fn lessons_by_room_and_date(
        &self,
        room_id: Id,
        date: NaiveDate,
        calendar: &impl WeekCalendar,
    ) -> Vec<Lesson> {
        let Some(week) = calendar.week_of(date) else {
            return Vec::new();
        };
        let weekday = weekday_index(date);
        let mut lessons: Vec<Lesson> = self
            .lessons
            .read()
            .await
            .in_room(room_id)
            .filter(|l| l.weekday == weekday && l.is_active_in(week))
            .cloned()
            .collect();
        lessons.sort_by_key(|l| (l.call_id, l.id));
        lessons
    }

    /// Lessons held in a room during `week`, ordered by `(weekday, call_id)`.
    pub async fn lessons_by_room_and_week(&self, room_id: Id, week: Week) -> Vec<Lesson> {
        let mut lessons: Vec<Lesson> = self
            .lessons
            .read()
            .await
            .in_room(room_id)
            .filter(|l| l.is_active_in(week))
            .cloned()
            .collect();
        sort_by_slot(&mut lessons);
        lessons
    }

    pub async fn lessons_by_teacher(&self, teacher_id: Id) -> Vec<Lesson> {
        let mut lessons: Vec<Lesson> = self
            .lessons
            .read()
            .await
            .with_teacher(teacher_id)
            .cloned()
            .collect();
        sort_by_slot(&mut lessons);
        lessons
    }

    pub async fn lessons_by_group(&self, group_id: Id) -> Vec<Lesson> {
        let mut lessons: Vec<Lesson> = self.lessons.read().await.in_group(group_id).cloned().collect();
        sort_by_slot(&mut lessons);
        lessons
    }

    // ── Reference lookups ────────────────────────────────

    /// Case-insensitive substring match on teacher names.
    pub fn search_teachers(&self, needle: &str) -> Result<Vec<Teacher>, EngineError> {
        let needle = check_search(needle)?;
        Ok(self
            .refs
            .teachers
            .filter(|t| t.name.to_lowercase().contains(&needle)))
    }

    /// Case-insensitive substring match on room names.
    pub fn search_rooms(&self, needle: &str) -> Result<Vec<Room>, EngineError> {
        let needle = check_search(needle)?;
        Ok(self
            .refs
            .rooms
            .filter(|r| r.name.to_lowercase().contains(&needle)))
    }

    /// Exact match on room name and campus short name. `None` for the campus
    /// matches the room that belongs to no campus. Short names are not
    /// unique, so every campus carrying one is tried, lowest id first.
    pub fn room_by_name_and_campus(&self, name: &str, campus_short_name: Option<&str>) -> Option<Room> {
        let Some(short) = campus_short_name else {
            return self.refs.rooms.find(&(name.to_string(), None));
        };
        self.refs
            .campuses
            .filter(|c| c.short_name.as_deref() == Some(short))
            .into_iter()
            .find_map(|c| self.refs.rooms.find(&(name.to_string(), Some(c.id))))
    }

    pub fn get<R: Reference>(&self, id: Id) -> Option<R> {
        R::table(&self.refs).get(id)
    }

    pub fn groups(&self) -> Vec<Group> {
        self.refs.groups.all()
    }

    /// First group carrying `name`, by id.
    pub fn group(&self, name: &str) -> Option<Group> {
        self.refs.groups.filter(|g| g.name == name).into_iter().next()
    }

    pub fn campuses(&self) -> Vec<Campus> {
        self.refs.campuses.all()
    }

    /// Rooms of a campus, ordered by lower-cased name.
    pub fn campus_rooms(&self, campus_id: Id) -> Vec<Room> {
        let mut rooms = self.refs.rooms.filter(|r| r.campus_id == Some(campus_id));
        rooms.sort_by_cached_key(|r| (r.name.to_lowercase(), r.id));
        rooms
    }

    pub fn calls(&self) -> Vec<LessonCall> {
        let mut calls = self.refs.calls.all();
        calls.sort_by_key(|c| (c.num, c.time_start, c.id));
        calls
    }

    pub fn periods(&self) -> Vec<Period> {
        self.refs.periods.all()
    }
}
