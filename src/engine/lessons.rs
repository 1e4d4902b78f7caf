use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// The lesson table plus its secondary indexes.
///
/// Teacher associations are stored inside each row, so removing a lesson
/// removes its associations with it.
#[derive(Debug, Default)]
pub struct LessonTable {
    rows: BTreeMap<Id, Lesson>,
    by_slot: HashMap<SlotKey, Vec<Id>>,
    by_room: HashMap<Id, BTreeSet<Id>>,
    by_group: HashMap<Id, BTreeSet<Id>>,
    by_teacher: HashMap<Id, BTreeSet<Id>>,
}

fn index_insert(index: &mut HashMap<Id, BTreeSet<Id>>, key: Id, id: Id) {
    index.entry(key).or_default().insert(id);
}

fn index_remove(index: &mut HashMap<Id, BTreeSet<Id>>, key: Id, id: Id) {
    if let Some(ids) = index.get_mut(&key) {
        ids.remove(&id);
        if ids.is_empty() {
            index.remove(&key);
        }
    }
}

impl LessonTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: Id) -> Option<&Lesson> {
        self.rows.get(&id)
    }

    /// All lessons, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Lesson> {
        self.rows.values()
    }

    pub fn max_id(&self) -> Id {
        self.rows.keys().next_back().copied().unwrap_or(0)
    }

    pub fn insert(&mut self, lesson: Lesson) {
        let id = lesson.id;
        self.by_slot.entry(lesson.slot_key()).or_default().push(id);
        index_insert(&mut self.by_room, lesson.room_id, id);
        index_insert(&mut self.by_group, lesson.group_id, id);
        for &teacher_id in &lesson.teacher_ids {
            index_insert(&mut self.by_teacher, teacher_id, id);
        }
        self.rows.insert(id, lesson);
    }

    pub fn remove(&mut self, id: Id) -> Option<Lesson> {
        let lesson = self.rows.remove(&id)?;
        let slot = lesson.slot_key();
        if let Some(ids) = self.by_slot.get_mut(&slot) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_slot.remove(&slot);
            }
        }
        index_remove(&mut self.by_room, lesson.room_id, id);
        index_remove(&mut self.by_group, lesson.group_id, id);
        for &teacher_id in &lesson.teacher_ids {
            index_remove(&mut self.by_teacher, teacher_id, id);
        }
        Some(lesson)
    }

    /// First lesson (lowest id) sharing the spec's slot and matching its teachers.
    /// `spec` must already be normalized.
    pub fn find_match(&self, spec: &LessonSpec, policy: TeacherMatch) -> Option<&Lesson> {
        self.by_slot
            .get(&spec.slot_key())?
            .iter()
            .filter_map(|id| self.rows.get(id))
            .filter(|l| policy.matches(&l.teacher_ids, &spec.teacher_ids))
            .min_by_key(|l| l.id)
    }

    pub fn in_room(&self, room_id: Id) -> impl Iterator<Item = &Lesson> {
        self.by_room
            .get(&room_id)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.rows.get(id))
    }

    pub fn in_group(&self, group_id: Id) -> impl Iterator<Item = &Lesson> {
        self.by_group
            .get(&group_id)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.rows.get(id))
    }

    pub fn with_teacher(&self, teacher_id: Id) -> impl Iterator<Item = &Lesson> {
        self.by_teacher
            .get(&teacher_id)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.rows.get(id))
    }

    /// Number of lesson associations recorded for a teacher.
    pub fn teacher_link_count(&self, teacher_id: Id) -> usize {
        self.by_teacher.get(&teacher_id).map_or(0, BTreeSet::len)
    }
}

/// Sort and dedup weeks and teachers, rejecting malformed specs.
pub(crate) fn normalize_spec(mut spec: LessonSpec) -> Result<LessonSpec, EngineError> {
    if spec.teacher_ids.is_empty() {
        return Err(EngineError::InvalidInput("lesson needs at least one teacher"));
    }
    if spec.weeks.is_empty() {
        return Err(EngineError::InvalidInput("lesson weeks set is empty"));
    }
    if spec.weekday > 6 {
        return Err(EngineError::InvalidInput("weekday must be 0..=6"));
    }

    spec.weeks.sort_unstable();
    spec.weeks.dedup();
    if spec.weeks.first() == Some(&0) || spec.weeks.last().is_some_and(|w| *w > MAX_WEEK) {
        return Err(EngineError::InvalidInput("week out of range"));
    }

    spec.teacher_ids.sort_unstable();
    spec.teacher_ids.dedup();
    if spec.teacher_ids.len() > MAX_TEACHERS_PER_LESSON {
        return Err(EngineError::LimitExceeded("too many teachers on lesson"));
    }
    Ok(spec)
}

/// Order by `(weekday, call_id)`, ties by id.
pub(crate) fn sort_by_slot(lessons: &mut [Lesson]) {
    lessons.sort_by_key(|l| (l.weekday, l.call_id, l.id));
}
