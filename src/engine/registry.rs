use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// A reference row with a natural uniqueness key.
pub trait Reference: Clone + Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Send + Sync + 'static;
    const KIND: &'static str;

    fn id(&self) -> Id;
    fn key(&self) -> Self::Key;
    fn into_event(self) -> Event;
    fn table(refs: &References) -> &Table<Self>;
}

/// Creation input for a reference row: everything but the identity.
pub trait Draft {
    type Row: Reference;

    fn key(&self) -> <Self::Row as Reference>::Key;
    fn into_row(self, id: Id) -> Self::Row;
    /// Shape checks plus parent existence.
    fn validate(&self, refs: &References) -> Result<(), EngineError>;
}

/// One reference table: rows by id plus a unique index on the natural key.
pub struct Table<R: Reference> {
    rows: DashMap<Id, R>,
    by_key: DashMap<R::Key, Id>,
    /// Serializes inserts so the key check and the write cannot interleave.
    insert_lock: Mutex<()>,
}

impl<R: Reference> Default for Table<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Reference> Table<R> {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            by_key: DashMap::new(),
            insert_lock: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: Id) -> Option<R> {
        self.rows.get(&id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: Id) -> bool {
        self.rows.contains_key(&id)
    }

    pub fn find(&self, key: &R::Key) -> Option<R> {
        let id = *self.by_key.get(key)?;
        self.get(id)
    }

    pub fn contains_key(&self, key: &R::Key) -> bool {
        self.by_key.contains_key(key)
    }

    /// Rows matching `pred`, ordered by id.
    pub fn filter(&self, pred: impl Fn(&R) -> bool) -> Vec<R> {
        let mut rows: Vec<R> = self
            .rows
            .iter()
            .filter(|e| pred(e.value()))
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by_key(|r| r.id());
        rows
    }

    pub fn all(&self) -> Vec<R> {
        self.filter(|_| true)
    }

    pub fn max_id(&self) -> Id {
        self.rows.iter().map(|e| *e.key()).max().unwrap_or(0)
    }

    /// Install a persisted row. Returns `false` if the key is already taken;
    /// replay keeps the first writer.
    pub(super) fn apply(&self, row: R) -> bool {
        match self.by_key.entry(row.key()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let id = row.id();
                self.rows.insert(id, row);
                slot.insert(id);
                true
            }
        }
    }

    pub(super) async fn lock_inserts(&self) -> MutexGuard<'_, ()> {
        self.insert_lock.lock().await
    }
}

/// Every reference table, in dependency order.
#[derive(Default)]
pub struct References {
    pub periods: Table<Period>,
    pub calls: Table<LessonCall>,
    pub campuses: Table<Campus>,
    pub institutes: Table<Institute>,
    pub degrees: Table<Degree>,
    pub groups: Table<Group>,
    pub rooms: Table<Room>,
    pub teachers: Table<Teacher>,
    pub disciplines: Table<Discipline>,
    pub lesson_types: Table<LessonType>,
}

impl References {
    /// Apply a reference creation event. Returns `false` for non-reference events.
    pub(super) fn apply_event(&self, event: &Event) -> bool {
        match event {
            Event::PeriodCreated(r) => self.periods.apply(r.clone()),
            Event::CallCreated(r) => self.calls.apply(r.clone()),
            Event::CampusCreated(r) => self.campuses.apply(r.clone()),
            Event::InstituteCreated(r) => self.institutes.apply(r.clone()),
            Event::DegreeCreated(r) => self.degrees.apply(r.clone()),
            Event::GroupCreated(r) => self.groups.apply(r.clone()),
            Event::RoomCreated(r) => self.rooms.apply(r.clone()),
            Event::TeacherCreated(r) => self.teachers.apply(r.clone()),
            Event::DisciplineCreated(r) => self.disciplines.apply(r.clone()),
            Event::LessonTypeCreated(r) => self.lesson_types.apply(r.clone()),
            Event::LessonCreated(_) | Event::LessonDeleted { .. } | Event::Committed(_) => false,
        }
    }

    /// Creation events that rebuild every table, parents before children.
    pub(super) fn snapshot_events(&self) -> Vec<Event> {
        fn dump<R: Reference>(table: &Table<R>, events: &mut Vec<Event>) {
            events.extend(table.all().into_iter().map(R::into_event));
        }
        let mut events = Vec::new();
        dump(&self.periods, &mut events);
        dump(&self.calls, &mut events);
        dump(&self.campuses, &mut events);
        dump(&self.institutes, &mut events);
        dump(&self.degrees, &mut events);
        dump(&self.groups, &mut events);
        dump(&self.rooms, &mut events);
        dump(&self.teachers, &mut events);
        dump(&self.disciplines, &mut events);
        dump(&self.lesson_types, &mut events);
        events
    }

    pub(super) fn max_id(&self) -> Id {
        [
            self.periods.max_id(),
            self.calls.max_id(),
            self.campuses.max_id(),
            self.institutes.max_id(),
            self.degrees.max_id(),
            self.groups.max_id(),
            self.rooms.max_id(),
            self.teachers.max_id(),
            self.disciplines.max_id(),
            self.lesson_types.max_id(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    /// Block all reference inserts. Fixed order; `resolve` never holds two.
    pub(super) async fn lock_all_inserts(&self) -> Vec<MutexGuard<'_, ()>> {
        vec![
            self.periods.lock_inserts().await,
            self.calls.lock_inserts().await,
            self.campuses.lock_inserts().await,
            self.institutes.lock_inserts().await,
            self.degrees.lock_inserts().await,
            self.groups.lock_inserts().await,
            self.rooms.lock_inserts().await,
            self.teachers.lock_inserts().await,
            self.disciplines.lock_inserts().await,
            self.lesson_types.lock_inserts().await,
        ]
    }
}

pub(super) fn require<R: Reference>(table: &Table<R>, id: Id) -> Result<(), EngineError> {
    if table.contains(id) {
        Ok(())
    } else {
        Err(EngineError::UnknownReference { kind: R::KIND, id })
    }
}

fn check_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    /// Look up a reference row by its natural key, inserting it if absent.
    ///
    /// An existing row is returned unchanged; the draft's other attributes
    /// never overwrite it. A concurrent insert of the same key surfaces as a
    /// `UniqueViolation` from the table and is answered by re-reading the
    /// winner, so every caller sees the same row.
    pub async fn resolve<D: Draft>(&self, draft: D) -> Result<D::Row, EngineError> {
        draft.validate(&self.refs)?;
        let table = D::Row::table(&self.refs);
        let key = draft.key();
        if let Some(row) = table.find(&key) {
            return Ok(row);
        }

        let row = draft.into_row(self.next_id());
        match self.insert_unique(table, row).await {
            Err(EngineError::UniqueViolation { kind }) => {
                warn!(kind, "concurrent insert lost the race, reading existing row");
                metrics::counter!(crate::observability::UNIQUE_RETRIES_TOTAL, "kind" => kind)
                    .increment(1);
                table
                    .find(&key)
                    .ok_or(EngineError::UniqueViolation { kind })
            }
            other => other,
        }
    }

    /// Insert under the table's uniqueness constraint.
    async fn insert_unique<R: Reference>(&self, table: &Table<R>, row: R) -> Result<R, EngineError> {
        let _guard = table.lock_inserts().await;
        if table.contains_key(&row.key()) {
            return Err(EngineError::UniqueViolation { kind: R::KIND });
        }
        self.wal_append(&row.clone().into_event()).await?;
        table.apply(row.clone());
        debug!(kind = R::KIND, id = row.id(), "reference created");
        Ok(row)
    }

    /// Foreign-key check for a lesson about to be written.
    pub(super) fn check_lesson_refs(&self, spec: &LessonSpec) -> Result<(), EngineError> {
        require(&self.refs.groups, spec.group_id)?;
        require(&self.refs.rooms, spec.room_id)?;
        require(&self.refs.disciplines, spec.discipline_id)?;
        require(&self.refs.calls, spec.call_id)?;
        require(&self.refs.lesson_types, spec.lesson_type_id)?;
        for &teacher_id in &spec.teacher_ids {
            require(&self.refs.teachers, teacher_id)?;
        }
        Ok(())
    }

    /// Ids of every group carrying `name`.
    pub(super) fn group_ids_named(&self, name: &str) -> Vec<Id> {
        self.refs
            .groups
            .filter(|g| g.name == name)
            .into_iter()
            .map(|g| g.id)
            .collect()
    }
}

// ── Row kinds ────────────────────────────────────────────────────

impl Reference for Period {
    type Key = (i32, i32, u8);
    const KIND: &'static str = "period";

    fn id(&self) -> Id {
        self.id
    }
    fn key(&self) -> Self::Key {
        (self.year_start, self.year_end, self.semester)
    }
    fn into_event(self) -> Event {
        Event::PeriodCreated(self)
    }
    fn table(refs: &References) -> &Table<Self> {
        &refs.periods
    }
}

impl Draft for NewPeriod {
    type Row = Period;

    fn key(&self) -> (i32, i32, u8) {
        (self.year_start, self.year_end, self.semester)
    }
    fn into_row(self, id: Id) -> Period {
        Period {
            id,
            year_start: self.year_start,
            year_end: self.year_end,
            semester: self.semester,
            starts_on: self.starts_on,
            week_count: self.week_count,
        }
    }
    fn validate(&self, _refs: &References) -> Result<(), EngineError> {
        if self.year_end < self.year_start {
            return Err(EngineError::InvalidInput("period ends before it starts"));
        }
        if self.semester == 0 {
            return Err(EngineError::InvalidInput("semester is 1-based"));
        }
        if self.week_count == 0 || self.week_count > MAX_WEEK {
            return Err(EngineError::InvalidInput("period week count out of range"));
        }
        Ok(())
    }
}

impl Reference for LessonCall {
    type Key = (chrono::NaiveTime, chrono::NaiveTime, u8);
    const KIND: &'static str = "lesson call";

    fn id(&self) -> Id {
        self.id
    }
    fn key(&self) -> Self::Key {
        (self.time_start, self.time_end, self.num)
    }
    fn into_event(self) -> Event {
        Event::CallCreated(self)
    }
    fn table(refs: &References) -> &Table<Self> {
        &refs.calls
    }
}

impl Draft for NewLessonCall {
    type Row = LessonCall;

    fn key(&self) -> (chrono::NaiveTime, chrono::NaiveTime, u8) {
        (self.time_start, self.time_end, self.num)
    }
    fn into_row(self, id: Id) -> LessonCall {
        LessonCall {
            id,
            time_start: self.time_start,
            time_end: self.time_end,
            num: self.num,
        }
    }
    fn validate(&self, _refs: &References) -> Result<(), EngineError> {
        if self.time_start >= self.time_end {
            return Err(EngineError::InvalidInput("lesson call must end after it starts"));
        }
        Ok(())
    }
}

impl Reference for Campus {
    type Key = String;
    const KIND: &'static str = "campus";

    fn id(&self) -> Id {
        self.id
    }
    fn key(&self) -> String {
        self.name.clone()
    }
    fn into_event(self) -> Event {
        Event::CampusCreated(self)
    }
    fn table(refs: &References) -> &Table<Self> {
        &refs.campuses
    }
}

impl Draft for NewCampus {
    type Row = Campus;

    fn key(&self) -> String {
        self.name.clone()
    }
    fn into_row(self, id: Id) -> Campus {
        Campus {
            id,
            name: self.name,
            short_name: self.short_name,
        }
    }
    fn validate(&self, _refs: &References) -> Result<(), EngineError> {
        check_name(&self.name)?;
        if let Some(short) = &self.short_name {
            check_name(short)?;
        }
        Ok(())
    }
}

impl Reference for Group {
    type Key = (String, Id, Id);
    const KIND: &'static str = "group";

    fn id(&self) -> Id {
        self.id
    }
    fn key(&self) -> Self::Key {
        (self.name.clone(), self.degree_id, self.institute_id)
    }
    fn into_event(self) -> Event {
        Event::GroupCreated(self)
    }
    fn table(refs: &References) -> &Table<Self> {
        &refs.groups
    }
}

impl Draft for NewGroup {
    type Row = Group;

    fn key(&self) -> (String, Id, Id) {
        (self.name.clone(), self.degree_id, self.institute_id)
    }
    fn into_row(self, id: Id) -> Group {
        Group {
            id,
            name: self.name,
            degree_id: self.degree_id,
            institute_id: self.institute_id,
        }
    }
    fn validate(&self, refs: &References) -> Result<(), EngineError> {
        check_name(&self.name)?;
        require(&refs.degrees, self.degree_id)?;
        require(&refs.institutes, self.institute_id)
    }
}

impl Reference for Room {
    type Key = (String, Option<Id>);
    const KIND: &'static str = "room";

    fn id(&self) -> Id {
        self.id
    }
    fn key(&self) -> Self::Key {
        (self.name.clone(), self.campus_id)
    }
    fn into_event(self) -> Event {
        Event::RoomCreated(self)
    }
    fn table(refs: &References) -> &Table<Self> {
        &refs.rooms
    }
}

impl Draft for NewRoom {
    type Row = Room;

    fn key(&self) -> (String, Option<Id>) {
        (self.name.clone(), self.campus_id)
    }
    fn into_row(self, id: Id) -> Room {
        Room {
            id,
            name: self.name,
            campus_id: self.campus_id,
        }
    }
    fn validate(&self, refs: &References) -> Result<(), EngineError> {
        check_name(&self.name)?;
        match self.campus_id {
            Some(campus_id) => require(&refs.campuses, campus_id),
            None => Ok(()),
        }
    }
}

// Name-keyed kinds share one shape.

impl Reference for Institute {
    type Key = String;
    const KIND: &'static str = "institute";

    fn id(&self) -> Id {
        self.id
    }
    fn key(&self) -> String {
        self.name.clone()
    }
    fn into_event(self) -> Event {
        Event::InstituteCreated(self)
    }
    fn table(refs: &References) -> &Table<Self> {
        &refs.institutes
    }
}

impl Draft for NewInstitute {
    type Row = Institute;

    fn key(&self) -> String {
        self.name.clone()
    }
    fn into_row(self, id: Id) -> Institute {
        Institute { id, name: self.name }
    }
    fn validate(&self, _refs: &References) -> Result<(), EngineError> {
        check_name(&self.name)
    }
}

impl Reference for Degree {
    type Key = String;
    const KIND: &'static str = "degree";

    fn id(&self) -> Id {
        self.id
    }
    fn key(&self) -> String {
        self.name.clone()
    }
    fn into_event(self) -> Event {
        Event::DegreeCreated(self)
    }
    fn table(refs: &References) -> &Table<Self> {
        &refs.degrees
    }
}

impl Draft for NewDegree {
    type Row = Degree;

    fn key(&self) -> String {
        self.name.clone()
    }
    fn into_row(self, id: Id) -> Degree {
        Degree { id, name: self.name }
    }
    fn validate(&self, _refs: &References) -> Result<(), EngineError> {
        check_name(&self.name)
    }
}

impl Reference for Teacher {
    type Key = String;
    const KIND: &'static str = "teacher";

    fn id(&self) -> Id {
        self.id
    }
    fn key(&self) -> String {
        self.name.clone()
    }
    fn into_event(self) -> Event {
        Event::TeacherCreated(self)
    }
    fn table(refs: &References) -> &Table<Self> {
        &refs.teachers
    }
}

impl Draft for NewTeacher {
    type Row = Teacher;

    fn key(&self) -> String {
        self.name.clone()
    }
    fn into_row(self, id: Id) -> Teacher {
        Teacher { id, name: self.name }
    }
    fn validate(&self, _refs: &References) -> Result<(), EngineError> {
        check_name(&self.name)
    }
}

impl Reference for Discipline {
    type Key = String;
    const KIND: &'static str = "discipline";

    fn id(&self) -> Id {
        self.id
    }
    fn key(&self) -> String {
        self.name.clone()
    }
    fn into_event(self) -> Event {
        Event::DisciplineCreated(self)
    }
    fn table(refs: &References) -> &Table<Self> {
        &refs.disciplines
    }
}

impl Draft for NewDiscipline {
    type Row = Discipline;

    fn key(&self) -> String {
        self.name.clone()
    }
    fn into_row(self, id: Id) -> Discipline {
        Discipline { id, name: self.name }
    }
    fn validate(&self, _refs: &References) -> Result<(), EngineError> {
        check_name(&self.name)
    }
}

impl Reference for LessonType {
    type Key = String;
    const KIND: &'static str = "lesson type";

    fn id(&self) -> Id {
        self.id
    }
    fn key(&self) -> String {
        self.name.clone()
    }
    fn into_event(self) -> Event {
        Event::LessonTypeCreated(self)
    }
    fn table(refs: &References) -> &Table<Self> {
        &refs.lesson_types
    }
}

impl Draft for NewLessonType {
    type Row = LessonType;

    fn key(&self) -> String {
        self.name.clone()
    }
    fn into_row(self, id: Id) -> LessonType {
        LessonType { id, name: self.name }
    }
    fn validate(&self, _refs: &References) -> Result<(), EngineError> {
        check_name(&self.name)
    }
}
