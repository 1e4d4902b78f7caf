use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Autogenerated row identity, shared sequence across all tables.
pub type Id = u64;

/// 1-based week index within a period.
pub type Week = u8;

/// Day of week, Monday = 0 .. Sunday = 6.
pub type Weekday = u8;

// ── Reference rows ───────────────────────────────────────────────

/// An academic term. Natural key: `(year_start, year_end, semester)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub id: Id,
    pub year_start: i32,
    pub year_end: i32,
    pub semester: u8,
    /// Any date inside week 1.
    pub starts_on: NaiveDate,
    pub week_count: Week,
}

/// A numbered class-time slot within a day. Natural key: `(time_start, time_end, num)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonCall {
    pub id: Id,
    pub time_start: NaiveTime,
    pub time_end: NaiveTime,
    pub num: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campus {
    pub id: Id,
    pub name: String,
    pub short_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institute {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degree {
    pub id: Id,
    pub name: String,
}

/// Natural key: `(name, degree_id, institute_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: Id,
    pub name: String,
    pub degree_id: Id,
    pub institute_id: Id,
}

/// Natural key: `(name, campus_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Id,
    pub name: String,
    pub campus_id: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teacher {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discipline {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonType {
    pub id: Id,
    pub name: String,
}

// ── Creation drafts (rows without identity) ──────────────────────

fn default_week_count() -> Week {
    16
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPeriod {
    pub year_start: i32,
    pub year_end: i32,
    pub semester: u8,
    pub starts_on: NaiveDate,
    #[serde(default = "default_week_count")]
    pub week_count: Week,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLessonCall {
    pub time_start: NaiveTime,
    pub time_end: NaiveTime,
    pub num: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCampus {
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInstitute {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDegree {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
    pub degree_id: Id,
    pub institute_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoom {
    pub name: String,
    #[serde(default)]
    pub campus_id: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTeacher {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDiscipline {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLessonType {
    pub name: String,
}

// ── Lessons ──────────────────────────────────────────────────────

/// A recurring timetable entry: one weekday, one call, a subset of weeks.
///
/// `weeks` and `teacher_ids` are kept sorted and duplicate-free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: Id,
    pub weekday: Weekday,
    pub call_id: Id,
    pub weeks: Vec<Week>,
    pub subgroup: u8,
    pub group_id: Id,
    pub room_id: Id,
    pub discipline_id: Id,
    pub lesson_type_id: Id,
    pub teacher_ids: Vec<Id>,
}

impl Lesson {
    pub fn from_spec(id: Id, spec: LessonSpec) -> Self {
        Self {
            id,
            weekday: spec.weekday,
            call_id: spec.call_id,
            weeks: spec.weeks,
            subgroup: spec.subgroup,
            group_id: spec.group_id,
            room_id: spec.room_id,
            discipline_id: spec.discipline_id,
            lesson_type_id: spec.lesson_type_id,
            teacher_ids: spec.teacher_ids,
        }
    }

    pub fn is_active_in(&self, week: Week) -> bool {
        self.weeks.binary_search(&week).is_ok()
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            lesson_type_id: self.lesson_type_id,
            group_id: self.group_id,
            discipline_id: self.discipline_id,
            room_id: self.room_id,
            call_id: self.call_id,
            weekday: self.weekday,
            subgroup: self.subgroup,
            weeks: self.weeks.clone(),
        }
    }
}

/// Upsert input: resolved foreign keys plus the recurrence pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSpec {
    pub teacher_ids: Vec<Id>,
    pub group_id: Id,
    pub room_id: Id,
    pub discipline_id: Id,
    pub call_id: Id,
    pub lesson_type_id: Id,
    pub weekday: Weekday,
    #[serde(default)]
    pub subgroup: u8,
    pub weeks: Vec<Week>,
}

impl LessonSpec {
    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            lesson_type_id: self.lesson_type_id,
            group_id: self.group_id,
            discipline_id: self.discipline_id,
            room_id: self.room_id,
            call_id: self.call_id,
            weekday: self.weekday,
            subgroup: self.subgroup,
            weeks: self.weeks.clone(),
        }
    }
}

/// Every identity field of a lesson except its teacher set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub lesson_type_id: Id,
    pub group_id: Id,
    pub discipline_id: Id,
    pub room_id: Id,
    pub call_id: Id,
    pub weekday: Weekday,
    pub subgroup: u8,
    pub weeks: Vec<Week>,
}

/// Exact-match delete by group name, call slot and weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonDelete {
    pub group: String,
    pub time_start: NaiveTime,
    pub time_end: NaiveTime,
    pub num: u8,
    pub weekday: Weekday,
}

/// How the teacher set participates in lesson identity during upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeacherMatch {
    /// Existing lesson must carry exactly the requested teachers.
    #[default]
    Exact,
    /// Any shared teacher is enough (legacy importer behaviour).
    Overlap,
}

impl TeacherMatch {
    /// Both slices must be sorted.
    pub fn matches(self, existing: &[Id], requested: &[Id]) -> bool {
        match self {
            TeacherMatch::Exact => existing == requested,
            TeacherMatch::Overlap => requested
                .iter()
                .any(|t| existing.binary_search(t).is_ok()),
        }
    }
}

impl std::str::FromStr for TeacherMatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(TeacherMatch::Exact),
            "overlap" => Ok(TeacherMatch::Overlap),
            other => Err(format!("unknown teacher match policy: {other}")),
        }
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PeriodCreated(Period),
    CallCreated(LessonCall),
    CampusCreated(Campus),
    InstituteCreated(Institute),
    DegreeCreated(Degree),
    GroupCreated(Group),
    RoomCreated(Room),
    TeacherCreated(Teacher),
    DisciplineCreated(Discipline),
    LessonTypeCreated(LessonType),
    /// Lesson row together with its teacher associations.
    LessonCreated(Lesson),
    LessonDeleted { id: Id },
    /// A multi-statement transaction, replayed all-or-nothing.
    Committed(Vec<Event>),
}
