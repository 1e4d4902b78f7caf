use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::calendar::TermCalendar;
use crate::engine::{Capacity, Engine, EngineError, ImportSummary, Reference};
use crate::model::*;

/// One request, as read from a JSON line: `{"op": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    ResolvePeriod(NewPeriod),
    ResolveCall(NewLessonCall),
    ResolveCampus(NewCampus),
    ResolveInstitute(NewInstitute),
    ResolveDegree(NewDegree),
    ResolveGroup(NewGroup),
    ResolveRoom(NewRoom),
    ResolveTeacher(NewTeacher),
    ResolveDiscipline(NewDiscipline),
    ResolveLessonType(NewLessonType),
    UpsertLesson {
        lesson: LessonSpec,
        #[serde(default)]
        teacher_match: Option<TeacherMatch>,
    },
    DeleteLesson(LessonDelete),
    ClearGroup {
        group: String,
    },
    ReplaceGroup {
        group: String,
        lessons: Vec<LessonSpec>,
        #[serde(default)]
        teacher_match: Option<TeacherMatch>,
    },
    Lesson {
        id: Id,
    },
    LessonsByRoom {
        room_id: Id,
    },
    LessonsByRoomAndDate {
        room_id: Id,
        date: NaiveDate,
        period_id: Id,
    },
    LessonsByRoomAndWeek {
        room_id: Id,
        week: Week,
    },
    LessonsByTeacher {
        teacher_id: Id,
    },
    LessonsByGroup {
        group_id: Id,
    },
    SearchTeachers {
        query: String,
    },
    SearchRooms {
        query: String,
    },
    RoomByNameAndCampus {
        name: String,
        #[serde(default)]
        campus: Option<String>,
    },
    Groups,
    Group {
        name: String,
    },
    Campuses,
    CampusRooms {
        campus_id: Id,
    },
    Calls,
    Periods,
    /// Nominal capacity unless `period_id` is given.
    RoomOccupancy {
        room_id: Id,
        #[serde(default)]
        period_id: Option<Id>,
    },
    CompactWal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Response {
    Period(Period),
    Call(LessonCall),
    Campus(Campus),
    Institute(Institute),
    Degree(Degree),
    Group(Option<Group>),
    Room(Option<Room>),
    Teacher(Teacher),
    Discipline(Discipline),
    LessonType(LessonType),
    Lesson(Option<Lesson>),
    Lessons(Vec<Lesson>),
    Removed(usize),
    Import(ImportSummary),
    Teachers(Vec<Teacher>),
    Rooms(Vec<Room>),
    Groups(Vec<Group>),
    Campuses(Vec<Campus>),
    Calls(Vec<LessonCall>),
    Periods(Vec<Period>),
    Occupancy { percent: f64, slots: u64 },
    Compacted { records: usize },
}

/// Per-process settings applied where a command leaves them open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDefaults {
    pub teacher_match: TeacherMatch,
    pub working_days: u32,
    /// Deadline for `replace_group`.
    pub timeout: Option<Duration>,
}

impl Default for CommandDefaults {
    fn default() -> Self {
        Self {
            teacher_match: TeacherMatch::Exact,
            working_days: 6,
            timeout: None,
        }
    }
}

pub async fn execute(
    engine: &Engine,
    cmd: Command,
    defaults: &CommandDefaults,
) -> Result<Response, EngineError> {
    let policy = |requested: Option<TeacherMatch>| requested.unwrap_or(defaults.teacher_match);
    let response = match cmd {
        Command::ResolvePeriod(d) => Response::Period(engine.resolve(d).await?),
        Command::ResolveCall(d) => Response::Call(engine.resolve(d).await?),
        Command::ResolveCampus(d) => Response::Campus(engine.resolve(d).await?),
        Command::ResolveInstitute(d) => Response::Institute(engine.resolve(d).await?),
        Command::ResolveDegree(d) => Response::Degree(engine.resolve(d).await?),
        Command::ResolveGroup(d) => Response::Group(Some(engine.resolve(d).await?)),
        Command::ResolveRoom(d) => Response::Room(Some(engine.resolve(d).await?)),
        Command::ResolveTeacher(d) => Response::Teacher(engine.resolve(d).await?),
        Command::ResolveDiscipline(d) => Response::Discipline(engine.resolve(d).await?),
        Command::ResolveLessonType(d) => Response::LessonType(engine.resolve(d).await?),

        Command::UpsertLesson {
            lesson,
            teacher_match,
        } => Response::Lesson(Some(engine.upsert_lesson(lesson, policy(teacher_match)).await?)),
        Command::DeleteLesson(cmd) => Response::Removed(engine.delete_lesson(&cmd).await?),
        Command::ClearGroup { group } => Response::Removed(engine.clear_group_schedule(&group).await?),
        Command::ReplaceGroup {
            group,
            lessons,
            teacher_match,
        } => Response::Import(
            engine
                .replace_group_schedule(&group, lessons, policy(teacher_match), defaults.timeout)
                .await?,
        ),

        Command::Lesson { id } => Response::Lesson(engine.lesson(id).await),
        Command::LessonsByRoom { room_id } => Response::Lessons(engine.lessons_by_room(room_id).await),
        Command::LessonsByRoomAndDate {
            room_id,
            date,
            period_id,
        } => {
            let period = engine
                .get::<Period>(period_id)
                .ok_or(EngineError::UnknownReference {
                    kind: Period::KIND,
                    id: period_id,
                })?;
            let calendar = TermCalendar::from(&period);
            Response::Lessons(engine.lessons_by_room_and_date(room_id, date, &calendar).await)
        }
        Command::LessonsByRoomAndWeek { room_id, week } => {
            Response::Lessons(engine.lessons_by_room_and_week(room_id, week).await)
        }
        Command::LessonsByTeacher { teacher_id } => {
            Response::Lessons(engine.lessons_by_teacher(teacher_id).await)
        }
        Command::LessonsByGroup { group_id } => Response::Lessons(engine.lessons_by_group(group_id).await),
        Command::SearchTeachers { query } => Response::Teachers(engine.search_teachers(&query)?),
        Command::SearchRooms { query } => Response::Rooms(engine.search_rooms(&query)?),
        Command::RoomByNameAndCampus { name, campus } => {
            Response::Room(engine.room_by_name_and_campus(&name, campus.as_deref()))
        }
        Command::Groups => Response::Groups(engine.groups()),
        Command::Group { name } => Response::Group(engine.group(&name)),
        Command::Campuses => Response::Campuses(engine.campuses()),
        Command::CampusRooms { campus_id } => Response::Rooms(engine.campus_rooms(campus_id)),
        Command::Calls => Response::Calls(engine.calls()),
        Command::Periods => Response::Periods(engine.periods()),
        Command::RoomOccupancy { room_id, period_id } => {
            let capacity = match period_id {
                Some(period_id) => engine.derived_capacity(period_id, defaults.working_days)?,
                None => Capacity::NOMINAL,
            };
            Response::Occupancy {
                percent: engine.room_occupancy(room_id, &capacity).await?,
                slots: capacity.slots(),
            }
        }
        Command::CompactWal => Response::Compacted {
            records: engine.compact_wal().await?,
        },
    };
    Ok(response)
}

/// Render one reply line: `{"ok":true,"result":...}` or `{"ok":false,"error":"..."}`.
pub fn reply_line(result: &Result<Response, EngineError>) -> String {
    let value = match result {
        Ok(response) => json!({ "ok": true, "result": response }),
        Err(e) => error_value(&e.to_string()),
    };
    value.to_string()
}

/// Reply for a line that did not parse as a command.
pub fn parse_error_line(err: &serde_json::Error) -> String {
    error_value(&format!("invalid command: {err}")).to_string()
}

fn error_value(message: &str) -> serde_json::Value {
    json!({ "ok": false, "error": message })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_wal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("timetable_test_command");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn parse(line: &str) -> Command {
        serde_json::from_str(line).unwrap()
    }

    async fn run(engine: &Engine, line: &str) -> serde_json::Value {
        let result = execute(engine, parse(line), &CommandDefaults::default()).await;
        serde_json::from_str(&reply_line(&result)).unwrap()
    }

    #[test]
    fn parses_tagged_commands() {
        assert_eq!(
            parse(r#"{"op":"resolve_teacher","name":"Ivanova"}"#),
            Command::ResolveTeacher(NewTeacher {
                name: "Ivanova".into()
            })
        );
        assert_eq!(parse(r#"{"op":"groups"}"#), Command::Groups);
        assert_eq!(
            parse(r#"{"op":"room_by_name_and_campus","name":"A-1"}"#),
            Command::RoomByNameAndCampus {
                name: "A-1".into(),
                campus: None
            }
        );
        match parse(r#"{"op":"resolve_period","year_start":2024,"year_end":2025,"semester":1,"starts_on":"2024-09-02"}"#) {
            Command::ResolvePeriod(p) => assert_eq!(p.week_count, 16),
            other => panic!("unexpected {other:?}"),
        }
        assert!(serde_json::from_str::<Command>(r#"{"op":"drop_table"}"#).is_err());
    }

    #[tokio::test]
    async fn import_and_query_over_commands() {
        let engine = Engine::new(test_wal_path("commands.wal")).unwrap();

        let campus = run(&engine, r#"{"op":"resolve_campus","name":"Main","short_name":"M"}"#).await;
        assert_eq!(campus["ok"], true);
        assert_eq!(campus["result"]["kind"], "campus");
        let campus_id = campus["result"]["data"]["id"].as_u64().unwrap();

        let institute = run(&engine, r#"{"op":"resolve_institute","name":"IIT"}"#).await;
        let degree = run(&engine, r#"{"op":"resolve_degree","name":"Bachelor"}"#).await;
        let group = run(
            &engine,
            &format!(
                r#"{{"op":"resolve_group","name":"G-1","degree_id":{},"institute_id":{}}}"#,
                degree["result"]["data"]["id"], institute["result"]["data"]["id"]
            ),
        )
        .await;
        let room = run(
            &engine,
            &format!(r#"{{"op":"resolve_room","name":"A-1","campus_id":{campus_id}}}"#),
        )
        .await;
        let teacher = run(&engine, r#"{"op":"resolve_teacher","name":"Petrov"}"#).await;
        let discipline = run(&engine, r#"{"op":"resolve_discipline","name":"Physics"}"#).await;
        let lesson_type = run(&engine, r#"{"op":"resolve_lesson_type","name":"Lab"}"#).await;
        let call = run(
            &engine,
            r#"{"op":"resolve_call","time_start":"09:00:00","time_end":"10:30:00","num":1}"#,
        )
        .await;

        let lesson = json!({
            "op": "upsert_lesson",
            "lesson": {
                "teacher_ids": [teacher["result"]["data"]["id"]],
                "group_id": group["result"]["data"]["id"],
                "room_id": room["result"]["data"]["id"],
                "discipline_id": discipline["result"]["data"]["id"],
                "call_id": call["result"]["data"]["id"],
                "lesson_type_id": lesson_type["result"]["data"]["id"],
                "weekday": 2,
                "weeks": [1, 2, 3]
            }
        });
        let first = run(&engine, &lesson.to_string()).await;
        let second = run(&engine, &lesson.to_string()).await;
        assert_eq!(first["ok"], true);
        assert_eq!(first["result"]["data"], second["result"]["data"]);

        let room_id = room["result"]["data"]["id"].as_u64().unwrap();
        let occupancy = run(
            &engine,
            &format!(r#"{{"op":"room_occupancy","room_id":{room_id}}}"#),
        )
        .await;
        assert_eq!(occupancy["result"]["data"]["slots"], 576);
        let percent = occupancy["result"]["data"]["percent"].as_f64().unwrap();
        assert!((percent - 3.0 / 576.0 * 100.0).abs() < 1e-9);

        let found = run(&engine, r#"{"op":"search_teachers","query":"petr"}"#).await;
        assert_eq!(found["result"]["data"].as_array().unwrap().len(), 1);

        let cleared = run(&engine, r#"{"op":"clear_group","group":"G-1"}"#).await;
        assert_eq!(cleared["result"], json!({"kind": "removed", "data": 1}));
    }

    #[tokio::test]
    async fn errors_render_as_replies() {
        let engine = Engine::new(test_wal_path("command_errors.wal")).unwrap();

        let reply = run(&engine, r#"{"op":"resolve_room","name":"A-1","campus_id":42}"#).await;
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["error"], "unknown campus: 42");

        let reply = run(
            &engine,
            r#"{"op":"lessons_by_room_and_date","room_id":1,"date":"2024-09-02","period_id":7}"#,
        )
        .await;
        assert_eq!(reply["error"], "unknown period: 7");

        let err = serde_json::from_str::<Command>("{not json").unwrap_err();
        let line: serde_json::Value = serde_json::from_str(&parse_error_line(&err)).unwrap();
        assert_eq!(line["ok"], false);
        assert!(line["error"].as_str().unwrap().starts_with("invalid command"));
    }
}
