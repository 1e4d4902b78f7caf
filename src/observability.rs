use std::net::SocketAddr;

use crate::command::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "timetable_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "timetable_command_duration_seconds";

/// Counter: registry inserts that lost a uniqueness race and re-read the winner. Labels: kind.
pub const UNIQUE_RETRIES_TOTAL: &str = "timetable_unique_retries_total";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "timetable_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "timetable_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::ResolvePeriod(_) => "resolve_period",
        Command::ResolveCall(_) => "resolve_call",
        Command::ResolveCampus(_) => "resolve_campus",
        Command::ResolveInstitute(_) => "resolve_institute",
        Command::ResolveDegree(_) => "resolve_degree",
        Command::ResolveGroup(_) => "resolve_group",
        Command::ResolveRoom(_) => "resolve_room",
        Command::ResolveTeacher(_) => "resolve_teacher",
        Command::ResolveDiscipline(_) => "resolve_discipline",
        Command::ResolveLessonType(_) => "resolve_lesson_type",
        Command::UpsertLesson { .. } => "upsert_lesson",
        Command::DeleteLesson(_) => "delete_lesson",
        Command::ClearGroup { .. } => "clear_group",
        Command::ReplaceGroup { .. } => "replace_group",
        Command::Lesson { .. } => "lesson",
        Command::LessonsByRoom { .. } => "lessons_by_room",
        Command::LessonsByRoomAndDate { .. } => "lessons_by_room_and_date",
        Command::LessonsByRoomAndWeek { .. } => "lessons_by_room_and_week",
        Command::LessonsByTeacher { .. } => "lessons_by_teacher",
        Command::LessonsByGroup { .. } => "lessons_by_group",
        Command::SearchTeachers { .. } => "search_teachers",
        Command::SearchRooms { .. } => "search_rooms",
        Command::RoomByNameAndCampus { .. } => "room_by_name_and_campus",
        Command::Groups => "groups",
        Command::Group { .. } => "group",
        Command::Campuses => "campuses",
        Command::CampusRooms { .. } => "campus_rooms",
        Command::Calls => "calls",
        Command::Periods => "periods",
        Command::RoomOccupancy { .. } => "room_occupancy",
        Command::CompactWal => "compact_wal",
    }
}
