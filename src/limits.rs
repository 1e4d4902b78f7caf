use crate::model::Week;

/// Max length of any reference name (teacher, room, group, ...).
pub const MAX_NAME_LEN: usize = 512;

/// Highest week index a lesson may recur in.
pub const MAX_WEEK: Week = 53;

pub const MAX_TEACHERS_PER_LESSON: usize = 32;

/// Max lessons accepted by a single group re-import.
pub const MAX_IMPORT_LESSONS: usize = 10_000;

/// Max length of a search substring.
pub const MAX_SEARCH_LEN: usize = 256;

pub const MAX_WORKING_DAYS: u32 = 7;
