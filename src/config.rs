use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::command::CommandDefaults;
use crate::limits::MAX_WORKING_DAYS;
use crate::model::TeacherMatch;

/// Process configuration loaded from environment variables.
///
/// - `TIMETABLE_DATA_DIR`: directory holding the WAL (default `./data`)
/// - `TIMETABLE_WAL_FILE`: WAL file name inside the data dir (default `timetable.wal`)
/// - `TIMETABLE_METRICS_PORT`: Prometheus listener port (default: disabled)
/// - `TIMETABLE_COMPACT_THRESHOLD`: appends between compactions (default `1000`)
/// - `TIMETABLE_WORKING_DAYS`: days per week for derived capacity (default `6`)
/// - `TIMETABLE_TEACHER_MATCH`: `exact` or `overlap` (default `exact`)
/// - `TIMETABLE_COMMAND_TIMEOUT_MS`: deadline for group re-imports (default: none)
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub wal_file: String,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub working_days: u32,
    pub teacher_match: TeacherMatch,
    pub command_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.var, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_file: "timetable.wal".into(),
            metrics_port: None,
            compact_threshold: 1000,
            working_days: 6,
            teacher_match: TeacherMatch::Exact,
            command_timeout: None,
        }
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e: T::Err| ConfigError {
            var,
            message: format!("cannot parse {raw:?}: {e}"),
        }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build from any variable source. Unset variables take their default;
    /// malformed ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let working_days = parse::<u32>(&lookup, "TIMETABLE_WORKING_DAYS")?
            .unwrap_or(defaults.working_days);
        if working_days == 0 || working_days > MAX_WORKING_DAYS {
            return Err(ConfigError {
                var: "TIMETABLE_WORKING_DAYS",
                message: format!("{working_days} is outside 1..={MAX_WORKING_DAYS}"),
            });
        }

        Ok(Self {
            data_dir: lookup("TIMETABLE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            wal_file: lookup("TIMETABLE_WAL_FILE").unwrap_or(defaults.wal_file),
            metrics_port: parse(&lookup, "TIMETABLE_METRICS_PORT")?,
            compact_threshold: parse(&lookup, "TIMETABLE_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            working_days,
            teacher_match: parse(&lookup, "TIMETABLE_TEACHER_MATCH")?
                .unwrap_or(defaults.teacher_match),
            command_timeout: parse::<u64>(&lookup, "TIMETABLE_COMMAND_TIMEOUT_MS")?
                .map(Duration::from_millis),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_file)
    }

    pub fn command_defaults(&self) -> CommandDefaults {
        CommandDefaults {
            teacher_match: self.teacher_match,
            working_days: self.working_days,
            timeout: self.command_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/timetable.wal"));
    }

    #[test]
    fn reads_every_variable() {
        let cfg = load(&[
            ("TIMETABLE_DATA_DIR", "/var/lib/timetable"),
            ("TIMETABLE_WAL_FILE", "term.wal"),
            ("TIMETABLE_METRICS_PORT", "9100"),
            ("TIMETABLE_COMPACT_THRESHOLD", "50"),
            ("TIMETABLE_WORKING_DAYS", "5"),
            ("TIMETABLE_TEACHER_MATCH", "Overlap"),
            ("TIMETABLE_COMMAND_TIMEOUT_MS", "1500"),
        ])
        .unwrap();
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/timetable/term.wal"));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.working_days, 5);
        assert_eq!(cfg.teacher_match, TeacherMatch::Overlap);
        assert_eq!(cfg.command_timeout, Some(Duration::from_millis(1500)));

        let defaults = cfg.command_defaults();
        assert_eq!(defaults.working_days, 5);
        assert_eq!(defaults.teacher_match, TeacherMatch::Overlap);
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = load(&[("TIMETABLE_METRICS_PORT", "http")]).unwrap_err();
        assert_eq!(err.var, "TIMETABLE_METRICS_PORT");
        assert!(load(&[("TIMETABLE_TEACHER_MATCH", "fuzzy")]).is_err());
        assert!(load(&[("TIMETABLE_COMPACT_THRESHOLD", "-1")]).is_err());
    }

    #[test]
    fn working_days_range() {
        assert!(load(&[("TIMETABLE_WORKING_DAYS", "0")]).is_err());
        assert!(load(&[("TIMETABLE_WORKING_DAYS", "8")]).is_err());
        assert_eq!(load(&[("TIMETABLE_WORKING_DAYS", "7")]).unwrap().working_days, 7);
    }
}
