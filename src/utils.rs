use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Profile mode for the application (dev or prod)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Dev,
    Prod,
}

impl Profile {
    fn app_name(&self) -> &'static str {
        match self {
            Profile::Dev => "eras-dev",
            Profile::Prod => "eras",
        }
    }
}

/// Get the configuration directory path
/// If profile is Dev, uses "eras-dev" instead of "eras"
pub fn get_config_dir(profile: Profile) -> Option<PathBuf> {
    ProjectDirs::from("com", "eras", profile.app_name())
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the data directory path
pub fn get_data_dir(profile: Profile) -> Option<PathBuf> {
    ProjectDirs::from("com", "eras", profile.app_name())
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Expand `~` in a path string to the user's home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse a date string in ISO 8601 format (YYYY-MM-DD)
pub fn parse_date(date_str: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
}

/// Today's date as seen by the planner
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Hour a task starts at when its due date carries no time component
pub const DEFAULT_START_HOUR: u32 = 9;

/// Resolve a task due date to an instant.
///
/// Accepts RFC 3339 (`2026-01-20T14:30:00Z`), a naive date-time
/// (`2026-01-20T14:30:00`, read as UTC) or a bare date, which starts at
/// [`DEFAULT_START_HOUR`] UTC.
pub fn parse_due(due: &str) -> Option<DateTime<Utc>> {
    let due = due.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(due) {
        return Some(instant.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(due, format) {
            return Some(naive.and_utc());
        }
    }
    let date = parse_date(due).ok()?;
    let nine = NaiveTime::from_hms_opt(DEFAULT_START_HOUR, 0, 0)?;
    Some(date.and_time(nine).and_utc())
}

/// Calendar day of a due date, if it parses
pub fn due_day(due: &str) -> Option<NaiveDate> {
    parse_due(due).map(|instant| instant.date_naive())
}

/// Shorten `text` to at most `max` characters, adding an ellipsis when cut
pub fn truncate(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn bare_date_defaults_to_nine_utc() {
        let instant = parse_due("2026-01-20").unwrap();
        assert_eq!(instant.date_naive(), parse_date("2026-01-20").unwrap());
        assert_eq!(instant.hour(), 9);
        assert_eq!(instant.minute(), 0);
    }

    #[test]
    fn rfc3339_keeps_its_instant() {
        let instant = parse_due("2026-01-20T14:30:00+02:00").unwrap();
        assert_eq!(instant.to_rfc3339(), "2026-01-20T12:30:00+00:00");
        assert!(parse_due("next tuesday").is_none());
    }

    #[test]
    fn truncate_adds_ellipsis() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("plan my marathon training", 10), "plan my m…");
    }
}
