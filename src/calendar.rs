//! Calendar export for single tasks: Google Calendar template links and
//! minimal iCalendar files.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::Url;
use thiserror::Error;

use crate::models::Task;
use crate::utils;

const GOOGLE_TEMPLATE_URL: &str = "https://calendar.google.com/calendar/render";
const STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const MIN_EVENT_MINUTES: u32 = 15;
const ICS_LINE_LIMIT: usize = 75;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("Task '{title}' has an unreadable due date: {due}")]
    InvalidDueDate { title: String, due: String },
    #[error("Invalid calendar stamp: {0}")]
    InvalidStamp(String),
    #[error("Failed to build calendar URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Start and end of the event a task occupies.
pub fn event_window(task: &Task) -> Result<(DateTime<Utc>, DateTime<Utc>), CalendarError> {
    let start = utils::parse_due(&task.due_date).ok_or_else(|| CalendarError::InvalidDueDate {
        title: task.title.clone(),
        due: task.due_date.clone(),
    })?;
    let minutes = task.estimated_minutes.max(MIN_EVENT_MINUTES);
    Ok((start, start + Duration::minutes(i64::from(minutes))))
}

pub fn format_stamp(instant: DateTime<Utc>) -> String {
    instant.format(STAMP_FORMAT).to_string()
}

pub fn parse_stamp(stamp: &str) -> Result<DateTime<Utc>, CalendarError> {
    NaiveDateTime::parse_from_str(stamp.trim(), STAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| CalendarError::InvalidStamp(stamp.to_string()))
}

fn event_details(task: &Task) -> String {
    let mut lines = Vec::new();
    if let Some(description) = task.description.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        lines.push(description.to_string());
    }
    if !task.subtasks.is_empty() {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push("Subtasks:".to_string());
        for subtask in &task.subtasks {
            let mark = if subtask.completed { "x" } else { " " };
            lines.push(format!("[{}] {}", mark, subtask.title));
        }
    }
    if lines.is_empty() {
        lines.push(format!("{} task, {} minutes", task.category, task.estimated_minutes));
    }
    lines.join("\n")
}

/// Link that opens Google Calendar's event editor prefilled with the task.
pub fn google_calendar_url(task: &Task) -> Result<String, CalendarError> {
    let (start, end) = event_window(task)?;
    let dates = format!("{}/{}", format_stamp(start), format_stamp(end));
    let details = event_details(task);
    let url = Url::parse_with_params(
        GOOGLE_TEMPLATE_URL,
        &[
            ("action", "TEMPLATE"),
            ("text", task.title.as_str()),
            ("dates", dates.as_str()),
            ("details", details.as_str()),
        ],
    )?;
    Ok(url.into())
}

/// Escape TEXT values (RFC 5545 3.3.11)
fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

/// Fold a content line at 75 octets without splitting a character
fn fold_line(line: &str) -> String {
    if line.len() <= ICS_LINE_LIMIT {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + line.len() / ICS_LINE_LIMIT * 3);
    let mut width = 0;
    for c in line.chars() {
        // continuation lines start with a space, which counts toward the limit
        if width + c.len_utf8() > ICS_LINE_LIMIT {
            out.push_str("\r\n ");
            width = 1;
        }
        out.push(c);
        width += c.len_utf8();
    }
    out
}

/// Single-event iCalendar document with CRLF line endings.
pub fn to_ics(task: &Task) -> Result<String, CalendarError> {
    let (start, end) = event_window(task)?;
    let lines = [
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//eras//planner//EN".to_string(),
        "CALSCALE:GREGORIAN".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{}@eras", task.id),
        format!("DTSTAMP:{}", format_stamp(Utc::now())),
        format!("DTSTART:{}", format_stamp(start)),
        format!("DTEND:{}", format_stamp(end)),
        format!("SUMMARY:{}", escape_text(&task.title)),
        format!("DESCRIPTION:{}", escape_text(&event_details(task))),
        "END:VEVENT".to_string(),
        "END:VCALENDAR".to_string(),
    ];

    let mut ics = String::new();
    for line in &lines {
        ics.push_str(&fold_line(line));
        ics.push_str("\r\n");
    }
    Ok(ics)
}
