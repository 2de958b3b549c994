use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Closed set of task categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Career,
    Health,
    Finance,
    Lifestyle,
    Travel,
    Personal,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Career,
        Category::Health,
        Category::Finance,
        Category::Lifestyle,
        Category::Travel,
        Category::Personal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Career => "Career",
            Category::Health => "Health",
            Category::Finance => "Finance",
            Category::Lifestyle => "Lifestyle",
            Category::Travel => "Travel",
            Category::Personal => "Personal",
        }
    }

    /// Parse loosely, mapping anything unrecognised to `Personal`.
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or(Category::Personal)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Category::ALL
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(needle))
            .copied()
            .ok_or_else(|| format!("Unknown category: {}", s))
    }
}

/// Leverage / Neutral / Overhead classification used by the work session view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lno {
    Leverage,
    Neutral,
    Overhead,
}

impl Lno {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lno::Leverage => "L",
            Lno::Neutral => "N",
            Lno::Overhead => "O",
        }
    }
}

impl fmt::Display for Lno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Lno::Leverage => "Leverage",
            Lno::Neutral => "Neutral",
            Lno::Overhead => "Overhead",
        };
        f.write_str(label)
    }
}

impl FromStr for Lno {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "leverage" => Ok(Lno::Leverage),
            "n" | "neutral" => Ok(Lno::Neutral),
            "o" | "overhead" => Ok(Lno::Overhead),
            other => Err(format!("Unknown LNO class: {}", other)),
        }
    }
}

/// Colour classes an era is drawn with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeStyle {
    pub primary: String,
    pub secondary: String,
    pub accent: String,
    pub background: String,
    pub text: String,
}

impl Default for ThemeStyle {
    fn default() -> Self {
        ThemeStyle::preset("ocean").unwrap_or_else(|| ThemeStyle::from_palette("sky", "slate"))
    }
}

impl ThemeStyle {
    fn from_palette(hue: &str, neutral: &str) -> Self {
        Self {
            primary: format!("bg-{}-600", hue),
            secondary: format!("bg-{}-100", hue),
            accent: format!("text-{}-500", hue),
            background: format!("bg-{}-50", neutral),
            text: format!("text-{}-900", neutral),
        }
    }

    /// Named presets that are always available
    pub fn presets() -> HashMap<String, ThemeStyle> {
        let mut styles = HashMap::new();
        styles.insert("ocean".to_string(), ThemeStyle::from_palette("sky", "slate"));
        styles.insert("forest".to_string(), ThemeStyle::from_palette("emerald", "stone"));
        styles.insert("sunset".to_string(), ThemeStyle::from_palette("orange", "stone"));
        styles.insert("violet".to_string(), ThemeStyle::from_palette("violet", "zinc"));
        styles.insert("slate".to_string(), ThemeStyle::from_palette("slate", "gray"));
        styles
    }

    pub fn preset(name: &str) -> Option<ThemeStyle> {
        Self::presets().remove(&name.trim().to_ascii_lowercase())
    }

    /// Sorted preset names, for help output
    pub fn preset_names() -> Vec<String> {
        let mut names: Vec<String> = Self::presets().into_keys().collect();
        names.sort();
        names
    }
}

/// A date-bounded planning period ("era").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub style: ThemeStyle,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Theme {
    pub fn new(title: String, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            description: String::new(),
            start_date,
            end_date,
            style: ThemeStyle::default(),
            completed: false,
            created_at: Utc::now(),
        }
    }

    /// Inclusive on both ends
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start_date <= day && day <= self.end_date
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: Uuid,
    pub theme_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub is_important: bool,
    pub created_at: DateTime<Utc>,
}

impl Story {
    pub fn new(title: String, theme_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            theme_id,
            title,
            description: None,
            is_important: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: Uuid,
    pub title: String,
    pub completed: bool,
}

impl Subtask {
    pub fn new(title: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            completed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub theme_id: Uuid,
    pub story_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub category: Category,
    pub due_date: String, // YYYY-MM-DD or RFC 3339
    pub estimated_minutes: u32,
    pub completed: bool,
    pub remaining_minutes: Option<u32>,
    pub is_important: bool,
    pub ai_generated: bool,
    pub subtasks: Vec<Subtask>,
    pub lno: Option<Lno>,
}

impl Task {
    pub fn new(title: String, theme_id: Uuid, due_date: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            theme_id,
            story_id: None,
            title,
            description: None,
            category: Category::Personal,
            due_date,
            estimated_minutes: 30,
            completed: false,
            remaining_minutes: None,
            is_important: false,
            ai_generated: false,
            subtasks: Vec::new(),
            lno: None,
        }
    }
}

/// Row of the `profiles` table; `id` is the owning user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(id: String) -> Self {
        Self {
            id,
            display_name: None,
            created_at: Utc::now(),
        }
    }
}

/// A subtask as the copilot may emit it: a bare string or an object with a title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubtaskSuggestion {
    Title(String),
    Item { title: String },
}

impl SubtaskSuggestion {
    pub fn title(&self) -> &str {
        match self {
            SubtaskSuggestion::Title(title) => title,
            SubtaskSuggestion::Item { title } => title,
        }
    }
}

/// Partial task shape carried in a `TASKS` action block.
///
/// An `id` that matches an existing task makes this an update; otherwise the
/// suggestion creates a new task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSuggestion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_minutes")]
    pub estimated_minutes: Option<u32>,
    #[serde(default)]
    pub story_id: Option<String>,
    #[serde(default)]
    pub is_important: Option<bool>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub subtasks: Option<Vec<SubtaskSuggestion>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeSuggestion {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorySuggestion {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_important: Option<bool>,
}

fn lenient_minutes<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse::<u32>().ok(),
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

/// Suggestion marker tags stored in `ChatMessage::applied` / `rejected`.
pub const THEME_TAG: &str = "theme";
pub const STORY_TAG: &str = "story";

pub fn task_tag(index: usize) -> String {
    format!("task:{}", index)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender: Sender,
    pub text: String,
    #[serde(default)]
    pub suggested_tasks: Vec<TaskSuggestion>,
    #[serde(default)]
    pub suggested_theme: Option<ThemeSuggestion>,
    #[serde(default)]
    pub suggested_story: Option<StorySuggestion>,
    #[serde(default)]
    pub applied: BTreeSet<String>,
    #[serde(default)]
    pub rejected: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(sender: Sender, text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            text,
            suggested_tasks: Vec::new(),
            suggested_theme: None,
            suggested_story: None,
            applied: BTreeSet::new(),
            rejected: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    /// A suggestion is pending until it has been applied or rejected
    pub fn is_pending(&self, tag: &str) -> bool {
        !self.applied.contains(tag) && !self.rejected.contains(tag)
    }

    pub fn has_suggestions(&self) -> bool {
        !self.suggested_tasks.is_empty()
            || self.suggested_theme.is_some()
            || self.suggested_story.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.updated_at = message.created_at;
        self.messages.push(message);
    }

    pub fn message_mut(&mut self, id: Uuid) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}
