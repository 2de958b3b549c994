use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use clap::{Parser, Subcommand};
use thiserror::Error;
use uuid::Uuid;

use crate::calendar::{self, CalendarError};
use crate::config::{Config, ConfigError};
use crate::copilot::{Copilot, UNTITLED_SESSION};
use crate::database::DatabaseError;
use crate::llm::{LlmError, ProxyClient};
use crate::models::{
    Category, ChatMessage, ChatSession, Lno, STORY_TAG, Sender, Story, THEME_TAG, Task, Theme, ThemeStyle,
    task_tag,
};
use crate::planner::{self, DEFAULT_ERA_DAYS, Planner, PlannerError};
use crate::utils::{self, Profile, parse_date};

#[derive(Parser)]
#[command(name = "eras")]
#[command(about = "Plan life in eras, stories and tasks, with a chat copilot")]
#[command(version)]
pub struct Cli {
    /// Use development mode (uses separate dev config/database)
    #[arg(long, global = true)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage eras (date-bounded planning periods)
    Era {
        #[command(subcommand)]
        action: EraCommand,
    },
    /// Manage stories (groups of related tasks)
    Story {
        #[command(subcommand)]
        action: StoryCommand,
    },
    /// Manage tasks of an era
    Task {
        #[command(subcommand)]
        action: TaskCommand,
    },
    /// Show open tasks of the current era grouped by leverage
    Session,
    /// Talk to the planning copilot
    Chat {
        #[command(subcommand)]
        action: ChatCommand,
    },
    /// Export a task to Google Calendar or an .ics file
    Export {
        /// Task id (or unique prefix)
        task: String,
        /// Write an iCalendar file to this path
        #[arg(long)]
        ics: Option<PathBuf>,
        /// Copy the Google Calendar link to the clipboard
        #[arg(long)]
        copy: bool,
    },
    /// Show or edit the local profile
    Profile {
        #[command(subcommand)]
        action: ProfileCommand,
    },
    /// Run the generative-text proxy server
    Serve,
}

#[derive(Subcommand)]
pub enum EraCommand {
    /// Create an era
    Add {
        title: String,
        /// First day (YYYY-MM-DD), defaults to today
        #[arg(long)]
        start: Option<String>,
        /// Last day (YYYY-MM-DD), defaults to 90 days after the start
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Colour preset name
        #[arg(long)]
        style: Option<String>,
    },
    /// List eras, marking the current one
    List,
    /// Pin an era as current; without an argument return to date-based selection
    Select { era: Option<String> },
    /// Delete an era together with its tasks and stories
    Delete { era: String },
    /// Mark an era completed
    Complete {
        era: String,
        /// Reopen instead
        #[arg(long)]
        undo: bool,
    },
}

#[derive(Subcommand)]
pub enum StoryCommand {
    /// Create a story in the current era (or globally)
    Add {
        title: String,
        /// Era id or title; defaults to the current era
        #[arg(long)]
        era: Option<String>,
        /// Make the story visible in every era
        #[arg(long, conflicts_with = "era")]
        global: bool,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        important: bool,
    },
    /// List stories visible in an era
    List {
        #[arg(long)]
        era: Option<String>,
    },
    /// Delete a story; its tasks are kept
    Delete { story: String },
}

#[derive(Subcommand)]
pub enum TaskCommand {
    /// Create a task
    Add {
        title: String,
        /// YYYY-MM-DD or RFC 3339 date-time, defaults to today
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        minutes: Option<u32>,
        #[arg(long)]
        category: Option<String>,
        /// Story id or title
        #[arg(long)]
        story: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        important: bool,
        /// Era id or title; defaults to the current era
        #[arg(long)]
        era: Option<String>,
    },
    /// List tasks of an era
    List {
        #[arg(long)]
        era: Option<String>,
        /// Hide completed tasks
        #[arg(long)]
        pending: bool,
    },
    /// Toggle completion
    Done { task: String },
    /// Delete a task
    Delete { task: String },
    /// Add a subtask
    Subtask { task: String, title: String },
    /// Toggle a subtask by 1-based position or id
    ToggleSubtask { task: String, subtask: String },
    /// Classify as leverage (l), neutral (n) or overhead (o); "none" clears
    Lno { task: String, class: String },
    /// Show, set or clear the focus timer
    Timer {
        task: String,
        /// Minutes remaining
        minutes: Option<u32>,
        #[arg(long, conflicts_with = "minutes")]
        clear: bool,
    },
    /// Ask the copilot to break a task into subtasks
    Breakdown { task: String },
}

#[derive(Subcommand)]
pub enum ChatCommand {
    /// Send a prompt; continues the latest session unless told otherwise
    Ask {
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
        /// Session id or title to continue
        #[arg(long)]
        session: Option<String>,
        /// Start a new session
        #[arg(long, conflicts_with = "session")]
        new: bool,
    },
    /// Apply suggestions from a copilot message
    Apply {
        message: String,
        #[command(flatten)]
        pick: SuggestionPick,
    },
    /// Reject suggestions from a copilot message
    Reject {
        message: String,
        #[command(flatten)]
        pick: SuggestionPick,
    },
    /// List chat sessions
    List,
    /// Print a session (latest by default)
    Show { session: Option<String> },
    /// Delete a session
    Delete { session: String },
}

#[derive(clap::Args, Debug, Default)]
pub struct SuggestionPick {
    /// Task suggestion indices, comma separated
    #[arg(long, value_delimiter = ',')]
    pub tasks: Vec<usize>,
    /// The era suggestion
    #[arg(long)]
    pub theme: bool,
    /// The story suggestion
    #[arg(long)]
    pub story: bool,
    /// Everything the message suggests
    #[arg(long)]
    pub all: bool,
}

#[derive(Subcommand)]
pub enum ProfileCommand {
    Show,
    SetName { name: String },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),
    #[error("{0}")]
    PlannerError(#[from] PlannerError),
    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Copilot error: {0}")]
    LlmError(#[from] LlmError),
    #[error("Calendar error: {0}")]
    CalendarError(#[from] CalendarError),
    #[error("Clipboard error: {0}")]
    ClipboardError(#[from] arboard::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse date: {0}")]
    DateParseError(String),
    #[error("No {kind} matches '{query}'")]
    NotFound { kind: &'static str, query: String },
    #[error("'{query}' matches more than one {kind}; use a longer id")]
    Ambiguous { kind: &'static str, query: String },
    #[error("{0}")]
    InvalidInput(String),
}

/// Resolve a user-typed reference: case-insensitive title first, then a unique id prefix
fn resolve<T>(
    items: &[T],
    query: &str,
    kind: &'static str,
    id_of: impl Fn(&T) -> Uuid,
    title_of: impl Fn(&T) -> &str,
) -> Result<Uuid, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::InvalidInput(format!("Empty {} reference", kind)));
    }
    if let Some(item) = items.iter().find(|i| title_of(i).trim().eq_ignore_ascii_case(query)) {
        return Ok(id_of(item));
    }

    let prefix = query.to_ascii_lowercase();
    let mut matches = items.iter().map(&id_of).filter(|id| id.to_string().starts_with(&prefix));
    let first = matches.next().ok_or_else(|| CliError::NotFound {
        kind,
        query: query.to_string(),
    })?;
    if matches.next().is_some() {
        return Err(CliError::Ambiguous {
            kind,
            query: query.to_string(),
        });
    }
    Ok(first)
}

fn resolve_theme(planner: &Planner, query: &str) -> Result<Uuid, CliError> {
    resolve(planner.themes(), query, "era", |t| t.id, |t| t.title.as_str())
}

fn resolve_story(planner: &Planner, query: &str) -> Result<Uuid, CliError> {
    resolve(planner.stories(), query, "story", |s| s.id, |s| s.title.as_str())
}

fn resolve_task(planner: &Planner, query: &str) -> Result<Uuid, CliError> {
    resolve(planner.tasks(), query, "task", |t| t.id, |t| t.title.as_str())
}

fn resolve_session(sessions: &[ChatSession], query: &str) -> Result<usize, CliError> {
    let id = resolve(sessions, query, "chat session", |s| s.id, |s| s.title.as_str())?;
    sessions
        .iter()
        .position(|s| s.id == id)
        .ok_or_else(|| CliError::NotFound {
            kind: "chat session",
            query: query.to_string(),
        })
}

fn short(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

fn parse_day(value: &str) -> Result<NaiveDate, CliError> {
    parse_date(value)
        .map_err(|e| CliError::DateParseError(format!("Invalid date format '{}': {}", value, e)))
}

/// Era named by `--era`, else the current one
fn target_theme(planner: &Planner, era: Option<&str>, today: NaiveDate) -> Result<Uuid, CliError> {
    match era {
        Some(query) => resolve_theme(planner, query),
        None => planner
            .current_theme(today)
            .map(|t| t.id)
            .ok_or(CliError::PlannerError(PlannerError::NoCurrentTheme)),
    }
}

fn copilot_for(config: &Config) -> Copilot {
    Copilot::behind_proxy(Arc::new(ProxyClient::from_config(config)))
}

// Eras

pub fn handle_era(action: EraCommand, planner: &mut Planner, profile: Profile) -> Result<(), CliError> {
    let today = utils::today();
    match action {
        EraCommand::Add {
            title,
            start,
            end,
            description,
            style,
        } => {
            let start = start.as_deref().map(parse_day).transpose()?.unwrap_or(today);
            let end = match end.as_deref() {
                Some(end) => parse_day(end)?,
                None => start.checked_add_days(Days::new(DEFAULT_ERA_DAYS)).unwrap_or(start),
            };
            if end < start {
                return Err(CliError::InvalidInput(format!(
                    "Era ends ({}) before it starts ({})",
                    end, start
                )));
            }

            let mut theme = Theme::new(title, start, end);
            theme.description = description.unwrap_or_default();
            if let Some(name) = style {
                theme.style = ThemeStyle::preset(&name).ok_or_else(|| {
                    CliError::InvalidInput(format!(
                        "Unknown style '{}' (available: {})",
                        name,
                        ThemeStyle::preset_names().join(", ")
                    ))
                })?;
            }
            let id = planner.add_theme(theme)?;
            println!("Era created successfully (ID: {})", short(id));
        }
        EraCommand::List => {
            let current = planner.current_theme(today).map(|t| t.id);
            let mut themes: Vec<&Theme> = planner.themes().iter().collect();
            themes.sort_by_key(|t| t.start_date);
            if themes.is_empty() {
                println!("No eras yet. Create one with `eras era add <title>`.");
            }
            for theme in themes {
                let marker = if Some(theme.id) == current { "*" } else { " " };
                let done = if theme.completed { " (completed)" } else { "" };
                let tasks = planner.visible_tasks(theme.id);
                let open = tasks.iter().filter(|t| !t.completed).count();
                println!(
                    "{} {}  {}  {} to {}  {}/{} open{}",
                    marker,
                    short(theme.id),
                    theme.title,
                    theme.start_date,
                    theme.end_date,
                    open,
                    tasks.len(),
                    done
                );
            }
        }
        EraCommand::Select { era } => {
            let id = era.as_deref().map(|q| resolve_theme(planner, q)).transpose()?;
            planner.select_theme(id)?;
            Config::persist_selected_era(profile, id)?;
            match id.and_then(|id| planner.theme(id)) {
                Some(theme) => println!("Current era: {}", theme.title),
                None => println!("Era selection cleared; the current era follows today's date"),
            }
        }
        EraCommand::Delete { era } => {
            let id = resolve_theme(planner, &era)?;
            let was_selected = planner.selected_theme_id() == Some(id);
            planner.delete_theme(id)?;
            if was_selected {
                Config::persist_selected_era(profile, None)?;
            }
            println!("Era deleted successfully");
        }
        EraCommand::Complete { era, undo } => {
            let id = resolve_theme(planner, &era)?;
            let mut theme = planner.theme(id).cloned().ok_or(PlannerError::UnknownTheme(id))?;
            theme.completed = !undo;
            planner.update_theme(theme)?;
            println!("Era marked {}", if undo { "open" } else { "completed" });
        }
    }
    Ok(())
}

// Stories

pub fn handle_story(action: StoryCommand, planner: &mut Planner) -> Result<(), CliError> {
    let today = utils::today();
    match action {
        StoryCommand::Add {
            title,
            era,
            global,
            description,
            important,
        } => {
            let theme_id = match (global, era.as_deref()) {
                (true, _) => None,
                (false, Some(query)) => Some(resolve_theme(planner, query)?),
                (false, None) => planner.current_theme(today).map(|t| t.id),
            };
            let mut story = Story::new(title, theme_id);
            story.description = description;
            story.is_important = important;
            let id = planner.add_story(story)?;
            println!("Story created successfully (ID: {})", short(id));
        }
        StoryCommand::List { era } => {
            let theme_id = match era.as_deref() {
                Some(query) => Some(resolve_theme(planner, query)?),
                None => planner.current_theme(today).map(|t| t.id),
            };
            let stories = planner.visible_stories(theme_id);
            if stories.is_empty() {
                println!("No stories.");
            }
            for story in stories {
                let scope = if story.theme_id.is_none() { " (global)" } else { "" };
                let important = if story.is_important { " !" } else { "" };
                let count = planner.tasks().iter().filter(|t| t.story_id == Some(story.id)).count();
                println!(
                    "{}  {}{}{}  {} task(s)",
                    short(story.id),
                    story.title,
                    important,
                    scope,
                    count
                );
            }
        }
        StoryCommand::Delete { story } => {
            let id = resolve_story(planner, &story)?;
            planner.delete_story(id)?;
            println!("Story deleted successfully");
        }
    }
    Ok(())
}

// Tasks

fn print_task(task: &Task, planner: &Planner) {
    let mark = if task.completed { "x" } else { " " };
    let mut details = vec![
        task.category.to_string(),
        format!("due {}", task.due_date),
        format!("{} min", task.estimated_minutes),
    ];
    if let Some(lno) = task.lno {
        details.push(lno.to_string());
    }
    if let Some(left) = task.remaining_minutes {
        details.push(format!("{} min left", left));
    }
    if let Some(story) = task.story_id.and_then(|id| planner.story(id)) {
        details.push(format!("story: {}", story.title));
    }
    if task.ai_generated {
        details.push("ai".to_string());
    }
    println!(
        "[{}] {}  {}{}  ({})",
        mark,
        short(task.id),
        task.title,
        if task.is_important { " !" } else { "" },
        details.join(", ")
    );
    for (i, subtask) in task.subtasks.iter().enumerate() {
        let mark = if subtask.completed { "x" } else { " " };
        println!("        {}. [{}] {}", i + 1, mark, subtask.title);
    }
}

pub async fn handle_task(action: TaskCommand, planner: &mut Planner, config: &Config) -> Result<(), CliError> {
    let today = utils::today();
    match action {
        TaskCommand::Add {
            title,
            due,
            minutes,
            category,
            story,
            description,
            important,
            era,
        } => {
            let theme_id = target_theme(planner, era.as_deref(), today)?;
            let due = match due {
                Some(due) if utils::parse_due(&due).is_some() => due.trim().to_string(),
                Some(due) => {
                    return Err(CliError::DateParseError(format!(
                        "Invalid due date '{}' (expected YYYY-MM-DD or RFC 3339)",
                        due
                    )));
                }
                None => today.format("%Y-%m-%d").to_string(),
            };

            let mut task = Task::new(title, theme_id, due);
            if let Some(category) = category {
                task.category = category.parse::<Category>().map_err(CliError::InvalidInput)?;
            }
            if let Some(minutes) = minutes {
                task.estimated_minutes = minutes;
            }
            if let Some(story) = story {
                task.story_id = Some(resolve_story(planner, &story)?);
            }
            task.description = description;
            task.is_important = important;
            let id = planner.add_task(task)?;
            println!("Task created successfully (ID: {})", short(id));
        }
        TaskCommand::List { era, pending } => {
            let theme_id = target_theme(planner, era.as_deref(), today)?;
            let mut tasks = planner.visible_tasks(theme_id);
            if pending {
                tasks.retain(|t| !t.completed);
            }
            tasks.sort_by(|a, b| {
                utils::parse_due(&a.due_date)
                    .cmp(&utils::parse_due(&b.due_date))
                    .then_with(|| a.title.cmp(&b.title))
            });
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for task in tasks {
                print_task(task, planner);
            }
        }
        TaskCommand::Done { task } => {
            let id = resolve_task(planner, &task)?;
            let completed = planner.toggle_task(id)?;
            println!("Task marked {}", if completed { "done" } else { "open" });
        }
        TaskCommand::Delete { task } => {
            let id = resolve_task(planner, &task)?;
            planner.delete_task(id)?;
            println!("Task deleted successfully");
        }
        TaskCommand::Subtask { task, title } => {
            let id = resolve_task(planner, &task)?;
            planner.add_subtask(id, title)?;
            println!("Subtask added");
        }
        TaskCommand::ToggleSubtask { task, subtask } => {
            let id = resolve_task(planner, &task)?;
            let subtasks = planner
                .task(id)
                .map(|t| t.subtasks.clone())
                .unwrap_or_default();
            let subtask_id = match subtask.trim().parse::<usize>() {
                Ok(n) if (1..=subtasks.len()).contains(&n) => subtasks[n - 1].id,
                _ => resolve(&subtasks, &subtask, "subtask", |s| s.id, |s| s.title.as_str())?,
            };
            let completed = planner.toggle_subtask(id, subtask_id)?;
            println!("Subtask marked {}", if completed { "done" } else { "open" });
        }
        TaskCommand::Lno { task, class } => {
            let id = resolve_task(planner, &task)?;
            let lno = match class.trim().to_ascii_lowercase().as_str() {
                "none" | "clear" | "-" => None,
                other => Some(other.parse::<Lno>().map_err(CliError::InvalidInput)?),
            };
            planner.set_lno(id, lno)?;
            match lno {
                Some(lno) => println!("Task classified as {}", lno),
                None => println!("Task classification cleared"),
            }
        }
        TaskCommand::Timer { task, minutes, clear } => {
            let id = resolve_task(planner, &task)?;
            if clear {
                planner.set_remaining_minutes(id, None)?;
                println!("Timer cleared");
            } else if let Some(minutes) = minutes {
                planner.set_remaining_minutes(id, Some(minutes))?;
                println!("{} min left", minutes);
            } else if let Some(task) = planner.task(id) {
                let left = task.remaining_minutes.unwrap_or(task.estimated_minutes);
                println!("{}: {} of {} min left", task.title, left, task.estimated_minutes);
            }
        }
        TaskCommand::Breakdown { task } => {
            let id = resolve_task(planner, &task)?;
            let task = planner.task(id).cloned().ok_or(PlannerError::UnknownTask(id))?;
            let subtasks = copilot_for(config).suggest_subtasks(&task).await?;
            if subtasks.is_empty() {
                println!("The copilot had no subtasks to suggest");
                return Ok(());
            }
            for subtask in &subtasks {
                println!("  + {}", subtask.title);
            }
            let count = subtasks.len();
            planner.add_subtasks(id, subtasks)?;
            println!("{} subtask(s) added to '{}'", count, task.title);
        }
    }
    Ok(())
}

// Work session

pub fn handle_session(planner: &Planner) -> Result<(), CliError> {
    let today = utils::today();
    let Some(theme) = planner.current_theme(today) else {
        println!("No current era.");
        return Ok(());
    };
    let session = planner.work_session(today);
    println!(
        "{}: {} min planned, {} min remaining",
        theme.title, session.planned_minutes, session.remaining_minutes
    );
    let groups = [
        (Lno::Leverage.to_string(), &session.leverage),
        (Lno::Neutral.to_string(), &session.neutral),
        (Lno::Overhead.to_string(), &session.overhead),
        ("Unclassified".to_string(), &session.unclassified),
    ];
    for (label, tasks) in groups {
        if tasks.is_empty() {
            continue;
        }
        println!();
        println!("{} ({})", label, tasks.len());
        for task in tasks.iter() {
            print_task(task, planner);
        }
    }
    Ok(())
}

// Chat

fn suggestion_status(message: &ChatMessage, tag: &str) -> &'static str {
    if message.applied.contains(tag) {
        "applied"
    } else if message.rejected.contains(tag) {
        "rejected"
    } else {
        "pending"
    }
}

fn print_suggestions(message: &ChatMessage) {
    if !message.has_suggestions() {
        return;
    }
    println!();
    println!("Suggestions on message {}:", short(message.id));
    if let Some(theme) = &message.suggested_theme {
        println!(
            "  era     [{}] {} ({} to {})",
            suggestion_status(message, THEME_TAG),
            theme.title,
            theme.start_date.as_deref().unwrap_or("today"),
            theme.end_date.as_deref().unwrap_or("open")
        );
    }
    if let Some(story) = &message.suggested_story {
        println!("  story   [{}] {}", suggestion_status(message, STORY_TAG), story.title);
    }
    for (i, task) in message.suggested_tasks.iter().enumerate() {
        let kind = if task.id.is_some() { "update" } else { "new" };
        println!(
            "  task {:<2} [{}] {} ({}, due {})",
            i,
            suggestion_status(message, &task_tag(i)),
            task.title.as_deref().unwrap_or("(untitled)"),
            kind,
            task.due_date.as_deref().unwrap_or("today")
        );
    }
    println!("Apply with `eras chat apply {} --all` or pick with --tasks/--theme/--story", short(message.id));
}

fn print_message(message: &ChatMessage) {
    match message.sender {
        Sender::User => println!("> {}", message.text),
        Sender::Ai => {
            termimad::print_text(&message.text);
            print_suggestions(message);
        }
    }
}

/// Session index and id of the copilot message matching `query`
fn locate_message(sessions: &[ChatSession], query: &str) -> Result<(usize, Uuid), CliError> {
    let lowered = query.trim().to_ascii_lowercase();
    let prefix = lowered.as_str();
    let mut found = sessions.iter().enumerate().flat_map(move |(i, session)| {
        session
            .messages
            .iter()
            .filter(move |m| m.sender == Sender::Ai && m.id.to_string().starts_with(prefix))
            .map(move |m| (i, m.id))
    });
    let not_found = || CliError::NotFound {
        kind: "copilot message",
        query: query.to_string(),
    };
    if prefix.is_empty() {
        return Err(not_found());
    }
    let first = found.next().ok_or_else(not_found)?;
    if found.next().is_some() {
        return Err(CliError::Ambiguous {
            kind: "copilot message",
            query: query.to_string(),
        });
    }
    Ok(first)
}

fn apply_picked(
    planner: &mut Planner,
    message: &mut ChatMessage,
    pick: &SuggestionPick,
    profile: Profile,
) -> Result<(), CliError> {
    let today = utils::today();
    let theme = pick.theme || (pick.all && message.suggested_theme.is_some());
    let story = pick.story || (pick.all && message.suggested_story.is_some());
    let tasks: Vec<usize> = if pick.all {
        (0..message.suggested_tasks.len()).collect()
    } else {
        pick.tasks.clone()
    };

    // era first so the story and tasks land in it
    if theme {
        match planner.apply_theme_suggestion(message, today)? {
            Some(id) => {
                Config::persist_selected_era(profile, Some(id))?;
                println!("Era created and selected (ID: {})", short(id));
            }
            None => println!("Era suggestion was already handled"),
        }
    }
    if story {
        match planner.apply_story_suggestion(message, today)? {
            Some(id) => println!("Story created (ID: {})", short(id)),
            None => println!("Story suggestion was already handled"),
        }
    }
    if !tasks.is_empty() {
        let ids = planner.apply_task_suggestions(message, &tasks, today)?;
        println!("{} task(s) applied", ids.len());
    }
    Ok(())
}

/// Reject the picked suggestions, returning how many were still pending
fn reject_picked(message: &mut ChatMessage, pick: &SuggestionPick) -> Result<usize, CliError> {
    let task_count = message.suggested_tasks.len();
    if let Some(bad) = pick.tasks.iter().find(|i| **i >= task_count) {
        return Err(CliError::InvalidInput(format!(
            "No task suggestion #{} (message has {})",
            bad, task_count
        )));
    }
    if pick.theme && message.suggested_theme.is_none() {
        return Err(CliError::InvalidInput("Message has no era suggestion".to_string()));
    }
    if pick.story && message.suggested_story.is_none() {
        return Err(CliError::InvalidInput("Message has no story suggestion".to_string()));
    }

    let mut tags: Vec<String> = if pick.all {
        (0..task_count).map(task_tag).collect()
    } else {
        pick.tasks.iter().copied().map(task_tag).collect()
    };
    if message.suggested_theme.is_some() && (pick.theme || pick.all) {
        tags.push(THEME_TAG.to_string());
    }
    if message.suggested_story.is_some() && (pick.story || pick.all) {
        tags.push(STORY_TAG.to_string());
    }
    Ok(tags
        .iter()
        .filter(|tag| planner::reject_suggestion(message, tag))
        .count())
}

fn ensure_picked(pick: &SuggestionPick) -> Result<(), CliError> {
    if pick.all || pick.theme || pick.story || !pick.tasks.is_empty() {
        return Ok(());
    }
    Err(CliError::InvalidInput(
        "Nothing selected: pass --tasks, --theme, --story or --all".to_string(),
    ))
}

pub async fn handle_chat(
    action: ChatCommand,
    planner: &mut Planner,
    config: &Config,
    profile: Profile,
) -> Result<(), CliError> {
    let owner = planner.owner_id().to_string();
    let mut sessions = planner.db().get_chat_sessions(&owner)?;

    match action {
        ChatCommand::Ask { prompt, session, new } => {
            let prompt = prompt.join(" ");
            if prompt.trim().is_empty() {
                return Err(CliError::InvalidInput("Prompt is empty".to_string()));
            }
            let mut chat = if new || sessions.is_empty() {
                ChatSession::new(UNTITLED_SESSION.to_string())
            } else {
                let index = match session.as_deref() {
                    Some(query) => resolve_session(&sessions, query)?,
                    // newest first
                    None => 0,
                };
                sessions.swap_remove(index)
            };

            let copilot = copilot_for(config);
            let reply = {
                let ctx = planner.context(utils::today());
                copilot.respond(&mut chat, prompt.trim(), &ctx).await
            };
            planner.db().save_chat_session(&owner, &chat)?;
            print_message(&reply);
        }
        ChatCommand::Apply { message, pick } => {
            ensure_picked(&pick)?;
            let (index, message_id) = locate_message(&sessions, &message)?;
            let session = &mut sessions[index];
            let not_found = || CliError::NotFound {
                kind: "copilot message",
                query: message.clone(),
            };
            let target = session.message_mut(message_id).ok_or_else(not_found)?;
            let result = apply_picked(planner, target, &pick, profile);
            // applied markers are kept even when a write failed
            planner.db().save_chat_session(&owner, session)?;
            result?;
        }
        ChatCommand::Reject { message, pick } => {
            ensure_picked(&pick)?;
            let (index, message_id) = locate_message(&sessions, &message)?;
            let session = &mut sessions[index];
            let not_found = || CliError::NotFound {
                kind: "copilot message",
                query: message.clone(),
            };
            let target = session.message_mut(message_id).ok_or_else(not_found)?;
            let count = reject_picked(target, &pick)?;
            planner.db().save_chat_session(&owner, session)?;
            println!("{} suggestion(s) rejected", count);
        }
        ChatCommand::List => {
            if sessions.is_empty() {
                println!("No chat sessions yet. Start one with `eras chat ask <prompt>`.");
            }
            for session in &sessions {
                println!(
                    "{}  {}  ({} messages, updated {})",
                    short(session.id),
                    session.title,
                    session.messages.len(),
                    session.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ChatCommand::Show { session } => {
            let index = match session.as_deref() {
                Some(query) => resolve_session(&sessions, query)?,
                None if sessions.is_empty() => {
                    println!("No chat sessions yet.");
                    return Ok(());
                }
                None => 0,
            };
            let session = &sessions[index];
            println!("# {}", session.title);
            for message in &session.messages {
                println!();
                print_message(message);
            }
        }
        ChatCommand::Delete { session } => {
            let index = resolve_session(&sessions, &session)?;
            planner.db().delete_chat_session(&owner, sessions[index].id)?;
            println!("Chat session deleted successfully");
        }
    }
    Ok(())
}

// Export

pub fn handle_export(task: String, ics: Option<PathBuf>, copy: bool, planner: &Planner) -> Result<(), CliError> {
    let id = resolve_task(planner, &task)?;
    let task = planner.task(id).ok_or(PlannerError::UnknownTask(id))?;

    let url = calendar::google_calendar_url(task)?;
    println!("{}", url);

    if let Some(path) = ics {
        let path = utils::expand_path(&path.to_string_lossy());
        fs::write(&path, calendar::to_ics(task)?)?;
        println!("Calendar file written to {}", path.display());
    }
    if copy {
        let mut clipboard = arboard::Clipboard::new()?;
        clipboard.set_text(url)?;
        println!("Link copied to clipboard");
    }
    Ok(())
}

// Profile

pub fn handle_profile(action: ProfileCommand, planner: &Planner) -> Result<(), CliError> {
    let db = planner.db();
    let owner = planner.owner_id();
    let mut profile = db
        .get_profile(owner)?
        .unwrap_or_else(|| crate::models::UserProfile::new(owner.to_string()));
    match action {
        ProfileCommand::Show => {
            println!("Owner: {}", profile.id);
            println!("Name: {}", profile.display_name.as_deref().unwrap_or("(not set)"));
            println!("Since: {}", profile.created_at.format("%Y-%m-%d"));
            println!(
                "Eras: {}  Stories: {}  Tasks: {}",
                planner.themes().len(),
                planner.stories().len(),
                planner.tasks().len()
            );
        }
        ProfileCommand::SetName { name } => {
            let name = name.trim();
            profile.display_name = (!name.is_empty()).then(|| name.to_string());
            db.save_profile(&profile)?;
            println!("Profile updated");
        }
    }
    Ok(())
}
