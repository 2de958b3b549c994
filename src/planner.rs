//! In-memory planning state with optimistic persistence.
//!
//! Every mutation updates local state first and then writes through to the
//! [`Database`]. A failed write is returned to the caller but the local
//! change is kept; [`Planner::reload`] brings local state back in line with
//! the store.

use chrono::{Days, NaiveDate};
use thiserror::Error;
use uuid::Uuid;

use crate::copilot::{PlanningContext, resolve_story_id};
use crate::database::{Database, DatabaseError};
use crate::models::{
    Category, ChatMessage, Lno, STORY_TAG, Story, Subtask, THEME_TAG, Task, TaskSuggestion, Theme,
    ThemeStyle, UserProfile, task_tag,
};
use crate::utils;

/// Length given to a suggested era that names no end date
pub const DEFAULT_ERA_DAYS: u64 = 90;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Cannot delete the only remaining era")]
    LastTheme,
    #[error("Era not found: {0}")]
    UnknownTheme(Uuid),
    #[error("Story not found: {0}")]
    UnknownStory(Uuid),
    #[error("Task not found: {0}")]
    UnknownTask(Uuid),
    #[error("Subtask not found: {0}")]
    UnknownSubtask(Uuid),
    #[error("No current era to attach tasks to")]
    NoCurrentTheme,
    #[error("Invalid suggestion: {0}")]
    InvalidSuggestion(String),
}

/// Tasks of one era grouped for a work session.
#[derive(Debug, Default)]
pub struct WorkSession<'a> {
    pub leverage: Vec<&'a Task>,
    pub neutral: Vec<&'a Task>,
    pub overhead: Vec<&'a Task>,
    pub unclassified: Vec<&'a Task>,
    pub planned_minutes: u32,
    pub remaining_minutes: u32,
}

pub struct Planner {
    db: Database,
    owner_id: String,
    themes: Vec<Theme>,
    stories: Vec<Story>,
    tasks: Vec<Task>,
    selected_theme_id: Option<Uuid>,
}

impl Planner {
    /// Load everything the owner can see, creating their profile row on first use
    pub fn load(db: Database, owner_id: &str) -> Result<Self, PlannerError> {
        if owner_id.trim().is_empty() {
            return Err(DatabaseError::NotAuthenticated.into());
        }
        if db.get_profile(owner_id)?.is_none() {
            tracing::info!(owner_id, "creating profile");
            db.save_profile(&UserProfile::new(owner_id.to_string()))?;
        }
        let mut planner = Self {
            db,
            owner_id: owner_id.to_string(),
            themes: Vec::new(),
            stories: Vec::new(),
            tasks: Vec::new(),
            selected_theme_id: None,
        };
        planner.reload()?;
        Ok(planner)
    }

    /// Refetch all records, discarding local state
    pub fn reload(&mut self) -> Result<(), PlannerError> {
        self.themes = self.db.get_themes(&self.owner_id)?;
        self.stories = self.db.get_stories(&self.owner_id)?;
        self.tasks = self.db.get_tasks(&self.owner_id)?;
        if let Some(id) = self.selected_theme_id {
            if !self.themes.iter().any(|t| t.id == id) {
                self.selected_theme_id = None;
            }
        }
        tracing::debug!(
            themes = self.themes.len(),
            stories = self.stories.len(),
            tasks = self.tasks.len(),
            "planner reloaded"
        );
        Ok(())
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn themes(&self) -> &[Theme] {
        &self.themes
    }

    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn theme(&self, id: Uuid) -> Option<&Theme> {
        self.themes.iter().find(|t| t.id == id)
    }

    pub fn story(&self, id: Uuid) -> Option<&Story> {
        self.stories.iter().find(|s| s.id == id)
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn selected_theme_id(&self) -> Option<Uuid> {
        self.selected_theme_id
    }

    // Eras

    pub fn current_theme(&self, today: NaiveDate) -> Option<&Theme> {
        pick_current_theme(&self.themes, self.selected_theme_id, today)
    }

    /// Pin an era as current; `None` returns to date-based selection
    pub fn select_theme(&mut self, id: Option<Uuid>) -> Result<(), PlannerError> {
        if let Some(id) = id {
            if self.theme(id).is_none() {
                return Err(PlannerError::UnknownTheme(id));
            }
        }
        self.selected_theme_id = id;
        Ok(())
    }

    pub fn add_theme(&mut self, theme: Theme) -> Result<Uuid, PlannerError> {
        let id = theme.id;
        self.themes.push(theme.clone());
        self.db.save_themes(&self.owner_id, &[theme])?;
        Ok(id)
    }

    pub fn update_theme(&mut self, theme: Theme) -> Result<(), PlannerError> {
        let slot = self
            .themes
            .iter_mut()
            .find(|t| t.id == theme.id)
            .ok_or(PlannerError::UnknownTheme(theme.id))?;
        *slot = theme.clone();
        self.db.save_themes(&self.owner_id, &[theme])?;
        Ok(())
    }

    /// Remove an era with its tasks and stories. The last era cannot be deleted.
    pub fn delete_theme(&mut self, id: Uuid) -> Result<(), PlannerError> {
        if self.theme(id).is_none() {
            return Err(PlannerError::UnknownTheme(id));
        }
        if self.themes.len() <= 1 {
            return Err(PlannerError::LastTheme);
        }

        self.themes.retain(|t| t.id != id);
        self.tasks.retain(|t| t.theme_id != id);
        let removed_stories: Vec<Uuid> = self
            .stories
            .iter()
            .filter(|s| s.theme_id == Some(id))
            .map(|s| s.id)
            .collect();
        self.stories.retain(|s| s.theme_id != Some(id));
        // tasks of other eras may still point at the removed stories
        for task in self
            .tasks
            .iter_mut()
            .filter(|t| t.story_id.is_some_and(|s| removed_stories.contains(&s)))
        {
            task.story_id = None;
        }
        if self.selected_theme_id == Some(id) {
            self.selected_theme_id = None;
        }

        self.db.delete_theme(&self.owner_id, id)?;
        for story_id in removed_stories {
            self.db.delete_story(&self.owner_id, story_id)?;
        }
        Ok(())
    }

    // Stories

    /// Stories scoped to `theme_id` plus global ones
    pub fn visible_stories(&self, theme_id: Option<Uuid>) -> Vec<&Story> {
        self.stories
            .iter()
            .filter(|s| s.theme_id.is_none() || s.theme_id == theme_id)
            .collect()
    }

    pub fn add_story(&mut self, story: Story) -> Result<Uuid, PlannerError> {
        if let Some(theme_id) = story.theme_id {
            if self.theme(theme_id).is_none() {
                return Err(PlannerError::UnknownTheme(theme_id));
            }
        }
        let id = story.id;
        self.stories.push(story.clone());
        self.db.save_stories(&self.owner_id, &[story])?;
        Ok(id)
    }

    pub fn update_story(&mut self, story: Story) -> Result<(), PlannerError> {
        let slot = self
            .stories
            .iter_mut()
            .find(|s| s.id == story.id)
            .ok_or(PlannerError::UnknownStory(story.id))?;
        *slot = story.clone();
        self.db.save_stories(&self.owner_id, &[story])?;
        Ok(())
    }

    /// Tasks of the story stay, detached from it
    pub fn delete_story(&mut self, id: Uuid) -> Result<(), PlannerError> {
        if self.story(id).is_none() {
            return Err(PlannerError::UnknownStory(id));
        }
        self.stories.retain(|s| s.id != id);
        for task in self.tasks.iter_mut().filter(|t| t.story_id == Some(id)) {
            task.story_id = None;
        }
        self.db.delete_story(&self.owner_id, id)?;
        Ok(())
    }

    // Tasks

    pub fn visible_tasks(&self, theme_id: Uuid) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.theme_id == theme_id).collect()
    }

    pub fn add_task(&mut self, mut task: Task) -> Result<Uuid, PlannerError> {
        if self.theme(task.theme_id).is_none() {
            return Err(PlannerError::UnknownTheme(task.theme_id));
        }
        if let Some(story_id) = task.story_id {
            if self.story(story_id).is_none() {
                tracing::warn!(%story_id, "unknown story on new task, leaving it general");
                task.story_id = None;
            }
        }
        let id = task.id;
        self.tasks.push(task.clone());
        self.db.save_tasks(&self.owner_id, &[task])?;
        Ok(id)
    }

    pub fn update_task(&mut self, task: Task) -> Result<(), PlannerError> {
        if self.theme(task.theme_id).is_none() {
            return Err(PlannerError::UnknownTheme(task.theme_id));
        }
        let slot = self
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or(PlannerError::UnknownTask(task.id))?;
        *slot = task.clone();
        self.db.save_tasks(&self.owner_id, &[task])?;
        Ok(())
    }

    /// Apply `change` to one task and persist it
    fn modify_task<R>(
        &mut self,
        id: Uuid,
        change: impl FnOnce(&mut Task) -> Result<R, PlannerError>,
    ) -> Result<R, PlannerError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(PlannerError::UnknownTask(id))?;
        let result = change(task)?;
        let snapshot = task.clone();
        self.db.save_tasks(&self.owner_id, &[snapshot])?;
        Ok(result)
    }

    /// Flip completion, returning the new state
    pub fn toggle_task(&mut self, id: Uuid) -> Result<bool, PlannerError> {
        self.modify_task(id, |task| {
            task.completed = !task.completed;
            if task.completed {
                task.remaining_minutes = None;
            }
            Ok(task.completed)
        })
    }

    pub fn delete_task(&mut self, id: Uuid) -> Result<(), PlannerError> {
        if self.task(id).is_none() {
            return Err(PlannerError::UnknownTask(id));
        }
        self.tasks.retain(|t| t.id != id);
        self.db.delete_task(&self.owner_id, id)?;
        Ok(())
    }

    pub fn add_subtasks(&mut self, task_id: Uuid, subtasks: Vec<Subtask>) -> Result<(), PlannerError> {
        self.modify_task(task_id, |task| {
            task.subtasks.extend(subtasks);
            Ok(())
        })
    }

    pub fn add_subtask(&mut self, task_id: Uuid, title: String) -> Result<Uuid, PlannerError> {
        let subtask = Subtask::new(title);
        let id = subtask.id;
        self.add_subtasks(task_id, vec![subtask])?;
        Ok(id)
    }

    pub fn toggle_subtask(&mut self, task_id: Uuid, subtask_id: Uuid) -> Result<bool, PlannerError> {
        self.modify_task(task_id, |task| {
            let subtask = task
                .subtasks
                .iter_mut()
                .find(|s| s.id == subtask_id)
                .ok_or(PlannerError::UnknownSubtask(subtask_id))?;
            subtask.completed = !subtask.completed;
            Ok(subtask.completed)
        })
    }

    pub fn set_lno(&mut self, task_id: Uuid, lno: Option<Lno>) -> Result<(), PlannerError> {
        self.modify_task(task_id, |task| {
            task.lno = lno;
            Ok(())
        })
    }

    /// Focus timer state; `None` clears the countdown
    pub fn set_remaining_minutes(&mut self, task_id: Uuid, minutes: Option<u32>) -> Result<(), PlannerError> {
        self.modify_task(task_id, |task| {
            task.remaining_minutes = minutes;
            Ok(())
        })
    }

    /// Incomplete tasks of the current era grouped by LNO class
    pub fn work_session(&self, today: NaiveDate) -> WorkSession<'_> {
        let mut session = WorkSession::default();
        let Some(theme) = self.current_theme(today) else {
            return session;
        };
        for task in self.tasks.iter().filter(|t| t.theme_id == theme.id && !t.completed) {
            let left = task.remaining_minutes.unwrap_or(task.estimated_minutes);
            session.planned_minutes = session.planned_minutes.saturating_add(task.estimated_minutes);
            session.remaining_minutes = session.remaining_minutes.saturating_add(left);
            match task.lno {
                Some(Lno::Leverage) => session.leverage.push(task),
                Some(Lno::Neutral) => session.neutral.push(task),
                Some(Lno::Overhead) => session.overhead.push(task),
                None => session.unclassified.push(task),
            }
        }
        session
    }

    /// What the copilot gets to see for the current era
    pub fn context(&self, today: NaiveDate) -> PlanningContext<'_> {
        let theme = self.current_theme(today);
        let theme_id = theme.map(|t| t.id);
        PlanningContext {
            theme,
            tasks: theme_id.map(|id| self.visible_tasks(id)).unwrap_or_default(),
            stories: self.visible_stories(theme_id),
            today,
        }
    }

    // Suggestions

    /// Apply the task suggestions at `indices`, marking exactly those as applied.
    ///
    /// Indices that were already applied or rejected are skipped. Returns the
    /// ids of created or updated tasks.
    pub fn apply_task_suggestions(
        &mut self,
        message: &mut ChatMessage,
        indices: &[usize],
        today: NaiveDate,
    ) -> Result<Vec<Uuid>, PlannerError> {
        if let Some(bad) = indices.iter().find(|i| **i >= message.suggested_tasks.len()) {
            return Err(PlannerError::InvalidSuggestion(format!(
                "no task suggestion #{} (message has {})",
                bad,
                message.suggested_tasks.len()
            )));
        }
        let pending: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|i| message.is_pending(&task_tag(*i)))
            .collect();
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        let theme_id = self
            .current_theme(today)
            .map(|t| t.id)
            .ok_or(PlannerError::NoCurrentTheme)?;

        let mut changed = Vec::new();
        for index in &pending {
            let suggestion = &message.suggested_tasks[*index];
            let task = match self.existing_task_for(suggestion) {
                Some(existing) => self.merge_suggestion(existing, suggestion),
                None => self.task_from_suggestion(suggestion, theme_id, today)?,
            };
            changed.push(task);
        }

        for task in &changed {
            match self.tasks.iter_mut().find(|t| t.id == task.id) {
                Some(slot) => *slot = task.clone(),
                None => self.tasks.push(task.clone()),
            }
        }
        for index in &pending {
            message.applied.insert(task_tag(*index));
        }
        tracing::info!(applied = pending.len(), "applied task suggestions");

        self.db.save_tasks(&self.owner_id, &changed)?;
        Ok(changed.into_iter().map(|t| t.id).collect())
    }

    fn existing_task_for(&self, suggestion: &TaskSuggestion) -> Option<Task> {
        let id = suggestion.id.as_deref().map(str::trim)?;
        let id = Uuid::parse_str(id).ok()?;
        self.task(id).cloned()
    }

    fn merge_suggestion(&self, mut task: Task, suggestion: &TaskSuggestion) -> Task {
        if let Some(title) = suggestion.title.as_deref().filter(|t| !t.trim().is_empty()) {
            task.title = title.trim().to_string();
        }
        if let Some(description) = &suggestion.description {
            task.description = Some(description.clone());
        }
        if let Some(category) = &suggestion.category {
            task.category = Category::parse_lenient(category);
        }
        if let Some(due) = suggestion.due_date.as_deref().filter(|d| utils::parse_due(d).is_some()) {
            task.due_date = due.to_string();
        }
        if let Some(minutes) = suggestion.estimated_minutes {
            task.estimated_minutes = minutes;
        }
        if suggestion.story_id.is_some() {
            task.story_id = resolve_story_id(suggestion.story_id.as_deref(), &self.stories);
        }
        if let Some(important) = suggestion.is_important {
            task.is_important = important;
        }
        if let Some(completed) = suggestion.completed {
            task.completed = completed;
        }
        if let Some(subtasks) = &suggestion.subtasks {
            task.subtasks = subtasks
                .iter()
                .map(|s| Subtask::new(s.title().trim().to_string()))
                .collect();
        }
        task
    }

    fn task_from_suggestion(
        &self,
        suggestion: &TaskSuggestion,
        theme_id: Uuid,
        today: NaiveDate,
    ) -> Result<Task, PlannerError> {
        let title = suggestion
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PlannerError::InvalidSuggestion("task suggestion has no title".to_string()))?;
        let due = suggestion
            .due_date
            .clone()
            .filter(|d| utils::parse_due(d).is_some())
            .unwrap_or_else(|| today.format("%Y-%m-%d").to_string());

        let mut task = Task::new(title.to_string(), theme_id, due);
        task.ai_generated = true;
        task.description = suggestion.description.clone();
        task.category = suggestion
            .category
            .as_deref()
            .map(Category::parse_lenient)
            .unwrap_or(Category::Personal);
        if let Some(minutes) = suggestion.estimated_minutes {
            task.estimated_minutes = minutes;
        }
        task.story_id = resolve_story_id(suggestion.story_id.as_deref(), &self.stories);
        task.is_important = suggestion.is_important.unwrap_or(false);
        task.subtasks = suggestion
            .subtasks
            .iter()
            .flatten()
            .map(|s| Subtask::new(s.title().trim().to_string()))
            .collect();
        Ok(task)
    }

    /// Create the suggested era and make it current
    pub fn apply_theme_suggestion(
        &mut self,
        message: &mut ChatMessage,
        today: NaiveDate,
    ) -> Result<Option<Uuid>, PlannerError> {
        let Some(suggestion) = message.suggested_theme.clone() else {
            return Err(PlannerError::InvalidSuggestion("message has no era suggestion".to_string()));
        };
        if !message.is_pending(THEME_TAG) {
            return Ok(None);
        }
        let title = suggestion.title.trim();
        if title.is_empty() {
            return Err(PlannerError::InvalidSuggestion("era suggestion has no title".to_string()));
        }

        let start = suggestion
            .start_date
            .as_deref()
            .and_then(|d| utils::parse_date(d).ok())
            .unwrap_or(today);
        let end = suggestion
            .end_date
            .as_deref()
            .and_then(|d| utils::parse_date(d).ok())
            .filter(|end| *end >= start)
            .or_else(|| start.checked_add_days(Days::new(DEFAULT_ERA_DAYS)))
            .unwrap_or(start);

        let mut theme = Theme::new(title.to_string(), start, end);
        theme.description = suggestion.description.unwrap_or_default();
        theme.style = suggestion
            .style
            .as_deref()
            .and_then(ThemeStyle::preset)
            .unwrap_or_default();

        message.applied.insert(THEME_TAG.to_string());
        let id = self.add_theme(theme)?;
        self.selected_theme_id = Some(id);
        Ok(Some(id))
    }

    /// Create the suggested story under the current era (or globally when there is none)
    pub fn apply_story_suggestion(
        &mut self,
        message: &mut ChatMessage,
        today: NaiveDate,
    ) -> Result<Option<Uuid>, PlannerError> {
        let Some(suggestion) = message.suggested_story.clone() else {
            return Err(PlannerError::InvalidSuggestion("message has no story suggestion".to_string()));
        };
        if !message.is_pending(STORY_TAG) {
            return Ok(None);
        }
        let title = suggestion.title.trim();
        if title.is_empty() {
            return Err(PlannerError::InvalidSuggestion("story suggestion has no title".to_string()));
        }

        let theme_id = self.current_theme(today).map(|t| t.id);
        let mut story = Story::new(title.to_string(), theme_id);
        story.description = suggestion.description.clone();
        story.is_important = suggestion.is_important.unwrap_or(false);

        message.applied.insert(STORY_TAG.to_string());
        let id = self.add_story(story)?;
        Ok(Some(id))
    }
}

/// Mark a suggestion as rejected. Returns false when it was no longer pending.
pub fn reject_suggestion(message: &mut ChatMessage, tag: &str) -> bool {
    if !message.is_pending(tag) {
        return false;
    }
    message.rejected.insert(tag.to_string())
}

/// The explicitly selected era if it exists, else the first era whose range
/// contains `today`, else the most recently created one.
pub fn pick_current_theme(themes: &[Theme], selected: Option<Uuid>, today: NaiveDate) -> Option<&Theme> {
    if let Some(theme) = selected.and_then(|id| themes.iter().find(|t| t.id == id)) {
        return Some(theme);
    }
    if let Some(theme) = themes.iter().find(|t| t.contains(today)) {
        return Some(theme);
    }
    themes.iter().max_by_key(|t| t.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Sender, StorySuggestion, ThemeSuggestion};
    use chrono::{TimeZone, Utc};

    const OWNER: &str = "owner-1";

    fn day(s: &str) -> NaiveDate {
        utils::parse_date(s).unwrap()
    }

    fn planner() -> Planner {
        Planner::load(Database::open_in_memory().unwrap(), OWNER).unwrap()
    }

    fn theme(title: &str, start: &str, end: &str) -> Theme {
        Theme::new(title.to_string(), day(start), day(end))
    }

    fn suggestion(title: &str) -> TaskSuggestion {
        TaskSuggestion {
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    fn ai_message(tasks: Vec<TaskSuggestion>) -> ChatMessage {
        let mut message = ChatMessage::new(Sender::Ai, "Here you go".to_string());
        message.suggested_tasks = tasks;
        message
    }

    #[test]
    fn current_theme_by_range_then_most_recent() {
        let mut winter = theme("Winter", "2026-01-01", "2026-02-15");
        winter.created_at = Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap();
        let mut summer = theme("Summer", "2026-06-01", "2026-08-31");
        summer.created_at = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut autumn = theme("Autumn", "2025-09-01", "2025-11-30");
        autumn.created_at = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        let themes = vec![autumn, winter.clone(), summer.clone()];

        assert_eq!(pick_current_theme(&themes, None, day("2026-01-20")).unwrap().id, winter.id);
        assert_eq!(pick_current_theme(&themes, None, day("2026-04-10")).unwrap().id, summer.id);
        assert_eq!(
            pick_current_theme(&themes, Some(summer.id), day("2026-01-20")).unwrap().id,
            summer.id
        );
        assert_eq!(
            pick_current_theme(&themes, Some(Uuid::new_v4()), day("2026-01-20")).unwrap().id,
            winter.id
        );
        assert!(pick_current_theme(&[], None, day("2026-01-20")).is_none());
    }

    #[test]
    fn deleting_theme_removes_its_tasks_and_stories() {
        let mut planner = planner();
        let keep = planner.add_theme(theme("Keep", "2026-01-01", "2026-02-15")).unwrap();
        let gone = planner.add_theme(theme("Gone", "2026-03-01", "2026-04-15")).unwrap();
        let story = planner.add_story(Story::new("Gone story".to_string(), Some(gone))).unwrap();
        let global = planner.add_story(Story::new("Global".to_string(), None)).unwrap();
        let mut doomed = Task::new("Doomed".to_string(), gone, "2026-03-02".to_string());
        doomed.story_id = Some(story);
        planner.add_task(doomed).unwrap();
        let mut linked = Task::new("Kept".to_string(), keep, "2026-01-05".to_string());
        linked.story_id = Some(story);
        let kept = planner.add_task(linked).unwrap();

        planner.delete_theme(gone).unwrap();

        assert_eq!(planner.themes().len(), 1);
        assert_eq!(planner.tasks().iter().map(|t| t.id).collect::<Vec<_>>(), vec![kept]);
        assert_eq!(planner.stories().iter().map(|s| s.id).collect::<Vec<_>>(), vec![global]);
        assert_eq!(planner.task(kept).unwrap().story_id, None);

        // the detached task still writes cleanly
        assert!(planner.toggle_task(kept).unwrap());

        planner.reload().unwrap();
        assert_eq!(planner.themes().len(), 1);
        assert_eq!(planner.tasks().len(), 1);
        assert_eq!(planner.stories().len(), 1);
        let reloaded = planner.task(kept).unwrap();
        assert!(reloaded.completed);
        assert_eq!(reloaded.story_id, None);
    }

    #[test]
    fn deleting_last_theme_is_rejected() {
        let mut planner = planner();
        let only = planner.add_theme(theme("Only", "2026-01-01", "2026-02-15")).unwrap();
        assert!(matches!(planner.delete_theme(only), Err(PlannerError::LastTheme)));
        assert_eq!(planner.themes().len(), 1);
    }

    #[test]
    fn task_requires_known_theme_and_drops_unknown_story() {
        let mut planner = planner();
        let orphan = Task::new("Orphan".to_string(), Uuid::new_v4(), "2026-01-01".to_string());
        assert!(matches!(planner.add_task(orphan), Err(PlannerError::UnknownTheme(_))));

        let era = planner.add_theme(theme("Era", "2026-01-01", "2026-02-15")).unwrap();
        let mut task = Task::new("Loose".to_string(), era, "2026-01-02".to_string());
        task.story_id = Some(Uuid::new_v4());
        let id = planner.add_task(task).unwrap();
        assert_eq!(planner.task(id).unwrap().story_id, None);
    }

    #[test]
    fn deleting_story_detaches_tasks() {
        let mut planner = planner();
        let era = planner.add_theme(theme("Era", "2026-01-01", "2026-02-15")).unwrap();
        let story = planner.add_story(Story::new("S".to_string(), Some(era))).unwrap();
        let mut task = Task::new("T".to_string(), era, "2026-01-02".to_string());
        task.story_id = Some(story);
        let task_id = planner.add_task(task).unwrap();

        planner.delete_story(story).unwrap();
        assert_eq!(planner.task(task_id).unwrap().story_id, None);
    }

    #[test]
    fn toggles_and_subtasks_persist() {
        let mut planner = planner();
        let era = planner.add_theme(theme("Era", "2026-01-01", "2026-02-15")).unwrap();
        let task_id = planner
            .add_task(Task::new("Pack".to_string(), era, "2026-01-10".to_string()))
            .unwrap();
        planner.set_remaining_minutes(task_id, Some(10)).unwrap();
        let sub = planner.add_subtask(task_id, "Socks".to_string()).unwrap();

        assert!(planner.toggle_subtask(task_id, sub).unwrap());
        assert!(planner.toggle_task(task_id).unwrap());
        assert!(matches!(
            planner.toggle_subtask(task_id, Uuid::new_v4()),
            Err(PlannerError::UnknownSubtask(_))
        ));

        planner.reload().unwrap();
        let task = planner.task(task_id).unwrap();
        assert!(task.completed);
        assert_eq!(task.remaining_minutes, None);
        assert!(task.subtasks[0].completed);
    }

    #[test]
    fn applying_subset_marks_only_those_indices() {
        let mut planner = planner();
        planner.add_theme(theme("Era", "2026-01-01", "2026-02-15")).unwrap();
        let mut message = ai_message(vec![suggestion("A"), suggestion("B"), suggestion("C")]);

        let created = planner
            .apply_task_suggestions(&mut message, &[0, 2], day("2026-01-20"))
            .unwrap();

        assert_eq!(created.len(), 2);
        assert!(!message.is_pending("task:0"));
        assert!(message.is_pending("task:1"));
        assert!(!message.is_pending("task:2"));
        let titles: Vec<&str> = planner.tasks().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "C"]);
        assert!(planner.tasks().iter().all(|t| t.ai_generated));

        let again = planner
            .apply_task_suggestions(&mut message, &[0], day("2026-01-20"))
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(planner.tasks().len(), 2);

        assert!(matches!(
            planner.apply_task_suggestions(&mut message, &[7], day("2026-01-20")),
            Err(PlannerError::InvalidSuggestion(_))
        ));
    }

    #[test]
    fn unmatched_story_reference_yields_general_task() {
        let mut planner = planner();
        let era = planner.add_theme(theme("Era", "2026-01-01", "2026-02-15")).unwrap();
        let fitness = planner.add_story(Story::new("Fitness".to_string(), Some(era))).unwrap();

        let mut by_title = suggestion("Swim");
        by_title.story_id = Some("FITNESS".to_string());
        let mut unmatched = suggestion("Paint");
        unmatched.story_id = Some("Art Projects".to_string());
        let mut message = ai_message(vec![by_title, unmatched]);

        let ids = planner
            .apply_task_suggestions(&mut message, &[0, 1], day("2026-01-20"))
            .unwrap();
        assert_eq!(planner.task(ids[0]).unwrap().story_id, Some(fitness));
        assert_eq!(planner.task(ids[1]).unwrap().story_id, None);
    }

    #[test]
    fn suggestion_with_existing_id_updates_task() {
        let mut planner = planner();
        let era = planner.add_theme(theme("Era", "2026-01-01", "2026-02-15")).unwrap();
        let id = planner
            .add_task(Task::new("Run".to_string(), era, "2026-01-10".to_string()))
            .unwrap();

        let update = TaskSuggestion {
            id: Some(id.to_string()),
            due_date: Some("2026-01-12".to_string()),
            estimated_minutes: Some(50),
            category: Some("health".to_string()),
            ..Default::default()
        };
        let mut message = ai_message(vec![update]);
        planner
            .apply_task_suggestions(&mut message, &[0], day("2026-01-20"))
            .unwrap();

        assert_eq!(planner.tasks().len(), 1);
        let task = planner.task(id).unwrap();
        assert_eq!(task.title, "Run");
        assert_eq!(task.due_date, "2026-01-12");
        assert_eq!(task.estimated_minutes, 50);
        assert_eq!(task.category, Category::Health);
        assert!(!task.ai_generated);
    }

    #[test]
    fn task_suggestions_need_an_era() {
        let mut planner = planner();
        let mut message = ai_message(vec![suggestion("A")]);
        assert!(matches!(
            planner.apply_task_suggestions(&mut message, &[0], day("2026-01-20")),
            Err(PlannerError::NoCurrentTheme)
        ));
        assert!(message.is_pending("task:0"));
    }

    #[test]
    fn theme_and_story_suggestions_apply_once() {
        let mut planner = planner();
        let mut message = ChatMessage::new(Sender::Ai, "New chapter".to_string());
        message.suggested_theme = Some(ThemeSuggestion {
            title: "Lisbon Era".to_string(),
            start_date: Some("2026-05-01".to_string()),
            end_date: Some("not a date".to_string()),
            style: Some("forest".to_string()),
            ..Default::default()
        });
        message.suggested_story = Some(StorySuggestion {
            title: "Learn Portuguese".to_string(),
            is_important: Some(true),
            ..Default::default()
        });

        let theme_id = planner
            .apply_theme_suggestion(&mut message, day("2026-01-20"))
            .unwrap()
            .unwrap();
        let theme = planner.theme(theme_id).unwrap();
        assert_eq!(theme.end_date, day("2026-07-30"));
        assert_eq!(theme.style, ThemeStyle::preset("forest").unwrap());
        assert_eq!(planner.current_theme(day("2026-01-20")).unwrap().id, theme_id);

        let story_id = planner
            .apply_story_suggestion(&mut message, day("2026-01-20"))
            .unwrap()
            .unwrap();
        let story = planner.story(story_id).unwrap();
        assert_eq!(story.theme_id, Some(theme_id));
        assert!(story.is_important);

        assert_eq!(planner.apply_theme_suggestion(&mut message, day("2026-01-20")).unwrap(), None);
        assert_eq!(planner.themes().len(), 1);
    }

    #[test]
    fn rejected_suggestion_is_not_applied() {
        let mut planner = planner();
        planner.add_theme(theme("Era", "2026-01-01", "2026-02-15")).unwrap();
        let mut message = ai_message(vec![suggestion("A"), suggestion("B")]);

        assert!(reject_suggestion(&mut message, &task_tag(1)));
        assert!(!reject_suggestion(&mut message, &task_tag(1)));
        let applied = planner
            .apply_task_suggestions(&mut message, &[0, 1], day("2026-01-20"))
            .unwrap();
        assert_eq!(applied.len(), 1);
        assert!(message.rejected.contains("task:1"));
        assert!(!message.applied.contains("task:1"));
    }

    #[test]
    fn work_session_totals_saturate_on_huge_estimates() {
        let mut planner = planner();
        planner.add_theme(theme("Era", "2026-01-01", "2026-02-15")).unwrap();
        let huge = TaskSuggestion {
            title: Some("Forever".to_string()),
            estimated_minutes: Some(4_000_000_000),
            ..Default::default()
        };
        let mut message = ai_message(vec![huge.clone(), huge]);
        planner
            .apply_task_suggestions(&mut message, &[0, 1], day("2026-01-20"))
            .unwrap();

        let session = planner.work_session(day("2026-01-20"));
        assert_eq!(session.unclassified.len(), 2);
        assert_eq!(session.planned_minutes, u32::MAX);
        assert_eq!(session.remaining_minutes, u32::MAX);
    }

    #[test]
    fn work_session_groups_incomplete_tasks_by_lno() {
        let mut planner = planner();
        let era = planner.add_theme(theme("Era", "2026-01-01", "2026-02-15")).unwrap();
        let lever = planner
            .add_task(Task::new("Pitch deck".to_string(), era, "2026-01-20".to_string()))
            .unwrap();
        let admin = planner
            .add_task(Task::new("Expenses".to_string(), era, "2026-01-20".to_string()))
            .unwrap();
        let done = planner
            .add_task(Task::new("Done".to_string(), era, "2026-01-20".to_string()))
            .unwrap();
        planner.add_task(Task::new("Inbox".to_string(), era, "2026-01-20".to_string())).unwrap();
        planner.set_lno(lever, Some(Lno::Leverage)).unwrap();
        planner.set_lno(admin, Some(Lno::Overhead)).unwrap();
        planner.set_remaining_minutes(admin, Some(5)).unwrap();
        planner.toggle_task(done).unwrap();

        let session = planner.work_session(day("2026-01-20"));
        assert_eq!(session.leverage.len(), 1);
        assert_eq!(session.overhead.len(), 1);
        assert!(session.neutral.is_empty());
        assert_eq!(session.unclassified.len(), 1);
        assert_eq!(session.planned_minutes, 90);
        assert_eq!(session.remaining_minutes, 65);
    }

    #[test]
    fn context_shows_current_era_tasks_and_global_stories() {
        let mut planner = planner();
        let now = planner.add_theme(theme("Now", "2026-01-01", "2026-02-15")).unwrap();
        let later = planner.add_theme(theme("Later", "2026-03-01", "2026-04-15")).unwrap();
        planner.add_task(Task::new("Here".to_string(), now, "2026-01-03".to_string())).unwrap();
        planner.add_task(Task::new("There".to_string(), later, "2026-03-03".to_string())).unwrap();
        planner.add_story(Story::new("Global".to_string(), None)).unwrap();
        planner.add_story(Story::new("Elsewhere".to_string(), Some(later))).unwrap();

        let ctx = planner.context(day("2026-01-20"));
        assert_eq!(ctx.theme.unwrap().id, now);
        assert_eq!(ctx.tasks.len(), 1);
        assert_eq!(ctx.tasks[0].title, "Here");
        assert_eq!(ctx.stories.len(), 1);
        assert_eq!(ctx.stories[0].title, "Global");
    }

    #[test]
    fn empty_owner_cannot_load() {
        let result = Planner::load(Database::open_in_memory().unwrap(), "");
        assert!(matches!(
            result,
            Err(PlannerError::Database(DatabaseError::NotAuthenticated))
        ));
    }
}
