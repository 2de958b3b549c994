use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{Category, Story, Task, Theme};

/// Snapshot of planning state the copilot is allowed to see.
#[derive(Debug, Clone)]
pub struct PlanningContext<'a> {
    pub theme: Option<&'a Theme>,
    pub tasks: Vec<&'a Task>,
    pub stories: Vec<&'a Story>,
    pub today: NaiveDate,
}

const PROTOCOL: &str = r#"When the user asks you to plan, create, change or reschedule things, keep your
reply conversational and append one block per kind of change, in exactly this form:

<JSON_ACTION type="TASKS">
[{"id": "existing task id, only when updating", "title": "...", "description": "...",
  "category": "Career|Health|Finance|Lifestyle|Travel|Personal", "dueDate": "YYYY-MM-DD",
  "estimatedMinutes": 30, "storyId": "story id or story title", "isImportant": false,
  "subtasks": ["...", "..."]}]
</JSON_ACTION>

<JSON_ACTION type="STORY">
{"title": "...", "description": "...", "isImportant": false}
</JSON_ACTION>

<JSON_ACTION type="THEME">
{"title": "...", "description": "...", "startDate": "YYYY-MM-DD", "endDate": "YYYY-MM-DD",
 "style": "ocean|forest|sunset|violet|slate"}
</JSON_ACTION>

Rules:
- TASKS is always a JSON array; STORY and THEME are single JSON objects.
- Include an "id" only to update a task listed above; omit it for new tasks.
- Only emit a block when the user wants changes. Never mention the blocks in prose.
- Keep prose short and encouraging. Use Markdown for lists."#;

/// Build the system instruction: role, current state as context, and the action-tag convention.
pub fn build_system_instruction(ctx: &PlanningContext<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "You are the planning copilot of a personal goal planner organised into eras \
         (date-bounded periods), stories (groups of related tasks) and tasks."
    );
    let _ = writeln!(out, "Today is {}.", ctx.today.format("%Y-%m-%d (%A)"));
    out.push('\n');

    match ctx.theme {
        Some(theme) => {
            let _ = writeln!(
                out,
                "Current era: \"{}\" from {} to {}{}.",
                theme.title,
                theme.start_date,
                theme.end_date,
                if theme.completed { " (completed)" } else { "" }
            );
            if !theme.description.trim().is_empty() {
                let _ = writeln!(out, "Era description: {}", theme.description.trim());
            }
        }
        None => {
            let _ = writeln!(out, "There is no current era yet; suggest one with a THEME block if useful.");
        }
    }
    out.push('\n');

    if ctx.stories.is_empty() {
        let _ = writeln!(out, "Stories: none.");
    } else {
        let _ = writeln!(out, "Stories:");
        for story in &ctx.stories {
            let _ = writeln!(
                out,
                "- id={} title=\"{}\"{}",
                story.id,
                story.title,
                if story.is_important { " [important]" } else { "" }
            );
        }
    }
    out.push('\n');

    if ctx.tasks.is_empty() {
        let _ = writeln!(out, "Tasks: none.");
    } else {
        let _ = writeln!(out, "Tasks:");
        for task in &ctx.tasks {
            let story = task
                .story_id
                .and_then(|id| ctx.stories.iter().find(|s| s.id == id))
                .map(|s| format!(" story=\"{}\"", s.title))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "- id={} [{}] \"{}\" category={} due={} minutes={}{}{}",
                task.id,
                if task.completed { "x" } else { " " },
                task.title,
                task.category,
                task.due_date,
                task.estimated_minutes,
                story,
                if task.is_important { " [important]" } else { "" }
            );
        }
    }
    out.push('\n');

    let categories: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
    let _ = writeln!(out, "Valid categories: {}.", categories.join(", "));
    out.push('\n');
    out.push_str(PROTOCOL);
    out
}

/// Prompt asking for a subtask breakdown as a bare JSON array of strings.
pub fn build_subtask_prompt(task: &Task) -> String {
    let mut out = format!(
        "Break the task \"{}\" ({} minutes, category {}) into 3 to 6 concrete subtasks.",
        task.title, task.estimated_minutes, task.category
    );
    if let Some(description) = task.description.as_deref().filter(|d| !d.trim().is_empty()) {
        let _ = write!(out, " Details: {}", description.trim());
    }
    if !task.subtasks.is_empty() {
        let existing: Vec<&str> = task.subtasks.iter().map(|s| s.title.as_str()).collect();
        let _ = write!(out, " Existing subtasks to avoid repeating: {}.", existing.join("; "));
    }
    out.push_str(" Respond only with a JSON array of short subtask titles.");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::parse_date;

    #[test]
    fn instruction_embeds_state_and_protocol() {
        let theme = Theme::new(
            "Build Strength".to_string(),
            parse_date("2026-01-01").unwrap(),
            parse_date("2026-02-15").unwrap(),
        );
        let story = Story::new("Marathon".to_string(), Some(theme.id));
        let mut task = Task::new("Long run".to_string(), theme.id, "2026-01-20".to_string());
        task.story_id = Some(story.id);
        task.category = Category::Health;

        let ctx = PlanningContext {
            theme: Some(&theme),
            tasks: vec![&task],
            stories: vec![&story],
            today: parse_date("2026-01-18").unwrap(),
        };
        let text = build_system_instruction(&ctx);

        assert!(text.contains("Today is 2026-01-18 (Sunday)."));
        assert!(text.contains("Current era: \"Build Strength\" from 2026-01-01 to 2026-02-15."));
        assert!(text.contains(&format!("id={}", task.id)));
        assert!(text.contains("story=\"Marathon\""));
        assert!(text.contains("category=Health due=2026-01-20 minutes=30"));
        assert!(text.contains("<JSON_ACTION type=\"TASKS\">"));
        assert!(text.contains("<JSON_ACTION type=\"THEME\">"));
    }

    #[test]
    fn instruction_without_era_invites_theme_block() {
        let ctx = PlanningContext {
            theme: None,
            tasks: Vec::new(),
            stories: Vec::new(),
            today: parse_date("2026-03-01").unwrap(),
        };
        let text = build_system_instruction(&ctx);
        assert!(text.contains("no current era"));
        assert!(text.contains("Tasks: none."));
    }

    #[test]
    fn subtask_prompt_lists_existing_items() {
        let mut task = Task::new("Move flat".to_string(), uuid::Uuid::new_v4(), "2026-04-01".to_string());
        task.subtasks.push(crate::models::Subtask::new("Book van".to_string()));
        let prompt = build_subtask_prompt(&task);
        assert!(prompt.contains("\"Move flat\""));
        assert!(prompt.contains("Book van"));
        assert!(prompt.ends_with("JSON array of short subtask titles."));
    }
}
