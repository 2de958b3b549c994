//! Extraction of `<JSON_ACTION type="…">…</JSON_ACTION>` blocks from model text.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::llm::LlmError;
use crate::models::{Story, StorySuggestion, TaskSuggestion, ThemeSuggestion};

static ACTION_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<JSON_ACTION\s+type\s*=\s*["']?([A-Za-z_]+)["']?\s*>(.*?)</JSON_ACTION\s*>"#)
        .expect("action block pattern is valid")
});

static EXTRA_BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("blank line pattern is valid"));

/// Model reply split into prose and structured suggestions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub display_text: String,
    pub tasks: Vec<TaskSuggestion>,
    pub theme: Option<ThemeSuggestion>,
    pub story: Option<StorySuggestion>,
}

/// Split a reply into display text and suggestions.
///
/// Every matched block is removed from the display text, including blocks
/// whose JSON fails to parse or whose type is unknown.
pub fn parse_response(text: &str) -> ParsedResponse {
    let mut parsed = ParsedResponse::default();

    for caps in ACTION_BLOCK.captures_iter(text) {
        let kind = caps.get(1).map(|m| m.as_str().to_ascii_uppercase()).unwrap_or_default();
        let body = strip_code_fence(caps.get(2).map(|m| m.as_str()).unwrap_or_default());

        match kind.as_str() {
            "TASKS" => match parse_tasks(body) {
                Ok(tasks) => parsed.tasks.extend(tasks),
                Err(e) => tracing::warn!(error = %e, "ignoring malformed TASKS block"),
            },
            "THEME" if parsed.theme.is_none() => match serde_json::from_str::<ThemeSuggestion>(body) {
                Ok(theme) => parsed.theme = Some(theme),
                Err(e) => tracing::warn!(error = %e, "ignoring malformed THEME block"),
            },
            "STORY" if parsed.story.is_none() => match serde_json::from_str::<StorySuggestion>(body) {
                Ok(story) => parsed.story = Some(story),
                Err(e) => tracing::warn!(error = %e, "ignoring malformed STORY block"),
            },
            "THEME" | "STORY" => tracing::debug!(kind = %kind, "ignoring extra action block"),
            other => tracing::warn!(kind = other, "ignoring unknown action block"),
        }
    }

    let stripped = ACTION_BLOCK.replace_all(text, "");
    let collapsed = EXTRA_BLANK_LINES.replace_all(&stripped, "\n\n");
    parsed.display_text = collapsed.trim().to_string();
    parsed
}

/// TASKS carries an array; a lone object is read as a one-element array.
fn parse_tasks(body: &str) -> Result<Vec<TaskSuggestion>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    if value.is_object() {
        return Ok(vec![serde_json::from_value(value)?]);
    }
    serde_json::from_value(value)
}

fn strip_code_fence(body: &str) -> &str {
    let trimmed = body.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Resolve a suggested story reference: exact id first, then
/// case-insensitive title, else no story.
pub fn resolve_story_id(suggested: Option<&str>, stories: &[Story]) -> Option<Uuid> {
    let wanted = suggested.map(str::trim).filter(|s| !s.is_empty())?;

    if let Some(story) = stories.iter().find(|s| s.id.to_string() == wanted) {
        return Some(story.id);
    }
    let lowered = wanted.to_lowercase();
    let by_title = stories
        .iter()
        .find(|s| s.title.trim().to_lowercase() == lowered)
        .map(|s| s.id);
    if by_title.is_none() {
        tracing::debug!(story = wanted, "suggested story not found, task stays general");
    }
    by_title
}

/// Parse JSON out of a pure-data reply: raw, fenced, or the outermost
/// bracketed span.
pub fn parse_lenient_json<T: DeserializeOwned>(response: &str) -> Result<T, LlmError> {
    if let Ok(parsed) = serde_json::from_str::<T>(response.trim()) {
        return Ok(parsed);
    }

    let fenced = response
        .find("```")
        .map(|start| strip_code_fence(&response[start..]))
        .and_then(|body| body.find("```").map(|end| &body[..end]).or(Some(body)));
    if let Some(body) = fenced {
        if let Ok(parsed) = serde_json::from_str::<T>(body.trim()) {
            return Ok(parsed);
        }
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (response.find(open), response.rfind(close)) {
            if start < end {
                if let Ok(parsed) = serde_json::from_str::<T>(&response[start..=end]) {
                    return Ok(parsed);
                }
            }
        }
    }

    Err(LlmError::InvalidJson(response.chars().take(200).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_tasks_and_bad_theme_keep_prose() {
        let reply = r#"Here's a plan for your week!

<JSON_ACTION type="TASKS">
[{"title": "Run 5k", "category": "Health", "dueDate": "2026-01-21", "estimatedMinutes": 35},
 {"title": "Budget review", "category": "Finance"}]
</JSON_ACTION>

<JSON_ACTION type="THEME">{"title": "Spring", "startDate": </JSON_ACTION>

Let me know what you think."#;

        let parsed = parse_response(reply);
        assert_eq!(parsed.tasks.len(), 2);
        assert_eq!(parsed.tasks[0].title.as_deref(), Some("Run 5k"));
        assert_eq!(parsed.tasks[0].estimated_minutes, Some(35));
        assert!(parsed.theme.is_none());
        assert_eq!(
            parsed.display_text,
            "Here's a plan for your week!\n\nLet me know what you think."
        );
        assert!(!parsed.display_text.contains("JSON_ACTION"));
    }

    #[test]
    fn text_without_blocks_is_untouched() {
        let parsed = parse_response("  Just chatting.  ");
        assert_eq!(parsed.display_text, "Just chatting.");
        assert!(parsed.tasks.is_empty());
        assert!(parsed.story.is_none());
    }

    #[test]
    fn fenced_story_and_theme_blocks_parse() {
        let reply = "Sure.\n<JSON_ACTION type=\"STORY\">\n```json\n{\"title\": \"Learn Spanish\", \"isImportant\": true}\n```\n</JSON_ACTION>\n<JSON_ACTION type='theme'>{\"title\": \"Lisbon Era\", \"startDate\": \"2026-05-01\", \"endDate\": \"2026-08-31\", \"style\": \"sunset\"}</JSON_ACTION>";
        let parsed = parse_response(reply);
        let story = parsed.story.unwrap();
        assert_eq!(story.title, "Learn Spanish");
        assert_eq!(story.is_important, Some(true));
        let theme = parsed.theme.unwrap();
        assert_eq!(theme.title, "Lisbon Era");
        assert_eq!(theme.style.as_deref(), Some("sunset"));
        assert_eq!(parsed.display_text, "Sure.");
    }

    #[test]
    fn multiple_task_blocks_concatenate_and_single_object_is_accepted() {
        let reply = r#"<JSON_ACTION type="TASKS">{"title": "A"}</JSON_ACTION>middle<JSON_ACTION type="TASKS">[{"title": "B"}]</JSON_ACTION>"#;
        let parsed = parse_response(reply);
        let titles: Vec<_> = parsed.tasks.iter().filter_map(|t| t.title.clone()).collect();
        assert_eq!(titles, vec!["A", "B"]);
        assert_eq!(parsed.display_text, "middle");
    }

    #[test]
    fn unknown_block_type_is_stripped() {
        let parsed = parse_response(r#"ok <JSON_ACTION type="HABIT">{"x": 1}</JSON_ACTION>"#);
        assert_eq!(parsed.display_text, "ok");
        assert!(parsed.tasks.is_empty());
    }

    #[test]
    fn story_resolution_prefers_id_then_title() {
        let fitness = Story::new("Fitness".to_string(), None);
        let travel = Story::new("Travel Plans".to_string(), None);
        let stories = vec![fitness.clone(), travel.clone()];

        let by_id = travel.id.to_string();
        assert_eq!(resolve_story_id(Some(by_id.as_str()), &stories), Some(travel.id));
        assert_eq!(resolve_story_id(Some("  fitness "), &stories), Some(fitness.id));
        assert_eq!(resolve_story_id(Some("Cooking"), &stories), None);
        assert_eq!(resolve_story_id(None, &stories), None);
    }

    #[test]
    fn lenient_json_finds_array_in_prose_or_fence() {
        let plain: Vec<String> = parse_lenient_json(r#"["a", "b"]"#).unwrap();
        assert_eq!(plain, vec!["a", "b"]);

        let fenced: Vec<String> =
            parse_lenient_json("Here you go:\n```json\n[\"c\"]\n```\nEnjoy").unwrap();
        assert_eq!(fenced, vec!["c"]);

        let embedded: Vec<String> = parse_lenient_json("Subtasks: [\"d\", \"e\"] done").unwrap();
        assert_eq!(embedded, vec!["d", "e"]);

        assert!(parse_lenient_json::<Vec<String>>("no json here").is_err());
    }
}
