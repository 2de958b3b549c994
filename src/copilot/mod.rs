//! The chat copilot: builds prompts from planning state, calls the model and
//! turns its replies into suggestions attached to chat messages.

pub mod actions;
pub mod prompt;

use std::sync::Arc;

use crate::llm::{Content, GenerateRequest, LlmError, TextGenerator, generate_with_fallback};
use crate::models::{ChatMessage, ChatSession, Sender, Subtask, Task};
use crate::utils;

pub use actions::{ParsedResponse, parse_response, resolve_story_id};
pub use prompt::PlanningContext;

/// Shown in place of a reply when the model cannot be reached.
pub const FALLBACK_REPLY: &str =
    "I'm having trouble reaching the planning assistant right now. Please try again in a moment.";

/// Title given to sessions before their first prompt
pub const UNTITLED_SESSION: &str = "New chat";

const SESSION_TITLE_LEN: usize = 40;
const MAX_HISTORY_MESSAGES: usize = 20;

pub struct Copilot {
    generator: Arc<dyn TextGenerator>,
    fallback_model: Option<String>,
}

impl Copilot {
    pub fn new(generator: Arc<dyn TextGenerator>, fallback_model: Option<String>) -> Self {
        Self {
            generator,
            fallback_model,
        }
    }

    /// Copilot behind the proxy, which already retries preview failures on
    /// the stable model; a failed turn costs one client request.
    pub fn behind_proxy(generator: Arc<dyn TextGenerator>) -> Self {
        Self::new(generator, None)
    }

    /// Append the user's prompt and the copilot's reply to `session`.
    ///
    /// Model failures do not surface as errors: the reply becomes
    /// [`FALLBACK_REPLY`] and the failure is logged.
    pub async fn respond(
        &self,
        session: &mut ChatSession,
        prompt: &str,
        ctx: &PlanningContext<'_>,
    ) -> ChatMessage {
        let history = history_for(&session.messages);

        if session.messages.is_empty() || session.title == UNTITLED_SESSION {
            session.title = utils::truncate(prompt, SESSION_TITLE_LEN);
        }
        session.push(ChatMessage::new(Sender::User, prompt.to_string()));

        let request = GenerateRequest {
            prompt: prompt.to_string(),
            history,
            system_instruction: Some(prompt::build_system_instruction(ctx)),
            ..Default::default()
        };

        let reply = match generate_with_fallback(
            self.generator.as_ref(),
            &request,
            self.fallback_model.as_deref(),
        )
        .await
        {
            Ok(text) => {
                let parsed = parse_response(&text);
                tracing::info!(
                    tasks = parsed.tasks.len(),
                    theme = parsed.theme.is_some(),
                    story = parsed.story.is_some(),
                    "copilot replied"
                );
                let mut message = ChatMessage::new(Sender::Ai, parsed.display_text);
                message.suggested_tasks = parsed.tasks;
                message.suggested_theme = parsed.theme;
                message.suggested_story = parsed.story;
                message
            }
            Err(e) => {
                tracing::error!(error = %e, "copilot request failed");
                ChatMessage::new(Sender::Ai, FALLBACK_REPLY.to_string())
            }
        };

        session.push(reply.clone());
        reply
    }

    /// Ask for a subtask breakdown of `task`, using the JSON response mode.
    pub async fn suggest_subtasks(&self, task: &Task) -> Result<Vec<Subtask>, LlmError> {
        let request = GenerateRequest {
            prompt: prompt::build_subtask_prompt(task),
            config: Some(serde_json::json!({ "responseMimeType": "application/json" })),
            ..Default::default()
        };
        let text = generate_with_fallback(
            self.generator.as_ref(),
            &request,
            self.fallback_model.as_deref(),
        )
        .await?;

        let titles: Vec<String> = actions::parse_lenient_json(&text)?;
        Ok(titles
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(Subtask::new)
            .collect())
    }
}

/// Prior turns in model roles, newest last, capped in length
fn history_for(messages: &[ChatMessage]) -> Vec<Content> {
    let skip = messages.len().saturating_sub(MAX_HISTORY_MESSAGES);
    messages
        .iter()
        .skip(skip)
        .filter(|m| !m.text.trim().is_empty())
        .map(|m| match m.sender {
            Sender::User => Content::user(m.text.clone()),
            Sender::Ai => Content::model(m.text.clone()),
        })
        .collect()
}
