use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Content, GenerateRequest, LlmError, Part, TextGenerator};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Direct client for the hosted Gemini `generateContent` endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    api_base: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(api_base: String, api_key: String, default_model: String) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            default_model,
            client: reqwest::Client::new(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.api_base, model)
    }
}

fn build_body(request: &GenerateRequest) -> GenerateContentRequest {
    let mut contents = request.history.clone();
    contents.push(Content::user(request.prompt.clone()));
    GenerateContentRequest {
        contents,
        system_instruction: request
            .system_instruction
            .as_ref()
            .filter(|s| !s.trim().is_empty())
            .map(|text| SystemInstruction {
                parts: vec![Part { text: text.clone() }],
            }),
        generation_config: request.config.clone(),
    }
}

/// Drop the request URL from transport errors before they are shown or logged
fn redact(err: reqwest::Error) -> LlmError {
    LlmError::Transport(err.without_url())
}

/// Join the text parts of the first candidate
fn extract_text(response: GenerateContentResponse) -> Result<String, LlmError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let body = build_body(request);

        tracing::debug!(model, turns = body.contents.len(), "calling gemini");
        let response = self
            .client
            .post(self.endpoint(model))
            .header(API_KEY_HEADER, self.api_key.as_str())
            .json(&body)
            .send()
            .await
            .map_err(redact)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            return Err(LlmError::Api { status, body });
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(redact)?;
        extract_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_appends_prompt_after_history() {
        let mut request = GenerateRequest::new("and tomorrow?");
        request.history = vec![Content::user("what's today?"), Content::model("Rest day.")];
        request.system_instruction = Some("You plan.".to_string());
        request.config = Some(serde_json::json!({ "temperature": 0.2 }));

        let value = serde_json::to_value(build_body(&request)).unwrap();
        assert_eq!(value["contents"].as_array().unwrap().len(), 3);
        assert_eq!(value["contents"][2]["role"], "user");
        assert_eq!(value["contents"][2]["parts"][0]["text"], "and tomorrow?");
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "You plan.");
        assert_eq!(value["generationConfig"]["temperature"], 0.2);
    }

    #[test]
    fn blank_system_instruction_is_omitted() {
        let mut request = GenerateRequest::new("hi");
        request.system_instruction = Some("  ".to_string());
        let value = serde_json::to_value(build_body(&request)).unwrap();
        assert!(value.get("systemInstruction").is_none());
        assert!(value.get("generationConfig").is_none());
    }

    #[test]
    fn text_parts_of_first_candidate_are_joined() {
        let response: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [
                { "content": { "role": "model", "parts": [{ "text": "Hello " }, { "text": "there" }] } },
                { "content": { "role": "model", "parts": [{ "text": "ignored" }] } }
            ]
        }))
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Hello there");

        let empty: GenerateContentResponse =
            serde_json::from_value(serde_json::json!({ "candidates": [] })).unwrap();
        assert!(matches!(extract_text(empty), Err(LlmError::EmptyResponse)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_error_hides_api_key() {
        let client = GeminiClient::new(
            "http://127.0.0.1:1".to_string(),
            "SECRET-KEY-123".to_string(),
            "m1".to_string(),
        );
        let err = client.generate(&GenerateRequest::new("hi")).await.unwrap_err();
        assert!(matches!(err, LlmError::Transport(_)));
        assert!(!err.to_string().contains("SECRET-KEY-123"));
    }

    #[test]
    fn endpoint_names_the_model() {
        let client = GeminiClient::new(
            "https://example.test/".to_string(),
            "k".to_string(),
            "m1".to_string(),
        );
        assert_eq!(
            client.endpoint("m2"),
            "https://example.test/v1beta/models/m2:generateContent"
        );
    }
}
