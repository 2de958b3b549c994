//! Generative-text plumbing: the proxy wire types, the clients on either
//! side of the proxy, and the proxy server itself.

pub mod client;
pub mod gemini;
pub mod proxy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::ProxyClient;
pub use gemini::GeminiClient;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Failed to reach model endpoint: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Model API returned error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Proxy error: {0}")]
    Proxy(String),
    #[error("Model returned no text")]
    EmptyResponse,
    #[error("Missing API key (set {0})")]
    MissingApiKey(String),
    #[error("Failed to parse model JSON: {0}")]
    InvalidJson(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// One turn of chat history, in the model API's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part { text: text.into() }],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: "model".to_string(),
            parts: vec![Part { text: text.into() }],
        }
    }
}

/// Body of `POST /api/gemini`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: Some(model.to_string()),
            ..self.clone()
        }
    }
}

/// Reply of `POST /api/gemini`: exactly one of the fields is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerateResponse {
    pub fn text(text: String) -> Self {
        Self {
            text: Some(text),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            text: None,
            error: Some(error.into()),
        }
    }
}

/// Anything that turns a request into model text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError>;
}

/// Run `request`, retrying once with `fallback_model` on any error.
///
/// No retry happens when the request already targets the fallback model.
pub async fn generate_with_fallback(
    generator: &dyn TextGenerator,
    request: &GenerateRequest,
    fallback_model: Option<&str>,
) -> Result<String, LlmError> {
    match generator.generate(request).await {
        Ok(text) => Ok(text),
        Err(first) => {
            let Some(fallback) = fallback_model.filter(|m| request.model.as_deref() != Some(*m))
            else {
                return Err(first);
            };
            tracing::warn!(
                model = request.model.as_deref().unwrap_or("default"),
                fallback,
                error = %first,
                "generation failed, retrying with fallback model"
            );
            generator.generate(&request.with_model(fallback)).await
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedGenerator;
    use super::*;

    #[tokio::test]
    async fn fallback_retries_once_with_other_model() {
        let generator = ScriptedGenerator::new(vec![
            Err(LlmError::Proxy("overloaded".to_string())),
            Ok("hello".to_string()),
        ]);
        let request = GenerateRequest::new("hi").with_model("preview");
        let text = generate_with_fallback(&generator, &request, Some("stable"))
            .await
            .unwrap();
        assert_eq!(text, "hello");

        let models: Vec<Option<String>> =
            generator.requests().into_iter().map(|r| r.model).collect();
        assert_eq!(models, vec![Some("preview".to_string()), Some("stable".to_string())]);
    }

    #[tokio::test]
    async fn no_retry_when_already_on_fallback_model() {
        let generator = ScriptedGenerator::new(vec![
            Err(LlmError::EmptyResponse),
            Ok("never".to_string()),
        ]);
        let request = GenerateRequest::new("hi").with_model("stable");
        assert!(
            generate_with_fallback(&generator, &request, Some("stable"))
                .await
                .is_err()
        );
        assert_eq!(generator.requests().len(), 1);
    }

    #[test]
    fn request_uses_camel_case_and_skips_empty_fields() {
        let mut request = GenerateRequest::new("plan my week");
        request.system_instruction = Some("be brief".to_string());
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "prompt": "plan my week", "systemInstruction": "be brief" })
        );
    }
}
