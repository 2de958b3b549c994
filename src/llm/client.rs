use async_trait::async_trait;

use super::{Content, GenerateRequest, GenerateResponse, LlmError, TextGenerator};
use crate::config::Config;

/// Client side of the generative-text proxy.
#[derive(Clone)]
pub struct ProxyClient {
    url: String,
    token: Option<String>,
    fallback_model: Option<String>,
    client: reqwest::Client,
}

impl ProxyClient {
    pub fn new(url: String, token: Option<String>) -> Self {
        Self {
            url,
            token,
            fallback_model: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut client = Self::new(config.proxy.url.clone(), config.proxy_token().map(str::to_string));
        client.fallback_model = Some(config.gemini.stable_model.clone());
        client
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn fallback_model(&self) -> Option<&str> {
        self.fallback_model.as_deref()
    }

    /// Send a prompt with optional history, system instruction and generation config
    pub async fn send(
        &self,
        prompt: &str,
        history: &[Content],
        system_instruction: Option<&str>,
        config: Option<serde_json::Value>,
    ) -> Result<String, LlmError> {
        self.post(&build_request(prompt, history, system_instruction, config))
            .await
    }

    /// Like [`send`](Self::send) but retries once against the fallback model
    pub async fn send_with_fallback(
        &self,
        prompt: &str,
        history: &[Content],
        system_instruction: Option<&str>,
        config: Option<serde_json::Value>,
    ) -> Result<String, LlmError> {
        let request = build_request(prompt, history, system_instruction, config);
        super::generate_with_fallback(self, &request, self.fallback_model()).await
    }

    async fn post(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let mut req = self.client.post(&self.url).json(request);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        tracing::debug!(url = %self.url, model = ?request.model, "posting prompt to proxy");
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<GenerateResponse>(&body) {
            Ok(GenerateResponse { error: Some(error), .. }) => Err(LlmError::Proxy(error)),
            Ok(GenerateResponse { text: Some(text), .. }) if status.is_success() => Ok(text),
            Ok(_) if status.is_success() => Err(LlmError::EmptyResponse),
            _ => Err(LlmError::Api {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

fn build_request(
    prompt: &str,
    history: &[Content],
    system_instruction: Option<&str>,
    config: Option<serde_json::Value>,
) -> GenerateRequest {
    GenerateRequest {
        prompt: prompt.to_string(),
        model: None,
        config,
        history: history.to_vec(),
        system_instruction: system_instruction.map(str::to_string),
    }
}

#[async_trait]
impl TextGenerator for ProxyClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        self.post(request).await
    }
}
