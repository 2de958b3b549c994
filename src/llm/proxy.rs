use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;

use super::{GeminiClient, GenerateRequest, GenerateResponse, LlmError, TextGenerator};
use crate::config::Config;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Invalid bind address '{0}' (expected host:port)")]
    InvalidBind(String),
    #[error("Missing API key (set {0})")]
    MissingApiKey(String),
    #[error("Server IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ProxyState {
    pub generator: Arc<dyn TextGenerator>,
    pub preview_model: String,
    pub stable_model: String,
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Routes: `POST /api/gemini`, `GET /health`.
pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/api/gemini", post(generate))
        .route("/health", get(health))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, auth_middleware))
}

pub async fn serve(config: &Config) -> Result<(), ServeError> {
    let bind_addr = config
        .proxy
        .bind
        .parse::<SocketAddr>()
        .map_err(|_| ServeError::InvalidBind(config.proxy.bind.clone()))?;
    let api_key = config
        .gemini_api_key()
        .ok_or_else(|| ServeError::MissingApiKey(config.gemini.api_key_env.clone()))?;

    let token = config.proxy_token().map(str::to_string);
    if token.is_none() {
        tracing::warn!("proxy token is unset; /api/gemini accepts unauthenticated requests");
    }

    let generator = GeminiClient::new(
        config.gemini.api_base.clone(),
        api_key,
        config.gemini.preview_model.clone(),
    );
    let state = Arc::new(ProxyState {
        generator: Arc::new(generator),
        preview_model: config.gemini.preview_model.clone(),
        stable_model: config.gemini.stable_model.clone(),
        token,
    });

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Proxy listening on http://{}", bind_addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn auth_middleware(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if let Err(status) = authorize(&headers, state.token.as_deref()) {
        return (status, Json(GenerateResponse::error("unauthorized"))).into_response();
    }
    next.run(request).await
}

fn authorize(headers: &HeaderMap, token: Option<&str>) -> Result<(), StatusCode> {
    let Some(token) = token else {
        return Ok(());
    };
    let Some(raw_header) = headers.get(header::AUTHORIZATION) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Ok(auth_value) = raw_header.to_str() else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    if auth_value.trim() != format!("Bearer {}", token) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn generate(
    State(state): State<Arc<ProxyState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> (StatusCode, Json<GenerateResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "rejecting malformed request body");
            return (
                rejection.status(),
                Json(GenerateResponse::error(rejection.body_text())),
            );
        }
    };
    let (status, body) = handle_generate(&state, request).await;
    (status, Json(body))
}

/// Forward one request, falling back from the requested (or preview) model
/// to the stable model once.
async fn handle_generate(
    state: &ProxyState,
    mut request: GenerateRequest,
) -> (StatusCode, GenerateResponse) {
    if request.prompt.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            GenerateResponse::error("prompt is required"),
        );
    }
    if request.model.as_deref().is_none_or(|m| m.trim().is_empty()) {
        request.model = Some(state.preview_model.clone());
    }

    match super::generate_with_fallback(
        state.generator.as_ref(),
        &request,
        Some(state.stable_model.as_str()),
    )
    .await
    {
        Ok(text) => (StatusCode::OK, GenerateResponse::text(text)),
        Err(e) => {
            tracing::error!(error = %e, "generation failed");
            let status = match &e {
                LlmError::MissingApiKey(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_GATEWAY,
            };
            (status, GenerateResponse::error(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedGenerator;
    use axum::http::HeaderValue;

    fn state(generator: Arc<ScriptedGenerator>) -> ProxyState {
        ProxyState {
            generator,
            preview_model: "preview".to_string(),
            stable_model: "stable".to_string(),
            token: None,
        }
    }

    #[tokio::test]
    async fn defaults_to_preview_model() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok("ok".to_string())]));
        let (status, body) =
            handle_generate(&state(generator.clone()), GenerateRequest::new("hi")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, GenerateResponse::text("ok".to_string()));
        assert_eq!(generator.requests()[0].model.as_deref(), Some("preview"));
    }

    #[tokio::test]
    async fn falls_back_to_stable_model() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Err(LlmError::Api {
                status: 404,
                body: "model not found".to_string(),
            }),
            Ok("from stable".to_string()),
        ]));
        let (status, body) =
            handle_generate(&state(generator.clone()), GenerateRequest::new("hi")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.text.as_deref(), Some("from stable"));
        assert_eq!(generator.requests()[1].model.as_deref(), Some("stable"));
    }

    #[tokio::test]
    async fn reports_error_body_when_both_models_fail() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Err(LlmError::EmptyResponse),
            Err(LlmError::EmptyResponse),
        ]));
        let (status, body) =
            handle_generate(&state(generator), GenerateRequest::new("hi")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.text.is_none());
        assert!(body.error.is_some());
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_without_calling_model() {
        let generator = Arc::new(ScriptedGenerator::new(vec![]));
        let (status, body) =
            handle_generate(&state(generator.clone()), GenerateRequest::new("   ")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.as_deref(), Some("prompt is required"));
        assert!(generator.requests().is_empty());
    }

    #[tokio::test]
    async fn upstream_failure_body_does_not_leak_api_key() {
        let generator = GeminiClient::new(
            "http://127.0.0.1:1".to_string(),
            "SECRET-KEY-123".to_string(),
            "preview".to_string(),
        );
        let state = ProxyState {
            generator: Arc::new(generator),
            preview_model: "preview".to_string(),
            stable_model: "stable".to_string(),
            token: None,
        };
        let (status, body) = handle_generate(&state, GenerateRequest::new("hi")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!body.error.unwrap().contains("SECRET-KEY-123"));
    }

    async fn spawn_proxy(token: Option<&str>) -> String {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok("ok".to_string())]));
        let mut state = state(generator);
        state.token = token.map(str::to_string);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(Arc::new(state))).await.unwrap();
        });
        format!("http://{}/api/gemini", addr)
    }

    #[tokio::test]
    async fn malformed_body_and_missing_token_get_error_json() {
        let url = spawn_proxy(Some("s3cret")).await;
        let client = reqwest::Client::new();

        let unauthorized = client
            .post(&url)
            .json(&GenerateRequest::new("hi"))
            .send()
            .await
            .unwrap();
        assert_eq!(unauthorized.status().as_u16(), 401);
        let body: GenerateResponse = unauthorized.json().await.unwrap();
        assert_eq!(body.error.as_deref(), Some("unauthorized"));

        let malformed = client
            .post(&url)
            .bearer_auth("s3cret")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body("{\"prompt\": ")
            .send()
            .await
            .unwrap();
        assert!(malformed.status().is_client_error());
        let body: GenerateResponse = malformed.json().await.unwrap();
        assert!(body.text.is_none());
        assert!(body.error.is_some());

        let ok = client
            .post(&url)
            .bearer_auth("s3cret")
            .json(&GenerateRequest::new("hi"))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status().as_u16(), 200);
        let body: GenerateResponse = ok.json().await.unwrap();
        assert_eq!(body.text.as_deref(), Some("ok"));
    }

    #[test]
    fn authorize_checks_bearer_token_only_when_configured() {
        let empty = HeaderMap::new();
        assert!(authorize(&empty, None).is_ok());
        assert_eq!(authorize(&empty, Some("s3cret")), Err(StatusCode::UNAUTHORIZED));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(authorize(&headers, Some("s3cret")).is_ok());
        assert_eq!(authorize(&headers, Some("other")), Err(StatusCode::UNAUTHORIZED));
    }
}
