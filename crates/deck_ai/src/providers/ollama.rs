//! Ollama provider -- local model inference via the Ollama REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ProviderError, TextProvider};
use crate::types::{GenerateRequest, GenerateResponse};

/// Default Ollama endpoint.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Ollama API types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Option<Vec<OllamaModelEntry>>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelEntry {
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    model: String,
    response: Option<String>,
    #[serde(default)]
    done: bool,
    eval_count: Option<u32>,
    prompt_eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaErrorBody {
    error: String,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Ollama local model provider.
pub struct OllamaProvider {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider pointing at `base_url` (defaults to
    /// [`DEFAULT_BASE_URL`]). Every generation call is bounded by `timeout`.
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.into())
            .trim_end_matches('/')
            .to_string();
        Self {
            base_url,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build_body<'a>(request: &'a GenerateRequest) -> OllamaGenerateRequest<'a> {
        let options = if request.max_tokens.is_some() || request.temperature.is_some() {
            Some(OllamaOptions {
                num_predict: request.max_tokens,
                temperature: request.temperature,
            })
        } else {
            None
        };
        OllamaGenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            stream: false,
            options,
        }
    }

    /// Map a transport error onto the provider taxonomy.
    fn classify(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(format!(
                "no response from {} within {:.0}s",
                self.base_url,
                self.timeout.as_secs_f64()
            ))
        } else if err.is_connect() {
            ProviderError::Unreachable(format!("cannot connect to {}: {err}", self.base_url))
        } else if err.is_decode() {
            ProviderError::Protocol(err.to_string())
        } else {
            ProviderError::Other(err.to_string())
        }
    }
}

/// Turn an HTTP response from `/api/generate` into a [`GenerateResponse`].
pub(crate) async fn read_generate_response(
    resp: reqwest::Response,
    model: &str,
) -> Result<GenerateResponse, ProviderError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| ProviderError::Protocol(format!("failed to read response body: {e}")))?;

    if !status.is_success() {
        let message = serde_json::from_str::<OllamaErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::ModelUnavailable(format!("{model}: {message}")));
        }
        return Err(ProviderError::Http {
            status: status.as_u16(),
            body: message,
        });
    }

    parse_generate_body(&body)
}

fn parse_generate_body(body: &str) -> Result<GenerateResponse, ProviderError> {
    let data: OllamaGenerateResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Protocol(format!("JSON parse error: {e}")))?;

    let Some(text) = data.response else {
        return Err(ProviderError::Protocol(
            "response body has no 'response' field".into(),
        ));
    };
    if !data.done {
        warn!("Ollama returned an unfinished generation");
    }

    Ok(GenerateResponse {
        text,
        model: data.model,
        prompt_tokens: data.prompt_eval_count.unwrap_or(0),
        completion_tokens: data.eval_count.unwrap_or(0),
    })
}

fn parse_tags_body(body: &str) -> Result<Vec<String>, ProviderError> {
    let data: OllamaTagsResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Protocol(format!("JSON parse error: {e}")))?;
    Ok(data
        .models
        .unwrap_or_default()
        .into_iter()
        .filter_map(|m| m.name)
        .collect())
}

#[async_trait]
impl TextProvider for OllamaProvider {
    fn name(&self) -> &str {
        "Ollama (Local)"
    }

    /// Ping `/api/tags` with a short timeout.
    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                debug!("Ollama not reachable: {e}");
                false
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }
        parse_tags_body(&body)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = Self::build_body(request);

        debug!(
            model = %request.model,
            prompt_chars = request.prompt.len(),
            timeout_secs = self.timeout.as_secs(),
            "sending generate request"
        );

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let result = read_generate_response(resp, &request.model).await;
        if let Ok(ref r) = result {
            debug!(
                prompt_tokens = r.prompt_tokens,
                completion_tokens = r.completion_tokens,
                "generate request finished"
            );
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
