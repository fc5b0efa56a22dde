use crate::error::{Result, SearchError};
use std::time::Duration;
use tracing::{debug, warn};

/// Thin client for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Configuration(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check that the backend is reachable and accepts the credential.
    pub async fn probe(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| match classify_request_error(e) {
                SearchError::Translation(msg) => {
                    SearchError::Connectivity(format!("translation backend unavailable: {}", msg))
                }
                other => other,
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SearchError::Configuration(format!(
                "translation backend rejected the token ({})",
                status
            )));
        }
        if !status.is_success() {
            return Err(SearchError::Connectivity(format!(
                "translation backend probe failed ({})",
                status
            )));
        }
        debug!("Translation backend reachable, model {}", self.model);
        Ok(())
    }

    /// One system + user exchange; returns the assistant's text.
    pub async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let body = self.request_body(system, user);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_request_error)?;

        // Check HTTP status
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SearchError::Connectivity(format!(
                "translation backend rejected the token ({})",
                status
            )));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SearchError::Translation(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SearchError::Translation(format!("Failed to parse LLM response: {}", e)))?;

        extract_content(&response_json)
    }

    fn request_body(&self, system: &str, user: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
        });

        // Reasoning models reject temperature and need room for reasoning tokens.
        if self.model.starts_with("gpt-5") || self.model.starts_with("o1") || self.model.starts_with("o3") {
            body["max_completion_tokens"] = serde_json::json!(2000);
        } else if self.model.starts_with("gpt-4") {
            body["temperature"] = serde_json::json!(0.0);
            body["max_completion_tokens"] = serde_json::json!(500);
        } else {
            body["temperature"] = serde_json::json!(0.0);
            body["max_tokens"] = serde_json::json!(500);
        }
        body
    }
}

/// Timeouts and protocol hiccups end the turn; an unreachable host ends the
/// session.
fn classify_request_error(err: reqwest::Error) -> SearchError {
    if err.is_timeout() {
        SearchError::Translation("LLM request timed out".to_string())
    } else if err.is_connect() {
        SearchError::Connectivity(format!("cannot reach translation backend: {}", err))
    } else {
        SearchError::Translation(format!("LLM API call failed: {}", err))
    }
}

fn extract_content(response_json: &serde_json::Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(SearchError::Translation(format!("LLM API error: {}", error)));
    }

    let choice = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| SearchError::Translation("No choices in LLM response".to_string()))?;

    match choice.get("finish_reason").and_then(|r| r.as_str()) {
        Some("length") => warn!("LLM response was truncated due to length limit"),
        Some("content_filter") => {
            return Err(SearchError::Translation(
                "LLM response was filtered by content policy".to_string(),
            ))
        }
        _ => {}
    }

    let content = choice["message"]["content"].as_str().unwrap_or("").trim();
    if content.is_empty() {
        return Err(SearchError::Translation("Empty content in LLM response".to_string()));
    }
    Ok(content.to_string())
}
