//! LLM providers behind the decision engine.
//!
//! Any provider honouring `generate(prompt, screenshot) → raw text` plugs in;
//! the engine owns normalisation, so the real endpoint and the deterministic
//! mock satisfy the same contract.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::warn;

use crate::errors::AgentError;

/// One decision request: the assembled prompt plus the marked screenshot.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub prompt: &'a str,
    pub screenshot_png: Option<&'a [u8]>,
    pub model: &'a str,
}

#[async_trait]
pub trait DecisionProvider: Send + Sync {
    /// Produce the raw model answer for a request. Implementations handle
    /// their own transient retries; persistent rate limiting surfaces as
    /// [`AgentError::RateLimited`].
    async fn generate(&self, request: DecisionRequest<'_>) -> Result<String, AgentError>;
}

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_STEP: Duration = Duration::from_millis(1_200);

/// Vision endpoint speaking the generateContent protocol.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    api_base: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, api_base: String) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(40))
            .build()
            .map_err(|err| AgentError::upstream(format!("http client: {err}")))?;
        Ok(Self {
            client,
            api_key,
            api_base,
        })
    }

    fn request_body(request: &DecisionRequest<'_>) -> Value {
        let mut parts = vec![json!({ "text": request.prompt })];
        if let Some(png) = request.screenshot_png {
            parts.push(json!({
                "inline_data": {
                    "mime_type": "image/png",
                    "data": base64::engine::general_purpose::STANDARD.encode(png),
                }
            }));
        }
        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "temperature": 0.4 },
        })
    }

    fn extract_text(payload: &Value) -> Option<String> {
        let parts = payload
            .get("candidates")?
            .get(0)?
            .get("content")?
            .get("parts")?
            .as_array()?;
        let text: String = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[async_trait]
impl DecisionProvider for GeminiProvider {
    async fn generate(&self, request: DecisionRequest<'_>) -> Result<String, AgentError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base.trim_end_matches('/'),
            request.model,
            self.api_key
        );
        let body = Self::request_body(&request);

        let mut rate_limited = false;
        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let response = self.client.post(&url).json(&body).send().await;
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if status == 429 || status == 503 {
                        rate_limited = status == 429;
                        last_error = format!("upstream returned {status}");
                        warn!(attempt, status, "transient upstream failure, backing off");
                        sleep(BACKOFF_STEP * attempt).await;
                        continue;
                    }
                    if !resp.status().is_success() {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(AgentError::upstream(format!("{status}: {body}")));
                    }
                    let payload: Value = resp
                        .json()
                        .await
                        .map_err(|err| AgentError::upstream(format!("decode: {err}")))?;
                    return Self::extract_text(&payload)
                        .ok_or_else(|| AgentError::upstream("empty candidate text"));
                }
                Err(err) => {
                    last_error = err.to_string();
                    warn!(attempt, error = %last_error, "request failed, backing off");
                    sleep(BACKOFF_STEP * attempt).await;
                }
            }
        }
        if rate_limited {
            Err(AgentError::RateLimited)
        } else {
            Err(AgentError::upstream(last_error))
        }
    }
}

/// Deterministic provider for tests and offline development: hands out
/// queued answers, then keeps returning the final fallback.
#[derive(Default)]
pub struct MockDecisionProvider {
    responses: Mutex<VecDeque<String>>,
    fallback: String,
}

impl MockDecisionProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: r#"{"thought":"Nothing left to do.","action":"done"}"#.to_string(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }
}

#[async_trait]
impl DecisionProvider for MockDecisionProvider {
    async fn generate(&self, _request: DecisionRequest<'_>) -> Result<String, AgentError> {
        Ok(self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_body_carries_inline_image() {
        let request = DecisionRequest {
            prompt: "look at this",
            screenshot_png: Some(&[1, 2, 3]),
            model: "gemini-2.0-flash",
        };
        let body = GeminiProvider::request_body(&request);
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
    }

    #[test]
    fn candidate_text_is_joined() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"action\":" }, { "text": "\"wait\"}" }] }
            }]
        });
        assert_eq!(
            GeminiProvider::extract_text(&payload).unwrap(),
            "{\"action\":\n\"wait\"}"
        );
    }

    #[tokio::test]
    async fn mock_drains_queue_then_falls_back() {
        let mock = MockDecisionProvider::new(vec!["first".to_string()]);
        let request = DecisionRequest {
            prompt: "p",
            screenshot_png: None,
            model: "m",
        };
        assert_eq!(mock.generate(request).await.unwrap(), "first");
        assert!(mock.generate(request).await.unwrap().contains("done"));
    }
}
