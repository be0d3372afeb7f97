//! Reasoner adapter: the capability-typed LLM wrapper.
//!
//! The core never sees untyped reasoner output: every response is pushed
//! through [`extract_json`] plus serde validation, and a parse failure is a
//! typed [`ReasonerError::Parse`] that flows into the deterministic fallbacks
//! of the adversarial and patch pipelines.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors from the reasoner layer.
#[derive(Debug, thiserror::Error)]
pub enum ReasonerError {
    #[error("reasoner request failed: {0}")]
    Request(String),

    #[error("reasoner response not parseable: {0}")]
    Parse(String),

    #[error("reasoner not configured")]
    NotConfigured,
}

pub type ReasonerResult<T> = std::result::Result<T, ReasonerError>;

/// A single completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerRequest {
    pub system: String,
    pub prompt: String,
}

/// The external reasoning capability.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Short label for logs.
    fn describe(&self) -> String;

    async fn complete(&self, request: &ReasonerRequest) -> ReasonerResult<String>;
}

/// Extract the first balanced JSON object from free-form reasoner output.
///
/// Reasoners wrap JSON in prose and code fences; this scans for the first
/// `{` and returns the balanced object, string-literal aware.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a typed value out of free-form reasoner output.
pub fn parse_response<T: DeserializeOwned>(text: &str) -> ReasonerResult<T> {
    let json = extract_json(text)
        .ok_or_else(|| ReasonerError::Parse("no JSON object in response".to_string()))?;
    serde_json::from_str(json).map_err(|e| ReasonerError::Parse(e.to_string()))
}

/// HTTP reasoner against an OpenAI-compatible chat-completions endpoint.
///
/// Base URL, token, and model come from the environment and are opaque to
/// the core.
pub struct HttpReasoner {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl HttpReasoner {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Build from `HYDRA_REASONER_URL` / `HYDRA_REASONER_TOKEN` /
    /// `HYDRA_REASONER_MODEL`. Returns `None` when no token is configured.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("HYDRA_REASONER_TOKEN").ok()?;
        let base_url = std::env::var("HYDRA_REASONER_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model =
            std::env::var("HYDRA_REASONER_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Some(Self::new(base_url, api_key, model))
    }
}

#[async_trait]
impl Reasoner for HttpReasoner {
    fn describe(&self) -> String {
        format!("http:{}", self.model)
    }

    async fn complete(&self, request: &ReasonerRequest) -> ReasonerResult<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: 0.1,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ReasonerError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReasonerError::Request(format!("http status {status}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReasonerError::Parse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ReasonerError::Parse("empty choices".to_string()))?;

        debug!(reasoner = %self.describe(), bytes = content.len(), "completion received");
        Ok(content)
    }
}

/// Deterministic reasoner for tests: pops scripted responses in order.
///
/// An exhausted script returns `ReasonerError::Request`, which exercises the
/// degradation paths.
pub struct ScriptedReasoner {
    responses: Mutex<Vec<String>>,
}

impl ScriptedReasoner {
    pub fn new(responses: Vec<String>) -> Self {
        let mut reversed = responses;
        reversed.reverse();
        Self {
            responses: Mutex::new(reversed),
        }
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn complete(&self, _request: &ReasonerRequest) -> ReasonerResult<String> {
        self.responses
            .lock()
            .expect("scripted reasoner mutex poisoned")
            .pop()
            .ok_or_else(|| ReasonerError::Request("script exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_from_fenced_prose() {
        let text = "Here is my analysis:\n```json\n{\"exploitable\": true, \"note\": \"a { in a string\"}\n```\nDone.";
        let json = extract_json(text).unwrap();
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["exploitable"], true);
    }

    #[test]
    fn extract_json_handles_nesting() {
        let text = "{\"a\": {\"b\": {\"c\": 1}}} trailing";
        assert_eq!(extract_json(text).unwrap(), "{\"a\": {\"b\": {\"c\": 1}}}");
    }

    #[test]
    fn extract_json_none_without_object() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("{unbalanced").is_none());
    }

    #[test]
    fn parse_response_surfaces_parse_errors() {
        #[derive(Deserialize, Debug)]
        struct Expected {
            #[allow(dead_code)]
            exploitable: bool,
        }
        let err = parse_response::<Expected>("{\"other_field\": 1}").unwrap_err();
        assert!(matches!(err, ReasonerError::Parse(_)));
    }

    #[tokio::test]
    async fn scripted_reasoner_pops_in_order() {
        let reasoner = ScriptedReasoner::new(vec!["first".to_string(), "second".to_string()]);
        let req = ReasonerRequest {
            system: String::new(),
            prompt: String::new(),
        };
        assert_eq!(reasoner.complete(&req).await.unwrap(), "first");
        assert_eq!(reasoner.complete(&req).await.unwrap(), "second");
        assert!(reasoner.complete(&req).await.is_err());
    }
}
