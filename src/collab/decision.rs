//! Decision collaborator: turns a turn brief into a proposed action
//!
//! The LLM backend is a model-agnostic HTTP client supporting both
//! Anthropic and OpenAI-compatible APIs. The model proposes actions only;
//! it never mutates the world and everything it returns still has to pass
//! adjudication.

use crate::actions::{ActionKind, ProposedAction};
use crate::agents::AgentProfile;
use crate::brief::TurnBrief;
use crate::core::error::{EngineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

#[async_trait]
pub trait DecisionBackend: Send + Sync {
    /// Propose one action for the agent described by `profile`, reasoning
    /// only over `brief`
    async fn decide(&self, brief: &TurnBrief, profile: &AgentProfile) -> Result<ProposedAction>;
}

/// API format type
#[derive(Debug, Clone, PartialEq)]
pub enum ApiFormat {
    Anthropic,
    OpenAI,
}

/// Async LLM decision client
pub struct LlmDecisionBackend {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
    api_format: ApiFormat,
}

const DECIDE_SYSTEM_PROMPT: &str = r#"You are the decision model for one character in a turn-based narrative simulation.
Given the character's turn brief, choose exactly one action and answer with a single JSON object:

{
  "action": "MOVE" | "INTERACT" | "ATTACK" | "TRANSFER" | "SPEAK" | "OBSERVE" | "WAIT",
  "target": "<name of a visible entity, or null>",
  "intent": "<one sentence, in character>",
  "justification": "<why this action follows from the brief>",
  "confidence": <0.0-1.0>,
  "costs": { "<attribute>": <amount>, ... }
}

Only reference entities named in the brief. Answer with the JSON object and nothing else."#;

impl LlmDecisionBackend {
    pub fn new(api_key: String, api_url: String, model: String) -> Self {
        let api_format = Self::detect_api_format(&api_url);
        Self {
            client: Client::new(),
            api_key,
            api_url,
            model,
            api_format,
        }
    }

    fn detect_api_format(url: &str) -> ApiFormat {
        if url.contains("anthropic.com") {
            ApiFormat::Anthropic
        } else {
            // DeepSeek, OpenAI, and other compatible APIs use OpenAI format
            ApiFormat::OpenAI
        }
    }

    /// Create a client from environment variables
    ///
    /// Required: LLM_API_KEY
    /// Optional: LLM_API_URL (defaults to Anthropic API)
    /// Optional: LLM_MODEL (defaults to claude-3-haiku-20240307)
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| EngineError::DecisionBackend("LLM_API_KEY not set".into()))?;
        let api_url = std::env::var("LLM_API_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".into());
        let model =
            std::env::var("LLM_MODEL").unwrap_or_else(|_| "claude-3-haiku-20240307".into());
        Ok(Self::new(api_key, api_url, model))
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        match self.api_format {
            ApiFormat::Anthropic => self.complete_anthropic(system, user).await,
            ApiFormat::OpenAI => self.complete_openai(system, user).await,
        }
    }

    async fn complete_anthropic(&self, system: &str, user: &str) -> Result<String> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: 2048,
            system: system.into(),
            messages: vec![Message {
                role: "user".into(),
                content: user.into(),
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::DecisionBackend(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EngineError::DecisionBackend(format!("API error: {}", error_text)));
        }

        let completion: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| EngineError::DecisionBackend(e.to_string()))?;

        completion
            .content
            .first()
            .map(|c| c.text.clone())
            .ok_or_else(|| EngineError::DecisionBackend("Empty response".into()))
    }

    async fn complete_openai(&self, system: &str, user: &str) -> Result<String> {
        let request = OpenAIRequest {
            model: self.model.clone(),
            max_tokens: 2048,
            messages: vec![
                Message {
                    role: "system".into(),
                    content: system.into(),
                },
                Message {
                    role: "user".into(),
                    content: user.into(),
                },
            ],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::DecisionBackend(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EngineError::DecisionBackend(format!("API error: {}", error_text)));
        }

        let completion: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| EngineError::DecisionBackend(e.to_string()))?;

        completion
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| EngineError::DecisionBackend("Empty response".into()))
    }
}

#[async_trait]
impl DecisionBackend for LlmDecisionBackend {
    async fn decide(&self, brief: &TurnBrief, profile: &AgentProfile) -> Result<ProposedAction> {
        let user_prompt = format!("{}\nChoose your action as JSON:", brief.render(profile));
        let response = self.complete(DECIDE_SYSTEM_PROMPT, &user_prompt).await?;
        let json_str = extract_json(&response)?;
        let wire: ActionWire = serde_json::from_str(json_str).map_err(|e| {
            EngineError::DecisionBackend(format!(
                "Failed to parse action: {} - Response: {}",
                e, response
            ))
        })?;
        wire.resolve(brief, profile)
    }
}

/// The decision model's wire format, with entities referenced by name
#[derive(Debug, Deserialize)]
struct ActionWire {
    action: ActionKind,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    intent: String,
    #[serde(default)]
    justification: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    costs: std::collections::BTreeMap<String, f64>,
}

fn default_confidence() -> f32 {
    0.5
}

impl ActionWire {
    /// Resolve entity names against the brief's visible slice. A target
    /// name the agent cannot see is a backend error, not a world write.
    fn resolve(self, brief: &TurnBrief, profile: &AgentProfile) -> Result<ProposedAction> {
        let target = match self.target.as_deref() {
            None | Some("") => None,
            Some(name) => {
                let entity = brief
                    .visible
                    .entities
                    .iter()
                    .find(|e| e.name == name)
                    .ok_or_else(|| {
                        EngineError::DecisionBackend(format!(
                            "model targeted {:?}, which {} cannot see",
                            name, profile.name
                        ))
                    })?;
                Some(entity.id)
            }
        };

        let mut action = ProposedAction::new(profile.id, self.action, self.intent);
        action.target = target;
        action.justification = self.justification;
        action.confidence = self.confidence.clamp(0.0, 1.0);
        action.costs = self.costs.into_iter().collect();
        Ok(action)
    }
}

/// Extract the first JSON object from a model response, tolerating fenced
/// code blocks and surrounding prose
fn extract_json(response: &str) -> Result<&str> {
    let trimmed = response.trim();
    let start = trimmed
        .find('{')
        .ok_or_else(|| EngineError::DecisionBackend(format!("No JSON in response: {}", trimmed)))?;
    let mut depth = 0usize;
    for (i, c) in trimmed[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&trimmed[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    Err(EngineError::DecisionBackend(format!(
        "Unterminated JSON in response: {}",
        trimmed
    )))
}

// Anthropic API format
#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}

// OpenAI-compatible API format (DeepSeek, OpenAI, etc.)
#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

// Shared
#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

/// Scripted backend: a queue of canned actions per agent, used by the
/// runner demo and the integration tests. Agents with an empty queue wait.
#[derive(Default)]
pub struct ScriptedBackend {
    queues: Mutex<ahash::AHashMap<crate::core::types::AgentId, VecDeque<ProposedAction>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, action: ProposedAction) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.entry(action.agent).or_default().push_back(action);
    }
}

#[async_trait]
impl DecisionBackend for ScriptedBackend {
    async fn decide(&self, _brief: &TurnBrief, profile: &AgentProfile) -> Result<ProposedAction> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        Ok(queues
            .get_mut(&profile.id)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| ProposedAction::wait(profile.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = LlmDecisionBackend::new(
            "test-key".into(),
            "https://api.example.com".into(),
            "test-model".into(),
        );
        assert_eq!(client.api_format, ApiFormat::OpenAI);
        let client = LlmDecisionBackend::new(
            "test-key".into(),
            "https://api.anthropic.com/v1/messages".into(),
            "test-model".into(),
        );
        assert_eq!(client.api_format, ApiFormat::Anthropic);
    }

    #[test]
    fn test_extract_json_from_fenced_block() {
        let response = "Here is my decision:\n```json\n{\"action\": \"WAIT\"}\n```";
        assert_eq!(extract_json(response).unwrap(), "{\"action\": \"WAIT\"}");
    }

    #[test]
    fn test_extract_json_nested() {
        let response = r#"{"action": "SPEAK", "costs": {"energy": 1.0}}"#;
        assert_eq!(extract_json(response).unwrap(), response);
    }

    #[test]
    fn test_extract_json_missing() {
        assert!(extract_json("I cannot decide.").is_err());
    }

    #[test]
    fn test_wire_parse_defaults() {
        let wire: ActionWire = serde_json::from_str(r#"{"action": "OBSERVE"}"#).unwrap();
        assert_eq!(wire.action, ActionKind::Observe);
        assert!(wire.target.is_none());
        assert!((wire.confidence - 0.5).abs() < 1e-6);
    }
}
