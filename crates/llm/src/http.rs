use crate::error::{LlmError, Result};
use crate::heuristic;
use crate::judge::{CandidateSummary, IntentJudge, SelectionJudgment};
use async_trait::async_trait;
use relay_protocol::Intent;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;

const INTENT_SYSTEM_PROMPT: &str = r#"You analyze a user request for a tool-routing system.
Return ONLY a JSON object, no prose, no markdown, with fields:
- "intent": one sentence restating the user's goal
- "keywords": list of the important lowercase keywords from the request"#;

const SELECT_SYSTEM_PROMPT: &str = r#"You pick the best tool server for a user request, or decline.
You are given the request and a JSON list of candidate servers with their
capability text and similarity scores. Return ONLY a JSON object with fields:
- "selected_id": the descriptor_id of the best candidate, or null if none fits
- "confidence": your confidence in the pick, 0.0 to 1.0
- "reasoning": one short sentence
- "recommended_tool": name of the most relevant tool if you know one, else null"#;

/// OpenAI-compatible chat-completions judge.
pub struct HttpJudge {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct IntentPayload {
    intent: String,
    #[serde(default)]
    keywords: Vec<String>,
}

impl HttpJudge {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::ServiceUnavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    async fn chat_once(&self, system: &str, user: &str) -> std::result::Result<String, ChatFailure> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "temperature": 0.1
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(ChatFailure::transport)?;
        let status = response.status();
        if status.is_server_error() {
            return Err(ChatFailure::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(ChatFailure::Fatal(format!("HTTP {status}")));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ChatFailure::Malformed(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ChatFailure::Malformed("no choices in response".to_string()))
    }

    /// One retry for transient transport failures, none for malformed
    /// responses.
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        match self.chat_once(system, user).await {
            Ok(content) => Ok(content),
            Err(ChatFailure::Transient(first)) => {
                log::warn!("LLM request failed ({first}), retrying once");
                self.chat_once(system, user).await.map_err(|failure| match failure {
                    ChatFailure::Malformed(reason) => LlmError::MalformedResponse(reason),
                    ChatFailure::Transient(reason) | ChatFailure::Fatal(reason) => {
                        LlmError::ServiceUnavailable(reason)
                    }
                })
            }
            Err(ChatFailure::Fatal(reason)) => Err(LlmError::ServiceUnavailable(reason)),
            Err(ChatFailure::Malformed(reason)) => Err(LlmError::MalformedResponse(reason)),
        }
    }
}

enum ChatFailure {
    Transient(String),
    Fatal(String),
    Malformed(String),
}

impl ChatFailure {
    fn transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Transient(err.to_string())
        } else {
            Self::Fatal(err.to_string())
        }
    }
}

#[async_trait]
impl IntentJudge for HttpJudge {
    async fn analyze_intent(&self, prompt: &str) -> Result<Intent> {
        let content = self.chat(INTENT_SYSTEM_PROMPT, prompt).await?;
        let payload: IntentPayload = parse_json_content(&content)?;

        let normalized_query = payload.intent.trim().to_string();
        if normalized_query.is_empty() {
            return Err(LlmError::MalformedResponse("empty intent".to_string()));
        }

        let keywords: BTreeSet<String> = payload
            .keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        // Models sometimes return an empty keyword list for terse prompts;
        // backfill from the heuristic so broadening still has material.
        let keywords = if keywords.is_empty() {
            heuristic::extract(prompt).keywords
        } else {
            keywords
        };

        Ok(Intent {
            normalized_query,
            keywords,
        })
    }

    async fn select_server(
        &self,
        query: &str,
        candidates: &[CandidateSummary],
    ) -> Result<SelectionJudgment> {
        let candidates_json = serde_json::to_string_pretty(candidates)
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;
        let user = format!("Request: {query}\n\nCandidates:\n{candidates_json}");

        let content = self.chat(SELECT_SYSTEM_PROMPT, &user).await?;
        let judgment: SelectionJudgment = parse_json_content(&content)?;

        if !(0.0..=1.0).contains(&judgment.confidence) {
            return Err(LlmError::MalformedResponse(format!(
                "confidence {} out of range",
                judgment.confidence
            )));
        }
        Ok(judgment)
    }
}

/// Parse a JSON object out of model output, tolerating markdown fences.
fn parse_json_content<T: serde::de::DeserializeOwned>(content: &str) -> Result<T> {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_start())
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed);

    serde_json::from_str(stripped.trim())
        .map_err(|e| LlmError::MalformedResponse(format!("{e}: {stripped}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_plain_json_content() {
        let judgment: SelectionJudgment = parse_json_content(
            r#"{"selected_id": "s3-tool", "confidence": 0.9, "reasoning": "storage request"}"#,
        )
        .unwrap();
        assert_eq!(judgment.selected_id.as_deref(), Some("s3-tool"));
        assert_eq!(judgment.confidence, 0.9);
    }

    #[test]
    fn parses_fenced_json_content() {
        let judgment: SelectionJudgment = parse_json_content(
            "```json\n{\"selected_id\": null, \"confidence\": 0.2}\n```",
        )
        .unwrap();
        assert_eq!(judgment.selected_id, None);
    }

    #[test]
    fn rejects_non_json_content() {
        let result: Result<SelectionJudgment> = parse_json_content("I think s3-tool is best");
        assert!(matches!(result, Err(LlmError::MalformedResponse(_))));
    }
}
