use crate::error::Result;
use async_trait::async_trait;
use relay_protocol::Intent;
use serde::{Deserialize, Serialize};

/// Candidate summary sent to the model for the selection judgment.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateSummary {
    pub descriptor_id: String,
    pub capability_text: String,
    pub similarity_score: f32,
}

/// Structured selection judgment: one chosen id, or an explicit abstention
/// (`selected_id = None`).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SelectionJudgment {
    pub selected_id: Option<String>,
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub recommended_tool: Option<String>,
}

/// Language-model judgments used by the routing engine: intent analysis
/// and candidate selection. Implementations are injected, never ambient.
#[async_trait]
pub trait IntentJudge: Send + Sync {
    async fn analyze_intent(&self, prompt: &str) -> Result<Intent>;

    async fn select_server(
        &self,
        query: &str,
        candidates: &[CandidateSummary],
    ) -> Result<SelectionJudgment>;
}
