use crate::error::{LlmError, Result};
use crate::heuristic;
use crate::judge::{CandidateSummary, IntentJudge, SelectionJudgment};
use async_trait::async_trait;
use relay_protocol::Intent;
use std::collections::BTreeSet;

/// Deterministic judge for tests and offline operation.
///
/// Intent analysis delegates to the heuristic extractor. Selection picks
/// the candidate whose capability text shares the most tokens with the
/// query, abstaining when nothing overlaps at all, unless configured to
/// always abstain or to simulate an unavailable service.
pub struct StubJudge {
    confidence: f32,
    abstain: bool,
    unavailable: bool,
}

impl StubJudge {
    pub fn new(confidence: f32) -> Self {
        Self {
            confidence,
            abstain: false,
            unavailable: false,
        }
    }

    /// Judge that explicitly declines every selection.
    pub fn abstaining() -> Self {
        Self {
            confidence: 0.0,
            abstain: true,
            unavailable: false,
        }
    }

    /// Judge whose every call fails as if the service were down.
    pub fn unavailable() -> Self {
        Self {
            confidence: 0.0,
            abstain: false,
            unavailable: true,
        }
    }

    fn tokens(text: &str) -> BTreeSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }
}

impl Default for StubJudge {
    fn default() -> Self {
        Self::new(0.9)
    }
}

#[async_trait]
impl IntentJudge for StubJudge {
    async fn analyze_intent(&self, prompt: &str) -> Result<Intent> {
        if self.unavailable {
            return Err(LlmError::ServiceUnavailable("stub is offline".to_string()));
        }
        Ok(heuristic::extract(prompt))
    }

    async fn select_server(
        &self,
        query: &str,
        candidates: &[CandidateSummary],
    ) -> Result<SelectionJudgment> {
        if self.unavailable {
            return Err(LlmError::ServiceUnavailable("stub is offline".to_string()));
        }
        if self.abstain || candidates.is_empty() {
            return Ok(SelectionJudgment {
                selected_id: None,
                confidence: 0.0,
                reasoning: "no suitable candidate".to_string(),
                recommended_tool: None,
            });
        }

        let query_tokens = Self::tokens(query);
        let (best, overlap) = candidates
            .iter()
            .map(|candidate| {
                let overlap = Self::tokens(&candidate.capability_text)
                    .intersection(&query_tokens)
                    .count();
                (candidate, overlap)
            })
            .max_by_key(|(_, overlap)| *overlap)
            .expect("candidates is non-empty");

        if overlap == 0 {
            return Ok(SelectionJudgment {
                selected_id: None,
                confidence: 0.0,
                reasoning: "no capability overlap with the request".to_string(),
                recommended_tool: None,
            });
        }

        Ok(SelectionJudgment {
            selected_id: Some(best.descriptor_id.clone()),
            confidence: self.confidence,
            reasoning: format!("capability overlap with '{}'", best.descriptor_id),
            recommended_tool: None,
        })
    }
}
