use crate::config::ConfidenceCombiner;
use relay_llm::{CandidateSummary, IntentJudge, LlmError};
use relay_protocol::{Candidate, SelectionDecision};
use relay_registry::RegistrySnapshot;
use std::sync::Arc;

/// Precision-oriented selection: a language-model judgment over the ranked
/// candidates, combined with the similarity signal into one confidence.
/// The validator never errors; every path ends in a `SelectionDecision`,
/// with `descriptor_id = None` meaning "no confident match".
pub struct Validator {
    judge: Arc<dyn IntentJudge>,
    combiner: ConfidenceCombiner,
    confidence_threshold: f32,
}

impl Validator {
    pub fn new(
        judge: Arc<dyn IntentJudge>,
        combiner: ConfidenceCombiner,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            judge,
            combiner,
            confidence_threshold,
        }
    }

    pub async fn validate(
        &self,
        normalized_query: &str,
        candidates: &[Candidate],
        registry: &RegistrySnapshot,
    ) -> SelectionDecision {
        if candidates.is_empty() {
            // No model call for an empty candidate list.
            return SelectionDecision::none("no candidates to validate");
        }

        let summaries: Vec<CandidateSummary> = candidates
            .iter()
            .filter_map(|candidate| {
                registry.get(&candidate.descriptor_id).map(|descriptor| CandidateSummary {
                    descriptor_id: candidate.descriptor_id.clone(),
                    capability_text: descriptor.capability_text.clone(),
                    similarity_score: candidate.similarity_score,
                })
            })
            .collect();
        if summaries.is_empty() {
            return SelectionDecision::none("candidates no longer present in registry");
        }

        match self.judge.select_server(normalized_query, &summaries).await {
            Ok(judgment) => {
                let Some(selected_id) = judgment.selected_id else {
                    return SelectionDecision::none(format!(
                        "model abstained: {}",
                        judgment.reasoning
                    ));
                };

                let Some(selected) = candidates
                    .iter()
                    .find(|candidate| candidate.descriptor_id == selected_id)
                else {
                    log::warn!("Model selected unknown candidate '{selected_id}', treating as abstention");
                    return SelectionDecision::none(format!(
                        "model selected unknown candidate '{selected_id}'"
                    ));
                };

                let combined = self
                    .combiner
                    .combine(judgment.confidence, selected.similarity_score);
                if combined < self.confidence_threshold {
                    return SelectionDecision {
                        descriptor_id: None,
                        combined_confidence: combined,
                        reasoning_summary: format!(
                            "combined confidence {combined:.3} below threshold {:.3}",
                            self.confidence_threshold
                        ),
                        recommended_tool: None,
                    };
                }

                SelectionDecision {
                    descriptor_id: Some(selected_id),
                    combined_confidence: combined,
                    reasoning_summary: judgment.reasoning,
                    recommended_tool: judgment.recommended_tool,
                }
            }
            Err(err) => self.similarity_fallback(candidates, &err),
        }
    }

    /// Degraded decision when the model judgment is unreachable or
    /// unusable: accept the top-ranked candidate iff its similarity alone
    /// clears the acceptance threshold.
    fn similarity_fallback(&self, candidates: &[Candidate], err: &LlmError) -> SelectionDecision {
        log::warn!("Selection judgment degraded to similarity only: {err}");
        let top = &candidates[0];
        if top.similarity_score >= self.confidence_threshold {
            SelectionDecision {
                descriptor_id: Some(top.descriptor_id.clone()),
                combined_confidence: top.similarity_score,
                reasoning_summary: "similarity-only fallback (language model unavailable)"
                    .to_string(),
                recommended_tool: None,
            }
        } else {
            SelectionDecision {
                descriptor_id: None,
                combined_confidence: top.similarity_score,
                reasoning_summary: format!(
                    "language model unavailable and top similarity {:.3} below threshold {:.3}",
                    top.similarity_score, self.confidence_threshold
                ),
                recommended_tool: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use relay_llm::StubJudge;
    use relay_protocol::REGISTRY_SCHEMA_VERSION;
    use relay_registry::RegistryDocument;
    use serde_json::json;

    fn snapshot(ids: &[(&str, &str)]) -> RegistrySnapshot {
        let servers = ids
            .iter()
            .map(|(id, capability)| {
                json!({
                    "id": id,
                    "display_name": id,
                    "capability_text": capability,
                    "launch": { "command": "uvx" }
                })
            })
            .collect::<Vec<_>>();
        let doc: RegistryDocument = serde_json::from_value(json!({
            "schema_version": REGISTRY_SCHEMA_VERSION,
            "servers": servers
        }))
        .unwrap();
        RegistrySnapshot::try_from(doc).unwrap()
    }

    fn candidate(id: &str, score: f32, rank: usize) -> Candidate {
        Candidate {
            descriptor_id: id.to_string(),
            similarity_score: score,
            rank,
        }
    }

    #[tokio::test]
    async fn confirms_confident_selection() {
        let validator = Validator::new(
            Arc::new(StubJudge::new(0.9)),
            ConfidenceCombiner::Mean,
            0.5,
        );
        let registry = snapshot(&[
            ("s3-tool", "manage storage buckets"),
            ("compute-tool", "manage virtual machines"),
        ]);
        let candidates = vec![
            candidate("s3-tool", 0.7, 1),
            candidate("compute-tool", 0.2, 2),
        ];

        let decision = validator
            .validate("create a storage bucket", &candidates, &registry)
            .await;
        assert_eq!(decision.descriptor_id.as_deref(), Some("s3-tool"));
        assert!((decision.combined_confidence - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_candidates_decide_none_without_model_call() {
        // An unavailable judge would fail loudly if it were consulted.
        let validator = Validator::new(
            Arc::new(StubJudge::unavailable()),
            ConfidenceCombiner::Mean,
            0.5,
        );
        let registry = snapshot(&[]);

        let decision = validator.validate("anything", &[], &registry).await;
        assert_eq!(decision.descriptor_id, None);
        assert_eq!(decision.combined_confidence, 0.0);
        assert_eq!(decision.reasoning_summary, "no candidates to validate");
    }

    #[tokio::test]
    async fn abstention_is_a_routing_miss() {
        let validator = Validator::new(
            Arc::new(StubJudge::abstaining()),
            ConfidenceCombiner::Mean,
            0.5,
        );
        let registry = snapshot(&[("s3-tool", "manage storage buckets")]);
        let decision = validator
            .validate("what is the weather", &[candidate("s3-tool", 0.9, 1)], &registry)
            .await;
        assert_eq!(decision.descriptor_id, None);
        assert!(decision.reasoning_summary.contains("abstained"));
    }

    #[tokio::test]
    async fn low_combined_confidence_decides_none() {
        // Mean of 0.3 model confidence and 0.3 similarity is 0.3 < 0.5.
        let validator = Validator::new(
            Arc::new(StubJudge::new(0.3)),
            ConfidenceCombiner::Mean,
            0.5,
        );
        let registry = snapshot(&[("s3-tool", "manage storage buckets")]);
        let decision = validator
            .validate("storage", &[candidate("s3-tool", 0.3, 1)], &registry)
            .await;
        assert_eq!(decision.descriptor_id, None);
        assert!((decision.combined_confidence - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn unavailable_model_falls_back_to_similarity() {
        let validator = Validator::new(
            Arc::new(StubJudge::unavailable()),
            ConfidenceCombiner::Mean,
            0.5,
        );
        let registry = snapshot(&[("s3-tool", "manage storage buckets")]);

        let strong = validator
            .validate("storage", &[candidate("s3-tool", 0.8, 1)], &registry)
            .await;
        assert_eq!(strong.descriptor_id.as_deref(), Some("s3-tool"));
        assert_eq!(strong.combined_confidence, 0.8);

        let weak = validator
            .validate("storage", &[candidate("s3-tool", 0.2, 1)], &registry)
            .await;
        assert_eq!(weak.descriptor_id, None);
    }
}
