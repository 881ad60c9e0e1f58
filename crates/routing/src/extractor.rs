use relay_llm::{heuristic, IntentJudge};
use relay_protocol::Intent;
use std::sync::Arc;

/// Intent extraction: one language-model call per request, with a
/// deterministic heuristic fallback when the service is unavailable or
/// returns garbage. Extraction itself never fails a request.
pub struct IntentExtractor {
    judge: Arc<dyn IntentJudge>,
}

impl IntentExtractor {
    pub fn new(judge: Arc<dyn IntentJudge>) -> Self {
        Self { judge }
    }

    pub async fn extract(&self, raw_text: &str) -> Intent {
        match self.judge.analyze_intent(raw_text).await {
            Ok(intent) => intent,
            Err(err) => {
                log::warn!("Intent analysis degraded to heuristic: {err}");
                heuristic::extract(raw_text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use relay_llm::StubJudge;

    #[tokio::test]
    async fn uses_judge_when_available() {
        let extractor = IntentExtractor::new(Arc::new(StubJudge::default()));
        let intent = extractor.extract("list my storage buckets").await;
        assert_eq!(intent.normalized_query, "list my storage buckets");
        assert!(intent.keywords.contains("storage"));
    }

    #[tokio::test]
    async fn falls_back_to_heuristic_when_judge_is_down() {
        let extractor = IntentExtractor::new(Arc::new(StubJudge::unavailable()));
        let intent = extractor.extract("  Deploy THE web app  ").await;
        assert_eq!(intent.normalized_query, "Deploy THE web app");
        let keywords: Vec<&str> = intent.keywords.iter().map(String::as_str).collect();
        assert_eq!(keywords, vec!["app", "deploy", "the", "web"]);
    }
}
