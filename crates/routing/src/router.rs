use crate::config::RouterConfig;
use crate::error::Result;
use crate::extractor::IntentExtractor;
use crate::ranker::Ranker;
use crate::validator::Validator;
use relay_llm::IntentJudge;
use relay_protocol::{Candidate, Intent, SelectionDecision};
use relay_registry::ServerRegistry;
use relay_vector_store::{Embedder, SimilarityIndex};
use std::sync::Arc;

/// Everything one routing request produces. The decision is what callers
/// act on; intent and candidates are reported alongside for transparency.
#[derive(Debug, Clone)]
pub struct RouteReport {
    pub intent: Intent,
    pub candidates: Vec<Candidate>,
    pub decision: SelectionDecision,
}

/// The selection engine: intent extraction → candidate ranking →
/// confidence-weighted validation, over an index built from the registry.
///
/// All collaborators are injected; nothing here is ambient or global.
pub struct Router {
    registry: Arc<ServerRegistry>,
    index: Arc<SimilarityIndex>,
    embedder: Arc<dyn Embedder>,
    extractor: IntentExtractor,
    ranker: Ranker,
    validator: Validator,
}

impl Router {
    pub fn new(
        registry: Arc<ServerRegistry>,
        embedder: Arc<dyn Embedder>,
        judge: Arc<dyn IntentJudge>,
        config: RouterConfig,
    ) -> Self {
        let index = Arc::new(SimilarityIndex::new());
        let extractor = IntentExtractor::new(judge.clone());
        let ranker = Ranker::new(
            index.clone(),
            embedder.clone(),
            config.search_limit,
            config.similarity_threshold,
        );
        let validator = Validator::new(judge, config.combiner, config.confidence_threshold);

        Self {
            registry,
            index,
            embedder,
            extractor,
            ranker,
            validator,
        }
    }

    /// Embed every descriptor of the current registry generation and swap
    /// in a fresh index generation. In-flight queries keep reading the
    /// outgoing one.
    pub async fn rebuild_index(&self) -> Result<usize> {
        let snapshot = self.registry.snapshot();
        let texts: Vec<String> = snapshot
            .descriptors()
            .iter()
            .map(|descriptor| descriptor.embedding_text())
            .collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let entries = snapshot
            .descriptors()
            .iter()
            .map(|descriptor| descriptor.id.clone())
            .zip(vectors)
            .collect();
        self.index.rebuild(entries)?;
        Ok(snapshot.len())
    }

    /// Administrative re-index: reload the registry document wholesale,
    /// then rebuild the index from the new generation.
    pub async fn reindex(&self) -> Result<usize> {
        self.registry.reload().await?;
        self.rebuild_index().await
    }

    /// One routing request: raw text in, decision (plus supporting intent
    /// and candidates) out. A `None` descriptor in the decision is a
    /// routing miss, not an error; errors mean something actually broke.
    pub async fn route(&self, raw_text: &str) -> Result<RouteReport> {
        let intent = self.extractor.extract(raw_text).await;
        log::debug!(
            "Routing '{}' (keywords: {:?})",
            intent.normalized_query,
            intent.keywords
        );

        let candidates = self.ranker.rank(&intent).await?;
        log::info!(
            "Ranked {} candidates for '{}'",
            candidates.len(),
            intent.normalized_query
        );

        let registry = self.registry.snapshot();
        let decision = self
            .validator
            .validate(&intent.normalized_query, &candidates, &registry)
            .await;

        match &decision.descriptor_id {
            Some(id) => log::info!(
                "Selected '{id}' (confidence: {:.3})",
                decision.combined_confidence
            ),
            None => log::info!("No confident match: {}", decision.reasoning_summary),
        }

        Ok(RouteReport {
            intent,
            candidates,
            decision,
        })
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn indexed_servers(&self) -> usize {
        self.index.len()
    }

    pub fn embedder_mode(&self) -> &'static str {
        self.embedder.mode_id()
    }
}
