use crate::error::Result;
use relay_protocol::{Candidate, Intent};
use relay_vector_store::{Embedder, SimilarityIndex};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Recall-oriented candidate ranking: primary semantic query plus
/// keyword-driven fallback broadening. Deciding whether a match is good
/// enough to route is the validator's job, not ours.
pub struct Ranker {
    index: Arc<SimilarityIndex>,
    embedder: Arc<dyn Embedder>,
    search_limit: usize,
    similarity_threshold: f32,
}

impl Ranker {
    pub fn new(
        index: Arc<SimilarityIndex>,
        embedder: Arc<dyn Embedder>,
        search_limit: usize,
        similarity_threshold: f32,
    ) -> Self {
        Self {
            index,
            embedder,
            search_limit,
            similarity_threshold,
        }
    }

    pub async fn rank(&self, intent: &Intent) -> Result<Vec<Candidate>> {
        let query_vector = self.embedder.embed(&intent.normalized_query).await?;
        let primary = self.index.query(&query_vector, self.search_limit)?;

        // Broadening triggers only when the top score is strictly below the
        // threshold (or there is no top candidate at all).
        let needs_broadening = primary
            .first()
            .map_or(true, |(_, score)| *score < self.similarity_threshold);

        let ranked = if needs_broadening && !intent.keywords.is_empty() {
            log::debug!(
                "Top score {:?} below threshold {}, broadening with {} keywords",
                primary.first().map(|(_, s)| *s),
                self.similarity_threshold,
                intent.keywords.len()
            );
            self.broaden(primary, intent).await?
        } else {
            primary
        };

        Ok(ranked
            .into_iter()
            .enumerate()
            .map(|(position, (descriptor_id, similarity_score))| Candidate {
                descriptor_id,
                similarity_score,
                rank: position + 1,
            })
            .collect())
    }

    /// Re-query once per keyword and merge by taking, per descriptor, the
    /// maximum score seen across all queries.
    async fn broaden(
        &self,
        primary: Vec<(String, f32)>,
        intent: &Intent,
    ) -> Result<Vec<(String, f32)>> {
        let mut best: BTreeMap<String, f32> = primary.into_iter().collect();

        for keyword in &intent.keywords {
            let vector = match self.embedder.embed(keyword).await {
                Ok(vector) => vector,
                Err(err) => {
                    // A single keyword failing does not sink the request;
                    // the remaining queries still broaden recall.
                    log::warn!("Skipping broadening keyword '{keyword}': {err}");
                    continue;
                }
            };
            for (id, score) in self.index.query(&vector, self.search_limit)? {
                best.entry(id)
                    .and_modify(|current| *current = current.max(score))
                    .or_insert(score);
            }
        }

        let mut merged: Vec<(String, f32)> = best.into_iter().collect();
        merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(self.search_limit);
        Ok(merged)
    }
}
