use crate::error::{Result, RoutingError};
use std::env;
use std::str::FromStr;

/// Tunable parameters of the selection engine. All of them can be set via
/// `RELAY_*` environment variables; unset variables fall back to defaults.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum candidates returned by the ranker (K).
    pub search_limit: usize,
    /// Below this top similarity score the ranker broadens with keywords.
    pub similarity_threshold: f32,
    /// Minimum combined confidence for the validator to accept a match.
    pub confidence_threshold: f32,
    pub combiner: ConfidenceCombiner,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            search_limit: 5,
            similarity_threshold: 0.3,
            confidence_threshold: 0.5,
            combiner: ConfidenceCombiner::Mean,
        }
    }
}

impl RouterConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            search_limit: parse_var(
                "RELAY_SEARCH_LIMIT",
                env::var("RELAY_SEARCH_LIMIT").ok().as_deref(),
                defaults.search_limit,
            )?,
            similarity_threshold: parse_var(
                "RELAY_SIMILARITY_THRESHOLD",
                env::var("RELAY_SIMILARITY_THRESHOLD").ok().as_deref(),
                defaults.similarity_threshold,
            )?,
            confidence_threshold: parse_var(
                "RELAY_CONFIDENCE_THRESHOLD",
                env::var("RELAY_CONFIDENCE_THRESHOLD").ok().as_deref(),
                defaults.confidence_threshold,
            )?,
            combiner: ConfidenceCombiner::parse(
                env::var("RELAY_CONFIDENCE_COMBINER").ok().as_deref(),
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.search_limit == 0 {
            return Err(RoutingError::Config(
                "RELAY_SEARCH_LIMIT must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("RELAY_SIMILARITY_THRESHOLD", self.similarity_threshold),
            ("RELAY_CONFIDENCE_THRESHOLD", self.confidence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RoutingError::Config(format!(
                    "{name} must be within [0,1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, raw: Option<&str>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| RoutingError::Config(format!("{name} has invalid value '{raw}'"))),
    }
}

/// Deterministic combination of model confidence and similarity score.
///
/// This is a tuning parameter, not a structural invariant; the variants
/// exist so deployments can experiment without touching the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceCombiner {
    /// Arithmetic mean of model confidence and similarity (default).
    Mean,
    /// The larger of the two signals.
    Max,
    /// Trust the model confidence alone.
    ModelOnly,
}

impl ConfidenceCombiner {
    pub fn combine(&self, model_confidence: f32, similarity: f32) -> f32 {
        match self {
            Self::Mean => (model_confidence + similarity) / 2.0,
            Self::Max => model_confidence.max(similarity),
            Self::ModelOnly => model_confidence,
        }
    }

    fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            None | Some("mean") => Ok(Self::Mean),
            Some("max") => Ok(Self::Max),
            Some("model_only") => Ok(Self::ModelOnly),
            Some(other) => Err(RoutingError::Config(format!(
                "Unsupported RELAY_CONFIDENCE_COMBINER '{other}' (expected 'mean', 'max' or 'model_only')"
            ))),
        }
    }
}
