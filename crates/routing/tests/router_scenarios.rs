//! End-to-end selection-engine scenarios over a real registry file, with
//! deterministic embedding and judgment stubs standing in for the remote
//! services.

use async_trait::async_trait;
use relay_llm::{CandidateSummary, IntentJudge, SelectionJudgment, StubJudge};
use relay_protocol::Intent;
use relay_registry::ServerRegistry;
use relay_resolver::{resolve, ScopedSettings, SettingsStore};
use relay_routing::{RouterConfig, Router};
use relay_vector_store::HashEmbedder;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const REGISTRY_BODY: &str = r#"{
  "schema_version": 1,
  "version": "test",
  "servers": [
    {
      "id": "s3-tool",
      "display_name": "S3 Tools",
      "capability_text": "manage storage buckets",
      "category": "storage",
      "launch": {
        "command": "uvx",
        "args": ["awslabs.s3-mcp-server@latest", "--region", "{{aws:region}}"],
        "env": { "AWS_REGION": "{{aws:region}}", "AWS_PROFILE": "{{aws:profile}}" },
        "defaults": { "aws.profile": "" }
      }
    },
    {
      "id": "compute-tool",
      "display_name": "Compute Tools",
      "capability_text": "manage virtual machines",
      "category": "compute",
      "launch": { "command": "uvx", "args": ["awslabs.ec2-mcp-server@latest"] }
    }
  ]
}"#;

async fn write_registry(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("registry.json");
    tokio::fs::write(&path, body).await.unwrap();
    path
}

fn test_config() -> RouterConfig {
    RouterConfig {
        similarity_threshold: 0.2,
        ..RouterConfig::default()
    }
}

async fn router_with(
    dir: &tempfile::TempDir,
    judge: Arc<dyn IntentJudge>,
    body: &str,
) -> Router {
    let path = write_registry(dir, body).await;
    let registry = Arc::new(ServerRegistry::load(&path).await.unwrap());
    let router = Router::new(
        registry,
        Arc::new(HashEmbedder::default()),
        judge,
        test_config(),
    );
    router.rebuild_index().await.unwrap();
    router
}

/// Wraps a judge and counts selection calls, to prove when no model call
/// was made.
struct CountingJudge {
    inner: StubJudge,
    selections: AtomicUsize,
}

impl CountingJudge {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: StubJudge::default(),
            selections: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl IntentJudge for CountingJudge {
    async fn analyze_intent(&self, prompt: &str) -> relay_llm::Result<Intent> {
        self.inner.analyze_intent(prompt).await
    }

    async fn select_server(
        &self,
        query: &str,
        candidates: &[CandidateSummary],
    ) -> relay_llm::Result<SelectionJudgment> {
        self.selections.fetch_add(1, Ordering::SeqCst);
        self.inner.select_server(query, candidates).await
    }
}

#[tokio::test]
async fn storage_query_routes_to_s3_tool_and_resolves_region() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(&dir, Arc::new(StubJudge::default()), REGISTRY_BODY).await;

    let report = router.route("create a storage bucket").await.unwrap();

    // Ranking: s3-tool above compute-tool, every candidate from the registry.
    assert!(!report.candidates.is_empty());
    assert_eq!(report.candidates[0].descriptor_id, "s3-tool");
    let registry = router.registry().snapshot();
    for candidate in &report.candidates {
        assert!(registry.get(&candidate.descriptor_id).is_some());
    }
    for pair in report.candidates.windows(2) {
        assert!(pair[0].similarity_score >= pair[1].similarity_score);
    }

    // Validation: the judge confirms s3-tool.
    assert_eq!(report.decision.descriptor_id.as_deref(), Some("s3-tool"));
    assert!(report.decision.combined_confidence >= 0.5);

    // Resolution: the selected descriptor's template against settings.
    let descriptor = registry.get("s3-tool").unwrap();
    let settings = ScopedSettings::from_json(&serde_json::json!({
        "aws.region": "ap-southeast-1"
    }))
    .unwrap();
    let spec = resolve(&descriptor.launch, &settings).unwrap();
    assert_eq!(spec.command, "uvx");
    assert!(spec.args.contains(&"ap-southeast-1".to_string()));
    assert_eq!(
        spec.env.get("AWS_REGION").map(String::as_str),
        Some("ap-southeast-1")
    );
    // aws.profile defaulted to the empty string, so the entry is filtered.
    assert_eq!(spec.env.get("AWS_PROFILE"), None);
}

#[tokio::test]
async fn rank_returns_at_most_k_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let servers: Vec<String> = (0..8)
        .map(|i| {
            format!(
                r#"{{"id": "tool-{i}", "display_name": "Tool {i}", "capability_text": "manage storage item {i}", "launch": {{"command": "uvx"}}}}"#
            )
        })
        .collect();
    let body = format!(
        r#"{{"schema_version": 1, "servers": [{}]}}"#,
        servers.join(",")
    );
    let router = router_with(&dir, Arc::new(StubJudge::default()), &body).await;

    let report = router.route("manage storage").await.unwrap();
    assert!(report.candidates.len() <= 5);
}

#[tokio::test]
async fn empty_registry_is_a_routing_miss_without_model_call() {
    let dir = tempfile::tempdir().unwrap();
    let judge = CountingJudge::new();
    let router = router_with(
        &dir,
        judge.clone(),
        r#"{"schema_version": 1, "servers": []}"#,
    )
    .await;

    let report = router.route("create a storage bucket").await.unwrap();
    assert!(report.candidates.is_empty());
    assert_eq!(report.decision.descriptor_id, None);
    assert_eq!(judge.selections.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unrelated_query_is_rejected_by_abstaining_judge() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(&dir, Arc::new(StubJudge::abstaining()), REGISTRY_BODY).await;

    let report = router.route("write me a poem about autumn").await.unwrap();
    assert_eq!(report.decision.descriptor_id, None);
    assert!(report.decision.reasoning_summary.contains("abstained")
        || report.decision.reasoning_summary.contains("no suitable"));
}

#[tokio::test]
async fn reindex_picks_up_registry_changes() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(
        &dir,
        Arc::new(StubJudge::default()),
        r#"{"schema_version": 1, "servers": []}"#,
    )
    .await;
    assert_eq!(router.indexed_servers(), 0);

    tokio::fs::write(dir.path().join("registry.json"), REGISTRY_BODY)
        .await
        .unwrap();
    let indexed = router.reindex().await.unwrap();
    assert_eq!(indexed, 2);
    assert_eq!(router.indexed_servers(), 2);

    let report = router.route("create a storage bucket").await.unwrap();
    assert_eq!(report.decision.descriptor_id.as_deref(), Some("s3-tool"));
}

#[tokio::test]
async fn settings_store_backs_resolution_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("settings.json");
    tokio::fs::write(
        &settings_path,
        r#"{"aws": {"region": "eu-west-1", "profile": "dev"}}"#,
    )
    .await
    .unwrap();
    let store = SettingsStore::load(&settings_path).await.unwrap();

    let router = router_with(&dir, Arc::new(StubJudge::default()), REGISTRY_BODY).await;
    let report = router.route("create a storage bucket").await.unwrap();
    let id = report.decision.descriptor_id.unwrap();

    let registry = router.registry().snapshot();
    let descriptor = registry.get(&id).unwrap();
    let spec = resolve(&descriptor.launch, &store.snapshot()).unwrap();
    assert_eq!(spec.env.get("AWS_REGION").map(String::as_str), Some("eu-west-1"));
    assert_eq!(spec.env.get("AWS_PROFILE").map(String::as_str), Some("dev"));
}
