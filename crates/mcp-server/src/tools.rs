//! MCP tools for Relay.
//!
//! Exposes the selection engine over MCP: `route` finds the best tool
//! server for a natural-language request, `invoke` executes a tool on a
//! chosen server, plus catalog and administrative tools.

use crate::config::{EmbeddingMode, LlmMode, ServiceConfig};
use anyhow::Result;
use relay_dispatch::{DispatchConfig, DispatchError, DispatchManager};
use relay_llm::{HttpJudge, IntentJudge, StubJudge};
use relay_protocol::{error_codes, Candidate, ErrorEnvelope, Intent, ResolvedLaunchSpec};
use relay_registry::ServerRegistry;
use relay_resolver::{resolve, ResolveError, SettingsStore};
use relay_routing::{Router, RoutingError};
use relay_vector_store::{Embedder, HashEmbedder, HttpEmbedder, VectorStoreError};
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo,
};
use rmcp::schemars;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Relay MCP service.
#[derive(Clone)]
pub struct RelayService {
    state: Arc<ServiceState>,
    tool_router: ToolRouter<Self>,
}

struct ServiceState {
    router: Router,
    settings: SettingsStore,
    dispatch: DispatchManager,
    embedder: Arc<dyn Embedder>,
    judge: Arc<dyn IntentJudge>,
}

impl RelayService {
    /// Construct every collaborator from configuration and wire them up.
    /// A cold embedding service is tolerated: the index starts empty and
    /// `reindex` fills it once the service is reachable.
    pub async fn initialize(config: ServiceConfig) -> Result<Self> {
        let registry = Arc::new(ServerRegistry::load(&config.registry_file).await?);
        let settings = SettingsStore::load_or_empty(&config.settings_file).await?;

        let embedder: Arc<dyn Embedder> = match config.embedding_mode {
            EmbeddingMode::Http => Arc::new(HttpEmbedder::new(
                &config.embedding_url,
                &config.embedding_model,
                config.call_timeout,
            )?),
            EmbeddingMode::Hash => Arc::new(HashEmbedder::default()),
        };
        let judge: Arc<dyn IntentJudge> = match config.llm_mode {
            LlmMode::Http => Arc::new(HttpJudge::new(
                &config.llm_url,
                &config.llm_model,
                config.llm_api_key.clone(),
                config.call_timeout,
            )?),
            LlmMode::Stub => Arc::new(StubJudge::default()),
        };

        let router = Router::new(
            registry,
            embedder.clone(),
            judge.clone(),
            config.router.clone(),
        );
        match router.rebuild_index().await {
            Ok(count) => log::info!("Indexed {count} servers at startup"),
            Err(err) => log::warn!(
                "Startup indexing failed ({err}); call 'reindex' once the embedding service is reachable"
            ),
        }

        let dispatch = DispatchManager::new(DispatchConfig {
            call_timeout: config.call_timeout,
            launch_timeout: config.call_timeout,
            max_idle: config.max_idle,
        });

        Ok(Self {
            state: Arc::new(ServiceState {
                router,
                settings,
                dispatch,
                embedder,
                judge,
            }),
            tool_router: Self::tool_router(),
        })
    }

    /// Close every pooled tool-server session.
    pub async fn shutdown(&self) {
        self.state.dispatch.shutdown().await;
    }

    fn resolve_launch_spec(
        &self,
        server_id: &str,
    ) -> std::result::Result<ResolvedLaunchSpec, CallToolResult> {
        let registry = self.state.router.registry().snapshot();
        let Some(descriptor) = registry.get(server_id) else {
            return Err(envelope_result(
                ErrorEnvelope::new(
                    error_codes::SERVER_NOT_FOUND,
                    format!("Server '{server_id}' is not in the registry"),
                )
                .with_hint("Use list_servers to see the catalog"),
            ));
        };

        resolve(&descriptor.launch, &self.state.settings.snapshot()).map_err(|err| {
            let code = match err {
                ResolveError::UnresolvedPlaceholder { .. } => error_codes::UNRESOLVED_PLACEHOLDER,
                ResolveError::InvalidTemplate(_) => error_codes::INVALID_TEMPLATE,
            };
            envelope_result(
                ErrorEnvelope::new(code, err.to_string())
                    .with_hint("Add the missing key to the settings file or a template default"),
            )
        })
    }
}

#[tool_handler]
impl ServerHandler for RelayService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Relay routes natural-language requests to MCP tool servers. Use 'route' to find \
                 the best server for a request, 'invoke' to execute a tool on it, 'list_servers' \
                 to browse the catalog, 'reindex'/'reload_settings' for administration, and \
                 'doctor' for service health."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Tool Input/Output Schemas
// ============================================================================

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RouteRequest {
    /// The user's natural-language request
    #[schemars(description = "Natural-language request to route")]
    pub prompt: String,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct RouteResponse {
    /// Whether a server was confidently selected
    pub matched: bool,
    pub server_id: Option<String>,
    pub server_name: Option<String>,
    /// Combined confidence of the decision (0-1)
    pub confidence: f32,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_tool: Option<String>,
    /// Extracted intent behind the request
    pub intent: Intent,
    /// Ranked candidates with similarity scores
    pub candidates: Vec<Candidate>,
    /// Tools discovered on the selected server, when reachable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_tools: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct InvokeRequest {
    #[schemars(description = "Registry id of the tool server")]
    pub server_id: String,

    #[schemars(description = "Name of the tool to execute")]
    pub tool_name: String,

    #[schemars(description = "Structured tool arguments")]
    pub arguments: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct InvokeResponse {
    pub success: bool,
    pub server_id: String,
    pub tool_name: String,
    pub content: serde_json::Value,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListServersRequest {}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct ServerView {
    pub server_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct ListServersResponse {
    pub total_servers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_version: Option<String>,
    pub servers: Vec<ServerView>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ReindexRequest {}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct ReindexResponse {
    pub indexed_servers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_version: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ReloadSettingsRequest {}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct ReloadSettingsResponse {
    pub settings_entries: usize,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DoctorRequest {}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct DoctorResponse {
    pub registry_servers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_version: Option<String>,
    pub indexed_servers: usize,
    pub embedding_mode: String,
    pub embedding: String,
    pub llm: String,
    pub settings_entries: usize,
    pub active_sessions: Vec<String>,
}

// ============================================================================
// Tool Implementations
// ============================================================================

#[tool_router]
impl RelayService {
    /// Find the best tool server for a natural-language request.
    #[tool(
        description = "Analyze a natural-language request and select the best matching tool server. Returns the selection, its confidence, the ranked candidates, and the selected server's live tools."
    )]
    pub async fn route(
        &self,
        Parameters(request): Parameters<RouteRequest>,
    ) -> std::result::Result<CallToolResult, McpError> {
        if request.prompt.trim().is_empty() {
            return Ok(envelope_result(ErrorEnvelope::new(
                error_codes::INVALID_REQUEST,
                "Empty prompt provided",
            )));
        }

        let report = match self.state.router.route(&request.prompt).await {
            Ok(report) => report,
            Err(err) => return Ok(envelope_result(routing_error_envelope(&err))),
        };

        let registry = self.state.router.registry().snapshot();
        let mut response = RouteResponse {
            matched: report.decision.is_match(),
            server_id: report.decision.descriptor_id.clone(),
            server_name: report
                .decision
                .descriptor_id
                .as_deref()
                .and_then(|id| registry.get(id))
                .map(|descriptor| descriptor.display_name.clone()),
            confidence: report.decision.combined_confidence,
            reasoning: report.decision.reasoning_summary.clone(),
            recommended_tool: report.decision.recommended_tool.clone(),
            intent: report.intent,
            candidates: report.candidates,
            available_tools: None,
            discovery_error: None,
            next_step: None,
        };

        if let Some(server_id) = response.server_id.clone() {
            let spec = match self.resolve_launch_spec(&server_id) {
                Ok(spec) => spec,
                Err(error_result) => return Ok(error_result),
            };

            // Live tool discovery is best-effort: a server that cannot be
            // reached right now does not invalidate the routing decision.
            match self.state.dispatch.list_tools(&server_id, &spec).await {
                Ok(tools) => {
                    response.available_tools =
                        Some(serde_json::to_value(&tools).unwrap_or_default());
                }
                Err(err) => {
                    log::warn!("Tool discovery on '{server_id}' failed: {err}");
                    response.discovery_error = Some(err.to_string());
                }
            }
            response.next_step =
                Some("Use invoke(server_id, tool_name, arguments) to execute a tool".to_string());
        }

        json_result(&response)
    }

    /// Execute a tool on a registered server.
    #[tool(
        description = "Execute a named tool on the given tool server, launching or reusing its pooled session. Arguments are passed through as-is."
    )]
    pub async fn invoke(
        &self,
        Parameters(request): Parameters<InvokeRequest>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let spec = match self.resolve_launch_spec(&request.server_id) {
            Ok(spec) => spec,
            Err(error_result) => return Ok(error_result),
        };

        // Validate the tool exists before invoking, so a typo gets a
        // catalog instead of an opaque server error.
        let tools = match self
            .state
            .dispatch
            .list_tools(&request.server_id, &spec)
            .await
        {
            Ok(tools) => tools,
            Err(err) => return Ok(envelope_result(dispatch_error_envelope(&err))),
        };
        if !tools.iter().any(|tool| tool.name == request.tool_name) {
            let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
            return Ok(envelope_result(
                ErrorEnvelope::new(
                    error_codes::TOOL_NOT_FOUND,
                    format!(
                        "Tool '{}' not found on server '{}'",
                        request.tool_name, request.server_id
                    ),
                )
                .with_hint(format!("Available tools: {names:?}")),
            ));
        }

        match self
            .state
            .dispatch
            .invoke(&request.server_id, &spec, &request.tool_name, request.arguments)
            .await
        {
            Ok(result) => json_result(&InvokeResponse {
                success: !result.is_error,
                server_id: result.server_id,
                tool_name: result.tool_name,
                content: result.content,
            }),
            Err(err) => Ok(envelope_result(dispatch_error_envelope(&err))),
        }
    }

    /// List the registry catalog.
    #[tool(description = "List all tool servers known to the registry.")]
    pub async fn list_servers(
        &self,
        Parameters(_request): Parameters<ListServersRequest>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let registry = self.state.router.registry().snapshot();
        let servers: Vec<ServerView> = registry
            .descriptors()
            .iter()
            .map(|descriptor| ServerView {
                server_id: descriptor.id.clone(),
                name: descriptor.display_name.clone(),
                description: descriptor.capability_text.clone(),
                category: descriptor.category.clone(),
            })
            .collect();

        json_result(&ListServersResponse {
            total_servers: servers.len(),
            registry_version: registry.version().map(String::from),
            servers,
        })
    }

    /// Reload the registry and rebuild the similarity index.
    #[tool(
        description = "Administrative: reload the registry document wholesale and rebuild the similarity index."
    )]
    pub async fn reindex(
        &self,
        Parameters(_request): Parameters<ReindexRequest>,
    ) -> std::result::Result<CallToolResult, McpError> {
        match self.state.router.reindex().await {
            Ok(indexed_servers) => {
                let registry = self.state.router.registry().snapshot();
                json_result(&ReindexResponse {
                    indexed_servers,
                    registry_version: registry.version().map(String::from),
                })
            }
            Err(err) => Ok(envelope_result(routing_error_envelope(&err))),
        }
    }

    /// Reload the settings store.
    #[tool(description = "Administrative: reload the scoped settings store from disk.")]
    pub async fn reload_settings(
        &self,
        Parameters(_request): Parameters<ReloadSettingsRequest>,
    ) -> std::result::Result<CallToolResult, McpError> {
        match self.state.settings.reload().await {
            Ok(settings) => json_result(&ReloadSettingsResponse {
                settings_entries: settings.len(),
            }),
            Err(err) => Ok(envelope_result(ErrorEnvelope::new(
                error_codes::INTERNAL,
                err.to_string(),
            ))),
        }
    }

    /// Health of the services behind the router.
    #[tool(description = "Check health of the registry, index, embedding and language-model services.")]
    pub async fn doctor(
        &self,
        Parameters(_request): Parameters<DoctorRequest>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let registry = self.state.router.registry().snapshot();

        let embedding = match self.state.embedder.embed("health check").await {
            Ok(_) => "ok".to_string(),
            Err(err) => format!("error: {err}"),
        };
        let llm = match self.state.judge.analyze_intent("health check").await {
            Ok(_) => "ok".to_string(),
            Err(err) => format!("error: {err}"),
        };

        json_result(&DoctorResponse {
            registry_servers: registry.len(),
            registry_version: registry.version().map(String::from),
            indexed_servers: self.state.router.indexed_servers(),
            embedding_mode: self.state.embedder.mode_id().to_string(),
            embedding,
            llm,
            settings_entries: self.state.settings.snapshot().len(),
            active_sessions: self.state.dispatch.active_sessions().await,
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn json_result<T: Serialize>(value: &T) -> std::result::Result<CallToolResult, McpError> {
    match serde_json::to_string_pretty(value) {
        Ok(raw) => Ok(CallToolResult::success(vec![Content::text(raw)])),
        Err(err) => Ok(envelope_result(ErrorEnvelope::new(
            error_codes::INTERNAL,
            err.to_string(),
        ))),
    }
}

fn envelope_result(envelope: ErrorEnvelope) -> CallToolResult {
    let raw = serde_json::to_string_pretty(&envelope)
        .unwrap_or_else(|_| format!("{{\"code\": \"{}\"}}", envelope.code));
    CallToolResult::error(vec![Content::text(raw)])
}

fn routing_error_envelope(err: &RoutingError) -> ErrorEnvelope {
    match err {
        RoutingError::VectorStore(VectorStoreError::ServiceUnavailable(reason)) => {
            ErrorEnvelope::new(
                error_codes::EXTERNAL_SERVICE_UNAVAILABLE,
                format!("Embedding service unavailable: {reason}"),
            )
        }
        RoutingError::VectorStore(VectorStoreError::MalformedResponse(reason)) => {
            ErrorEnvelope::new(
                error_codes::EXTERNAL_SERVICE_UNAVAILABLE,
                format!("Embedding service returned malformed data: {reason}"),
            )
        }
        RoutingError::VectorStore(VectorStoreError::InvalidDimension { .. }) => {
            ErrorEnvelope::new(error_codes::INTERNAL, err.to_string())
                .with_hint("Run reindex so the index matches the embedding model")
        }
        RoutingError::Llm(reason) => ErrorEnvelope::new(
            error_codes::EXTERNAL_SERVICE_UNAVAILABLE,
            reason.to_string(),
        ),
        RoutingError::Registry(_) | RoutingError::Config(_) => {
            ErrorEnvelope::new(error_codes::INTERNAL, err.to_string())
        }
    }
}

fn dispatch_error_envelope(err: &DispatchError) -> ErrorEnvelope {
    match err {
        DispatchError::LaunchFailure { .. } => {
            ErrorEnvelope::new(error_codes::LAUNCH_FAILURE, err.to_string())
                .with_hint("Check the server's launch template and settings")
        }
        DispatchError::Timeout { .. } | DispatchError::InvocationFailure { .. } => {
            ErrorEnvelope::new(error_codes::INVOCATION_FAILURE, err.to_string())
        }
    }
}
