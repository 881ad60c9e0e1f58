use crate::error::{DispatchError, Result};
use relay_protocol::ResolvedLaunchSpec;
use rmcp::model::{CallToolRequestParam, CallToolResult};
use rmcp::service::{RoleClient, RunningService, ServiceExt};
use rmcp::transport::TokioChildProcess;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Timeout for a single tool call or tool listing.
    pub call_timeout: Duration,
    /// Timeout for spawning a server and completing the MCP handshake.
    pub launch_timeout: Duration,
    /// Sessions idle longer than this are evicted and relaunched on the
    /// next request.
    pub max_idle: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            launch_timeout: Duration::from_secs(20),
            max_idle: Duration::from_secs(300),
        }
    }
}

/// Tool metadata discovered from a live server.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Result of one tool invocation on a tool server.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvocationResult {
    pub server_id: String,
    pub tool_name: String,
    pub is_error: bool,
    pub content: Value,
}

struct PooledSession {
    service: RunningService<RoleClient, ()>,
    last_used: Instant,
}

#[derive(Default)]
struct Slot {
    session: Option<PooledSession>,
}

/// Connection pool for launched tool servers: one live MCP session per
/// descriptor id, launched as a child process over stdio.
///
/// The per-descriptor slot mutex guarantees at most one launch attempt per
/// id is in flight; concurrent requests for the same idle descriptor block
/// briefly on the first launch instead of spawning duplicates. Requests
/// for different descriptors proceed independently.
pub struct DispatchManager {
    config: DispatchConfig,
    slots: Mutex<HashMap<String, Arc<Mutex<Slot>>>>,
}

impl DispatchManager {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// List the tools a server exposes, launching or reusing its session.
    pub async fn list_tools(
        &self,
        server_id: &str,
        spec: &ResolvedLaunchSpec,
    ) -> Result<Vec<ToolInfo>> {
        let slot = self.slot(server_id).await;
        let mut guard = slot.lock().await;
        self.ensure_session(&mut guard, server_id, spec).await?;
        let session = guard.session.as_mut().expect("session just ensured");

        let listed = tokio::time::timeout(
            self.config.call_timeout,
            session.service.list_tools(Default::default()),
        )
        .await;

        match listed {
            Err(_) => {
                Self::discard(&mut guard).await;
                Err(DispatchError::Timeout {
                    server_id: server_id.to_string(),
                })
            }
            Ok(Err(err)) => {
                Self::discard(&mut guard).await;
                Err(DispatchError::InvocationFailure {
                    server_id: server_id.to_string(),
                    tool_name: "tools/list".to_string(),
                    reason: err.to_string(),
                })
            }
            Ok(Ok(result)) => {
                session.last_used = Instant::now();
                Ok(result
                    .tools
                    .into_iter()
                    .map(|tool| ToolInfo {
                        name: tool.name.to_string(),
                        description: tool.description.map(|d| d.to_string()),
                        input_schema: Value::Object(tool.input_schema.as_ref().clone()),
                    })
                    .collect())
            }
        }
    }

    /// Invoke a named tool with structured arguments.
    pub async fn invoke(
        &self,
        server_id: &str,
        spec: &ResolvedLaunchSpec,
        tool_name: &str,
        arguments: Option<serde_json::Map<String, Value>>,
    ) -> Result<InvocationResult> {
        let slot = self.slot(server_id).await;
        let mut guard = slot.lock().await;
        self.ensure_session(&mut guard, server_id, spec).await?;
        let session = guard.session.as_mut().expect("session just ensured");

        log::info!("Invoking '{tool_name}' on '{server_id}'");
        let called = tokio::time::timeout(
            self.config.call_timeout,
            session.service.call_tool(CallToolRequestParam {
                name: tool_name.to_string().into(),
                arguments,
            }),
        )
        .await;

        match called {
            Err(_) => {
                Self::discard(&mut guard).await;
                Err(DispatchError::Timeout {
                    server_id: server_id.to_string(),
                })
            }
            Ok(Err(err)) => {
                // A transport-level failure leaves the session in an
                // unknown state; drop it rather than cache it broken.
                Self::discard(&mut guard).await;
                Err(DispatchError::InvocationFailure {
                    server_id: server_id.to_string(),
                    tool_name: tool_name.to_string(),
                    reason: err.to_string(),
                })
            }
            Ok(Ok(result)) => {
                session.last_used = Instant::now();
                Ok(InvocationResult {
                    server_id: server_id.to_string(),
                    tool_name: tool_name.to_string(),
                    is_error: result.is_error.unwrap_or(false),
                    content: Self::content_to_value(&result),
                })
            }
        }
    }

    /// Drop the live session for one server, if any.
    pub async fn disconnect(&self, server_id: &str) {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.remove(server_id)
        };
        if let Some(slot) = slot {
            let mut guard = slot.lock().await;
            Self::discard(&mut guard).await;
            log::info!("Disconnected tool server '{server_id}'");
        }
    }

    /// Drop every live session.
    pub async fn shutdown(&self) {
        let slots: Vec<(String, Arc<Mutex<Slot>>)> = {
            let mut map = self.slots.lock().await;
            map.drain().collect()
        };
        for (server_id, slot) in slots {
            let mut guard = slot.lock().await;
            if guard.session.is_some() {
                Self::discard(&mut guard).await;
                log::info!("Disconnected tool server '{server_id}'");
            }
        }
    }

    /// Ids of servers with a live pooled session.
    pub async fn active_sessions(&self) -> Vec<String> {
        let slots = self.slots.lock().await;
        let mut active = Vec::new();
        for (server_id, slot) in slots.iter() {
            if let Ok(guard) = slot.try_lock() {
                if guard.session.is_some() {
                    active.push(server_id.clone());
                }
            }
        }
        active.sort();
        active
    }

    async fn slot(&self, server_id: &str) -> Arc<Mutex<Slot>> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(server_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Slot::default())))
            .clone()
    }

    async fn ensure_session(
        &self,
        slot: &mut Slot,
        server_id: &str,
        spec: &ResolvedLaunchSpec,
    ) -> Result<()> {
        let expired = slot
            .session
            .as_ref()
            .map_or(false, |session| session.last_used.elapsed() > self.config.max_idle);
        if expired {
            log::debug!("Evicting idle session for '{server_id}'");
            Self::discard(slot).await;
        }

        if slot.session.is_none() {
            // One retry for a failed spawn/handshake, per the bounded-retry
            // policy; a second failure surfaces to the caller and nothing
            // is cached.
            let session = match self.launch(server_id, spec).await {
                Ok(session) => session,
                Err(err) => {
                    log::warn!("Launch of '{server_id}' failed ({err}), retrying once");
                    self.launch(server_id, spec).await?
                }
            };
            slot.session = Some(session);
        }
        Ok(())
    }

    async fn launch(&self, server_id: &str, spec: &ResolvedLaunchSpec) -> Result<PooledSession> {
        log::info!(
            "Launching tool server '{server_id}': {} {:?}",
            spec.command,
            spec.args
        );

        let transport = TokioChildProcess::new(Self::build_command(spec)).map_err(|err| {
            DispatchError::LaunchFailure {
                server_id: server_id.to_string(),
                reason: err.to_string(),
            }
        })?;

        let service = tokio::time::timeout(self.config.launch_timeout, ().serve(transport))
            .await
            .map_err(|_| DispatchError::LaunchFailure {
                server_id: server_id.to_string(),
                reason: "handshake timed out".to_string(),
            })?
            .map_err(|err| DispatchError::LaunchFailure {
                server_id: server_id.to_string(),
                reason: err.to_string(),
            })?;

        Ok(PooledSession {
            service,
            last_used: Instant::now(),
        })
    }

    fn build_command(spec: &ResolvedLaunchSpec) -> Command {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        cmd
    }

    async fn discard(slot: &mut Slot) {
        if let Some(session) = slot.session.take() {
            if let Err(err) = session.service.cancel().await {
                log::warn!("Error closing tool-server session: {err}");
            }
        }
    }

    fn content_to_value(result: &CallToolResult) -> Value {
        if let Some(structured) = &result.structured_content {
            return structured.clone();
        }

        let mut texts: Vec<Value> = result
            .content
            .iter()
            .map(|item| match item.as_text() {
                Some(text) => Value::String(text.text.clone()),
                None => serde_json::to_value(item).unwrap_or(Value::Null),
            })
            .collect();

        match texts.len() {
            0 => Value::Null,
            1 => texts.remove(0),
            _ => Value::Array(texts),
        }
    }
}
