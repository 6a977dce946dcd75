//! Tool registry and dispatch.
//!
//! Concrete tools (file, shell, browser, memory, cron) are external
//! collaborators registered at startup; the runner only knows the
//! contract. Desktop-marked tools are funneled through the Desktop lane
//! so pointer/window inputs never interleave.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use nebo_domain::chat::ToolDefinition;
use nebo_domain::error::{Error, Result};

use crate::lanes::{EnqueueOptions, Lane, LaneManager};

/// The bot-domain memory tool; its bookkeeping operations stay silent.
pub const MEMORY_TOOL: &str = "nebo_memory";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-call context handed to a tool.
#[derive(Clone)]
pub struct ToolContext {
    pub session_key: String,
    pub user_id: String,
    pub cancel: CancellationToken,
}

/// Contract every tool implements.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    /// Desktop tools run on the Desktop lane (cap=1).
    fn is_desktop(&self) -> bool {
        false
    }

    async fn call(&self, ctx: ToolContext, args: Value) -> Result<Value>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.write().insert(tool.name().to_owned(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    /// Definitions advertised to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read();
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_owned(),
                description: t.description().to_owned(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Memory bookkeeping calls are not forwarded to the UI stream surface.
pub fn is_silent(tool_name: &str, args: &Value) -> bool {
    tool_name == MEMORY_TOOL
        && matches!(
            args.get("action").and_then(|a| a.as_str()),
            Some("store" | "recall" | "search")
        )
}

/// Execute one tool call. Returns `(content, is_error)`; a tool error is
/// rendered for the model to self-correct, never escalated to a run
/// failure.
pub async fn dispatch(
    registry: &ToolRegistry,
    lanes: &Arc<LaneManager>,
    tool_name: &str,
    args: Value,
    ctx: ToolContext,
) -> (String, bool) {
    let Some(tool) = registry.get(tool_name) else {
        return (format!("unknown tool: {tool_name}"), true);
    };

    let result = if tool.is_desktop() {
        dispatch_on_desktop_lane(lanes, tool, args, ctx).await
    } else {
        tool.call(ctx, args).await
    };

    match result {
        Ok(value) => (render_value(value), false),
        Err(Error::Cancelled) => ("cancelled".into(), true),
        Err(e) => (e.to_string(), true),
    }
}

/// Run a desktop tool through the Desktop lane so at most one desktop
/// operation touches the GUI at a time.
async fn dispatch_on_desktop_lane(
    lanes: &Arc<LaneManager>,
    tool: Arc<dyn Tool>,
    args: Value,
    ctx: ToolContext,
) -> Result<Value> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let description = format!("Desktop: {}", tool.name());
    let parent = ctx.cancel.clone();

    lanes
        .enqueue(
            Lane::Desktop,
            EnqueueOptions::described(description).with_parent(parent),
            Box::new(move |token| {
                Box::pin(async move {
                    let ctx = ToolContext {
                        cancel: token,
                        ..ctx
                    };
                    let result = tool.call(ctx, args).await;
                    let failed = result.is_err();
                    let _ = tx.send(result);
                    if failed {
                        Err(Error::Other("desktop tool failed".into()))
                    } else {
                        Ok(())
                    }
                })
            }),
        )
        .await
        .ok();

    rx.await.unwrap_or(Err(Error::Cancelled))
}

fn render_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
