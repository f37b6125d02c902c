//! Worker contract
//!
//! Workers are pluggable analysis units. `analyze` never fails: problems are
//! reported in the response with `success = false`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::bridge::DataBridge;
use crate::domain::ToolArgs;

/// Input handed to a worker
#[derive(Clone)]
pub struct WorkerContext {
    pub request_id: String,
    pub tool_id: String,
    pub args: ToolArgs,
    /// Outputs of workers that ran earlier in this request
    pub upstream: Map<String, Value>,
    pub bridge: Option<Arc<dyn DataBridge>>,
    pub cancel: CancellationToken,
}

impl WorkerContext {
    pub fn new(request_id: impl Into<String>, tool_id: impl Into<String>, args: ToolArgs) -> Self {
        Self {
            request_id: request_id.into(),
            tool_id: tool_id.into(),
            args,
            upstream: Map::new(),
            bridge: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn DataBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub success: bool,
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl WorkerResponse {
    pub fn ok(agent: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            agent: agent.into(),
            timestamp: Utc::now(),
            data,
            errors: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn failed(agent: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            agent: agent.into(),
            timestamp: Utc::now(),
            data: Value::Null,
            errors: vec![error.into()],
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Tokens reported in metadata, if any
    pub fn tokens_used(&self) -> u64 {
        self.metadata
            .get("tokens_used")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

#[async_trait]
pub trait WorkerAgent: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str {
        self.id()
    }

    async fn analyze(&self, ctx: WorkerContext) -> WorkerResponse;
}

/// Worker that forwards the request to one bridge tool
pub struct BridgeWorker {
    id: String,
    name: String,
    bridge_tool: String,
}

impl BridgeWorker {
    pub fn new(id: &str, name: &str, bridge_tool: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            bridge_tool: bridge_tool.to_string(),
        }
    }
}

#[async_trait]
impl WorkerAgent for BridgeWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, ctx: WorkerContext) -> WorkerResponse {
        let Some(bridge) = ctx.bridge.clone() else {
            return WorkerResponse::failed(&self.id, "no data bridge configured");
        };

        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return WorkerResponse::failed(&self.id, "cancelled");
            }
            response = bridge.call(&self.bridge_tool, &ctx.args) => response,
        };

        if response.success {
            WorkerResponse::ok(&self.id, response.data.unwrap_or(Value::Null))
                .with_metadata("bridge_tool", Value::String(self.bridge_tool.clone()))
                .with_metadata("cached", Value::Bool(response.cached))
                .with_metadata("request_id", Value::String(ctx.request_id))
        } else {
            WorkerResponse::failed(
                &self.id,
                response
                    .error
                    .unwrap_or_else(|| format!("{} returned no data", self.bridge_tool)),
            )
        }
    }
}
