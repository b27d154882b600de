//! Wire types for the `/api/*` surface of the agent backend.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Session id the backend returns when a reply is not bound to any session.
pub const NO_SESSION_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Maps the backend's "no session" sentinel (and blank ids) to `None`.
#[must_use]
pub fn normalize_session_id(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() || trimmed == NO_SESSION_ID {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub llm_provider: Option<String>,
    #[serde(default)]
    pub llm_model: Option<String>,
    #[serde(default)]
    pub uptime_ms: Option<u64>,
    #[serde(default)]
    pub session_count: Option<u64>,
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    /// Everything else the backend reports (subsystems, cron, limits).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HealthResponse {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Routes the turn to a specific agent; the backend default otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageResponse {
    pub reply: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub working_memory_updated: bool,
    #[serde(default)]
    pub intermediate_steps: Option<Vec<ToolStep>>,
    #[serde(default)]
    pub usage: Option<UsageInfo>,
    #[serde(default)]
    pub session_usage_totals: Option<UsageInfo>,
}

/// One tool invocation plus its (possibly still empty) result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStep {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default, deserialize_with = "deserialize_arguments")]
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub result: String,
}

impl ToolStep {
    #[must_use]
    pub fn pending(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            result: String::new(),
        }
    }

    /// Tools flag their own failures by prefixing the result text; this is
    /// a display hint only.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        let head = self.result.trim_start();
        head.get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("error:"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageInfo {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub estimated_cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub store_types: Vec<String>,
    #[serde(default)]
    pub last_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionsResponse {
    #[serde(default)]
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_fetched: Option<String>,
    #[serde(default)]
    pub session_count: u64,
    #[serde(default)]
    pub store_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentsResponse {
    #[serde(default)]
    pub agents: Vec<AgentInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
    Tool,
    System,
    /// Any role string this client does not know.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<TranscriptToolCall>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptToolCall {
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    pub function: TranscriptToolFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptToolFunction {
    pub name: String,
    /// JSON-encoded argument object, exactly as the model produced it.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionDetailResponse {
    pub session_id: String,
    #[serde(default)]
    pub transcript: Vec<TranscriptEntry>,
}

/// One node of the backend's component/status topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub children: Vec<TreeNode>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl TreeNode {
    /// Depth-first, root first, children in order.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&TreeNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// Parses a tool-call argument payload into a string-keyed map.
///
/// Non-object JSON and unparseable text are kept under a `raw` key so the
/// original input stays visible.
#[must_use]
pub fn parse_tool_arguments(raw: &str) -> Map<String, Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = Map::new();
            map.insert("raw".to_string(), Value::String(raw.to_string()));
            map
        }
    }
}

fn deserialize_arguments<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        Value::String(raw) => parse_tool_arguments(&raw),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("raw".to_string(), other);
            map
        }
    })
}
