use std::borrow::Cow;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::{GatewayConfig, strip_base_url};
use crate::error::{GatewayError, format_http_error};
use crate::types::{
    AgentInfo, AgentsResponse, HealthResponse, MessageRequest, MessageResponse,
    SessionDetailResponse, SessionInfo, SessionsResponse, TreeNode,
};

/// Outbound calls the session layer makes against the backend.
///
/// `HttpGateway` is the production implementation; tests substitute
/// in-memory fakes.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Current base URL; empty when none is configured.
    fn base_url(&self) -> String;
    /// Replaces the base URL, stripping trailing slashes.
    fn set_base_url(&self, base_url: &str);

    async fn health(&self) -> Result<HealthResponse, GatewayError>;
    async fn refresh_health(&self) -> Result<HealthResponse, GatewayError>;
    async fn component_tree(&self) -> Result<TreeNode, GatewayError>;
    async fn send_message(&self, request: &MessageRequest)
    -> Result<MessageResponse, GatewayError>;
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, GatewayError>;
    async fn session_detail(&self, session_id: &str)
    -> Result<SessionDetailResponse, GatewayError>;
    async fn session_memory(&self, session_id: &str) -> Result<Value, GatewayError>;
    async fn session_files(&self, session_id: &str) -> Result<Value, GatewayError>;
    async fn list_agents(&self) -> Result<Vec<AgentInfo>, GatewayError>;
    async fn agent_knowledge_graph(&self, agent_id: &str) -> Result<Value, GatewayError>;
}

#[derive(Debug)]
pub struct HttpGateway {
    base_url: RwLock<String>,
    timeout: Duration,
    message_timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

impl HttpGateway {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            base_url: RwLock::new(strip_base_url(&config.base_url)),
            timeout: config.timeout(),
            message_timeout: config.message_timeout(),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        let base_url = self.current_base_url();
        if trimmed.starts_with('/') {
            Some(format!("{base_url}{trimmed}"))
        } else {
            Some(format!("{base_url}/{trimmed}"))
        }
    }

    #[must_use]
    pub fn health_path() -> &'static str {
        "/api/health"
    }

    #[must_use]
    pub fn health_refresh_path() -> &'static str {
        "/api/health/refresh"
    }

    #[must_use]
    pub fn tree_path() -> &'static str {
        "/api/tree"
    }

    #[must_use]
    pub fn message_path() -> &'static str {
        "/api/message"
    }

    #[must_use]
    pub fn sessions_path() -> &'static str {
        "/api/sessions"
    }

    #[must_use]
    pub fn session_detail_path(session_id: &str) -> String {
        format!("/api/session/{}", path_segment(session_id))
    }

    #[must_use]
    pub fn session_memory_path(session_id: &str) -> String {
        format!("/api/sessions/{}/memory", path_segment(session_id))
    }

    #[must_use]
    pub fn session_files_path(session_id: &str) -> String {
        format!("/api/sessions/{}/files", path_segment(session_id))
    }

    #[must_use]
    pub fn agents_path() -> &'static str {
        "/api/agents"
    }

    #[must_use]
    pub fn agent_kg_path(agent_id: &str) -> String {
        format!("/api/agents/{}/kg", path_segment(agent_id))
    }

    pub async fn get_json<T>(&self, path: &str) -> Result<T, GatewayError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let response = self.send_get(path).await?;
        decode_json_response(response).await
    }

    /// Single-attempt POST; message sends are not safe to replay.
    pub async fn post_json<Req, Res>(
        &self,
        path: &str,
        payload: &Req,
        timeout: Duration,
    ) -> Result<Res, GatewayError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let url = self.resolve_url(path)?;
        debug!(%url, "POST");
        let response = self
            .http
            .post(url.as_str())
            .header("x-request-id", request_id())
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|error| GatewayError::Request {
                message: error.to_string(),
            })?;
        decode_json_response(response).await
    }

    async fn send_get(&self, path: &str) -> Result<reqwest::Response, GatewayError> {
        let url = self.resolve_url(path)?;
        let mut last_error: Option<String> = None;

        for attempt in 0..self.request_attempts {
            debug!(%url, attempt, "GET");
            let request = self
                .http
                .get(url.as_str())
                .header("x-request-id", request_id())
                .timeout(self.timeout);

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    debug!(%url, attempt, error = %error, "GET failed");
                    last_error = Some(error.to_string());
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(GatewayError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }

    fn resolve_url(&self, path: &str) -> Result<String, GatewayError> {
        if self.current_base_url().is_empty() {
            return Err(GatewayError::BaseUrlMissing);
        }
        self.endpoint(path).ok_or(GatewayError::InvalidPath)
    }

    fn current_base_url(&self) -> String {
        self.base_url
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl ChatGateway for HttpGateway {
    fn base_url(&self) -> String {
        self.current_base_url()
    }

    fn set_base_url(&self, base_url: &str) {
        let stripped = strip_base_url(base_url);
        match self.base_url.write() {
            Ok(mut guard) => *guard = stripped,
            Err(poisoned) => *poisoned.into_inner() = stripped,
        }
    }

    async fn health(&self) -> Result<HealthResponse, GatewayError> {
        self.get_json(Self::health_path()).await
    }

    async fn refresh_health(&self) -> Result<HealthResponse, GatewayError> {
        self.post_json(
            Self::health_refresh_path(),
            &serde_json::json!({}),
            self.timeout,
        )
        .await
    }

    async fn component_tree(&self) -> Result<TreeNode, GatewayError> {
        self.get_json(Self::tree_path()).await
    }

    async fn send_message(
        &self,
        request: &MessageRequest,
    ) -> Result<MessageResponse, GatewayError> {
        self.post_json(Self::message_path(), request, self.message_timeout)
            .await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, GatewayError> {
        let response: SessionsResponse = self.get_json(Self::sessions_path()).await?;
        Ok(response.sessions)
    }

    async fn session_detail(
        &self,
        session_id: &str,
    ) -> Result<SessionDetailResponse, GatewayError> {
        self.get_json(Self::session_detail_path(session_id).as_str())
            .await
    }

    async fn session_memory(&self, session_id: &str) -> Result<Value, GatewayError> {
        self.get_json(Self::session_memory_path(session_id).as_str())
            .await
    }

    async fn session_files(&self, session_id: &str) -> Result<Value, GatewayError> {
        self.get_json(Self::session_files_path(session_id).as_str())
            .await
    }

    async fn list_agents(&self) -> Result<Vec<AgentInfo>, GatewayError> {
        let response: AgentsResponse = self.get_json(Self::agents_path()).await?;
        Ok(response.agents)
    }

    async fn agent_knowledge_graph(&self, agent_id: &str) -> Result<Value, GatewayError> {
        self.get_json(Self::agent_kg_path(agent_id).as_str()).await
    }
}

/// Ids are trimmed and percent-encoded so `/`, `?` or `#` stay inside
/// one path segment.
fn path_segment(id: &str) -> Cow<'_, str> {
    urlencoding::encode(id.trim())
}

fn request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, GatewayError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| GatewayError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| GatewayError::Decode {
        message: error.to_string(),
    })
}
