//! The observable view-model for one chat client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use agent_chat_gateway::{
    AgentInfo, ChatGateway, GatewayError, HealthResponse, MessageRequest, SessionInfo, UsageInfo,
    normalize_session_id,
};

use crate::coalescer::{RefreshCoalescer, RefreshOptions, RefreshOutcome};
use crate::config::SessionConfig;
use crate::transcript::{ChatMessage, reconstruct};

#[derive(Debug, Clone, Default, PartialEq)]
pub enum HealthStatus {
    /// No check since startup or the last reset.
    #[default]
    Unknown,
    Checking,
    Ok(HealthResponse),
    Error(String),
}

impl HealthStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Checking => "checking",
            Self::Ok(_) => "ok",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub base_url: String,
    /// `None` until the backend assigns one; the next send starts a session.
    pub session_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub sessions: Vec<SessionInfo>,
    pub agents: Vec<AgentInfo>,
    /// Agent that new messages are routed to; `None` lets the backend pick.
    pub selected_agent: Option<String>,
    pub sending: bool,
    pub loading_history: bool,
    pub health: HealthStatus,
    pub last_usage: Option<UsageInfo>,
    pub session_usage_totals: Option<UsageInfo>,
    pub working_memory_updated: bool,
}

impl SessionState {
    /// A send or a history load is outstanding. Sends are refused while
    /// either runs.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.sending || self.loading_history
    }
}

/// Single source of truth for the active conversation and the session list.
///
/// Reads are snapshots, writes go through the named operations below.
/// Cloning yields another handle onto the same state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    gateway: Arc<dyn ChatGateway>,
    state: watch::Sender<SessionState>,
    sessions_refresh: RefreshCoalescer,
    next_local_id: AtomicU64,
}

impl SessionStore {
    pub fn new(gateway: Arc<dyn ChatGateway>) -> Self {
        Self::with_config(gateway, &SessionConfig::default())
    }

    pub fn with_config(gateway: Arc<dyn ChatGateway>, config: &SessionConfig) -> Self {
        Self::with_refresh_window(gateway, config.refresh_window)
    }

    pub fn with_refresh_window(gateway: Arc<dyn ChatGateway>, refresh_window: Duration) -> Self {
        let (state, _) = watch::channel(SessionState {
            base_url: gateway.base_url(),
            ..SessionState::default()
        });
        Self {
            inner: Arc::new(StoreInner {
                gateway,
                state,
                sessions_refresh: RefreshCoalescer::new(refresh_window),
                next_local_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn base_url(&self) -> String {
        self.inner.state.borrow().base_url.clone()
    }

    /// Points the store (and its gateway) at another backend. Trailing
    /// slashes are stripped.
    pub fn set_base_url(&self, base_url: &str) {
        self.inner.gateway.set_base_url(base_url);
        let resolved = self.inner.gateway.base_url();
        self.inner.state.send_if_modified(|state| {
            if state.base_url == resolved {
                return false;
            }
            state.base_url = resolved;
            true
        });
    }

    /// Sends `text` on the current session.
    ///
    /// Returns `false` without touching anything when the text is blank or
    /// the store is busy with another send or a history load. Failures
    /// become an `error` message in the conversation.
    pub async fn send_message(&self, text: &str) -> bool {
        let content = text.trim();
        if content.is_empty() {
            return false;
        }

        let user_id = self.inner.local_id("user");
        let mut session_id = None;
        let mut agent_id = None;
        let started = self.inner.state.send_if_modified(|state| {
            if state.is_busy() {
                return false;
            }
            state.sending = true;
            state.messages.push(ChatMessage::user(user_id, content));
            session_id.clone_from(&state.session_id);
            agent_id.clone_from(&state.selected_agent);
            true
        });
        if !started {
            debug!("send skipped; store is busy");
            return false;
        }
        let _busy = BusyGuard::new(&self.inner.state, clear_sending);

        let request = MessageRequest {
            message: content.to_string(),
            session_id,
            mode: None,
            agent_id,
        };
        match self.inner.gateway.send_message(&request).await {
            Ok(response) => {
                let reply_id = self.inner.local_id("assistant");
                let steps = response.intermediate_steps.unwrap_or_default();
                debug!(
                    session_id = ?response.session_id,
                    steps = steps.len(),
                    "reply received"
                );
                self.inner.state.send_modify(|state| {
                    if let Some(raw) = response.session_id.as_deref() {
                        state.session_id = normalize_session_id(Some(raw));
                    }
                    state
                        .messages
                        .push(ChatMessage::assistant(reply_id, response.reply, steps));
                    state.last_usage = response.usage;
                    state.session_usage_totals = response.session_usage_totals;
                    state.working_memory_updated = response.working_memory_updated;
                });
                self.spawn_post_send_refresh();
            }
            Err(error) => {
                warn!(error = %error, "send message failed");
                let error_id = self.inner.local_id("error");
                self.inner.state.send_modify(|state| {
                    state
                        .messages
                        .push(ChatMessage::error(error_id, error.to_string()));
                });
            }
        }
        true
    }

    /// Switches to `session_id` and replaces the conversation with its
    /// reconstructed transcript.
    ///
    /// No-op when no base URL is configured or the id is blank. A response
    /// arriving after the user moved on is still applied.
    pub async fn load_session_history(&self, session_id: &str) {
        let session_id = session_id.trim();
        if session_id.is_empty() || self.base_url().is_empty() {
            return;
        }

        self.inner.state.send_modify(|state| {
            state.loading_history = true;
            state.session_id = Some(session_id.to_string());
            state.messages.clear();
            state.last_usage = None;
            state.session_usage_totals = None;
            state.working_memory_updated = false;
        });
        let _busy = BusyGuard::new(&self.inner.state, clear_loading_history);

        match self.inner.gateway.session_detail(session_id).await {
            Ok(detail) => {
                let resolved = normalize_session_id(Some(&detail.session_id))
                    .unwrap_or_else(|| session_id.to_string());
                let messages = reconstruct(&resolved, &detail.transcript);
                debug!(
                    session_id = %resolved,
                    entries = detail.transcript.len(),
                    messages = messages.len(),
                    "session history loaded"
                );
                self.inner.state.send_modify(|state| {
                    state.session_id = Some(resolved);
                    state.messages = messages;
                    state.last_usage = None;
                    state.session_usage_totals = None;
                });
            }
            Err(error) => {
                warn!(session_id, error = %error, "load session history failed");
                let error_id = self.inner.local_id("error");
                self.inner.state.send_modify(|state| {
                    state.messages.push(ChatMessage::error(
                        error_id,
                        format!("Failed to load session: {error}"),
                    ));
                });
            }
        }
    }

    /// Starts over locally: conversation, session id, usage and health go
    /// in one update. No network call.
    pub fn reset_session(&self) {
        self.inner.state.send_modify(|state| {
            state.messages.clear();
            state.session_id = None;
            state.last_usage = None;
            state.session_usage_totals = None;
            state.working_memory_updated = false;
            state.health = HealthStatus::Unknown;
        });
    }

    /// Refreshes the session list through the coalescer. Errors reach every
    /// caller that shared the request.
    pub async fn refresh_sessions(
        &self,
        options: RefreshOptions,
    ) -> Result<RefreshOutcome, GatewayError> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .sessions_refresh
            .run(options, move || async move {
                let sessions = inner.gateway.list_sessions().await?;
                debug!(count = sessions.len(), "session list refreshed");
                inner.state.send_modify(|state| state.sessions = sessions);
                Ok(())
            })
            .await
    }

    /// On failure the previous agent list stays and the error is returned.
    pub async fn refresh_agents(&self) -> Result<(), GatewayError> {
        match self.inner.gateway.list_agents().await {
            Ok(agents) => {
                debug!(count = agents.len(), "agent list refreshed");
                self.inner.state.send_modify(|state| state.agents = agents);
                Ok(())
            }
            Err(error) => {
                warn!(error = %error, "agent list refresh failed");
                Err(error)
            }
        }
    }

    /// Routes later sends to `agent_id`. Blank or `None` clears the choice.
    /// The id is not checked against the agent list.
    pub fn select_agent(&self, agent_id: Option<&str>) {
        let selected = agent_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        self.inner.state.send_if_modified(|state| {
            if state.selected_agent == selected {
                return false;
            }
            debug!(agent_id = ?selected, "agent selected");
            state.selected_agent = selected;
            true
        });
    }

    pub async fn check_health(&self) -> HealthStatus {
        self.inner
            .state
            .send_modify(|state| state.health = HealthStatus::Checking);
        let status = match self.inner.gateway.health().await {
            Ok(health) => HealthStatus::Ok(health),
            Err(error) => {
                warn!(error = %error, "health check failed");
                HealthStatus::Error(error.to_string())
            }
        };
        let observed = status.clone();
        self.inner
            .state
            .send_modify(|state| state.health = observed);
        status
    }

    pub async fn session_memory(&self, session_id: &str) -> Result<Value, GatewayError> {
        self.inner.gateway.session_memory(session_id).await
    }

    pub async fn session_files(&self, session_id: &str) -> Result<Value, GatewayError> {
        self.inner.gateway.session_files(session_id).await
    }

    fn spawn_post_send_refresh(&self) {
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(error) = store.refresh_sessions(RefreshOptions::forced()).await {
                warn!(error = %error, "session list refresh after send failed");
            }
        });
    }
}

impl StoreInner {
    fn local_id(&self, kind: &str) -> String {
        let next = self.next_local_id.fetch_add(1, Ordering::Relaxed);
        format!("local:{kind}:{next}")
    }
}

fn clear_sending(state: &mut SessionState) -> bool {
    std::mem::replace(&mut state.sending, false)
}

fn clear_loading_history(state: &mut SessionState) -> bool {
    std::mem::replace(&mut state.loading_history, false)
}

/// Clears a busy flag on every exit path, including a dropped future.
struct BusyGuard<'a> {
    state: &'a watch::Sender<SessionState>,
    clear: fn(&mut SessionState) -> bool,
}

impl<'a> BusyGuard<'a> {
    fn new(state: &'a watch::Sender<SessionState>, clear: fn(&mut SessionState) -> bool) -> Self {
        Self { state, clear }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(self.clear);
    }
}
