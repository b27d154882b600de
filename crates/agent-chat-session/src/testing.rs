//! In-memory `ChatGateway` for view-model and poller tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use agent_chat_gateway::{
    AgentInfo, ChatGateway, GatewayError, HealthResponse, MessageRequest, MessageResponse,
    SessionDetailResponse, SessionInfo, TreeNode, config::strip_base_url,
};

#[derive(Default)]
struct Counters {
    health: AtomicUsize,
    tree: AtomicUsize,
    send: AtomicUsize,
    sessions: AtomicUsize,
    detail: AtomicUsize,
    agents: AtomicUsize,
}

#[derive(Default)]
struct Gates {
    tree: Option<Arc<Notify>>,
    send: Option<Arc<Notify>>,
    sessions: Option<Arc<Notify>>,
    detail: Option<Arc<Notify>>,
}

#[derive(Default)]
struct Failures {
    health: Option<GatewayError>,
    tree: Option<GatewayError>,
    send: Option<GatewayError>,
    sessions: Option<GatewayError>,
    detail: Option<GatewayError>,
    agents: Option<GatewayError>,
}

pub struct FakeGateway {
    base_url: RwLock<String>,
    counters: Counters,
    gates: Mutex<Gates>,
    failures: Mutex<Failures>,
    reply: Mutex<Value>,
    sessions: Mutex<Vec<SessionInfo>>,
    transcript: Mutex<Value>,
    sent: Mutex<Vec<MessageRequest>>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            base_url: RwLock::new("http://fake.local".to_string()),
            counters: Counters::default(),
            gates: Mutex::new(Gates::default()),
            failures: Mutex::new(Failures::default()),
            reply: Mutex::new(json!({ "reply": "pong", "session_id": "s-new" })),
            sessions: Mutex::new(vec![session("s-1")]),
            transcript: Mutex::new(json!([])),
            sent: Mutex::new(Vec::new()),
        }
    }
}

pub fn session(id: &str) -> SessionInfo {
    SessionInfo {
        session_id: id.to_string(),
        created_at: None,
        updated_at: "2026-01-01T00:00:00Z".to_string(),
        store_types: vec!["basic_session".to_string()],
        last_agent: Some("chat".to_string()),
    }
}

fn sample_tree() -> TreeNode {
    let decode = serde_json::from_value(json!({
        "id": "supervisor",
        "name": "Supervisor",
        "status": "running",
        "state": "on",
        "children": [
            { "id": "http0", "name": "HTTP", "status": "running", "children": [] },
            { "id": "agents", "name": "Agents", "status": "running", "children": [
                { "id": "echo", "name": "Echo", "status": "stopped", "children": [] }
            ] }
        ]
    }));
    decode.unwrap_or_else(|error| panic!("sample tree: {error}"))
}

fn sample_health() -> HealthResponse {
    let decode = serde_json::from_value(json!({ "status": "ok", "bot_id": "bot-1" }));
    decode.unwrap_or_else(|error| panic!("sample health: {error}"))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn pass_gate(gate: Option<Arc<Notify>>) {
    if let Some(gate) = gate {
        gate.notified().await;
    }
}

impl FakeGateway {
    pub fn health_calls(&self) -> usize {
        self.counters.health.load(Ordering::SeqCst)
    }

    pub fn tree_calls(&self) -> usize {
        self.counters.tree.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.counters.send.load(Ordering::SeqCst)
    }

    pub fn sessions_calls(&self) -> usize {
        self.counters.sessions.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.counters.detail.load(Ordering::SeqCst)
    }

    pub fn agents_calls(&self) -> usize {
        self.counters.agents.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.health_calls()
            + self.tree_calls()
            + self.send_calls()
            + self.sessions_calls()
            + self.detail_calls()
            + self.agents_calls()
    }

    /// The next tree fetch waits until the returned handle is notified.
    pub fn gate_tree(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.gates).tree = Some(Arc::clone(&gate));
        gate
    }

    pub fn gate_send(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.gates).send = Some(Arc::clone(&gate));
        gate
    }

    pub fn gate_sessions(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.gates).sessions = Some(Arc::clone(&gate));
        gate
    }

    pub fn gate_detail(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.gates).detail = Some(Arc::clone(&gate));
        gate
    }

    pub fn fail_health(&self, error: Option<GatewayError>) {
        lock(&self.failures).health = error;
    }

    pub fn fail_tree(&self, error: Option<GatewayError>) {
        lock(&self.failures).tree = error;
    }

    pub fn fail_send(&self, error: Option<GatewayError>) {
        lock(&self.failures).send = error;
    }

    pub fn fail_sessions(&self, error: Option<GatewayError>) {
        lock(&self.failures).sessions = error;
    }

    pub fn fail_detail(&self, error: Option<GatewayError>) {
        lock(&self.failures).detail = error;
    }

    pub fn fail_agents(&self, error: Option<GatewayError>) {
        lock(&self.failures).agents = error;
    }

    pub fn set_reply(&self, reply: Value) {
        *lock(&self.reply) = reply;
    }

    pub fn set_sessions(&self, sessions: Vec<SessionInfo>) {
        *lock(&self.sessions) = sessions;
    }

    pub fn set_transcript(&self, transcript: Value) {
        *lock(&self.transcript) = transcript;
    }

    pub fn sent(&self) -> Vec<MessageRequest> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl ChatGateway for FakeGateway {
    fn base_url(&self) -> String {
        self.base_url
            .read()
            .map(|url| url.clone())
            .unwrap_or_default()
    }

    fn set_base_url(&self, base_url: &str) {
        if let Ok(mut current) = self.base_url.write() {
            *current = strip_base_url(base_url);
        }
    }

    async fn health(&self) -> Result<HealthResponse, GatewayError> {
        self.counters.health.fetch_add(1, Ordering::SeqCst);
        match lock(&self.failures).health.clone() {
            Some(error) => Err(error),
            None => Ok(sample_health()),
        }
    }

    async fn refresh_health(&self) -> Result<HealthResponse, GatewayError> {
        self.health().await
    }

    async fn component_tree(&self) -> Result<TreeNode, GatewayError> {
        self.counters.tree.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.gates).tree.take();
        pass_gate(gate).await;
        match lock(&self.failures).tree.clone() {
            Some(error) => Err(error),
            None => Ok(sample_tree()),
        }
    }

    async fn send_message(
        &self,
        request: &MessageRequest,
    ) -> Result<MessageResponse, GatewayError> {
        self.counters.send.fetch_add(1, Ordering::SeqCst);
        lock(&self.sent).push(request.clone());
        let gate = lock(&self.gates).send.take();
        pass_gate(gate).await;
        if let Some(error) = lock(&self.failures).send.clone() {
            return Err(error);
        }
        let reply = lock(&self.reply).clone();
        serde_json::from_value(reply).map_err(|error| GatewayError::Decode {
            message: error.to_string(),
        })
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, GatewayError> {
        self.counters.sessions.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.gates).sessions.take();
        pass_gate(gate).await;
        match lock(&self.failures).sessions.clone() {
            Some(error) => Err(error),
            None => Ok(lock(&self.sessions).clone()),
        }
    }

    async fn session_detail(
        &self,
        session_id: &str,
    ) -> Result<SessionDetailResponse, GatewayError> {
        self.counters.detail.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.gates).detail.take();
        pass_gate(gate).await;
        if let Some(error) = lock(&self.failures).detail.clone() {
            return Err(error);
        }
        let transcript = lock(&self.transcript).clone();
        serde_json::from_value(json!({ "session_id": session_id, "transcript": transcript }))
            .map_err(|error| GatewayError::Decode {
                message: error.to_string(),
            })
    }

    async fn session_memory(&self, session_id: &str) -> Result<Value, GatewayError> {
        Ok(json!({ "session_id": session_id, "content": "" }))
    }

    async fn session_files(&self, session_id: &str) -> Result<Value, GatewayError> {
        Ok(json!({ "session_id": session_id, "files": [] }))
    }

    async fn list_agents(&self) -> Result<Vec<AgentInfo>, GatewayError> {
        self.counters.agents.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.failures).agents.clone() {
            return Err(error);
        }
        Ok(vec![AgentInfo {
            agent_id: "news".to_string(),
            name: "news".to_string(),
            last_fetched: None,
            session_count: 1,
            store_types: vec!["kgdocstore".to_string()],
        }])
    }

    async fn agent_knowledge_graph(&self, agent_id: &str) -> Result<Value, GatewayError> {
        Ok(json!({ "agent_id": agent_id, "entities": [] }))
    }
}
