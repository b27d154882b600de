use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agent_chat_gateway::{TranscriptEntry, TranscriptRole, ToolStep, parse_tool_arguments};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Error,
    System,
}

impl MessageRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Error => "error",
            Self::System => "system",
        }
    }
}

/// A display message. Never mutated once pushed into a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<ToolStep>>,
}

impl ChatMessage {
    #[must_use]
    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::plain(id, MessageRole::User, content)
    }

    /// Assistant reply; an empty step list is stored as `None`.
    #[must_use]
    pub fn assistant(
        id: impl Into<String>,
        content: impl Into<String>,
        steps: Vec<ToolStep>,
    ) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            steps: if steps.is_empty() { None } else { Some(steps) },
        }
    }

    #[must_use]
    pub fn error(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::plain(id, MessageRole::Error, content)
    }

    #[must_use]
    pub fn system(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::plain(id, MessageRole::System, content)
    }

    fn plain(id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            steps: None,
        }
    }

    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.as_ref().map_or(0, Vec::len)
    }
}

/// Folds a backend transcript into display messages.
///
/// Tool-calling assistant turns and tool results never show up on their
/// own; their steps are attached to the next assistant turn that has text.
/// Output is a pure function of the input.
#[must_use]
pub fn reconstruct(session_id: &str, entries: &[TranscriptEntry]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut pending_steps: Vec<ToolStep> = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let has_content = !entry.content.trim().is_empty();
        let tool_calls = entry.tool_calls.as_deref().unwrap_or_default();

        match entry.role {
            TranscriptRole::Assistant if !tool_calls.is_empty() => {
                pending_steps.extend(tool_calls.iter().map(|call| {
                    ToolStep::pending(
                        call.id.clone(),
                        call.function.name.clone(),
                        parse_tool_arguments(&call.function.arguments),
                    )
                }));
            }
            TranscriptRole::Tool => {
                let Some(tool_call_id) = entry.tool_call_id.as_deref() else {
                    continue;
                };
                if let Some(step) = pending_steps
                    .iter_mut()
                    .find(|step| step.tool_call_id == tool_call_id)
                {
                    step.result = entry.content.clone();
                }
            }
            TranscriptRole::User | TranscriptRole::Assistant if has_content => {
                let role = if entry.role == TranscriptRole::User {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                };
                let steps = if role == MessageRole::Assistant && !pending_steps.is_empty() {
                    Some(std::mem::take(&mut pending_steps))
                } else {
                    None
                };
                messages.push(ChatMessage {
                    id: history_message_id(session_id, index, &entry.timestamp),
                    role,
                    content: entry.content.clone(),
                    created_at: parse_timestamp(&entry.timestamp),
                    steps,
                });
            }
            _ => {}
        }
    }

    messages
}

fn history_message_id(session_id: &str, index: usize, timestamp: &str) -> String {
    format!("{session_id}:{index}:{}", timestamp.trim())
}

/// Unparseable timestamps map to the epoch rather than "now" so repeated
/// reconstructions agree.
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
