//! Chat request wire shape and mode resolution

use crate::context::SessionContext;
use crate::error::ChatError;
use crate::message::{Attachment, ChatMessage, Role};
use serde::{Deserialize, Serialize};

/// A named task for automation mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationTask {
    pub name: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<SessionContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<AutomationTask>,
}

impl ChatRequestBody {
    /// Single user message in standard mode
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(text)],
            ..Default::default()
        }
    }

    /// Mode tag as sent, `standard` when absent
    pub fn mode_name(&self) -> &str {
        self.mode.as_deref().map(str::trim).filter(|m| !m.is_empty()).unwrap_or("standard")
    }

    /// Validate and resolve into a typed request
    pub fn into_request(self, max_message_chars: usize) -> Result<ChatRequest, ChatError> {
        let last = self
            .messages
            .last()
            .ok_or_else(|| ChatError::validation("at least one message is required"))?;
        if last.role != Role::User {
            return Err(ChatError::validation("the last message must be from the user"));
        }
        if let Some(long) = self
            .messages
            .iter()
            .find(|m| m.content.chars().count() > max_message_chars)
        {
            return Err(ChatError::validation(format!(
                "{} message exceeds {} characters",
                long.role, max_message_chars
            )));
        }

        let session_id = self
            .session_id
            .clone()
            .or_else(|| self.context.as_ref().and_then(|c| c.session_id.clone()))
            .filter(|s| !s.trim().is_empty());

        let mode_name = self.mode_name().to_string();
        let mode = match mode_name.as_str() {
            "standard" => ChatMode::Standard,
            "realtime" => ChatMode::Realtime {
                session_id: session_id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            },
            "admin" => ChatMode::Admin {
                session_id: session_id
                    .clone()
                    .ok_or_else(|| ChatError::validation("sessionId is required for admin mode"))?,
            },
            "multimodal" => {
                if self.attachments.is_empty() {
                    return Err(ChatError::validation(
                        "at least one attachment is required for multimodal mode",
                    ));
                }
                ChatMode::Multimodal {
                    attachments: self.attachments,
                }
            }
            "automation" => match self.task {
                Some(task) if !task.name.trim().is_empty() => ChatMode::Automation { task },
                _ => {
                    return Err(ChatError::validation(
                        "a task with a name is required for automation mode",
                    ))
                }
            },
            other => return Err(ChatError::validation(format!("invalid chat mode '{}'", other))),
        };

        // Realtime may have minted its own id
        let session_id = match &mode {
            ChatMode::Realtime { session_id } | ChatMode::Admin { session_id } => Some(session_id.clone()),
            _ => session_id,
        };

        Ok(ChatRequest {
            messages: self.messages,
            context: self.context,
            session_id,
            mode,
        })
    }
}

/// How a request is handled
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMode {
    Standard,
    Realtime { session_id: String },
    Admin { session_id: String },
    Multimodal { attachments: Vec<Attachment> },
    Automation { task: AutomationTask },
}

impl ChatMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Realtime { .. } => "realtime",
            Self::Admin { .. } => "admin",
            Self::Multimodal { .. } => "multimodal",
            Self::Automation { .. } => "automation",
        }
    }
}

/// A validated chat request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub context: Option<SessionContext>,
    pub session_id: Option<String>,
    pub mode: ChatMode,
}

impl ChatRequest {
    pub fn standard(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            context: None,
            session_id: None,
            mode: ChatMode::Standard,
        }
    }
}
