use serde::{Deserialize, Serialize};

/// A message in a conversation, as sent to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Message {
    /// Create a text message with current timestamp.
    pub fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: text.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Convert to the `{role, content}` shape chat-completion servers expect.
    pub fn as_provider_message(&self) -> serde_json::Value {
        serde_json::json!({
            "role": self.role,
            "content": self.content,
        })
    }
}

/// A streaming event from the completion endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text(String),
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
    Done,
    Error(String),
}
