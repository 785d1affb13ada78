use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a session; append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub session_id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(session_id: &str, role: Role, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            role,
            text: text.into(),
            timestamp,
        }
    }

    pub fn user(session_id: &str, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(session_id, Role::User, text, timestamp)
    }

    pub fn assistant(session_id: &str, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(session_id, Role::Assistant, text, timestamp)
    }
}
