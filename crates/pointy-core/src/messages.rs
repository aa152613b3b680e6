//! Push message envelope: `{ "type": ..., "body": ... }`.

use serde::{Deserialize, Serialize};

use crate::view::{FacilitatorView, SessionView};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    SessionCreated,
    SessionLoaded,
    SessionUpdated,
    ErrorEncountered,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionCreated => "SessionCreated",
            Self::SessionLoaded => "SessionLoaded",
            Self::SessionUpdated => "SessionUpdated",
            Self::ErrorEncountered => "ErrorEncountered",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum Message {
    SessionCreated(FacilitatorView),
    SessionLoaded(SessionView),
    SessionUpdated(SessionView),
    ErrorEncountered(String),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::SessionCreated(_) => MessageType::SessionCreated,
            Self::SessionLoaded(_) => MessageType::SessionLoaded,
            Self::SessionUpdated(_) => MessageType::SessionUpdated,
            Self::ErrorEncountered(_) => MessageType::ErrorEncountered,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
