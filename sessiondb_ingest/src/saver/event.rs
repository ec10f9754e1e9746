//! Wire model of the upstream session events.
//!
//! Each message is one JSON object carrying the session it belongs to and a `type` tag:
//!
//! ```json
//! {"session_id": 42, "project_id": 1, "timestamp": 1700000000000, "type": "page", "message_id": 3, "path": "/pricing"}
//! ```

use serde::Deserialize;
use sessiondb_id::{ProjectId, SessionId};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub project_id: ProjectId,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    SessionStart {
        #[serde(default)]
        user_agent: Option<String>,
        #[serde(default)]
        user_country: Option<String>,
        #[serde(default)]
        user_id: Option<String>,
    },
    Page {
        message_id: i64,
        path: String,
        #[serde(default)]
        referrer: Option<String>,
        #[serde(default)]
        load_time: Option<i64>,
    },
    Click {
        message_id: i64,
        label: String,
        #[serde(default)]
        selector: Option<String>,
    },
    Input {
        message_id: i64,
        label: String,
        #[serde(default)]
        value: Option<String>,
    },
    Custom {
        message_id: i64,
        name: String,
        #[serde(default)]
        payload: Option<String>,
    },
    SessionEnd {
        /// Session length in milliseconds.
        duration: i64,
    },
}

impl SessionEvent {
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
