use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of hub message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Connection,
    Ping,
    Pong,
    Error,
    Disconnection,
    NewRun,
    RegressionDetected,
    BaselineUpdated,
    AnalysisComplete,
    RunStarted,
    RunProgress,
    RunComplete,
    RunFailed,
}

/// The wire envelope every hub message uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn new(kind: MessageType, data: Value) -> Self {
        Self {
            kind,
            data: Some(data),
            timestamp: Utc::now(),
            id: None,
            client_id: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Error,
            data: None,
            timestamp: Utc::now(),
            id: None,
            client_id: None,
            error: Some(message.into()),
        }
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Inbound client frame. Clients may send `{"type":"ping"}` at any time;
/// anything else is ignored by the hub.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

/// Public snapshot of one connected client, returned by
/// `Hub::client_info` — never the live registry.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub id: String,
    pub remote_addr: String,
    pub user_agent: String,
    pub connected_at: DateTime<Utc>,
    pub last_ping: DateTime<Utc>,
}

/// Tunable hub parameters, defaulted to the values below.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub max_clients: usize,
    pub write_timeout: std::time::Duration,
    pub read_timeout: std::time::Duration,
    pub ping_interval: std::time::Duration,
    pub pong_timeout: std::time::Duration,
    pub max_message_size: usize,
    pub client_buffer_size: usize,
    pub broadcast_buffer_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_clients: 100,
            write_timeout: std::time::Duration::from_secs(10),
            read_timeout: std::time::Duration::from_secs(60),
            ping_interval: std::time::Duration::from_secs(54),
            pong_timeout: std::time::Duration::from_secs(60),
            max_message_size: 512 * 1024,
            client_buffer_size: 256,
            broadcast_buffer_size: 1000,
        }
    }
}

pub const TOPIC_ALL: &str = "*";

pub fn test_topic(test_name: &str) -> String {
    format!("test:{test_name}")
}

pub fn run_topic(run_id: &str) -> String {
    format!("run:{run_id}")
}
