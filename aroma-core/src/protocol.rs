//! WebSocket protocol types
//!
//! All messages are JSON objects tagged with a `type` field.

use serde::{Deserialize, Serialize};

use crate::controller::StatusSnapshot;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Accepted for compatibility; every connection is already subscribed
    Subscribe,

    /// Ping for keepalive
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Periodic or change-triggered status of every fan
    FanStatus(StatusSnapshot),

    /// Pong response to ping
    Pong,

    /// Generic error
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelStatus;
    use chrono::Utc;

    #[test]
    fn test_fan_status_shape() {
        let msg = ServerMessage::FanStatus(StatusSnapshot {
            channels: vec![ChannelStatus {
                id: 2,
                is_on: true,
                remaining_seconds: 1.5,
                total_seconds: 2.0,
            }],
            taken_at: Utc::now(),
        });

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "fan_status");
        assert_eq!(value["channels"][0]["id"], 2);
        assert_eq!(value["channels"][0]["is_on"], true);
        assert_eq!(value["channels"][0]["remaining_seconds"], 1.5);
        assert!(value["taken_at"].is_string());
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"subscribe"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"launch"}"#).is_err());
    }
}
