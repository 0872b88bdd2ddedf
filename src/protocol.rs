// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire protocol.
//!
//! Every WebSocket binary frame is a 4-byte big-endian length prefix followed
//! by a JSON [`Envelope`]. Payloads are internally tagged by `type`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::directory::User;
use crate::roster::OnlineUser;
use crate::storage::Message;

pub const PROTOCOL_VERSION: u8 = 1;
pub const FRAME_HEADER_SIZE: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub version: u8,
    pub message_id: String,
    pub timestamp: u64,
    pub payload: P,
}

impl<P> Envelope<P> {
    pub fn new(payload: P) -> Self {
        Envelope {
            version: PROTOCOL_VERSION,
            message_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now().timestamp().max(0) as u64,
            payload,
        }
    }
}

// ============================================================================
// Client -> server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    Connect(Connect),
    LoadMessages(LoadMessages),
    SendMessage(SendMessage),
    NotifyTyping(NotifyTyping),
    #[serde(other)]
    Unknown,
}

/// First frame of every connection. Identity comes from the upgrade request,
/// so any fields sent here are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Connect {}

fn first_page() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadMessages {
    pub recipient_id: String,
    #[serde(default = "first_page")]
    pub page_number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    pub receive_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyTyping {
    pub recipient_user_name: String,
}

// ============================================================================
// Server -> client
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    Connected { user: UserDto },
    Acknowledgment(Acknowledgment),
    ReceiveMessageList { messages: Vec<MessageDto> },
    ReceivedNewMessage { message: MessageDto },
    NotifyTypingToUser { sender: String },
    Notify { user: UserDto },
    OnlineUsers { users: Vec<OnlineUserDto> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    /// The message was persisted.
    Stored,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgment {
    /// Envelope id of the command being acknowledged.
    pub message_id: String,
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Store-assigned id of the persisted chat message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: i64,
    pub content: String,
    pub create_date: DateTime<Utc>,
    pub receive_id: String,
    pub sender_id: String,
}

impl From<&Message> for MessageDto {
    fn from(msg: &Message) -> Self {
        MessageDto {
            id: msg.id,
            content: msg.content.clone(),
            create_date: msg.created_at,
            receive_id: msg.receiver_id.clone(),
            sender_id: msg.sender_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDto {
    pub id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub profile_image: Option<String>,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        UserDto {
            id: user.id.clone(),
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            profile_image: user.profile_image.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineUserDto {
    pub id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub profile_image: Option<String>,
    pub is_online: bool,
    pub unread_count: u64,
}

impl From<OnlineUser> for OnlineUserDto {
    fn from(view: OnlineUser) -> Self {
        OnlineUserDto {
            id: view.user.id,
            username: view.user.username,
            full_name: view.user.full_name,
            profile_image: view.user.profile_image,
            is_online: view.is_online,
            unread_count: view.unread_count,
        }
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Decodes an envelope from binary data (with length prefix).
pub fn decode_frame<P: DeserializeOwned>(data: &[u8]) -> Result<Envelope<P>, String> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err("Frame too short".to_string());
    }

    let mut len_bytes = [0u8; FRAME_HEADER_SIZE];
    len_bytes.copy_from_slice(&data[..FRAME_HEADER_SIZE]);
    let declared = u32::from_be_bytes(len_bytes) as usize;
    let json = &data[FRAME_HEADER_SIZE..];
    if declared != json.len() {
        return Err(format!(
            "Length prefix mismatch: declared {}, got {}",
            declared,
            json.len()
        ));
    }

    serde_json::from_slice(json).map_err(|e| e.to_string())
}

/// Encodes an envelope to binary data (with length prefix).
pub fn encode_frame<P: Serialize>(envelope: &Envelope<P>) -> Result<Vec<u8>, String> {
    let json = serde_json::to_vec(envelope).map_err(|e| e.to_string())?;
    let len = json.len() as u32;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + json.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&json);

    Ok(frame)
}

/// Acknowledges a persisted `SendMessage`.
pub fn stored_ack(message_id: &str, stored_id: i64) -> ServerEvent {
    ServerEvent::Acknowledgment(Acknowledgment {
        message_id: message_id.to_string(),
        status: AckStatus::Stored,
        reason: None,
        stored_id: Some(stored_id),
    })
}

/// Rejects a client command with a short machine-readable reason.
pub fn failed_ack(message_id: &str, reason: &str) -> ServerEvent {
    ServerEvent::Acknowledgment(Acknowledgment {
        message_id: message_id.to_string(),
        status: AckStatus::Failed,
        reason: Some(reason.to_string()),
        stored_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_frame(value: &serde_json::Value) -> Vec<u8> {
        let json = serde_json::to_vec(value).unwrap();
        let mut frame = (json.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(&json);
        frame
    }

    #[test]
    fn test_load_messages_defaults_to_first_page() {
        let frame = raw_frame(&json!({
            "version": 1,
            "message_id": "m-1",
            "timestamp": 1000,
            "payload": { "type": "LoadMessages", "recipient_id": "user-2" }
        }));

        let envelope: Envelope<ClientFrame> = decode_frame(&frame).unwrap();
        match envelope.payload {
            ClientFrame::LoadMessages(load) => {
                assert_eq!(load.recipient_id, "user-2");
                assert_eq!(load.page_number, 1);
            }
            other => panic!("Expected LoadMessages, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_payload_type_is_tolerated() {
        let frame = raw_frame(&json!({
            "version": 1,
            "message_id": "m-2",
            "timestamp": 1000,
            "payload": { "type": "EditMessage" }
        }));

        let envelope: Envelope<ClientFrame> = decode_frame(&frame).unwrap();
        assert!(matches!(envelope.payload, ClientFrame::Unknown));
    }

    #[test]
    fn test_decode_rejects_short_and_mismatched_frames() {
        assert!(decode_frame::<ClientFrame>(&[0, 0]).is_err());

        let mut frame = raw_frame(&json!({"version": 1}));
        frame.push(b' ');
        let err = decode_frame::<ClientFrame>(&frame).unwrap_err();
        assert!(err.contains("mismatch"));
    }

    #[test]
    fn test_server_event_wire_shape() {
        let envelope = Envelope::new(ServerEvent::NotifyTypingToUser {
            sender: "alice".to_string(),
        });
        let frame = encode_frame(&envelope).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&frame[FRAME_HEADER_SIZE..]).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["payload"]["type"], "NotifyTypingToUser");
        assert_eq!(value["payload"]["sender"], "alice");
    }

    #[test]
    fn test_stored_ack_omits_reason() {
        let frame = encode_frame(&Envelope::new(stored_ack("m-3", 42))).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&frame[FRAME_HEADER_SIZE..]).unwrap();

        assert_eq!(value["payload"]["type"], "Acknowledgment");
        assert_eq!(value["payload"]["status"], "Stored");
        assert_eq!(value["payload"]["stored_id"], 42);
        assert!(value["payload"].get("reason").is_none());
    }

    #[test]
    fn test_failed_ack_carries_reason() {
        match failed_ack("m-1", "not_found") {
            ServerEvent::Acknowledgment(ack) => {
                assert_eq!(ack.message_id, "m-1");
                assert_eq!(ack.status, AckStatus::Failed);
                assert_eq!(ack.reason.as_deref(), Some("not_found"));
                assert!(ack.stored_id.is_none());
            }
            other => panic!("Expected Acknowledgment, got {:?}", other),
        }
    }
}
