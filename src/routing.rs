// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Routing
//!
//! Validates an outgoing message, persists it, then hands it to the
//! recipient's live connection if there is one. Delivery happens only after
//! the row is stored, so a recipient sees one sender's messages in
//! persistence order.

use tracing::{debug, warn};

use crate::error::HubError;
use crate::hub::ChatHub;
use crate::protocol::ServerEvent;
use crate::session::Session;
use crate::storage::{Message, NewMessage};

impl ChatHub {
    /// Sends `content` from the session user to the user with `receiver_id`.
    pub async fn send(
        &self,
        session: &Session,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, HubError> {
        let receiver_id = receiver_id.trim();
        if receiver_id.is_empty() {
            return Err(HubError::Validation("missing receiver".to_string()));
        }
        if content.trim().is_empty() {
            return Err(HubError::Validation("empty content".to_string()));
        }
        if content.len() > self.settings.max_content_len {
            return Err(HubError::Validation(format!(
                "content exceeds {} bytes",
                self.settings.max_content_len
            )));
        }

        let receiver = self
            .directory
            .find_by_id(receiver_id)
            .await?
            .ok_or_else(|| HubError::NotFound(receiver_id.to_string()))?;

        let new_message = NewMessage {
            sender_id: session.user().id.clone(),
            receiver_id: receiver.id.clone(),
            content: content.to_string(),
            created_at: self.clock.now(),
        };

        let message = match self.store.insert(new_message).await {
            Ok(message) => message,
            Err(e) => {
                warn!("[{}] Failed to persist message: {}", session.label(), e);
                self.metrics.persist_failures.inc();
                return Err(e.into());
            }
        };
        self.metrics.messages_persisted.inc();

        if let Some(handle) = self.registry.lookup(&receiver.username) {
            let event = ServerEvent::ReceivedNewMessage {
                message: (&message).into(),
            };
            if handle.deliver(event) {
                self.metrics.messages_delivered.inc();
            } else {
                debug!(
                    "[{}] Dropped live delivery of message {}",
                    handle.label(),
                    message.id
                );
            }
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::test_support::*;
    use crate::storage::MessageStore;
    use chrono::Utc;

    fn deliveries(events: &[ServerEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::ReceivedNewMessage { message } => Some(message.content.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_send_persists_and_delivers_once() {
        let (hub, store) = memory_hub();
        let (alice, mut alice_rx) = connect(&hub, "alice").await;
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let before = Utc::now();
        let sent = hub.send(&alice, "id-bob", "hi").await.unwrap();

        let stored = store.get(sent.id).await.unwrap().unwrap();
        assert_eq!(stored.sender_id, "id-alice");
        assert_eq!(stored.receiver_id, "id-bob");
        assert!(!stored.is_read);
        assert!(stored.created_at >= before);

        assert_eq!(deliveries(&drain(&mut bob_rx)), vec!["hi"]);
        assert!(deliveries(&drain(&mut alice_rx)).is_empty());
        assert_eq!(hub.metrics().messages_delivered.get(), 1);
    }

    #[tokio::test]
    async fn test_send_to_offline_user_only_persists() {
        let (hub, store) = memory_hub();
        let (alice, _rx) = connect(&hub, "alice").await;

        hub.send(&alice, "id-carol", "later").await.unwrap();

        assert_eq!(store.message_count().await.unwrap(), 1);
        assert_eq!(hub.metrics().messages_delivered.get(), 0);
        assert_eq!(store.unread_counts("id-carol").await.unwrap()["id-alice"], 1);
    }

    #[tokio::test]
    async fn test_send_rejects_invalid_input() {
        let (hub, store) = memory_hub();
        let (alice, _rx) = connect(&hub, "alice").await;
        let too_long = "x".repeat(hub.settings().max_content_len + 1);

        for (receiver, content) in [("", "hi"), ("  ", "hi"), ("id-bob", "   "), ("id-bob", too_long.as_str())] {
            let err = hub.send(&alice, receiver, content).await.unwrap_err();
            assert!(matches!(err, HubError::Validation(_)), "{:?}", err);
        }
        assert_eq!(store.message_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_send_to_unknown_receiver() {
        let (hub, store) = memory_hub();
        let (alice, _rx) = connect(&hub, "alice").await;

        let err = hub.send(&alice, "id-nobody", "hi").await.unwrap_err();
        assert!(matches!(err, HubError::NotFound(_)));
        assert_eq!(store.message_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delivery_order_matches_send_order() {
        let (hub, _) = memory_hub();
        let (alice, _alice_rx) = connect(&hub, "alice").await;
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        drain(&mut bob_rx);

        for content in ["one", "two", "three"] {
            hub.send(&alice, "id-bob", content).await.unwrap();
        }
        assert_eq!(deliveries(&drain(&mut bob_rx)), vec!["one", "two", "three"]);
    }
}
