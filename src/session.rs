// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Session Manager
//!
//! Binds an authenticated identity to one connection handle. A [`Session`] is
//! produced by [`ChatHub::connect`] and consumed by [`ChatHub::disconnect`],
//! so a disconnected session cannot be used again.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::directory::User;
use crate::error::HubError;
use crate::hub::ChatHub;
use crate::presence::{ConnectionHandle, Profile, UpsertOutcome};
use crate::protocol::ServerEvent;

/// An active connection of an authenticated user.
#[derive(Debug)]
pub struct Session {
    user: User,
    handle: ConnectionHandle,
}

impl Session {
    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn connection_id(&self) -> Uuid {
        self.handle.id()
    }

    pub fn label(&self) -> String {
        self.handle.label()
    }
}

impl ChatHub {
    /// Registers a new connection for `login` (username or email).
    ///
    /// When `peer_id` is given, the first history page with that peer is
    /// queued on the new connection before the online views go out.
    pub async fn connect(
        &self,
        login: &str,
        handle: ConnectionHandle,
        peer_id: Option<&str>,
    ) -> Result<Session, HubError> {
        let label = handle.label();
        let user = self
            .directory
            .resolve(login.trim())
            .await?
            .ok_or_else(|| HubError::Unauthenticated(login.to_string()))?;

        let profile = Profile {
            user_id: user.id.clone(),
            full_name: user.full_name.clone(),
            profile_image: user.profile_image.clone(),
        };
        let outcome = self.registry.upsert(&user.username, handle.clone(), profile);
        self.refresh_online_gauge();

        let session = Session { user, handle };

        match outcome {
            UpsertOutcome::Registered => {
                info!("[{}] {} is online", label, session.user.username);
                let notify = ServerEvent::Notify {
                    user: (&session.user).into(),
                };
                self.broadcast_except(session.connection_id(), &notify);
            }
            UpsertOutcome::Replaced => {
                info!("[{}] {} reconnected", label, session.user.username);
            }
        }

        if let Some(peer_id) = peer_id.map(str::trim).filter(|p| !p.is_empty()) {
            match self.load_history(&session, peer_id, 1).await {
                Ok(page) => {
                    let messages = page.messages.iter().map(Into::into).collect();
                    if !session.handle.deliver(ServerEvent::ReceiveMessageList { messages }) {
                        debug!("[{}] Dropped initial history page", label);
                    }
                }
                Err(e) => warn!("[{}] Failed to load initial history: {}", label, e),
            }
        }

        self.broadcast_online_views().await;
        Ok(session)
    }

    /// Ends a session and refreshes every remaining viewer.
    ///
    /// If the username was re-registered by a newer connection, the registry
    /// is left alone.
    pub async fn disconnect(&self, session: Session) {
        let label = session.label();
        let removed = self
            .registry
            .remove_if_current(&session.user.username, session.connection_id());

        if !removed {
            debug!(
                "[{}] Stale connection for {} closed",
                label, session.user.username
            );
            return;
        }

        self.refresh_online_gauge();
        info!("[{}] {} is offline", label, session.user.username);
        self.broadcast_online_views().await;
    }
}

#[cfg(test)]
mod tests {
    use crate::hub::test_support::*;
    use crate::presence::ConnectionHandle;
    use crate::protocol::ServerEvent;
    use crate::storage::{MessageStore, NewMessage};
    use crate::error::HubError;

    fn notifies(events: &[ServerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ServerEvent::Notify { .. }))
            .count()
    }

    fn last_view(events: &[ServerEvent]) -> Vec<(String, bool)> {
        events
            .iter()
            .rev()
            .find_map(|e| match e {
                ServerEvent::OnlineUsers { users } => Some(
                    users
                        .iter()
                        .map(|u| (u.username.clone(), u.is_online))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_connect_unknown_identity_rejected() {
        let (hub, _) = memory_hub();
        let (handle, _rx) = ConnectionHandle::channel(8);

        let err = hub.connect("mallory", handle, None).await.unwrap_err();
        assert!(matches!(err, HubError::Unauthenticated(_)));
        assert_eq!(hub.registry().online_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_by_email() {
        let (hub, _) = memory_hub();
        let (session, _rx) = connect(&hub, "alice@example.com").await;
        assert_eq!(session.user().username, "alice");
        assert!(hub.registry().lookup("alice").is_some());
    }

    #[tokio::test]
    async fn test_connect_notifies_others_and_broadcasts_views() {
        let (hub, _) = memory_hub();
        let (_alice, mut alice_rx) = connect(&hub, "alice").await;
        drain(&mut alice_rx);

        let (_bob, mut bob_rx) = connect(&hub, "bob").await;

        let alice_events = drain(&mut alice_rx);
        assert_eq!(notifies(&alice_events), 1);
        assert!(matches!(
            &alice_events[0],
            ServerEvent::Notify { user } if user.username == "bob"
        ));
        assert_eq!(
            last_view(&alice_events),
            vec![
                ("alice".to_string(), true),
                ("bob".to_string(), true),
                ("carol".to_string(), false),
            ]
        );

        let bob_events = drain(&mut bob_rx);
        assert_eq!(notifies(&bob_events), 0);
        assert_eq!(last_view(&bob_events).len(), 3);
        assert_eq!(hub.metrics().users_online.get(), 2);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_handle_without_notify() {
        let (hub, _) = memory_hub();
        let (_first, _first_rx) = connect(&hub, "alice").await;
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        drain(&mut bob_rx);

        let (second, _second_rx) = connect(&hub, "alice").await;

        assert_eq!(hub.registry().online_count(), 2);
        assert_eq!(
            hub.registry().lookup("alice").map(|h| h.id()),
            Some(second.connection_id())
        );
        let bob_events = drain(&mut bob_rx);
        assert_eq!(notifies(&bob_events), 0);
        assert!(!last_view(&bob_events).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_shows_user_offline_to_others() {
        let (hub, _) = memory_hub();
        let (alice, _alice_rx) = connect(&hub, "alice").await;
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        let (_carol, mut carol_rx) = connect(&hub, "carol").await;
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        hub.disconnect(alice).await;

        assert!(!hub.registry().snapshot().contains("alice"));
        for rx in [&mut bob_rx, &mut carol_rx] {
            let view = last_view(&drain(rx));
            assert!(view.contains(&("alice".to_string(), false)));
        }
        assert_eq!(hub.metrics().users_online.get(), 2);
    }

    #[tokio::test]
    async fn test_stale_disconnect_keeps_new_connection() {
        let (hub, _) = memory_hub();
        let (first, _first_rx) = connect(&hub, "alice").await;
        let (second, _second_rx) = connect(&hub, "alice").await;

        hub.disconnect(first).await;

        assert_eq!(
            hub.registry().lookup("alice").map(|h| h.id()),
            Some(second.connection_id())
        );
    }

    #[tokio::test]
    async fn test_connect_with_peer_queues_first_page_privately() {
        let (hub, store) = memory_hub();
        for i in 0..3 {
            store
                .insert(NewMessage {
                    sender_id: "id-bob".to_string(),
                    receiver_id: "id-alice".to_string(),
                    content: format!("m{}", i),
                    created_at: chrono::Utc::now() + chrono::Duration::seconds(i),
                })
                .await
                .unwrap();
        }
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        drain(&mut bob_rx);

        let (handle, mut rx) = ConnectionHandle::channel(64);
        let _alice = hub.connect("alice", handle, Some("id-bob")).await.unwrap();

        let events = drain(&mut rx);
        match &events[0] {
            ServerEvent::ReceiveMessageList { messages } => {
                let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
                assert_eq!(contents, vec!["m0", "m1", "m2"]);
            }
            other => panic!("Expected ReceiveMessageList, got {:?}", other),
        }
        assert!(!drain(&mut bob_rx)
            .iter()
            .any(|e| matches!(e, ServerEvent::ReceiveMessageList { .. })));
        assert_eq!(store.unread_counts("id-alice").await.unwrap().len(), 0);
    }
}
