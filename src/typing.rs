// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Typing Relay
//!
//! Forwards "is typing" hints to the recipient's live connection. Nothing is
//! stored or queued; an offline recipient simply misses the hint.

use tracing::trace;

use crate::hub::ChatHub;
use crate::protocol::ServerEvent;
use crate::session::Session;

impl ChatHub {
    /// Returns whether the hint was handed to the recipient's channel.
    pub fn notify_typing(&self, session: &Session, recipient_username: &str) -> bool {
        let sender = &session.user().username;
        if sender.is_empty() {
            return false;
        }

        let Some(handle) = self.registry.lookup(recipient_username) else {
            trace!("[{}] Typing hint for offline user dropped", session.label());
            return false;
        };

        let relayed = handle.deliver(ServerEvent::NotifyTypingToUser {
            sender: sender.clone(),
        });
        if relayed {
            self.metrics.typing_relayed.inc();
        }
        relayed
    }
}
