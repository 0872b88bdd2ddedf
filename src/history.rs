// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! History Pager
//!
//! Pages through the conversation between two users, most recent window
//! first. The window is selected newest-first and then returned oldest-first,
//! so page 1 holds the latest messages in reading order.
//!
//! Loading a page marks every returned message addressed to the viewer as
//! read. A failure there does not fail the page.

use tracing::{debug, warn};

use crate::directory::User;
use crate::error::HubError;
use crate::hub::ChatHub;
use crate::session::Session;
use crate::storage::{Message, MessageId, PageRequest};

/// What happened to the read flags of a served page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptOutcome {
    /// Number of messages that flipped from unread to read.
    Marked(usize),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Ascending by creation time.
    pub messages: Vec<Message>,
    pub receipts: ReceiptOutcome,
}

impl ChatHub {
    /// Loads `page_number` of the session user's conversation with `peer_id`
    /// using the configured page size.
    pub async fn load_history(
        &self,
        session: &Session,
        peer_id: &str,
        page_number: i64,
    ) -> Result<HistoryPage, HubError> {
        let page = PageRequest::new(page_number, self.settings.page_size);
        self.load_page(session.user(), peer_id, page).await
    }

    pub async fn load_page(
        &self,
        viewer: &User,
        peer_id: &str,
        page: PageRequest,
    ) -> Result<HistoryPage, HubError> {
        let mut messages = self
            .store
            .recent_between(&viewer.id, peer_id, page)
            .await?;
        messages.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        let unread: Vec<MessageId> = messages
            .iter()
            .filter(|m| m.receiver_id == viewer.id && !m.is_read)
            .map(|m| m.id)
            .collect();

        let receipts = if unread.is_empty() {
            ReceiptOutcome::Marked(0)
        } else {
            match self.store.mark_read(&viewer.id, &unread).await {
                Ok(marked) => {
                    for message in messages.iter_mut().filter(|m| unread.contains(&m.id)) {
                        message.is_read = true;
                    }
                    self.metrics.read_receipts_marked.inc_by(marked as u64);
                    ReceiptOutcome::Marked(marked)
                }
                Err(e) => {
                    warn!(
                        "Failed to mark {} messages read for {}: {}",
                        unread.len(),
                        viewer.username,
                        e
                    );
                    self.metrics.read_receipt_failures.inc();
                    ReceiptOutcome::Failed(e.to_string())
                }
            }
        };

        debug!(
            "History page {} for {}: {} messages",
            page.page_number,
            viewer.username,
            messages.len()
        );
        self.metrics.history_pages_served.inc();
        Ok(HistoryPage { messages, receipts })
    }
}
