// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod handler;
pub mod history;
pub mod http;
pub mod hub;
pub mod metrics;
pub mod presence;
pub mod protocol;
pub mod rate_limit;
pub mod roster;
pub mod routing;
pub mod server;
pub mod session;
pub mod storage;
pub mod typing;

pub use error::{HubError, StoreError};
pub use hub::{ChatHub, HubDeps, HubSettings};
pub use session::Session;
