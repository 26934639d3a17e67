/*
 * mod.rs
 * Copyright (C) 2026 embermail contributors
 *
 * This file is part of embermail, a self-hosted SMTP/IMAP mail stack.
 *
 * embermail is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * embermail is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with embermail.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Pluggable mailbox storage. `MailboxStore` is the contract both the SMTP
//! server (append on successful `DATA`) and the IMAP server (enumerate,
//! fetch) depend on; `memory` and `filesystem` are the two realizations.

pub mod filesystem;
pub mod memory;
pub mod normalize;

use async_trait::async_trait;

use crate::auth::AuthProvider;
use crate::error::StoreError;

#[async_trait]
pub trait MailboxStore: Send + Sync {
    /// Append `body` (already assembled as `From: ...\nTo: ...\n<body>`) to
    /// every address in `to` that `auth` recognizes as a local user.
    /// Returns the addresses actually stored to, in `to`'s order.
    async fn store(
        &self,
        auth: &dyn AuthProvider,
        from: &str,
        to: &[String],
        body: &[u8],
    ) -> Result<Vec<String>, StoreError>;

    /// UIDs in append order. Empty for an unknown or empty mailbox.
    async fn list_uids(&self, mailbox: &str) -> Vec<String>;

    /// `list_uids(mailbox).len()`.
    async fn count_uids(&self, mailbox: &str) -> usize {
        self.list_uids(mailbox).await.len()
    }

    /// The stored octets for `uid` in `mailbox`, or `None` if absent.
    async fn get_message(&self, mailbox: &str, uid: &str) -> Option<Vec<u8>>;
}

/// `resolveMailboxes`: delegates membership filtering to the auth provider.
pub async fn resolve_mailboxes(auth: &dyn AuthProvider, recipients: &[String]) -> Vec<String> {
    auth.existing_users(recipients).await
}
