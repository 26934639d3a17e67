/*
 * memory.rs
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

//! In-memory mailbox store. UID is the decimal insertion index; nothing
//! survives process restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::auth::AuthProvider;
use crate::error::StoreError;

use super::MailboxStore;

#[derive(Default)]
pub struct MemoryStore {
    mailboxes: Mutex<HashMap<String, Vec<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl MailboxStore for MemoryStore {
    async fn store(
        &self,
        auth: &dyn AuthProvider,
        from: &str,
        to: &[String],
        body: &[u8],
    ) -> Result<Vec<String>, StoreError> {
        let recipients = super::resolve_mailboxes(auth, to).await;
        let message = build_message(from, to, body);

        let mut mailboxes = self.mailboxes.lock().await;
        for addr in &recipients {
            mailboxes
                .entry(addr.clone())
                .or_insert_with(Vec::new)
                .push(message.clone());
        }
        Ok(recipients)
    }

    async fn list_uids(&self, mailbox: &str) -> Vec<String> {
        let mailboxes = self.mailboxes.lock().await;
        match mailboxes.get(mailbox) {
            Some(msgs) => (0..msgs.len()).map(|i| i.to_string()).collect(),
            None => Vec::new(),
        }
    }

    async fn get_message(&self, mailbox: &str, uid: &str) -> Option<Vec<u8>> {
        let index: usize = uid.parse().ok()?;
        let mailboxes = self.mailboxes.lock().await;
        mailboxes.get(mailbox)?.get(index).cloned()
    }
}

fn build_message(from: &str, to: &[String], body: &[u8]) -> Vec<u8> {
    let mut out = format!("From: {}\nTo: {}\n", from, to.join(", ")).into_bytes();
    out.extend_from_slice(body);
    out
}
