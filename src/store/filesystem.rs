/*
 * filesystem.rs
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

//! Filesystem-backed mailbox store. Rooted at a pre-existing directory;
//! one subdirectory per mailbox, one file per message named `<uid>.eml`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::auth::AuthProvider;
use crate::error::StoreError;

use super::normalize::mailbox_key;
use super::MailboxStore;

pub struct FilesystemStore {
    root: PathBuf,
    seq: AtomicU32,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemStore {
            root: root.into(),
            seq: AtomicU32::new(0),
        }
    }

    fn mailbox_dir(&self, mailbox: &str) -> PathBuf {
        let (user, domain) = mailbox_key(mailbox);
        if domain.is_empty() {
            self.root.join(user)
        } else {
            self.root.join(domain).join(user)
        }
    }

    /// `<millisecond-unix-timestamp><3-digit-sequence>`, where the sequence
    /// is a per-process append counter modulo 1000, guaranteeing intra-
    /// millisecond uniqueness without any cross-process coordination.
    fn next_uid(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) % 1000;
        format!("{}{:03}", millis, seq)
    }
}

#[async_trait]
impl MailboxStore for FilesystemStore {
    async fn store(
        &self,
        auth: &dyn AuthProvider,
        from: &str,
        to: &[String],
        body: &[u8],
    ) -> Result<Vec<String>, StoreError> {
        let recipients = super::resolve_mailboxes(auth, to).await;
        let message = build_message(from, to, body);

        let mut stored = Vec::with_capacity(recipients.len());
        for addr in &recipients {
            let dir = self.mailbox_dir(addr);
            tokio::fs::create_dir_all(&dir).await?;
            let uid = self.next_uid();
            let path = dir.join(format!("{}.eml", uid));
            tokio::fs::write(&path, &message).await?;
            stored.push(addr.clone());
        }
        Ok(stored)
    }

    async fn list_uids(&self, mailbox: &str) -> Vec<String> {
        let dir = self.mailbox_dir(mailbox);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut uids = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(stem) = eml_stem(&entry.path()) {
                uids.push(stem);
            }
        }
        uids.sort_by_key(|stem| stem.parse::<u64>().unwrap_or(0));
        uids
    }

    async fn get_message(&self, mailbox: &str, uid: &str) -> Option<Vec<u8>> {
        let path = self.mailbox_dir(mailbox).join(format!("{}.eml", uid));
        tokio::fs::read(&path).await.ok()
    }
}

fn eml_stem(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("eml") {
        return None;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

fn build_message(from: &str, to: &[String], body: &[u8]) -> Vec<u8> {
    let mut out = format!("From: {}\nTo: {}\n", from, to.join(", ")).into_bytes();
    out.extend_from_slice(body);
    out
}
