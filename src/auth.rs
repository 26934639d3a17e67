/*
 * auth.rs
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

//! Membership and credential validation. No errors are surfaced: an
//! unknown address is simply `false`, never a `Result::Err`.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::StaticUser;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Membership test.
    async fn has_user(&self, addr: &str) -> bool;

    /// Credential check.
    async fn validate(&self, addr: &str, secret: &str) -> bool;

    /// Filter `addrs` down to the ones that are known users, preserving
    /// order (duplicates are preserved too: the caller's recipient list
    /// may legitimately repeat an address).
    async fn existing_users(&self, addrs: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(addrs.len());
        for addr in addrs {
            if self.has_user(addr).await {
                out.push(addr.clone());
            }
        }
        out
    }
}

/// In-memory membership table loaded once at startup from `Config`.
pub struct StaticAuthProvider {
    users: HashMap<String, String>,
}

impl StaticAuthProvider {
    pub fn new(users: impl IntoIterator<Item = StaticUser>) -> Self {
        let users = users
            .into_iter()
            .map(|u| (u.address, u.secret))
            .collect();
        StaticAuthProvider { users }
    }

    pub fn empty() -> Self {
        StaticAuthProvider {
            users: HashMap::new(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn has_user(&self, addr: &str) -> bool {
        self.users.contains_key(addr)
    }

    async fn validate(&self, addr: &str, secret: &str) -> bool {
        matches!(self.users.get(addr), Some(s) if s == secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> StaticAuthProvider {
        StaticAuthProvider::new([StaticUser {
            address: "alice@example.com".to_string(),
            secret: "pass123".to_string(),
        }])
    }

    #[tokio::test]
    async fn has_user_is_membership_only() {
        let p = provider();
        assert!(p.has_user("alice@example.com").await);
        assert!(!p.has_user("bob@example.com").await);
    }

    #[tokio::test]
    async fn validate_checks_secret() {
        let p = provider();
        assert!(p.validate("alice@example.com", "pass123").await);
        assert!(!p.validate("alice@example.com", "wrong").await);
        assert!(!p.validate("bob@example.com", "pass123").await);
    }

    #[tokio::test]
    async fn existing_users_filters_and_preserves_order() {
        let p = provider();
        let addrs = vec![
            "bob@example.com".to_string(),
            "alice@example.com".to_string(),
            "carol@example.com".to_string(),
        ];
        assert_eq!(p.existing_users(&addrs).await, vec!["alice@example.com"]);
    }
}
