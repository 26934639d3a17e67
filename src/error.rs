/*
 * error.rs
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

//! Crate-wide error types. Collaborator traits (auth, store, resolver) keep
//! their own narrow error surfaces; this enum is for the session state
//! machines and the binary entry point.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors from a `MailboxStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from an `MxResolver` implementation. Per spec, resolution failure
/// is represented to callers as an empty record list, not a propagated
/// error; this type exists for resolver-internal plumbing and logging only.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("DNS-over-HTTPS request failed: {0}")]
    Request(String),

    #[error("malformed DoH response: {0}")]
    Malformed(String),
}
