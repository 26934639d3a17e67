/*
 * lib.rs
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

//! embermail: SMTP receiving/relaying server, IMAP access server, outbound
//! SMTP delivery client, and a pluggable mailbox store.

pub mod auth;
pub mod config;
pub mod error;
pub mod imap;
pub mod listener;
pub mod mx;
pub mod net;
pub mod smtp;
pub mod store;

pub use auth::AuthProvider;
pub use config::Config;
pub use error::Error;
pub use mx::{MxRecord, MxResolver};
pub use store::MailboxStore;
