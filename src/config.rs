/*
 * config.rs
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

//! Typed configuration, loaded from a TOML file. Every field has a usable
//! default so a config-less run (tests, quick local trials) still works.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One statically configured mailbox user.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaticUser {
    pub address: String,
    pub secret: String,
}

/// Where stored mail lives.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    Memory,
    Filesystem { root: PathBuf },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

/// Paths to a PEM certificate chain and private key used by every TLS
/// listener (SMTP STARTTLS, IMAP STARTTLS, IMAPS implicit).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_chain_path: PathBuf,
    pub private_key_path: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SmtpConfig {
    pub port: u16,
    pub hostname: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        SmtpConfig {
            port: 2525,
            hostname: "localhost".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImapConfig {
    pub hostname: String,
    pub imap_port: u16,
    pub imaps_port: u16,
}

impl Default for ImapConfig {
    fn default() -> Self {
        ImapConfig {
            hostname: "localhost".to_string(),
            imap_port: 1143,
            imaps_port: 1993,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeliveryConfig {
    pub hostname: String,
    pub mx_server_port: u16,
    pub connect_timeout_secs: u64,
    pub use_tls: bool,
    pub doh_upstream: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig {
            hostname: "localhost".to_string(),
            mx_server_port: 25,
            connect_timeout_secs: 30,
            use_tls: true,
            doh_upstream: "https://cloudflare-dns.com/dns-query".to_string(),
        }
    }
}

impl DeliveryConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Top-level embermail configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub smtp: SmtpConfig,
    pub imap: ImapConfig,
    pub delivery: DeliveryConfig,
    pub storage: StorageConfig,
    pub tls: Option<TlsConfig>,
    pub users: Vec<StaticUser>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            smtp: SmtpConfig::default(),
            imap: ImapConfig::default(),
            delivery: DeliveryConfig::default(),
            storage: StorageConfig::default(),
            tls: None,
            users: Vec::new(),
        }
    }
}

impl Config {
    /// Load from a TOML file; falls back to `Config::default()` if the
    /// file does not exist (a fresh checkout should still run).
    pub async fn load(path: impl AsRef<std::path::Path>) -> Result<Config, crate::Error> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(text) => toml::from_str(&text).map_err(|e| crate::Error::Config(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(crate::Error::Io(e)),
        }
    }

    /// A TLS listener is only meaningful once certificate material is
    /// configured; STARTTLS/implicit-TLS listeners are skipped otherwise.
    pub fn has_tls(&self) -> bool {
        self.tls.is_some()
    }
}
