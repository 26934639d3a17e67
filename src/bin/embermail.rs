/*
 * embermail.rs
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

//! Thin entry point: load configuration, wire up the collaborators, spawn
//! the accept loops, and wait for a shutdown signal.

use std::sync::Arc;

use embermail::auth::StaticAuthProvider;
use embermail::config::{Config, StorageConfig};
use embermail::imap::ImapServer;
use embermail::mx::ChainResolver;
use embermail::net::server_tls_acceptor;
use embermail::smtp::client::DeliveryClient;
use embermail::smtp::server::SmtpServer;
use embermail::store::filesystem::FilesystemStore;
use embermail::store::memory::MemoryStore;
use embermail::store::MailboxStore;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "embermail.toml".to_string());
    let config = match Config::load(&config_path).await {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, path = %config_path, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let auth: Arc<dyn embermail::auth::AuthProvider> =
        Arc::new(StaticAuthProvider::new(config.users.clone()));

    let store: Arc<dyn MailboxStore> = match &config.storage {
        StorageConfig::Memory => Arc::new(MemoryStore::new()),
        StorageConfig::Filesystem { root } => Arc::new(FilesystemStore::new(root.clone())),
    };

    let resolver = Arc::new(ChainResolver::new(config.delivery.doh_upstream.clone()));
    let delivery = Arc::new(DeliveryClient::new(resolver, config.delivery.clone()));

    let tls_acceptor = if let Some(tls) = &config.tls {
        match server_tls_acceptor(&tls.cert_chain_path, &tls.private_key_path).await {
            Ok(acceptor) => Some(acceptor),
            Err(e) => {
                tracing::error!(error = %e, "failed to load TLS certificate material");
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let smtp_server = Arc::new(SmtpServer::new(
        config.smtp.hostname.clone(),
        auth.clone(),
        store.clone(),
        delivery,
        tls_acceptor.clone(),
    ));
    let imap_server = Arc::new(ImapServer::new(
        config.imap.hostname.clone(),
        auth.clone(),
        store.clone(),
        tls_acceptor.clone(),
    ));

    let smtp_listener = match TcpListener::bind(("0.0.0.0", config.smtp.port)).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, port = config.smtp.port, "failed to bind SMTP listener");
            std::process::exit(1);
        }
    };
    tracing::info!(port = config.smtp.port, "SMTP listener bound");
    tokio::spawn(embermail::listener::run_smtp_listener(smtp_listener, smtp_server));

    let imap_listener = match TcpListener::bind(("0.0.0.0", config.imap.imap_port)).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, port = config.imap.imap_port, "failed to bind IMAP listener");
            std::process::exit(1);
        }
    };
    tracing::info!(port = config.imap.imap_port, "IMAP listener bound");
    tokio::spawn(embermail::listener::run_imap_listener(imap_listener, imap_server.clone()));

    if let Some(acceptor) = tls_acceptor {
        let imaps_listener = match TcpListener::bind(("0.0.0.0", config.imap.imaps_port)).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, port = config.imap.imaps_port, "failed to bind IMAPS listener");
                std::process::exit(1);
            }
        };
        tracing::info!(port = config.imap.imaps_port, "IMAPS listener bound");
        tokio::spawn(embermail::listener::run_imaps_listener(
            imaps_listener,
            acceptor,
            imap_server,
        ));
    } else {
        tracing::warn!("no TLS configured: IMAPS listener not started, STARTTLS unavailable");
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received shutdown signal"),
        Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
    }
}
