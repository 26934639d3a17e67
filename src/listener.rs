/*
 * listener.rs
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

//! Accept loops: one SMTP listener, and two IMAP listeners (cleartext +
//! STARTTLS, and implicit TLS). Every accepted connection is handed off to
//! an independent task; the loop itself never blocks on a session.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::imap::ImapServer;
use crate::smtp::server::SmtpServer;

/// Accept in a loop until the listener itself errors out (e.g. the
/// underlying socket was closed); in-flight sessions are left to finish.
pub async fn run_smtp_listener(listener: TcpListener, server: Arc<SmtpServer>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "SMTP accept failed");
                continue;
            }
        };
        tracing::debug!(%peer, "accepted SMTP connection");
        let server = server.clone();
        tokio::spawn(async move {
            server.handle_connection(socket).await;
        });
    }
}

/// Cleartext-with-STARTTLS IMAP listener.
pub async fn run_imap_listener(listener: TcpListener, server: Arc<ImapServer>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "IMAP accept failed");
                continue;
            }
        };
        tracing::debug!(%peer, "accepted IMAP connection");
        let server = server.clone();
        tokio::spawn(async move {
            server.handle_starttls_connection(socket).await;
        });
    }
}

/// Implicit-TLS (IMAPS) listener: the handshake happens before the session
/// ever sees the connection.
pub async fn run_imaps_listener(listener: TcpListener, acceptor: TlsAcceptor, server: Arc<ImapServer>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "IMAPS accept failed");
                continue;
            }
        };
        tracing::debug!(%peer, "accepted IMAPS connection");
        let server = server.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            match acceptor.accept(socket).await {
                Ok(tls) => server.handle_implicit_tls_connection(tls).await,
                Err(e) => tracing::warn!(error = %e, "IMAPS handshake failed"),
            }
        });
    }
}
