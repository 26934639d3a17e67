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

//! IMAP access server: one session per accepted connection, on either the
//! cleartext-with-STARTTLS listener or the implicit-TLS listener. Commands:
//! `CAPABILITY, STARTTLS, LOGIN, LIST, SELECT, UID SEARCH, UID FETCH, LOGOUT`.
//!
//! `UID SEARCH`/`UID FETCH` reply with positional `1..N` numbering rather
//! than the store's own UIDs — a divergence from RFC3501 kept intentionally
//! (see DESIGN.md).

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::auth::AuthProvider;
use crate::smtp::{read_line, write_line};
use crate::store::MailboxStore;

struct Session {
    tls: bool,
    authenticated: bool,
    user: Option<String>,
}

enum Action {
    Continue,
    Quit,
    DoStartTls,
}

enum LoopOutcome {
    Closed,
    Upgrade,
}

pub struct ImapServer {
    hostname: String,
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn MailboxStore>,
    tls_acceptor: Option<TlsAcceptor>,
}

impl ImapServer {
    pub fn new(
        hostname: impl Into<String>,
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn MailboxStore>,
        tls_acceptor: Option<TlsAcceptor>,
    ) -> Self {
        ImapServer {
            hostname: hostname.into(),
            auth,
            store,
            tls_acceptor,
        }
    }

    /// Handle a connection accepted on the cleartext-with-STARTTLS listener.
    pub async fn handle_starttls_connection(&self, mut tcp: TcpStream) {
        let mut session = Session {
            tls: false,
            authenticated: false,
            user: None,
        };
        let mut buf = Vec::with_capacity(512);

        if write_line(&mut tcp, &format!("* OK [{}] IMAP4rev1 Ready", self.hostname))
            .await
            .is_err()
        {
            return;
        }

        match self.run_loop(&mut tcp, &mut buf, &mut session).await {
            Ok(LoopOutcome::Closed) | Err(_) => return,
            Ok(LoopOutcome::Upgrade) => {}
        }

        let Some(acceptor) = self.tls_acceptor.clone() else {
            return;
        };
        let mut tls = match acceptor.accept(tcp).await {
            Ok(tls) => tls,
            Err(e) => {
                tracing::warn!(error = %e, "IMAP STARTTLS handshake failed");
                return;
            }
        };
        session.tls = true;
        let _ = self.run_loop(&mut tls, &mut buf, &mut session).await;
    }

    /// Handle a connection accepted on the implicit-TLS (IMAPS) listener;
    /// the handshake has already completed by the time this is called.
    pub async fn handle_implicit_tls_connection(&self, mut tls: TlsStream<TcpStream>) {
        let mut session = Session {
            tls: true,
            authenticated: false,
            user: None,
        };
        let mut buf = Vec::with_capacity(512);

        if write_line(&mut tls, &format!("* OK [{}] IMAP4rev1 Ready", self.hostname))
            .await
            .is_err()
        {
            return;
        }

        let _ = self.run_loop(&mut tls, &mut buf, &mut session).await;
    }

    async fn run_loop<S>(&self, stream: &mut S, buf: &mut Vec<u8>, session: &mut Session) -> io::Result<LoopOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let line = read_line(stream, buf).await?;
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, ' ');
            let tag = parts.next().unwrap_or("").to_string();
            let rest = parts.next().unwrap_or("").trim().to_string();

            match self.dispatch(stream, session, &tag, &rest).await? {
                Action::Continue => continue,
                Action::Quit => return Ok(LoopOutcome::Closed),
                Action::DoStartTls => return Ok(LoopOutcome::Upgrade),
            }
        }
    }

    async fn dispatch<S>(&self, stream: &mut S, session: &mut Session, tag: &str, rest: &str) -> io::Result<Action>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let upper = rest.to_ascii_uppercase();

        if upper == "CAPABILITY" {
            write_line(stream, "* CAPABILITY IMAP4rev1 UIDPLUS STARTTLS").await?;
            write_line(stream, &format!("{} OK CAPABILITY completed", tag)).await?;
        } else if upper == "STARTTLS" {
            if session.tls {
                write_line(stream, &format!("{} BAD Unsupported command", tag)).await?;
            } else if self.tls_acceptor.is_some() {
                write_line(stream, &format!("{} OK Begin TLS negotiation", tag)).await?;
                return Ok(Action::DoStartTls);
            } else {
                write_line(stream, &format!("{} NO TLS not available", tag)).await?;
            }
        } else if upper.starts_with("LOGIN ") {
            self.handle_login(stream, session, tag, &rest["LOGIN ".len()..]).await?;
        } else if upper.starts_with("LIST") {
            write_line(stream, "* LIST (\\HasNoChildren) \"/\" INBOX").await?;
            write_line(stream, &format!("{} OK LIST completed", tag)).await?;
        } else if upper.starts_with("SELECT") {
            if !self.require_auth(stream, session, tag).await? {
                return Ok(Action::Continue);
            }
            self.handle_select(stream, session, tag).await?;
        } else if upper.starts_with("UID SEARCH") {
            if !self.require_auth(stream, session, tag).await? {
                return Ok(Action::Continue);
            }
            self.handle_uid_search(stream, session, tag).await?;
        } else if upper.starts_with("UID FETCH") {
            if !self.require_auth(stream, session, tag).await? {
                return Ok(Action::Continue);
            }
            self.handle_uid_fetch(stream, session, tag).await?;
        } else if upper == "LOGOUT" {
            write_line(stream, "* BYE Logging out").await?;
            write_line(stream, &format!("{} OK LOGOUT completed", tag)).await?;
            return Ok(Action::Quit);
        } else {
            write_line(stream, &format!("{} BAD Unsupported command", tag)).await?;
        }

        Ok(Action::Continue)
    }

    /// Returns `true` if authenticated, otherwise replies `NO` and `false`.
    async fn require_auth<S>(&self, stream: &mut S, session: &Session, tag: &str) -> io::Result<bool>
    where
        S: AsyncWrite + Unpin,
    {
        if session.authenticated {
            Ok(true)
        } else {
            write_line(
                stream,
                &format!("{} NO AUTHENTICATIONFAILED Authentication required", tag),
            )
            .await?;
            Ok(false)
        }
    }

    async fn handle_login<S>(&self, stream: &mut S, session: &mut Session, tag: &str, creds: &str) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        if !session.tls {
            write_line(stream, &format!("{} NO STARTTLS required before login", tag)).await?;
            return Ok(());
        }
        let mut args = creds.splitn(2, ' ');
        let user = args.next().unwrap_or("").trim_matches('"');
        let pass = args.next().unwrap_or("").trim().trim_matches('"');
        if self.auth.validate(user, pass).await {
            session.authenticated = true;
            session.user = Some(user.to_string());
            write_line(stream, &format!("{} OK LOGIN completed", tag)).await?;
        } else {
            write_line(stream, &format!("{} NO LOGIN failed", tag)).await?;
        }
        Ok(())
    }

    async fn handle_select<S>(&self, stream: &mut S, session: &Session, tag: &str) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let user = session.user.as_deref().unwrap_or("");
        let count = self.store.count_uids(user).await;
        write_line(stream, &format!("* {} EXISTS", count)).await?;
        write_line(stream, "* FLAGS (\\Seen)").await?;
        write_line(stream, &format!("{} OK [READ-WRITE] SELECT completed", tag)).await?;
        Ok(())
    }

    async fn handle_uid_search<S>(&self, stream: &mut S, session: &Session, tag: &str) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let user = session.user.as_deref().unwrap_or("");
        let uids = self.store.list_uids(user).await;
        let positions: Vec<String> = (1..=uids.len()).map(|i| i.to_string()).collect();
        write_line(stream, &format!("* SEARCH {}", positions.join(" "))).await?;
        write_line(stream, &format!("{} OK SEARCH completed", tag)).await?;
        Ok(())
    }

    async fn handle_uid_fetch<S>(&self, stream: &mut S, session: &Session, tag: &str) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let user = session.user.as_deref().unwrap_or("");
        let uids = self.store.list_uids(user).await;
        for (i, uid) in uids.iter().enumerate() {
            let position = i + 1;
            if let Some(body) = self.store.get_message(user, uid).await {
                write_line(
                    stream,
                    &format!("* {} FETCH (UID {} RFC822 {{{}}}", position, position, body.len()),
                )
                .await?;
                stream.write_all(&body).await?;
                write_line(stream, ")").await?;
            }
        }
        write_line(stream, &format!("{} OK FETCH completed", tag)).await?;
        Ok(())
    }
}
