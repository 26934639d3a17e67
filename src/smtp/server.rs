/*
 * server.rs
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

//! Inbound SMTP: one session per accepted connection, mirroring the
//! receive/relay dispatch table (EHLO, STARTTLS, AUTH, MAIL FROM, RCPT TO,
//! DATA) plus the anti-relay check performed once a message body is in.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use crate::auth::AuthProvider;
use crate::store::MailboxStore;

use super::client::DeliveryClient;
use super::{extract_angle_address, read_line, read_line_bytes, write_line};

enum AuthState {
    None,
    AwaitingUsername,
    AwaitingPassword(String),
}

struct Session {
    tls: bool,
    authenticated: bool,
    auth_user: Option<String>,
    mail_from: Option<String>,
    mail_from_local_account: Option<bool>,
    rcpt: Vec<String>,
    data: Vec<u8>,
    in_data: bool,
    auth_state: AuthState,
}

impl Session {
    fn new(tls: bool) -> Self {
        Session {
            tls,
            authenticated: false,
            auth_user: None,
            mail_from: None,
            mail_from_local_account: None,
            rcpt: Vec::new(),
            data: Vec::new(),
            in_data: false,
            auth_state: AuthState::None,
        }
    }
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

/// The receiving/relaying SMTP server: one instance shared by every
/// accepted connection.
pub struct SmtpServer {
    hostname: String,
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn MailboxStore>,
    delivery: Arc<DeliveryClient>,
    tls_acceptor: Option<TlsAcceptor>,
}

impl SmtpServer {
    pub fn new(
        hostname: impl Into<String>,
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn MailboxStore>,
        delivery: Arc<DeliveryClient>,
        tls_acceptor: Option<TlsAcceptor>,
    ) -> Self {
        SmtpServer {
            hostname: hostname.into(),
            auth,
            store,
            delivery,
            tls_acceptor,
        }
    }

    /// Drive one accepted connection to completion.
    pub async fn handle_connection(&self, mut tcp: TcpStream) {
        let mut session = Session::new(false);
        let mut buf = Vec::with_capacity(512);

        if write_line(&mut tcp, &format!("220 {} ESMTP Ready", self.hostname))
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
                tracing::warn!(error = %e, "SMTP STARTTLS handshake failed");
                return;
            }
        };
        session.tls = true;
        let _ = self.run_loop(&mut tls, &mut buf, &mut session).await;
    }

    async fn run_loop<S>(&self, stream: &mut S, buf: &mut Vec<u8>, session: &mut Session) -> io::Result<LoopOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            if session.in_data {
                let raw = read_line_bytes(stream, buf).await?;
                if raw == [b'.'] {
                    session.in_data = false;
                    self.finish_data(session).await;
                    write_line(stream, "250 OK").await?;
                } else {
                    session.data.extend_from_slice(&raw);
                    session.data.push(b'\n');
                }
                continue;
            }

            let line = read_line(stream, buf).await?;
            match self.dispatch(stream, session, &line).await? {
                Action::Continue => continue,
                Action::Quit => return Ok(LoopOutcome::Closed),
                Action::DoStartTls => return Ok(LoopOutcome::Upgrade),
            }
        }
    }

    async fn dispatch<S>(&self, stream: &mut S, session: &mut Session, line: &str) -> io::Result<Action>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match std::mem::replace(&mut session.auth_state, AuthState::None) {
            AuthState::AwaitingUsername => {
                return self.continue_auth_login_username(stream, session, line).await;
            }
            AuthState::AwaitingPassword(user) => {
                return self.continue_auth_login_password(stream, session, user, line).await;
            }
            AuthState::None => {}
        }

        let upper = line.to_ascii_uppercase();

        if upper.starts_with("EHLO") || upper.starts_with("HELO") {
            write_line(stream, &format!("250-{}", self.hostname)).await?;
            if !session.tls {
                write_line(stream, "250-STARTTLS").await?;
            }
            write_line(stream, "250-AUTH LOGIN PLAIN").await?;
            write_line(stream, "250 OK").await?;
        } else if upper == "STARTTLS" {
            if session.tls {
                write_line(stream, "503 TLS already active").await?;
            } else if self.tls_acceptor.is_some() {
                write_line(stream, "220 Ready to start TLS").await?;
                return Ok(Action::DoStartTls);
            } else {
                write_line(stream, "454 TLS not available").await?;
            }
        } else if upper == "QUIT" {
            write_line(stream, "221 Bye").await?;
            return Ok(Action::Quit);
        } else if upper == "AUTH LOGIN" {
            if !session.tls {
                write_line(stream, "538 Encryption required").await?;
            } else {
                session.auth_state = AuthState::AwaitingUsername;
                write_line(stream, "334 VXNlcm5hbWU6").await?;
            }
        } else if upper.starts_with("AUTH PLAIN") {
            if !session.tls {
                write_line(stream, "538 Encryption required").await?;
            } else {
                let payload = line.splitn(3, ' ').nth(2).unwrap_or("");
                self.authenticate_plain(stream, session, payload).await?;
            }
        } else if let Some(rest) = strip_ci_prefix(line, "MAIL FROM:") {
            let addr = extract_angle_address(rest).unwrap_or_default();
            let is_local = self.auth.has_user(&addr).await;
            if is_local && !session.authenticated {
                write_line(stream, "530 Authentication required").await?;
            } else {
                session.mail_from = Some(addr);
                session.mail_from_local_account = Some(is_local);
                write_line(stream, "250 OK").await?;
            }
        } else if let Some(rest) = strip_ci_prefix(line, "RCPT TO:") {
            let addr = extract_angle_address(rest).unwrap_or_default();
            if self.auth.has_user(&addr).await {
                session.rcpt.push(addr);
                write_line(stream, "250 OK").await?;
            } else {
                let mail_from_local = session.mail_from_local_account.unwrap_or(false);
                if !session.authenticated || !mail_from_local {
                    write_line(stream, "530 Authentication required").await?;
                } else {
                    session.rcpt.push(addr);
                    write_line(stream, "550 5.1.1 User unknown").await?;
                }
            }
        } else if upper == "DATA" {
            write_line(stream, "354 End with <CRLF>.<CRLF>").await?;
            session.in_data = true;
        } else {
            write_line(stream, "502 Not implemented").await?;
        }

        Ok(Action::Continue)
    }

    async fn continue_auth_login_username<S>(
        &self,
        stream: &mut S,
        session: &mut Session,
        line: &str,
    ) -> io::Result<Action>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let user = decode_base64_utf8(line);
        match user {
            Some(user) if self.auth.has_user(&user).await => {
                session.auth_state = AuthState::AwaitingPassword(user);
                write_line(stream, "334 UGFzc3dvcmQ6").await?;
            }
            _ => {
                write_line(stream, "535 Auth failed").await?;
            }
        }
        Ok(Action::Continue)
    }

    async fn continue_auth_login_password<S>(
        &self,
        stream: &mut S,
        session: &mut Session,
        user: String,
        line: &str,
    ) -> io::Result<Action>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let pass = decode_base64_utf8(line).unwrap_or_default();
        if self.auth.validate(&user, &pass).await {
            session.authenticated = true;
            session.auth_user = Some(user);
            write_line(stream, "235 Auth OK").await?;
        } else {
            write_line(stream, "535 Auth failed").await?;
        }
        Ok(Action::Continue)
    }

    async fn authenticate_plain<S>(&self, stream: &mut S, session: &mut Session, b64: &str) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let decoded = BASE64.decode(b64.trim()).ok();
        let parts = decoded.as_deref().map(|d| {
            let mut it = d.split(|&b| b == 0);
            let _authz = it.next().unwrap_or(&[]);
            let user = it.next().unwrap_or(&[]);
            let pass = it.next().unwrap_or(&[]);
            (
                String::from_utf8_lossy(user).into_owned(),
                String::from_utf8_lossy(pass).into_owned(),
            )
        });
        match parts {
            Some((user, pass)) if self.auth.validate(&user, &pass).await => {
                session.authenticated = true;
                session.auth_user = Some(user);
                write_line(stream, "235 Auth OK").await?;
            }
            _ => {
                write_line(stream, "535 Auth failed").await?;
            }
        }
        Ok(())
    }

    /// `onReceiveEmail`: anti-relay check, local store, and relay of any
    /// authenticated-local-sender's external recipients.
    async fn finish_data(&self, session: &mut Session) {
        let from = session.mail_from.clone().unwrap_or_default();
        let rcpt = session.rcpt.clone();
        let body = std::mem::take(&mut session.data);

        let from_local = self.auth.has_user(&from).await;
        let local_recipients = self.auth.existing_users(&rcpt).await;
        let authenticated_as_sender =
            session.authenticated && session.auth_user.as_deref() == Some(from.as_str());

        let relay_disallowed = from_local && local_recipients.is_empty() && !authenticated_as_sender;
        if relay_disallowed {
            session.mail_from = None;
            session.mail_from_local_account = None;
            session.rcpt.clear();
            return;
        }

        if !local_recipients.is_empty() {
            if let Err(e) = self.store.store(self.auth.as_ref(), &from, &rcpt, &body).await {
                tracing::warn!(error = %e, "mailbox store append failed");
            }
        }

        if from_local && authenticated_as_sender && local_recipients.len() < rcpt.len() {
            let mut by_domain: HashMap<String, Vec<String>> = HashMap::new();
            for addr in &rcpt {
                if local_recipients.contains(addr) {
                    continue;
                }
                if let Some((_, domain)) = addr.split_once('@') {
                    by_domain.entry(domain.to_string()).or_default().push(addr.clone());
                }
            }
            for (domain, addrs) in by_domain {
                let locals_again = self.auth.existing_users(&addrs).await;
                let externals: Vec<String> =
                    addrs.into_iter().filter(|a| !locals_again.contains(a)).collect();
                if !externals.is_empty() {
                    self.delivery.send_email(&domain, &from, &externals, &body).await;
                }
            }
        }

        session.mail_from = None;
        session.mail_from_local_account = None;
        session.rcpt.clear();
    }
}

fn decode_base64_utf8(line: &str) -> Option<String> {
    let bytes = BASE64.decode(line.trim()).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn strip_ci_prefix<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() < prefix.len() {
        return None;
    }
    if line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}
