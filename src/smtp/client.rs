/*
 * client.rs
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

//! Outbound delivery: one attempt, one remote MX, accept/reject collapsed
//! to a bool. Opportunistic STARTTLS, any certificate accepted.

use std::io;
use std::sync::Arc;

use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::DeliveryConfig;
use crate::mx::MxResolver;
use crate::net::PlainStream;

use super::dot_stuffer::DotStuffer;
use super::{read_line, write_line};

/// A parsed SMTP reply: the 3-digit code plus the text of its final line.
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn is(&self, code: u16) -> bool {
        self.code == code
    }
}

async fn read_reply<S>(stream: &mut S, buf: &mut Vec<u8>) -> io::Result<Reply>
where
    S: AsyncRead + Unpin,
{
    loop {
        let line = read_line(stream, buf).await?;
        if line.len() < 4 {
            continue;
        }
        let code: u16 = line[..3].parse().unwrap_or(0);
        let continuation = line.as_bytes().get(3) == Some(&b'-');
        if !continuation {
            let text = line.get(4..).unwrap_or("").to_string();
            return Ok(Reply { code, text });
        }
    }
}

/// Drives `AFTER_MAIL` through `CLOSING` on an already-negotiated stream.
/// Shared between the plain and TLS paths since it only needs `AsyncRead +
/// AsyncWrite`, matching the state table's behaviour once EHLO is settled.
async fn send_transaction<S>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    from: &str,
    recipients: &[String],
    body: &[u8],
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if write_line(stream, &format!("MAIL FROM:<{}>", from)).await.is_err() {
        return false;
    }
    let reply = match read_reply(stream, buf).await {
        Ok(r) => r,
        Err(_) => return false,
    };
    if !reply.is(250) {
        return false;
    }

    for rcpt in recipients {
        if write_line(stream, &format!("RCPT TO:<{}>", rcpt)).await.is_err() {
            return false;
        }
        let reply = match read_reply(stream, buf).await {
            Ok(r) => r,
            Err(_) => return false,
        };
        if !reply.is(250) {
            return false;
        }
    }

    if write_line(stream, "DATA").await.is_err() {
        return false;
    }
    let reply = match read_reply(stream, buf).await {
        Ok(r) => r,
        Err(_) => return false,
    };
    if !reply.is(354) {
        return false;
    }

    // LF -> CRLF normalization, then dot-stuffing, then the bare-dot terminator.
    let mut normalized = Vec::with_capacity(body.len());
    for &b in body {
        if b == b'\n' && normalized.last() != Some(&b'\r') {
            normalized.push(b'\r');
        }
        normalized.push(b);
    }
    let mut wire = Vec::with_capacity(normalized.len() + 8);
    let mut stuffer = DotStuffer::new();
    stuffer.process_chunk(&normalized, |s| wire.extend_from_slice(s));
    stuffer.end_message(|s| wire.extend_from_slice(s));
    if stream.write_all(&wire).await.is_err() || stream.flush().await.is_err() {
        return false;
    }

    let reply = match read_reply(stream, buf).await {
        Ok(r) => r,
        Err(_) => return false,
    };
    if !reply.is(250) {
        return false;
    }

    let _ = write_line(stream, "QUIT").await;
    let Ok(reply) = read_reply(stream, buf).await else {
        return false;
    };
    reply.is(221)
}

/// `250-`/`250 ` EHLO capability lines: does the final one advertise STARTTLS?
fn caps_have_starttls(caps: &[String]) -> bool {
    caps.iter().any(|c| c.eq_ignore_ascii_case("STARTTLS"))
}

async fn ehlo<S>(stream: &mut S, buf: &mut Vec<u8>, own_hostname: &str) -> io::Result<(bool, Vec<String>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_line(stream, &format!("EHLO {}", own_hostname)).await?;
    let mut caps = Vec::new();
    loop {
        let line = read_line(stream, buf).await?;
        if line.len() < 4 {
            continue;
        }
        let continuation = line.as_bytes().get(3) == Some(&b'-');
        let text = line.get(4..).unwrap_or("").to_string();
        if !text.is_empty() {
            caps.push(text);
        }
        if !continuation {
            break;
        }
    }
    let starttls = caps_have_starttls(&caps);
    Ok((starttls, caps))
}

/// Runs the full state machine (`GREET` through `CLOSING`) over a plain
/// socket, performing the `STARTTLS`/re-`EHLO` upgrade in place when the
/// remote advertises it and `use_tls` allows it.
async fn run(
    mut plain: PlainStream,
    peer_host: &str,
    own_hostname: &str,
    use_tls: bool,
    from: &str,
    recipients: &[String],
    body: &[u8],
) -> bool {
    let mut buf = Vec::with_capacity(512);

    let greet = match read_reply(&mut plain, &mut buf).await {
        Ok(r) => r,
        Err(_) => return false,
    };
    if !greet.is(220) {
        return false;
    }

    let (starttls, _caps) = match ehlo(&mut plain, &mut buf, own_hostname).await {
        Ok(v) => v,
        Err(_) => return false,
    };

    if starttls && use_tls {
        if write_line(&mut plain, "STARTTLS").await.is_err() {
            return false;
        }
        let reply = match read_reply(&mut plain, &mut buf).await {
            Ok(r) => r,
            Err(_) => return false,
        };
        if !reply.is(220) {
            return false;
        }
        let mut tls = match plain.upgrade_to_tls(peer_host).await {
            Ok(t) => t,
            Err(_) => return false,
        };
        // Capabilities from before the upgrade are discarded; re-EHLO.
        if ehlo(&mut tls, &mut buf, own_hostname).await.is_err() {
            return false;
        }
        return send_transaction(&mut tls, &mut buf, from, recipients, body).await;
    }

    send_transaction(&mut plain, &mut buf, from, recipients, body).await
}

/// Outbound SMTP delivery client (one collaborator, shared by the SMTP
/// server's relay path).
pub struct DeliveryClient {
    resolver: Arc<dyn MxResolver>,
    config: DeliveryConfig,
}

impl DeliveryClient {
    pub fn new(resolver: Arc<dyn MxResolver>, config: DeliveryConfig) -> Self {
        DeliveryClient { resolver, config }
    }

    /// Resolve MX for `domain`, dial the lowest-preference record (ties
    /// broken uniformly at random), and attempt delivery. Returns whether
    /// the remote accepted the message.
    pub async fn send_email(&self, domain: &str, from: &str, recipients: &[String], body: &[u8]) -> bool {
        if recipients.is_empty() {
            return false;
        }

        let mut records = self.resolver.resolve_mx(domain).await;
        if records.is_empty() {
            tracing::warn!(domain, "no MX records, cannot deliver");
            return false;
        }
        records.sort_by_key(|r| r.preference);
        let min_pref = records[0].preference;
        let candidates: Vec<_> = records.iter().filter(|r| r.preference == min_pref).collect();
        let chosen = if candidates.len() == 1 {
            candidates[0]
        } else {
            candidates[rand::thread_rng().gen_range(0..candidates.len())]
        };

        let tcp = match tokio::time::timeout(
            self.config.connect_timeout(),
            TcpStream::connect((chosen.address, self.config.mx_server_port)),
        )
        .await
        {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(e)) => {
                tracing::warn!(domain, error = %e, "connect to MX failed");
                return false;
            }
            Err(_) => {
                tracing::warn!(domain, "connect to MX timed out");
                return false;
            }
        };

        let peer_host = chosen.address.to_string();
        run(
            PlainStream::from_tcp(tcp),
            &peer_host,
            &self.config.hostname,
            self.config.use_tls,
            from,
            recipients,
            body,
        )
        .await
    }
}
