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

//! SMTP: the inbound receiving/relaying server (`server`) and the outbound
//! delivery client (`client`), sharing a line-oriented CRLF wire helper and
//! the dot-stuffing state machine.

pub mod client;
pub mod dot_stuffer;
pub mod server;

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one CRLF-terminated line, decoded as UTF-8 (lossy) and trimmed of
/// surrounding whitespace. `buf` is reused as scratch space across calls.
pub(crate) async fn read_line<S>(stream: &mut S, buf: &mut Vec<u8>) -> io::Result<String>
where
    S: AsyncRead + Unpin,
{
    buf.clear();
    loop {
        let mut b = [0u8; 1];
        let n = stream.read(&mut b).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
        }
        if b[0] == b'\n' {
            break;
        }
        buf.push(b[0]);
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(String::from_utf8_lossy(buf).trim().to_string())
}

/// Read one CRLF-terminated line as raw bytes: only the trailing `\r` is
/// stripped, nothing is trimmed and no UTF-8 decoding happens. Used for
/// `DATA` body lines, which are an opaque octet stream rather than a
/// command to parse.
pub(crate) async fn read_line_bytes<S>(stream: &mut S, buf: &mut Vec<u8>) -> io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    buf.clear();
    loop {
        let mut b = [0u8; 1];
        let n = stream.read(&mut b).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
        }
        if b[0] == b'\n' {
            break;
        }
        buf.push(b[0]);
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(buf.clone())
}

/// Write `line` followed by CRLF, then flush.
pub(crate) async fn write_line<S>(stream: &mut S, line: &str) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await
}

/// Extract the address between the first `<` and the next `>` (SMTP
/// `MAIL FROM:<addr>` / `RCPT TO:<addr>` argument syntax).
pub(crate) fn extract_angle_address(arg: &str) -> Option<String> {
    let start = arg.find('<')?;
    let end = arg[start + 1..].find('>')? + start + 1;
    Some(arg[start + 1..end].to_string())
}
