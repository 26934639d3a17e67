/*
 * mx.rs
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

//! MX resolution: given a domain, return a preference-ordered list of
//! reachable addresses. Failure (of any kind) collapses to an empty list;
//! callers treat that as "undeliverable", never as a propagated error.

use std::net::IpAddr;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ResolveError;

/// One MX record: a resolved IP at a given preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MxRecord {
    pub preference: u16,
    pub address: IpAddr,
}

#[async_trait]
pub trait MxResolver: Send + Sync {
    /// Preference-ordered (ascending) MX records for `domain`.
    async fn resolve_mx(&self, domain: &str) -> Vec<MxRecord>;
}

/// DNS-over-HTTPS resolver using the JSON API (RFC 8427-style) served by
/// most public DoH providers (`Accept: application/dns-json`).
pub struct DohResolver {
    client: reqwest::Client,
    upstream: String,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    rtype: u16,
    data: String,
}

#[derive(Debug, Deserialize, Default)]
struct DohResponse {
    #[serde(default, rename = "Answer")]
    answer: Vec<DohAnswer>,
}

const RTYPE_A: u16 = 1;
const RTYPE_AAAA: u16 = 28;
const RTYPE_MX: u16 = 15;

impl DohResolver {
    pub fn new(upstream: impl Into<String>) -> Self {
        DohResolver {
            client: reqwest::Client::new(),
            upstream: upstream.into(),
        }
    }

    async fn query(&self, name: &str, rtype: &str) -> Result<DohResponse, ResolveError> {
        let resp = self
            .client
            .get(&self.upstream)
            .header("accept", "application/dns-json")
            .query(&[("name", name), ("type", rtype)])
            .send()
            .await
            .map_err(|e| ResolveError::Request(e.to_string()))?;
        resp.json::<DohResponse>()
            .await
            .map_err(|e| ResolveError::Malformed(e.to_string()))
    }

    /// Resolve A and AAAA records for `hostname` into a list of IPs.
    async fn resolve_host(&self, hostname: &str) -> Vec<IpAddr> {
        let mut out = Vec::new();
        for (rtype, rtype_code) in [("A", RTYPE_A), ("AAAA", RTYPE_AAAA)] {
            match self.query(hostname, rtype).await {
                Ok(resp) => {
                    for ans in resp.answer {
                        if ans.rtype != rtype_code {
                            continue;
                        }
                        if let Ok(ip) = ans.data.parse::<IpAddr>() {
                            out.push(ip);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(hostname, error = %e, "DoH {} lookup failed", rtype);
                }
            }
        }
        out
    }
}

#[async_trait]
impl MxResolver for DohResolver {
    async fn resolve_mx(&self, domain: &str) -> Vec<MxRecord> {
        let resp = match self.query(domain, "MX").await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(domain, error = %e, "MX lookup failed");
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for ans in resp.answer {
            if ans.rtype != RTYPE_MX {
                continue;
            }
            let mut parts = ans.data.split_whitespace();
            let (pref_tok, host_tok) = match (parts.next(), parts.next()) {
                (Some(p), Some(h)) => (p, h),
                _ => continue,
            };
            let preference: u16 = match pref_tok.parse() {
                Ok(p) => p,
                Err(_) => continue,
            };
            let host = host_tok.trim_end_matches('.');
            if host.is_empty() {
                continue;
            }
            for ip in self.resolve_host(host).await {
                records.push(MxRecord {
                    preference,
                    address: ip,
                });
            }
        }
        records.sort_by_key(|r| r.preference);
        records
    }
}

/// Fallback resolver: resolves A/AAAA of the domain itself, all at
/// preference 0. Used when no MX records exist or DoH is unavailable.
pub struct SimpleResolver;

#[async_trait]
impl MxResolver for SimpleResolver {
    async fn resolve_mx(&self, domain: &str) -> Vec<MxRecord> {
        let target = format!("{}:0", domain);
        match tokio::net::lookup_host(&target).await {
            Ok(addrs) => addrs
                .map(|a| MxRecord {
                    preference: 0,
                    address: a.ip(),
                })
                .collect(),
            Err(e) => {
                tracing::warn!(domain, error = %e, "fallback A/AAAA lookup failed");
                Vec::new()
            }
        }
    }
}

/// DoH first, falling back to resolving the domain's own A/AAAA records
/// when the DoH lookup yields nothing (no MX records, or DoH unreachable).
pub struct ChainResolver {
    primary: DohResolver,
    fallback: SimpleResolver,
}

impl ChainResolver {
    pub fn new(doh_upstream: impl Into<String>) -> Self {
        ChainResolver {
            primary: DohResolver::new(doh_upstream),
            fallback: SimpleResolver,
        }
    }
}

#[async_trait]
impl MxResolver for ChainResolver {
    async fn resolve_mx(&self, domain: &str) -> Vec<MxRecord> {
        let records = self.primary.resolve_mx(domain).await;
        if !records.is_empty() {
            return records;
        }
        self.fallback.resolve_mx(domain).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mx_records_sort_ascending_by_preference() {
        let mut records = vec![
            MxRecord {
                preference: 20,
                address: "127.0.0.1".parse().unwrap(),
            },
            MxRecord {
                preference: 10,
                address: "127.0.0.1".parse().unwrap(),
            },
        ];
        records.sort_by_key(|r| r.preference);
        assert_eq!(records.first().unwrap().preference, 10);
        assert_eq!(records.last().unwrap().preference, 20);
    }

    #[test]
    fn doh_answer_data_parses_preference_and_host() {
        let data = "10 mail.example.com.";
        let mut parts = data.split_whitespace();
        let preference: u16 = parts.next().unwrap().parse().unwrap();
        let host = parts.next().unwrap().trim_end_matches('.');
        assert_eq!(preference, 10);
        assert_eq!(host, "mail.example.com");
    }

    #[test]
    fn malformed_mx_data_is_skipped() {
        // Fewer than two whitespace-separated tokens.
        let data = "garbage";
        let mut parts = data.split_whitespace();
        let first = parts.next();
        let second = parts.next();
        assert!(first.is_some() && second.is_none());
    }
}
