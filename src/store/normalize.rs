/*
 * normalize.rs
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

//! Address-to-directory normalization for the filesystem store.
//!
//! Diacritics stripped, lowercased, trimmed; dots removed from the
//! local-part; anything from `+` onward in the local-part discarded; any
//! remaining non-word character replaced with `_`; domain lowercased,
//! non-word (except `.`) replaced with `_`, leading dots trimmed. Lossy
//! and deterministic: two addresses that collide here share a directory.

/// Strip a handful of common Latin diacritics down to their base letter.
/// Best-effort, not a full Unicode decomposition: covers the accented
/// letters likely to show up in a mailbox local-part.
fn strip_diacritic(c: char) -> char {
    match c {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => {
            if c.is_uppercase() {
                'A'
            } else {
                'a'
            }
        }
        'Ç' | 'ç' => {
            if c.is_uppercase() {
                'C'
            } else {
                'c'
            }
        }
        'È' | 'É' | 'Ê' | 'Ë' | 'è' | 'é' | 'ê' | 'ë' => {
            if c.is_uppercase() {
                'E'
            } else {
                'e'
            }
        }
        'Ì' | 'Í' | 'Î' | 'Ï' | 'ì' | 'í' | 'î' | 'ï' => {
            if c.is_uppercase() {
                'I'
            } else {
                'i'
            }
        }
        'Ñ' | 'ñ' => {
            if c.is_uppercase() {
                'N'
            } else {
                'n'
            }
        }
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'ò' | 'ó' | 'ô' | 'õ' | 'ö' => {
            if c.is_uppercase() {
                'O'
            } else {
                'o'
            }
        }
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'ù' | 'ú' | 'û' | 'ü' => {
            if c.is_uppercase() {
                'U'
            } else {
                'u'
            }
        }
        'Ý' | 'ý' | 'ÿ' => {
            if c.is_uppercase() {
                'Y'
            } else {
                'y'
            }
        }
        other => other,
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn normalize_local_part(local: &str) -> String {
    let local = local.trim();
    let local = match local.find('+') {
        Some(idx) => &local[..idx],
        None => local,
    };
    local
        .chars()
        .map(strip_diacritic)
        .filter(|c| *c != '.')
        .map(|c| c.to_ascii_lowercase())
        .map(|c| if is_word_char(c) { c } else { '_' })
        .collect()
}

fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim();
    let lowered: String = domain
        .chars()
        .map(strip_diacritic)
        .map(|c| c.to_ascii_lowercase())
        .map(|c| if is_word_char(c) || c == '.' { c } else { '_' })
        .collect();
    lowered.trim_start_matches('.').to_string()
}

/// Split `addr` into normalized `(user, domain)` directory components.
/// `domain` is empty if `addr` has no `@`.
pub fn mailbox_key(addr: &str) -> (String, String) {
    let addr = addr.trim();
    match addr.split_once('@') {
        Some((local, domain)) => (normalize_local_part(local), normalize_domain(domain)),
        None => (normalize_local_part(addr), String::new()),
    }
}
