//! Netscape `cookies.txt` parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// One browser cookie.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// `None` for session cookies.
    pub expires: Option<DateTime<Utc>>,
    pub name: String,
    pub value: String,
}

impl Cookie {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    /// Whether this cookie would be sent to `host`.
    #[must_use]
    pub fn matches_domain(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.');
        host == domain || host.ends_with(&format!(".{domain}"))
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("name", &self.name)
            .field("expires", &self.expires)
            .finish_non_exhaustive()
    }
}

/// Parses the Netscape cookie file format exported by browser extensions.
///
/// Each cookie line has seven tab-separated fields: domain, subdomain flag,
/// path, secure flag, expiry (unix seconds, `0` for session cookies), name
/// and value. Blank lines and comments are skipped, except the
/// `#HttpOnly_` prefix which marks an HTTP-only cookie.
#[must_use]
pub fn parse_netscape(text: &str) -> Vec<Cookie> {
    text.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<Cookie> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    let (line, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
        Some(rest) => (rest, true),
        None if line.starts_with('#') => return None,
        None => (line, false),
    };

    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 7 {
        return None;
    }

    let name = fields[5].trim();
    if name.is_empty() {
        return None;
    }

    let expires = fields[4]
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|secs| *secs > 0)
        .and_then(|secs| DateTime::from_timestamp(secs, 0));

    Some(Cookie {
        domain: fields[0].trim().to_string(),
        include_subdomains: fields[1].trim().eq_ignore_ascii_case("TRUE"),
        path: fields[2].trim().to_string(),
        secure: fields[3].trim().eq_ignore_ascii_case("TRUE"),
        http_only,
        expires,
        name: name.to_string(),
        value: fields[6..].join("\t"),
    })
}
