//! Domain-scoped cookie jar fed from `Set-Cookie` and serialised back into
//! `Cookie` request headers.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use cookie::Cookie as RawCookie;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Stored without a leading dot; matches the domain and its subdomains.
    pub domain: String,
    pub path: String,
    pub expires: Option<DateTime<Utc>>,
}

impl Cookie {
    fn matches_host(&self, host: &str) -> bool {
        domain_matches(host, &self.domain)
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }
}

/// A parsed `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    /// Whole seconds; negative ages are reported as zero.
    pub max_age: Option<i64>,
    pub expires: Option<DateTime<Utc>>,
}

impl SetCookie {
    pub fn parse(header: &str) -> Option<Self> {
        let parsed = match RawCookie::parse(header) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(target: "webchannel::cookies", error = %err, "ignoring malformed set-cookie");
                return None;
            }
        };
        Some(SetCookie {
            name: parsed.name().to_string(),
            value: parsed.value().to_string(),
            domain: parsed
                .domain()
                .map(|domain| domain.trim_start_matches('.').to_ascii_lowercase())
                .filter(|domain| !domain.is_empty()),
            path: parsed.path().filter(|path| !path.is_empty()).map(str::to_string),
            max_age: parsed.max_age().map(|age| age.whole_seconds().max(0)),
            expires: parsed
                .expires_datetime()
                .and_then(|at| DateTime::<Utc>::from_timestamp(at.unix_timestamp(), at.nanosecond())),
        })
    }

    /// True when the server asked for the cookie to be removed.
    pub fn is_removal(&self, now: DateTime<Utc>) -> bool {
        match self.max_age {
            Some(age) => age <= 0,
            None => self.expires.is_some_and(|expires| expires <= now),
        }
    }

    /// Absolute expiry relative to `now`. An age past the calendar range
    /// leaves the cookie without an expiry.
    pub fn expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.max_age {
            Some(age) => TimeDelta::try_seconds(age).and_then(|age| now.checked_add_signed(age)),
            None => self.expires,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: BTreeMap<(String, String), Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Imports a browser-style `a=b; c=d` header for `domain`.
    pub fn from_cookie_header(header: &str, domain: &str) -> Self {
        let mut jar = Self::new();
        for pair in RawCookie::split_parse(header).flatten() {
            jar.set(domain, pair.name(), pair.value_trimmed());
        }
        jar
    }

    pub fn from_pairs<I, K, V>(pairs: I, domain: &str) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut jar = Self::new();
        for (name, value) in pairs {
            jar.set(domain, name, value);
        }
        jar
    }

    pub fn set(&mut self, domain: &str, name: impl Into<String>, value: impl Into<String>) {
        let domain = domain.trim_start_matches('.').to_ascii_lowercase();
        let name = name.into();
        self.cookies.insert(
            (domain.clone(), name.clone()),
            Cookie {
                name,
                value: value.into(),
                domain,
                path: "/".to_string(),
                expires: None,
            },
        );
    }

    /// First value stored under `name`, regardless of domain.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .values()
            .find(|cookie| cookie.name == name)
            .map(|cookie| cookie.value.as_str())
    }

    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.cookies.len();
        self.cookies.retain(|_, cookie| cookie.name != name);
        before - self.cookies.len()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.values()
    }

    /// `Cookie` header value for a request to `host`, skipping expired entries.
    pub fn header_for(&self, host: &str, now: DateTime<Utc>) -> Option<String> {
        let host = host.to_ascii_lowercase();
        let pairs: Vec<String> = self
            .cookies
            .values()
            .filter(|cookie| cookie.matches_host(&host) && !cookie.is_expired(now))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    /// Applies `Set-Cookie` headers received from `request_host`. Returns the
    /// number of cookies stored or evicted.
    pub fn apply_set_cookies<'a, I>(&mut self, request_host: &str, headers: I, now: DateTime<Utc>) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let request_host = request_host.to_ascii_lowercase();
        let mut changed = 0;
        for header in headers {
            let Some(parsed) = SetCookie::parse(header) else {
                continue;
            };
            let domain = match parsed.domain.clone() {
                Some(domain) if domain_matches(&request_host, &domain) => domain,
                Some(_) => continue,
                None => request_host.clone(),
            };
            let key = (domain.clone(), parsed.name.clone());
            if parsed.is_removal(now) {
                if self.cookies.remove(&key).is_some() {
                    changed += 1;
                }
                continue;
            }
            let expires = parsed.expiry(now);
            self.cookies.insert(
                key,
                Cookie {
                    name: parsed.name,
                    value: parsed.value,
                    domain,
                    path: parsed.path.unwrap_or_else(|| "/".to_string()),
                    expires,
                },
            );
            changed += 1;
        }
        self.cookies.retain(|_, cookie| !cookie.is_expired(now));
        changed
    }
}

pub(crate) fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.');
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
