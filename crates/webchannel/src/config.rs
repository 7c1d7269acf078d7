//! Constructor-injected configuration for the session, channel and client.

use std::time::Duration;

use reqwest::StatusCode;
use url::Url;

use crate::error::{Error, PermanentAuthKind, Result};
use crate::proto::ClientType;

pub const DEFAULT_BASE_URL: &str = "https://chat.google.com/";
pub const DEFAULT_ALLOWED_DOMAIN: &str = "google.com";

/// Browser versions advertised on every request; user agents are rewritten
/// to match so the client hints stay consistent.
pub const CHROME_VERSION: &str = "118";
pub const FIREFOX_VERSION: &str = "118";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36";

/// Shortest keep-alive period a channel will schedule.
pub const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

pub const ENV_BASE_URL: &str = "WEBCHANNEL_BASE_URL";
pub const ENV_PROXY: &str = "WEBCHANNEL_PROXY";
pub const ENV_USER_AGENT: &str = "WEBCHANNEL_USER_AGENT";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: Url,
    /// Requests to hosts outside this domain (and its subdomains) are refused.
    pub allowed_domain: String,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub retry_step: Duration,
    pub auth_rules: AuthErrorRules,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            allowed_domain: DEFAULT_ALLOWED_DOMAIN.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_step: Duration::from_secs(3),
            auth_rules: AuthErrorRules::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SessionConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = normalize_opt(lookup(ENV_BASE_URL)) {
            config.base_url = Url::parse(&raw)
                .map_err(|err| Error::InvalidConfig(format!("{ENV_BASE_URL}={raw}: {err}")))?;
        }
        config.proxy = normalize_opt(lookup(ENV_PROXY));
        if let Some(agent) = normalize_opt(lookup(ENV_USER_AGENT)) {
            config.user_agent = agent;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_allowed_domain(mut self, domain: impl Into<String>) -> Self {
        self.allowed_domain = domain.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = normalize_opt(proxy);
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, step: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_step = step;
        self
    }

    pub fn with_auth_rules(mut self, rules: AuthErrorRules) -> Self {
        self.auth_rules = rules;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Channel endpoint, relative to the session base URL.
    pub path: String,
    pub max_retries: u32,
    pub retry_backoff_base: u32,
    /// Longest a long-poll body may stay silent before it counts as dead.
    pub push_timeout: Duration,
    /// Used when the server does not announce its own keep-alive interval.
    pub ping_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            path: "u/0/webchannel/".to_string(),
            max_retries: 5,
            retry_backoff_base: 2,
            push_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl ChannelConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_base(mut self, base: u32) -> Self {
        self.retry_backoff_base = base.max(1);
        self
    }

    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    /// Periods below [`MIN_PING_INTERVAL`] are raised to it.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval.max(MIN_PING_INTERVAL);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub world_path: String,
    pub api_path: String,
    /// Resumable upload endpoint.
    pub upload_path: String,
    pub client_type: ClientType,
    pub client_version: i64,
    pub locale: String,
    pub token_ttl: Duration,
    pub channel: ChannelConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            world_path: "u/0/mole/world".to_string(),
            api_path: "u/0/api/".to_string(),
            upload_path: "uploads".to_string(),
            client_type: ClientType::WebDynto,
            client_version: 1,
            locale: "en".to_string(),
            token_ttl: Duration::from_secs(24 * 60 * 60),
            channel: ChannelConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_client_version(mut self, version: i64) -> Self {
        self.client_version = version;
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRule {
    /// Case-insensitive substring looked for in the status text, body and
    /// redirect location.
    pub marker: String,
    pub kind: PermanentAuthKind,
}

/// Best-effort mapping from failed responses to account-level errors.
#[derive(Debug, Clone)]
pub struct AuthErrorRules {
    rules: Vec<AuthRule>,
    unauthorized_is_invalidated: bool,
}

impl Default for AuthErrorRules {
    fn default() -> Self {
        Self::empty()
            .with_rule("ServiceLogin", PermanentAuthKind::TokenInvalidated)
            .with_rule("/signin/", PermanentAuthKind::TokenInvalidated)
            .with_rule("/challenge", PermanentAuthKind::ChallengeRequired)
            .with_rule("/speedbump", PermanentAuthKind::ChallengeRequired)
            .with_rule("consent.google.com", PermanentAuthKind::ConsentRequired)
            .with_rule("/disabled/", PermanentAuthKind::AccountSuspended)
            .with_rule("account has been suspended", PermanentAuthKind::AccountSuspended)
            .with_unauthorized_as_invalidated(true)
    }
}

impl AuthErrorRules {
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            unauthorized_is_invalidated: false,
        }
    }

    pub fn with_rule(mut self, marker: impl Into<String>, kind: PermanentAuthKind) -> Self {
        self.rules.push(AuthRule {
            marker: marker.into().to_ascii_lowercase(),
            kind,
        });
        self
    }

    pub fn with_unauthorized_as_invalidated(mut self, enabled: bool) -> Self {
        self.unauthorized_is_invalidated = enabled;
        self
    }

    pub fn rules(&self) -> &[AuthRule] {
        &self.rules
    }

    pub fn classify(&self, status: StatusCode, texts: &[&str]) -> Option<PermanentAuthKind> {
        let lowered: Vec<String> = texts.iter().map(|text| text.to_ascii_lowercase()).collect();
        let matched = self.rules.iter().find(|rule| {
            lowered
                .iter()
                .any(|text| text.contains(rule.marker.as_str()))
        });
        if let Some(rule) = matched {
            return Some(rule.kind);
        }
        if self.unauthorized_is_invalidated && status == StatusCode::UNAUTHORIZED {
            return Some(PermanentAuthKind::TokenInvalidated);
        }
        None
    }
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).unwrap_or_else(|_| unreachable!("default base url is valid"))
}

fn normalize_opt(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
