use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

use crate::chunk::ChunkError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Account-level failures that no amount of retrying will fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentAuthKind {
    TokenInvalidated,
    ChallengeRequired,
    ConsentRequired,
    AccountSuspended,
}

impl fmt::Display for PermanentAuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PermanentAuthKind::TokenInvalidated => "authentication token invalidated",
            PermanentAuthKind::ChallengeRequired => "account challenge required",
            PermanentAuthKind::ConsentRequired => "consent required",
            PermanentAuthKind::AccountSuspended => "account suspended",
        };
        f.write_str(text)
    }
}

/// Coarse handling category carried by every [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying after a pause.
    Transient,
    /// The server forgot our channel session; register again.
    SessionInvalid,
    /// Retrying will not help.
    Permanent,
    /// A redirect was suppressed; inspect the location.
    RedirectBlocked,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}{}", reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default())]
    UnexpectedStatus {
        status: StatusCode,
        reason: Option<String>,
        body: String,
    },
    #[error("channel session id rejected by server")]
    SessionInvalid,
    #[error("channel session is expiring: {0}")]
    SessionExpiring(String),
    #[error("channel exceeded its maximum lifetime")]
    ChannelLifetimeExceeded,
    #[error("{0}")]
    PermanentAuth(PermanentAuthKind),
    #[error("failed to decode payload: {0}")]
    Decode(#[from] pblite::DecodeError),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("redirect to {location} blocked")]
    RedirectBlocked { location: String },
    #[error("host {host} is outside the allowed domain {domain}")]
    DomainRejected { host: String, domain: String },
    #[error("request failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
    #[error("request stopped on attempt {attempts}: {source}")]
    Attempted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error("logged out: {0}")]
    LoggedOut(String),
    #[error("failed to parse auth tokens: {0}")]
    TokenParse(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("stream framing error: {0}")]
    Framing(#[from] ChunkError),
    #[error("media upload failed: {0}")]
    Upload(String),
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Network(_) | Error::Http(_) => ErrorClass::Transient,
            Error::UnexpectedStatus { status, .. } if status.is_server_error() => {
                ErrorClass::Transient
            }
            Error::UnexpectedStatus { status, .. }
                if *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT =>
            {
                ErrorClass::Transient
            }
            Error::SessionInvalid | Error::SessionExpiring(_) => ErrorClass::SessionInvalid,
            Error::RedirectBlocked { .. } => ErrorClass::RedirectBlocked,
            Error::RetriesExhausted { source, .. } | Error::Attempted { source, .. } => {
                source.class()
            }
            Error::UnexpectedStatus { .. }
            | Error::ChannelLifetimeExceeded
            | Error::PermanentAuth(_)
            | Error::Decode(_)
            | Error::Json(_)
            | Error::DomainRejected { .. }
            | Error::Cancelled
            | Error::LoggedOut(_)
            | Error::TokenParse(_)
            | Error::InvalidConfig(_)
            | Error::Framing(_)
            | Error::Upload(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Errors that end a channel outright instead of feeding the retry loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.root(),
            Error::PermanentAuth(_)
                | Error::DomainRejected { .. }
                | Error::LoggedOut(_)
                | Error::InvalidConfig(_)
                | Error::Cancelled
        )
    }

    /// The innermost error, looking through attempt wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::RetriesExhausted { source, .. } | Error::Attempted { source, .. } => {
                source.root()
            }
            other => other,
        }
    }

    pub(crate) fn network(context: impl fmt::Display) -> Self {
        Error::Network(context.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn classification_is_carried_by_the_value() {
        assert_eq!(Error::network("reset").class(), ErrorClass::Transient);
        assert_eq!(Error::SessionInvalid.class(), ErrorClass::SessionInvalid);
        assert_eq!(
            Error::SessionExpiring("closed".into()).class(),
            ErrorClass::SessionInvalid
        );
        assert_eq!(
            Error::RedirectBlocked {
                location: "https://accounts.example/".into()
            }
            .class(),
            ErrorClass::RedirectBlocked
        );
        assert_eq!(
            Error::PermanentAuth(PermanentAuthKind::ConsentRequired).class(),
            ErrorClass::Permanent
        );
    }

    #[test_timeout::timeout]
    fn server_errors_are_transient_but_client_errors_are_not() {
        let status = |code: u16| Error::UnexpectedStatus {
            status: StatusCode::from_u16(code).unwrap(),
            reason: None,
            body: String::new(),
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert_eq!(status(404).class(), ErrorClass::Permanent);
        assert_eq!(status(404).to_string(), "unexpected status 404 Not Found");
    }

    #[test_timeout::timeout]
    fn retry_wrapper_delegates_to_the_terminal_error() {
        let wrapped = Error::RetriesExhausted {
            attempts: 3,
            source: Box::new(Error::PermanentAuth(PermanentAuthKind::AccountSuspended)),
        };
        assert_eq!(wrapped.class(), ErrorClass::Permanent);
        assert!(wrapped.is_fatal());
        assert!(matches!(wrapped.root(), Error::PermanentAuth(_)));
        assert_eq!(
            wrapped.to_string(),
            "request failed after 3 attempt(s): account suspended"
        );

        let stopped = Error::Attempted {
            attempts: 1,
            source: Box::new(Error::SessionInvalid),
        };
        assert_eq!(stopped.class(), ErrorClass::SessionInvalid);
        assert!(!stopped.is_fatal());
        assert!(matches!(stopped.root(), Error::SessionInvalid));
    }
}
