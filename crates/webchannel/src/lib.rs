//! Headless client for a browser-channel ("webchannel") chat transport.
//!
//! A [`Session`] owns the cookies and HTTP backend. A [`Channel`] runs the
//! long-poll protocol over it and a [`Client`] turns the arrays it receives
//! into typed [`proto::Event`]s, alongside the request/response API.

pub mod channel;
pub mod chunk;
pub mod client;
pub mod config;
pub mod cookies;
pub mod error;
pub mod http;
pub mod media;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod proto;
pub mod session;
pub mod split;
pub mod tokens;

pub use channel::{Channel, ChannelSnapshot, ChannelState};
pub use chunk::{ChunkError, ChunkParser};
pub use client::Client;
pub use config::{AuthErrorRules, ChannelConfig, ClientConfig, SessionConfig};
pub use cookies::CookieJar;
pub use error::{Error, ErrorClass, PermanentAuthKind, Result};
pub use http::{HttpBackend, ReqwestBackend};
pub use media::{UploadMediaQuery, UploadMetadata};
pub use session::{FetchRequest, FetchResponse, Session};
pub use split::split_event_bodies;
pub use tokens::AuthTokens;
