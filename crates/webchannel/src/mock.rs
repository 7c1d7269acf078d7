//! Scripted [`HttpBackend`] for exercising sessions and channels without a
//! network.
//!
//! Replies are queued per [`Route`]. A request takes the first queued reply
//! of the first matching route; when every matching queue is empty the
//! route's fallback answers instead. Unmatched requests get a 404.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use tokio::time::Instant;
use url::Url;

use crate::error::{Error, Result};
use crate::http::{HttpBackend, HttpRequest, HttpResponse};

/// Request shapes the channel produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `GET .../register`
    Register,
    /// Long-poll opened before a session id is known (`SID=null`).
    Handshake,
    /// Back-channel GET for a known session id (long-polls and the ack).
    Poll,
    /// Forward-channel POST to `events` (pings).
    Ping,
    /// Anything whose path ends with the given suffix.
    PathEndsWith(String),
}

impl Route {
    pub fn matches(&self, request: &HttpRequest) -> bool {
        let path = request.url.path();
        let param = |name: &str| {
            request
                .url
                .query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
        };
        match self {
            Route::Register => request.method == Method::GET && path.ends_with("/register"),
            Route::Handshake => {
                request.method == Method::GET
                    && path.ends_with("/events")
                    && param("SID").as_deref() == Some("null")
            }
            Route::Poll => {
                request.method == Method::GET
                    && path.ends_with("/events")
                    && param("RID").as_deref() == Some("rpc")
            }
            Route::Ping => request.method == Method::POST && path.ends_with("/events"),
            Route::PathEndsWith(suffix) => path.ends_with(suffix.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
enum BodyPart {
    Data(Bytes),
    Fail(io::ErrorKind, String),
}

#[derive(Debug, Clone)]
pub struct MockReply {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    parts: Vec<BodyPart>,
    hang: bool,
    stall: bool,
    connect_error: Option<String>,
}

impl MockReply {
    pub fn ok() -> Self {
        Self::status(200)
    }

    pub fn status(code: u16) -> Self {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            reason: status.canonical_reason().map(str::to_string),
            headers: HeaderMap::new(),
            parts: Vec::new(),
            hang: false,
            stall: false,
            connect_error: None,
        }
    }

    /// The request never gets a response.
    pub fn network_error(message: impl Into<String>) -> Self {
        let mut reply = Self::status(500);
        reply.connect_error = Some(message.into());
        reply
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.append(HeaderName::from_static(name), value);
        }
        self
    }

    pub fn set_cookie(self, value: &str) -> Self {
        self.header("set-cookie", value)
    }

    /// Appends one body read.
    pub fn chunk(mut self, data: impl Into<Bytes>) -> Self {
        self.parts.push(BodyPart::Data(data.into()));
        self
    }

    /// A read that fails after the preceding chunks were delivered.
    pub fn read_error(mut self, kind: io::ErrorKind, message: impl Into<String>) -> Self {
        self.parts.push(BodyPart::Fail(kind, message.into()));
        self
    }

    /// The body stays open after its chunks, like an idle long-poll.
    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    /// No response ever arrives for the request.
    pub fn stall(mut self) -> Self {
        self.stall = true;
        self
    }

    fn into_response(self) -> Result<HttpResponse> {
        if let Some(message) = self.connect_error {
            return Err(Error::Network(message));
        }
        let reads = stream::iter(self.parts.into_iter().map(|part| match part {
            BodyPart::Data(data) => Ok(data),
            BodyPart::Fail(kind, message) => Err(io::Error::new(kind, message)),
        }));
        let body = if self.hang {
            reads.chain(stream::pending()).boxed()
        } else {
            reads.boxed()
        };
        Ok(HttpResponse {
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            body,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub at: Instant,
}

impl RecordedRequest {
    pub fn param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body_text(&self) -> String {
        self.body
            .as_ref()
            .map(|body| String::from_utf8_lossy(body).into_owned())
            .unwrap_or_default()
    }

    /// Value of a form field in an urlencoded body.
    pub fn form_value(&self, name: &str) -> Option<String> {
        let body = self.body.as_ref()?;
        url::form_urlencoded::parse(body)
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

struct Rule {
    route: Route,
    queue: VecDeque<MockReply>,
    fallback: Option<MockReply>,
}

#[derive(Default)]
struct MockState {
    rules: Vec<Rule>,
    requests: Vec<RecordedRequest>,
}

/// Cheap to clone; clones share the script and the request log.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Pings succeed and idle polls hang unless scripted otherwise.
    pub fn new() -> Self {
        let backend = Self {
            state: Arc::new(Mutex::new(MockState::default())),
        };
        backend.otherwise(Route::Ping, MockReply::ok());
        backend.otherwise(Route::Poll, MockReply::ok().hang());
        backend
    }

    pub fn push(&self, route: Route, reply: MockReply) -> &Self {
        let mut state = self.state.lock();
        match state.rules.iter_mut().find(|rule| rule.route == route) {
            Some(rule) => rule.queue.push_back(reply),
            None => state.rules.push(Rule {
                route,
                queue: VecDeque::from([reply]),
                fallback: None,
            }),
        }
        self
    }

    /// Reply used for `route` once its queue is drained.
    pub fn otherwise(&self, route: Route, reply: MockReply) -> &Self {
        let mut state = self.state.lock();
        match state.rules.iter_mut().find(|rule| rule.route == route) {
            Some(rule) => rule.fallback = Some(reply),
            None => state.rules.push(Rule {
                route,
                queue: VecDeque::new(),
                fallback: Some(reply),
            }),
        }
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn requests_to(&self, route: &Route) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|recorded| {
                route.matches(&HttpRequest {
                    method: recorded.method.clone(),
                    url: recorded.url.clone(),
                    headers: HeaderMap::new(),
                    body: None,
                    follow_redirects: false,
                    timeout: None,
                })
            })
            .cloned()
            .collect()
    }

    fn next_reply(state: &mut MockState, request: &HttpRequest) -> MockReply {
        let matching = state
            .rules
            .iter_mut()
            .filter(|rule| rule.route.matches(request));
        let mut fallback = None;
        for rule in matching {
            if let Some(reply) = rule.queue.pop_front() {
                return reply;
            }
            if fallback.is_none() {
                fallback = rule.fallback.clone();
            }
        }
        fallback.unwrap_or_else(|| MockReply::status(404))
    }
}

#[async_trait]
impl HttpBackend for MockBackend {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let reply = {
            let mut state = self.state.lock();
            state.requests.push(RecordedRequest {
                method: request.method.clone(),
                url: request.url.clone(),
                headers: request.headers.clone(),
                body: request.body.clone(),
                at: Instant::now(),
            });
            Self::next_reply(&mut state, &request)
        };
        if reply.stall {
            futures::future::pending::<()>().await;
        }
        reply.into_response()
    }
}
