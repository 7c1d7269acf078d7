use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, LOCATION, SET_COOKIE};
use reqwest::redirect::Policy;
use reqwest::{Method, StatusCode};
use url::Url;

use crate::config::SessionConfig;
use crate::error::{Error, Result};

/// Response bodies arrive as a stream of reads so long-polls can be parsed
/// incrementally.
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub follow_redirects: bool,
    /// Total deadline for the exchange; `None` for open-ended streams.
    pub timeout: Option<Duration>,
}

pub struct HttpResponse {
    pub status: StatusCode,
    pub reason: Option<String>,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
    }

    pub fn set_cookies(&self) -> impl Iterator<Item = &str> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
    }

    /// Status line text, e.g. `400 Unknown SID`.
    pub fn status_text(&self) -> String {
        match &self.reason {
            Some(reason) => format!("{} {}", self.status.as_u16(), reason),
            None => self.status.to_string(),
        }
    }

    /// Reads the body, keeping at most `limit` bytes.
    pub async fn read_limited(self, limit: usize) -> io::Result<Bytes> {
        let mut body = self.body;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            let room = limit.saturating_sub(buffer.len());
            buffer.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if buffer.len() >= limit {
                break;
            }
        }
        Ok(buffer.freeze())
    }
}

#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Production backend. Cookies are managed by the session, not by reqwest.
pub struct ReqwestBackend {
    following: reqwest::Client,
    manual: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let following = Self::builder(config)?
            .redirect(Policy::limited(10))
            .build()?;
        let manual = Self::builder(config)?.redirect(Policy::none()).build()?;
        Ok(Self { following, manual })
    }

    fn builder(config: &SessionConfig) -> Result<reqwest::ClientBuilder> {
        let builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        let builder = match config.proxy.as_deref() {
            Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy).map_err(|err| {
                Error::InvalidConfig(format!("invalid proxy url {proxy}: {err}"))
            })?),
            None => builder.no_proxy(),
        };
        Ok(builder)
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let client = if request.follow_redirects {
            &self.following
        } else {
            &self.manual
        };
        let mut builder = client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map_err(|err| {
                let kind = if err.is_timeout() {
                    io::ErrorKind::TimedOut
                } else {
                    io::ErrorKind::Other
                };
                io::Error::new(kind, err)
            })
            .boxed();
        Ok(HttpResponse {
            status,
            reason: status.canonical_reason().map(str::to_string),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue, StatusCode as ServerStatus};
    use axum::response::{AppendHeaders, IntoResponse};
    use axum::routing::get;
    use axum::Router;

    async fn serve(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        Url::parse(&format!("http://{addr}/")).expect("loopback url")
    }

    fn request(url: Url, follow_redirects: bool) -> HttpRequest {
        HttpRequest {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
            follow_redirects,
            timeout: Some(Duration::from_secs(5)),
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn streams_body_and_exposes_set_cookies() {
        let router = Router::new().route(
            "/stream",
            get(|| async {
                let chunks = futures::stream::iter(vec![
                    Ok::<_, std::io::Error>(Bytes::from_static(b"7\n[[0,1]]")),
                    Ok(Bytes::from_static(b"7\n[[1,2]]")),
                ]);
                (
                    AppendHeaders([
                        (header::SET_COOKIE, "COMPASS=dynamite-ui=abc; Path=/"),
                        (header::SET_COOKIE, "OTHER=1"),
                    ]),
                    axum::body::Body::from_stream(chunks),
                )
                    .into_response()
            }),
        );
        let base = serve(router).await;
        let backend = ReqwestBackend::new(&SessionConfig::default()).expect("backend");

        let response = backend
            .execute(request(base.join("stream").unwrap(), true))
            .await
            .expect("response");
        assert_eq!(response.status, StatusCode::OK);
        let cookies: Vec<&str> = response.set_cookies().collect();
        assert_eq!(cookies, vec!["COMPASS=dynamite-ui=abc; Path=/", "OTHER=1"]);

        let body = response.read_limited(1024).await.expect("body");
        assert_eq!(&body[..], b"7\n[[0,1]]7\n[[1,2]]");
    }

    #[test_timeout::tokio_timeout_test]
    async fn manual_redirects_surface_the_location() {
        let router = Router::new().route(
            "/moved",
            get(|| async {
                (
                    ServerStatus::FOUND,
                    [(header::LOCATION, HeaderValue::from_static("https://accounts.example/signin"))],
                )
            }),
        );
        let base = serve(router).await;
        let backend = ReqwestBackend::new(&SessionConfig::default()).expect("backend");

        let response = backend
            .execute(request(base.join("moved").unwrap(), false))
            .await
            .expect("response");
        assert_eq!(response.status, StatusCode::FOUND);
        assert_eq!(response.location(), Some("https://accounts.example/signin"));
        assert_eq!(response.status_text(), "302 Found");
    }

    #[test_timeout::timeout]
    fn invalid_proxy_is_rejected() {
        let config = SessionConfig::default().with_proxy(Some("::not a proxy::".into()));
        assert!(matches!(
            ReqwestBackend::new(&config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
