use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, COOKIE, USER_AGENT};
use reqwest::{Method, StatusCode};
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::{SessionConfig, CHROME_VERSION, FIREFOX_VERSION};
use crate::cookies::{domain_matches, CookieJar};
use crate::error::{Error, Result};
use crate::http::{HttpBackend, HttpRequest, HttpResponse, ReqwestBackend};

/// Error bodies are only inspected for markers; cap what we keep.
pub(crate) const MAX_ERROR_BODY_BYTES: usize = 1024 * 1024;
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

static CHROME_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Chrome/\d+(?:\.\d+)*").expect("chrome version pattern"));
static FIREFOX_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Firefox/\d+(?:\.\d+)*").expect("firefox version pattern"));

/// Pins Chrome and Firefox version tokens to the versions advertised in the
/// client hints.
pub fn normalize_user_agent(user_agent: &str) -> String {
    let pinned = CHROME_TOKEN.replace_all(user_agent, format!("Chrome/{CHROME_VERSION}.0.0.0"));
    FIREFOX_TOKEN
        .replace_all(&pinned, format!("Firefox/{FIREFOX_VERSION}.0"))
        .into_owned()
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    method: Method,
    url: Url,
    params: Vec<(String, String)>,
    headers: Vec<(&'static str, String)>,
    body: Option<Bytes>,
    allow_redirects: bool,
    streaming: bool,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            params: Vec::new(),
            headers: Vec::new(),
            body: None,
            allow_redirects: true,
            streaming: false,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url, body: impl Into<Bytes>) -> Self {
        let mut request = Self::new(Method::POST, url);
        request.body = Some(body.into());
        request
    }

    pub fn put(url: Url, body: impl Into<Bytes>) -> Self {
        let mut request = Self::new(Method::PUT, url);
        request.body = Some(body.into());
        request
    }

    /// Appends a query parameter; existing query pairs on the URL are kept.
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Hands 3xx responses back instead of following them.
    pub fn no_redirects(mut self) -> Self {
        self.allow_redirects = false;
        self
    }

    /// No total deadline; the caller polices idle reads itself.
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A non-2xx response read back for classification.
#[derive(Debug, Clone)]
pub(crate) struct FailedResponse {
    pub status: StatusCode,
    pub status_text: String,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub body: String,
}

impl FailedResponse {
    pub(crate) async fn read(response: HttpResponse) -> Self {
        let status = response.status;
        let status_text = response.status_text();
        let reason = response.reason.clone();
        let location = response.location().map(str::to_string);
        let body = match response.read_limited(MAX_ERROR_BODY_BYTES).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                trace!(target: "webchannel::session", error = %err, "failed to read error body");
                String::new()
            }
        };
        Self {
            status,
            status_text,
            reason,
            location,
            body,
        }
    }
}

/// Authenticated HTTP session shared by the channel and the client: one
/// cookie jar, one user agent, one backend.
pub struct Session {
    config: SessionConfig,
    backend: Arc<dyn HttpBackend>,
    cookies: Mutex<CookieJar>,
    user_agent: String,
    default_headers: HeaderMap,
}

impl Session {
    pub fn new(config: SessionConfig, cookies: CookieJar) -> Result<Self> {
        let backend = Arc::new(ReqwestBackend::new(&config)?);
        Self::with_backend(config, cookies, backend)
    }

    pub fn with_backend(
        config: SessionConfig,
        cookies: CookieJar,
        backend: Arc<dyn HttpBackend>,
    ) -> Result<Self> {
        let host = config
            .base_url
            .host_str()
            .ok_or_else(|| Error::InvalidConfig(format!("base url {} has no host", config.base_url)))?;
        if !domain_matches(&host.to_ascii_lowercase(), &config.allowed_domain) {
            return Err(Error::InvalidConfig(format!(
                "base url host {host} is outside the allowed domain {}",
                config.allowed_domain
            )));
        }
        let user_agent = normalize_user_agent(&config.user_agent);
        let default_headers = browser_headers(&user_agent)?;
        Ok(Self {
            config,
            backend,
            cookies: Mutex::new(cookies),
            user_agent,
            default_headers,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Resolves a path against the base URL.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.config
            .base_url
            .join(path)
            .map_err(|err| Error::InvalidConfig(format!("invalid endpoint {path}: {err}")))
    }

    pub fn cookies(&self) -> CookieJar {
        self.cookies.lock().clone()
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.lock().get(name).map(str::to_string)
    }

    /// Sends one request and hands back the streaming response as-is,
    /// whatever its status.
    pub async fn fetch_raw(&self, request: FetchRequest) -> Result<HttpResponse> {
        let mut url = request.url;
        if !request.params.is_empty() {
            url.query_pairs_mut().extend_pairs(
                request
                    .params
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str())),
            );
        }
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if host.is_empty() || !domain_matches(&host, &self.config.allowed_domain) {
            return Err(Error::DomainRejected {
                host,
                domain: self.config.allowed_domain.clone(),
            });
        }

        let mut headers = self.default_headers.clone();
        if let Some(cookie) = self.cookies.lock().header_for(&host, Utc::now()) {
            headers.insert(COOKIE, header_value(&cookie)?);
        }
        for (name, value) in &request.headers {
            headers.insert(HeaderName::from_static(name), header_value(value)?);
        }

        debug!(
            target: "webchannel::session",
            method = %request.method,
            host = %host,
            path = %url.path(),
            "sending request"
        );
        let response = self
            .backend
            .execute(HttpRequest {
                method: request.method,
                url,
                headers,
                body: request.body,
                follow_redirects: request.allow_redirects,
                timeout: (!request.streaming).then_some(self.config.request_timeout),
            })
            .await?;

        let updated = self
            .cookies
            .lock()
            .apply_set_cookies(&host, response.set_cookies(), Utc::now());
        trace!(
            target: "webchannel::session",
            status = %response.status,
            cookies_updated = updated,
            "response received"
        );
        Ok(response)
    }

    /// One attempt, fully buffered. Non-2xx responses and suppressed
    /// redirects become errors.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let allow_redirects = request.allow_redirects;
        let response = self.fetch_raw(request).await?;
        let status = response.status;
        if status.is_redirection() && !allow_redirects {
            let location = response.location().unwrap_or_default().to_string();
            if let Some(kind) = self.config.auth_rules.classify(status, &[&location]) {
                return Err(Error::PermanentAuth(kind));
            }
            return Err(Error::RedirectBlocked { location });
        }
        if !status.is_success() {
            let failed = FailedResponse::read(response).await;
            return Err(self.classify_failure(failed));
        }
        let headers = response.headers.clone();
        let body = response
            .read_limited(MAX_BODY_BYTES)
            .await
            .map_err(|err| Error::network(format!("failed to read response body: {err}")))?;
        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }

    /// [`Session::fetch`] with linear backoff on transport failures. Any HTTP
    /// status ends the loop immediately. Failures always carry the attempt
    /// count: `RetriesExhausted` when the bound ran out, `Attempted` when a
    /// non-retryable error stopped the loop early.
    pub async fn fetch_with_retry(&self, request: FetchRequest) -> Result<FetchResponse> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(err @ (Error::Network(_) | Error::Http(_))) => {
                    if attempt >= max_attempts {
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                    let delay = self.config.retry_step * attempt;
                    warn!(
                        target: "webchannel::session",
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "request failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(Error::Attempted {
                        attempts: attempt,
                        source: Box::new(err),
                    })
                }
            }
        }
    }

    pub(crate) fn classify_failure(&self, failed: FailedResponse) -> Error {
        let mut texts = vec![failed.status_text.as_str(), failed.body.as_str()];
        if let Some(location) = failed.location.as_deref() {
            texts.push(location);
        }
        if let Some(kind) = self.config.auth_rules.classify(failed.status, &texts) {
            warn!(
                target: "webchannel::session",
                status = %failed.status,
                kind = %kind,
                "permanent authentication failure"
            );
            return Error::PermanentAuth(kind);
        }
        let mut body = failed.body;
        if body.len() > 512 {
            let mut cut = 512;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Error::UnexpectedStatus {
            status: failed.status,
            reason: failed.reason,
            body,
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|err| Error::InvalidConfig(format!("invalid header value: {err}")))
}

fn browser_headers(user_agent: &str) -> Result<HeaderMap> {
    let brands = format!(
        "\"Chromium\";v=\"{v}\", \"Google Chrome\";v=\"{v}\", \"Not=A?Brand\";v=\"99\"",
        v = CHROME_VERSION
    );
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, header_value(user_agent)?);
    headers.insert(CONNECTION, HeaderValue::from_static("Keep-Alive"));
    headers.insert("sec-ch-ua", header_value(&brands)?);
    headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
    headers.insert("sec-ch-ua-platform", HeaderValue::from_static("\"Linux\""));
    headers.insert("accept-language", HeaderValue::from_static("en-US,en;q=0.9"));
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::config::AuthErrorRules;
    use crate::error::{ErrorClass, PermanentAuthKind};
    use crate::mock::{MockBackend, MockReply, Route};

    fn session(mock: &MockBackend) -> Session {
        let config = SessionConfig::default().with_retry(3, Duration::from_secs(3));
        let jar = CookieJar::from_cookie_header("SID=s1; HSID=h1", "google.com");
        Session::with_backend(config, jar, Arc::new(mock.clone())).expect("session")
    }

    fn url(path: &str) -> Url {
        Url::parse("https://chat.google.com/").unwrap().join(path).unwrap()
    }

    #[test_timeout::timeout]
    fn user_agents_are_pinned() {
        assert_eq!(
            normalize_user_agent("Mozilla/5.0 (Windows NT 10.0) Chrome/126.0.6478.127 Safari/537.36"),
            "Mozilla/5.0 (Windows NT 10.0) Chrome/118.0.0.0 Safari/537.36"
        );
        assert_eq!(
            normalize_user_agent("Mozilla/5.0 (X11; rv:127.0) Gecko/20100101 Firefox/127.0"),
            "Mozilla/5.0 (X11; rv:127.0) Gecko/20100101 Firefox/118.0"
        );
        assert_eq!(normalize_user_agent("curl/8.0"), "curl/8.0");
    }

    #[test_timeout::tokio_timeout_test]
    async fn foreign_hosts_are_rejected_before_any_io() {
        let mock = MockBackend::new();
        let session = session(&mock);
        let err = session
            .fetch_raw(FetchRequest::get(Url::parse("https://example.com/x").unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DomainRejected { ref host, .. } if host == "example.com"));
        assert!(mock.requests().is_empty());

        let err = session
            .fetch_raw(FetchRequest::get(Url::parse("https://google.com.evil.net/").unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DomainRejected { .. }));
    }

    #[test_timeout::timeout]
    fn base_url_outside_the_domain_is_a_config_error() {
        let config = SessionConfig::default()
            .with_base_url(Url::parse("https://example.org/").unwrap());
        let result = Session::with_backend(config, CookieJar::new(), Arc::new(MockBackend::new()));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test_timeout::tokio_timeout_test]
    async fn requests_carry_cookies_agent_and_params() {
        let mock = MockBackend::new();
        mock.push(
            Route::PathEndsWith("/status".into()),
            MockReply::ok().set_cookie("NEW=v; Path=/").chunk("ok"),
        );
        let session = session(&mock);

        let response = session
            .fetch(
                FetchRequest::get(url("status?keep=1"))
                    .param("VER", 8)
                    .param("$req", "count=1&ofs=0")
                    .header("x-extra", "yes"),
            )
            .await
            .unwrap();
        assert_eq!(response.text(), "ok");

        let sent = &mock.requests()[0];
        assert_eq!(sent.param("keep").as_deref(), Some("1"));
        assert_eq!(sent.param("VER").as_deref(), Some("8"));
        assert_eq!(sent.param("$req").as_deref(), Some("count=1&ofs=0"));
        assert_eq!(sent.header("cookie"), Some("HSID=h1; SID=s1"));
        assert_eq!(sent.header("x-extra"), Some("yes"));
        assert_eq!(sent.header("connection"), Some("Keep-Alive"));
        assert!(sent.header("user-agent").unwrap().contains("Chrome/118.0.0.0"));
        assert_eq!(session.cookie("NEW").as_deref(), Some("v"));
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn transport_failures_retry_with_linear_backoff() {
        let mock = MockBackend::new();
        let route = Route::PathEndsWith("/flaky".into());
        mock.push(route.clone(), MockReply::network_error("reset"));
        mock.push(route.clone(), MockReply::network_error("reset"));
        mock.push(route.clone(), MockReply::ok().chunk("third time"));
        let session = session(&mock);

        let response = session.fetch_with_retry(FetchRequest::get(url("flaky"))).await.unwrap();
        assert_eq!(response.text(), "third time");

        let times: Vec<_> = mock.requests().iter().map(|r| r.at).collect();
        assert_eq!(times[1] - times[0], Duration::from_secs(3));
        assert_eq!(times[2] - times[1], Duration::from_secs(6));
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn exhausted_retries_report_the_attempt_count() {
        let mock = MockBackend::new();
        mock.otherwise(Route::PathEndsWith("/down".into()), MockReply::network_error("refused"));
        let session = session(&mock);

        let err = session.fetch_with_retry(FetchRequest::get(url("down"))).await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(err.class(), ErrorClass::Transient);
        assert_eq!(mock.requests().len(), 3);
    }

    #[test_timeout::tokio_timeout_test]
    async fn http_statuses_stop_retrying_immediately() {
        let mock = MockBackend::new();
        mock.otherwise(
            Route::PathEndsWith("/gone".into()),
            MockReply::status(503).chunk("try later"),
        );
        let session = session(&mock);

        let err = session.fetch_with_retry(FetchRequest::get(url("gone"))).await.unwrap_err();
        let Error::Attempted { attempts, source } = err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(attempts, 1);
        match *source {
            Error::UnexpectedStatus { status, body, .. } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "try later");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(mock.requests().len(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn suppressed_redirects_are_reported_with_their_location() {
        let mock = MockBackend::new();
        mock.push(
            Route::PathEndsWith("/world".into()),
            MockReply::status(302).header("location", "https://chat.google.com/elsewhere"),
        );
        mock.push(
            Route::PathEndsWith("/world".into()),
            MockReply::status(302).header(
                "location",
                "https://accounts.google.com/ServiceLogin?continue=x",
            ),
        );
        let session = session(&mock);

        let err = session
            .fetch(FetchRequest::get(url("world")).no_redirects())
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::RedirectBlocked { ref location } if location == "https://chat.google.com/elsewhere")
        );
        assert_eq!(err.class(), ErrorClass::RedirectBlocked);

        let err = session
            .fetch(FetchRequest::get(url("world")).no_redirects())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::PermanentAuth(PermanentAuthKind::TokenInvalidated)
        ));
    }

    #[test_timeout::tokio_timeout_test]
    async fn auth_markers_in_error_bodies_are_permanent() {
        let mock = MockBackend::new();
        mock.push(
            Route::PathEndsWith("/api".into()),
            MockReply::status(403).chunk("<a href=\"https://consent.google.com/\">"),
        );
        let config = SessionConfig::default().with_auth_rules(AuthErrorRules::default());
        let session =
            Session::with_backend(config, CookieJar::new(), Arc::new(mock.clone())).unwrap();

        let err = session.fetch_with_retry(FetchRequest::get(url("api"))).await.unwrap_err();
        assert!(matches!(err, Error::Attempted { attempts: 1, .. }));
        assert!(matches!(err.root(), Error::PermanentAuth(PermanentAuthKind::ConsentRequired)));
        assert!(err.is_fatal());
    }
}
