//! Browser-channel session state machine.
//!
//! ```text
//! Unregistered -> Registering -> AwaitingSid -> Streaming <-> Recovering
//!                                                   \-> Terminated
//! ```
//!
//! A channel registers, opens a handshake long-poll that assigns a session
//! id (`sid`), then keeps reopening back-channel long-polls acknowledging the
//! highest array id seen (`aid`). Forward-channel pings are posted from a
//! separate task. `listen` owns the loop and decides between retrying with
//! backoff, re-registering and giving up.

use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use event_bus::Event;
use futures::StreamExt;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::chunk::ChunkParser;
use crate::config::{ChannelConfig, MIN_PING_INTERVAL};
use crate::error::{Error, ErrorClass, Result};
use crate::proto::{PingEvent, StreamEventsRequest};
use crate::session::{FailedResponse, FetchRequest, Session};

const PROTOCOL_VERSION: &str = "8";
const CHANNEL_CLIENT_VERSION: &str = "22";
const SID_SENTINEL: &str = "null";
const HANDSHAKE_DATA: &str = "[]";
const INITIAL_RESPONSE_HEADER: &str = "x-http-initial-response";
const COMPASS_COOKIE: &str = "COMPASS";
const COMPASS_PREFIX: &str = "dynamite-ui=";
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);
pub const KEEP_ALIVE_MARKER: &str = "noop";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unregistered,
    Registering,
    AwaitingSid,
    Streaming,
    Recovering,
    Terminated,
}

/// Point-in-time copy of the channel's protocol counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub sid: Option<String>,
    pub rid: u64,
    pub aid: u64,
    pub ofs: u64,
    pub csessionid: Option<String>,
    pub connected: bool,
    pub retries: u32,
}

#[derive(Debug)]
struct Cursor {
    sid: Option<String>,
    rid: u64,
    aid: u64,
    ofs: u64,
    csessionid: Option<String>,
    connected: bool,
    ever_connected: bool,
    retries: u32,
}

impl Cursor {
    fn new() -> Self {
        Self {
            sid: None,
            rid: rand::thread_rng().gen_range(10_000..99_999),
            aid: 0,
            ofs: 0,
            csessionid: None,
            connected: false,
            ever_connected: false,
            retries: 0,
        }
    }
}

struct Pinger {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Pinger {
    fn stop(self) -> JoinHandle<()> {
        self.cancel.cancel();
        self.handle.abort();
        self.handle
    }
}

/// Server-announced session parameters from the handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialResponse {
    pub sid: String,
    pub keep_alive: Option<Duration>,
}

/// Parses `[[0,["c","<sid>","",8,12,<keep-alive ms>]]]`.
pub fn parse_initial_response(raw: &str) -> Option<InitialResponse> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let control = value.get(0)?.get(1)?;
    let sid = control.get(1)?.as_str()?.to_string();
    if sid.is_empty() {
        return None;
    }
    let keep_alive = control
        .get(5)
        .and_then(Value::as_u64)
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis);
    Some(InitialResponse { sid, keep_alive })
}

/// True for the server's keep-alive arrays, `"noop"` or `["noop"]`.
pub fn is_keep_alive(payload: &Value) -> bool {
    match payload {
        Value::String(marker) => marker == KEEP_ALIVE_MARKER,
        Value::Array(items) => {
            items.len() == 1 && items[0].as_str() == Some(KEEP_ALIVE_MARKER)
        }
        _ => false,
    }
}

fn split_array(item: Value) -> Option<(u64, Value)> {
    let Value::Array(mut pair) = item else {
        return None;
    };
    if pair.len() != 2 {
        return None;
    }
    let payload = pair.pop()?;
    let id = match &pair[0] {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|id| *id >= 0.0 && id.fract() == 0.0)
                .map(|id| id as u64)
        })?,
        _ => return None,
    };
    Some((id, payload))
}

fn unique_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(|byte| (byte as char).to_ascii_lowercase())
        .collect()
}

pub(crate) fn backoff_delay(base: u32, retries: u32) -> Duration {
    Duration::from_secs(u64::from(base.max(1)).saturating_pow(retries))
}

/// Long-poll read failures that mean the server dropped our session.
fn classify_read_error(err: io::Error) -> Error {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    let expiring = err.kind() == io::ErrorKind::ConnectionAborted
        || text.contains("closed network connection")
        || text.contains("connection closed before message completed");
    if expiring {
        Error::SessionExpiring(text)
    } else {
        Error::network(format!("long-poll read failed: {text}"))
    }
}

pub struct Channel {
    session: Arc<Session>,
    config: ChannelConfig,
    base: Url,
    events_url: Url,
    cursor: Arc<Mutex<Cursor>>,
    state: watch::Sender<ChannelState>,
    pinger: Mutex<Option<Pinger>>,
    on_connect: Event<()>,
    on_reconnect: Event<()>,
    on_disconnect: Event<()>,
    on_receive_array: Event<Value>,
}

impl Channel {
    pub fn new(session: Arc<Session>, config: ChannelConfig) -> Result<Self> {
        let base = session.resolve(&config.path)?;
        let events_url = base
            .join("events")
            .map_err(|err| Error::InvalidConfig(format!("invalid channel url: {err}")))?;
        let (state, _) = watch::channel(ChannelState::Unregistered);
        Ok(Self {
            session,
            config,
            base,
            events_url,
            cursor: Arc::new(Mutex::new(Cursor::new())),
            state,
            pinger: Mutex::new(None),
            on_connect: Event::new("channel.connect"),
            on_reconnect: Event::new("channel.reconnect"),
            on_disconnect: Event::new("channel.disconnect"),
            on_receive_array: Event::new("channel.receive_array"),
        })
    }

    pub fn on_connect(&self) -> &Event<()> {
        &self.on_connect
    }

    pub fn on_reconnect(&self) -> &Event<()> {
        &self.on_reconnect
    }

    pub fn on_disconnect(&self) -> &Event<()> {
        &self.on_disconnect
    }

    /// Fires once per received array with its payload, keep-alives excluded.
    pub fn on_receive_array(&self) -> &Event<Value> {
        &self.on_receive_array
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        let cursor = self.cursor.lock();
        ChannelSnapshot {
            sid: cursor.sid.clone(),
            rid: cursor.rid,
            aid: cursor.aid,
            ofs: cursor.ofs,
            csessionid: cursor.csessionid.clone(),
            connected: cursor.connected,
            retries: cursor.retries,
        }
    }

    fn set_state(&self, state: ChannelState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(target: "webchannel::channel", from = ?previous, to = ?state, "state change");
        }
    }

    /// Obtains a fresh `csessionid` and forgets the current session id.
    pub async fn register(&self, cancel: &CancellationToken) -> Result<()> {
        self.set_state(ChannelState::Registering);
        self.stop_pinging().await;

        let url = self
            .base
            .join("register?ignore_compass_cookie=1")
            .map_err(|err| Error::InvalidConfig(format!("invalid register url: {err}")))?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.session.fetch_with_retry(FetchRequest::get(url)) => { result?; }
        }

        let csessionid = self
            .session
            .cookie(COMPASS_COOKIE)
            .and_then(|value| value.strip_prefix(COMPASS_PREFIX).map(str::to_string));
        if csessionid.is_none() {
            warn!(target: "webchannel::channel", "registration did not set a COMPASS session cookie");
        }
        {
            let mut cursor = self.cursor.lock();
            cursor.csessionid = csessionid.clone();
            cursor.sid = None;
            cursor.aid = 0;
            cursor.ofs = 0;
        }
        info!(
            target: "webchannel::channel",
            csessionid = csessionid.as_deref().unwrap_or(""),
            "channel registered"
        );
        self.set_state(ChannelState::AwaitingSid);
        Ok(())
    }

    /// Runs the channel until it is cancelled, its lifetime runs out, it
    /// exhausts its retries or hits a fatal error. Always ends in `Err`; the
    /// variant says why.
    pub async fn listen(&self, cancel: &CancellationToken, max_age: Duration) -> Result<()> {
        let now = Instant::now();
        let deadline = now.checked_add(max_age).unwrap_or_else(|| now + FAR_FUTURE);
        let result = self.run(cancel, deadline).await;
        self.stop_pinging().await;
        self.set_state(ChannelState::Terminated);
        match &result {
            Err(Error::Cancelled) => info!(target: "webchannel::channel", "channel cancelled"),
            Err(err) => warn!(target: "webchannel::channel", error = %err, "channel terminated"),
            Ok(()) => {}
        }
        result
    }

    async fn run(&self, cancel: &CancellationToken, deadline: Instant) -> Result<()> {
        self.register(cancel).await?;
        let mut retries: u32 = 0;
        let mut skip_backoff = false;
        let mut last_error: Option<Error> = None;

        loop {
            self.cursor.lock().retries = retries;
            if retries > self.config.max_retries {
                return Err(Error::RetriesExhausted {
                    attempts: retries,
                    source: Box::new(last_error.unwrap_or_else(|| Error::network("long-poll failed"))),
                });
            }
            if Instant::now() >= deadline {
                return Err(Error::ChannelLifetimeExceeded);
            }

            if retries > 0 && !skip_backoff {
                let delay = backoff_delay(self.config.retry_backoff_base, retries);
                self.set_state(ChannelState::Recovering);
                info!(
                    target: "webchannel::channel",
                    retries,
                    delay_secs = delay.as_secs(),
                    "backing off before next long-poll"
                );
                let wake = Instant::now().checked_add(delay).unwrap_or(deadline).min(deadline);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep_until(wake) => {}
                }
                if Instant::now() >= deadline {
                    return Err(Error::ChannelLifetimeExceeded);
                }
            }
            skip_backoff = false;

            let outcome = match tokio::time::timeout_at(deadline, self.long_poll_request(cancel)).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(Error::ChannelLifetimeExceeded),
            };
            match outcome {
                Ok(()) => {
                    trace!(target: "webchannel::channel", "long-poll completed");
                    retries = 0;
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) if err.class() == ErrorClass::SessionInvalid => {
                    warn!(target: "webchannel::channel", error = %err, "session lost; registering again");
                    self.mark_disconnected();
                    self.register(cancel).await?;
                    retries += 1;
                    skip_backoff = true;
                    last_error = Some(err);
                }
                Err(err) => {
                    warn!(target: "webchannel::channel", error = %err, retries = retries + 1, "long-poll failed");
                    retries += 1;
                    self.mark_disconnected();
                    last_error = Some(err);
                }
            }
        }
    }

    /// One long-poll: open the back channel and stream it to completion.
    async fn long_poll_request(&self, cancel: &CancellationToken) -> Result<()> {
        let request = self.poll_request();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = self.session.fetch_raw(request) => response?,
        };

        if !response.status.is_success() {
            let failed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                failed = FailedResponse::read(response) => failed,
            };
            if failed.status == StatusCode::BAD_REQUEST
                && (failed.status_text.contains("Unknown SID") || failed.body.contains("Unknown SID"))
            {
                return Err(Error::SessionInvalid);
            }
            return Err(self.session.classify_failure(failed));
        }

        let initial = response.header(INITIAL_RESPONSE_HEADER).map(str::to_string);
        if let Some(raw) = initial {
            match parse_initial_response(&raw) {
                Some(initial) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    adopted = self.adopt_session(initial) => adopted?,
                },
                None => warn!(target: "webchannel::channel", header = %raw, "unparseable initial response"),
            }
        }
        if self.cursor.lock().sid.is_some() {
            self.set_state(ChannelState::Streaming);
        }

        let mut parser = ChunkParser::new();
        let mut body = response.body;
        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                read = tokio::time::timeout(self.config.push_timeout, body.next()) => read,
            };
            match read {
                Err(_) => {
                    return Err(Error::network(format!(
                        "long-poll idle for {}s",
                        self.config.push_timeout.as_secs()
                    )))
                }
                Ok(None) => return Ok(()),
                Ok(Some(Err(err))) => return Err(classify_read_error(err)),
                Ok(Some(Ok(data))) => self.on_push_data(&mut parser, &data)?,
            }
        }
    }

    fn poll_request(&self) -> FetchRequest {
        let mut cursor = self.cursor.lock();
        let request = FetchRequest::get(self.events_url.clone())
            .streaming()
            .param("VER", PROTOCOL_VERSION);
        match cursor.sid.clone() {
            None => {
                let rid = cursor.rid;
                cursor.rid += 1;
                let handshake = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("count", "1")
                    .append_pair("ofs", "0")
                    .append_pair("req0_data", HANDSHAKE_DATA)
                    .finish();
                request
                    .param("RID", rid)
                    .param("CVER", CHANNEL_CLIENT_VERSION)
                    .param("$req", handshake)
                    .param("SID", SID_SENTINEL)
                    .param("t", 1)
                    .param("zx", unique_id())
            }
            Some(sid) => request
                .param("RID", "rpc")
                .param("SID", sid)
                .param("AID", cursor.aid)
                .param("CI", 0)
                .param("TYPE", "xmlhttp")
                .param("t", 1)
                .param("zx", unique_id()),
        }
    }

    async fn adopt_session(&self, initial: InitialResponse) -> Result<()> {
        {
            let cursor = self.cursor.lock();
            if cursor.sid.as_deref() == Some(initial.sid.as_str()) {
                return Ok(());
            }
        }
        self.stop_pinging().await;
        {
            let mut cursor = self.cursor.lock();
            cursor.sid = Some(initial.sid.clone());
            cursor.aid = 0;
            cursor.ofs = 0;
        }
        info!(target: "webchannel::channel", sid = %initial.sid, "session id assigned");

        self.acknowledge_session(&initial.sid).await?;
        let ping = StreamEventsRequest {
            ping_event: Some(PingEvent::initial()),
            ..Default::default()
        };
        send_stream_event(&self.session, &self.cursor, &self.events_url, &ping).await?;

        let interval = initial.keep_alive.unwrap_or(self.config.ping_interval);
        self.start_pinging(interval);
        Ok(())
    }

    async fn acknowledge_session(&self, sid: &str) -> Result<()> {
        let aid = self.cursor.lock().aid;
        let request = FetchRequest::get(self.events_url.clone())
            .param("VER", PROTOCOL_VERSION)
            .param("RID", "rpc")
            .param("SID", sid)
            .param("AID", aid)
            .param("CI", 0)
            .param("TYPE", "xmlhttp")
            .param("zx", unique_id())
            .param("t", 1);
        // Only the status matters; dropping the body closes the request.
        let response = self.session.fetch_raw(request).await?;
        if !response.status.is_success() {
            let failed = FailedResponse::read(response).await;
            return Err(self.session.classify_failure(failed));
        }
        Ok(())
    }

    /// Feeds one body read through the chunk parser and dispatches every
    /// complete array.
    pub fn on_push_data(&self, parser: &mut ChunkParser, data: &[u8]) -> Result<()> {
        for chunk in parser.feed(data)? {
            self.mark_connected();
            let arrays = match serde_json::from_str::<Value>(&chunk) {
                Ok(Value::Array(arrays)) => arrays,
                Ok(other) => {
                    warn!(target: "webchannel::channel", chunk = %other, "chunk is not an array list; dropped");
                    continue;
                }
                Err(err) => {
                    warn!(target: "webchannel::channel", error = %err, "undecodable chunk dropped");
                    continue;
                }
            };
            for item in arrays {
                let Some((array_id, payload)) = split_array(item) else {
                    warn!(target: "webchannel::channel", "malformed array entry dropped");
                    continue;
                };
                {
                    let mut cursor = self.cursor.lock();
                    cursor.aid = cursor.aid.max(array_id);
                }
                if is_keep_alive(&payload) {
                    trace!(target: "webchannel::channel", array_id, "keep-alive");
                    continue;
                }
                self.on_receive_array.fire(payload);
            }
        }
        Ok(())
    }

    fn mark_connected(&self) {
        let first = {
            let mut cursor = self.cursor.lock();
            if cursor.connected {
                return;
            }
            cursor.connected = true;
            let first = !cursor.ever_connected;
            cursor.ever_connected = true;
            first
        };
        if first {
            info!(target: "webchannel::channel", "channel connected");
            self.on_connect.fire(());
        } else {
            info!(target: "webchannel::channel", "channel reconnected");
            self.on_reconnect.fire(());
        }
    }

    fn mark_disconnected(&self) {
        let was_connected = std::mem::replace(&mut self.cursor.lock().connected, false);
        if was_connected {
            info!(target: "webchannel::channel", "channel disconnected");
            self.on_disconnect.fire(());
        }
    }

    fn start_pinging(&self, interval: Duration) {
        let interval = interval.max(MIN_PING_INTERVAL);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let session = self.session.clone();
        let cursor = self.cursor.clone();
        let url = self.events_url.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let ping = StreamEventsRequest {
                    ping_event: Some(PingEvent::keep_alive()),
                    ..Default::default()
                };
                if let Err(err) = send_stream_event(&session, &cursor, &url, &ping).await {
                    warn!(target: "webchannel::channel", error = %err, "keep-alive ping failed");
                }
            }
        });
        debug!(
            target: "webchannel::channel",
            interval_secs = interval.as_secs(),
            "keep-alive pings started"
        );
        let previous = self.pinger.lock().replace(Pinger { cancel, handle });
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    async fn stop_pinging(&self) {
        let pinger = self.pinger.lock().take();
        if let Some(pinger) = pinger {
            let _ = pinger.stop().await;
            debug!(target: "webchannel::channel", "keep-alive pings stopped");
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(pinger) = self.pinger.get_mut().take() {
            pinger.stop();
        }
    }
}

/// Posts one forward-channel message for the current session.
async fn send_stream_event(
    session: &Session,
    cursor: &Mutex<Cursor>,
    events_url: &Url,
    request: &StreamEventsRequest,
) -> Result<()> {
    let (sid, rid, aid, ofs) = {
        let mut cursor = cursor.lock();
        let sid = cursor
            .sid
            .clone()
            .ok_or_else(|| Error::network("no channel session to post to"))?;
        let rid = cursor.rid;
        cursor.rid += 1;
        (sid, rid, cursor.aid, cursor.ofs)
    };
    let form = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("count", "1")
        .append_pair("ofs", &ofs.to_string())
        .append_pair("req0_data", &pblite::encode_string(request))
        .finish();
    let post = FetchRequest::post(events_url.clone(), form)
        .header("content-type", "application/x-www-form-urlencoded")
        .param("VER", PROTOCOL_VERSION)
        .param("RID", rid)
        .param("t", 1)
        .param("SID", &sid)
        .param("AID", aid);
    session.fetch(post).await?;
    {
        let mut cursor = cursor.lock();
        if cursor.sid.as_deref() == Some(sid.as_str()) {
            cursor.ofs = cursor.ofs.max(ofs + 1);
        }
    }
    trace!(target: "webchannel::channel", rid, ofs, "stream event posted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn initial_response_yields_sid_and_keep_alive() {
        let parsed = parse_initial_response(r#"[[0,["c","S1","",8,12,30000]]]"#).unwrap();
        assert_eq!(parsed.sid, "S1");
        assert_eq!(parsed.keep_alive, Some(Duration::from_secs(30)));

        let bare = parse_initial_response(r#"[[0,["c","S2"]]]"#).unwrap();
        assert_eq!(bare.keep_alive, None);

        assert!(parse_initial_response("[]").is_none());
        assert!(parse_initial_response("not json").is_none());
        assert!(parse_initial_response(r#"[[0,["c",""]]]"#).is_none());
    }

    #[test_timeout::timeout]
    fn keep_alive_markers() {
        assert!(is_keep_alive(&json!("noop")));
        assert!(is_keep_alive(&json!(["noop"])));
        assert!(!is_keep_alive(&json!(["noop", 1])));
        assert!(!is_keep_alive(&json!(["c", "S1"])));
    }

    #[test_timeout::timeout]
    fn array_entries_need_an_id_and_a_payload() {
        assert_eq!(split_array(json!([3, ["x"]])), Some((3, json!(["x"]))));
        assert_eq!(split_array(json!([4.0, "y"])), Some((4, json!("y"))));
        assert_eq!(split_array(json!([-1, "y"])), None);
        assert_eq!(split_array(json!(["3", "y"])), None);
        assert_eq!(split_array(json!([1])), None);
        assert_eq!(split_array(json!({"id": 1})), None);
    }

    #[test_timeout::timeout]
    fn backoff_grows_geometrically() {
        assert_eq!(backoff_delay(2, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(2, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(3, 2), Duration::from_secs(9));
        assert_eq!(backoff_delay(2, 200), Duration::from_secs(u64::MAX));
    }

    #[test_timeout::timeout]
    fn session_loss_read_errors_are_classified() {
        let closed = io::Error::new(io::ErrorKind::Other, "read tcp: use of closed network connection");
        assert!(matches!(classify_read_error(closed), Error::SessionExpiring(_)));
        let aborted = io::Error::new(io::ErrorKind::ConnectionAborted, "aborted");
        assert!(matches!(classify_read_error(aborted), Error::SessionExpiring(_)));
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(matches!(classify_read_error(reset), Error::Network(_)));
    }

    #[test_timeout::timeout]
    fn unique_ids_are_lowercase_alphanumerics() {
        let id = unique_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
