//! Chat client: token upkeep, the event stream and typed API calls, all over
//! one shared [`Session`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use event_bus::Event;
use parking_lot::Mutex;
use pblite::Message;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::channel::{is_keep_alive, Channel};
use crate::config::ClientConfig;
use crate::error::{Error, PermanentAuthKind, Result};
use crate::media::{UploadMediaQuery, UploadMetadata, UPLOAD_URL_HEADER};
use crate::proto::{
    self, ClientFeatureCapabilities, CreateDmExtendedRequest, CreateDmExtendedResponse,
    CreateGroupRequest, CreateGroupResponse, CreateMembershipRequest, CreateMembershipResponse,
    CreateTopicRequest, CreateTopicResponse, DeleteMessageRequest, DeleteMessageResponse,
    EditMessageRequest, EditMessageResponse, GetGroupRequest, GetGroupResponse, GetMembersRequest,
    GetMembersResponse, GetSelfUserStatusRequest, GetSelfUserStatusResponse, GroupId,
    HasRequestHeader, ListMembersRequest, ListMembersResponse, ListTopicsRequest, ListTopicsResponse,
    MemberId, PaginatedWorldRequest, PaginatedWorldResponse, RemoveMembershipsRequest,
    RemoveMembershipsResponse, RequestHeader, SetMarkAsUnreadTimestampRequest,
    SetMarkAsUnreadTimestampResponse, StreamEventsResponse, UpdateReactionRequest,
    UpdateReactionResponse,
};
use crate::session::{FetchRequest, Session};
use crate::split::split_event_bodies;
use crate::tokens::{parse_world_page, AuthTokens};

const XSSI_PREFIX: &str = ")]}'";
const API_CONTENT_TYPE: &str = "application/json+protobuf";
const TOPIC_ID_LENGTH: usize = 11;

#[derive(Debug, Clone)]
struct TokenState {
    tokens: AuthTokens,
    refreshed_at: Instant,
}

pub struct Client {
    config: ClientConfig,
    session: Arc<Session>,
    api_requests: AtomicU64,
    tokens: Mutex<Option<TokenState>>,
    channel: Mutex<Option<Arc<Channel>>>,
    on_connect: Arc<Event<()>>,
    on_reconnect: Arc<Event<()>>,
    on_disconnect: Arc<Event<()>>,
    on_stream_event: Arc<Event<proto::Event>>,
}

impl Client {
    pub fn new(config: ClientConfig, session: Arc<Session>) -> Self {
        Self {
            config,
            session,
            api_requests: AtomicU64::new(0),
            tokens: Mutex::new(None),
            channel: Mutex::new(None),
            on_connect: Arc::new(Event::new("client.connect")),
            on_reconnect: Arc::new(Event::new("client.reconnect")),
            on_disconnect: Arc::new(Event::new("client.disconnect")),
            on_stream_event: Arc::new(Event::new("client.stream_event")),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
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

    /// One value per event unit, after batched bodies are split apart.
    /// Delivery is at-least-once across re-registrations.
    pub fn on_stream_event(&self) -> &Event<proto::Event> {
        &self.on_stream_event
    }

    /// The channel of the current or most recent `connect`.
    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.lock().clone()
    }

    pub fn tokens(&self) -> Option<AuthTokens> {
        self.tokens.lock().as_ref().map(|state| state.tokens.clone())
    }

    /// Fetches the world page and re-reads the XSRF token from it.
    pub async fn refresh_tokens(&self) -> Result<AuthTokens> {
        let url = self.session.resolve(&self.config.world_path)?;
        let response = self
            .session
            .fetch_with_retry(FetchRequest::get(url).no_redirects())
            .await
            .map_err(|err| match err.root() {
                Error::RedirectBlocked { location } => {
                    Error::LoggedOut(format!("world page redirected to {location}"))
                }
                Error::PermanentAuth(PermanentAuthKind::TokenInvalidated) => {
                    Error::LoggedOut("session cookies were rejected".to_string())
                }
                _ => err,
            })?;
        let tokens = parse_world_page(&response.text())?;
        info!(
            target: "webchannel::client",
            user_id = tokens.user_id.as_deref().unwrap_or(""),
            "auth tokens refreshed"
        );
        *self.tokens.lock() = Some(TokenState {
            tokens: tokens.clone(),
            refreshed_at: Instant::now(),
        });
        Ok(tokens)
    }

    async fn xsrf_token(&self) -> Result<String> {
        let cached = self
            .tokens
            .lock()
            .as_ref()
            .filter(|state| state.refreshed_at.elapsed() < self.config.token_ttl)
            .map(|state| state.tokens.xsrf_token.clone());
        match cached {
            Some(token) => Ok(token),
            None => Ok(self.refresh_tokens().await?.xsrf_token),
        }
    }

    /// Opens a channel and streams events until it ends. Returns the
    /// channel's terminal error; callers decide whether to connect again.
    pub async fn connect(&self, cancel: &CancellationToken, max_age: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            token = self.xsrf_token() => { token?; }
        }
        self.api_requests.store(0, Ordering::SeqCst);

        let channel = Arc::new(Channel::new(self.session.clone(), self.config.channel.clone())?);
        forward(channel.on_connect(), &self.on_connect);
        forward(channel.on_reconnect(), &self.on_reconnect);
        forward(channel.on_disconnect(), &self.on_disconnect);
        let sink = self.on_stream_event.clone();
        channel
            .on_receive_array()
            .add_observer(move |payload| dispatch_array(&sink, payload));
        *self.channel.lock() = Some(channel.clone());

        debug!(target: "webchannel::client", max_age_secs = max_age.as_secs(), "connecting");
        channel.listen(cancel, max_age).await
    }

    fn request_header(&self) -> RequestHeader {
        RequestHeader {
            client_type: Some(self.config.client_type),
            client_version: Some(self.config.client_version),
            client_build: None,
            client_feature_capabilities: Some(ClientFeatureCapabilities::default()),
            locale: Some(self.config.locale.clone()),
            trace_id: Some(rand::thread_rng().gen_range(1..i64::MAX)),
        }
    }

    /// Posts a pblite request to `<api path><endpoint>` and decodes the
    /// reply. `space_id` routes the request to the space's backend.
    pub async fn api_request<Req, Resp>(
        &self,
        endpoint: &str,
        mut request: Req,
        space_id: Option<&str>,
    ) -> Result<Resp>
    where
        Req: Message + HasRequestHeader,
        Resp: Message,
    {
        if request.request_header_mut().is_none() {
            *request.request_header_mut() = Some(self.request_header());
        }
        let xsrf = self.xsrf_token().await?;
        let url = self
            .session
            .resolve(&self.config.api_path)?
            .join(endpoint)
            .map_err(|err| Error::InvalidConfig(format!("invalid api endpoint {endpoint}: {err}")))?;
        let counter = self.api_requests.fetch_add(1, Ordering::SeqCst) + 1;
        let base = self.session.base_url();

        let mut fetch = FetchRequest::post(url, pblite::encode(&request))
            .param("c", counter)
            .param("rt", "j")
            .param("alt", "protojson")
            .header("content-type", API_CONTENT_TYPE)
            .header("x-framework-xsrf-token", xsrf)
            .header("origin", base.origin().ascii_serialization())
            .header("referer", base.as_str());
        if let Some(space_id) = space_id {
            fetch = fetch.header("x-goog-chat-space-id", space_id);
        }

        trace!(target: "webchannel::client", endpoint, counter, "api request");
        let response = self.session.fetch_with_retry(fetch).await?;
        let text = response.text();
        let json = text.trim_start();
        let json = json.strip_prefix(XSSI_PREFIX).unwrap_or(json);
        let value: Value = serde_json::from_str(json)?;
        Ok(pblite::from_value(&value)?)
    }

    pub async fn paginated_world(&self, request: PaginatedWorldRequest) -> Result<PaginatedWorldResponse> {
        self.api_request("paginated_world", request, None).await
    }

    /// Starts a topic. A topic/message id is generated when none is set.
    pub async fn create_topic(&self, mut request: CreateTopicRequest) -> Result<CreateTopicResponse> {
        if request.topic_and_message_id.is_none() {
            request.topic_and_message_id = Some(topic_id());
        }
        let space = routing_id(request.group_id.as_ref());
        self.api_request("create_topic", request, space.as_deref()).await
    }

    pub async fn update_reaction(&self, request: UpdateReactionRequest) -> Result<UpdateReactionResponse> {
        let group = request
            .message_id
            .as_ref()
            .and_then(|message| message.parent_id.as_ref())
            .and_then(|topic| topic.group_id.as_ref());
        let space = routing_id(group);
        self.api_request("update_reaction", request, space.as_deref()).await
    }

    pub async fn list_topics(&self, request: ListTopicsRequest) -> Result<ListTopicsResponse> {
        let space = routing_id(request.group_id.as_ref());
        self.api_request("list_topics", request, space.as_deref()).await
    }

    pub async fn get_self_user_status(&self) -> Result<GetSelfUserStatusResponse> {
        self.api_request("get_self_user_status", GetSelfUserStatusRequest::default(), None)
            .await
    }

    /// Looks up user profiles by id.
    pub async fn get_members<I, S>(&self, user_ids: I) -> Result<GetMembersResponse>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = GetMembersRequest {
            member_ids: user_ids.into_iter().map(MemberId::user).collect(),
            ..Default::default()
        };
        self.api_request("get_members", request, None).await
    }

    /// An explicit `space_id` routes the request ahead of the group's space.
    pub async fn list_members(&self, request: ListMembersRequest) -> Result<ListMembersResponse> {
        let space = request
            .space_id
            .as_ref()
            .and_then(|space| space.space_id.clone())
            .or_else(|| routing_id(request.group_id.as_ref()));
        self.api_request("list_members", request, space.as_deref()).await
    }

    pub async fn get_group(&self, request: GetGroupRequest) -> Result<GetGroupResponse> {
        self.api_request("get_group", request, None).await
    }

    pub async fn delete_message(&self, request: DeleteMessageRequest) -> Result<DeleteMessageResponse> {
        self.api_request("delete_message", request, None).await
    }

    pub async fn edit_message(&self, request: EditMessageRequest) -> Result<EditMessageResponse> {
        self.api_request("edit_message", request, None).await
    }

    pub async fn create_group(&self, request: CreateGroupRequest) -> Result<CreateGroupResponse> {
        self.api_request("create_group", request, None).await
    }

    pub async fn create_membership(
        &self,
        request: CreateMembershipRequest,
    ) -> Result<CreateMembershipResponse> {
        self.api_request("create_membership", request, None).await
    }

    /// Removing the signed-in user leaves the group.
    pub async fn remove_memberships(
        &self,
        request: RemoveMembershipsRequest,
    ) -> Result<RemoveMembershipsResponse> {
        self.api_request("remove_memberships", request, None).await
    }

    pub async fn set_mark_as_unread_timestamp(
        &self,
        request: SetMarkAsUnreadTimestampRequest,
    ) -> Result<SetMarkAsUnreadTimestampResponse> {
        self.api_request("set_mark_as_unread_timestamp", request, None).await
    }

    pub async fn create_dm_extended(
        &self,
        request: CreateDmExtendedRequest,
    ) -> Result<CreateDmExtendedResponse> {
        self.api_request("create_dm_extended", request, None).await
    }

    /// Uploads `data` in one resumable session and returns the metadata to
    /// attach to the message that shares it.
    pub async fn upload_media(
        &self,
        file_name: &str,
        content_type: &str,
        data: impl Into<Bytes>,
        query: &UploadMediaQuery,
    ) -> Result<UploadMetadata> {
        let data = data.into();
        let url = self.session.resolve(&self.config.upload_path)?;
        let mut start = FetchRequest::post(url, Bytes::new())
            .header("chat-filename", file_name)
            .header("x-goog-upload-command", "start")
            .header("x-goog-upload-content-length", data.len().to_string())
            .header("x-goog-upload-file-name", file_name)
            .header("x-goog-upload-header-content-type", content_type)
            .header("x-goog-upload-protocol", "resumable");
        for (name, value) in query.pairs() {
            start = start.param(name, value);
        }
        let started = self.session.fetch_with_retry(start).await?;
        let upload_url = started
            .header(UPLOAD_URL_HEADER)
            .ok_or_else(|| Error::Upload("start reply carried no upload url".to_string()))?;
        let upload_url = Url::parse(upload_url)
            .map_err(|err| Error::Upload(format!("invalid upload url {upload_url}: {err}")))?;
        debug!(target: "webchannel::client", file_name, bytes = data.len(), "uploading media");

        let finish = FetchRequest::put(upload_url, data)
            .header("x-goog-upload-command", "upload, finalize")
            .header("x-goog-upload-protocol", "resumable")
            .header("x-goog-upload-offset", "0");
        let finished = self.session.fetch_with_retry(finish).await?;
        UploadMetadata::from_body(&finished.body)
    }
}

fn forward(source: &Event<()>, target: &Arc<Event<()>>) {
    let target = target.clone();
    source.add_observer(move |()| target.fire(()));
}

fn routing_id(group: Option<&GroupId>) -> Option<String> {
    group.and_then(GroupId::routing_id).map(str::to_string)
}

fn topic_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOPIC_ID_LENGTH)
        .map(char::from)
        .collect()
}

/// Decodes one channel array payload and fires its event units.
fn dispatch_array(sink: &Event<proto::Event>, payload: Value) {
    if is_keep_alive(&payload) {
        return;
    }
    let Some(message) = payload.get(0) else {
        trace!(target: "webchannel::client", "empty array payload");
        return;
    };
    if !message.is_array() {
        trace!(target: "webchannel::client", payload = %payload, "control array ignored");
        return;
    }
    let response: StreamEventsResponse = match pblite::from_value(message) {
        Ok(response) => response,
        Err(err) => {
            warn!(target: "webchannel::client", error = %err, "undecodable stream event dropped");
            return;
        }
    };
    let Some(event) = response.event else {
        trace!(target: "webchannel::client", "stream response without an event");
        return;
    };
    for unit in split_event_bodies(event) {
        sink.fire(unit);
    }
}
