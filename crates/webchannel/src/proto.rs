//! Message shapes exchanged with the chat service, in pblite form.
//!
//! Only the envelope is typed. Event body kinds and API payload internals
//! are kept as opaque JSON under their field so callers can interpret what
//! they need without this crate guessing at the rest of the schema.

use pblite::{pblite_enum, pblite_message};
use serde_json::Value;

pblite_enum! {
    pub enum ClientType {
        Unknown = 0,
        Android = 2,
        Ios = 3,
        WebDynto = 8,
    }
}

pblite_enum! {
    pub enum PingState {
        Unknown = 0,
        Inactive = 1,
        Active = 2,
    }
}

pblite_enum! {
    pub enum FocusState {
        Unknown = 0,
        Background = 1,
        Foreground = 3,
    }
}

pblite_enum! {
    pub enum InteractiveState {
        Unknown = 0,
        Interactive = 1,
        NonInteractive = 2,
    }
}

pblite_enum! {
    pub enum EventType {
        Unknown = 0,
        UserAddedToGroup = 1,
        UserRemovedFromGroup = 2,
        GroupViewed = 3,
        TopicViewed = 4,
        GroupUpdated = 5,
        MessagePosted = 6,
        MessageUpdated = 7,
        MessageDeleted = 8,
        TopicMuteChanged = 9,
        UserSettingsChanged = 10,
        GroupStarred = 11,
        WebPushNotification = 12,
        InviteCountUpdated = 13,
        MembershipChanged = 14,
        GroupHideChanged = 15,
        DataLossHandoff = 16,
        SessionReady = 17,
        TypingStateChanged = 18,
        ReadReceiptChanged = 19,
        UserStatusUpdated = 20,
        MessageReactionUpdated = 21,
        GroupNotificationSettingsUpdated = 22,
    }
}

pblite_enum! {
    pub enum ReactionUpdateType {
        Unknown = 0,
        Add = 1,
        Remove = 2,
    }
}

/// Capability levels by position; 2 means fully supported. The default is
/// the vector a current web client announces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFeatureCapabilities {
    levels: Vec<Option<i32>>,
}

const WEB_CAPABILITY_POSITIONS: &[(u32, i32)] = &[
    (5, 2), (6, 2), (7, 2), (8, 2), (9, 2), (10, 2),
    (16, 2), (17, 2), (18, 2), (19, 2), (20, 2),
    (22, 2), (23, 2), (24, 2), (25, 2), (26, 2), (27, 2),
    (29, 2), (30, 0), (31, 0), (32, 2), (33, 2),
    (36, 0), (37, 0), (38, 0), (39, 0), (40, 0), (41, 0),
    (42, 2), (43, 0), (44, 0),
];

impl Default for ClientFeatureCapabilities {
    fn default() -> Self {
        let mut capabilities = Self { levels: Vec::new() };
        for &(position, level) in WEB_CAPABILITY_POSITIONS {
            capabilities.set(position, level);
        }
        capabilities
    }
}

impl ClientFeatureCapabilities {
    pub fn none() -> Self {
        Self { levels: Vec::new() }
    }

    pub fn get(&self, position: u32) -> Option<i32> {
        let index = (position as usize).checked_sub(1)?;
        self.levels.get(index).copied().flatten()
    }

    pub fn set(&mut self, position: u32, level: i32) {
        let Some(index) = (position as usize).checked_sub(1) else {
            return;
        };
        if self.levels.len() <= index {
            self.levels.resize(index + 1, None);
        }
        self.levels[index] = Some(level);
    }
}

impl pblite::Field for ClientFeatureCapabilities {
    fn encode_field(&self) -> Value {
        let mut writer = pblite::FieldWriter::new();
        for (index, level) in self.levels.iter().enumerate() {
            if let Some(level) = level {
                writer.set(index as u32 + 1, Value::from(*level));
            }
        }
        writer.finish()
    }

    fn decode_field(value: &Value) -> Result<Self, pblite::DecodeError> {
        let reader = pblite::FieldReader::new(value, "ClientFeatureCapabilities")?;
        let mut capabilities = Self::none();
        let count = value.as_array().map_or(0, Vec::len) as u32;
        for position in 1..=count {
            if let Some(level) = reader.optional::<i32>(position)? {
                capabilities.set(position, level);
            }
        }
        Ok(capabilities)
    }
}

pblite_message! {
    pub struct RequestHeader {
        1 => client_type: Option<ClientType>,
        2 => client_version: Option<i64>,
        3 => client_build: Option<String>,
        4 => client_feature_capabilities: Option<ClientFeatureCapabilities>,
        5 => locale: Option<String>,
        6 => trace_id: Option<i64>,
    }
}

pblite_message! {
    pub struct SpaceId {
        1 => space_id: Option<String>,
    }
}

pblite_message! {
    pub struct DmId {
        1 => dm_id: Option<String>,
    }
}

pblite_message! {
    /// A conversation: either a named space or a direct message.
    pub struct GroupId {
        1 => space_id: Option<SpaceId>,
        3 => dm_id: Option<DmId>,
    }
}

impl GroupId {
    pub fn space(id: impl Into<String>) -> Self {
        Self {
            space_id: Some(SpaceId {
                space_id: Some(id.into()),
            }),
            dm_id: None,
        }
    }

    pub fn dm(id: impl Into<String>) -> Self {
        Self {
            space_id: None,
            dm_id: Some(DmId {
                dm_id: Some(id.into()),
            }),
        }
    }

    /// The value sent in the space routing header.
    pub fn routing_id(&self) -> Option<&str> {
        self.space_id
            .as_ref()
            .and_then(|space| space.space_id.as_deref())
            .or_else(|| self.dm_id.as_ref().and_then(|dm| dm.dm_id.as_deref()))
    }
}

pblite_message! {
    pub struct UserId {
        1 => id: Option<String>,
        2 => user_type: Option<i32>,
    }
}

pblite_message! {
    pub struct TopicId {
        1 => topic_id: Option<String>,
        2 => group_id: Option<GroupId>,
    }
}

pblite_message! {
    pub struct MessageId {
        1 => message_id: Option<String>,
        2 => parent_id: Option<TopicId>,
    }
}

pblite_message! {
    pub struct PingEvent {
        1 => state: Option<PingState>,
        2 => last_interactive_time_ms: Option<i64>,
        5 => application_focus_state: Option<FocusState>,
        6 => client_interactive_state: Option<InteractiveState>,
        9 => client_notifications_enabled: Option<bool>,
    }
}

impl PingEvent {
    /// Announced once when a session id is assigned.
    pub fn initial() -> Self {
        Self {
            state: Some(PingState::Active),
            last_interactive_time_ms: None,
            application_focus_state: Some(FocusState::Foreground),
            client_interactive_state: Some(InteractiveState::Interactive),
            client_notifications_enabled: Some(true),
        }
    }

    /// Periodic keep-alive.
    pub fn keep_alive() -> Self {
        Self {
            state: Some(PingState::Active),
            last_interactive_time_ms: None,
            application_focus_state: Some(FocusState::Foreground),
            client_interactive_state: None,
            client_notifications_enabled: None,
        }
    }
}

pblite_message! {
    pub struct StreamEventsRequest {
        2 => ping_event: Option<PingEvent>,
        5 => request_header: Option<RequestHeader>,
        6 => client_session_id: Option<i64>,
    }
}

pblite_message! {
    /// One entry of an event's body list. Exactly one kind field is set.
    pub struct EventBody {
        1 => event_type: Option<EventType>,
        2 => message_posted: Option<Value>,
        3 => message_deleted: Option<Value>,
        4 => typing_state_changed: Option<Value>,
        5 => read_receipt_changed: Option<Value>,
        6 => group_viewed: Option<Value>,
        7 => message_reaction: Option<Value>,
        8 => membership_changed: Option<Value>,
        9 => group_updated: Option<Value>,
        10 => user_status_updated: Option<Value>,
    }
}

impl EventBody {
    /// Name of the populated kind field, if any.
    pub fn kind(&self) -> Option<&'static str> {
        let kinds: [(&'static str, bool); 9] = [
            ("message_posted", self.message_posted.is_some()),
            ("message_deleted", self.message_deleted.is_some()),
            ("typing_state_changed", self.typing_state_changed.is_some()),
            ("read_receipt_changed", self.read_receipt_changed.is_some()),
            ("group_viewed", self.group_viewed.is_some()),
            ("message_reaction", self.message_reaction.is_some()),
            ("membership_changed", self.membership_changed.is_some()),
            ("group_updated", self.group_updated.is_some()),
            ("user_status_updated", self.user_status_updated.is_some()),
        ];
        kinds
            .into_iter()
            .find_map(|(name, present)| present.then_some(name))
    }
}

pblite_message! {
    pub struct Event {
        1 => group_id: Option<GroupId>,
        2 => topic_id: Option<TopicId>,
        3 => user_id: Option<UserId>,
        4 => event_type: Option<EventType>,
        5 => body: Option<EventBody>,
        6 => bodies: Vec<EventBody>,
        7 => group_revision: Option<Value>,
        8 => timestamp_usec: Option<i64>,
        9 => is_offline: Option<bool>,
    }
}

pblite_message! {
    pub struct StreamEventsResponse {
        1 => event: Option<Event>,
        2 => session_id: Option<String>,
    }
}

pblite_message! {
    pub struct PaginatedWorldRequest {
        1 => request_header: Option<RequestHeader>,
        2 => world_section_requests: Vec<Value>,
        3 => fetch_from_user_spaces: Option<bool>,
        4 => fetch_options: Vec<i32>,
    }
}

pblite_message! {
    pub struct PaginatedWorldResponse {
        1 => world_items: Vec<Value>,
        2 => world_section_responses: Vec<Value>,
    }
}

pblite_message! {
    pub struct CreateTopicRequest {
        1 => request_header: Option<RequestHeader>,
        2 => group_id: Option<GroupId>,
        3 => text_body: Option<String>,
        4 => annotations: Vec<Value>,
        5 => topic_and_message_id: Option<String>,
        6 => history_v2: Option<bool>,
        7 => message_info: Option<Value>,
    }
}

pblite_message! {
    pub struct CreateTopicResponse {
        1 => topic: Option<Value>,
    }
}

pblite_message! {
    pub struct UpdateReactionRequest {
        1 => request_header: Option<RequestHeader>,
        2 => message_id: Option<MessageId>,
        3 => emoji: Option<Value>,
        4 => update_type: Option<ReactionUpdateType>,
    }
}

pblite_message! {
    pub struct UpdateReactionResponse {
        1 => emoji_usage: Option<Value>,
    }
}

pblite_message! {
    pub struct ListTopicsRequest {
        1 => request_header: Option<RequestHeader>,
        2 => group_id: Option<GroupId>,
        3 => page_size_for_topics: Option<i32>,
        4 => page_size_for_replies: Option<i32>,
        5 => group_not_older_than_sort_time_micros: Option<i64>,
    }
}

pblite_message! {
    pub struct ListTopicsResponse {
        1 => topics: Vec<Value>,
        2 => contains_first_topic: Option<bool>,
        3 => contains_last_topic: Option<bool>,
    }
}

pblite_message! {
    pub struct GetSelfUserStatusRequest {
        1 => request_header: Option<RequestHeader>,
    }
}

pblite_message! {
    pub struct GetSelfUserStatusResponse {
        1 => user_status: Option<Value>,
    }
}

pblite_enum! {
    pub enum GetGroupFetchOption {
        Unknown = 0,
        Members = 1,
        IncludeDynamicGroupName = 2,
        IncludeAccountUserCapabilities = 3,
    }
}

pblite_message! {
    /// A member of a group: a user or a roster.
    pub struct MemberId {
        1 => user_id: Option<UserId>,
        2 => roster_id: Option<Value>,
    }
}

impl MemberId {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user_id: Some(UserId {
                id: Some(id.into()),
                user_type: None,
            }),
            roster_id: None,
        }
    }
}

pblite_message! {
    pub struct GetMembersRequest {
        1 => request_header: Option<RequestHeader>,
        2 => member_ids: Vec<MemberId>,
    }
}

pblite_message! {
    pub struct GetMembersResponse {
        1 => members: Vec<Value>,
    }
}

pblite_message! {
    pub struct ListMembersRequest {
        1 => request_header: Option<RequestHeader>,
        2 => group_id: Option<GroupId>,
        3 => space_id: Option<SpaceId>,
        4 => page_size: Option<i32>,
        5 => page_token: Option<String>,
    }
}

pblite_message! {
    pub struct ListMembersResponse {
        1 => memberships: Vec<Value>,
        2 => next_page_token: Option<String>,
    }
}

pblite_message! {
    pub struct GetGroupRequest {
        1 => request_header: Option<RequestHeader>,
        2 => group_id: Option<GroupId>,
        3 => fetch_options: Vec<GetGroupFetchOption>,
    }
}

pblite_message! {
    pub struct GetGroupResponse {
        1 => group: Option<Value>,
        2 => memberships: Vec<Value>,
        3 => read_state: Option<Value>,
    }
}

pblite_message! {
    pub struct DeleteMessageRequest {
        1 => request_header: Option<RequestHeader>,
        2 => message_id: Option<MessageId>,
    }
}

pblite_message! {
    pub struct DeleteMessageResponse {
        1 => message: Option<Value>,
    }
}

pblite_message! {
    pub struct EditMessageRequest {
        1 => request_header: Option<RequestHeader>,
        2 => message_id: Option<MessageId>,
        3 => text_body: Option<String>,
        4 => annotations: Vec<Value>,
        5 => message_info: Option<Value>,
    }
}

pblite_message! {
    pub struct EditMessageResponse {
        1 => message: Option<Value>,
    }
}

pblite_message! {
    pub struct CreateGroupRequest {
        1 => request_header: Option<RequestHeader>,
        2 => space: Option<Value>,
        3 => invitees: Vec<MemberId>,
        4 => should_find_existing_space: Option<bool>,
    }
}

pblite_message! {
    pub struct CreateGroupResponse {
        1 => group: Option<Value>,
        2 => memberships: Vec<Value>,
    }
}

pblite_message! {
    pub struct CreateMembershipRequest {
        1 => request_header: Option<RequestHeader>,
        2 => group_id: Option<GroupId>,
        3 => invitees: Vec<MemberId>,
    }
}

pblite_message! {
    pub struct CreateMembershipResponse {
        1 => memberships: Vec<Value>,
    }
}

pblite_message! {
    /// Also how the signed-in user leaves a group.
    pub struct RemoveMembershipsRequest {
        1 => request_header: Option<RequestHeader>,
        2 => group_id: Option<GroupId>,
        3 => member_ids: Vec<MemberId>,
    }
}

pblite_message! {
    pub struct RemoveMembershipsResponse {
        1 => memberships: Vec<Value>,
    }
}

pblite_message! {
    pub struct SetMarkAsUnreadTimestampRequest {
        1 => request_header: Option<RequestHeader>,
        2 => group_id: Option<GroupId>,
        3 => mark_as_unread_timestamp_usec: Option<i64>,
    }
}

pblite_message! {
    pub struct SetMarkAsUnreadTimestampResponse {
        1 => group_read_state: Option<Value>,
    }
}

pblite_message! {
    pub struct CreateDmExtendedRequest {
        1 => request_header: Option<RequestHeader>,
        2 => members: Vec<MemberId>,
        3 => retention_settings: Option<Value>,
    }
}

pblite_message! {
    pub struct CreateDmExtendedResponse {
        1 => dm: Option<Value>,
        2 => memberships: Vec<Value>,
    }
}

/// Requests that carry the common request header.
pub trait HasRequestHeader {
    fn request_header_mut(&mut self) -> &mut Option<RequestHeader>;
}

macro_rules! has_request_header {
    ($($message:ty),* $(,)?) => {
        $(
            impl HasRequestHeader for $message {
                fn request_header_mut(&mut self) -> &mut Option<RequestHeader> {
                    &mut self.request_header
                }
            }
        )*
    };
}

has_request_header!(
    StreamEventsRequest,
    PaginatedWorldRequest,
    CreateTopicRequest,
    UpdateReactionRequest,
    ListTopicsRequest,
    GetSelfUserStatusRequest,
    GetMembersRequest,
    ListMembersRequest,
    GetGroupRequest,
    DeleteMessageRequest,
    EditMessageRequest,
    CreateGroupRequest,
    CreateMembershipRequest,
    RemoveMembershipsRequest,
    SetMarkAsUnreadTimestampRequest,
    CreateDmExtendedRequest,
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn initial_ping_matches_wire_layout() {
        let request = StreamEventsRequest {
            ping_event: Some(PingEvent::initial()),
            ..Default::default()
        };
        assert_eq!(
            pblite::to_value(&request),
            json!([null, [2, null, null, null, 3, 1, null, null, true]])
        );
    }

    #[test_timeout::timeout]
    fn default_capabilities_round_trip() {
        let caps = ClientFeatureCapabilities::default();
        assert_eq!(caps.get(5), Some(2));
        assert_eq!(caps.get(30), Some(0));
        assert_eq!(caps.get(1), None);
        let encoded = pblite::Field::encode_field(&caps);
        let decoded: ClientFeatureCapabilities = pblite::Field::decode_field(&encoded).unwrap();
        assert_eq!(decoded, caps);
    }

    #[test_timeout::timeout]
    fn event_decodes_inline_and_embedded_bodies() {
        let raw = json!([
            [["space-1"]],
            null,
            ["user-7"],
            6,
            [6, [["msg-1"], "hi"]],
            [[18, null, null, [1]], [99]],
            null,
            "1700000000000000"
        ]);
        let event: Event = pblite::from_value(&raw).unwrap();
        assert_eq!(event.group_id.as_ref().and_then(GroupId::routing_id), Some("space-1"));
        assert_eq!(event.event_type, Some(EventType::MessagePosted));
        assert_eq!(event.body.as_ref().and_then(EventBody::kind), Some("message_posted"));
        assert_eq!(event.bodies.len(), 2);
        assert_eq!(event.bodies[0].event_type, Some(EventType::TypingStateChanged));
        assert_eq!(event.bodies[1].event_type, Some(EventType::Unrecognized(99)));
        assert_eq!(event.timestamp_usec, Some(1_700_000_000_000_000));
    }

    #[test_timeout::timeout]
    fn group_fetch_options_encode_as_numbers() {
        let request = GetGroupRequest {
            group_id: Some(GroupId::space("AAA")),
            fetch_options: vec![GetGroupFetchOption::Members],
            ..Default::default()
        };
        assert_eq!(pblite::to_value(&request), json!([null, [["AAA"]], [1]]));
    }

    #[test_timeout::timeout]
    fn routing_id_prefers_the_space() {
        assert_eq!(GroupId::space("AAA").routing_id(), Some("AAA"));
        assert_eq!(GroupId::dm("dm-1").routing_id(), Some("dm-1"));
        assert_eq!(GroupId::default().routing_id(), None);
    }
}
