use std::fmt::{Display, Formatter};
use std::hash::Hasher;

use derive_deref::Deref;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::*;

#[cfg(test)]
#[path = "entities_tests.rs"]
mod tests;

pub const WHATSAPP_USER_SUFFIX: &str = "@s.whatsapp.net";
pub const WHATSAPP_GROUP_SUFFIX: &str = "@g.us";

/// Non-deleted labels an account may hold, as enforced upstream.
pub const MAX_LABELS: usize = 20;

pub fn is_group_jid(jid: &str) -> bool {
    jid.ends_with(WHATSAPP_GROUP_SUFFIX)
}

/// Deterministic 16-hex-digit digest of a jid (FNV-1a 64).
/// Some upstream contact updates identify the target by this digest instead of the jid itself.
pub fn hashed_jid(jid: &str) -> String {
    let mut hasher = hashers::fnv::FNV1aHasher64::default();
    hasher.write(jid.as_bytes());
    format!("{:016x}", hasher.finish())
}

pub fn looks_like_hashed_jid(id: &str) -> bool {
    id.len() == 16 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

//
// Chat
//

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    #[serde(rename = "name", skip_serializing_if = "Option::is_none")]
    pub name_option: Option<String>,
    #[serde(rename = "unreadCount", skip_serializing_if = "Option::is_none")]
    pub unread_count_option: Option<i64>,
    /// Epoch seconds of the last conversation activity.
    #[serde(rename = "conversationTimestamp", skip_serializing_if = "Option::is_none")]
    pub conversation_timestamp_option: Option<i64>,
    /// Pin rank; pinned chats sort before unpinned ones.
    #[serde(rename = "pinned", skip_serializing_if = "Option::is_none")]
    pub pinned_option: Option<u32>,
    #[serde(rename = "archived", skip_serializing_if = "Option::is_none")]
    pub archived_option: Option<bool>,
    #[serde(rename = "readOnly", skip_serializing_if = "Option::is_none")]
    pub read_only_option: Option<bool>,
}

impl Chat {
    pub fn new(id: impl Into<String>) -> Self {
        Chat { id: id.into(), ..Default::default() }
    }

    pub fn is_archived(&self) -> bool {
        self.archived_option == Some(true)
    }

    /// Field-wise merge, newer value wins for each field the partial carries.
    /// `id` is never touched. The unread counter accumulation rule is applied by the caller.
    pub fn merge_from(&mut self, newer: &Chat) {
        merge_field(&mut self.name_option, &newer.name_option);
        merge_field(&mut self.unread_count_option, &newer.unread_count_option);
        merge_field(&mut self.conversation_timestamp_option, &newer.conversation_timestamp_option);
        merge_field(&mut self.pinned_option, &newer.pinned_option);
        merge_field(&mut self.archived_option, &newer.archived_option);
        merge_field(&mut self.read_only_option, &newer.read_only_option);
    }
}

//
// Contact
//

/// Sentinel carried by `contacts.update` when the profile image was removed upstream.
pub const IMG_URL_REMOVED: &str = "removed";
/// Sentinel carried by `contacts.update` when the profile image changed and must be re-fetched.
pub const IMG_URL_CHANGED: &str = "changed";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    #[serde(rename = "name", skip_serializing_if = "Option::is_none")]
    pub name_option: Option<String>,
    /// Push name, self-assigned by the contact.
    #[serde(rename = "notify", skip_serializing_if = "Option::is_none")]
    pub notify_option: Option<String>,
    #[serde(rename = "verifiedName", skip_serializing_if = "Option::is_none")]
    pub verified_name_option: Option<String>,
    #[serde(rename = "imgUrl", skip_serializing_if = "Option::is_none")]
    pub img_url_option: Option<String>,
    #[serde(rename = "status", skip_serializing_if = "Option::is_none")]
    pub status_option: Option<String>,
    #[serde(rename = "businessProfile", skip_serializing_if = "Option::is_none")]
    pub business_profile_option: Option<Value>,
}

impl Contact {
    pub fn new(id: impl Into<String>) -> Self {
        Contact { id: id.into(), ..Default::default() }
    }

    /// Field-wise merge, `id` excluded. The `imgUrl` sentinels are interpreted by the caller,
    /// so here a present value (sentinels included) simply wins.
    pub fn merge_from(&mut self, newer: &Contact) {
        merge_field(&mut self.name_option, &newer.name_option);
        merge_field(&mut self.notify_option, &newer.notify_option);
        merge_field(&mut self.verified_name_option, &newer.verified_name_option);
        merge_field(&mut self.img_url_option, &newer.img_url_option);
        merge_field(&mut self.status_option, &newer.status_option);
        merge_field(&mut self.business_profile_option, &newer.business_profile_option);
    }

    pub fn pretty_name(&self) -> &str {
        self.name_option.as_deref()
            .or(self.verified_name_option.as_deref())
            .or(self.notify_option.as_deref())
            .unwrap_or(&self.id)
    }
}

//
// Message
//

/// Delivery progress of a message; ordinals only ever advance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive)]
pub enum MessageStatus {
    Error = 0,
    Pending = 1,
    ServerAck = 2,
    DeliveryAck = 3,
    Read = 4,
    Played = 5,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageKey {
    pub remote_jid: String,
    pub from_me: bool,
    pub id: String,
    #[serde(rename = "participant", skip_serializing_if = "Option::is_none")]
    pub participant_option: Option<String>,
}

impl MessageKey {
    pub fn new(remote_jid: impl Into<String>, id: impl Into<String>, from_me: bool) -> Self {
        MessageKey { remote_jid: remote_jid.into(), id: id.into(), from_me, participant_option: None }
    }

    /// Stable identifier of whoever the key attributes its message to.
    pub fn author(&self) -> &str {
        if self.from_me {
            "me"
        } else {
            self.participant_option.as_deref().unwrap_or(&self.remote_jid)
        }
    }
}

impl Display for MessageKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.remote_jid, self.id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserReceipt {
    pub user_jid: String,
    #[serde(rename = "receiptTimestamp", skip_serializing_if = "Option::is_none")]
    pub receipt_timestamp_option: Option<i64>,
    #[serde(rename = "readTimestamp", skip_serializing_if = "Option::is_none")]
    pub read_timestamp_option: Option<i64>,
    #[serde(rename = "playedTimestamp", skip_serializing_if = "Option::is_none")]
    pub played_timestamp_option: Option<i64>,
}

impl UserReceipt {
    /// Later receipt for the same user supersedes the earlier one, field by field.
    pub fn merge_from(&mut self, newer: &UserReceipt) {
        merge_field(&mut self.receipt_timestamp_option, &newer.receipt_timestamp_option);
        merge_field(&mut self.read_timestamp_option, &newer.read_timestamp_option);
        merge_field(&mut self.played_timestamp_option, &newer.played_timestamp_option);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Reaction {
    /// Key of the reaction itself; identifies the reacting author.
    #[serde(rename = "key", skip_serializing_if = "Option::is_none")]
    pub key_option: Option<MessageKey>,
    #[serde(rename = "text", skip_serializing_if = "Option::is_none")]
    pub text_option: Option<String>,
    #[serde(rename = "senderTimestampMs", skip_serializing_if = "Option::is_none")]
    pub sender_timestamp_ms_option: Option<i64>,
}

impl Reaction {
    pub fn author(&self) -> Option<&str> {
        self.key_option.as_ref().map(|k| k.author())
    }

    pub fn is_removal(&self) -> bool {
        self.text_option.as_deref().map_or(true, str::is_empty)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Message {
    pub key: MessageKey,
    /// Epoch seconds.
    #[serde(rename = "messageTimestamp", skip_serializing_if = "Option::is_none")]
    pub message_timestamp_option: Option<i64>,
    #[serde(rename = "pushName", skip_serializing_if = "Option::is_none")]
    pub push_name_option: Option<String>,
    /// Opaque message content, passed through as-is.
    #[serde(rename = "message", skip_serializing_if = "Option::is_none")]
    pub message_option: Option<Value>,
    /// Raw `MessageStatus` ordinal.
    #[serde(rename = "status", skip_serializing_if = "Option::is_none")]
    pub status_option: Option<i32>,
    #[serde(rename = "starred", skip_serializing_if = "Option::is_none")]
    pub starred_option: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_receipt: Vec<UserReceipt>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
}

impl Message {
    pub fn status(&self) -> Option<MessageStatus> {
        self.status_option.and_then(num_traits::FromPrimitive::from_i32)
    }

    /// Applies every field the patch carries. Status monotonicity is the caller's concern.
    pub fn apply_patch(&mut self, patch: &MessagePatch) {
        merge_field(&mut self.message_timestamp_option, &patch.message_timestamp_option);
        merge_field(&mut self.push_name_option, &patch.push_name_option);
        merge_field(&mut self.message_option, &patch.message_option);
        merge_field(&mut self.status_option, &patch.status_option);
        merge_field(&mut self.starred_option, &patch.starred_option);
    }
}

/// Partial message, as carried by `messages.update`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessagePatch {
    #[serde(rename = "messageTimestamp", skip_serializing_if = "Option::is_none")]
    pub message_timestamp_option: Option<i64>,
    #[serde(rename = "pushName", skip_serializing_if = "Option::is_none")]
    pub push_name_option: Option<String>,
    #[serde(rename = "message", skip_serializing_if = "Option::is_none")]
    pub message_option: Option<Value>,
    #[serde(rename = "status", skip_serializing_if = "Option::is_none")]
    pub status_option: Option<i32>,
    #[serde(rename = "starred", skip_serializing_if = "Option::is_none")]
    pub starred_option: Option<bool>,
}

//
// Group metadata
//

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupParticipant {
    pub id: String,
    pub is_admin: bool,
    pub is_super_admin: bool,
}

impl GroupParticipant {
    pub fn new(id: impl Into<String>) -> Self {
        GroupParticipant { id: id.into(), is_admin: false, is_super_admin: false }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupMetadata {
    pub id: String,
    pub subject: String,
    #[serde(rename = "owner", skip_serializing_if = "Option::is_none")]
    pub owner_option: Option<String>,
    /// Epoch seconds of group creation.
    #[serde(rename = "creation", skip_serializing_if = "Option::is_none")]
    pub creation_option: Option<i64>,
    #[serde(rename = "desc", skip_serializing_if = "Option::is_none")]
    pub desc_option: Option<String>,
    /// Only admins may send messages.
    #[serde(rename = "announce", skip_serializing_if = "Option::is_none")]
    pub announce_option: Option<bool>,
    /// Only admins may edit group info.
    #[serde(rename = "restrict", skip_serializing_if = "Option::is_none")]
    pub restrict_option: Option<bool>,
    pub participants: Vec<GroupParticipant>,
}

/// Partial group metadata, as carried by `groups.update`. Participants are only ever
/// changed through `group-participants.update`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupMetadataUpdate {
    pub id: String,
    #[serde(rename = "subject", skip_serializing_if = "Option::is_none")]
    pub subject_option: Option<String>,
    #[serde(rename = "owner", skip_serializing_if = "Option::is_none")]
    pub owner_option: Option<String>,
    #[serde(rename = "desc", skip_serializing_if = "Option::is_none")]
    pub desc_option: Option<String>,
    #[serde(rename = "announce", skip_serializing_if = "Option::is_none")]
    pub announce_option: Option<bool>,
    #[serde(rename = "restrict", skip_serializing_if = "Option::is_none")]
    pub restrict_option: Option<bool>,
}

impl GroupMetadataUpdate {
    pub fn apply_to(&self, meta: &mut GroupMetadata) {
        if let Some(subject) = &self.subject_option { meta.subject = subject.clone(); }
        merge_field(&mut meta.owner_option, &self.owner_option);
        merge_field(&mut meta.desc_option, &self.desc_option);
        merge_field(&mut meta.announce_option, &self.announce_option);
        merge_field(&mut meta.restrict_option, &self.restrict_option);
    }
}

//
// Labels
//

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Label {
    pub id: String,
    pub name: String,
    pub color: i32,
    pub deleted: bool,
    #[serde(rename = "predefinedId", skip_serializing_if = "Option::is_none")]
    pub predefined_id_option: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LabelAssociation {
    #[serde(rename = "chat", rename_all = "camelCase")]
    Chat { chat_id: String, label_id: String },
    #[serde(rename = "message", rename_all = "camelCase")]
    Message { chat_id: String, message_id: String, label_id: String },
}

impl LabelAssociation {
    /// Unique key of the association, doubling as its sort key.
    pub fn key(&self) -> String {
        match self {
            LabelAssociation::Chat { chat_id, label_id } =>
                format!("{chat_id}{label_id}"),
            LabelAssociation::Message { chat_id, message_id, label_id } =>
                format!("{chat_id}{message_id}{label_id}"),
        }
    }

    pub fn chat_id(&self) -> &str {
        match self {
            LabelAssociation::Chat { chat_id, .. } => chat_id,
            LabelAssociation::Message { chat_id, .. } => chat_id,
        }
    }

    pub fn label_id(&self) -> &str {
        match self {
            LabelAssociation::Chat { label_id, .. } => label_id,
            LabelAssociation::Message { label_id, .. } => label_id,
        }
    }

    pub fn message_id_option(&self) -> Option<&str> {
        match self {
            LabelAssociation::Chat { .. } => None,
            LabelAssociation::Message { message_id, .. } => Some(message_id),
        }
    }
}

//
// Presence
//

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    #[default]
    Unavailable,
    Available,
    Composing,
    Recording,
    Paused,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PresenceData {
    pub last_known_presence: Presence,
    /// Epoch seconds of the last time the participant was seen.
    #[serde(rename = "lastSeen", skip_serializing_if = "Option::is_none")]
    pub last_seen_option: Option<i64>,
}

//
// Connection state
//

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connection {
    Connecting,
    Open,
    Close,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionState {
    #[serde(rename = "connection", skip_serializing_if = "Option::is_none")]
    pub connection_option: Option<Connection>,
    #[serde(rename = "qr", skip_serializing_if = "Option::is_none")]
    pub qr_option: Option<String>,
    #[serde(rename = "isOnline", skip_serializing_if = "Option::is_none")]
    pub is_online_option: Option<bool>,
    #[serde(rename = "lastDisconnect", skip_serializing_if = "Option::is_none")]
    pub last_disconnect_option: Option<Value>,
}

impl ConnectionState {
    /// Field-wise merge; fields the partial omits are never cleared.
    pub fn merge_from(&mut self, partial: &ConnectionState) {
        merge_field(&mut self.connection_option, &partial.connection_option);
        merge_field(&mut self.qr_option, &partial.qr_option);
        merge_field(&mut self.is_online_option, &partial.is_online_option);
        merge_field(&mut self.last_disconnect_option, &partial.last_disconnect_option);
    }
}

//
// Chat ordering
//

/// Derived sort key; compared in reverse, so that higher keys order first.
#[derive(Deref, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey(pub String);

/// Derives chat sort keys: pin rank (optional), then archive flag, then last activity,
/// with the chat id as the tiebreaker. Keys compare in reverse lexicographic order,
/// placing pinned chats first and the most recently active chats before the rest.
#[derive(Clone, Copy, Debug)]
pub struct ChatSortKey {
    pin_aware: bool,
}

impl ChatSortKey {
    pub fn pin_aware() -> Self { ChatSortKey { pin_aware: true } }

    /// Chats differing only in pinned state derive equal keys.
    pub fn pin_blind() -> Self { ChatSortKey { pin_aware: false } }

    pub fn is_pin_aware(&self) -> bool { self.pin_aware }

    pub fn key_of(&self, chat: &Chat) -> SortKey {
        let mut key = String::with_capacity(32 + chat.id.len());
        if self.pin_aware {
            match chat.pinned_option {
                Some(rank) => key.push_str(&format!("1{rank:010}")),
                None => key.push('0'),
            }
        }
        key.push(if chat.is_archived() { '0' } else { '1' });
        if let Some(ts) = chat.conversation_timestamp_option {
            key.push_str(&format!("{ts:015}"));
        }
        key.push_str(&chat.id);
        SortKey(key)
    }
}

//
// Helpers
//

/// `merge_field(dst, src)` overwrites `dst` iff `src` carries a value.
pub fn merge_field<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
    if let Some(v) = src {
        *dst = Some(v.clone());
    }
}
