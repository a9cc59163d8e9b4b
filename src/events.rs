use serde::{Deserialize, Serialize};

use crate::*;

/// One event on an upstream account stream. Serde names match the upstream stream names,
/// so a recorded event log round-trips as `{"event": "...", "payload": ...}` objects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum AccountEvent {
    #[serde(rename = "connection.update")]
    ConnectionUpdate(ConnectionState),
    #[serde(rename = "messaging-history.set")]
    MessagingHistorySet(MessagingHistorySet),
    #[serde(rename = "contacts.upsert")]
    ContactsUpsert(Vec<Contact>),
    #[serde(rename = "contacts.update")]
    ContactsUpdate(Vec<Contact>),
    #[serde(rename = "chats.upsert")]
    ChatsUpsert(Vec<Chat>),
    #[serde(rename = "chats.update")]
    ChatsUpdate(Vec<Chat>),
    #[serde(rename = "chats.delete")]
    ChatsDelete(Vec<String>),
    #[serde(rename = "messages.upsert")]
    MessagesUpsert(MessagesUpsert),
    #[serde(rename = "messages.update")]
    MessagesUpdate(Vec<MessageUpdate>),
    #[serde(rename = "messages.delete")]
    MessagesDelete(MessagesDelete),
    #[serde(rename = "message-receipt.update")]
    MessageReceiptUpdate(Vec<MessageReceiptUpdate>),
    #[serde(rename = "messages.reaction")]
    MessagesReaction(Vec<MessageReactionUpdate>),
    #[serde(rename = "presence.update")]
    PresenceUpdate(PresenceUpdate),
    #[serde(rename = "groups.upsert")]
    GroupsUpsert(Vec<GroupMetadata>),
    #[serde(rename = "groups.update")]
    GroupsUpdate(Vec<GroupMetadataUpdate>),
    #[serde(rename = "group-participants.update")]
    GroupParticipantsUpdate(GroupParticipantsUpdate),
    #[serde(rename = "labels.edit")]
    LabelsEdit(Label),
    #[serde(rename = "labels.association")]
    LabelsAssociation(LabelsAssociation),
}

impl AccountEvent {
    /// The upstream stream name this event arrived on.
    pub fn stream_name(&self) -> &'static str {
        use AccountEvent::*;
        match self {
            ConnectionUpdate(_) => "connection.update",
            MessagingHistorySet(_) => "messaging-history.set",
            ContactsUpsert(_) => "contacts.upsert",
            ContactsUpdate(_) => "contacts.update",
            ChatsUpsert(_) => "chats.upsert",
            ChatsUpdate(_) => "chats.update",
            ChatsDelete(_) => "chats.delete",
            MessagesUpsert(_) => "messages.upsert",
            MessagesUpdate(_) => "messages.update",
            MessagesDelete(_) => "messages.delete",
            MessageReceiptUpdate(_) => "message-receipt.update",
            MessagesReaction(_) => "messages.reaction",
            PresenceUpdate(_) => "presence.update",
            GroupsUpsert(_) => "groups.upsert",
            GroupsUpdate(_) => "groups.update",
            GroupParticipantsUpdate(_) => "group-participants.update",
            LabelsEdit(_) => "labels.edit",
            LabelsAssociation(_) => "labels.association",
        }
    }
}

/// Kind of a history sync payload, by upstream ordinal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistorySyncType {
    InitialBootstrap = 0,
    InitialStatusV3 = 1,
    Full = 2,
    Recent = 3,
    PushName = 4,
    NonBlockingData = 5,
    OnDemand = 6,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessagingHistorySet {
    pub chats: Vec<Chat>,
    pub contacts: Vec<Contact>,
    pub messages: Vec<Message>,
    /// When set, the payload is the freshest account snapshot and existing state is reset first.
    pub is_latest: bool,
    #[serde(rename = "syncType", skip_serializing_if = "Option::is_none")]
    pub sync_type_option: Option<HistorySyncType>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageUpsertType {
    #[default]
    Append,
    Prepend,
    /// A live incoming message; appends, and synthesizes the chat if it doesn't exist yet.
    Notify,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesUpsert {
    pub messages: Vec<Message>,
    #[serde(rename = "type")]
    pub upsert_type: MessageUpsertType,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdate {
    pub key: MessageKey,
    pub update: MessagePatch,
}

/// Either a list of message keys, or everything in a single chat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagesDelete {
    ByKeys { keys: Vec<MessageKey> },
    AllForJid { jid: String, all: bool },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceiptUpdate {
    pub key: MessageKey,
    pub receipt: UserReceipt,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReactionUpdate {
    pub key: MessageKey,
    pub reaction: Reaction,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub id: String,
    /// Participant jid to presence data; merged entry-wise into the stored map.
    pub presences: HashMap<String, PresenceData>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupParticipantsUpdate {
    pub id: String,
    #[serde(default)]
    pub author: String,
    pub participants: Vec<String>,
    pub action: ParticipantAction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationOp {
    Add,
    Remove,
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelsAssociation {
    #[serde(rename = "type")]
    pub op: AssociationOp,
    pub association: LabelAssociation,
}
