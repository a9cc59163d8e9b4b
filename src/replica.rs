//! The in-memory replica of a single account: projected collections, query surface,
//! and snapshot persistence.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::StreamExt;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::*;
use crate::collections::{InsertMode, ObjectRepository, OrderedDictionary};

pub mod projector;

#[cfg(test)]
#[path = "replica_tests.rs"]
mod tests;

/// On-demand capabilities of the upstream socket. Both calls may suspend and may fail;
/// failures surface as logged absences, never as replica errors.
#[async_trait]
pub trait Socket: Send + Sync {
    async fn profile_picture_url(&self, jid: &str) -> Result<Option<String>>;
    async fn group_metadata(&self, jid: &str) -> Result<Option<GroupMetadata>>;
}

pub struct ReplicaOptions {
    /// Chat ordering mode, pin-aware by default.
    pub chat_key: ChatSortKey,
    /// When present, `contacts.update` profile image changes are re-fetched in the background.
    pub socket_option: Option<Arc<dyn Socket>>,
}

impl Default for ReplicaOptions {
    fn default() -> Self {
        ReplicaOptions { chat_key: ChatSortKey::pin_aware(), socket_option: None }
    }
}

/// All projected collections. Mutated only by the projector (single writer);
/// presences and connection state are transient and excluded from snapshots.
pub struct ReplicaState {
    pub connection_state: ConnectionState,
    pub chats: OrderedDictionary<Chat>,
    pub contacts: HashMap<String, Contact>,
    /// Chat jid to that chat's ordered message dictionary, keyed by message id.
    pub messages: HashMap<String, OrderedDictionary<Message>>,
    pub group_metadata: HashMap<String, GroupMetadata>,
    pub labels: ObjectRepository<Label>,
    pub label_associations: OrderedDictionary<LabelAssociation>,
    /// Chat jid to participant jid to presence.
    pub presences: HashMap<String, HashMap<String, PresenceData>>,
}

impl ReplicaState {
    pub fn new(chat_key: ChatSortKey) -> Self {
        ReplicaState {
            connection_state: ConnectionState::default(),
            chats: OrderedDictionary::new_sorted(
                |c: &Chat| c.id.clone(),
                move |c: &Chat| chat_key.key_of(c).0,
            ),
            contacts: HashMap::new(),
            messages: HashMap::new(),
            group_metadata: HashMap::new(),
            labels: ObjectRepository::new(),
            label_associations: OrderedDictionary::new_sorted(
                |a: &LabelAssociation| a.key(),
                |a: &LabelAssociation| a.key(),
            ),
            presences: HashMap::new(),
        }
    }

    pub(crate) fn new_message_dictionary() -> OrderedDictionary<Message> {
        OrderedDictionary::new(|m: &Message| m.key.id.clone())
    }
}

/// Deferred work a projection rule produced; executed outside the state lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SideEffect {
    RefreshProfilePicture { jid: String },
}

/// Message-window cursor for [`Replica::load_messages`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageCursor {
    Before(MessageKey),
    After(MessageKey),
}

#[derive(Clone)]
pub struct Replica {
    state: Arc<RwLock<ReplicaState>>,
    socket_option: Option<Arc<dyn Socket>>,
}

impl Replica {
    pub fn new(options: ReplicaOptions) -> Self {
        Replica {
            state: Arc::new(RwLock::new(ReplicaState::new(options.chat_key))),
            socket_option: options.socket_option,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ReplicaState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ReplicaState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    //
    // Projection
    //

    /// Projects a single event. Total: malformed content is logged and dropped,
    /// never surfaced as an error.
    pub fn apply(&self, event: &AccountEvent) {
        let effects = self.write_state().apply(event);
        for effect in effects {
            self.dispatch(effect);
        }
    }

    /// Drains the given event stream into this replica on a background task,
    /// projecting events in stream order.
    ///
    /// Must be called within a tokio runtime.
    pub fn bind<S>(&self, source: S) -> tokio::task::JoinHandle<()>
    where S: futures::Stream<Item = AccountEvent> + Send + 'static {
        let replica = self.clone();
        tokio::spawn(async move {
            futures::pin_mut!(source);
            while let Some(event) = source.next().await {
                replica.apply(&event);
            }
        })
    }

    fn dispatch(&self, effect: SideEffect) {
        match effect {
            SideEffect::RefreshProfilePicture { jid } => self.spawn_profile_picture_refresh(jid),
        }
    }

    /// Re-fetches a contact's profile picture in the background and merges the URL back in,
    /// leaving every other field to whatever state has evolved in the meantime.
    fn spawn_profile_picture_refresh(&self, jid: String) {
        let Some(socket) = self.socket_option.clone() else { return };
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::debug!("No async runtime, profile picture of {jid} stays unset");
                return;
            }
        };
        let state = Arc::clone(&self.state);
        handle.spawn(async move {
            match socket.profile_picture_url(&jid).await {
                Ok(Some(url)) => {
                    let mut state = state.write().unwrap_or_else(|e| e.into_inner());
                    if let Some(contact) = state.contacts.get_mut(&jid) {
                        contact.img_url_option = Some(url);
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("Profile picture fetch for {jid} failed: {e}"),
            }
        });
    }

    //
    // Queries
    //

    /// Up to `limit` messages of a chat. Without a cursor, the first `limit` messages
    /// in insertion order. `Before` returns the window immediately preceding the cursor
    /// message; `After` is always empty, mirroring the upstream behavior this replica
    /// is drop-in for. An unknown cursor message yields an empty result.
    pub fn load_messages(&self, jid: &str, limit: usize, cursor_option: Option<&MessageCursor>) -> Vec<Message> {
        let state = self.read_state();
        let Some(dict) = state.messages.get(jid) else { return vec![] };
        match cursor_option {
            None => dict.iter().take(limit).cloned().collect_vec(),
            Some(MessageCursor::Before(key)) => {
                let Some(pos) = dict.position_of(&key.id) else { return vec![] };
                let start = pos.saturating_sub(limit);
                dict.entries()[start..pos].to_vec()
            }
            Some(MessageCursor::After(_)) => vec![],
        }
    }

    pub fn load_message(&self, jid: &str, id: &str) -> Option<Message> {
        self.read_state().messages.get(jid).and_then(|dict| dict.get(id)).cloned()
    }

    pub fn most_recent_message(&self, jid: &str) -> Option<Message> {
        self.read_state().messages.get(jid).and_then(|dict| dict.last()).cloned()
    }

    pub fn fetch_message_receipts(&self, key: &MessageKey) -> Option<Vec<UserReceipt>> {
        self.read_state().messages.get(&key.remote_jid)
            .and_then(|dict| dict.get(&key.id))
            .map(|m| m.user_receipt.clone())
    }

    /// The contact's profile picture URL. A cached URL is returned as-is; a known contact
    /// without one gets the fetched URL cached back; an unknown jid is fetched through
    /// without caching. Fetch failures are logged and yield `None`.
    pub async fn fetch_image_url(&self, jid: &str, socket: &dyn Socket) -> Option<String> {
        let known_contact = {
            let state = self.read_state();
            match state.contacts.get(jid) {
                Some(contact) if contact.img_url_option.is_some() => return contact.img_url_option.clone(),
                Some(_) => true,
                None => false,
            }
        };
        let url_option = match socket.profile_picture_url(jid).await {
            Ok(url_option) => url_option,
            Err(e) => {
                log::warn!("Profile picture fetch for {jid} failed: {e}");
                None
            }
        };
        if known_contact {
            if let Some(url) = &url_option {
                let mut state = self.write_state();
                if let Some(contact) = state.contacts.get_mut(jid) {
                    contact.img_url_option = Some(url.clone());
                }
            }
        }
        url_option
    }

    /// Cached group metadata, or fetched from the socket and cached.
    /// Fetch failures are logged and yield `None`.
    pub async fn fetch_group_metadata(&self, jid: &str, socket: &dyn Socket) -> Option<GroupMetadata> {
        if let Some(meta) = self.read_state().group_metadata.get(jid) {
            return Some(meta.clone());
        }
        match socket.group_metadata(jid).await {
            Ok(Some(meta)) => {
                self.write_state().group_metadata.insert(meta.id.clone(), meta.clone());
                Some(meta)
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Group metadata fetch for {jid} failed: {e}");
                None
            }
        }
    }

    pub fn get_labels(&self) -> Vec<Label> {
        self.read_state().labels.to_vec()
    }

    /// Associations attached to the given chat.
    pub fn get_chat_labels(&self, chat_id: &str) -> Vec<LabelAssociation> {
        self.read_state().label_associations.iter()
            .filter(|a| matches!(a, LabelAssociation::Chat { .. }) && a.chat_id() == chat_id)
            .cloned()
            .collect_vec()
    }

    /// Ids of the labels attached to the given message.
    pub fn get_message_labels(&self, message_id: &str) -> Vec<String> {
        self.read_state().label_associations.iter()
            .filter(|a| a.message_id_option() == Some(message_id))
            .map(|a| a.label_id().to_owned())
            .collect_vec()
    }

    //
    // Read helpers
    //

    pub fn chats(&self) -> Vec<Chat> {
        self.read_state().chats.to_vec()
    }

    pub fn chat(&self, id: &str) -> Option<Chat> {
        self.read_state().chats.get(id).cloned()
    }

    pub fn contact(&self, id: &str) -> Option<Contact> {
        self.read_state().contacts.get(id).cloned()
    }

    pub fn group_metadata(&self, id: &str) -> Option<GroupMetadata> {
        self.read_state().group_metadata.get(id).cloned()
    }

    pub fn presences_of(&self, chat_id: &str) -> HashMap<String, PresenceData> {
        self.read_state().presences.get(chat_id).cloned().unwrap_or_default()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.read_state().connection_state.clone()
    }

    /// Runs read-only logic against the state under the read lock.
    pub fn with_state<T>(&self, f: impl FnOnce(&ReplicaState) -> T) -> T {
        f(&self.read_state())
    }

    //
    // Snapshots
    //

    pub fn to_snapshot(&self) -> Snapshot {
        let state = self.read_state();
        Snapshot {
            chats: state.chats.to_vec(),
            contacts: state.contacts.clone(),
            messages: state.messages.iter()
                .map(|(jid, dict)| (jid.clone(), dict.to_vec()))
                .collect(),
            labels: state.labels.iter()
                .map(|(id, label)| (id.clone(), label.clone()))
                .collect(),
            label_associations: state.label_associations.to_vec(),
        }
    }

    /// Replaces the projected collections with the snapshot's contents.
    /// Transient state (presences, connection) is untouched.
    pub fn apply_snapshot(&self, snapshot: Snapshot) {
        let mut state = self.write_state();
        state.chats.replace_all(snapshot.chats);
        state.contacts = snapshot.contacts;
        state.messages.clear();
        for (jid, messages) in snapshot.messages {
            let mut dict = ReplicaState::new_message_dictionary();
            dict.replace_all(messages);
            state.messages.insert(jid, dict);
        }
        state.labels.clear();
        for (id, label) in &snapshot.labels {
            state.labels.upsert_by_id(id, label);
        }
        state.label_associations.replace_all(snapshot.label_associations);
    }

    /// Writes the snapshot as JSON. I/O failures propagate.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> EmptyRes {
        let path = path.as_ref();
        let snapshot = self.to_snapshot();
        measure(|| -> EmptyRes {
            let mut writer = BufWriter::new(fs::File::create(path)?);
            serde_json::to_writer(&mut writer, &snapshot)?;
            writer.flush()?;
            Ok(())
        }, |_, t| log::debug!("Snapshot written to {} in {t} ms", path.display()))
    }

    /// Restores from a snapshot file. A missing file is a no-op;
    /// any other failure propagates.
    pub fn read_from_file(&self, path: impl AsRef<Path>) -> EmptyRes {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(());
        }
        let snapshot = measure(|| -> Result<Snapshot> {
            let json = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&json)?)
        }, |_, t| log::debug!("Snapshot read from {} in {t} ms", path.display()))?;
        self.apply_snapshot(snapshot);
        Ok(())
    }
}

/// Persistent image of the replica. Tolerates missing top-level fields and ignores
/// unknown ones; `labels` is emitted as a map but accepted in the legacy array form too.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Snapshot {
    pub chats: Vec<Chat>,
    pub contacts: HashMap<String, Contact>,
    pub messages: HashMap<String, Vec<Message>>,
    #[serde(deserialize_with = "labels_map_or_array")]
    pub labels: HashMap<String, Label>,
    pub label_associations: Vec<LabelAssociation>,
}

fn labels_map_or_array<'de, D>(deserializer: D) -> StdResult<HashMap<String, Label>, D::Error>
where D: serde::Deserializer<'de> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MapOrArray {
        Map(HashMap<String, Label>),
        Array(Vec<Label>),
    }
    Ok(match MapOrArray::deserialize(deserializer)? {
        MapOrArray::Map(map) => map,
        MapOrArray::Array(labels) => labels.into_iter().map(|l| (l.id.clone(), l)).collect(),
    })
}
