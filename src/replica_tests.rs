use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use crate::prelude::*;

use super::*;

//
// Fixtures
//

fn replica_with_messages(jid: &str, count: i64) -> Replica {
    let messages = (0..count).map(|i| create_message(jid, &format!("m{i}"), i)).collect();
    replay(&[AccountEvent::MessagesUpsert(MessagesUpsert {
        messages,
        upsert_type: MessageUpsertType::Append,
    })])
}

fn message_ids(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.key.id.as_str()).collect()
}

/// Socket stub counting its calls.
#[derive(Default)]
struct FakeSocket {
    picture_calls: AtomicUsize,
    metadata_calls: AtomicUsize,
    picture_url_option: Option<String>,
    metadata_option: Option<GroupMetadata>,
    fail: bool,
}

#[async_trait]
impl Socket for FakeSocket {
    async fn profile_picture_url(&self, _jid: &str) -> Result<Option<String>> {
        self.picture_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return err!("Socket unavailable");
        }
        Ok(self.picture_url_option.clone())
    }

    async fn group_metadata(&self, _jid: &str) -> Result<Option<GroupMetadata>> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return err!("Socket unavailable");
        }
        Ok(self.metadata_option.clone())
    }
}

//
// Message queries
//

#[test]
fn load_messages_without_cursor_returns_prefix() {
    let replica = replica_with_messages("A", 5);
    assert_eq!(message_ids(&replica.load_messages("A", 3, None)), vec!["m0", "m1", "m2"]);
    assert_eq!(message_ids(&replica.load_messages("A", 100, None)), vec!["m0", "m1", "m2", "m3", "m4"]);
    assert_eq!(replica.load_messages("A", 0, None), vec![]);
    assert_eq!(replica.load_messages("unknown", 3, None), vec![]);
}

#[test]
fn load_messages_before_cursor() {
    let replica = replica_with_messages("A", 5);
    let cursor = MessageCursor::Before(MessageKey::new("A", "m3", false));

    assert_eq!(message_ids(&replica.load_messages("A", 2, Some(&cursor))), vec!["m1", "m2"]);
    assert_eq!(message_ids(&replica.load_messages("A", 100, Some(&cursor))), vec!["m0", "m1", "m2"]);

    let first = MessageCursor::Before(MessageKey::new("A", "m0", false));
    assert_eq!(replica.load_messages("A", 2, Some(&first)), vec![]);
}

#[test]
fn load_messages_after_cursor_is_empty() {
    let replica = replica_with_messages("A", 5);
    let cursor = MessageCursor::After(MessageKey::new("A", "m1", false));
    assert_eq!(replica.load_messages("A", 2, Some(&cursor)), vec![]);
}

#[test]
fn load_messages_with_unknown_cursor_is_empty() {
    let replica = replica_with_messages("A", 5);
    let cursor = MessageCursor::Before(MessageKey::new("A", "missing", false));
    assert_eq!(replica.load_messages("A", 2, Some(&cursor)), vec![]);
}

#[test]
fn load_message_and_most_recent() {
    let replica = replica_with_messages("A", 3);
    assert_eq!(replica.load_message("A", "m1").unwrap().key.id, "m1");
    assert_eq!(replica.load_message("A", "missing"), None);
    assert_eq!(replica.most_recent_message("A").unwrap().key.id, "m2");
    assert_eq!(replica.most_recent_message("unknown"), None);
}

#[test]
fn fetch_message_receipts_of_unknown_message_is_absent() {
    let replica = replica_with_messages("A", 1);
    assert_eq!(replica.fetch_message_receipts(&MessageKey::new("A", "m0", false)), Some(vec![]));
    assert_eq!(replica.fetch_message_receipts(&MessageKey::new("A", "missing", false)), None);
}

//
// Socket-backed fetches
//

#[tokio::test]
async fn fetch_image_url_prefers_cache() {
    let socket = FakeSocket {
        picture_url_option: Some("https://example.com/fetched.jpg".to_owned()),
        ..Default::default()
    };
    let replica = replay(&[AccountEvent::ContactsUpsert(vec![Contact {
        id: "c1".to_owned(),
        img_url_option: Some("https://example.com/cached.jpg".to_owned()),
        ..Default::default()
    }])]);

    let url = replica.fetch_image_url("c1", &socket).await;
    assert_eq!(url, Some("https://example.com/cached.jpg".to_owned()));
    assert_eq!(socket.picture_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fetch_image_url_caches_onto_known_contact() {
    let socket = FakeSocket {
        picture_url_option: Some("https://example.com/fetched.jpg".to_owned()),
        ..Default::default()
    };
    let replica = replay(&[AccountEvent::ContactsUpsert(vec![create_contact("c1", "C")])]);

    let url = replica.fetch_image_url("c1", &socket).await;
    assert_eq!(url, Some("https://example.com/fetched.jpg".to_owned()));
    assert_eq!(replica.contact("c1").unwrap().img_url_option, url);

    // Second call comes from the cache
    replica.fetch_image_url("c1", &socket).await;
    assert_eq!(socket.picture_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fetch_image_url_for_unknown_jid_delegates_without_caching() {
    let socket = FakeSocket {
        picture_url_option: Some("https://example.com/fetched.jpg".to_owned()),
        ..Default::default()
    };
    let replica = new_replica();

    let url = replica.fetch_image_url("stranger", &socket).await;
    assert_eq!(url, Some("https://example.com/fetched.jpg".to_owned()));
    assert_eq!(replica.contact("stranger"), None);
}

#[tokio::test]
async fn fetch_image_url_failure_is_absent() {
    let socket = FakeSocket { fail: true, ..Default::default() };
    let replica = replay(&[AccountEvent::ContactsUpsert(vec![create_contact("c1", "C")])]);

    assert_eq!(replica.fetch_image_url("c1", &socket).await, None);
    assert_eq!(replica.contact("c1").unwrap().img_url_option, None);
}

#[tokio::test]
async fn fetch_group_metadata_caches_fetched_result() {
    let socket = FakeSocket {
        metadata_option: Some(create_group(&group_jid("g1"), &["u1"])),
        ..Default::default()
    };
    let replica = new_replica();
    let jid = group_jid("g1");

    let meta = replica.fetch_group_metadata(&jid, &socket).await.unwrap();
    assert_eq!(meta.id, jid);

    // Now cached, no second socket call
    replica.fetch_group_metadata(&jid, &socket).await.unwrap();
    assert_eq!(socket.metadata_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fetch_group_metadata_failure_is_absent() {
    let socket = FakeSocket { fail: true, ..Default::default() };
    let replica = new_replica();
    assert_eq!(replica.fetch_group_metadata(&group_jid("g1"), &socket).await, None);
}

#[tokio::test]
async fn img_url_changed_with_socket_refetches_in_background() {
    let socket = Arc::new(FakeSocket {
        picture_url_option: Some("https://example.com/refetched.jpg".to_owned()),
        ..Default::default()
    });
    let replica = Replica::new(ReplicaOptions {
        socket_option: Some(socket.clone() as Arc<dyn Socket>),
        ..Default::default()
    });

    replica.apply(&AccountEvent::ContactsUpsert(vec![create_contact("c1", "C")]));
    replica.apply(&AccountEvent::ContactsUpdate(vec![Contact {
        id: "c1".to_owned(),
        img_url_option: Some(IMG_URL_CHANGED.to_owned()),
        ..Default::default()
    }]));

    // The refresh runs as a background task; give it a moment
    for _ in 0..100 {
        tokio::task::yield_now().await;
        if replica.contact("c1").unwrap().img_url_option.is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(replica.contact("c1").unwrap().img_url_option,
               Some("https://example.com/refetched.jpg".to_owned()));
    assert_eq!(socket.picture_calls.load(Ordering::SeqCst), 1);
}

//
// Event stream binding
//

#[tokio::test]
async fn bind_drains_a_stream_in_order() {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let replica = new_replica();
    let handle = replica.bind(tokio_stream(rx));

    tx.send(AccountEvent::ChatsUpsert(vec![create_chat("A")])).unwrap();
    tx.send(AccountEvent::ChatsUpdate(vec![Chat {
        id: "A".to_owned(),
        unread_count_option: Some(2),
        ..Default::default()
    }])).unwrap();
    drop(tx);
    handle.await.unwrap();

    assert_eq!(replica.chat("A").unwrap().unread_count_option, Some(2));
}

fn tokio_stream(rx: tokio::sync::mpsc::UnboundedReceiver<AccountEvent>)
    -> impl futures::Stream<Item = AccountEvent> + Send {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
}

//
// Snapshots
//

fn populated_replica() -> Replica {
    replay(&[
        AccountEvent::ChatsUpsert(vec![create_chat("A"), create_chat("B")]),
        AccountEvent::ContactsUpsert(vec![create_contact("c1", "One"), create_contact("c2", "Two")]),
        AccountEvent::MessagesUpsert(MessagesUpsert {
            messages: vec![
                create_message("A", "m1", 1),
                create_message("A", "m2", 2),
                create_message("B", "m3", 3),
            ],
            upsert_type: MessageUpsertType::Append,
        }),
        AccountEvent::LabelsEdit(create_label("l1", "Family")),
        AccountEvent::LabelsAssociation(LabelsAssociation {
            op: AssociationOp::Add,
            association: LabelAssociation::Chat { chat_id: "A".to_owned(), label_id: "l1".to_owned() },
        }),
        AccountEvent::LabelsAssociation(LabelsAssociation {
            op: AssociationOp::Add,
            association: LabelAssociation::Message {
                chat_id: "A".to_owned(),
                message_id: "m1".to_owned(),
                label_id: "l1".to_owned(),
            },
        }),
    ])
}

#[test]
fn snapshot_roundtrip_preserves_state() {
    let original = populated_replica();
    let snapshot = original.to_snapshot();

    let restored = new_replica();
    restored.apply_snapshot(snapshot.clone());

    assert_eq!(restored.to_snapshot(), snapshot);
    assert_eq!(restored.chats(), original.chats());
    assert_eq!(message_ids(&restored.load_messages("A", 10, None)), vec!["m1", "m2"]);
    assert_eq!(restored.get_labels(), original.get_labels());
    assert_eq!(restored.get_message_labels("m1"), vec!["l1".to_owned()]);
}

#[test]
fn snapshot_json_roundtrip() {
    let original = populated_replica();
    let json = serde_json::to_string(&original.to_snapshot()).unwrap();
    let snapshot: Snapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(snapshot, original.to_snapshot());
}

#[test]
fn snapshot_tolerates_missing_and_unknown_fields() {
    let snapshot: Snapshot = serde_json::from_str(r#"{"unknownField":123}"#).unwrap();
    assert_eq!(snapshot, Snapshot::default());

    let snapshot: Snapshot = serde_json::from_str(r#"{"chats":[{"id":"A"}]}"#).unwrap();
    assert_eq!(snapshot.chats.len(), 1);
    assert!(snapshot.contacts.is_empty());
}

#[test]
fn snapshot_accepts_labels_in_map_or_array_form() {
    let as_map: Snapshot = serde_json::from_str(
        r#"{"labels":{"l1":{"id":"l1","name":"Family","color":1,"deleted":false}}}"#).unwrap();
    let as_array: Snapshot = serde_json::from_str(
        r#"{"labels":[{"id":"l1","name":"Family","color":1,"deleted":false}]}"#).unwrap();
    assert_eq!(as_map, as_array);
    assert_eq!(as_map.labels["l1"].name, "Family");

    // The emitted form is the map
    let json = serde_json::to_string(&as_map).unwrap();
    assert!(json.contains(r#""labels":{"l1""#));
}

#[test]
fn snapshot_file_roundtrip() {
    let path = std::env::temp_dir().join(format!("wa-store-test-{}.json", uuid::Uuid::new_v4()));
    let original = populated_replica();
    original.write_to_file(&path).unwrap();

    let restored = new_replica();
    restored.read_from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(restored.to_snapshot(), original.to_snapshot());
}

#[test]
fn reading_a_missing_snapshot_file_is_a_noop() {
    let path = std::env::temp_dir().join(format!("wa-store-missing-{}.json", uuid::Uuid::new_v4()));
    let replica = populated_replica();
    replica.read_from_file(&path).unwrap();
    assert_eq!(replica.chats().len(), 2);
}

#[test]
fn reading_a_corrupt_snapshot_file_fails() {
    let path = std::env::temp_dir().join(format!("wa-store-corrupt-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, "{not json").unwrap();
    let replica = new_replica();
    assert!(replica.read_from_file(&path).is_err());
    std::fs::remove_file(&path).unwrap();
}
