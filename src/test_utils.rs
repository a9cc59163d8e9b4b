use chrono::*;
use lazy_static::lazy_static;
use serde_json::json;

use crate::prelude::*;

lazy_static! {
    pub static ref BASE_DATE: DateTime<FixedOffset> = dt("2024-03-01 10:00:00", None);
}

pub fn dt(s: &str, offset: Option<&FixedOffset>) -> DateTime<FixedOffset> {
    let local = Local::now();
    let offset = offset.unwrap_or(local.offset());
    offset.from_local_datetime(&NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()).unwrap()
}

pub fn try_init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn user_jid(name: &str) -> String {
    format!("{name}{WHATSAPP_USER_SUFFIX}")
}

pub fn group_jid(name: &str) -> String {
    format!("{name}{WHATSAPP_GROUP_SUFFIX}")
}

pub fn create_chat(id: &str) -> Chat {
    Chat {
        id: id.to_owned(),
        name_option: Some(format!("Chat {id}")),
        conversation_timestamp_option: Some(BASE_DATE.timestamp()),
        ..Default::default()
    }
}

pub fn create_contact(id: &str, name: &str) -> Contact {
    Contact {
        id: id.to_owned(),
        name_option: Some(name.to_owned()),
        notify_option: Some(name.to_owned()),
        ..Default::default()
    }
}

/// A regular incoming message, `idx` minutes after the base date.
pub fn create_message(jid: &str, id: &str, idx: i64) -> Message {
    Message {
        key: MessageKey::new(jid, id, false),
        message_timestamp_option: Some((*BASE_DATE + Duration::minutes(idx)).timestamp()),
        message_option: Some(json!({ "conversation": format!("Hello there, {idx}!") })),
        ..Default::default()
    }
}

pub fn create_label(id: &str, name: &str) -> Label {
    Label {
        id: id.to_owned(),
        name: name.to_owned(),
        color: 1,
        deleted: false,
        predefined_id_option: None,
    }
}

pub fn create_group(id: &str, participant_ids: &[&str]) -> GroupMetadata {
    GroupMetadata {
        id: id.to_owned(),
        subject: format!("Group {id}"),
        creation_option: Some(BASE_DATE.timestamp()),
        participants: participant_ids.iter().map(|&id| GroupParticipant::new(id)).collect(),
        ..Default::default()
    }
}

/// Applies every event in order to a fresh default replica and returns it.
pub fn replay(events: &[AccountEvent]) -> Replica {
    let replica = Replica::new(ReplicaOptions::default());
    for event in events {
        replica.apply(event);
    }
    replica
}
