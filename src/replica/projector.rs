//! Projection rules: the total fold of account events into the replica state.
//!
//! Every rule either mutates state or drops the event; nothing here returns an error
//! or panics, since a live event stream cannot be rolled back. Content that cannot be
//! applied is logged at debug level and skipped.

use itertools::Itertools;

use crate::*;
use crate::collections::InsertMode;

use super::*;

#[cfg(test)]
#[path = "projector_tests.rs"]
mod tests;

impl ReplicaState {
    /// Projects one event, returning whatever deferred work the rule produced.
    pub fn apply(&mut self, event: &AccountEvent) -> Vec<SideEffect> {
        use AccountEvent::*;
        match event {
            ConnectionUpdate(partial) => self.connection_state.merge_from(partial),
            MessagingHistorySet(history) => self.apply_history_set(history),
            ContactsUpsert(contacts) => self.apply_contacts_upsert(contacts),
            ContactsUpdate(updates) => return self.apply_contacts_update(updates),
            ChatsUpsert(chats) => self.apply_chats_upsert(chats),
            ChatsUpdate(updates) => self.apply_chats_update(updates),
            ChatsDelete(ids) => self.apply_chats_delete(ids),
            MessagesUpsert(upsert) => self.apply_messages_upsert(&upsert.messages, upsert.upsert_type),
            MessagesUpdate(updates) => self.apply_messages_update(updates),
            MessagesDelete(delete) => self.apply_messages_delete(delete),
            MessageReceiptUpdate(updates) => self.apply_receipt_updates(updates),
            MessagesReaction(updates) => self.apply_reaction_updates(updates),
            PresenceUpdate(update) => self.apply_presence_update(update),
            GroupsUpsert(groups) => self.apply_groups_upsert(groups),
            GroupsUpdate(updates) => self.apply_groups_update(updates),
            GroupParticipantsUpdate(update) => self.apply_group_participants_update(update),
            LabelsEdit(label) => self.apply_labels_edit(label),
            LabelsAssociation(event) => self.apply_labels_association(event),
        }
        vec![]
    }

    //
    // History sync
    //

    fn apply_history_set(&mut self, history: &MessagingHistorySet) {
        if history.sync_type_option == Some(HistorySyncType::OnDemand) {
            log::debug!("Ignoring on-demand history sync of {} messages", history.messages.len());
            return;
        }
        if history.is_latest {
            self.chats.clear();
            self.contacts.clear();
            self.messages.clear();
            log::debug!("Cleared state before applying latest history sync");
        }
        self.apply_chats_upsert(&history.chats);
        self.apply_contacts_upsert(&history.contacts);
        self.apply_messages_upsert(&history.messages, MessageUpsertType::Append);
        log::debug!("Synced {} chats, {} contacts, {} messages (latest: {})",
                    history.chats.len(), history.contacts.len(), history.messages.len(), history.is_latest);
    }

    //
    // Contacts
    //

    fn apply_contacts_upsert(&mut self, contacts: &[Contact]) {
        for contact in contacts {
            if contact.id.is_empty() {
                log::debug!("Dropping contact upsert with no id");
                continue;
            }
            match self.contacts.get_mut(&contact.id) {
                Some(stored) => stored.merge_from(contact),
                None => {
                    self.contacts.insert(contact.id.clone(), contact.clone());
                }
            }
        }
    }

    fn apply_contacts_update(&mut self, updates: &[Contact]) -> Vec<SideEffect> {
        let mut effects = vec![];
        for update in updates {
            let Some(target_id) = self.resolve_contact_id(&update.id) else {
                log::debug!("Contact update for unknown id {} dropped", update.id);
                continue;
            };
            let mut update = update.clone();
            match update.img_url_option.as_deref() {
                Some(IMG_URL_REMOVED) => {
                    update.img_url_option = None;
                    if let Some(stored) = self.contacts.get_mut(&target_id) {
                        stored.img_url_option = None;
                    }
                }
                Some(IMG_URL_CHANGED) => {
                    // The refreshed URL arrives through a side effect; until then (and
                    // whenever no socket is configured) the image is simply unset.
                    update.img_url_option = None;
                    if let Some(stored) = self.contacts.get_mut(&target_id) {
                        stored.img_url_option = None;
                    }
                    effects.push(SideEffect::RefreshProfilePicture { jid: target_id.clone() });
                }
                _ => {}
            }
            if let Some(stored) = self.contacts.get_mut(&target_id) {
                stored.merge_from(&update);
            }
        }
        effects
    }

    /// Direct lookup, falling back to matching a hashed jid when the incoming id
    /// looks like one. An ambiguous hash match resolves to nothing.
    fn resolve_contact_id(&self, id: &str) -> Option<String> {
        if id.is_empty() {
            return None;
        }
        if self.contacts.contains_key(id) {
            return Some(id.to_owned());
        }
        if !looks_like_hashed_jid(id) {
            return None;
        }
        self.contacts.keys()
            .filter(|stored_id| hashed_jid(stored_id) == id)
            .exactly_one()
            .ok()
            .cloned()
    }

    //
    // Chats
    //

    fn apply_chats_upsert(&mut self, chats: &[Chat]) {
        for chat in chats {
            if chat.id.is_empty() {
                log::debug!("Dropping chat upsert with no id");
                continue;
            }
            let merged = self.chats.update_with(&chat.id, |stored| stored.merge_from(chat));
            if !merged {
                self.chats.upsert(chat.clone(), InsertMode::Append);
            }
        }
    }

    fn apply_chats_update(&mut self, updates: &[Chat]) {
        for update in updates {
            let applied = self.chats.update_with(&update.id, |stored| {
                let mut update = update.clone();
                if let Some(incoming) = update.unread_count_option.take() {
                    // Positive counts accumulate, zero or negative ones overwrite.
                    stored.unread_count_option = Some(if incoming > 0 {
                        stored.unread_count_option.unwrap_or(0).saturating_add(incoming)
                    } else {
                        incoming
                    });
                }
                stored.merge_from(&update);
            });
            if !applied {
                log::debug!("Chat update for unknown id {} dropped", update.id);
            }
        }
    }

    fn apply_chats_delete(&mut self, ids: &[String]) {
        for id in ids {
            // Messages are intentionally left behind; only the chat entry goes away.
            self.chats.remove_by_id(id);
        }
    }

    //
    // Messages
    //

    fn apply_messages_upsert(&mut self, messages: &[Message], upsert_type: MessageUpsertType) {
        let mode = match upsert_type {
            MessageUpsertType::Prepend => InsertMode::Prepend,
            MessageUpsertType::Append | MessageUpsertType::Notify => InsertMode::Append,
        };
        for message in messages {
            if message.key.remote_jid.is_empty() || message.key.id.is_empty() {
                log::debug!("Dropping message upsert with incomplete key {}", message.key);
                continue;
            }
            let jid = message.key.remote_jid.clone();
            self.messages.entry(jid.clone())
                .or_insert_with(ReplicaState::new_message_dictionary)
                .upsert(message.clone(), mode);
            if upsert_type == MessageUpsertType::Notify && !self.chats.contains(&jid) {
                let mut chat = Chat::new(jid);
                chat.unread_count_option = Some(0);
                self.chats.upsert(chat, InsertMode::Append);
            }
        }
    }

    fn apply_messages_update(&mut self, updates: &[MessageUpdate]) {
        for MessageUpdate { key, update } in updates {
            let Some(dict) = self.messages.get_mut(&key.remote_jid) else {
                log::debug!("Message update for unknown chat {} dropped", key.remote_jid);
                continue;
            };
            let applied = dict.update_with(&key.id, |message| {
                let mut update = update.clone();
                if let (Some(incoming), Some(stored)) = (update.status_option, message.status_option) {
                    if incoming <= stored {
                        // Status never regresses; the rest of the update still applies.
                        update.status_option = None;
                    }
                }
                message.apply_patch(&update);
            });
            if !applied {
                log::debug!("Message update for unknown message {key} dropped");
            }
        }
    }

    fn apply_messages_delete(&mut self, delete: &MessagesDelete) {
        match delete {
            MessagesDelete::ByKeys { keys } => {
                for key in keys {
                    if let Some(dict) = self.messages.get_mut(&key.remote_jid) {
                        dict.remove_by_id(&key.id);
                    }
                }
            }
            MessagesDelete::AllForJid { jid, all: true } => {
                // The per-jid dictionary entry stays; empty and missing read the same.
                if let Some(dict) = self.messages.get_mut(jid) {
                    dict.clear();
                }
            }
            MessagesDelete::AllForJid { jid, all: false } => {
                log::debug!("Ignoring messages.delete for {jid} with all = false");
            }
        }
    }

    fn apply_receipt_updates(&mut self, updates: &[MessageReceiptUpdate]) {
        for MessageReceiptUpdate { key, receipt } in updates {
            if receipt.user_jid.is_empty() {
                log::debug!("Dropping receipt with no user jid for {key}");
                continue;
            }
            let Some(dict) = self.messages.get_mut(&key.remote_jid) else { continue };
            dict.update_with(&key.id, |message| {
                match message.user_receipt.iter_mut().find(|r| r.user_jid == receipt.user_jid) {
                    Some(stored) => stored.merge_from(receipt),
                    None => message.user_receipt.push(receipt.clone()),
                }
            });
        }
    }

    fn apply_reaction_updates(&mut self, updates: &[MessageReactionUpdate]) {
        for MessageReactionUpdate { key, reaction } in updates {
            let Some(author) = reaction.author().map(str::to_owned) else {
                log::debug!("Dropping reaction with no key for {key}");
                continue;
            };
            let Some(dict) = self.messages.get_mut(&key.remote_jid) else { continue };
            dict.update_with(&key.id, |message| {
                message.reactions.retain(|r| r.author() != Some(author.as_str()));
                if !reaction.is_removal() {
                    message.reactions.push(reaction.clone());
                }
            });
        }
    }

    //
    // Presence
    //

    fn apply_presence_update(&mut self, update: &PresenceUpdate) {
        self.presences.entry(update.id.clone())
            .or_default()
            .extend(update.presences.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    //
    // Groups
    //

    fn apply_groups_upsert(&mut self, groups: &[GroupMetadata]) {
        for group in groups {
            if group.id.is_empty() {
                log::debug!("Dropping group upsert with no id");
                continue;
            }
            self.group_metadata.insert(group.id.clone(), group.clone());
        }
    }

    fn apply_groups_update(&mut self, updates: &[GroupMetadataUpdate]) {
        for update in updates {
            match self.group_metadata.get_mut(&update.id) {
                Some(meta) => update.apply_to(meta),
                None => log::debug!("Group update for unknown id {} dropped", update.id),
            }
        }
    }

    fn apply_group_participants_update(&mut self, update: &GroupParticipantsUpdate) {
        let Some(meta) = self.group_metadata.get_mut(&update.id) else {
            log::debug!("Participants update for unknown group {} dropped", update.id);
            return;
        };
        match update.action {
            ParticipantAction::Add => {
                for id in &update.participants {
                    if !meta.participants.iter().any(|p| p.id == *id) {
                        meta.participants.push(GroupParticipant::new(id.clone()));
                    }
                }
            }
            ParticipantAction::Remove =>
                meta.participants.retain(|p| !update.participants.contains(&p.id)),
            ParticipantAction::Promote | ParticipantAction::Demote => {
                let promote = update.action == ParticipantAction::Promote;
                for participant in meta.participants.iter_mut() {
                    if update.participants.contains(&participant.id) {
                        participant.is_admin = promote;
                    }
                }
            }
            ParticipantAction::Other =>
                log::debug!("Unrecognized participants action for group {} ignored", update.id),
        }
    }

    //
    // Labels
    //

    fn apply_labels_edit(&mut self, label: &Label) {
        if label.deleted {
            self.labels.delete_by_id(&label.id);
            return;
        }
        if self.labels.find_by_id(&label.id).is_none() {
            let non_deleted = self.labels.find_all().iter().filter(|l| !l.deleted).count();
            if non_deleted >= MAX_LABELS {
                log::debug!("Label cap of {MAX_LABELS} reached, dropping new label {}", label.id);
                return;
            }
        }
        self.labels.upsert_by_id(&label.id, label);
    }

    fn apply_labels_association(&mut self, event: &LabelsAssociation) {
        match event.op {
            AssociationOp::Add =>
                self.label_associations.upsert(event.association.clone(), InsertMode::Append),
            AssociationOp::Remove => {
                self.label_associations.remove_by_id(&event.association.key());
            }
            AssociationOp::Other =>
                log::error!("Unrecognized label association operation ignored"),
        }
    }
}
