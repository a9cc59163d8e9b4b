//! Key-value–backed persistence of the signalling credentials a socket needs to
//! resume its session, namespaced by a caller-supplied session key.

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::*;
use crate::codec::{self, Buffer};

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;

/// TTL of the persisted credential blob: two years, in milliseconds.
pub const CREDS_TTL_MS: u64 = 1000 * 60 * 60 * 24 * 365 * 2;

/// Signal key category whose payloads get reconstructed into their typed shape on read.
pub const APP_STATE_SYNC_KEY_TYPE: &str = "app-state-sync-key";

const CREDS_KEY: &str = "creds";

/// Minimal key-value store capability. TTLs are expressed in **milliseconds**.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl_ms_option: Option<u64>) -> EmptyRes;
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Clears the whole keyspace, not any single session's subset.
    async fn clear(&self) -> EmptyRes;
}

/// Reference in-process store honoring TTLs, for tests and embedding.
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, Option<Instant>)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.lock();
        let expired = matches!(entries.get(key),
                               Some((_, Some(deadline))) if *deadline <= Instant::now());
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl_ms_option: Option<u64>) -> EmptyRes {
        let deadline_option = ttl_ms_option.map(|ttl| Instant::now() + Duration::from_millis(ttl));
        self.lock().insert(key.to_owned(), (value, deadline_option));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lock().remove(key).is_some())
    }

    async fn clear(&self) -> EmptyRes {
        self.lock().clear();
        Ok(())
    }
}

//
// Credential material
//

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub public: Buffer,
    pub private: Buffer,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedKeyPair {
    pub key_pair: KeyPair,
    pub signature: Buffer,
    pub key_id: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccountSettings {
    pub unarchive_chats: bool,
}

/// The credential record the socket reads and evolves. Bookkeeping fields are typed;
/// key material is carried opaquely (the socket owns key generation), and any fields
/// this version doesn't know about survive a round-trip via `rest`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthCreds {
    #[serde(rename = "noiseKey", skip_serializing_if = "Option::is_none")]
    pub noise_key_option: Option<KeyPair>,
    #[serde(rename = "signedIdentityKey", skip_serializing_if = "Option::is_none")]
    pub signed_identity_key_option: Option<KeyPair>,
    #[serde(rename = "signedPreKey", skip_serializing_if = "Option::is_none")]
    pub signed_pre_key_option: Option<SignedKeyPair>,
    pub registration_id: u32,
    pub adv_secret_key: String,
    pub next_pre_key_id: u32,
    pub first_unuploaded_pre_key_id: u32,
    pub account_sync_counter: u32,
    pub account_settings: AccountSettings,
    #[serde(rename = "me", skip_serializing_if = "Option::is_none")]
    pub me_option: Option<Value>,
    #[serde(rename = "account", skip_serializing_if = "Option::is_none")]
    pub account_option: Option<Value>,
    #[serde(rename = "myAppStateKeyId", skip_serializing_if = "Option::is_none")]
    pub my_app_state_key_id_option: Option<String>,
    pub processed_history_messages: Vec<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl AuthCreds {
    /// A brand-new credential record: random registration id and adv secret,
    /// counters at their starting values, no key material yet.
    pub fn fresh() -> Self {
        let mut rng = rand::thread_rng();
        let mut secret = [0u8; 32];
        rng.fill(&mut secret[..]);
        AuthCreds {
            registration_id: rng.gen_range(1..=16383),
            adv_secret_key: codec::base64_encode(&secret),
            next_pre_key_id: 1,
            first_unuploaded_pre_key_id: 1,
            ..Default::default()
        }
    }

    /// Canonicalizes buffer-shaped objects inside the untyped remainder.
    fn normalize(&mut self) {
        for value in self.rest.values_mut() {
            *value = codec::normalize_buffers(value.take());
        }
    }
}

/// App-state sync key payload; reading it through this shape normalizes its buffers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppStateSyncKeyData {
    #[serde(rename = "keyData", skip_serializing_if = "Option::is_none")]
    pub key_data_option: Option<Buffer>,
    #[serde(rename = "fingerprint", skip_serializing_if = "Option::is_none")]
    pub fingerprint_option: Option<AppStateSyncKeyFingerprint>,
    #[serde(rename = "timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp_option: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppStateSyncKeyFingerprint {
    pub raw_id: i32,
    pub current_index: u32,
    pub device_indexes: Vec<u32>,
}

/// `(category, id) -> value` writes; an absent value is a delete.
pub type SignalDataSet = HashMap<String, HashMap<String, Option<Value>>>;

//
// Adapter
//

/// Persists one session's credentials and signal keys in a shared key-value store.
/// Physical keys are `<sessionKey>:<logical>`; isolation between sessions relies on
/// disjoint session keys (or namespacing in the store itself) — `clear_state` in
/// particular wipes the *entire* underlying keyspace.
pub struct AuthStateAdapter {
    store: Arc<dyn KvStore>,
    session_key: String,
    creds: RwLock<AuthCreds>,
}

impl AuthStateAdapter {
    /// Loads the session's credentials from the store, starting fresh when they are
    /// absent or unreadable.
    pub async fn init(store: Arc<dyn KvStore>, session_key: impl Into<String>) -> Self {
        let session_key = session_key.into();
        let phys_key = format!("{session_key}:{CREDS_KEY}");
        let creds = match store.get(&phys_key).await {
            Ok(Some(json)) => match codec::from_json_str::<AuthCreds>(&json) {
                Ok(mut creds) => {
                    creds.normalize();
                    creds
                }
                Err(e) => {
                    log::warn!("Stored credentials for '{session_key}' are unreadable, starting fresh: {e}");
                    AuthCreds::fresh()
                }
            },
            Ok(None) => AuthCreds::fresh(),
            Err(e) => {
                log::warn!("Failed to read credentials for '{session_key}', starting fresh: {e}");
                AuthCreds::fresh()
            }
        };
        AuthStateAdapter { store, session_key, creds: RwLock::new(creds) }
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    fn phys_key(&self, logical: &str) -> String {
        format!("{}:{}", self.session_key, logical)
    }

    pub fn creds(&self) -> AuthCreds {
        self.creds.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update_creds(&self, f: impl FnOnce(&mut AuthCreds)) {
        f(&mut *self.creds.write().unwrap_or_else(|e| e.into_inner()));
    }

    /// Writes the credential blob under the session's `creds` key with a two-year TTL.
    pub async fn save_creds(&self) -> EmptyRes {
        let json = codec::to_json_string(&self.creds())?;
        self.store.set(&self.phys_key(CREDS_KEY), json, Some(CREDS_TTL_MS)).await
    }

    /// Clears the whole underlying keyspace. See the type-level note on isolation.
    pub async fn clear_state(&self) {
        if let Err(e) = self.store.clear().await {
            log::warn!("Failed to clear auth state store: {e}");
        }
    }

    /// Reads the given signal keys; each requested id maps to its stored value or `None`.
    /// Store and decode failures degrade to `None`.
    pub async fn keys_get(&self, tpe: &str, ids: &[&str]) -> HashMap<String, Option<Value>> {
        let mut result = HashMap::with_capacity(ids.len());
        for &id in ids {
            let phys_key = self.phys_key(&format!("{tpe}-{id}"));
            let value_option = match self.store.get(&phys_key).await {
                Ok(Some(json)) => match codec::from_json_str::<Value>(&json) {
                    Ok(value) if tpe == APP_STATE_SYNC_KEY_TYPE => Some(reconstruct_app_state_sync_key(value)),
                    Ok(value) => Some(value),
                    Err(e) => {
                        log::debug!("Unreadable signal key under '{phys_key}': {e}");
                        None
                    }
                },
                Ok(None) => None,
                Err(e) => {
                    log::warn!("Failed to read signal key under '{phys_key}': {e}");
                    None
                }
            };
            result.insert(id.to_owned(), value_option);
        }
        result
    }

    /// Writes the given signal keys; an absent value deletes the entry.
    /// Write failures propagate; delete failures are logged and skipped.
    pub async fn keys_set(&self, data: &SignalDataSet) -> EmptyRes {
        for (category, entries) in data {
            for (id, value_option) in entries {
                let phys_key = self.phys_key(&format!("{category}-{id}"));
                match value_option {
                    Some(value) => {
                        let json = codec::to_json_string(value)?;
                        self.store.set(&phys_key, json, None).await?;
                    }
                    None => {
                        if let Err(e) = self.store.delete(&phys_key).await {
                            log::warn!("Failed to delete signal key under '{phys_key}': {e}");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Round-trips the value through the typed app-state sync key shape, canonicalizing
/// legacy buffer encodings. Values that don't parse pass through untouched.
fn reconstruct_app_state_sync_key(value: Value) -> Value {
    match serde_json::from_value::<AppStateSyncKeyData>(value.clone()) {
        Ok(data) => serde_json::to_value(&data).unwrap_or(value),
        Err(e) => {
            log::debug!("App state sync key payload doesn't match the expected shape: {e}");
            value
        }
    }
}
