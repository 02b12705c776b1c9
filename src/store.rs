use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::logging;

// Global (unscoped) keys: the email -> user record registry and the
// active-session pointer live outside any per-user scope.
const USERS_REGISTRY_KEY: &str = "braik_users_registry";
const ACTIVE_USER_KEY: &str = "braik_active_user";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

// ============ Domain Types ============

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Note,
    Appointment,
    Contact,
    Document,
    General,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Note => "note",
            EntryType::Appointment => "appointment",
            EntryType::Contact => "contact",
            EntryType::Document => "document",
            EntryType::General => "general",
        }
    }

    pub fn from_str(s: &str) -> Option<EntryType> {
        match s.to_lowercase().as_str() {
            "note" => Some(EntryType::Note),
            "appointment" => Some(EntryType::Appointment),
            "contact" => Some(EntryType::Contact),
            "document" => Some(EntryType::Document),
            "general" => Some(EntryType::General),
            _ => None,
        }
    }
}

/// A single knowledge-base record: note, appointment, contact, document
/// or general datum. `id` is immutable; saving with an existing id
/// overwrites the record in place.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusinessEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub title: String,
    pub content: String,
    pub date: Option<String>,
    pub timestamp: i64,
    pub is_sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// Calendar event. Manual events are persisted; synthetic events derived
/// from appointment entries (id prefixed `kb-`) are projected at read
/// time and never written back to the calendar collection.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub description: String,
    pub date: String, // YYYY-MM-DD
    pub time: String, // HH:mm
    pub duration: i64, // minutes
    pub is_ai_related: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Reminder {
    pub id: String,
    pub text: String,
    pub due_timestamp: i64,
    pub is_completed: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A web citation attached to a grounded assistant response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub uri: String,
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_save: Option<bool>,
}

/// A workspace conversation. Search mode uses the flat search history
/// collection instead of sessions.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub last_update: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Forgotten,
    Anomaly,
    Strategy,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GuardianAlert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    pub severity: Priority,
    pub timestamp: i64,
}

/// Incrementally merged behavioral profile. Fragments returned by the
/// background analysis overwrite only the fields they carry; everything
/// else is preserved across merges.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BehavioralInsights {
    pub writing_style: String,
    pub frequent_topics: Vec<String>,
    pub anticipated_needs: Vec<String>,
    pub guardian_alerts: Vec<GuardianAlert>,
    pub last_analysis: i64,
}

impl Default for BehavioralInsights {
    fn default() -> Self {
        Self {
            writing_style: "Analysis in progress".to_string(),
            frequent_topics: Vec::new(),
            anticipated_needs: Vec::new(),
            guardian_alerts: Vec::new(),
            last_analysis: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserProfile {
    pub name: String,
    pub company_name: String,
    pub email: Option<String>,
    pub registration_date: i64,
    pub is_trial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_start_date: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthState {
    pub is_configured: bool,
    pub email: Option<String>,
    // Argon2 PHC string; trial identities carry no password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserRecord {
    pub profile: UserProfile,
    pub auth: AuthState,
}

pub type UsersRegistry = HashMap<String, UserRecord>;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AutoReplyMode {
    ContactsOnly,
    All,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WhatsAppSettings {
    pub is_connected: bool,
    pub is_enabled: bool,
    pub last_activity: i64,
    pub auto_reply_mode: AutoReplyMode,
}

impl Default for WhatsAppSettings {
    fn default() -> Self {
        Self {
            is_connected: false,
            is_enabled: false,
            last_activity: 0,
            auto_reply_mode: AutoReplyMode::ContactsOnly,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SocialPlatform {
    Facebook,
    Instagram,
    Tiktok,
}

impl SocialPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocialPlatform::Facebook => "facebook",
            SocialPlatform::Instagram => "instagram",
            SocialPlatform::Tiktok => "tiktok",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ManagedPage {
    pub id: String,
    pub name: String,
    pub handle: String,
    pub is_active: bool,
    pub platform: SocialPlatform,
    pub connected_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SocialPlatformSettings {
    pub platform: SocialPlatform,
    pub is_connected: bool,
    pub is_enabled: bool,
    #[serde(default)]
    pub managed_pages: Vec<ManagedPage>,
    #[serde(default)]
    pub replies_count: i64,
    #[serde(default)]
    pub last_reply_timestamp: i64,
}

impl SocialPlatformSettings {
    fn disconnected(platform: SocialPlatform) -> Self {
        Self {
            platform,
            is_connected: false,
            is_enabled: false,
            managed_pages: Vec::new(),
            replies_count: 0,
            last_reply_timestamp: 0,
        }
    }
}

/// Default row per supported platform, used when nothing is stored yet.
pub fn default_social_settings() -> Vec<SocialPlatformSettings> {
    vec![
        SocialPlatformSettings::disconnected(SocialPlatform::Facebook),
        SocialPlatformSettings::disconnected(SocialPlatform::Instagram),
        SocialPlatformSettings::disconnected(SocialPlatform::Tiktok),
    ]
}

// ============ User Scope ============

/// Deterministic key namespace for one user's collections. Scopes are
/// resolved once by the identity gate and passed explicitly to every
/// store call; two different emails can never share a prefix because the
/// email is base64-encoded into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserScope {
    prefix: String,
    email: Option<String>,
}

impl UserScope {
    pub fn for_email(email: &str) -> Self {
        Self {
            prefix: format!("braik_{}", URL_SAFE_NO_PAD.encode(email)),
            email: Some(email.to_string()),
        }
    }

    pub fn guest() -> Self {
        Self {
            prefix: "braik_guest".to_string(),
            email: None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Short tag for log lines; never contains the raw email.
    pub fn tag(&self) -> &str {
        &self.prefix
    }

    pub fn key_for(&self, collection: Collection) -> String {
        format!("{}_{}", self.prefix, collection.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Entries,
    Calendar,
    Reminders,
    Insights,
    SearchHistory,
    WorkspaceSessions,
    WhatsappSettings,
    SocialSettings,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Entries => "entries",
            Collection::Calendar => "calendar",
            Collection::Reminders => "reminders",
            Collection::Insights => "insights",
            Collection::SearchHistory => "search_history",
            Collection::WorkspaceSessions => "workspace_sessions",
            Collection::WhatsappSettings => "whatsapp_settings",
            Collection::SocialSettings => "social_settings",
        }
    }
}

// ============ Key-Value Backend ============

/// Injectable persistence backend: one JSON blob per collection key.
/// `SqliteStore` is the durable production backend; `MemoryStore` backs
/// the tests.
pub trait KvStore: Send + Sync {
    /// Returns the stored value, or None when the key is absent or the
    /// backend failed to read it.
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// Durable backend: a single `kv` table in SQLite, one row per
/// collection. Every write replaces the whole serialized blob, so a
/// collection is never left internally inconsistent.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
    }

    fn with_connection<F, T>(&self, f: F) -> rusqlite::Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Option<String> {
        let result = self.with_connection(|conn| {
            conn.query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
        });
        match result {
            Ok(value) => value,
            Err(e) => {
                logging::log_error(None, &format!("kv read failed for {}: {}", key, e));
                None
            }
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
                params![key, value, now],
            )?;
            Ok(())
        })
        .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            Ok(())
        })
        .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM kv", [])?;
            Ok(())
        })
        .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

/// In-memory backend for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().unwrap().get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.map.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.map.lock().unwrap().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.map.lock().unwrap().clear();
        Ok(())
    }
}

/// Default on-disk database location, overridable via BRAIK_DATA_DIR.
pub fn default_db_path() -> PathBuf {
    if let Ok(dir) = std::env::var("BRAIK_DATA_DIR") {
        return PathBuf::from(dir).join("braik.db");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".braik/braik.db")
}

// ============ Local Store ============

/// Typed repository over the key-value backend. Every read returns the
/// documented default when the key is missing or its blob is malformed;
/// every mutation is a full read-modify-write of the serialized
/// collection (last writer wins).
pub struct LocalStore {
    kv: Arc<dyn KvStore>,
}

impl LocalStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn read_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.kv.get(key) {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    // Malformed blobs are treated as absent, never as errors.
                    logging::log_error(None, &format!(
                        "malformed blob at {} treated as absent: {}", key, e
                    ));
                    T::default()
                }
            },
            None => T::default(),
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.kv.put(key, &raw)
    }

    fn upsert_by_id<T, F>(&self, key: &str, item: T, id_of: F) -> Result<(), StoreError>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: Fn(&T) -> &str,
    {
        let mut items: Vec<T> = self.read_or_default(key);
        let id = id_of(&item).to_string();
        match items.iter().position(|existing| id_of(existing) == id) {
            // Replace in place, preserving position.
            Some(index) => items[index] = item,
            None => items.push(item),
        }
        self.write(key, &items)
    }

    fn remove_by_id<T, F>(&self, key: &str, id: &str, id_of: F) -> Result<(), StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(&T) -> &str,
    {
        let mut items: Vec<T> = self.read_or_default(key);
        items.retain(|item| id_of(item) != id);
        self.write(key, &items)
    }

    // ============ Entries ============

    pub fn get_entries(&self, scope: &UserScope) -> Vec<BusinessEntry> {
        self.read_or_default(&scope.key_for(Collection::Entries))
    }

    /// Upsert keyed on `id`: an existing entry is replaced in place, a
    /// new one is appended.
    pub fn save_entry(&self, scope: &UserScope, entry: BusinessEntry) -> Result<(), StoreError> {
        self.upsert_by_id(&scope.key_for(Collection::Entries), entry, |e| &e.id)
    }

    /// Removing an id that does not exist is a no-op.
    pub fn delete_entry(&self, scope: &UserScope, id: &str) -> Result<(), StoreError> {
        self.remove_by_id::<BusinessEntry, _>(&scope.key_for(Collection::Entries), id, |e| &e.id)
    }

    /// Entries created on today's calendar day in an earlier year.
    pub fn get_historical_entries(&self, scope: &UserScope) -> Vec<BusinessEntry> {
        use chrono::{Datelike, TimeZone, Utc};
        let today = Utc::now();
        self.get_entries(scope)
            .into_iter()
            .filter(|e| match Utc.timestamp_millis_opt(e.timestamp).single() {
                Some(d) => {
                    d.day() == today.day()
                        && d.month() == today.month()
                        && d.year() < today.year()
                }
                None => false,
            })
            .collect()
    }

    // ============ Calendar ============

    /// Persisted manual events only; synthetic appointment projections
    /// are computed by the context assembler, never stored here.
    pub fn get_calendar_events(&self, scope: &UserScope) -> Vec<CalendarEvent> {
        self.read_or_default(&scope.key_for(Collection::Calendar))
    }

    pub fn save_calendar_event(
        &self,
        scope: &UserScope,
        event: CalendarEvent,
    ) -> Result<(), StoreError> {
        self.upsert_by_id(&scope.key_for(Collection::Calendar), event, |e| &e.id)
    }

    pub fn delete_calendar_event(&self, scope: &UserScope, id: &str) -> Result<(), StoreError> {
        self.remove_by_id::<CalendarEvent, _>(&scope.key_for(Collection::Calendar), id, |e| &e.id)
    }

    // ============ Reminders ============

    pub fn get_reminders(&self, scope: &UserScope) -> Vec<Reminder> {
        self.read_or_default(&scope.key_for(Collection::Reminders))
    }

    pub fn save_reminder(&self, scope: &UserScope, reminder: Reminder) -> Result<(), StoreError> {
        self.upsert_by_id(&scope.key_for(Collection::Reminders), reminder, |r| &r.id)
    }

    /// Flip completion; reminders are never deleted automatically.
    pub fn toggle_reminder(&self, scope: &UserScope, id: &str) -> Result<(), StoreError> {
        let key = scope.key_for(Collection::Reminders);
        let mut reminders: Vec<Reminder> = self.read_or_default(&key);
        for reminder in reminders.iter_mut() {
            if reminder.id == id {
                reminder.is_completed = !reminder.is_completed;
            }
        }
        self.write(&key, &reminders)
    }

    // ============ Chat History & Sessions ============

    pub fn get_search_history(&self, scope: &UserScope) -> Vec<ChatMessage> {
        self.read_or_default(&scope.key_for(Collection::SearchHistory))
    }

    /// Histories are fully re-serialized on every mutation; there is no
    /// incremental append on the storage side.
    pub fn save_search_history(
        &self,
        scope: &UserScope,
        messages: &[ChatMessage],
    ) -> Result<(), StoreError> {
        self.write(&scope.key_for(Collection::SearchHistory), &messages)
    }

    pub fn get_sessions(&self, scope: &UserScope) -> Vec<ChatSession> {
        self.read_or_default(&scope.key_for(Collection::WorkspaceSessions))
    }

    pub fn save_session(&self, scope: &UserScope, session: ChatSession) -> Result<(), StoreError> {
        self.upsert_by_id(&scope.key_for(Collection::WorkspaceSessions), session, |s| &s.id)
    }

    // ============ Insights ============

    pub fn get_insights(&self, scope: &UserScope) -> BehavioralInsights {
        self.read_or_default(&scope.key_for(Collection::Insights))
    }

    pub fn save_insights(
        &self,
        scope: &UserScope,
        insights: &BehavioralInsights,
    ) -> Result<(), StoreError> {
        self.write(&scope.key_for(Collection::Insights), insights)
    }

    // ============ Channel Settings ============

    pub fn get_whatsapp_settings(&self, scope: &UserScope) -> WhatsAppSettings {
        self.read_or_default(&scope.key_for(Collection::WhatsappSettings))
    }

    pub fn save_whatsapp_settings(
        &self,
        scope: &UserScope,
        settings: &WhatsAppSettings,
    ) -> Result<(), StoreError> {
        self.write(&scope.key_for(Collection::WhatsappSettings), settings)
    }

    pub fn get_social_settings(&self, scope: &UserScope) -> Vec<SocialPlatformSettings> {
        let key = scope.key_for(Collection::SocialSettings);
        let stored: Vec<SocialPlatformSettings> = self.read_or_default(&key);
        if stored.is_empty() {
            default_social_settings()
        } else {
            stored
        }
    }

    pub fn save_social_settings(
        &self,
        scope: &UserScope,
        settings: &[SocialPlatformSettings],
    ) -> Result<(), StoreError> {
        self.write(&scope.key_for(Collection::SocialSettings), &settings)
    }

    // ============ Users Registry (global) ============

    pub fn get_users_registry(&self) -> UsersRegistry {
        self.read_or_default(USERS_REGISTRY_KEY)
    }

    pub fn save_user_record(&self, email: &str, record: UserRecord) -> Result<(), StoreError> {
        let mut registry = self.get_users_registry();
        registry.insert(email.to_string(), record);
        self.write(USERS_REGISTRY_KEY, &registry)
    }

    pub fn get_user_record(&self, email: &str) -> Option<UserRecord> {
        self.get_users_registry().remove(email)
    }

    // ============ Active User Pointer (global) ============

    pub fn get_active_user_email(&self) -> Option<String> {
        self.kv.get(ACTIVE_USER_KEY)
    }

    pub fn set_active_user(&self, email: &str) -> Result<(), StoreError> {
        self.kv.put(ACTIVE_USER_KEY, email)
    }

    /// Clears the pointer only; stored data stays in place.
    pub fn clear_active_user(&self) -> Result<(), StoreError> {
        self.kv.delete(ACTIVE_USER_KEY)
    }

    // ============ Reset ============

    /// Full wipe: registry, pointer, and every user's collections.
    pub fn reset_all(&self) -> Result<(), StoreError> {
        logging::log_store(None, "Full store wipe requested");
        self.kv.clear()
    }
}
