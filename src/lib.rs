pub mod context;
pub mod gateway;
pub mod identity;
pub mod insights;
pub mod logging;
pub mod orchestrator;
pub mod prompts;
pub mod store;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

pub use gateway::{
    AiGateway, CompletionOptions, GatewayError, GeminiClient, LiveAudioSession, LiveEvent,
};
pub use identity::{ActiveSession, IdentityError, TrialStatus};
pub use orchestrator::{
    ChatTarget, WeeklyStrategy, CHAT_FALLBACK_MESSAGE, OFFLINE_MESSAGE, SCAN_FALLBACK_MESSAGE,
    STRATEGY_FALLBACK_MESSAGE, VOICE_FALLBACK_MESSAGE,
};
pub use store::{
    AutoReplyMode, BehavioralInsights, BusinessEntry, CalendarEvent, ChatMessage, ChatSession,
    EntryType, GuardianAlert, KvStore, LocalStore, MemoryStore, Reminder, SocialPlatform,
    SocialPlatformSettings, SourceRef, SqliteStore, StoreError, UserProfile, UserScope,
    WhatsAppSettings,
};

use identity::IdentityGate;
use orchestrator::Orchestrator;

const REMINDER_DEFAULT_LEAD_MS: i64 = 24 * 60 * 60 * 1000;

/// The Braik engine: everything the presentation shell calls. Owns the
/// local store, the identity gate and the dispatch orchestrator; all
/// state is scoped per active user and AI features degrade gracefully
/// when the gateway credential is absent.
pub struct Braik {
    store: Arc<LocalStore>,
    identity: IdentityGate,
    orchestrator: Orchestrator,
}

impl Braik {
    /// Production setup: durable SQLite backend, gateway from the
    /// hosting environment's credential. A missing credential leaves
    /// every AI feature answering with its local fallback.
    pub fn new() -> Result<Self, StoreError> {
        if let Err(e) = logging::init_logging() {
            eprintln!("Failed to initialize logging: {}", e);
        }
        let _ = logging::cleanup_old_logs();

        let kv = SqliteStore::open(&store::default_db_path())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let gateway = GeminiClient::from_env()
            .map(|client| Arc::new(client) as Arc<dyn AiGateway>);
        if gateway.is_none() {
            logging::log_error(None, "No AI credential in environment; features degraded");
        }

        Ok(Self::with_backend(Arc::new(kv), gateway))
    }

    /// Injectable setup used by tests and embedders.
    pub fn with_backend(kv: Arc<dyn KvStore>, gateway: Option<Arc<dyn AiGateway>>) -> Self {
        let store = Arc::new(LocalStore::new(kv));
        let identity = IdentityGate::new(store.clone());
        let orchestrator = Orchestrator::new(store.clone(), gateway);
        Self {
            store,
            identity,
            orchestrator,
        }
    }

    pub fn is_online(&self) -> bool {
        self.orchestrator.is_online()
    }

    // ============ Identity & Trial ============

    pub fn resolve_active_user(&self) -> Option<ActiveSession> {
        self.identity.resolve_active_user()
    }

    pub fn login(&self, email: &str, password: &str) -> Result<ActiveSession, IdentityError> {
        self.identity.login(email, password)
    }

    pub fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        company_name: Option<&str>,
    ) -> Result<ActiveSession, IdentityError> {
        self.identity.register(email, password, name, company_name)
    }

    pub fn start_trial(&self) -> Result<ActiveSession, IdentityError> {
        self.identity.start_trial()
    }

    pub fn check_trial_status(&self) -> TrialStatus {
        self.identity.check_trial_status()
    }

    pub fn logout(&self) -> Result<(), IdentityError> {
        self.identity.logout()
    }

    pub fn update_profile(
        &self,
        session: &ActiveSession,
        name: &str,
        company_name: &str,
    ) -> Result<UserProfile, IdentityError> {
        self.identity.update_profile(session, name, company_name)
    }

    // ============ Knowledge Base ============

    pub fn get_entries(&self, scope: &UserScope) -> Vec<BusinessEntry> {
        self.store.get_entries(scope)
    }

    /// Manual form submission: a fresh entry with a generated id.
    pub fn create_entry(
        &self,
        scope: &UserScope,
        entry_type: EntryType,
        title: &str,
        content: &str,
        date: Option<&str>,
        is_sensitive: bool,
    ) -> Result<BusinessEntry, StoreError> {
        let entry = BusinessEntry {
            id: Uuid::new_v4().to_string(),
            entry_type,
            title: title.to_string(),
            content: content.to_string(),
            date: date.map(|d| d.to_string()),
            timestamp: Utc::now().timestamp_millis(),
            is_sensitive,
            metadata: None,
        };
        self.store.save_entry(scope, entry.clone())?;
        Ok(entry)
    }

    /// File upload intake: the file lands as a document entry.
    pub fn import_file_entry(
        &self,
        scope: &UserScope,
        file_name: &str,
        content: &str,
    ) -> Result<BusinessEntry, StoreError> {
        let now = Utc::now();
        let entry = BusinessEntry {
            id: format!("file-{}", Uuid::new_v4()),
            entry_type: EntryType::Document,
            title: file_name.to_string(),
            content: content.to_string(),
            date: Some(now.format("%Y-%m-%d").to_string()),
            timestamp: now.timestamp_millis(),
            is_sensitive: false,
            metadata: None,
        };
        self.store.save_entry(scope, entry.clone())?;
        Ok(entry)
    }

    /// Upsert keyed on the entry id.
    pub fn save_entry(&self, scope: &UserScope, entry: BusinessEntry) -> Result<(), StoreError> {
        self.store.save_entry(scope, entry)
    }

    pub fn delete_entry(&self, scope: &UserScope, id: &str) -> Result<(), StoreError> {
        self.store.delete_entry(scope, id)
    }

    /// "On this day" records from earlier years, for the timeline view.
    pub fn get_historical_entries(&self, scope: &UserScope) -> Vec<BusinessEntry> {
        self.store.get_historical_entries(scope)
    }

    // ============ Calendar & Reminders ============

    /// Manual events plus the synthetic projection of appointment
    /// entries, recomputed on every read.
    pub fn calendar_projection(&self, scope: &UserScope) -> Vec<CalendarEvent> {
        context::build_calendar_projection(
            &self.store.get_entries(scope),
            &self.store.get_calendar_events(scope),
        )
    }

    pub fn add_calendar_event(
        &self,
        scope: &UserScope,
        title: &str,
        description: &str,
        date: &str,
        time: &str,
        duration: i64,
    ) -> Result<CalendarEvent, StoreError> {
        let event = CalendarEvent {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: description.to_string(),
            date: date.to_string(),
            time: time.to_string(),
            duration,
            is_ai_related: false,
        };
        self.store.save_calendar_event(scope, event.clone())?;
        Ok(event)
    }

    /// Only manual events can be removed; synthetic `kb-` projections
    /// disappear when their source entry does.
    pub fn delete_calendar_event(&self, scope: &UserScope, id: &str) -> Result<(), StoreError> {
        self.store.delete_calendar_event(scope, id)
    }

    pub fn get_reminders(&self, scope: &UserScope) -> Vec<Reminder> {
        self.store.get_reminders(scope)
    }

    /// Free-text reminder, due in a day unless the caller reschedules.
    pub fn add_reminder(&self, scope: &UserScope, text: &str) -> Result<Reminder, StoreError> {
        let reminder = Reminder {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            due_timestamp: Utc::now().timestamp_millis() + REMINDER_DEFAULT_LEAD_MS,
            is_completed: false,
        };
        self.store.save_reminder(scope, reminder.clone())?;
        Ok(reminder)
    }

    pub fn toggle_reminder(&self, scope: &UserScope, id: &str) -> Result<(), StoreError> {
        self.store.toggle_reminder(scope, id)
    }

    // ============ Chat ============

    pub async fn send_search_message(&self, scope: &UserScope, query: &str) -> ChatMessage {
        self.orchestrator
            .send_chat_message(scope, ChatTarget::Search, query)
            .await
    }

    pub async fn send_workspace_message(
        &self,
        scope: &UserScope,
        session_id: &str,
        query: &str,
    ) -> ChatMessage {
        self.orchestrator
            .send_chat_message(scope, ChatTarget::Session(session_id.to_string()), query)
            .await
    }

    pub fn get_search_history(&self, scope: &UserScope) -> Vec<ChatMessage> {
        self.store.get_search_history(scope)
    }

    pub fn get_sessions(&self, scope: &UserScope) -> Vec<ChatSession> {
        self.store.get_sessions(scope)
    }

    pub fn get_insights(&self, scope: &UserScope) -> BehavioralInsights {
        self.store.get_insights(scope)
    }

    // ============ Strategy, Scanner, Voice ============

    pub async fn generate_weekly_strategy(
        &self,
        scope: &UserScope,
    ) -> Result<WeeklyStrategy, String> {
        self.orchestrator
            .generate_weekly_strategy(scope)
            .await
            .map_err(|e| {
                logging::log_error(Some(scope.tag()), &format!("Strategy failed: {}", e));
                STRATEGY_FALLBACK_MESSAGE.to_string()
            })
    }

    pub async fn analyze_scanned_document(
        &self,
        scope: &UserScope,
        image_base64: &str,
    ) -> Result<BusinessEntry, String> {
        self.orchestrator
            .analyze_scanned_document(scope, image_base64)
            .await
            .map_err(|e| {
                logging::log_error(Some(scope.tag()), &format!("Scan failed: {}", e));
                SCAN_FALLBACK_MESSAGE.to_string()
            })
    }

    /// Open a live voice session bound to the knowledge base. The caller
    /// owns the returned handle; dropping it ends the session.
    pub async fn start_voice_session(
        &self,
        scope: &UserScope,
    ) -> Result<LiveAudioSession, String> {
        let gateway = self
            .orchestrator
            .gateway()
            .ok_or_else(|| VOICE_FALLBACK_MESSAGE.to_string())?;

        let entries = self.store.get_entries(scope);
        let instruction = prompts::voice_instruction(&context::build_voice_context(&entries));

        gateway
            .start_live_audio_session(&instruction, "Puck")
            .await
            .map_err(|e| {
                logging::log_error(Some(scope.tag()), &format!("Voice session failed: {}", e));
                VOICE_FALLBACK_MESSAGE.to_string()
            })
    }

    // ============ WhatsApp Channel (simulated) ============

    pub fn get_whatsapp_settings(&self, scope: &UserScope) -> WhatsAppSettings {
        self.store.get_whatsapp_settings(scope)
    }

    /// Pairing token shown as a QR code during the simulated link flow.
    pub fn generate_pairing_token(&self) -> String {
        let random_id: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(13)
            .map(char::from)
            .collect();
        let reversed: String = random_id.chars().rev().collect();
        let stamp = BASE64_STANDARD.encode(Utc::now().timestamp_millis().to_string());
        format!("1@{},{},{}", random_id, stamp, reversed)
    }

    /// The scan "succeeded": mark the channel connected and enabled.
    pub fn complete_whatsapp_pairing(
        &self,
        scope: &UserScope,
    ) -> Result<WhatsAppSettings, StoreError> {
        let mut settings = self.store.get_whatsapp_settings(scope);
        settings.is_connected = true;
        settings.is_enabled = true;
        settings.last_activity = Utc::now().timestamp_millis();
        self.store.save_whatsapp_settings(scope, &settings)?;
        Ok(settings)
    }

    pub fn disconnect_whatsapp(&self, scope: &UserScope) -> Result<WhatsAppSettings, StoreError> {
        let mut settings = self.store.get_whatsapp_settings(scope);
        settings.is_connected = false;
        settings.is_enabled = false;
        self.store.save_whatsapp_settings(scope, &settings)?;
        Ok(settings)
    }

    pub fn set_whatsapp_enabled(
        &self,
        scope: &UserScope,
        enabled: bool,
    ) -> Result<WhatsAppSettings, StoreError> {
        let mut settings = self.store.get_whatsapp_settings(scope);
        settings.is_enabled = enabled;
        self.store.save_whatsapp_settings(scope, &settings)?;
        Ok(settings)
    }

    pub fn set_auto_reply_mode(
        &self,
        scope: &UserScope,
        mode: AutoReplyMode,
    ) -> Result<WhatsAppSettings, StoreError> {
        let mut settings = self.store.get_whatsapp_settings(scope);
        settings.auto_reply_mode = mode;
        self.store.save_whatsapp_settings(scope, &settings)?;
        Ok(settings)
    }

    pub async fn simulate_whatsapp_reply(
        &self,
        scope: &UserScope,
        message: &str,
    ) -> Result<String, String> {
        self.orchestrator
            .simulate_whatsapp_reply(scope, message)
            .await
            .map_err(|e| {
                logging::log_error(Some(scope.tag()), &format!("WhatsApp reply failed: {}", e));
                CHAT_FALLBACK_MESSAGE.to_string()
            })
    }

    // ============ Social Channels (simulated) ============

    pub fn get_social_settings(&self, scope: &UserScope) -> Vec<SocialPlatformSettings> {
        self.store.get_social_settings(scope)
    }

    /// Connect/disconnect toggle; enabling follows the connection state.
    pub fn toggle_social_platform(
        &self,
        scope: &UserScope,
        platform: SocialPlatform,
    ) -> Result<Vec<SocialPlatformSettings>, StoreError> {
        let mut settings = self.store.get_social_settings(scope);
        for row in settings.iter_mut() {
            if row.platform == platform {
                row.is_connected = !row.is_connected;
                row.is_enabled = row.is_connected;
            }
        }
        self.store.save_social_settings(scope, &settings)?;
        Ok(settings)
    }

    pub async fn simulate_social_reply(
        &self,
        scope: &UserScope,
        platform: SocialPlatform,
        comment: &str,
    ) -> Result<String, String> {
        self.orchestrator
            .simulate_social_reply(scope, platform, comment)
            .await
            .map_err(|e| {
                logging::log_error(Some(scope.tag()), &format!("Social reply failed: {}", e));
                CHAT_FALLBACK_MESSAGE.to_string()
            })
    }

    // ============ Maintenance ============

    /// Full memory wipe, registry included. The shell asks twice.
    pub fn reset_all(&self) -> Result<(), StoreError> {
        self.store.reset_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::MemoryStore;

    fn engine() -> Braik {
        Braik::with_backend(Arc::new(MemoryStore::new()), None)
    }

    #[test]
    fn register_entry_projection_end_to_end() {
        let braik = engine();
        let session = braik
            .register("alice@x.com", "pw123456", "Alice", None)
            .unwrap();

        braik
            .create_entry(
                &session.scope,
                EntryType::Appointment,
                "Meeting",
                "Quarterly review with the accountant",
                Some("2024-02-01"),
                false,
            )
            .unwrap();

        let events = braik.calendar_projection(&session.scope);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Meeting");
        assert_eq!(events[0].date, "2024-02-01");
        assert!(events[0].is_ai_related);
        assert!(events[0].id.starts_with("kb-"));
    }

    #[test]
    fn projection_combines_manual_events_and_appointments() {
        let braik = engine();
        let session = braik
            .register("alice@x.com", "pw123456", "Alice", None)
            .unwrap();

        braik
            .add_calendar_event(
                &session.scope,
                "Supplier call",
                "Renegotiate terms",
                "2024-01-10",
                "14:00",
                30,
            )
            .unwrap();
        braik
            .create_entry(
                &session.scope,
                EntryType::Appointment,
                "Bank meeting",
                "Credit line review",
                Some("2024-01-12"),
                false,
            )
            .unwrap();

        let events = braik.calendar_projection(&session.scope);
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| !e.is_ai_related && e.time == "14:00"));
        assert!(events.iter().any(|e| e.is_ai_related && e.time == "09:00"));
    }

    #[test]
    fn data_stays_inside_its_owner_scope() {
        let braik = engine();
        let alice = braik
            .register("alice@x.com", "pw123456", "Alice", None)
            .unwrap();
        braik
            .create_entry(&alice.scope, EntryType::Note, "Secret", "alice only", None, true)
            .unwrap();
        braik.logout().unwrap();

        let bob = braik.register("bob@y.com", "pw654321", "Bob", None).unwrap();
        assert!(braik.get_entries(&bob.scope).is_empty());
        assert!(braik.calendar_projection(&bob.scope).is_empty());
        assert_eq!(braik.get_entries(&alice.scope).len(), 1);
    }

    #[test]
    fn file_import_lands_as_document_entry() {
        let braik = engine();
        let session = braik.start_trial().unwrap();

        let entry = braik
            .import_file_entry(&session.scope, "prices.csv", "item,price\nespresso,1.20")
            .unwrap();
        assert!(entry.id.starts_with("file-"));
        assert_eq!(entry.entry_type, EntryType::Document);
        assert_eq!(braik.get_entries(&session.scope).len(), 1);
    }

    #[test]
    fn pairing_tokens_follow_the_wire_shape() {
        let braik = engine();
        let token = braik.generate_pairing_token();

        assert!(token.starts_with("1@"));
        let parts: Vec<&str> = token[2..].split(',').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 13);
        let reversed: String = parts[0].chars().rev().collect();
        assert_eq!(parts[2], reversed);

        // Two tokens never collide.
        assert_ne!(token, braik.generate_pairing_token());
    }

    #[test]
    fn whatsapp_pairing_lifecycle() {
        let braik = engine();
        let session = braik.start_trial().unwrap();

        assert!(!braik.get_whatsapp_settings(&session.scope).is_connected);

        let connected = braik.complete_whatsapp_pairing(&session.scope).unwrap();
        assert!(connected.is_connected && connected.is_enabled);
        assert!(connected.last_activity > 0);

        let disabled = braik.set_whatsapp_enabled(&session.scope, false).unwrap();
        assert!(disabled.is_connected && !disabled.is_enabled);

        let disconnected = braik.disconnect_whatsapp(&session.scope).unwrap();
        assert!(!disconnected.is_connected && !disconnected.is_enabled);
    }

    #[test]
    fn social_toggle_flips_connection_and_enablement_together() {
        let braik = engine();
        let session = braik.start_trial().unwrap();

        let settings = braik
            .toggle_social_platform(&session.scope, SocialPlatform::Facebook)
            .unwrap();
        let facebook = settings
            .iter()
            .find(|s| s.platform == SocialPlatform::Facebook)
            .unwrap();
        assert!(facebook.is_connected && facebook.is_enabled);

        let settings = braik
            .toggle_social_platform(&session.scope, SocialPlatform::Facebook)
            .unwrap();
        let facebook = settings
            .iter()
            .find(|s| s.platform == SocialPlatform::Facebook)
            .unwrap();
        assert!(!facebook.is_connected && !facebook.is_enabled);
    }

    #[test]
    fn reminders_default_one_day_out() {
        let braik = engine();
        let session = braik.start_trial().unwrap();

        let before = Utc::now().timestamp_millis();
        let reminder = braik.add_reminder(&session.scope, "chase invoice 42").unwrap();
        assert!(reminder.due_timestamp >= before + REMINDER_DEFAULT_LEAD_MS);
        assert!(!reminder.is_completed);

        braik.toggle_reminder(&session.scope, &reminder.id).unwrap();
        assert!(braik.get_reminders(&session.scope)[0].is_completed);
    }

    #[tokio::test]
    async fn offline_engine_degrades_instead_of_crashing() {
        let braik = engine();
        let session = braik.start_trial().unwrap();

        assert!(!braik.is_online());
        let reply = braik.send_search_message(&session.scope, "ping").await;
        assert_eq!(reply.content, OFFLINE_MESSAGE);

        assert_eq!(
            braik.generate_weekly_strategy(&session.scope).await.unwrap_err(),
            STRATEGY_FALLBACK_MESSAGE
        );
        assert_eq!(
            braik
                .analyze_scanned_document(&session.scope, "Zm9v")
                .await
                .unwrap_err(),
            SCAN_FALLBACK_MESSAGE
        );
        assert_eq!(
            braik.start_voice_session(&session.scope).await.err().unwrap(),
            VOICE_FALLBACK_MESSAGE
        );
    }

    #[test]
    fn reset_wipes_everything_including_the_registry() {
        let braik = engine();
        let session = braik
            .register("alice@x.com", "pw123456", "Alice", None)
            .unwrap();
        braik
            .create_entry(&session.scope, EntryType::Note, "n", "c", None, false)
            .unwrap();

        braik.reset_all().unwrap();
        assert!(braik.get_entries(&session.scope).is_empty());
        assert!(braik.resolve_active_user().is_none());
        assert!(matches!(
            braik.login("alice@x.com", "pw123456"),
            Err(IdentityError::NotFound)
        ));
    }
}
