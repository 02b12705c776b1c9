use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::context::{
    build_calendar_projection, build_entry_context, build_event_context, build_insight_context,
    classify_intent, QueryIntent,
};
use crate::gateway::{AiGateway, CompletionOptions, GatewayError};
use crate::insights::InsightEngine;
use crate::logging;
use crate::prompts;
use crate::store::{
    AutoReplyMode, BusinessEntry, ChatMessage, ChatRole, ChatSession, EntryType, LocalStore,
    Priority, SocialPlatform, UserScope,
};

// One generic user-visible fallback message per feature; the failure
// detail goes to the log, never to the user.
pub const CHAT_FALLBACK_MESSAGE: &str =
    "Connection error to the central intelligence systems. Check your connection and try again.";
pub const SCAN_FALLBACK_MESSAGE: &str =
    "Analysis failed. Try again with better lighting.";
pub const STRATEGY_FALLBACK_MESSAGE: &str =
    "The strategy protocol could not be completed. Try again later.";
pub const VOICE_FALLBACK_MESSAGE: &str =
    "The voice channel is unavailable right now.";
pub const OFFLINE_MESSAGE: &str =
    "The assistant is not configured: the AI credential is missing from this installation.";

const SESSION_TITLE_MAX: usize = 48;

/// Where a chat turn lands: the flat search history, or a workspace
/// session addressed by id (created on first use).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    Search,
    Session(String),
}

// ============ Weekly Strategy ============

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StrategySlot {
    pub time: String,
    pub activity: String,
    pub priority: Priority,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DailyPlan {
    pub day: String,
    pub slots: Vec<StrategySlot>,
}

/// A full working-week plan produced from entries and calendar. Not
/// persisted; regenerated on request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WeeklyStrategy {
    pub goals: Vec<String>,
    pub daily_plans: Vec<DailyPlan>,
    pub critical_alerts: Vec<String>,
}

// ============ Orchestrator ============

/// One user turn, one gateway call. Intent is classified locally before
/// dispatch so the right capability is used; background analyses are
/// spawned only after the primary response is persisted.
pub struct Orchestrator {
    store: Arc<LocalStore>,
    gateway: Option<Arc<dyn AiGateway>>,
    insights: Option<InsightEngine>,
}

impl Orchestrator {
    pub fn new(store: Arc<LocalStore>, gateway: Option<Arc<dyn AiGateway>>) -> Self {
        let insights = gateway
            .as_ref()
            .map(|gw| InsightEngine::new(store.clone(), gw.clone()));
        Self {
            store,
            gateway,
            insights,
        }
    }

    pub fn is_online(&self) -> bool {
        self.gateway.is_some()
    }

    pub(crate) fn gateway(&self) -> Option<Arc<dyn AiGateway>> {
        self.gateway.clone()
    }

    /// Run one chat turn. The user's message is persisted before the
    /// gateway is consulted, so a failed response never loses it; the
    /// turn always completes with an assistant message (a fallback one
    /// on error).
    pub async fn send_chat_message(
        &self,
        scope: &UserScope,
        target: ChatTarget,
        query: &str,
    ) -> ChatMessage {
        let now = Utc::now().timestamp_millis();
        let user_message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            role: ChatRole::User,
            content: query.to_string(),
            timestamp: now,
            sources: None,
            image_url: None,
            suggested_save: None,
        };

        let prior_history = self.history_for(scope, &target);
        self.append_message(scope, &target, user_message.clone());

        let intent = classify_intent(query);
        logging::log_assistant(
            Some(scope.tag()),
            &format!("Dispatching turn, intent {:?}", intent),
        );

        let assistant_message = match &self.gateway {
            None => self.text_message(OFFLINE_MESSAGE),
            Some(gateway) => match intent {
                QueryIntent::GenerateImage => {
                    self.run_image_turn(gateway.as_ref(), query).await
                }
                QueryIntent::WeeklyStrategy => {
                    match self.generate_weekly_strategy(scope).await {
                        Ok(strategy) => self.text_message(&format_strategy_message(&strategy)),
                        Err(e) => {
                            logging::log_error(
                                Some(scope.tag()),
                                &format!("Strategy turn failed: {}", e),
                            );
                            self.text_message(STRATEGY_FALLBACK_MESSAGE)
                        }
                    }
                }
                QueryIntent::Conversational => {
                    self.run_conversational_turn(scope, gateway.as_ref(), &prior_history, query)
                        .await
                }
            },
        };

        self.append_message(scope, &target, assistant_message.clone());

        // Background analyses run only after the primary response has
        // been persisted; their failures never reach this turn.
        if let Some(insights) = &self.insights {
            let mut full_history = prior_history;
            full_history.push(user_message);
            full_history.push(assistant_message.clone());
            insights.schedule_background_analysis(scope.clone(), full_history);

            let entries = self.store.get_entries(scope);
            let events =
                build_calendar_projection(&entries, &self.store.get_calendar_events(scope));
            insights.schedule_guardian_check(scope.clone(), entries, events);
        }

        assistant_message
    }

    async fn run_conversational_turn(
        &self,
        scope: &UserScope,
        gateway: &dyn AiGateway,
        history: &[ChatMessage],
        query: &str,
    ) -> ChatMessage {
        let entries = self.store.get_entries(scope);
        let insights = self.store.get_insights(scope);
        let instruction = prompts::assistant_instruction(
            &build_entry_context(&entries),
            &build_insight_context(&insights),
            &Utc::now().format("%Y-%m-%d").to_string(),
        );

        let options = CompletionOptions {
            temperature: 0.2,
            web_grounding: true,
            json_schema: None,
        };

        match gateway.complete_text(&instruction, history, query, options).await {
            Ok(response) => ChatMessage {
                id: Uuid::new_v4().to_string(),
                role: ChatRole::Assistant,
                content: response.text,
                timestamp: Utc::now().timestamp_millis(),
                sources: (!response.sources.is_empty()).then_some(response.sources),
                image_url: None,
                suggested_save: None,
            },
            Err(e) => {
                logging::log_error(Some(scope.tag()), &format!("Chat turn failed: {}", e));
                self.text_message(CHAT_FALLBACK_MESSAGE)
            }
        }
    }

    async fn run_image_turn(&self, gateway: &dyn AiGateway, query: &str) -> ChatMessage {
        match gateway
            .generate_image(query, prompts::IMAGE_PERSONA, "1:1", "1K")
            .await
        {
            Ok(image) => ChatMessage {
                id: Uuid::new_v4().to_string(),
                role: ChatRole::Assistant,
                content: image
                    .text
                    .unwrap_or_else(|| "Here is the professional image generated for you.".to_string()),
                timestamp: Utc::now().timestamp_millis(),
                sources: None,
                image_url: Some(format!("data:image/png;base64,{}", image.image_base64)),
                suggested_save: None,
            },
            Err(e) => {
                logging::log_error(None, &format!("Image turn failed: {}", e));
                self.text_message(CHAT_FALLBACK_MESSAGE)
            }
        }
    }

    fn text_message(&self, text: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4().to_string(),
            role: ChatRole::Assistant,
            content: text.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            sources: None,
            image_url: None,
            suggested_save: None,
        }
    }

    fn history_for(&self, scope: &UserScope, target: &ChatTarget) -> Vec<ChatMessage> {
        match target {
            ChatTarget::Search => self.store.get_search_history(scope),
            ChatTarget::Session(id) => self
                .store
                .get_sessions(scope)
                .into_iter()
                .find(|s| &s.id == id)
                .map(|s| s.messages)
                .unwrap_or_default(),
        }
    }

    fn append_message(&self, scope: &UserScope, target: &ChatTarget, message: ChatMessage) {
        let result = match target {
            ChatTarget::Search => {
                let mut history = self.store.get_search_history(scope);
                history.push(message);
                self.store.save_search_history(scope, &history)
            }
            ChatTarget::Session(id) => {
                let mut session = self
                    .store
                    .get_sessions(scope)
                    .into_iter()
                    .find(|s| &s.id == id)
                    .unwrap_or_else(|| ChatSession {
                        id: id.clone(),
                        title: truncate_title(&message.content),
                        messages: Vec::new(),
                        last_update: 0,
                    });
                session.messages.push(message);
                session.last_update = Utc::now().timestamp_millis();
                self.store.save_session(scope, session)
            }
        };
        if let Err(e) = result {
            logging::log_error(Some(scope.tag()), &format!("History write failed: {}", e));
        }
    }

    // ============ Weekly Strategy ============

    pub async fn generate_weekly_strategy(
        &self,
        scope: &UserScope,
    ) -> Result<WeeklyStrategy, GatewayError> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| GatewayError::Capability(OFFLINE_MESSAGE.to_string()))?;

        let entries = self.store.get_entries(scope);
        let events = build_calendar_projection(&entries, &self.store.get_calendar_events(scope));

        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "goals": { "type": "array", "items": { "type": "string" } },
                "daily_plans": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "day": { "type": "string" },
                            "slots": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "time": { "type": "string" },
                                        "activity": { "type": "string" },
                                        "priority": { "type": "string", "enum": ["high", "medium", "low"] },
                                        "reason": { "type": "string" }
                                    },
                                    "required": ["time", "activity", "priority", "reason"]
                                }
                            }
                        },
                        "required": ["day", "slots"]
                    }
                },
                "critical_alerts": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["goals", "daily_plans", "critical_alerts"]
        });

        let query = format!(
            "COMPANY RECORDS:\n{}\n\nCALENDAR:\n{}",
            build_entry_context(&entries),
            build_event_context(&events)
        );

        let response = gateway
            .complete_text(
                prompts::STRATEGY_PROMPT,
                &[],
                &query,
                CompletionOptions {
                    temperature: 0.3,
                    web_grounding: false,
                    json_schema: Some(schema),
                },
            )
            .await?;

        let structured = response
            .structured
            .ok_or_else(|| GatewayError::Malformed("missing strategy payload".to_string()))?;
        serde_json::from_value(structured)
            .map_err(|e| GatewayError::Malformed(format!("strategy payload: {}", e)))
    }

    // ============ Document Scanner ============

    /// Turn a captured document photo into a knowledge-base entry and
    /// persist it. The analysis decides the entry type; anything the
    /// model mislabels lands as `general`.
    pub async fn analyze_scanned_document(
        &self,
        scope: &UserScope,
        image_base64: &str,
    ) -> Result<BusinessEntry, GatewayError> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| GatewayError::Capability(OFFLINE_MESSAGE.to_string()))?;

        // Accept both raw base64 and the canvas data-URL form.
        let raw = image_base64
            .rsplit_once("base64,")
            .map(|(_, data)| data)
            .unwrap_or(image_base64);

        let analysis = gateway
            .analyze_image_document(raw, prompts::SCAN_ANALYSIS_PROMPT)
            .await?;

        let now = Utc::now();
        let entry = BusinessEntry {
            id: format!("scan-{}", Uuid::new_v4()),
            entry_type: EntryType::from_str(&analysis.doc_type).unwrap_or(EntryType::General),
            title: analysis.title,
            content: analysis.content,
            date: Some(now.format("%Y-%m-%d").to_string()),
            timestamp: now.timestamp_millis(),
            is_sensitive: false,
            metadata: None,
        };

        self.store
            .save_entry(scope, entry.clone())
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        logging::log_assistant(
            Some(scope.tag()),
            &format!("Scanned document archived as {}", entry.entry_type.as_str()),
        );

        Ok(entry)
    }

    // ============ Channel Auto-Reply Simulation ============

    /// Draft an auto-reply for an incoming WhatsApp message. Simulation
    /// only: no real channel traffic, but activity is tracked.
    pub async fn simulate_whatsapp_reply(
        &self,
        scope: &UserScope,
        message: &str,
    ) -> Result<String, GatewayError> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| GatewayError::Capability(OFFLINE_MESSAGE.to_string()))?;

        let entries = self.store.get_entries(scope);
        let instruction = prompts::auto_reply_instruction(&build_entry_context(&entries));

        let response = gateway
            .complete_text(&instruction, &[], message, CompletionOptions::default())
            .await?;

        let mut settings = self.store.get_whatsapp_settings(scope);
        settings.last_activity = Utc::now().timestamp_millis();
        if let Err(e) = self.store.save_whatsapp_settings(scope, &settings) {
            logging::log_error(Some(scope.tag()), &format!("Activity stamp failed: {}", e));
        }

        Ok(response.text)
    }

    /// Draft an auto-reply for a social comment and bump the platform's
    /// reply counters.
    pub async fn simulate_social_reply(
        &self,
        scope: &UserScope,
        platform: SocialPlatform,
        comment: &str,
    ) -> Result<String, GatewayError> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| GatewayError::Capability(OFFLINE_MESSAGE.to_string()))?;

        let entries = self.store.get_entries(scope);
        let instruction = prompts::auto_reply_instruction(&build_entry_context(&entries));
        let query = format!("Social comment: \"{}\". Reply professionally.", comment);

        let response = gateway
            .complete_text(&instruction, &[], &query, CompletionOptions::default())
            .await?;

        let mut settings = self.store.get_social_settings(scope);
        for row in settings.iter_mut() {
            if row.platform == platform {
                row.replies_count += 1;
                row.last_reply_timestamp = Utc::now().timestamp_millis();
            }
        }
        if let Err(e) = self.store.save_social_settings(scope, &settings) {
            logging::log_error(Some(scope.tag()), &format!("Reply counter failed: {}", e));
        }

        Ok(response.text)
    }

    /// Auto-reply gating for an incoming WhatsApp message: the bot only
    /// answers when connected, enabled, and the sender passes the mode.
    pub fn should_auto_reply(&self, scope: &UserScope, sender_is_contact: bool) -> bool {
        let settings = self.store.get_whatsapp_settings(scope);
        if !settings.is_connected || !settings.is_enabled {
            return false;
        }
        match settings.auto_reply_mode {
            AutoReplyMode::All => true,
            AutoReplyMode::ContactsOnly => sender_is_contact,
        }
    }
}

fn truncate_title(text: &str) -> String {
    if text.chars().count() <= SESSION_TITLE_MAX {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(SESSION_TITLE_MAX).collect();
        format!("{}…", truncated.trim_end())
    }
}

fn format_strategy_message(strategy: &WeeklyStrategy) -> String {
    let mut lines = vec!["Weekly plan ready.".to_string()];
    if !strategy.goals.is_empty() {
        lines.push(format!("Goals: {}", strategy.goals.join(" · ")));
    }
    for plan in &strategy.daily_plans {
        let slots: Vec<String> = plan
            .slots
            .iter()
            .map(|s| format!("{} {}", s.time, s.activity))
            .collect();
        lines.push(format!("{}: {}", plan.day, slots.join("; ")));
    }
    if !strategy.critical_alerts.is_empty() {
        lines.push(format!("Critical: {}", strategy.critical_alerts.join(" · ")));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{
        CompletionResponse, ImageResponse, LiveAudioSession, ScannedDocument,
    };
    use crate::store::{MemoryStore, SourceRef, WhatsAppSettings};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted gateway that records which capabilities were exercised.
    struct RecordingGateway {
        calls: Mutex<Vec<String>>,
        fail_completions: bool,
        structured: Option<serde_json::Value>,
    }

    impl RecordingGateway {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_completions: false,
                structured: None,
            }
        }

        fn failing() -> Self {
            Self {
                fail_completions: true,
                ..Self::new()
            }
        }

        fn with_structured(structured: serde_json::Value) -> Self {
            Self {
                structured: Some(structured),
                ..Self::new()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AiGateway for RecordingGateway {
        async fn complete_text(
            &self,
            _system_instruction: &str,
            history: &[ChatMessage],
            _query: &str,
            options: CompletionOptions,
        ) -> Result<CompletionResponse, GatewayError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("complete_text:{}", history.len()));
            if self.fail_completions {
                return Err(GatewayError::Transport("network down".to_string()));
            }
            Ok(CompletionResponse {
                text: "As agreed, the supplier delivers on Friday.".to_string(),
                sources: options
                    .web_grounding
                    .then(|| {
                        vec![SourceRef {
                            uri: "https://example.gov/law".to_string(),
                            title: "Civil Code".to_string(),
                        }]
                    })
                    .unwrap_or_default(),
                structured: self.structured.clone(),
            })
        }

        async fn generate_image(
            &self,
            _prompt: &str,
            _system_instruction: &str,
            _aspect_ratio: &str,
            _size: &str,
        ) -> Result<ImageResponse, GatewayError> {
            self.calls.lock().unwrap().push("generate_image".to_string());
            Ok(ImageResponse {
                text: None,
                image_base64: "aW1hZ2U=".to_string(),
            })
        }

        async fn analyze_image_document(
            &self,
            _image_base64: &str,
            _instruction: &str,
        ) -> Result<ScannedDocument, GatewayError> {
            self.calls
                .lock()
                .unwrap()
                .push("analyze_image_document".to_string());
            Ok(ScannedDocument {
                doc_type: "contact".to_string(),
                title: "Mario Rossi".to_string(),
                content: "mario@rossi.it".to_string(),
            })
        }

        async fn start_live_audio_session(
            &self,
            _system_instruction: &str,
            _voice: &str,
        ) -> Result<LiveAudioSession, GatewayError> {
            Err(GatewayError::Capability("not scripted".to_string()))
        }
    }

    fn orchestrator(gateway: RecordingGateway) -> (Orchestrator, Arc<LocalStore>, Arc<RecordingGateway>) {
        let store = Arc::new(LocalStore::new(Arc::new(MemoryStore::new())));
        let gateway = Arc::new(gateway);
        let orch = Orchestrator::new(
            store.clone(),
            Some(gateway.clone() as Arc<dyn AiGateway>),
        );
        (orch, store, gateway)
    }

    #[tokio::test]
    async fn chat_turn_persists_both_messages_with_one_call() {
        let (orch, store, gateway) = orchestrator(RecordingGateway::new());
        let scope = UserScope::for_email("a@x.com");

        let reply = orch
            .send_chat_message(&scope, ChatTarget::Search, "What did the supplier agree to?")
            .await;

        assert_eq!(reply.role, ChatRole::Assistant);
        assert!(reply.content.contains("Friday"));
        assert_eq!(reply.sources.as_ref().unwrap().len(), 1);

        let history = store.get_search_history(&scope);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[1].role, ChatRole::Assistant);

        let text_calls: Vec<_> = gateway
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("complete_text"))
            .collect();
        // Exactly one primary call; background tasks have their own clock.
        assert!(!text_calls.is_empty());
        assert_eq!(text_calls[0], "complete_text:0");
    }

    #[tokio::test]
    async fn failed_gateway_keeps_user_message_and_falls_back() {
        let (orch, store, _) = orchestrator(RecordingGateway::failing());
        let scope = UserScope::for_email("a@x.com");

        let reply = orch
            .send_chat_message(&scope, ChatTarget::Search, "hello?")
            .await;

        assert_eq!(reply.content, CHAT_FALLBACK_MESSAGE);
        let history = store.get_search_history(&scope);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello?");
    }

    #[tokio::test]
    async fn missing_credential_degrades_to_offline_message() {
        let store = Arc::new(LocalStore::new(Arc::new(MemoryStore::new())));
        let orch = Orchestrator::new(store.clone(), None);
        let scope = UserScope::guest();

        let reply = orch
            .send_chat_message(&scope, ChatTarget::Search, "anyone there?")
            .await;

        assert_eq!(reply.content, OFFLINE_MESSAGE);
        // The user's own message still landed in history.
        assert_eq!(store.get_search_history(&scope).len(), 2);
        assert!(!orch.is_online());
    }

    #[tokio::test]
    async fn image_requests_route_to_the_image_capability() {
        let (orch, _, gateway) = orchestrator(RecordingGateway::new());
        let scope = UserScope::for_email("a@x.com");

        let reply = orch
            .send_chat_message(&scope, ChatTarget::Search, "Disegna il nuovo logo")
            .await;

        assert!(gateway.calls().contains(&"generate_image".to_string()));
        assert!(reply
            .image_url
            .as_deref()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn workspace_turns_create_a_titled_session() {
        let (orch, store, _) = orchestrator(RecordingGateway::new());
        let scope = UserScope::for_email("a@x.com");

        orch.send_chat_message(
            &scope,
            ChatTarget::Session("s1".to_string()),
            "Draft the renewal contract for the Rossi account",
        )
        .await;

        let sessions = store.get_sessions(&scope);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "s1");
        assert!(sessions[0].title.starts_with("Draft the renewal contract"));
        assert_eq!(sessions[0].messages.len(), 2);
        assert!(sessions[0].last_update > 0);

        // Search history is untouched by workspace turns.
        assert!(store.get_search_history(&scope).is_empty());
    }

    #[tokio::test]
    async fn strategy_payload_parses_into_a_week_plan() {
        let strategy_json = serde_json::json!({
            "goals": ["Close the Rossi renewal"],
            "daily_plans": [
                {
                    "day": "Monday",
                    "slots": [
                        { "time": "09:00", "activity": "Call Rossi", "priority": "high", "reason": "contract expires" }
                    ]
                }
            ],
            "critical_alerts": ["VAT deadline Thursday"]
        });
        let (orch, _, _) = orchestrator(RecordingGateway::with_structured(strategy_json));
        let scope = UserScope::for_email("a@x.com");

        let strategy = orch.generate_weekly_strategy(&scope).await.unwrap();
        assert_eq!(strategy.goals.len(), 1);
        assert_eq!(strategy.daily_plans[0].slots[0].priority, Priority::High);
        assert_eq!(strategy.critical_alerts[0], "VAT deadline Thursday");
    }

    #[tokio::test]
    async fn scanned_documents_are_archived_with_scan_ids() {
        let (orch, store, gateway) = orchestrator(RecordingGateway::new());
        let scope = UserScope::for_email("a@x.com");

        let entry = orch
            .analyze_scanned_document(&scope, "data:image/jpeg;base64,Zm9v")
            .await
            .unwrap();

        assert!(entry.id.starts_with("scan-"));
        assert_eq!(entry.entry_type, EntryType::Contact);
        assert_eq!(entry.title, "Mario Rossi");
        assert!(entry.date.is_some());
        assert!(gateway.calls().contains(&"analyze_image_document".to_string()));

        let entries = store.get_entries(&scope);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, entry.id);
    }

    #[tokio::test]
    async fn social_reply_bumps_platform_counters() {
        let (orch, store, _) = orchestrator(RecordingGateway::new());
        let scope = UserScope::for_email("a@x.com");

        let reply = orch
            .simulate_social_reply(&scope, SocialPlatform::Instagram, "Do you ship abroad?")
            .await
            .unwrap();
        assert!(!reply.is_empty());

        let settings = store.get_social_settings(&scope);
        let instagram = settings
            .iter()
            .find(|s| s.platform == SocialPlatform::Instagram)
            .unwrap();
        assert_eq!(instagram.replies_count, 1);
        assert!(instagram.last_reply_timestamp > 0);

        let facebook = settings
            .iter()
            .find(|s| s.platform == SocialPlatform::Facebook)
            .unwrap();
        assert_eq!(facebook.replies_count, 0);
    }

    #[tokio::test]
    async fn whatsapp_reply_stamps_activity() {
        let (orch, store, _) = orchestrator(RecordingGateway::new());
        let scope = UserScope::for_email("a@x.com");

        orch.simulate_whatsapp_reply(&scope, "Are you open tomorrow?")
            .await
            .unwrap();

        assert!(store.get_whatsapp_settings(&scope).last_activity > 0);
    }

    #[test]
    fn auto_reply_gate_respects_mode_and_enablement() {
        let store = Arc::new(LocalStore::new(Arc::new(MemoryStore::new())));
        let orch = Orchestrator::new(store.clone(), None);
        let scope = UserScope::for_email("a@x.com");

        // Disconnected bot never replies.
        assert!(!orch.should_auto_reply(&scope, true));

        store
            .save_whatsapp_settings(
                &scope,
                &WhatsAppSettings {
                    is_connected: true,
                    is_enabled: true,
                    last_activity: 0,
                    auto_reply_mode: AutoReplyMode::ContactsOnly,
                },
            )
            .unwrap();
        assert!(orch.should_auto_reply(&scope, true));
        assert!(!orch.should_auto_reply(&scope, false));

        store
            .save_whatsapp_settings(
                &scope,
                &WhatsAppSettings {
                    is_connected: true,
                    is_enabled: true,
                    last_activity: 0,
                    auto_reply_mode: AutoReplyMode::All,
                },
            )
            .unwrap();
        assert!(orch.should_auto_reply(&scope, false));
    }

    #[test]
    fn long_session_titles_are_truncated() {
        let long = "a".repeat(80);
        let title = truncate_title(&long);
        assert!(title.chars().count() <= SESSION_TITLE_MAX + 1);
        assert!(title.ends_with('…'));
        assert_eq!(truncate_title("short"), "short");
    }
}
