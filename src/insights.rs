//! Behavioral insight and guardian reconciliation.
//!
//! Both operations run as best-effort background tasks after the primary
//! chat response: insight fragments are shallow-merged into the persisted
//! profile, guardian sweeps replace the whole alert list. Failures are
//! logged and swallowed; they must never surface to the primary flow.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::{build_entry_context, build_event_context};
use crate::gateway::{AiGateway, CompletionOptions, GatewayError};
use crate::logging;
use crate::prompts::{GUARDIAN_PROMPT, INSIGHT_ANALYSIS_PROMPT};
use crate::store::{
    AlertKind, BehavioralInsights, BusinessEntry, CalendarEvent, ChatMessage, ChatRole,
    GuardianAlert, LocalStore, Priority, UserScope,
};

/// Below this many turns the profile signal is too thin to act on.
const MIN_HISTORY_FOR_ANALYSIS: usize = 3;

/// A freshly inferred profile fragment. Only the fields present
/// overwrite the persisted profile; everything absent is retained.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct InsightFragment {
    pub writing_style: Option<String>,
    pub frequent_topics: Option<Vec<String>>,
    pub anticipated_needs: Option<Vec<String>>,
}

/// Shallow merge: fragment fields overwrite, absent fields survive, and
/// `last_analysis` is always stamped with the merge time regardless of
/// what the fragment contained.
pub fn merge_insights(
    previous: &BehavioralInsights,
    fragment: &InsightFragment,
    merged_at: i64,
) -> BehavioralInsights {
    BehavioralInsights {
        writing_style: fragment
            .writing_style
            .clone()
            .unwrap_or_else(|| previous.writing_style.clone()),
        frequent_topics: fragment
            .frequent_topics
            .clone()
            .unwrap_or_else(|| previous.frequent_topics.clone()),
        anticipated_needs: fragment
            .anticipated_needs
            .clone()
            .unwrap_or_else(|| previous.anticipated_needs.clone()),
        guardian_alerts: previous.guardian_alerts.clone(),
        last_analysis: merged_at,
    }
}

#[derive(Debug, Deserialize)]
struct AlertsPayload {
    alerts: Vec<RawAlert>,
}

#[derive(Debug, Deserialize)]
struct RawAlert {
    #[serde(rename = "type")]
    kind: AlertKind,
    message: String,
    severity: Priority,
}

pub struct InsightEngine {
    store: Arc<LocalStore>,
    gateway: Arc<dyn AiGateway>,
}

impl InsightEngine {
    pub fn new(store: Arc<LocalStore>, gateway: Arc<dyn AiGateway>) -> Self {
        Self { store, gateway }
    }

    /// Fire-and-forget profile analysis over the conversation so far.
    /// Guarded by a minimum history length; fewer turns is a no-op.
    pub fn schedule_background_analysis(&self, scope: UserScope, history: Vec<ChatMessage>) {
        if history.len() < MIN_HISTORY_FOR_ANALYSIS {
            logging::log_background(
                Some(scope.tag()),
                "Skipping insight analysis: history too short",
            );
            return;
        }

        let store = self.store.clone();
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            match Self::run_analysis(&store, gateway.as_ref(), &scope, &history).await {
                Ok(()) => logging::log_background(Some(scope.tag()), "Insight merge persisted"),
                Err(e) => logging::log_error(
                    Some(scope.tag()),
                    &format!("Insight analysis swallowed failure: {}", e),
                ),
            }
        });
    }

    pub(crate) async fn run_analysis(
        store: &LocalStore,
        gateway: &dyn AiGateway,
        scope: &UserScope,
        history: &[ChatMessage],
    ) -> Result<(), GatewayError> {
        let conversation = history
            .iter()
            .map(|m| {
                let speaker = match m.role {
                    ChatRole::User => "USER",
                    ChatRole::Assistant => "ASSISTANT",
                };
                format!("{}: {}", speaker, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "writing_style": { "type": "string" },
                "frequent_topics": { "type": "array", "items": { "type": "string" } },
                "anticipated_needs": { "type": "array", "items": { "type": "string" } }
            }
        });

        let response = gateway
            .complete_text(
                INSIGHT_ANALYSIS_PROMPT,
                &[],
                &format!("CONVERSATION:\n{}", conversation),
                CompletionOptions {
                    temperature: 0.2,
                    web_grounding: false,
                    json_schema: Some(schema),
                },
            )
            .await?;

        let structured = response
            .structured
            .ok_or_else(|| GatewayError::Malformed("missing structured fragment".to_string()))?;
        let fragment: InsightFragment = serde_json::from_value(structured)
            .map_err(|e| GatewayError::Malformed(format!("insight fragment: {}", e)))?;

        let previous = store.get_insights(scope);
        let merged = merge_insights(&previous, &fragment, Utc::now().timestamp_millis());
        store
            .save_insights(scope, &merged)
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(())
    }

    /// Fire-and-forget guardian sweep. The whole alert list is replaced
    /// with the latest result; no merge, no dedup.
    pub fn schedule_guardian_check(
        &self,
        scope: UserScope,
        entries: Vec<BusinessEntry>,
        events: Vec<CalendarEvent>,
    ) {
        let store = self.store.clone();
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            match Self::run_guardian_check(&store, gateway.as_ref(), &scope, &entries, &events)
                .await
            {
                Ok(count) => logging::log_background(
                    Some(scope.tag()),
                    &format!("Guardian check replaced alert list: {} alerts", count),
                ),
                Err(e) => logging::log_error(
                    Some(scope.tag()),
                    &format!("Guardian check swallowed failure: {}", e),
                ),
            }
        });
    }

    pub(crate) async fn run_guardian_check(
        store: &LocalStore,
        gateway: &dyn AiGateway,
        scope: &UserScope,
        entries: &[BusinessEntry],
        events: &[CalendarEvent],
    ) -> Result<usize, GatewayError> {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "alerts": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": { "type": "string", "enum": ["forgotten", "anomaly", "strategy"] },
                            "message": { "type": "string" },
                            "severity": { "type": "string", "enum": ["high", "medium", "low"] }
                        },
                        "required": ["type", "message", "severity"]
                    }
                }
            },
            "required": ["alerts"]
        });

        let query = format!(
            "COMPANY RECORDS:\n{}\n\nCALENDAR:\n{}",
            build_entry_context(entries),
            build_event_context(events)
        );

        let response = gateway
            .complete_text(
                GUARDIAN_PROMPT,
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
            .ok_or_else(|| GatewayError::Malformed("missing alerts payload".to_string()))?;
        let payload: AlertsPayload = serde_json::from_value(structured)
            .map_err(|e| GatewayError::Malformed(format!("alerts payload: {}", e)))?;

        let now = Utc::now().timestamp_millis();
        let alerts: Vec<GuardianAlert> = payload
            .alerts
            .into_iter()
            .map(|raw| GuardianAlert {
                id: Uuid::new_v4().to_string(),
                kind: raw.kind,
                message: raw.message,
                severity: raw.severity,
                timestamp: now,
            })
            .collect();
        let count = alerts.len();

        let mut insights = store.get_insights(scope);
        insights.guardian_alerts = alerts;
        store
            .save_insights(scope, &insights)
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(count)
    }
}
