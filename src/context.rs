//! Context assembler: classifies query intent locally and builds the
//! textual context blocks handed to the gateway on every turn. All of
//! this is pure and zero-network; it runs before any remote call so the
//! right capability is picked without a wasted round-trip.

use chrono::{TimeZone, Utc};

use crate::prompts::EMPTY_DATABASE_MARKER;
use crate::store::{BusinessEntry, CalendarEvent, BehavioralInsights, EntryType};

/// Which gateway capability a query needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    GenerateImage,
    WeeklyStrategy,
    Conversational,
}

/// Pure pattern match over the query text. Image and strategy requests
/// are routed to their dedicated capabilities; everything else is a
/// conversational/search turn.
pub fn classify_intent(query: &str) -> QueryIntent {
    let lower = query.to_lowercase();

    // Italian triggers first (the original audience), then English.
    let image_triggers = [
        "disegna",
        "genera immagine",
        "genera un'immagine",
        "crea immagine",
        "crea un'immagine",
        "illustra",
        "fammi un disegno",
        "draw me",
        "draw a",
        "generate an image",
        "generate image",
        "create an image",
        "create image",
        "make me a logo",
        "design a logo",
    ];
    if image_triggers.iter().any(|t| lower.contains(t)) {
        return QueryIntent::GenerateImage;
    }

    let strategy_triggers = [
        "organizza la settimana",
        "piano settimanale",
        "strategia settimanale",
        "plan my week",
        "organize my week",
        "organise my week",
        "weekly plan",
        "weekly strategy",
    ];
    if strategy_triggers.iter().any(|t| lower.contains(t)) {
        return QueryIntent::WeeklyStrategy;
    }

    QueryIntent::Conversational
}

/// Serialize the knowledge base into the fixed-format block the model
/// reads. An empty collection yields an explicit marker rather than an
/// empty string, so the model is never handed ambiguous context.
pub fn build_entry_context(entries: &[BusinessEntry]) -> String {
    if entries.is_empty() {
        return EMPTY_DATABASE_MARKER.to_string();
    }

    entries
        .iter()
        .map(|e| {
            format!(
                "[Type: {}]\n[Title: {}]\n[Content: {}]\n[Date: {}]",
                e.entry_type.as_str().to_uppercase(),
                e.title,
                e.content,
                e.date.as_deref().unwrap_or("N/A")
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// Compact entry listing for the voice channel, one line per record.
pub fn build_voice_context(entries: &[BusinessEntry]) -> String {
    if entries.is_empty() {
        return "EMPTY".to_string();
    }
    entries
        .iter()
        .map(|e| format!("[{}] {}: {}", e.entry_type.as_str(), e.title, e.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn date_from_timestamp(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

/// Union of persisted manual events and synthetic events projected from
/// appointment-type entries. Synthetic events carry a `kb-` prefixed id,
/// default to 09:00 for an hour, and are recomputed on every call —
/// they are never written back to the calendar collection.
pub fn build_calendar_projection(
    entries: &[BusinessEntry],
    manual_events: &[CalendarEvent],
) -> Vec<CalendarEvent> {
    let mut events: Vec<CalendarEvent> = manual_events.to_vec();

    events.extend(
        entries
            .iter()
            .filter(|e| e.entry_type == EntryType::Appointment)
            .map(|e| CalendarEvent {
                id: format!("kb-{}", e.id),
                title: e.title.clone(),
                description: e.content.clone(),
                date: e
                    .date
                    .clone()
                    .unwrap_or_else(|| date_from_timestamp(e.timestamp)),
                time: "09:00".to_string(),
                duration: 60,
                is_ai_related: true,
            }),
    );

    events
}

/// Serialize the calendar projection for strategy and guardian prompts.
pub fn build_event_context(events: &[CalendarEvent]) -> String {
    if events.is_empty() {
        return "NO SCHEDULED EVENTS".to_string();
    }
    events
        .iter()
        .map(|e| {
            format!(
                "[{} {}] {} ({} min): {}",
                e.date, e.time, e.title, e.duration, e.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Short directive block steering tone and anticipation, built from the
/// persisted behavioral profile. Empty when no analysis has landed yet.
pub fn build_insight_context(insights: &BehavioralInsights) -> String {
    if insights.last_analysis == 0 {
        return String::new();
    }

    let mut parts = Vec::new();
    if !insights.writing_style.is_empty() {
        parts.push(format!("Writing style to mirror: {}", insights.writing_style));
    }
    if !insights.frequent_topics.is_empty() {
        parts.push(format!(
            "Recurring topics: {}",
            insights.frequent_topics.join(", ")
        ));
    }
    if !insights.anticipated_needs.is_empty() {
        parts.push(format!(
            "Likely upcoming needs: {}",
            insights.anticipated_needs.join(", ")
        ));
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, entry_type: EntryType, date: Option<&str>) -> BusinessEntry {
        BusinessEntry {
            id: id.to_string(),
            entry_type,
            title: "Meeting".to_string(),
            content: "Quarterly review".to_string(),
            date: date.map(|d| d.to_string()),
            timestamp: 1_704_067_200_000, // 2024-01-01
            is_sensitive: false,
            metadata: None,
        }
    }

    #[test]
    fn image_requests_are_detected_in_both_languages() {
        assert_eq!(classify_intent("Disegna il nuovo logo"), QueryIntent::GenerateImage);
        assert_eq!(
            classify_intent("please generate an image of our shop front"),
            QueryIntent::GenerateImage
        );
    }

    #[test]
    fn strategy_requests_route_to_the_planner() {
        assert_eq!(
            classify_intent("Organizza la settimana per me"),
            QueryIntent::WeeklyStrategy
        );
        assert_eq!(classify_intent("plan my week"), QueryIntent::WeeklyStrategy);
    }

    #[test]
    fn everything_else_is_conversational() {
        assert_eq!(
            classify_intent("What did I agree with the supplier?"),
            QueryIntent::Conversational
        );
    }

    #[test]
    fn empty_knowledge_base_yields_explicit_marker() {
        let context = build_entry_context(&[]);
        assert_eq!(context, EMPTY_DATABASE_MARKER);
        assert!(!context.is_empty());
    }

    #[test]
    fn entry_context_serializes_fixed_blocks() {
        let entries = vec![
            entry("e1", EntryType::Note, Some("2024-01-05")),
            entry("e2", EntryType::Contact, None),
        ];
        let context = build_entry_context(&entries);
        assert!(context.contains("[Type: NOTE]"));
        assert!(context.contains("[Type: CONTACT]"));
        assert!(context.contains("[Date: 2024-01-05]"));
        assert!(context.contains("[Date: N/A]"));
        assert!(context.contains("\n---\n"));
    }

    #[test]
    fn projection_merges_manual_and_synthetic_events() {
        let manual = vec![CalendarEvent {
            id: "m1".to_string(),
            title: "Supplier call".to_string(),
            description: String::new(),
            date: "2024-01-10".to_string(),
            time: "14:00".to_string(),
            duration: 30,
            is_ai_related: false,
        }];
        let entries = vec![entry("e7", EntryType::Appointment, Some("2024-01-12"))];

        let events = build_calendar_projection(&entries, &manual);
        assert_eq!(events.len(), 2);

        let synthetic = events.iter().find(|e| e.id == "kb-e7").unwrap();
        assert!(synthetic.is_ai_related);
        assert_eq!(synthetic.time, "09:00");
        assert_eq!(synthetic.duration, 60);
        assert_eq!(synthetic.date, "2024-01-12");
    }

    #[test]
    fn synthetic_date_falls_back_to_entry_timestamp() {
        let entries = vec![entry("e8", EntryType::Appointment, None)];
        let events = build_calendar_projection(&entries, &[]);
        assert_eq!(events[0].date, "2024-01-01");
    }

    #[test]
    fn non_appointment_entries_are_not_projected() {
        let entries = vec![
            entry("e1", EntryType::Note, None),
            entry("e2", EntryType::Document, None),
        ];
        assert!(build_calendar_projection(&entries, &[]).is_empty());
    }

    #[test]
    fn insight_context_is_empty_before_first_analysis() {
        let insights = BehavioralInsights::default();
        assert!(build_insight_context(&insights).is_empty());
    }

    #[test]
    fn insight_context_lists_style_and_topics() {
        let insights = BehavioralInsights {
            writing_style: "formal".to_string(),
            frequent_topics: vec!["tax".to_string(), "invoices".to_string()],
            anticipated_needs: vec!["quarterly report".to_string()],
            guardian_alerts: Vec::new(),
            last_analysis: 1_700_000_000_000,
        };
        let context = build_insight_context(&insights);
        assert!(context.contains("formal"));
        assert!(context.contains("tax, invoices"));
        assert!(context.contains("quarterly report"));
    }
}
