use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::store::{ChatMessage, ChatRole, SourceRef};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

// Model constants
pub const GEMINI_PRO: &str = "gemini-3-pro-preview";
pub const GEMINI_PRO_IMAGE: &str = "gemini-3-pro-image-preview";
pub const GEMINI_LIVE_AUDIO: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

// Thinking budget for legal/strategic reasoning turns
const REASONING_THINKING_BUDGET: u32 = 2048;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("gateway error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("gateway response was not parseable: {0}")]
    Malformed(String),
    #[error("capability not available: {0}")]
    Capability(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

/// Per-call knobs for text completion. A JSON schema forces a
/// structured response; web grounding enables the legal-search tool.
/// The two are mutually exclusive on the wire.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub web_grounding: bool,
    pub json_schema: Option<Value>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            web_grounding: false,
            json_schema: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub sources: Vec<SourceRef>,
    /// Parsed JSON payload, present when a schema was requested.
    pub structured: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ImageResponse {
    pub text: Option<String>,
    pub image_base64: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannedDocument {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub title: String,
    pub content: String,
}

/// Events emitted by a live bidirectional audio session.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    InputTranscript(String),
    OutputTranscript(String),
    OutputAudioChunk(Vec<u8>),
    TurnComplete,
    Interrupted,
}

/// Handle to a live audio session: PCM chunks go in, events come out.
/// Dropping the handle releases the session.
pub struct LiveAudioSession {
    pub audio_in: mpsc::Sender<Vec<u8>>,
    pub events: mpsc::Receiver<LiveEvent>,
}

/// The remote generative-AI service, seen through the operations the
/// engine needs. Implemented over HTTP by `GeminiClient`; tests script
/// their own implementation.
#[async_trait]
pub trait AiGateway: Send + Sync {
    async fn complete_text(
        &self,
        system_instruction: &str,
        history: &[ChatMessage],
        query: &str,
        options: CompletionOptions,
    ) -> Result<CompletionResponse, GatewayError>;

    async fn generate_image(
        &self,
        prompt: &str,
        system_instruction: &str,
        aspect_ratio: &str,
        size: &str,
    ) -> Result<ImageResponse, GatewayError>;

    async fn analyze_image_document(
        &self,
        image_base64: &str,
        instruction: &str,
    ) -> Result<ScannedDocument, GatewayError>;

    async fn start_live_audio_session(
        &self,
        system_instruction: &str,
        voice: &str,
    ) -> Result<LiveAudioSession, GatewayError>;
}

// ============ Wire Types ============

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
    image_size: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    uri: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: ErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    message: String,
    #[serde(default)]
    status: String,
}

// ============ Client ============

pub struct GeminiClient {
    client: Client,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
        }
    }

    /// Reads the hosting environment's credential. None degrades every
    /// AI-backed feature to its local fallback; the shell keeps running.
    pub fn from_env() -> Option<Self> {
        std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .ok()
            .filter(|key| !key.is_empty())
            .map(|key| Self::new(&key))
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GatewayError> {
        let url = format!("{}/{}:generateContent", GEMINI_API_URL, model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();

            if let Ok(parsed) = serde_json::from_str::<GeminiError>(&error_text) {
                return Err(GatewayError::Api {
                    status,
                    message: format!("{} - {}", parsed.error.status, parsed.error.message),
                });
            }

            return Err(GatewayError::Api {
                status,
                message: error_text,
            });
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))
    }

    /// Quick round-trip to confirm the credential works.
    pub async fn validate_api_key(&self) -> Result<bool, GatewayError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::text("Say 'ok'")],
            }],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                temperature: Some(0.0),
                response_mime_type: None,
                response_schema: None,
                thinking_config: None,
                image_config: None,
            }),
            tools: None,
        };
        self.generate(GEMINI_PRO, &request).await.map(|_| true)
    }
}

fn history_to_contents(history: &[ChatMessage], query: &str) -> Vec<Content> {
    let mut contents: Vec<Content> = history
        .iter()
        .map(|m| Content {
            role: Some(match m.role {
                ChatRole::User => "user".to_string(),
                ChatRole::Assistant => "model".to_string(),
            }),
            parts: vec![Part::text(&m.content)],
        })
        .collect();
    contents.push(Content {
        role: Some("user".to_string()),
        parts: vec![Part::text(query)],
    });
    contents
}

fn collect_text(content: &Content) -> String {
    content
        .parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("")
}

#[async_trait]
impl AiGateway for GeminiClient {
    async fn complete_text(
        &self,
        system_instruction: &str,
        history: &[ChatMessage],
        query: &str,
        options: CompletionOptions,
    ) -> Result<CompletionResponse, GatewayError> {
        let wants_structured = options.json_schema.is_some();

        let request = GenerateContentRequest {
            contents: history_to_contents(history, query),
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::text(system_instruction)],
            }),
            generation_config: Some(GenerationConfig {
                temperature: Some(options.temperature),
                response_mime_type: wants_structured
                    .then(|| "application/json".to_string()),
                response_schema: options.json_schema,
                thinking_config: Some(ThinkingConfig {
                    thinking_budget: REASONING_THINKING_BUDGET,
                }),
                image_config: None,
            }),
            // The search tool and a response schema are mutually
            // exclusive on the wire; structured calls go unguarded.
            tools: (options.web_grounding && !wants_structured)
                .then(|| vec![serde_json::json!({ "googleSearch": {} })]),
        };

        let response = self.generate(GEMINI_PRO, &request).await?;
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Malformed("no candidates in response".to_string()))?;

        let text = candidate
            .content
            .as_ref()
            .map(collect_text)
            .unwrap_or_default();
        if text.is_empty() {
            return Err(GatewayError::Malformed("empty text response".to_string()));
        }

        let sources = candidate
            .grounding_metadata
            .map(|g| {
                g.grounding_chunks
                    .into_iter()
                    .filter_map(|c| c.web)
                    .filter_map(|w| {
                        Some(SourceRef {
                            uri: w.uri?,
                            title: w.title.unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        // A schema-constrained call must come back as parseable JSON.
        let structured = if wants_structured {
            let cleaned = text
                .trim()
                .trim_start_matches("```json")
                .trim_end_matches("```")
                .trim();
            Some(
                serde_json::from_str(cleaned)
                    .map_err(|e| GatewayError::Malformed(format!("structured response: {}", e)))?,
            )
        } else {
            None
        };

        Ok(CompletionResponse {
            text,
            sources,
            structured,
        })
    }

    async fn generate_image(
        &self,
        prompt: &str,
        system_instruction: &str,
        aspect_ratio: &str,
        size: &str,
    ) -> Result<ImageResponse, GatewayError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(prompt)],
            }],
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::text(system_instruction)],
            }),
            generation_config: Some(GenerationConfig {
                temperature: None,
                response_mime_type: None,
                response_schema: None,
                thinking_config: None,
                image_config: Some(ImageConfig {
                    aspect_ratio: aspect_ratio.to_string(),
                    image_size: size.to_string(),
                }),
            }),
            tools: None,
        };

        let response = self.generate(GEMINI_PRO_IMAGE, &request).await?;
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Malformed("no candidates in response".to_string()))?;

        let mut text = None;
        let mut image_base64 = None;
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(inline) = part.inline_data {
                    image_base64 = Some(inline.data);
                } else if let Some(t) = part.text {
                    text = Some(t);
                }
            }
        }

        let image_base64 = image_base64
            .ok_or_else(|| GatewayError::Malformed("no image in response".to_string()))?;

        Ok(ImageResponse { text, image_base64 })
    }

    async fn analyze_image_document(
        &self,
        image_base64: &str,
        instruction: &str,
    ) -> Result<ScannedDocument, GatewayError> {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "type": { "type": "string" },
                "title": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["type", "title", "content"]
        });

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: "image/jpeg".to_string(),
                            data: image_base64.to_string(),
                        }),
                    },
                    Part::text(instruction),
                ],
            }],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                temperature: Some(0.1),
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(schema),
                thinking_config: None,
                image_config: None,
            }),
            tools: None,
        };

        let response = self.generate(GEMINI_PRO, &request).await?;
        let text = response
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(collect_text)
            .unwrap_or_default();

        serde_json::from_str(text.trim())
            .map_err(|e| GatewayError::Malformed(format!("document analysis: {}", e)))
    }

    async fn start_live_audio_session(
        &self,
        _system_instruction: &str,
        _voice: &str,
    ) -> Result<LiveAudioSession, GatewayError> {
        // The live channel needs a realtime transport the REST client
        // does not carry; callers surface the per-feature fallback.
        Err(GatewayError::Capability(format!(
            "live audio ({}) requires a realtime transport",
            GEMINI_LIVE_AUDIO
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_maps_assistant_role_to_model() {
        let history = vec![
            ChatMessage {
                id: "1".to_string(),
                role: ChatRole::User,
                content: "hello".to_string(),
                timestamp: 0,
                sources: None,
                image_url: None,
                suggested_save: None,
            },
            ChatMessage {
                id: "2".to_string(),
                role: ChatRole::Assistant,
                content: "hi".to_string(),
                timestamp: 1,
                sources: None,
                image_url: None,
                suggested_save: None,
            },
        ];

        let contents = history_to_contents(&history, "next question");
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0].role.as_deref(), Some("user"));
        assert_eq!(contents[1].role.as_deref(), Some("model"));
        assert_eq!(contents[2].role.as_deref(), Some("user"));
        assert_eq!(contents[2].parts[0].text.as_deref(), Some("next question"));
    }

    #[test]
    fn grounding_chunks_deserialize_into_sources() {
        let raw = r#"{
            "candidates": [{
                "content": { "parts": [{ "text": "per art. 2082 c.c." }] },
                "groundingMetadata": {
                    "groundingChunks": [
                        { "web": { "uri": "https://example.gov/law", "title": "Civil Code" } },
                        { "web": { "uri": "https://example.gov/other" } }
                    ]
                }
            }]
        }"#;

        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let candidate = &parsed.candidates[0];
        let chunks = &candidate.grounding_metadata.as_ref().unwrap().grounding_chunks;
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[0].web.as_ref().unwrap().uri.as_deref(),
            Some("https://example.gov/law")
        );
        // A chunk without a title still yields a source with an empty title.
        assert!(chunks[1].web.as_ref().unwrap().title.is_none());
    }

    #[test]
    fn scanned_document_parses_from_schema_response() {
        let doc: ScannedDocument = serde_json::from_str(
            r#"{"type": "contact", "title": "Mario Rossi", "content": "mario@rossi.it"}"#,
        )
        .unwrap();
        assert_eq!(doc.doc_type, "contact");
        assert_eq!(doc.title, "Mario Rossi");
    }
}
