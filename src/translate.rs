// Label translation through an OpenAI-compatible chat endpoint
use crate::config::TranslationConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("missing api key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Translates one catalog label. `context` names what the label describes
/// (manufacturer, color, ...).
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(&self, text: &str, context: &str) -> Result<String, TranslationError>;
}

/// Provider used when translation is switched off; every call fails so the
/// resolver keeps the original label.
pub struct NoTranslation;

#[async_trait]
impl TranslationProvider for NoTranslation {
    async fn translate(&self, _text: &str, _context: &str) -> Result<String, TranslationError> {
        Err(TranslationError::InvalidResponse("translation disabled".into()))
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranslatedText {
    translated_text: String,
}

pub struct LlmTranslator {
    http: Client,
    config: TranslationConfig,
}

impl LlmTranslator {
    pub fn new(config: TranslationConfig, timeout: Duration) -> Result<Self, TranslationError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TranslationError::Http(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn messages(&self, text: &str, context: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: "system",
                content: format!(
                    "You translate used-car catalog labels from {} to {}. Keep brand names and \
                     trim codes recognizable. Answer only with JSON: {{\"translated_text\": \"...\"}}",
                    self.config.source_language, self.config.target_language
                ),
            },
            ChatMessage {
                role: "user",
                content: format!("Field: {}\nText: {}", context, text),
            },
        ]
    }
}

#[async_trait]
impl TranslationProvider for LlmTranslator {
    async fn translate(&self, text: &str, context: &str) -> Result<String, TranslationError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(TranslationError::MissingApiKey)?;

        let body = ChatRequest {
            model: &self.config.model,
            messages: self.messages(text, context),
            temperature: 0.0,
            response_format: ResponseFormat {
                r#type: "json_object",
            },
        };
        let endpoint = self.config.endpoint.trim_end_matches('/');
        let response = self
            .http
            .post(format!("{endpoint}/chat/completions"))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|err| TranslationError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(TranslationError::Http(format!("HTTP {}", response.status())));
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| TranslationError::InvalidResponse(err.to_string()))?;
        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| TranslationError::InvalidResponse("missing content".into()))?;

        extract_translated_text(&content)
            .ok_or_else(|| TranslationError::InvalidResponse(format!("no translation in {content:?}")))
    }
}

/// Pulls the translation out of a model reply: a `translated_text` JSON
/// object, possibly fenced or surrounded by prose, or bare text in quotes.
pub fn extract_translated_text(reply: &str) -> Option<String> {
    let unfenced = strip_code_fence(reply.trim());

    if let (Some(start), Some(end)) = (unfenced.find('{'), unfenced.rfind('}')) {
        if start < end {
            if let Ok(parsed) = serde_json::from_str::<TranslatedText>(&unfenced[start..=end]) {
                let text = parsed.translated_text.trim().to_string();
                return (!text.is_empty()).then_some(text);
            }
        }
    }

    let bare = unfenced
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    if bare.is_empty() || bare.contains('{') {
        None
    } else {
        Some(bare.to_string())
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // drop the language tag line, e.g. ```json
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
