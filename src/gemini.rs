//! Direct Gemini client for transcription and grounded chat.
//!
//! This module provides a client that connects directly to the Google
//! Generative Language API. Users provide their own Gemini API key.

use crate::codec::{self, AudioPayload};
use crate::credentials::ApiKey;
use crate::error::GatewayError;
use crate::gateway::{ChatHandle, MessagePart, SpeechGateway};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};
use url::Url;
use zeroize::Zeroize;

/// Maximum number of retry attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Initial delay between retries (doubles with each attempt).
const INITIAL_RETRY_DELAY_MS: u64 = 1000;

/// Largest audio payload accepted inline by the API.
const MAX_INLINE_AUDIO_BYTES: usize = 19 * 1024 * 1024;

/// Prompt sent alongside the audio for transcription.
const TRANSCRIBE_PROMPT: &str = r#"You are an expert transcriber. Listen to the attached audio and produce a clean, corrected transcript in English. Fix obvious speech disfluencies, add punctuation, and ensure proper sentence structure. If the audio is spoken in another language, translate the transcript into English while preserving the original meaning and tone.

Return only the transcript without any additional commentary."#;

/// System instruction for the follow-up chat session.
const CHAT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant. The user has shared an audio recording together with its transcript. Answer follow-up questions grounded in that audio and transcript. When the user sends a spoken question, listen to it and answer in the context of the earlier recording and the conversation so far."#;

/// Client for direct Gemini API calls.
pub(crate) struct GeminiClient {
    api_key: String,
    base_url: Url,
    client: reqwest::Client,
}

/// Request body for the generateContent endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

/// One message in the request or response.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

/// One part of a message: text or inline binary data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    inline_data: Option<InlineData>,
}

/// Inline binary payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

/// Response from the generateContent endpoint.
#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

/// Candidate in the response.
#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl Content {
    fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts,
        }
    }

    fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Some("model".to_string()),
            parts,
        }
    }
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    fn audio(audio: &AudioPayload) -> Self {
        Self {
            inline_data: Some(InlineData {
                mime_type: audio.clean_mime_type().to_string(),
                data: codec::encode(audio).data,
            }),
            ..Default::default()
        }
    }
}

impl GeminiClient {
    /// Create a new Gemini client from a credential and API base URL.
    pub(crate) fn new(key: &ApiKey, base_url: &str) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid Gemini API base URL")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client for GeminiClient")?;

        Ok(Self {
            api_key: key.as_str().to_string(),
            base_url,
            client,
        })
    }

    fn validate_audio(audio: &AudioPayload) -> Result<(), GatewayError> {
        if audio.is_empty() {
            return Err(GatewayError::EmptyAudio);
        }
        if audio.bytes.len() > MAX_INLINE_AUDIO_BYTES {
            return Err(GatewayError::AudioTooLarge {
                size: audio.bytes.len(),
                max_size: MAX_INLINE_AUDIO_BYTES,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechGateway for GeminiClient {
    /// Transcribe audio into clean, translated English text.
    #[instrument(skip(self, audio), fields(audio_len = audio.bytes.len()))]
    async fn transcribe(
        &self,
        audio: &AudioPayload,
        model: &str,
    ) -> Result<String, GatewayError> {
        Self::validate_audio(audio)?;

        let request = GenerateContentRequest {
            contents: vec![Content::user(vec![
                Part::audio(audio),
                Part::text(TRANSCRIBE_PROMPT),
            ])],
            system_instruction: None,
        };

        let response =
            post_generate(&self.client, &self.base_url, &self.api_key, model, &request).await?;
        extract_text(&response)
    }

    /// Create a chat session grounded in the audio and its transcript.
    ///
    /// The endpoint itself is stateless, so the handle carries the
    /// conversation contents and replays them on every send.
    #[instrument(skip(self, audio, transcript), fields(audio_len = audio.bytes.len()))]
    async fn create_chat(
        &self,
        audio: &AudioPayload,
        transcript: &str,
        model: &str,
    ) -> Result<Box<dyn ChatHandle>, GatewayError> {
        Self::validate_audio(audio)?;

        let grounding = format!(
            "Here is the audio recording I want to discuss. Its transcript is:\n\n{}",
            transcript
        );
        let contents = vec![
            Content::user(vec![Part::audio(audio), Part::text(grounding)]),
            Content::model(vec![Part::text(
                "I have reviewed the audio and the transcript. How can I help you further?",
            )]),
        ];

        info!("Created grounded chat session with model {}", model);
        Ok(Box::new(GeminiChat {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            client: self.client.clone(),
            model: model.to_string(),
            contents,
        }))
    }
}

impl Drop for GeminiClient {
    fn drop(&mut self) {
        // Clear API key from memory
        self.api_key.zeroize();
    }
}

/// A grounded chat session over the stateless generateContent endpoint.
pub(crate) struct GeminiChat {
    api_key: String,
    base_url: Url,
    client: reqwest::Client,
    model: String,
    contents: Vec<Content>,
}

#[async_trait]
impl ChatHandle for GeminiChat {
    async fn send(&mut self, parts: &[MessagePart]) -> Result<String, GatewayError> {
        let user_parts: Vec<Part> = parts
            .iter()
            .map(|part| match part {
                MessagePart::Text(text) => Part::text(text.clone()),
                MessagePart::Audio(audio) => Part::audio(audio),
            })
            .collect();

        self.contents.push(Content::user(user_parts));

        let request = GenerateContentRequest {
            contents: self.contents.clone(),
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::text(CHAT_SYSTEM_PROMPT)],
            }),
        };

        let result = post_generate(
            &self.client,
            &self.base_url,
            &self.api_key,
            &self.model,
            &request,
        )
        .await
        .and_then(|response| extract_text(&response));

        match result {
            Ok(reply) => {
                self.contents
                    .push(Content::model(vec![Part::text(reply.clone())]));
                Ok(reply)
            }
            Err(e) => {
                // Failed sends must not leave a dangling user message in the
                // replayed history
                self.contents.pop();
                Err(e)
            }
        }
    }
}

impl Drop for GeminiChat {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

/// POST a generateContent request, retrying transient failures.
async fn post_generate(
    client: &reqwest::Client,
    base_url: &Url,
    api_key: &str,
    model: &str,
    request: &GenerateContentRequest,
) -> Result<GenerateContentResponse, GatewayError> {
    let endpoint = format!(
        "{}/models/{}:generateContent",
        base_url.as_str().trim_end_matches('/'),
        model
    );

    let mut last_error: Option<GatewayError> = None;
    let mut retry_delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS);

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            warn!(
                attempt = attempt,
                max_retries = MAX_RETRIES,
                delay_ms = retry_delay.as_millis(),
                "Retrying Gemini request after transient failure"
            );
            tokio::time::sleep(retry_delay).await;
            retry_delay *= 2;
        }

        let result = client
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await;

        match result {
            Ok(response) => {
                if response.status().is_success() {
                    let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
                        GatewayError::InvalidResponse(format!(
                            "Failed to parse Gemini response: {}",
                            e
                        ))
                    })?;

                    if attempt > 0 {
                        info!(attempt = attempt, "Gemini request succeeded after retry");
                    }

                    return Ok(parsed);
                }

                let status = response.status().as_u16();
                let message = response.text().await.unwrap_or_default();

                let error = GatewayError::ServerError { status, message };

                // Retry on 5xx server errors
                if (500..600).contains(&status) && attempt < MAX_RETRIES {
                    warn!(status = status, attempt = attempt, "Server error, will retry");
                    last_error = Some(error);
                    continue;
                }

                return Err(error);
            }
            Err(e) => {
                // Retry on network errors
                if is_retryable_error(&e) && attempt < MAX_RETRIES {
                    warn!(error = %e, attempt = attempt, "Network error, will retry");
                    last_error = Some(GatewayError::Network(e));
                    continue;
                }

                return Err(GatewayError::Network(e));
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| GatewayError::InvalidResponse("Unexpected retry loop exit".into())))
}

/// Check if a reqwest error is retryable (transient).
fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Extract the reply text from a generateContent response.
fn extract_text(response: &GenerateContentResponse) -> Result<String, GatewayError> {
    let text = response
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(GatewayError::InvalidResponse(
            "No text content in Gemini response".into(),
        ));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let audio = AudioPayload::new(vec![1, 2, 3], "audio/webm;codecs=opus");
        let request = GenerateContentRequest {
            contents: vec![Content::user(vec![
                Part::audio(&audio),
                Part::text("Transcribe this"),
            ])],
            system_instruction: None,
        };

        let json = serde_json::to_string(&request).expect("Failed to serialize");
        assert!(json.contains("\"inlineData\""));
        assert!(json.contains("\"mimeType\":\"audio/webm\""));
        assert!(json.contains("Transcribe this"));
        assert!(!json.contains("systemInstruction"));
    }

    #[test]
    fn test_response_deserialization() {
        let json = r#"{
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Hello "},
                        {"text": "there."}
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 4}
        }"#;

        let response: GenerateContentResponse =
            serde_json::from_str(json).expect("Failed to deserialize");
        let text = extract_text(&response).expect("Failed to extract text");
        assert_eq!(text, "Hello there.");
    }

    #[test]
    fn test_extract_text_rejects_empty_response() {
        let response: GenerateContentResponse =
            serde_json::from_str("{}").expect("Failed to deserialize");
        assert!(matches!(
            extract_text(&response),
            Err(GatewayError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_validate_audio_rejects_empty() {
        let audio = AudioPayload::new(Vec::new(), "audio/webm");
        assert!(matches!(
            GeminiClient::validate_audio(&audio),
            Err(GatewayError::EmptyAudio)
        ));
    }

    #[test]
    fn test_validate_audio_rejects_oversized() {
        let audio = AudioPayload::new(vec![0u8; MAX_INLINE_AUDIO_BYTES + 1], "audio/wav");
        assert!(matches!(
            GeminiClient::validate_audio(&audio),
            Err(GatewayError::AudioTooLarge { .. })
        ));
    }
}
