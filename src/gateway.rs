//! Gateway seam in front of the AI provider
//!
//! The session machinery talks to these traits, never to a concrete client.
//! `gemini.rs` provides the production implementation; tests substitute
//! their own.

use crate::codec::AudioPayload;
use crate::error::GatewayError;
use async_trait::async_trait;

/// One part of a chat message
#[derive(Debug, Clone)]
pub(crate) enum MessagePart {
    Text(String),
    Audio(AudioPayload),
}

/// A live, stateful chat grounded in previously supplied context
///
/// Handles are not serializable; after a restart a new one is created from
/// the persisted transcript and audio.
#[async_trait]
pub(crate) trait ChatHandle: Send + Sync {
    /// Send message parts and return the AI's reply text
    async fn send(&mut self, parts: &[MessagePart]) -> Result<String, GatewayError>;
}

/// Speech understanding operations offered by the AI provider
#[async_trait]
pub(crate) trait SpeechGateway: Send + Sync {
    /// Transcribe (and translate) audio into clean text
    async fn transcribe(
        &self,
        audio: &AudioPayload,
        model: &str,
    ) -> Result<String, GatewayError>;

    /// Create a chat session grounded in the audio and its transcript
    async fn create_chat(
        &self,
        audio: &AudioPayload,
        transcript: &str,
        model: &str,
    ) -> Result<Box<dyn ChatHandle>, GatewayError>;
}
