//! Follow-up conversation management
//!
//! Holds the ordered transcript of turns and relays follow-up messages to
//! the live chat handle. Sends are single-flight: a send while another is in
//! flight is rejected, not queued. Gateway failures surface inside the
//! conversation itself as an AI turn, so the transcript keeps its ordering
//! and the session stays usable.

use crate::codec::AudioPayload;
use crate::gateway::{ChatHandle, MessagePart};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tracing::warn;

/// Instruction substituted as the text part when a spoken follow-up arrives
/// without accompanying text.
const SPOKEN_FOLLOW_UP_PROMPT: &str = "This is a spoken follow-up question. Please listen to the audio and answer it based on our previous conversation about the original audio and transcript.";

/// Placeholder shown as the user turn for an audio-only message.
const AUDIO_MESSAGE_PLACEHOLDER: &str = "[Audio Message]";

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Author {
    You,
    #[serde(rename = "AI")]
    Ai,
}

/// One message in the conversational transcript, immutable once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Turn {
    pub(crate) author: Author,
    pub(crate) text: String,
}

impl Turn {
    pub(crate) fn you(text: impl Into<String>) -> Self {
        Self {
            author: Author::You,
            text: text.into(),
        }
    }

    pub(crate) fn ai(text: impl Into<String>) -> Self {
        Self {
            author: Author::Ai,
            text: text.into(),
        }
    }
}

/// Result of a send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    /// The exchange completed; the reply (or an error turn) was appended
    Sent,
    /// Another send is in flight; nothing was appended
    Busy,
    /// Both text and audio were empty; nothing was appended
    Empty,
}

/// A live conversation: chat handle, ordered turns, in-flight guard
pub(crate) struct Conversation {
    chat: Mutex<Box<dyn ChatHandle>>,
    turns: StdMutex<Vec<Turn>>,
    in_flight: AtomicBool,
}

impl Conversation {
    /// Start a conversation with an initial set of turns
    pub(crate) fn new(chat: Box<dyn ChatHandle>, turns: Vec<Turn>) -> Self {
        Self {
            chat: Mutex::new(chat),
            turns: StdMutex::new(turns),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Snapshot of the transcript in insertion order
    pub(crate) fn turns(&self) -> Vec<Turn> {
        let Ok(turns) = self.turns.lock() else {
            return Vec::new();
        };
        turns.clone()
    }

    fn append(&self, turn: Turn) {
        if let Ok(mut turns) = self.turns.lock() {
            turns.push(turn);
        }
    }

    /// Send a follow-up message (text, audio, or both)
    pub(crate) async fn send(
        &self,
        text: Option<String>,
        audio: Option<AudioPayload>,
    ) -> SendOutcome {
        let text = text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        if text.is_none() && audio.is_none() {
            return SendOutcome::Empty;
        }

        if self.in_flight.swap(true, Ordering::SeqCst) {
            warn!("Rejected follow-up send: another send is in flight");
            return SendOutcome::Busy;
        }

        let user_text = text
            .clone()
            .unwrap_or_else(|| AUDIO_MESSAGE_PLACEHOLDER.to_string());
        self.append(Turn::you(user_text));

        let mut parts = Vec::new();
        match (&text, &audio) {
            (Some(text), _) => parts.push(MessagePart::Text(text.clone())),
            (None, Some(_)) => {
                parts.push(MessagePart::Text(SPOKEN_FOLLOW_UP_PROMPT.to_string()))
            }
            (None, None) => unreachable!("emptiness checked above"),
        }
        if let Some(audio) = audio {
            parts.push(MessagePart::Audio(audio));
        }

        let reply = self.chat.lock().await.send(&parts).await;
        match reply {
            Ok(reply) => self.append(Turn::ai(reply)),
            Err(e) => {
                warn!("Chat send failed: {}", e);
                self.append(Turn::ai(format!("Sorry, I encountered an error: {}", e)));
            }
        }

        self.in_flight.store(false, Ordering::SeqCst);
        SendOutcome::Sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::Notify;

    /// Chat handle scripted for tests: records received parts, optionally
    /// fails, optionally blocks until released.
    struct ScriptedChat {
        reply: Result<String, String>,
        received: Arc<StdMutex<Vec<Vec<String>>>>,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl ScriptedChat {
        fn replying(reply: &str) -> (Self, Arc<StdMutex<Vec<Vec<String>>>>) {
            let received = Arc::new(StdMutex::new(Vec::new()));
            (
                Self {
                    reply: Ok(reply.to_string()),
                    received: received.clone(),
                    gate: None,
                },
                received,
            )
        }

        fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                received: Arc::new(StdMutex::new(Vec::new())),
                gate: None,
            }
        }
    }

    #[async_trait]
    impl ChatHandle for ScriptedChat {
        async fn send(&mut self, parts: &[MessagePart]) -> Result<String, GatewayError> {
            let described: Vec<String> = parts
                .iter()
                .map(|part| match part {
                    MessagePart::Text(text) => format!("text:{}", text),
                    MessagePart::Audio(audio) => format!("audio:{}", audio.mime_type),
                })
                .collect();
            self.received.lock().unwrap().push(described);

            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }

            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(message) => Err(GatewayError::InvalidResponse(message.clone())),
            }
        }
    }

    #[tokio::test]
    async fn test_send_appends_user_and_ai_turns_in_order() {
        let (chat, _) = ScriptedChat::replying("It was about quarterly planning.");
        let convo = Conversation::new(Box::new(chat), vec![Turn::ai("greeting")]);

        let outcome = convo
            .send(Some("What was the meeting about?".to_string()), None)
            .await;

        assert_eq!(outcome, SendOutcome::Sent);
        let turns = convo.turns();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1], Turn::you("What was the meeting about?"));
        assert_eq!(turns[2], Turn::ai("It was about quarterly planning."));
    }

    #[tokio::test]
    async fn test_empty_send_is_a_no_op() {
        let (chat, received) = ScriptedChat::replying("unused");
        let convo = Conversation::new(Box::new(chat), Vec::new());

        assert_eq!(convo.send(None, None).await, SendOutcome::Empty);
        assert_eq!(convo.send(Some("   ".to_string()), None).await, SendOutcome::Empty);
        assert!(convo.turns().is_empty());
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_audio_only_send_substitutes_instruction() {
        let (chat, received) = ScriptedChat::replying("Heard it.");
        let convo = Conversation::new(Box::new(chat), Vec::new());

        let audio = AudioPayload::new(vec![1, 2, 3], "audio/webm");
        let outcome = convo.send(None, Some(audio)).await;

        assert_eq!(outcome, SendOutcome::Sent);
        let turns = convo.turns();
        assert_eq!(turns[0], Turn::you(AUDIO_MESSAGE_PLACEHOLDER));

        let sent = received.lock().unwrap();
        assert_eq!(
            sent[0],
            vec![
                format!("text:{}", SPOKEN_FOLLOW_UP_PROMPT),
                "audio:audio/webm".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_gateway_failure_becomes_an_ai_turn() {
        let chat = ScriptedChat::failing("quota exceeded");
        let convo = Conversation::new(Box::new(chat), Vec::new());

        let outcome = convo.send(Some("Hello?".to_string()), None).await;

        assert_eq!(outcome, SendOutcome::Sent);
        let turns = convo.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].author, Author::Ai);
        assert!(turns[1].text.starts_with("Sorry, I encountered an error:"));
        assert!(turns[1].text.contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_concurrent_send_is_rejected() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let chat = ScriptedChat {
            reply: Ok("done".to_string()),
            received: Arc::new(StdMutex::new(Vec::new())),
            gate: Some((entered.clone(), release.clone())),
        };
        let convo = Arc::new(Conversation::new(Box::new(chat), Vec::new()));

        let first = {
            let convo = convo.clone();
            tokio::spawn(async move { convo.send(Some("first".to_string()), None).await })
        };

        // Wait until the first send is inside the gateway call
        entered.notified().await;

        let second = convo.send(Some("second".to_string()), None).await;
        assert_eq!(second, SendOutcome::Busy);

        release.notify_one();
        assert_eq!(first.await.unwrap(), SendOutcome::Sent);

        // No duplicate user turn from the rejected send
        let turns = convo.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], Turn::you("first"));
        assert_eq!(turns[1], Turn::ai("done"));
    }

    #[test]
    fn test_turn_author_serialization() {
        let turn = Turn::ai("hi");
        let json = serde_json::to_string(&turn).unwrap();
        assert!(json.contains("\"AI\""));

        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back.author, Author::Ai);
    }
}
