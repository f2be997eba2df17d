//! Single-mode session lifecycle
//!
//! Drives one working session from audio submission through transcription,
//! grounded chat creation, and recovery after a restart. The machine is
//! long-lived and cyclic: Idle -> Recording -> Processing -> Success/Error,
//! back to Idle on reset.
//!
//! State changes are announced on a broadcast channel. Persistence is not
//! performed here: the coordinator in `persist.rs` subscribes and mirrors
//! Success snapshots to the store. The one exception is `reset`, which
//! removes the saved record synchronously so a restart immediately after a
//! reset cannot resurrect stale data.

use crate::codec::{self, AudioPayload, CodecError, EncodedAudio};
use crate::conversation::{Conversation, Turn};
use crate::error::GatewayError;
use crate::gateway::SpeechGateway;
use crate::store::{Store, SESSION_KEY};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Greeting appended after the transcript in the first AI turn.
const GREETING: &str = "I have reviewed the audio and the transcript. How can I help you further?";

/// Lifecycle states of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum SessionStatus {
    Idle,
    Recording,
    Processing,
    Success,
    Error,
}

/// Durable snapshot of one completed session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SessionRecord {
    pub(crate) transcript: String,
    pub(crate) audio: EncodedAudio,
    pub(crate) chat_history: Vec<Turn>,
    pub(crate) model: String,
    pub(crate) status: SessionStatus,
}

/// State-change announcements for subscribers
#[derive(Debug, Clone)]
pub(crate) enum SessionEvent {
    EnteredProcessing,
    EnteredSuccess(SessionRecord),
    EnteredError(String),
    EnteredIdle,
}

/// Why a processing attempt produced no state change
enum ProcessOutcome {
    Completed,
    /// A newer user action superseded this attempt while it was in flight
    Superseded,
}

#[derive(Debug, thiserror::Error)]
enum RecoverError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// The session state machine
///
/// Owns the decoded audio and the live conversation exclusively;
/// reprocessing discards and replaces both.
pub(crate) struct Session {
    gateway: Arc<dyn SpeechGateway>,
    store: Store,
    status: SessionStatus,
    transcript: String,
    audio: Option<AudioPayload>,
    conversation: Option<Arc<Conversation>>,
    model: String,
    error: Option<String>,
    generation: u64,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub(crate) fn new(gateway: Arc<dyn SpeechGateway>, store: Store, model: String) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            gateway,
            store,
            status: SessionStatus::Idle,
            transcript: String::new(),
            audio: None,
            conversation: None,
            model,
            error: None,
            generation: 0,
            events,
        }
    }

    /// Subscribe to state-change events
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.status
    }

    pub(crate) fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn transcript(&self) -> &str {
        &self.transcript
    }

    pub(crate) fn model(&self) -> &str {
        &self.model
    }

    /// The live conversation, present only in Success
    pub(crate) fn conversation(&self) -> Option<Arc<Conversation>> {
        self.conversation.clone()
    }

    /// Mark the session as capturing audio
    ///
    /// The capture itself happens outside this crate; the state exists so a
    /// front-end can distinguish "waiting" from "recording".
    #[allow(dead_code)]
    pub(crate) fn begin_recording(&mut self) {
        if matches!(self.status, SessionStatus::Idle) {
            self.status = SessionStatus::Recording;
            info!("Session recording");
        }
    }

    /// Submit audio for transcription and chat creation
    pub(crate) async fn submit_audio(&mut self, audio: AudioPayload) {
        if audio.is_empty() {
            self.enter_error("The provided audio file is empty.".to_string());
            return;
        }

        let generation = self.bump_generation();
        let model = self.model.clone();
        self.transcript.clear();
        self.conversation = None;
        self.enter_processing();

        match self.process(audio, &model, generation).await {
            Ok(ProcessOutcome::Completed) => self.enter_success(),
            Ok(ProcessOutcome::Superseded) => {
                info!("Discarding superseded processing result")
            }
            Err(e) => {
                if self.generation == generation {
                    self.enter_error(e.to_string());
                } else {
                    info!("Discarding superseded processing failure: {}", e);
                }
            }
        }
    }

    /// Reprocess the current audio with a different model
    ///
    /// Clears the prior transcript, chat, and history before retrying. The
    /// session's model identifier changes only if reprocessing succeeds.
    pub(crate) async fn reprocess(&mut self, new_model: &str) {
        let Some(audio) = self.audio.clone() else {
            self.enter_error("No audio available to reprocess.".to_string());
            return;
        };

        let generation = self.bump_generation();
        self.transcript.clear();
        self.conversation = None;
        self.enter_processing();

        match self.process(audio, new_model, generation).await {
            Ok(ProcessOutcome::Completed) => {
                self.model = new_model.to_string();
                self.enter_success();
            }
            Ok(ProcessOutcome::Superseded) => {
                info!("Discarding superseded reprocessing result")
            }
            Err(e) => {
                if self.generation == generation {
                    self.enter_error(e.to_string());
                } else {
                    info!("Discarding superseded reprocessing failure: {}", e);
                }
            }
        }
    }

    /// Reset to Idle, purging the saved session record
    pub(crate) fn reset(&mut self) {
        // Remove before the transition completes: a restart right after a
        // reset must not resurrect the old session
        if let Err(e) = self.store.remove(SESSION_KEY) {
            warn!("Failed to remove saved session: {}", e);
        }
        self.bump_generation();
        self.clear_to_idle();
    }

    /// Attempt to restore the previous session from the store
    ///
    /// Runs once at startup. Callers only construct a `Session` once a
    /// credential exists, so recovery is implicitly gated on it. Any failure
    /// discards the saved entry and leaves the machine Idle.
    pub(crate) async fn recover(&mut self) {
        let Some(record) = self.store.load::<SessionRecord>(SESSION_KEY) else {
            return;
        };
        if record.status != SessionStatus::Success || record.transcript.is_empty() {
            info!("Ignoring saved session without a completed transcript");
            return;
        }

        let generation = self.bump_generation();
        // Show Processing while the chat session is rebuilt instead of a
        // flash of stale content
        self.enter_processing();

        match self.rebuild(record, generation).await {
            Ok(ProcessOutcome::Completed) => {
                info!("Restored previous session");
                self.enter_success();
            }
            Ok(ProcessOutcome::Superseded) => {}
            Err(e) => {
                warn!("Failed to restore saved session, discarding it: {}", e);
                if let Err(e) = self.store.remove(SESSION_KEY) {
                    warn!("Failed to remove unusable saved session: {}", e);
                }
                if self.generation == generation {
                    self.clear_to_idle();
                }
            }
        }
    }

    /// Transcribe and create the grounded chat, then install the results
    ///
    /// Memory state is only touched after both gateway calls succeed, so a
    /// failure can never leave a half-populated Success.
    async fn process(
        &mut self,
        audio: AudioPayload,
        model: &str,
        generation: u64,
    ) -> Result<ProcessOutcome, GatewayError> {
        let gateway = self.gateway.clone();

        let transcript = gateway.transcribe(&audio, model).await?;
        if self.generation != generation {
            return Ok(ProcessOutcome::Superseded);
        }

        let chat = gateway.create_chat(&audio, &transcript, model).await?;
        if self.generation != generation {
            return Ok(ProcessOutcome::Superseded);
        }

        let first_turn = Turn::ai(format!("{}\n\n{}", transcript, GREETING));
        self.transcript = transcript;
        self.audio = Some(audio);
        self.conversation = Some(Arc::new(Conversation::new(chat, vec![first_turn])));
        Ok(ProcessOutcome::Completed)
    }

    /// Rebuild memory state and a live chat from a saved record
    async fn rebuild(
        &mut self,
        record: SessionRecord,
        generation: u64,
    ) -> Result<ProcessOutcome, RecoverError> {
        let audio = codec::decode(&record.audio)?;
        let chat = self
            .gateway
            .clone()
            .create_chat(&audio, &record.transcript, &record.model)
            .await?;
        if self.generation != generation {
            return Ok(ProcessOutcome::Superseded);
        }

        self.transcript = record.transcript;
        self.audio = Some(audio);
        self.model = record.model;
        self.conversation = Some(Arc::new(Conversation::new(chat, record.chat_history)));
        Ok(ProcessOutcome::Completed)
    }

    /// Snapshot the current session as a durable record
    pub(crate) fn snapshot_record(&self) -> Option<SessionRecord> {
        let audio = self.audio.as_ref()?;
        Some(SessionRecord {
            transcript: self.transcript.clone(),
            audio: codec::encode(audio),
            chat_history: self
                .conversation
                .as_ref()
                .map(|c| c.turns())
                .unwrap_or_default(),
            model: self.model.clone(),
            status: SessionStatus::Success,
        })
    }

    fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn enter_processing(&mut self) {
        self.status = SessionStatus::Processing;
        self.error = None;
        info!("Session processing");
        let _ = self.events.send(SessionEvent::EnteredProcessing);
    }

    fn enter_success(&mut self) {
        self.status = SessionStatus::Success;
        self.error = None;
        info!("Session succeeded");
        if let Some(record) = self.snapshot_record() {
            let _ = self.events.send(SessionEvent::EnteredSuccess(record));
        }
    }

    fn enter_error(&mut self, message: String) {
        warn!("Session error: {}", message);
        self.status = SessionStatus::Error;
        self.error = Some(message.clone());
        let _ = self.events.send(SessionEvent::EnteredError(message));
    }

    fn clear_to_idle(&mut self) {
        self.transcript.clear();
        self.audio = None;
        self.conversation = None;
        self.error = None;
        self.status = SessionStatus::Idle;
        info!("Session idle");
        let _ = self.events.send(SessionEvent::EnteredIdle);
    }
}
