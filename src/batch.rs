//! Batch transcription mode
//!
//! Processes several audio files in one run. Each file gets its own entry
//! with either a transcript or an error; one bad file never aborts the run.
//! The entry list is mirrored to its own storage key after every file, so a
//! crash mid-run loses at most the file in flight. Batch history is
//! independent of the single-mode session record.

use crate::codec::AudioPayload;
use crate::gateway::SpeechGateway;
use crate::store::{Store, BATCH_KEY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of transcribing one file in a batch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BatchEntry {
    pub(crate) file_name: String,
    pub(crate) model: String,
    pub(crate) transcript: Option<String>,
    pub(crate) error: Option<String>,
    pub(crate) processed_at: DateTime<Utc>,
}

impl BatchEntry {
    pub(crate) fn succeeded(&self) -> bool {
        self.transcript.is_some()
    }
}

/// Runs batch transcriptions and maintains the saved history
pub(crate) struct BatchRunner {
    gateway: Arc<dyn SpeechGateway>,
    store: Store,
    model: String,
}

impl BatchRunner {
    pub(crate) fn new(gateway: Arc<dyn SpeechGateway>, store: Store, model: String) -> Self {
        Self {
            gateway,
            store,
            model,
        }
    }

    /// Previously saved batch history, oldest first
    pub(crate) fn saved_history(store: &Store) -> Vec<BatchEntry> {
        store.load(BATCH_KEY).unwrap_or_default()
    }

    /// Remove the saved batch history
    pub(crate) fn clear_history(store: &Store) {
        if let Err(e) = store.remove(BATCH_KEY) {
            warn!("Failed to clear batch history: {}", e);
        }
    }

    /// Transcribe each file, appending results to the saved history
    ///
    /// Returns the entries produced by this run.
    pub(crate) async fn run(&self, files: Vec<(String, AudioPayload)>) -> Vec<BatchEntry> {
        let mut history = Self::saved_history(&self.store);
        let run_start = history.len();

        for (file_name, audio) in files {
            info!("Batch transcribing {}", file_name);
            let result = if audio.is_empty() {
                Err("The provided audio file is empty.".to_string())
            } else {
                self.gateway
                    .transcribe(&audio, &self.model)
                    .await
                    .map_err(|e| e.to_string())
            };

            let entry = match result {
                Ok(transcript) => BatchEntry {
                    file_name,
                    model: self.model.clone(),
                    transcript: Some(transcript),
                    error: None,
                    processed_at: Utc::now(),
                },
                Err(message) => {
                    warn!("Batch entry {} failed: {}", file_name, message);
                    BatchEntry {
                        file_name,
                        model: self.model.clone(),
                        transcript: None,
                        error: Some(message),
                        processed_at: Utc::now(),
                    }
                }
            };

            history.push(entry);
            // Mirror after every file so a crash loses at most one entry
            if let Err(e) = self.store.save(BATCH_KEY, &history) {
                warn!("Failed to save batch history: {}", e);
            }
        }

        history.split_off(run_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::gateway::ChatHandle;
    use async_trait::async_trait;

    /// Gateway that fails for file contents containing a marker byte
    struct MarkerGateway;

    #[async_trait]
    impl SpeechGateway for MarkerGateway {
        async fn transcribe(
            &self,
            audio: &AudioPayload,
            _model: &str,
        ) -> Result<String, GatewayError> {
            if audio.bytes.contains(&0xBA) {
                return Err(GatewayError::ServerError {
                    status: 500,
                    message: "bad audio".to_string(),
                });
            }
            Ok(format!("transcript of {} bytes", audio.bytes.len()))
        }

        async fn create_chat(
            &self,
            _audio: &AudioPayload,
            _transcript: &str,
            _model: &str,
        ) -> Result<Box<dyn ChatHandle>, GatewayError> {
            unreachable!("batch mode never creates chats")
        }
    }

    fn temp_runner() -> (tempfile::TempDir, Store, BatchRunner) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::at(dir.path().join("store"));
        let runner = BatchRunner::new(
            Arc::new(MarkerGateway),
            store.clone(),
            "gemini-2.5-flash".to_string(),
        );
        (dir, store, runner)
    }

    #[tokio::test]
    async fn test_run_records_success_and_failure_per_file() {
        let (_dir, store, runner) = temp_runner();

        let entries = runner
            .run(vec![
                ("one.webm".to_string(), AudioPayload::new(vec![1, 2], "audio/webm")),
                ("two.webm".to_string(), AudioPayload::new(vec![0xBA], "audio/webm")),
                ("three.wav".to_string(), AudioPayload::new(vec![3; 5], "audio/wav")),
            ])
            .await;

        assert_eq!(entries.len(), 3);
        assert!(entries[0].succeeded());
        assert_eq!(entries[0].transcript.as_deref(), Some("transcript of 2 bytes"));
        assert!(!entries[1].succeeded());
        assert!(entries[1].error.as_deref().unwrap().contains("bad audio"));
        assert!(entries[2].succeeded());

        let saved = BatchRunner::saved_history(&store);
        assert_eq!(saved, entries);
    }

    #[tokio::test]
    async fn test_empty_file_fails_without_gateway_call() {
        let (_dir, _store, runner) = temp_runner();

        let entries = runner
            .run(vec![(
                "silence.webm".to_string(),
                AudioPayload::new(Vec::new(), "audio/webm"),
            )])
            .await;

        assert_eq!(
            entries[0].error.as_deref(),
            Some("The provided audio file is empty.")
        );
    }

    #[tokio::test]
    async fn test_later_runs_append_to_history() {
        let (_dir, store, runner) = temp_runner();

        runner
            .run(vec![(
                "first.webm".to_string(),
                AudioPayload::new(vec![1], "audio/webm"),
            )])
            .await;
        runner
            .run(vec![(
                "second.webm".to_string(),
                AudioPayload::new(vec![2, 3], "audio/webm"),
            )])
            .await;

        let saved = BatchRunner::saved_history(&store);
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].file_name, "first.webm");
        assert_eq!(saved[1].file_name, "second.webm");
    }

    #[tokio::test]
    async fn test_clear_history() {
        let (_dir, store, runner) = temp_runner();

        runner
            .run(vec![(
                "gone.webm".to_string(),
                AudioPayload::new(vec![1], "audio/webm"),
            )])
            .await;
        assert!(!BatchRunner::saved_history(&store).is_empty());

        BatchRunner::clear_history(&store);
        assert!(BatchRunner::saved_history(&store).is_empty());
    }
}
