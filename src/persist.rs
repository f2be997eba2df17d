//! Persistence coordinator
//!
//! Subscribes to session events and mirrors them to the store, keeping
//! storage concerns out of the state machine. Writes are best-effort:
//! failures are logged and never escalated to the user.

use crate::session::SessionEvent;
use crate::store::{Store, SESSION_KEY};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Apply one session event to the store
pub(crate) fn handle(store: &Store, event: &SessionEvent) {
    match event {
        SessionEvent::EnteredSuccess(record) => {
            match store.save(SESSION_KEY, record) {
                Ok(()) => debug!("Saved session record"),
                Err(e) => error!("Failed to save session record: {}", e),
            }
        }
        SessionEvent::EnteredIdle => {
            // reset removes synchronously as well; removal is idempotent
            if let Err(e) = store.remove(SESSION_KEY) {
                error!("Failed to remove session record: {}", e);
            }
        }
        SessionEvent::EnteredProcessing | SessionEvent::EnteredError(_) => {}
    }
}

/// Spawn the coordinator task over a subscription
pub(crate) fn spawn(store: Store, mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => handle(&store, &event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Last write wins; skipped intermediate states are fine
                    debug!("Persistence coordinator lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Session closed, stopping persistence coordinator");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, AudioPayload};
    use crate::conversation::Turn;
    use crate::session::{SessionRecord, SessionStatus};

    fn sample_record() -> SessionRecord {
        SessionRecord {
            transcript: "what was said".to_string(),
            audio: codec::encode(&AudioPayload::new(vec![1, 2, 3], "audio/webm")),
            chat_history: vec![Turn::ai("greeting")],
            model: "gemini-2.5-flash".to_string(),
            status: SessionStatus::Success,
        }
    }

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::at(dir.path().join("store"));
        (dir, store)
    }

    #[test]
    fn test_record_saved_only_on_success() {
        let (_dir, store) = temp_store();

        handle(&store, &SessionEvent::EnteredProcessing);
        assert!(!store.contains(SESSION_KEY));

        handle(&store, &SessionEvent::EnteredError("boom".to_string()));
        assert!(!store.contains(SESSION_KEY));

        handle(&store, &SessionEvent::EnteredSuccess(sample_record()));
        assert!(store.contains(SESSION_KEY));

        let loaded: SessionRecord = store.load(SESSION_KEY).expect("load");
        assert_eq!(loaded, sample_record());
    }

    #[test]
    fn test_idle_removes_record() {
        let (_dir, store) = temp_store();

        handle(&store, &SessionEvent::EnteredSuccess(sample_record()));
        assert!(store.contains(SESSION_KEY));

        handle(&store, &SessionEvent::EnteredIdle);
        assert!(!store.contains(SESSION_KEY));

        // Idle with nothing saved is harmless
        handle(&store, &SessionEvent::EnteredIdle);
        assert!(!store.contains(SESSION_KEY));
    }

    #[test]
    fn test_success_overwrites_previous_record() {
        let (_dir, store) = temp_store();

        handle(&store, &SessionEvent::EnteredSuccess(sample_record()));

        let mut newer = sample_record();
        newer.transcript = "a newer transcript".to_string();
        handle(&store, &SessionEvent::EnteredSuccess(newer.clone()));

        let loaded: SessionRecord = store.load(SESSION_KEY).expect("load");
        assert_eq!(loaded, newer);
    }

    #[tokio::test]
    async fn test_spawned_coordinator_drains_events() {
        let (_dir, store) = temp_store();
        let (tx, rx) = broadcast::channel(16);

        let task = spawn(store.clone(), rx);
        tx.send(SessionEvent::EnteredSuccess(sample_record()))
            .expect("send");
        drop(tx);
        task.await.expect("coordinator task");

        assert!(store.contains(SESSION_KEY));
    }
}
