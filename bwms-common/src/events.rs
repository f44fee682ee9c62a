//! Event types and broadcast bus for rescoring runs
//!
//! The batch rescorer publishes one event per state transition so that the
//! CLI (or any other listener) can report progress without polling the
//! checkpoint database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Progress events emitted by a rescoring run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RescoreEvent {
    /// Run started (fresh or resumed)
    RunStarted {
        run_id: Uuid,
        prompt_version: String,
        total_reviews: usize,
        total_batches: usize,
        resumed_from_batch: usize,
        dry_run: bool,
        timestamp: DateTime<Utc>,
    },

    /// Batch records read from the corpus
    BatchLoaded {
        run_id: Uuid,
        batch_index: usize,
        reviews: usize,
    },

    /// Every review in the batch went through the scoring pipeline
    BatchScored {
        run_id: Uuid,
        batch_index: usize,
        scored: usize,
        rejected: usize,
        unscored: usize,
        duration_ms: u64,
    },

    /// Validation gate evaluated for the batch
    BatchValidated {
        run_id: Uuid,
        batch_index: usize,
        agreement_rate: Option<f64>,
        average_spread: Option<f64>,
        needs_review_rate: Option<f64>,
        failure_rate: Option<f64>,
        passed: bool,
    },

    /// Batch written back to the corpus and checkpointed
    BatchCommitted {
        run_id: Uuid,
        batch_index: usize,
        batches_committed: usize,
        total_batches: usize,
    },

    /// Validation gate breached; run stopped before committing the batch
    RunHalted {
        run_id: Uuid,
        batch_index: usize,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// All batches committed (or validated, for a dry run)
    RunCompleted {
        run_id: Uuid,
        batches_committed: usize,
        timestamp: DateTime<Utc>,
    },

    /// Run cancelled; the in-flight batch was discarded
    RunInterrupted {
        run_id: Uuid,
        batches_committed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl RescoreEvent {
    /// Run the event belongs to
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::BatchLoaded { run_id, .. }
            | Self::BatchScored { run_id, .. }
            | Self::BatchValidated { run_id, .. }
            | Self::BatchCommitted { run_id, .. }
            | Self::RunHalted { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunInterrupted { run_id, .. } => *run_id,
        }
    }
}

/// Broadcast bus for [`RescoreEvent`]s
///
/// Cloning the bus shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RescoreEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before slow receivers
    /// start losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<RescoreEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: RescoreEvent,
    ) -> Result<usize, broadcast::error::SendError<RescoreEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: RescoreEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let run_id = Uuid::new_v4();

        bus.emit(RescoreEvent::BatchLoaded {
            run_id,
            batch_index: 0,
            reviews: 200,
        })
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id(), run_id);
        assert!(matches!(event, RescoreEvent::BatchLoaded { reviews: 200, .. }));
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert!(bus
            .emit(RescoreEvent::RunCompleted {
                run_id: Uuid::new_v4(),
                batches_committed: 0,
                timestamp: Utc::now(),
            })
            .is_err());
        // Lossy emit never fails
        bus.emit_lossy(RescoreEvent::RunCompleted {
            run_id: Uuid::new_v4(),
            batches_committed: 0,
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn test_event_serialization_tag() {
        let json = serde_json::to_value(RescoreEvent::RunHalted {
            run_id: Uuid::nil(),
            batch_index: 3,
            reason: "agreement".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();
        assert_eq!(json["type"], "run_halted");
        assert_eq!(json["batch_index"], 3);
    }
}
