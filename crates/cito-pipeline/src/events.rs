//! Pipeline event system for progress reporting.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! observers (the CLI progress printer, tests) can follow a run without
//! coupling to the orchestrator internals.

use serde::{Deserialize, Serialize};

use crate::orchestrator::RunSummary;

/// Events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    RunStarted {
        selection: String,
        stages: Vec<String>,
        total: usize,
        delay_between_items_ms: u64,
        delay_between_steps_ms: u64,
        eta: String,
        /// Rendered startup boxes, ready to print.
        banner: String,
    },
    RunCompleted {
        summary: RunSummary,
    },
    DocumentStarted {
        doc_id: String,
        index: usize,
        total: usize,
        status: String,
        title: Option<String>,
        eta_remaining: String,
    },
    DocumentSkipped {
        doc_id: String,
        reason: String,
    },
    DocumentCompleted {
        doc_id: String,
        success: bool,
        stages_run: usize,
    },
    StageStarted {
        doc_id: String,
        stage: String,
        input_chars: usize,
    },
    StageRetrying {
        doc_id: String,
        stage: String,
        attempt: usize,
        error: String,
    },
    StageCompleted {
        doc_id: String,
        stage: String,
        status: String,
        count: Option<usize>,
        input_chars: usize,
        output_chars: Option<usize>,
        duration_ms: u64,
    },
    StageFailed {
        doc_id: String,
        stage: String,
        error: String,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(PipelineEvent::StageStarted {
            doc_id: "15345".into(),
            stage: "caseDoctrine".into(),
            input_chars: 812,
        });

        match rx.recv().await.unwrap() {
            PipelineEvent::StageStarted {
                doc_id,
                stage,
                input_chars,
            } => {
                assert_eq!(doc_id, "15345");
                assert_eq!(stage, "caseDoctrine");
                assert_eq!(input_chars, 812);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(PipelineEvent::DocumentSkipped {
            doc_id: "1".into(),
            reason: "claimed by another worker".into(),
        });

        let json1 = serde_json::to_string(&rx1.recv().await.unwrap()).unwrap();
        let json2 = serde_json::to_string(&rx2.recv().await.unwrap()).unwrap();
        assert_eq!(json1, json2);
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::default();
        emitter.emit(PipelineEvent::StageFailed {
            doc_id: "1".into(),
            stage: "caseScrape".into(),
            error: "HTTP 503".into(),
        });
    }
}
