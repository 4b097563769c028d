//! Progress event fan-out and durable append log.
//!
//! Mirrors the teacher's split between a live channel and a durable log (see
//! `dashflow-streaming`'s separation of a broadcast-style producer from a
//! persisted backend): `ProgressRecorder::emit` never blocks the pipeline,
//! dropping the oldest buffered event on a slow subscriber, while every event
//! is also appended to an in-memory log keyed by `(execution_id, seq)` for
//! forensic replay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::ids::ExecutionId;
use crate::model::{ExecutionEvent, ExecutionStatus};

const CHANNEL_CAPACITY: usize = 256;

struct ExecutionChannel {
    sender: broadcast::Sender<ExecutionEvent>,
    next_seq: AtomicU64,
    log: Mutex<Vec<ExecutionEvent>>,
}

impl ExecutionChannel {
    fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            next_seq: AtomicU64::new(0),
            log: Mutex::new(Vec::new()),
        }
    }
}

/// Append-only event log per execution, fanned out to live subscribers.
#[derive(Clone, Default)]
pub struct ProgressRecorder {
    channels: Arc<Mutex<HashMap<ExecutionId, Arc<ExecutionChannel>>>>,
}

impl ProgressRecorder {
    /// Construct an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn channel_for(&self, execution_id: ExecutionId) -> Arc<ExecutionChannel> {
        self.channels
            .lock()
            .entry(execution_id)
            .or_insert_with(|| Arc::new(ExecutionChannel::new()))
            .clone()
    }

    /// Emit a progress event. Non-blocking: if no subscriber is listening, or
    /// a subscriber is lagging, the event is still appended to the durable
    /// log and the broadcast send is allowed to drop it for that subscriber.
    pub fn emit(
        &self,
        execution_id: ExecutionId,
        status: ExecutionStatus,
        progress: f64,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
        error: Option<String>,
    ) -> ExecutionEvent {
        let channel = self.channel_for(execution_id);
        let seq = channel.next_seq.fetch_add(1, Ordering::SeqCst);
        let event = ExecutionEvent {
            execution_id,
            seq,
            status,
            progress,
            message: message.into(),
            details,
            error,
            at: chrono::Utc::now(),
        };
        channel.log.lock().push(event.clone());
        // A broadcast send fails only when there are zero receivers; that is
        // expected and not an error for this recorder.
        let _ = channel.sender.send(event.clone());
        event
    }

    /// Subscribe to live events for an execution. The stream is not replayed
    /// from the start; use [`ProgressRecorder::history`] for that.
    #[must_use]
    pub fn subscribe(&self, execution_id: ExecutionId) -> broadcast::Receiver<ExecutionEvent> {
        self.channel_for(execution_id).sender.subscribe()
    }

    /// Full ordered history recorded for an execution so far.
    #[must_use]
    pub fn history(&self, execution_id: ExecutionId) -> Vec<ExecutionEvent> {
        self.channels
            .lock()
            .get(&execution_id)
            .map(|c| c.log.lock().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_monotonic() {
        let recorder = ProgressRecorder::new();
        let exec = ExecutionId::new();
        let e1 = recorder.emit(exec, ExecutionStatus::Pending, 0.0, "start", None, None);
        let e2 = recorder.emit(exec, ExecutionStatus::Scanning, 5.0, "scan", None, None);
        assert_eq!(e1.seq, 0);
        assert_eq!(e2.seq, 1);
        assert!(e2.progress >= e1.progress);
    }

    #[test]
    fn emit_without_subscribers_still_logs() {
        let recorder = ProgressRecorder::new();
        let exec = ExecutionId::new();
        recorder.emit(exec, ExecutionStatus::Pending, 0.0, "start", None, None);
        assert_eq!(recorder.history(exec).len(), 1);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_events() {
        let recorder = ProgressRecorder::new();
        let exec = ExecutionId::new();
        let mut rx = recorder.subscribe(exec);
        recorder.emit(exec, ExecutionStatus::Pending, 0.0, "start", None, None);
        let event = rx.recv().await.expect("event should arrive");
        assert_eq!(event.seq, 0);
    }

    #[test]
    fn independent_executions_get_independent_sequences() {
        let recorder = ProgressRecorder::new();
        let exec_a = ExecutionId::new();
        let exec_b = ExecutionId::new();
        recorder.emit(exec_a, ExecutionStatus::Pending, 0.0, "a", None, None);
        let first_b = recorder.emit(exec_b, ExecutionStatus::Pending, 0.0, "b", None, None);
        assert_eq!(first_b.seq, 0);
    }
}
