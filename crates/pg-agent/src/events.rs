use crate::AgentError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Progress notifications from a running agent loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    IterationStarted { iteration: usize, max: usize },
    TextDelta { text: String },
    ToolCallStarted { name: String },
    ToolCallFinished { name: String, is_error: bool },
    PatchProposed { file_path: String },
    Finished,
}

pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: AgentEvent) -> Result<(), AgentError>;
}

#[derive(Default)]
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit(&self, _event: AgentEvent) -> Result<(), AgentError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct BufferedEventEmitter {
    inner: Arc<Mutex<Vec<AgentEvent>>>,
}

impl BufferedEventEmitter {
    pub fn snapshot(&self) -> Vec<AgentEvent> {
        let guard = self.inner.lock().expect("buffered emitter mutex poisoned");
        guard.clone()
    }
}

impl EventEmitter for BufferedEventEmitter {
    fn emit(&self, event: AgentEvent) -> Result<(), AgentError> {
        let mut guard = self.inner.lock().expect("buffered emitter mutex poisoned");
        guard.push(event);
        Ok(())
    }
}

/// Forwards events to a consumer task. A dropped receiver aborts the turn.
#[derive(Clone)]
pub struct ChannelEventEmitter {
    sender: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelEventEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventEmitter for ChannelEventEmitter {
    fn emit(&self, event: AgentEvent) -> Result<(), AgentError> {
        self.sender
            .send(event)
            .map_err(|_| AgentError::Emitter("event receiver closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_event_emitter_stores_emitted_events() {
        let emitter = BufferedEventEmitter::default();
        emitter
            .emit(AgentEvent::ToolCallStarted {
                name: "read_file".to_string(),
            })
            .expect("emit should succeed");

        let events = emitter.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            AgentEvent::ToolCallStarted {
                name: "read_file".to_string()
            }
        );
    }

    #[test]
    fn channel_emitter_fails_once_receiver_is_dropped() {
        let (emitter, mut receiver) = ChannelEventEmitter::new();
        emitter.emit(AgentEvent::Finished).expect("receiver open");
        assert_eq!(receiver.try_recv().expect("event queued"), AgentEvent::Finished);

        drop(receiver);
        assert!(matches!(
            emitter.emit(AgentEvent::Finished),
            Err(AgentError::Emitter(_))
        ));
    }
}
