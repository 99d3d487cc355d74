use super::AgentLoop;
use crate::{AgentError, AgentEvent};
use futures::StreamExt;
use pg_llm::{Request, Response, StreamAccumulator, StreamFragment};

impl AgentLoop {
    /// Consumes one turn's fragment stream. Stops at the finish marker; a fragment
    /// error or a failing event consumer aborts the turn.
    pub(super) async fn stream_turn(&self, request: Request) -> Result<Response, AgentError> {
        let mut fragments = self.provider.stream(request).await?;
        let mut accumulator = StreamAccumulator::new();

        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            if let StreamFragment::TextDelta(text) = &fragment {
                self.emitter
                    .emit(AgentEvent::TextDelta { text: text.clone() })?;
            }
            accumulator.process(&fragment);
            if accumulator.is_finished() {
                break;
            }
        }

        Ok(accumulator.finish()?)
    }
}
