mod support;

use pg_agent::{AgentError, AgentEvent, BufferedEventEmitter, ChannelEventEmitter};
use pg_llm::{FinishReason, ProviderError, Role, StreamFragment, ToolCallFragment};
use std::sync::Arc;
use support::{RecordingPersistence, Scripted, SequenceProvider, agent, session_for};
use tempfile::tempdir;

fn text_turn(chunks: &[&str]) -> Scripted {
    let mut fragments: Vec<Result<StreamFragment, ProviderError>> = chunks
        .iter()
        .map(|chunk| Ok(StreamFragment::TextDelta(chunk.to_string())))
        .collect();
    fragments.push(Ok(StreamFragment::Finish(FinishReason::Stop)));
    Scripted::Fragments(fragments)
}

#[tokio::test(flavor = "current_thread")]
async fn text_deltas_are_forwarded_as_they_arrive() {
    let dir = tempdir().expect("tempdir should be created");
    let provider = Arc::new(SequenceProvider::new(vec![text_turn(&["Hel", "lo", "!"])]));
    let emitter = BufferedEventEmitter::default();
    let agent = agent(
        provider.clone(),
        dir.path(),
        Arc::new(RecordingPersistence::default()),
    )
    .with_emitter(Arc::new(emitter.clone()));
    let mut session = session_for(dir.path());

    let answer = agent
        .run_streaming(&mut session, "greet")
        .await
        .expect("stream succeeds");
    assert_eq!(answer, "Hello!");

    let deltas: Vec<String> = emitter
        .snapshot()
        .into_iter()
        .filter_map(|event| match event {
            AgentEvent::TextDelta { text } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["Hel", "lo", "!"]);
}

#[tokio::test(flavor = "current_thread")]
async fn interleaved_tool_call_fragments_are_assembled_per_index() {
    let dir = tempdir().expect("tempdir should be created");
    std::fs::write(dir.path().join("a.txt"), "A\n").expect("write");
    std::fs::write(dir.path().join("b.txt"), "B\n").expect("write");
    let fragment = |index: usize,
                    id: Option<&str>,
                    name: Option<&str>,
                    delta: &str|
     -> Result<StreamFragment, ProviderError> {
        Ok(StreamFragment::ToolCall(ToolCallFragment {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments_delta: delta.to_string(),
        }))
    };
    let provider = Arc::new(SequenceProvider::new(vec![
        Scripted::Fragments(vec![
            fragment(0, Some("c0"), Some("read_file"), "{\"pa"),
            fragment(1, Some("c1"), Some("read_file"), "{\"path\":"),
            fragment(0, None, None, "th\":\"a.txt\"}"),
            fragment(1, None, None, "\"b.txt\"}"),
            Ok(StreamFragment::Finish(FinishReason::ToolCalls)),
        ]),
        text_turn(&["done"]),
    ]));
    let agent = agent(
        provider.clone(),
        dir.path(),
        Arc::new(RecordingPersistence::default()),
    );
    let mut session = session_for(dir.path());

    assert_eq!(
        agent
            .run_streaming(&mut session, "read both")
            .await
            .expect("stream succeeds"),
        "done"
    );
    let second = &provider.requests()[1];
    let tool_results: Vec<&str> = second
        .messages
        .iter()
        .filter(|message| message.role == Role::Tool)
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(tool_results, vec!["A\n", "B\n"]);
}

#[tokio::test(flavor = "current_thread")]
async fn fragment_error_aborts_the_turn() {
    let dir = tempdir().expect("tempdir should be created");
    let provider = Arc::new(SequenceProvider::new(vec![Scripted::Fragments(vec![
        Ok(StreamFragment::TextDelta("partial".to_string())),
        Err(ProviderError::Stream("connection reset".to_string())),
    ])]));
    let agent = agent(
        provider.clone(),
        dir.path(),
        Arc::new(RecordingPersistence::default()),
    );
    let mut session = session_for(dir.path());

    let error = agent
        .run_streaming(&mut session, "x")
        .await
        .expect_err("stream error");
    assert!(matches!(error, AgentError::Provider(ProviderError::Stream(_))));
}

#[tokio::test(flavor = "current_thread")]
async fn closed_event_consumer_aborts_the_turn() {
    let dir = tempdir().expect("tempdir should be created");
    let provider = Arc::new(SequenceProvider::new(vec![text_turn(&["never seen"])]));
    let (emitter, receiver) = ChannelEventEmitter::new();
    drop(receiver);
    let agent = agent(
        provider.clone(),
        dir.path(),
        Arc::new(RecordingPersistence::default()),
    )
    .with_emitter(Arc::new(emitter));
    let mut session = session_for(dir.path());

    assert!(matches!(
        agent.run_streaming(&mut session, "x").await,
        Err(AgentError::Emitter(_))
    ));
}
