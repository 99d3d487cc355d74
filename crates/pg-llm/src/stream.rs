use crate::errors::ProviderError;
use crate::types::FinishReason;
use futures::Stream;
use std::pin::Pin;

/// Partial tool-call data. Fragments of one call share an `index`; `id` and `name`
/// usually arrive only on the first fragment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_delta: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFragment {
    TextDelta(String),
    ToolCall(ToolCallFragment),
    Finish(FinishReason),
}

/// A lazy, finite, non-restartable sequence of fragments for one provider turn.
pub type FragmentStream =
    Pin<Box<dyn Stream<Item = Result<StreamFragment, ProviderError>> + Send>>;
