//! Model provider layer for pg.
//!
//! Defines the conversation types shared by the agent loop, the `Provider` capability
//! contract, and two variants: an OpenAI-compatible HTTP provider and a local
//! `llama-cli` provider. Provider selection is always an explicit [`ProviderConfig`].

pub mod errors;
pub mod provider;
pub mod providers;
pub mod stream;
pub mod types;
pub mod utils;

pub use errors::*;
pub use provider::*;
pub use providers::{LocalProvider, LocalProviderOptions, OpenAiCompatibleProvider};
pub use stream::*;
pub use types::*;
pub use utils::stream_accumulator::StreamAccumulator;
