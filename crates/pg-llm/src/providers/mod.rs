mod local;
mod openai;

pub use local::{LocalProvider, LocalProviderOptions};
pub use openai::OpenAiCompatibleProvider;
