mod openai;
mod provider;
mod types;

pub use openai::OpenAiCompatProvider;
pub use provider::LlmProvider;
pub use types::{ChatMessage, ChatRequest};
