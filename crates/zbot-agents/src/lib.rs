pub mod conversation;
pub mod openai;
pub mod providers;

pub use conversation::{Conversation, RetryPolicy};
pub use openai::OpenAiProvider;
pub use providers::{
    ChatMessage, ChatRole, LlmProvider, LlmRequest, LlmResponse, ProviderError, Usage,
};
