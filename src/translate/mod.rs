//! Claude Messages ⇄ OpenAI Chat Completions translation.

pub mod request;
pub mod response;
pub mod stream;

pub use request::{claude_to_openai, openai_to_claude, ChatRequest, ClaudeRequest};
pub use response::{openai_to_claude_response, ChatCompletion, ClaudeResponse};
pub use stream::ClaudeStreamTransformer;
