//! LLM pipe client used by the scoring providers.

mod client;
mod types;


pub use client::LlmClient;
pub use types::{
    extract_json_object, CreatePipeRequest, Message, PipeRequest, PipeResponse, Role, TokenUsage,
};
