pub mod document_loader;
pub mod llm_service;
pub mod report_builder;
pub mod token_counter;

pub use document_loader::DocumentLoader;
pub use llm_service::{ChatModel, ChatRequest, LlmService};
pub use token_counter::{
    estimate_tokens, split_by_token_limit, split_sections, split_sections_across,
};
