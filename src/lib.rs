pub mod config;
pub mod entities;
pub mod error;
pub mod http;
pub mod llm;
pub mod orchestrator;
pub mod persistence;
pub mod progress;
pub mod server;
pub mod tools;

/// CLI override for LLM provider/model.
pub struct LlmOverride {
    pub provider: llm::Provider,
    pub model: String,
}
