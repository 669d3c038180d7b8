pub mod auth;
pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod store;

pub use auth::{AuthService, LoginRequest, RegisterRequest, Session, SessionTokens};
pub use completion::{provider_model_id, CompletionBackend, CompletionError, GroqClient};
pub use config::ParleyConfig;
pub use error::ParleyError;
pub use orchestrator::{ConversationOrchestrator, PromptReply, NEW_CHAT};
pub use store::{ConversationStore, CredentialStore, MemoryStore, PgStore, Stores};
