pub mod chat;
pub mod exchange;
pub mod message;
pub mod user;

pub use chat::Chat;
pub use exchange::{Exchange, ModelName, UnknownModelError};
pub use message::{ChatMessage, Role};
pub use user::{PublicUser, User};
