//! Ask questions about an uploaded TXT or CSV file and get answers from a
//! Groq-hosted model that is told to use nothing but the file.

pub mod app_state;
pub mod catalog;
pub mod chat;
pub mod constants;
pub mod document;
pub mod llm_interaction;
pub mod prompt;
pub mod session;
pub mod web_server;

pub use catalog::ModelId;
pub use document::{Document, DocumentError, FileKind};
pub use llm_interaction::{ChatBackend, GroqClient, GroqError, GroqSettings};
pub use session::{ChatTurn, Session, SessionError};
