mod schema;

pub use schema::{Config, ConversationSettings, LoggingConfig};
