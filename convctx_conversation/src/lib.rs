#![warn(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Conversation context: state that spans several requests of one session.
//!
//! # Key Features
//! - At most one request at a time works inside a given conversation
//! - Restore failures fall back to a fresh transient conversation
//! - Ended conversations are swept at the end of every request
//! - Expired conversations are evicted on demand and on session teardown

mod binding;
mod conversation;
mod manager;
mod registry;
mod store;

pub use binding::{ContextState, RequestBinding};
pub use conversation::{Conversation, ConversationGuard};
pub use manager::{CONVERSATIONS_ATTRIBUTE, ConversationContextManager, ID_GENERATOR_ATTRIBUTE};
pub use registry::ConversationRegistry;
pub use store::{ConversationStore, NamingScheme};
