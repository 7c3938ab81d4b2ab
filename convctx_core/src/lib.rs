#![deny(
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

//! Shared vocabulary for the conversation context.
//!
//! The context manager never owns transport state. It reaches request and
//! session storage only through [`RequestHandle`] and [`Attributes`], draws
//! conversation ids from an [`IdGenerator`], and reports torn-down
//! conversation stores to an [`EventSink`].

pub mod attributes;
pub mod error;
pub mod events;
pub mod ids;

pub use attributes::{AttributeValue, Attributes, RequestHandle, downcast_attribute};
pub use error::{ContextError, Result};
pub use events::{ConversationEvent, EventSink, TracingEventSink};
pub use ids::{IdGenerator, IdStrategy, SequentialIdGenerator, UuidIdGenerator};
