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

//! In-process request and session storage.
//!
//! Sessions live in a [`SessionManager`] for as long as the process does.
//! A [`MemoryRequest`] carries its own request attributes and finds or
//! creates its session through the manager.

mod attributes;
mod manager;
mod request;

pub use attributes::MemoryAttributes;
pub use manager::{MemorySession, SessionManager};
pub use request::MemoryRequest;
