//! Persistent execution sessions and their event streams.

mod context;
mod event;
mod manager;

pub use context::Session;
pub use event::{StreamEvent, StreamState, StreamType};
pub use manager::SessionManager;

#[cfg(test)]
mod session_test;
