// Public API for integration tests and embedding a session in other front ends

pub mod api;
pub mod auth;
pub mod client;
pub mod error;
pub mod host;
pub mod llm;
pub mod protocol;
pub mod replica;
pub mod room;
pub mod state;
pub mod store;
pub mod transport;
pub mod types;
