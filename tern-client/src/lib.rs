//! # tern-client
//!
//! Command-line WebSocket client built on `tern-core`.
//!
//! - **Echo**: send a greeting, print the reply, close.
//! - **Chat**: join a tern chat room and relay the console to it.

pub mod chat;
pub mod config;
pub mod echo;
