//! # tern-server
//!
//! WebSocket server built on `tern-core`.
//!
//! ## Modes
//!
//! - **Echo**: every frame is written back to its sender.
//! - **Chat**: a shared room; members exchange envelopes and newcomers
//!   receive the history.

pub mod chat;
pub mod config;
pub mod echo;
pub mod service;
