//! bcs-server: a line-oriented broadcast relay.
//!
//! Clients log in with a bare name and exchange newline-terminated lines:
//! - broadcast to everyone (plain text, or machine-readable netbot packets)
//! - directed tells, falling back to channel subscribers
//! - presence events (join, quit, roster) for automation clients

pub mod command;
pub mod config;
pub mod console;
pub mod error;
pub mod link;
pub mod queue;
pub mod relay;
pub mod server;
pub mod session;
