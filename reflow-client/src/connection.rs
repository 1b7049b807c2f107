//! Client-server connection management
//!
//! Provides the Unix socket connection to the reflow server with
//! length-prefixed framing and a background I/O task.

mod client;
mod handler;

pub use client::{Connection, ConnectionState};
pub use handler::MessageSender;
