//! tlschat - encrypted multi-client chat
//!
//! A TLS chat server with an operator console, and a matching terminal
//! client. Both speak length-prefixed UTF-8 frames over the secure channel.

pub mod client;
pub mod command;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod filter;
pub mod operator;
pub mod protocol;
pub mod server;
pub mod session;
pub mod style;
pub mod tls;
