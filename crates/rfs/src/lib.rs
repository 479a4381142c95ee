//! # RFS
//!
//! A remote file service over a minimal length-prefixed TCP protocol.
//!
//! Each authenticated user works inside a home directory,
//! `<root_dir>/<username>`, and can never reach anything outside it.
//!
//! ## Features
//!
//! - Five-byte frame header (type + big-endian length) with a tokio codec
//! - Login handshake with a pluggable password policy
//! - Home-directory sandbox that checks paths before touching the disk
//!   and again after resolving symbolic links
//! - Directory navigation, listing, upload, download, remove and copy
//!   (including recursive variants)
//! - Async client library and interactive shell
//! - Structured audit trail of connections, logins and commands

pub mod audit;
pub mod auth;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod sandbox;
pub mod server;
pub mod session;
pub mod shell;

pub use auth::Authenticator;
pub use client::Client;
pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use protocol::{Message, MessageType};
pub use server::Server;
pub use session::Session;
