//! RTSP server
//!
//! [`Server`] binds the listener, owns the path registry and spawns a
//! [`Session`](crate::session::Session) per accepted connection.

pub mod config;
pub mod listener;

pub use config::ServerConfig;
pub use listener::Server;
