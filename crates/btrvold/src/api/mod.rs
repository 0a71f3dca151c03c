//! Plugin HTTP API.

pub mod server;
