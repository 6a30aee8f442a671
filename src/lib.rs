//! Reference record server for the campo sync engine.

pub mod server;
