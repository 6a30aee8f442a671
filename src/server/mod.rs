//! Server-side modules for the campo record server.

pub mod routes;
pub mod storage;

pub use routes::{router, AppState};
pub use storage::{Record, RecordStore, RecordStoreError};
