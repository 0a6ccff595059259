//! Database access (read and write) abstractions for the indexer.
//!
//! Block headers, per-transformer checkpoints, receipts and logs, storage
//! diffs and decoded contract events all live in one PostgreSQL database.
//! [`Store`] owns the connection pool and applies the embedded migrations on
//! startup.

pub mod events;
pub mod models;
mod schema;
mod store;

pub use events::{DripFileRepo, EventModel, PitFileIlk};
pub use store::Store;
