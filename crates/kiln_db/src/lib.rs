//! Source and output object databases.
//!
//! The build pipeline reads source assets from one database and writes built
//! output instances to another. Both are addressed by [`Guid`](kiln_common::Guid)
//! and expose the same [`Database`] interface: object read/write, named data
//! blobs, and transactions that make an instance's writes visible atomically.
//!
//! [`MemoryDatabase`] is a thread-safe in-memory implementation suitable for
//! embedding hosts and tests.

#![warn(missing_docs)]

pub mod database;
pub mod error;
pub mod instance;
pub mod memory;

pub use database::{isolate, restore, Database, Transaction};
pub use error::DbError;
pub use instance::{InstanceInfo, OutputInstance, PendingInstance, StoredObject};
pub use memory::MemoryDatabase;
