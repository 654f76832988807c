//! Embedded record-oriented storage engine: a fixed-width binary data file with a primary-key
//! index and per-record pessimistic locking.

mod codec;
mod config;
mod engine;
mod error;
mod file;
mod lock;
mod pkey;
mod schema;
mod txn;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use file::{PhysicalFile, RecordBlock};
pub use lock::CallerId;
pub use pkey::PrimaryKey;
pub use schema::{FieldSpec, FileSchema, LogicalColumn, LogicalSchema};
pub use txn::TransactionContext;

/// A logical record: one `String` per column, in the order `LogicalSchema` declares them.
pub type Row = Vec<String>;
