//! SQLite helpers layered on `rusqlite`.
//!
//! # Intention
//!
//! - Size bulk statements so they stay under SQLite's bound-parameter limit.
//! - Flatten nested transactional code into a single outer transaction.
//! - Provide column adapters for paths, JSON, enums, durations and
//!   precision floats.
//!
//! # Architectural Boundaries
//!
//! - Only SQLite/database glue belongs here; statements are executed by
//!   `rusqlite`.
//! - No query builder, migrations or connection pooling.

pub mod async_transaction;
pub mod batch;
pub mod error;
pub mod fields;
pub mod sqlite;
pub mod transaction;

pub use async_transaction::{
    flat_transaction_async, try_flat_transaction_async, AsyncTransactionBackend, SharedConnection,
};
pub use batch::{
    calc_batch_size, calc_model_batch_size, BatchPlan, SQLITE_DEFAULT_VARIABLE_LIMIT,
    SQLITE_MAX_VARIABLE_NUMBER,
};
pub use error::{Error, Result, TransactionError};
pub use fields::{
    EnumField, Field, Json, JsonField, Nullable, PathField, PrecisionFloatField, SqlEnum, Stored,
    TimedeltaField,
};
pub use sqlite::{
    apply_pragmas, default_pragmas, Pragma, PragmaValue, SqliteConfig, SqliteDatabase,
    SQLITE_DEFAULT_PRAGMAS,
};
pub use transaction::{
    flat_transaction, try_flat_transaction, FlatTransaction, TransactionBackend,
};
