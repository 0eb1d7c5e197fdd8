//! The SQL executor seam the store is written against.
//!
//! The embedding application owns the actual database; the store only sees
//! these capabilities. Mutating lifecycle calls receive a [`TxOpener`] and
//! open a nested transaction (a savepoint when the handle is itself a
//! transaction) so their writes stay atomic against a caller rollback.
//! Read paths that need a consistent snapshot receive a [`ReadTxOpener`].
//!
//! Backend contract, beyond the obvious:
//! - `rollback` after `commit` is a no-op, and double `rollback` is
//!   idempotent, so error paths can always roll back unconditionally;
//! - an aggregate over zero rows must surface as a one-element
//!   [`SqlValue::Array`] containing a single [`SqlValue::Null`] (the row
//!   codec compensates for this quirk of the production backend).

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

/// An opaque failure from the underlying database. The store wraps this in
/// its own error type; it never inspects the contents.
#[derive(Debug, Error)]
#[error("storage failure: {0}")]
pub struct StorageError(Box<dyn std::error::Error + Send + Sync>);

impl StorageError {
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(err.into())
    }
}

/// A dynamically typed SQL cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Bytes),
    Array(Vec<SqlValue>),
}

impl SqlValue {
    /// A 16-byte cell holding a UUID, the form every id column uses.
    pub fn uuid(id: Uuid) -> Self {
        Self::Bytes(Bytes::copy_from_slice(id.as_bytes()))
    }

    /// An array cell of UUID cells, for statements taking `uuid[]` args.
    pub fn uuid_array(ids: &[Uuid]) -> Self {
        Self::Array(ids.iter().copied().map(Self::uuid).collect())
    }

    /// The name used in type-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<Bytes> for SqlValue {
    fn from(v: Bytes) -> Self {
        Self::Bytes(v)
    }
}

impl From<Option<Bytes>> for SqlValue {
    fn from(v: Option<Bytes>) -> Self {
        v.map_or(Self::Null, Self::Bytes)
    }
}

/// The shape every statement execution returns.
#[derive(Clone, Debug, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// Executes a single statement with positional arguments.
#[async_trait]
pub trait SqlExecutor: Send {
    async fn execute(&mut self, stmt: &str, args: &[SqlValue])
        -> Result<QueryResult, StorageError>;
}

/// A transaction handle. Dropping without committing must leave the
/// underlying savepoint to be cleaned up by the caller's rollback.
#[async_trait]
pub trait SqlTx: SqlExecutor {
    async fn commit(&mut self) -> Result<(), StorageError>;
    async fn rollback(&mut self) -> Result<(), StorageError>;
}

/// Opens nested write transactions. When the handle is already inside a
/// transaction this yields a savepoint.
#[async_trait]
pub trait TxOpener: SqlExecutor {
    async fn begin<'a>(&'a mut self) -> Result<Box<dyn SqlTx + 'a>, StorageError>;
}

/// Opens read-only snapshots. A read transaction refuses writes and is
/// always rolled back by the store.
#[async_trait]
pub trait ReadTxOpener: Send {
    async fn begin_read<'a>(&'a mut self) -> Result<Box<dyn SqlTx + 'a>, StorageError>;
}
