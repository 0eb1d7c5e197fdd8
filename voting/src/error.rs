use bytes::Bytes;
use tessera_types::ResolutionId;
use thiserror::Error;

use crate::sql::StorageError;

/// Everything that can go wrong inside the voting store.
///
/// The first four variants are refusals the block processor translates into
/// failed transactions without halting; `CorruptRow`, `InvalidType` and
/// `Storage` indicate consensus-breaking divergence and are fatal upstream.
#[derive(Debug, Error)]
pub enum VoteStoreError {
    /// The resolution id is terminal; creation is refused.
    #[error("resolution already processed: {0}")]
    AlreadyProcessed(ResolutionId),

    /// A body was already attached to this id by an earlier proposer.
    #[error("resolution already has a body: {0}")]
    ResolutionAlreadyHasBody(ResolutionId),

    /// An approval arrived from a pub key with no voter row.
    #[error("unknown voter: {}", hex::encode(.0))]
    UnknownVoter(Bytes),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A stored row violates the row codec.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// A cell had an unexpected dynamic type; a storage or engine bug.
    #[error("invalid type for {column}: expected {expected}, got {got}")]
    InvalidType {
        column: &'static str,
        expected: &'static str,
        got: &'static str,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}
