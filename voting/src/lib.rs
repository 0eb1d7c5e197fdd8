//! Tessera voting store.
//!
//! The consensus-critical module that lets a dynamically weighted validator
//! set propose, approve, threshold-evaluate, expire and finalize
//! resolutions. The store is a library over an abstract transactional SQL
//! executor ([`sql`]); the surrounding block processor owns the outer write
//! transaction and calls the lifecycle operations in [`store`] while
//! applying a block.
//!
//! Determinism is the design constraint everything here serves: ids are
//! content-addressed, threshold math is done in arbitrary precision, votes
//! are idempotent, and every mutation is atomic under a nested transaction.

pub mod error;
pub mod height;
pub mod power;
pub mod registry;
pub mod schema;
pub mod sql;
pub mod store;
pub mod testing;
pub mod threshold;
pub mod version;

mod codec;
mod statements;

pub use error::VoteStoreError;
pub use registry::ResolutionRegistry;
pub use schema::initialize_vote_store;

/// Schema name the store's version is persisted under.
pub const VOTING_SCHEMA_NAME: &str = "tessera_voting";

/// Price per byte of a resolution body, charged to the proposer and
/// refunded once the resolution passes.
pub const VALIDATOR_VOTE_BODY_BYTE_PRICE: i64 = 1000;

/// Price of an approval transaction: the 16-byte resolution id.
pub const VALIDATOR_VOTE_ID_PRICE: i64 = 1000 * 16;
