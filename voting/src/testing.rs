//! A deterministic in-memory backend for tests.
//!
//! [`MemoryDb`] implements the [`crate::sql`] capability traits over plain
//! maps, dispatching on the exact statement constants the store issues.
//! Nested transactions are a snapshot stack, which gives real savepoint
//! semantics (including rollback of a lifecycle call against a caller's
//! outer rollback) without a database. It also reproduces the backend
//! quirk the row codec compensates for: an aggregate over zero votes
//! arrives as a one-element array holding a single null.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::sql::{
    QueryResult, ReadTxOpener, SqlExecutor, SqlTx, SqlValue, StorageError, TxOpener,
};
use crate::{statements, version};

#[derive(Clone, Debug, Default)]
struct ResolutionRow {
    body: Option<Bytes>,
    type_name: Option<String>,
    expiration: i64,
    proposer: Option<Bytes>,
    double_proposer_vote: bool,
}

#[derive(Clone, Debug, Default)]
struct Tables {
    schema_versions: BTreeMap<String, i64>,
    voters: BTreeMap<Uuid, (Bytes, i64)>,
    resolution_types: BTreeMap<Uuid, String>,
    resolutions: BTreeMap<Uuid, ResolutionRow>,
    votes: BTreeSet<(Uuid, Uuid)>,
    processed: BTreeSet<Uuid>,
    height: Option<i64>,
}

#[derive(Debug, Default)]
struct DbState {
    committed: Tables,
    // One snapshot per open savepoint, innermost last.
    stack: Vec<Tables>,
}

impl DbState {
    fn top_mut(&mut self) -> &mut Tables {
        self.stack.last_mut().unwrap_or(&mut self.committed)
    }
}

/// The in-memory database. Executing directly on it auto-commits;
/// [`MemoryDb::transaction`] yields a handle playing the role of the block
/// processor's outer write transaction.
#[derive(Debug, Default)]
pub struct MemoryDb {
    state: DbState,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an outer write transaction as a concrete type, so tests can
    /// both pass it to lifecycle operations (it is a [`TxOpener`]) and
    /// commit or roll it back themselves.
    pub fn transaction(&mut self) -> MemoryTx<'_> {
        MemoryTx::open(&mut self.state, false)
    }
}

#[async_trait]
impl SqlExecutor for MemoryDb {
    async fn execute(
        &mut self,
        stmt: &str,
        args: &[SqlValue],
    ) -> Result<QueryResult, StorageError> {
        apply(self.state.top_mut(), stmt, args)
    }
}

#[async_trait]
impl TxOpener for MemoryDb {
    async fn begin<'a>(&'a mut self) -> Result<Box<dyn SqlTx + 'a>, StorageError> {
        Ok(Box::new(MemoryTx::open(&mut self.state, false)))
    }
}

#[async_trait]
impl ReadTxOpener for MemoryDb {
    async fn begin_read<'a>(&'a mut self) -> Result<Box<dyn SqlTx + 'a>, StorageError> {
        Ok(Box::new(MemoryTx::open(&mut self.state, true)))
    }
}

/// A savepoint over [`MemoryDb`]. Commit folds the snapshot into the
/// parent; rollback (or drop) discards it. Both are idempotent.
#[derive(Debug)]
pub struct MemoryTx<'a> {
    state: &'a mut DbState,
    // Stack height of this savepoint's snapshot, 1-based.
    depth: usize,
    read_only: bool,
    open: bool,
}

impl<'a> MemoryTx<'a> {
    fn open(state: &'a mut DbState, read_only: bool) -> Self {
        let snapshot = state.top_mut().clone();
        state.stack.push(snapshot);
        let depth = state.stack.len();
        Self {
            state,
            depth,
            read_only,
            open: true,
        }
    }
}

#[async_trait]
impl SqlExecutor for MemoryTx<'_> {
    async fn execute(
        &mut self,
        stmt: &str,
        args: &[SqlValue],
    ) -> Result<QueryResult, StorageError> {
        if !self.open {
            return Err(StorageError::new("transaction is closed"));
        }
        if self.read_only && is_write(stmt) {
            return Err(StorageError::new("write in read-only transaction"));
        }
        apply(self.state.top_mut(), stmt, args)
    }
}

#[async_trait]
impl SqlTx for MemoryTx<'_> {
    async fn commit(&mut self) -> Result<(), StorageError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        // Unclosed inner savepoints fold into this one.
        let snapshot = self
            .state
            .stack
            .split_off(self.depth - 1)
            .pop()
            .ok_or_else(|| StorageError::new("savepoint stack out of sync"))?;
        if self.read_only {
            // Nothing written; committing a read snapshot discards it.
            return Ok(());
        }
        *self.state.top_mut() = snapshot;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.state.stack.truncate(self.depth - 1);
        Ok(())
    }
}

#[async_trait]
impl TxOpener for MemoryTx<'_> {
    async fn begin<'b>(&'b mut self) -> Result<Box<dyn SqlTx + 'b>, StorageError> {
        if !self.open {
            return Err(StorageError::new("transaction is closed"));
        }
        Ok(Box::new(MemoryTx::open(&mut *self.state, self.read_only)))
    }
}

#[async_trait]
impl ReadTxOpener for MemoryTx<'_> {
    async fn begin_read<'b>(&'b mut self) -> Result<Box<dyn SqlTx + 'b>, StorageError> {
        if !self.open {
            return Err(StorageError::new("transaction is closed"));
        }
        Ok(Box::new(MemoryTx::open(&mut *self.state, true)))
    }
}

impl Drop for MemoryTx<'_> {
    fn drop(&mut self) {
        if self.open {
            self.state.stack.truncate(self.depth - 1);
        }
    }
}

fn is_write(stmt: &str) -> bool {
    matches!(
        stmt,
        statements::CREATE_VOTING_SCHEMA
            | statements::TABLE_VOTERS
            | statements::TABLE_RESOLUTION_TYPES
            | statements::TABLE_RESOLUTIONS
            | statements::RESOLUTIONS_TYPE_INDEX
            | statements::TABLE_PROCESSED
            | statements::TABLE_VOTES
            | statements::TABLE_HEIGHT
            | statements::CREATE_RESOLUTION_TYPE
            | statements::UPSERT_VOTER
            | statements::REMOVE_VOTER
            | statements::ENSURE_RESOLUTION_EXISTS
            | statements::ADD_VOTE
            | statements::UPSERT_RESOLUTION
            | statements::MARK_MANY_PROCESSED
            | statements::DELETE_RESOLUTIONS
            | statements::UPDATE_HEIGHT
            | version::CREATE_VERSIONS_SCHEMA
            | version::TABLE_SCHEMA_VERSIONS
            | version::SET_SCHEMA_VERSION
    )
}

fn apply(tables: &mut Tables, stmt: &str, args: &[SqlValue]) -> Result<QueryResult, StorageError> {
    match stmt {
        // DDL: tables are implicit here.
        statements::CREATE_VOTING_SCHEMA
        | statements::TABLE_VOTERS
        | statements::TABLE_RESOLUTION_TYPES
        | statements::TABLE_RESOLUTIONS
        | statements::RESOLUTIONS_TYPE_INDEX
        | statements::TABLE_PROCESSED
        | statements::TABLE_VOTES
        | statements::TABLE_HEIGHT
        | version::CREATE_VERSIONS_SCHEMA
        | version::TABLE_SCHEMA_VERSIONS => Ok(QueryResult::default()),

        version::GET_SCHEMA_VERSION => {
            let name = arg_text(args, 0)?;
            Ok(int_rows(
                tables.schema_versions.get(&name).copied().into_iter(),
            ))
        }

        version::SET_SCHEMA_VERSION => {
            let name = arg_text(args, 0)?;
            let v = arg_int(args, 1)?;
            tables.schema_versions.insert(name, v);
            Ok(QueryResult::default())
        }

        statements::CREATE_RESOLUTION_TYPE => {
            let id = arg_uuid(args, 0)?;
            let name = arg_text(args, 1)?;
            tables.resolution_types.entry(id).or_insert(name);
            Ok(QueryResult::default())
        }

        statements::UPSERT_VOTER => {
            let id = arg_uuid(args, 0)?;
            let pub_key = arg_bytes(args, 1)?;
            let power = arg_int(args, 2)?;
            if power <= 0 {
                return Err(StorageError::new("check constraint: power must be > 0"));
            }
            tables.voters.insert(id, (pub_key, power));
            Ok(QueryResult::default())
        }

        statements::REMOVE_VOTER => {
            let id = arg_uuid(args, 0)?;
            tables.voters.remove(&id);
            tables.votes.retain(|(_, voter)| *voter != id);
            Ok(QueryResult::default())
        }

        statements::GET_VOTER_POWER => {
            let id = arg_uuid(args, 0)?;
            Ok(int_rows(
                tables.voters.get(&id).map(|(_, p)| *p).into_iter(),
            ))
        }

        statements::ALL_VOTERS => {
            let rows = tables
                .voters
                .values()
                .map(|(key, power)| vec![SqlValue::Bytes(key.clone()), SqlValue::Int(*power)])
                .collect();
            Ok(QueryResult {
                columns: vec!["pub_key".into(), "power".into()],
                rows,
            })
        }

        statements::TOTAL_POWER => {
            // SUM over zero rows is a single null.
            let cell = if tables.voters.is_empty() {
                SqlValue::Null
            } else {
                SqlValue::Int(tables.voters.values().map(|(_, p)| p).sum())
            };
            Ok(QueryResult {
                columns: vec!["total_power".into()],
                rows: vec![vec![cell]],
            })
        }

        statements::ENSURE_RESOLUTION_EXISTS => {
            let id = arg_uuid(args, 0)?;
            let expiration = arg_int(args, 1)?;
            tables.resolutions.entry(id).or_insert(ResolutionRow {
                expiration,
                ..ResolutionRow::default()
            });
            Ok(QueryResult::default())
        }

        statements::ADD_VOTE => {
            let resolution_id = arg_uuid(args, 0)?;
            let voter_id = arg_uuid(args, 1)?;
            if !tables.resolutions.contains_key(&resolution_id) {
                return Err(StorageError::new("foreign key: unknown resolution"));
            }
            if !tables.voters.contains_key(&voter_id) {
                return Err(StorageError::new("foreign key: unknown voter"));
            }
            tables.votes.insert((resolution_id, voter_id));
            Ok(QueryResult::default())
        }

        statements::UPSERT_RESOLUTION => {
            let id = arg_uuid(args, 0)?;
            let body = arg_bytes(args, 1)?;
            let type_name = arg_text(args, 2)?;
            let expiration = arg_int(args, 3)?;
            let proposer = arg_bytes(args, 4)?;
            let double_proposer_vote = arg_bool(args, 5)?;

            if !tables.resolution_types.values().any(|n| *n == type_name) {
                return Err(StorageError::new("foreign key: unknown resolution type"));
            }

            let row = tables.resolutions.entry(id).or_default();
            if row.body.is_none() {
                *row = ResolutionRow {
                    body: Some(body),
                    type_name: Some(type_name),
                    expiration,
                    proposer: Some(proposer),
                    double_proposer_vote,
                };
            }
            Ok(QueryResult::default())
        }

        statements::FULL_RESOLUTION_BY_ID => {
            let id = arg_uuid(args, 0)?;
            let rows = match tables.resolutions.get(&id) {
                Some(row) => vec![full_row(tables, id, row)],
                None => vec![],
            };
            Ok(full_info_result(rows))
        }

        statements::FULL_RESOLUTIONS_BY_TYPE => {
            let type_name = arg_text(args, 0)?;
            let rows = tables
                .resolutions
                .iter()
                .filter(|(_, row)| row.type_name.as_deref() == Some(type_name.as_str()))
                .map(|(id, row)| full_row(tables, *id, row))
                .collect();
            Ok(full_info_result(rows))
        }

        statements::FULL_RESOLUTIONS_BY_EXPIRATION => {
            let height = arg_int(args, 0)?;
            let rows = tables
                .resolutions
                .iter()
                .filter(|(id, row)| row.expiration <= height && !tables.processed.contains(*id))
                .map(|(id, row)| full_row(tables, *id, row))
                .collect();
            Ok(full_info_result(rows))
        }

        statements::FULL_RESOLUTIONS_BY_POWER => {
            let type_name = arg_text(args, 0)?;
            let required = arg_int(args, 1)?;
            let rows = tables
                .resolutions
                .iter()
                .filter(|(_, row)| row.type_name.as_deref() == Some(type_name.as_str()))
                .filter(|(id, _)| {
                    // HAVING SUM(power) >= required; the sum over zero
                    // votes is null, which never satisfies the predicate.
                    approved_power(tables, **id).is_some_and(|sum| sum >= required)
                })
                .map(|(id, row)| full_row(tables, *id, row))
                .collect();
            Ok(full_info_result(rows))
        }

        statements::RESOLUTION_IDS_BY_TYPE_AND_PROPOSER => {
            let type_name = arg_text(args, 0)?;
            let proposer = arg_bytes(args, 1)?;
            let rows = tables
                .resolutions
                .iter()
                .filter(|(_, row)| {
                    row.type_name.as_deref() == Some(type_name.as_str())
                        && row.proposer.as_ref() == Some(&proposer)
                })
                .map(|(id, _)| vec![SqlValue::uuid(*id)])
                .collect();
            Ok(QueryResult {
                columns: vec!["id".into()],
                rows,
            })
        }

        statements::HAS_VOTED => {
            let resolution_id = arg_uuid(args, 0)?;
            let voter_id = arg_uuid(args, 1)?;
            let hit = tables.votes.contains(&(resolution_id, voter_id));
            Ok(int_rows(hit.then_some(1).into_iter()))
        }

        statements::CONTAINS_BODY => {
            let id = arg_uuid(args, 0)?;
            let rows = match tables.resolutions.get(&id) {
                Some(row) => vec![vec![SqlValue::Bool(row.body.is_some())]],
                None => vec![],
            };
            Ok(QueryResult {
                columns: vec!["contains_body".into()],
                rows,
            })
        }

        statements::ALREADY_PROCESSED => {
            let id = arg_uuid(args, 0)?;
            let hit = tables.processed.contains(&id);
            Ok(int_rows(hit.then_some(1).into_iter()))
        }

        statements::MARK_MANY_PROCESSED => {
            for id in arg_uuid_array(args, 0)? {
                tables.processed.insert(id);
            }
            Ok(QueryResult::default())
        }

        statements::DELETE_RESOLUTIONS => {
            for id in arg_uuid_array(args, 0)? {
                tables.resolutions.remove(&id);
                tables.votes.retain(|(rid, _)| *rid != id);
            }
            Ok(QueryResult::default())
        }

        statements::FILTER_NOT_PROCESSED => {
            let rows = arg_uuid_array(args, 0)?
                .into_iter()
                .filter(|id| !tables.processed.contains(id))
                .map(|id| vec![SqlValue::uuid(id)])
                .collect();
            Ok(QueryResult {
                columns: vec!["id".into()],
                rows,
            })
        }

        statements::FILTER_EXISTS_NO_BODY => {
            let wanted = arg_uuid_array(args, 0)?;
            let rows = tables
                .resolutions
                .iter()
                .filter(|(id, row)| wanted.contains(id) && row.body.is_none())
                .map(|(id, _)| vec![SqlValue::uuid(*id)])
                .collect();
            Ok(QueryResult {
                columns: vec!["id".into()],
                rows,
            })
        }

        statements::GET_HEIGHT => Ok(int_rows(tables.height.into_iter())),

        statements::UPDATE_HEIGHT => {
            tables.height = Some(arg_int(args, 0)?);
            Ok(QueryResult::default())
        }

        other => Err(StorageError::new(format!(
            "unrecognized statement: {other}"
        ))),
    }
}

fn approved_power(tables: &Tables, id: Uuid) -> Option<i64> {
    let mut sum = None;
    for (rid, voter_id) in &tables.votes {
        if *rid != id {
            continue;
        }
        if let Some((_, power)) = tables.voters.get(voter_id) {
            sum = Some(sum.unwrap_or(0) + power);
        }
    }
    sum
}

fn full_row(tables: &Tables, id: Uuid, row: &ResolutionRow) -> Vec<SqlValue> {
    let mut blobs: Vec<SqlValue> = tables
        .votes
        .iter()
        .filter(|(rid, _)| *rid == id)
        .filter_map(|(_, voter_id)| tables.voters.get(voter_id))
        .map(|(key, power)| {
            let mut blob = (*power as u64).to_be_bytes().to_vec();
            blob.extend_from_slice(key);
            SqlValue::Bytes(Bytes::from(blob))
        })
        .collect();
    if blobs.is_empty() {
        // The backend collapses an empty aggregate to [null].
        blobs.push(SqlValue::Null);
    }

    vec![
        SqlValue::uuid(id),
        row.body.clone().into(),
        row.type_name
            .clone()
            .map_or(SqlValue::Null, SqlValue::Text),
        SqlValue::Int(row.expiration),
        approved_power(tables, id).map_or(SqlValue::Null, SqlValue::Int),
        SqlValue::Array(blobs),
        row.proposer.clone().into(),
        SqlValue::Bool(row.double_proposer_vote),
    ]
}

fn full_info_result(rows: Vec<Vec<SqlValue>>) -> QueryResult {
    QueryResult {
        columns: vec![
            "id".into(),
            "body".into(),
            "type".into(),
            "expiration".into(),
            "approved_power".into(),
            "voters".into(),
            "proposer".into(),
            "double_proposer_vote".into(),
        ],
        rows,
    }
}

fn int_rows(values: impl Iterator<Item = i64>) -> QueryResult {
    QueryResult {
        columns: vec!["value".into()],
        rows: values.map(|v| vec![SqlValue::Int(v)]).collect(),
    }
}

fn arg(args: &[SqlValue], idx: usize) -> Result<&SqlValue, StorageError> {
    args.get(idx)
        .ok_or_else(|| StorageError::new(format!("missing argument ${}", idx + 1)))
}

fn arg_uuid(args: &[SqlValue], idx: usize) -> Result<Uuid, StorageError> {
    match arg(args, idx)? {
        SqlValue::Bytes(b) => {
            let raw: [u8; 16] = b
                .as_ref()
                .try_into()
                .map_err(|_| StorageError::new("uuid argument must be 16 bytes"))?;
            Ok(Uuid::from_bytes(raw))
        }
        other => Err(StorageError::new(format!(
            "argument ${} is not a uuid: {other:?}",
            idx + 1
        ))),
    }
}

fn arg_uuid_array(args: &[SqlValue], idx: usize) -> Result<Vec<Uuid>, StorageError> {
    match arg(args, idx)? {
        SqlValue::Array(elems) => elems
            .iter()
            .enumerate()
            .map(|(i, elem)| match elem {
                SqlValue::Bytes(b) => {
                    let raw: [u8; 16] = b
                        .as_ref()
                        .try_into()
                        .map_err(|_| StorageError::new("uuid element must be 16 bytes"))?;
                    Ok(Uuid::from_bytes(raw))
                }
                other => Err(StorageError::new(format!(
                    "array element {i} is not a uuid: {other:?}"
                ))),
            })
            .collect(),
        other => Err(StorageError::new(format!(
            "argument ${} is not an array: {other:?}",
            idx + 1
        ))),
    }
}

fn arg_bytes(args: &[SqlValue], idx: usize) -> Result<Bytes, StorageError> {
    match arg(args, idx)? {
        SqlValue::Bytes(b) => Ok(b.clone()),
        other => Err(StorageError::new(format!(
            "argument ${} is not bytes: {other:?}",
            idx + 1
        ))),
    }
}

fn arg_text(args: &[SqlValue], idx: usize) -> Result<String, StorageError> {
    match arg(args, idx)? {
        SqlValue::Text(s) => Ok(s.clone()),
        other => Err(StorageError::new(format!(
            "argument ${} is not text: {other:?}",
            idx + 1
        ))),
    }
}

fn arg_int(args: &[SqlValue], idx: usize) -> Result<i64, StorageError> {
    match arg(args, idx)? {
        SqlValue::Int(v) => Ok(*v),
        other => Err(StorageError::new(format!(
            "argument ${} is not an int: {other:?}",
            idx + 1
        ))),
    }
}

fn arg_bool(args: &[SqlValue], idx: usize) -> Result<bool, StorageError> {
    match arg(args, idx)? {
        SqlValue::Bool(v) => Ok(*v),
        other => Err(StorageError::new(format!(
            "argument ${} is not a bool: {other:?}",
            idx + 1
        ))),
    }
}
