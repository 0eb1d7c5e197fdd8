//! Decoding of dynamically typed rows into strongly typed records.
//!
//! The full-info statements all produce the same 8-column shape; this module
//! is the single place that understands it, including the voters aggregate
//! (`u64_be(power) || pub_key` blobs) and the backend quirk where an
//! all-null aggregate arrives as a one-element array holding a single null.

use bytes::Bytes;
use tessera_types::{Resolution, Validator};
use uuid::Uuid;

use crate::error::VoteStoreError;
use crate::sql::SqlValue;

pub(crate) fn cell_uuid(cell: &SqlValue, column: &'static str) -> Result<Uuid, VoteStoreError> {
    let bytes = cell_bytes(cell, column)?;
    let raw: [u8; 16] = bytes.as_ref().try_into().map_err(|_| {
        VoteStoreError::CorruptRow(format!(
            "{column}: id must be 16 bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(Uuid::from_bytes(raw))
}

pub(crate) fn cell_bytes(cell: &SqlValue, column: &'static str) -> Result<Bytes, VoteStoreError> {
    match cell {
        SqlValue::Bytes(b) => Ok(b.clone()),
        other => Err(type_mismatch(column, "bytes", other)),
    }
}

pub(crate) fn cell_opt_bytes(
    cell: &SqlValue,
    column: &'static str,
) -> Result<Option<Bytes>, VoteStoreError> {
    match cell {
        SqlValue::Null => Ok(None),
        other => cell_bytes(other, column).map(Some),
    }
}

pub(crate) fn cell_int(cell: &SqlValue, column: &'static str) -> Result<i64, VoteStoreError> {
    match cell {
        SqlValue::Int(v) => Ok(*v),
        other => Err(type_mismatch(column, "int", other)),
    }
}

pub(crate) fn cell_bool(cell: &SqlValue, column: &'static str) -> Result<bool, VoteStoreError> {
    match cell {
        SqlValue::Bool(v) => Ok(*v),
        other => Err(type_mismatch(column, "bool", other)),
    }
}

fn cell_opt_text(
    cell: &SqlValue,
    column: &'static str,
) -> Result<Option<String>, VoteStoreError> {
    match cell {
        SqlValue::Null => Ok(None),
        SqlValue::Text(v) => Ok(Some(v.clone())),
        other => Err(type_mismatch(column, "text", other)),
    }
}

fn type_mismatch(column: &'static str, expected: &'static str, got: &SqlValue) -> VoteStoreError {
    VoteStoreError::InvalidType {
        column,
        expected,
        got: got.kind(),
    }
}

/// Decode one full-info row: `(id, body, type, expiration, approved_power,
/// voters, proposer, double_proposer_vote)`.
pub(crate) fn decode_resolution_row(row: &[SqlValue]) -> Result<Resolution, VoteStoreError> {
    if row.len() != 8 {
        return Err(VoteStoreError::CorruptRow(format!(
            "expected 8 columns, got {}",
            row.len()
        )));
    }

    let voters = match &row[5] {
        SqlValue::Array(elems) => decode_voters(elems)?,
        other => return Err(type_mismatch("voters", "array", other)),
    };

    Ok(Resolution {
        id: cell_uuid(&row[0], "id")?,
        body: cell_opt_bytes(&row[1], "body")?,
        type_name: cell_opt_text(&row[2], "type")?,
        expiration_height: cell_int(&row[3], "expiration")?,
        approved_power: match &row[4] {
            SqlValue::Null => 0,
            other => cell_int(other, "approved_power")?,
        },
        voters,
        proposer: cell_opt_bytes(&row[6], "proposer")?,
        double_proposer_vote: cell_bool(&row[7], "double_proposer_vote")?,
    })
}

/// Each element is `u64_be(power) || pub_key`. A null element is the
/// empty-aggregate artifact and is skipped. Powers beyond `i64::MAX` are
/// outside the operational envelope; the bits are reinterpreted as-is.
fn decode_voters(elems: &[SqlValue]) -> Result<Vec<Validator>, VoteStoreError> {
    let mut voters = Vec::with_capacity(elems.len());
    for elem in elems {
        let blob = match elem {
            SqlValue::Null => continue,
            SqlValue::Bytes(b) => b,
            other => return Err(type_mismatch("voters", "bytes", other)),
        };

        if blob.len() < 8 {
            return Err(VoteStoreError::CorruptRow(format!(
                "voter blob must be at least 8 bytes, got {}",
                blob.len()
            )));
        }

        let mut power_be = [0u8; 8];
        power_be.copy_from_slice(&blob[..8]);
        voters.push(Validator::new(blob.slice(8..), u64::from_be_bytes(power_be) as i64));
    }
    Ok(voters)
}
