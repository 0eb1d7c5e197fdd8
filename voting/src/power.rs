//! The validator registry: who may vote, and with how much power.

use bytes::Bytes;
use tessera_types::{uuid_v5, Validator};
use tracing::debug;

use crate::codec::{cell_bytes, cell_int};
use crate::error::VoteStoreError;
use crate::sql::{SqlExecutor, SqlValue};
use crate::statements;

/// Set a voter's power, creating the row if needed. Zero power evicts the
/// voter (and, by cascade, its outstanding votes). Negative power is
/// refused.
pub async fn set_power<E>(db: &mut E, pub_key: &[u8], power: i64) -> Result<(), VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    if power < 0 {
        return Err(VoteStoreError::InvalidArgument(format!(
            "cannot set negative power {power}"
        )));
    }

    let id = SqlValue::uuid(uuid_v5(pub_key));

    if power == 0 {
        debug!(voter = %hex::encode(pub_key), "evicting zero-power voter");
        db.execute(statements::REMOVE_VOTER, &[id]).await?;
        return Ok(());
    }

    db.execute(
        statements::UPSERT_VOTER,
        &[
            id,
            SqlValue::Bytes(Bytes::copy_from_slice(pub_key)),
            SqlValue::Int(power),
        ],
    )
    .await?;

    Ok(())
}

/// A voter's current power; 0 when the voter does not exist.
pub async fn get_power<E>(db: &mut E, pub_key: &[u8]) -> Result<i64, VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    let res = db
        .execute(
            statements::GET_VOTER_POWER,
            &[SqlValue::uuid(uuid_v5(pub_key))],
        )
        .await?;

    match res.rows.first() {
        None => Ok(0),
        Some(row) => {
            let cell = single_cell(row)?;
            cell_int(cell, "power")
        }
    }
}

/// All voters and their powers. Empty when the set is empty.
pub async fn all_voters<E>(db: &mut E) -> Result<Vec<Validator>, VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    let res = db.execute(statements::ALL_VOTERS, &[]).await?;

    let mut voters = Vec::with_capacity(res.rows.len());
    for row in &res.rows {
        if row.len() != 2 {
            return Err(VoteStoreError::CorruptRow(format!(
                "voter row must have 2 columns, got {}",
                row.len()
            )));
        }
        voters.push(Validator::new(
            cell_bytes(&row[0], "pub_key")?,
            cell_int(&row[1], "power")?,
        ));
    }
    Ok(voters)
}

/// Sum of all voter powers; 0 for an empty set.
pub async fn total_power<E>(db: &mut E) -> Result<i64, VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    let res = db.execute(statements::TOTAL_POWER, &[]).await?;

    match res.rows.first() {
        None => Ok(0),
        Some(row) => match single_cell(row)? {
            // SUM over zero rows is null.
            SqlValue::Null => Ok(0),
            cell => cell_int(cell, "total_power"),
        },
    }
}

fn single_cell(row: &[SqlValue]) -> Result<&SqlValue, VoteStoreError> {
    if row.len() != 1 {
        return Err(VoteStoreError::CorruptRow(format!(
            "expected a single column, got {}",
            row.len()
        )));
    }
    Ok(&row[0])
}
