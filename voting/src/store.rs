//! The resolution store and its lifecycle operations.
//!
//! All mutations run inside a nested transaction opened from the caller's
//! handle, so a half-applied operation can never leak into the outer block
//! transaction. Reads decode through [`crate::codec`]; the threshold query
//! opens its own read snapshot because it must see the resolution table and
//! the voter power sum at the same instant.

use bytes::Bytes;
use tessera_types::{uuid_v5, Resolution, ResolutionId, VotableEvent};
use tracing::debug;

use crate::codec::{cell_bool, cell_uuid, decode_resolution_row};
use crate::error::VoteStoreError;
use crate::sql::{QueryResult, ReadTxOpener, SqlExecutor, SqlTx, SqlValue, TxOpener};
use crate::{power, statements, threshold};

/// Record an approval of `id` by the voter identified by `from`.
///
/// If the resolution does not exist yet it is created without a body; a
/// later [`create_resolution`] fills body, type and proposer while keeping
/// the votes collected so far. Approving an already-processed id is a no-op,
/// and approving twice is idempotent. An approval from a pub key with no
/// voter row fails with [`VoteStoreError::UnknownVoter`].
pub async fn approve_resolution<D>(
    db: &mut D,
    id: ResolutionId,
    expiration: i64,
    from: &[u8],
) -> Result<(), VoteStoreError>
where
    D: TxOpener + ?Sized,
{
    let mut tx = db.begin().await?;
    match approve_in_tx(tx.as_mut(), id, expiration, from).await {
        Ok(()) => {
            tx.commit().await?;
            Ok(())
        }
        Err(err) => {
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}

async fn approve_in_tx(
    tx: &mut dyn SqlTx,
    id: ResolutionId,
    expiration: i64,
    from: &[u8],
) -> Result<(), VoteStoreError> {
    if is_processed(&mut *tx, id).await? {
        debug!(%id, "approval for processed resolution ignored");
        return Ok(());
    }

    tx.execute(
        statements::ENSURE_RESOLUTION_EXISTS,
        &[SqlValue::uuid(id), SqlValue::Int(expiration)],
    )
    .await?;

    // The votes insert would trip the voter foreign key anyway; checking
    // here keeps the refusal deterministic across backends.
    if power::get_power(&mut *tx, from).await? == 0 {
        return Err(VoteStoreError::UnknownVoter(Bytes::copy_from_slice(from)));
    }

    tx.execute(
        statements::ADD_VOTE,
        &[SqlValue::uuid(id), SqlValue::uuid(uuid_v5(from))],
    )
    .await?;

    Ok(())
}

/// Attach a body to a resolution by submitting the underlying event.
///
/// The resolution may or may not already exist from earlier approvals.
/// Exactly one create ever succeeds per id: a second proposer gets
/// [`VoteStoreError::ResolutionAlreadyHasBody`], and a processed id gets
/// [`VoteStoreError::AlreadyProcessed`]. When the proposer had already
/// approved the same id, the stored `double_proposer_vote` flag is set so
/// reward accounting can refund both transactions.
pub async fn create_resolution<D>(
    db: &mut D,
    event: &VotableEvent,
    expiration: i64,
    proposer: &[u8],
) -> Result<(), VoteStoreError>
where
    D: TxOpener + ?Sized,
{
    let mut tx = db.begin().await?;
    match create_in_tx(tx.as_mut(), event, expiration, proposer).await {
        Ok(()) => {
            tx.commit().await?;
            Ok(())
        }
        Err(err) => {
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}

async fn create_in_tx(
    tx: &mut dyn SqlTx,
    event: &VotableEvent,
    expiration: i64,
    proposer: &[u8],
) -> Result<(), VoteStoreError> {
    let id = event.id();

    if is_processed(&mut *tx, id).await? {
        return Err(VoteStoreError::AlreadyProcessed(id));
    }

    if resolution_contains_body(&mut *tx, id).await? {
        return Err(VoteStoreError::ResolutionAlreadyHasBody(id));
    }

    let double_proposer_vote = has_voted(&mut *tx, id, proposer).await?;

    tx.execute(
        statements::UPSERT_RESOLUTION,
        &[
            SqlValue::uuid(id),
            SqlValue::Bytes(event.body.clone()),
            SqlValue::from(event.type_name.as_str()),
            SqlValue::Int(expiration),
            SqlValue::Bytes(Bytes::copy_from_slice(proposer)),
            SqlValue::Bool(double_proposer_vote),
        ],
    )
    .await?;

    Ok(())
}

/// The full record for `id`, voters included.
pub async fn get_resolution_info<E>(
    db: &mut E,
    id: ResolutionId,
) -> Result<Resolution, VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    let res = db
        .execute(statements::FULL_RESOLUTION_BY_ID, &[SqlValue::uuid(id)])
        .await?;

    match res.rows.len() {
        0 => Err(VoteStoreError::InvalidArgument(format!(
            "no resolution with id {id}"
        ))),
        1 => decode_resolution_row(&res.rows[0]),
        n => Err(VoteStoreError::CorruptRow(format!(
            "expected 1 row for id {id}, got {n}"
        ))),
    }
}

/// All unprocessed resolutions with `expiration <= height`.
pub async fn get_expired<E>(db: &mut E, height: i64) -> Result<Vec<Resolution>, VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    let res = db
        .execute(
            statements::FULL_RESOLUTIONS_BY_EXPIRATION,
            &[SqlValue::Int(height)],
        )
        .await?;
    decode_rows(&res)
}

/// All resolutions of `type_name` whose approved power has reached the
/// `numerator / denominator` threshold of the current total power.
///
/// Runs under its own read snapshot so the threshold and the tallies are
/// computed against one consistent state; the snapshot is always rolled
/// back since nothing is written.
pub async fn get_resolutions_by_threshold_and_type<D>(
    db: &mut D,
    numerator: i64,
    denominator: i64,
    type_name: &str,
) -> Result<Vec<Resolution>, VoteStoreError>
where
    D: ReadTxOpener + ?Sized,
{
    let mut tx = db.begin_read().await?;
    let result = thresholded_in_tx(tx.as_mut(), numerator, denominator, type_name).await;
    let _ = tx.rollback().await;
    result
}

async fn thresholded_in_tx(
    tx: &mut dyn SqlTx,
    numerator: i64,
    denominator: i64,
    type_name: &str,
) -> Result<Vec<Resolution>, VoteStoreError> {
    let required = threshold::required_power(&mut *tx, numerator, denominator).await?;

    let res = tx
        .execute(
            statements::FULL_RESOLUTIONS_BY_POWER,
            &[SqlValue::from(type_name), SqlValue::Int(required)],
        )
        .await?;
    decode_rows(&res)
}

/// All resolutions of a type. Rows approved before their create arrives
/// have no type yet and are not returned.
pub async fn get_resolutions_by_type<E>(
    db: &mut E,
    type_name: &str,
) -> Result<Vec<Resolution>, VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    let res = db
        .execute(
            statements::FULL_RESOLUTIONS_BY_TYPE,
            &[SqlValue::from(type_name)],
        )
        .await?;
    decode_rows(&res)
}

/// Ids of all resolutions of a type attached by a given proposer.
pub async fn get_resolution_ids_by_type_and_proposer<E>(
    db: &mut E,
    type_name: &str,
    proposer: &[u8],
) -> Result<Vec<ResolutionId>, VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    let res = db
        .execute(
            statements::RESOLUTION_IDS_BY_TYPE_AND_PROPOSER,
            &[
                SqlValue::from(type_name),
                SqlValue::Bytes(Bytes::copy_from_slice(proposer)),
            ],
        )
        .await?;
    decode_id_rows(&res)
}

/// Mark ids as processed, making them terminal. Duplicates are ignored.
pub async fn mark_processed<E>(db: &mut E, ids: &[ResolutionId]) -> Result<(), VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    db.execute(statements::MARK_MANY_PROCESSED, &[SqlValue::uuid_array(ids)])
        .await?;
    Ok(())
}

/// Delete resolutions, cascading to their votes.
pub async fn delete_resolutions<E>(db: &mut E, ids: &[ResolutionId]) -> Result<(), VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    db.execute(statements::DELETE_RESOLUTIONS, &[SqlValue::uuid_array(ids)])
        .await?;
    Ok(())
}

/// The subset of `ids` not yet processed. Ids with no resolution row are
/// included: never having been seen is not the same as being terminal.
pub async fn filter_not_processed<E>(
    db: &mut E,
    ids: &[ResolutionId],
) -> Result<Vec<ResolutionId>, VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    let res = db
        .execute(statements::FILTER_NOT_PROCESSED, &[SqlValue::uuid_array(ids)])
        .await?;
    decode_id_rows(&res)
}

/// The subset of `ids` that exist as resolutions but still lack a body.
pub async fn filter_exists_no_body<E>(
    db: &mut E,
    ids: &[ResolutionId],
) -> Result<Vec<ResolutionId>, VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    let res = db
        .execute(
            statements::FILTER_EXISTS_NO_BODY,
            &[SqlValue::uuid_array(ids)],
        )
        .await?;
    decode_id_rows(&res)
}

/// Whether the voter identified by `from` has approved `id`.
pub async fn has_voted<E>(
    db: &mut E,
    id: ResolutionId,
    from: &[u8],
) -> Result<bool, VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    let res = db
        .execute(
            statements::HAS_VOTED,
            &[SqlValue::uuid(id), SqlValue::uuid(uuid_v5(from))],
        )
        .await?;
    Ok(!res.rows.is_empty())
}

/// Whether a body has been attached to `id`. False when the resolution
/// does not exist.
pub async fn resolution_contains_body<E>(
    db: &mut E,
    id: ResolutionId,
) -> Result<bool, VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    let res = db
        .execute(statements::CONTAINS_BODY, &[SqlValue::uuid(id)])
        .await?;

    match res.rows.first() {
        None => Ok(false),
        Some(row) => {
            if row.len() != 1 {
                return Err(VoteStoreError::CorruptRow(format!(
                    "expected a single column, got {}",
                    row.len()
                )));
            }
            cell_bool(&row[0], "contains_body")
        }
    }
}

/// Whether `id` is terminal.
pub async fn is_processed<E>(db: &mut E, id: ResolutionId) -> Result<bool, VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    let res = db
        .execute(statements::ALREADY_PROCESSED, &[SqlValue::uuid(id)])
        .await?;
    Ok(!res.rows.is_empty())
}

fn decode_rows(res: &QueryResult) -> Result<Vec<Resolution>, VoteStoreError> {
    res.rows.iter().map(|r| decode_resolution_row(r)).collect()
}

fn decode_id_rows(res: &QueryResult) -> Result<Vec<ResolutionId>, VoteStoreError> {
    res.rows
        .iter()
        .map(|row| {
            let cell = row.first().ok_or_else(|| {
                VoteStoreError::CorruptRow("id row has no columns".into())
            })?;
            cell_uuid(cell, "id")
        })
        .collect()
}
