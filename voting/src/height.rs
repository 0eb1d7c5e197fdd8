//! Block-height watermark: the last height this module has observed.

use crate::codec::cell_int;
use crate::error::VoteStoreError;
use crate::sql::{SqlExecutor, SqlValue};
use crate::statements;

/// The persisted watermark, or -1 on a fresh database.
pub async fn get_height<E>(db: &mut E) -> Result<i64, VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    let res = db.execute(statements::GET_HEIGHT, &[]).await?;

    match res.rows.first() {
        None => Ok(-1),
        Some(row) => {
            let cell = row.first().ok_or_else(|| {
                VoteStoreError::CorruptRow("height row has no columns".into())
            })?;
            cell_int(cell, "height")
        }
    }
}

/// Upsert the watermark. Monotonicity is the caller's contract; the store
/// records whatever it is given.
pub async fn set_height<E>(db: &mut E, height: i64) -> Result<(), VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    db.execute(statements::UPDATE_HEIGHT, &[SqlValue::Int(height)])
        .await?;
    Ok(())
}
