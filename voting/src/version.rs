//! Schema versioning: idempotent table creation and forward migrations.
//!
//! Each schema records the highest migration version applied to it under the
//! `tessera_versioning` namespace. [`upgrade`] runs every registered
//! migration above that version, in ascending order, inside one nested
//! transaction; a failure rolls everything back and leaves the persisted
//! version untouched.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::codec::cell_int;
use crate::error::VoteStoreError;
use crate::sql::{SqlTx, SqlValue, TxOpener};

pub(crate) const CREATE_VERSIONS_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS tessera_versioning";

pub(crate) const TABLE_SCHEMA_VERSIONS: &str =
    r#"CREATE TABLE IF NOT EXISTS tessera_versioning.schema_versions (
    schema_name TEXT PRIMARY KEY,
    version INT8 NOT NULL
)"#;

pub(crate) const GET_SCHEMA_VERSION: &str =
    "SELECT version FROM tessera_versioning.schema_versions WHERE schema_name = $1";

pub(crate) const SET_SCHEMA_VERSION: &str =
    r#"INSERT INTO tessera_versioning.schema_versions (schema_name, version)
VALUES ($1, $2)
ON CONFLICT (schema_name) DO UPDATE SET version = $2"#;

/// One forward migration. Implementations must be idempotent per version:
/// the runner guarantees each version executes at most once per database,
/// but a crash between `run` and the version write is healed by rerunning.
#[async_trait]
pub trait Migration: Send + Sync {
    /// The version this migration brings the schema to.
    fn version(&self) -> i64;

    async fn run(&self, tx: &mut dyn SqlTx) -> Result<(), VoteStoreError>;
}

/// Bring `schema_name` up to the highest version among `migrations`.
///
/// Migrations must be sorted by strictly ascending version. A persisted
/// version equal to the latest makes this a no-op.
pub async fn upgrade<D>(
    db: &mut D,
    schema_name: &str,
    migrations: &[&dyn Migration],
) -> Result<(), VoteStoreError>
where
    D: TxOpener + ?Sized,
{
    let mut tx = db.begin().await?;
    match run_pending(tx.as_mut(), schema_name, migrations).await {
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

async fn run_pending(
    tx: &mut dyn SqlTx,
    schema_name: &str,
    migrations: &[&dyn Migration],
) -> Result<(), VoteStoreError> {
    for window in migrations.windows(2) {
        if window[0].version() >= window[1].version() {
            return Err(VoteStoreError::InvalidArgument(
                "migrations must have strictly ascending versions".into(),
            ));
        }
    }

    tx.execute(CREATE_VERSIONS_SCHEMA, &[]).await?;
    tx.execute(TABLE_SCHEMA_VERSIONS, &[]).await?;

    let current = current_version(&mut *tx, schema_name).await?;
    let latest = match migrations.last() {
        Some(m) => m.version(),
        None => return Ok(()),
    };

    if current == Some(latest) {
        debug!(schema = schema_name, version = latest, "schema up to date");
        return Ok(());
    }

    for migration in migrations {
        if Some(migration.version()) <= current {
            continue;
        }
        info!(
            schema = schema_name,
            version = migration.version(),
            "applying schema migration"
        );
        migration.run(tx).await?;
    }

    tx.execute(
        SET_SCHEMA_VERSION,
        &[SqlValue::from(schema_name), SqlValue::Int(latest)],
    )
    .await?;

    Ok(())
}

async fn current_version(
    tx: &mut dyn SqlTx,
    schema_name: &str,
) -> Result<Option<i64>, VoteStoreError> {
    let res = tx
        .execute(GET_SCHEMA_VERSION, &[SqlValue::from(schema_name)])
        .await?;

    match res.rows.first() {
        None => Ok(None),
        Some(row) => {
            let row0 = row.first().ok_or_else(|| {
                VoteStoreError::CorruptRow("schema version row has no columns".into())
            })?;
            cell_int(row0, "version").map(Some)
        }
    }
}
