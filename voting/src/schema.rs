//! Store initialization: the migration chain for the `tessera_voting`
//! schema, plus resolution-type registration.

use async_trait::async_trait;
use tracing::debug;

use crate::error::VoteStoreError;
use crate::registry::ResolutionRegistry;
use crate::sql::{SqlTx, SqlValue, TxOpener};
use crate::version::{upgrade, Migration};
use crate::{statements, VOTING_SCHEMA_NAME};

/// Initialize the vote store. Safe to call on every startup: applied schema
/// versions are skipped, and type registration is an upsert, so names added
/// to the registry since the last run get their row on the next one.
pub async fn initialize_vote_store<D>(
    db: &mut D,
    registry: &ResolutionRegistry,
) -> Result<(), VoteStoreError>
where
    D: TxOpener + ?Sized,
{
    upgrade(db, VOTING_SCHEMA_NAME, &[&InitialSchema]).await?;
    register_types(db, registry).await
}

async fn register_types<D>(
    db: &mut D,
    registry: &ResolutionRegistry,
) -> Result<(), VoteStoreError>
where
    D: TxOpener + ?Sized,
{
    let mut tx = db.begin().await?;
    match register_types_in_tx(tx.as_mut(), registry).await {
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

async fn register_types_in_tx(
    tx: &mut dyn SqlTx,
    registry: &ResolutionRegistry,
) -> Result<(), VoteStoreError> {
    for name in registry.names() {
        debug!(name, "registering resolution type");
        tx.execute(
            statements::CREATE_RESOLUTION_TYPE,
            &[
                SqlValue::uuid(ResolutionRegistry::type_id(name)),
                SqlValue::from(name),
            ],
        )
        .await?;
    }
    Ok(())
}

/// Version 0: all seven tables and the type index.
struct InitialSchema;

#[async_trait]
impl Migration for InitialSchema {
    fn version(&self) -> i64 {
        0
    }

    async fn run(&self, tx: &mut dyn SqlTx) -> Result<(), VoteStoreError> {
        // Order matters: resolutions references resolution_types, votes
        // references voters and resolutions.
        let ddl = [
            statements::CREATE_VOTING_SCHEMA,
            statements::TABLE_VOTERS,
            statements::TABLE_RESOLUTION_TYPES,
            statements::TABLE_RESOLUTIONS,
            statements::RESOLUTIONS_TYPE_INDEX,
            statements::TABLE_PROCESSED,
            statements::TABLE_VOTES,
            statements::TABLE_HEIGHT,
        ];

        for stmt in ddl {
            tx.execute(stmt, &[]).await?;
        }

        Ok(())
    }
}
