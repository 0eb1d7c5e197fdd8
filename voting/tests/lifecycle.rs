//! End-to-end lifecycle tests over the in-memory backend: the store is
//! driven exactly the way the block processor drives it, including outer
//! transactions and threshold evaluation at block end.

use tessera_types::VotableEvent;
use tessera_voting::sql::SqlTx;
use tessera_voting::testing::MemoryDb;
use tessera_voting::{
    height, initialize_vote_store, power, store, threshold, ResolutionRegistry, VoteStoreError,
};

const CREDIT: &str = "credit_account";
const JOIN: &str = "validator_join";

const VAL_A: &[u8] = b"validator-a";
const VAL_B: &[u8] = b"validator-b";
const VAL_C: &[u8] = b"validator-c";
const PROPOSER: &[u8] = b"external-proposer";

async fn new_store() -> MemoryDb {
    let mut db = MemoryDb::new();
    let registry = ResolutionRegistry::new([CREDIT, JOIN]);
    initialize_vote_store(&mut db, &registry)
        .await
        .expect("store initialization failed");
    db
}

async fn seed_validators(db: &mut MemoryDb, validators: &[(&[u8], i64)]) {
    for (key, p) in validators {
        power::set_power(db, key, *p).await.expect("set_power failed");
    }
}

fn credit_event(body: &'static [u8]) -> VotableEvent {
    VotableEvent::new(CREDIT, body)
}

#[test_log::test(tokio::test)]
async fn approve_then_create_reaches_threshold() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3), (VAL_B, 2), (VAL_C, 2)]).await;

    // required power: ceil(7 * 2/3) = 5
    assert_eq!(threshold::required_power(&mut db, 2, 3).await.unwrap(), 5);

    let event = credit_event(b"credit alice 100");
    let id = event.id();

    store::approve_resolution(&mut db, id, 100, VAL_A).await.unwrap();
    store::approve_resolution(&mut db, id, 100, VAL_B).await.unwrap();

    let passed = store::get_resolutions_by_threshold_and_type(&mut db, 2, 3, CREDIT)
        .await
        .unwrap();
    assert!(
        passed.is_empty(),
        "a bodyless resolution has no type and must not pass"
    );

    store::approve_resolution(&mut db, id, 100, VAL_C).await.unwrap();

    let passed = store::get_resolutions_by_threshold_and_type(&mut db, 2, 3, CREDIT)
        .await
        .unwrap();
    assert!(
        passed.is_empty(),
        "even full approval cannot pass without a body"
    );

    // The proposer need not be a validator.
    store::create_resolution(&mut db, &event, 100, PROPOSER)
        .await
        .unwrap();

    let passed = store::get_resolutions_by_threshold_and_type(&mut db, 2, 3, CREDIT)
        .await
        .unwrap();
    assert_eq!(passed.len(), 1);

    let resolution = &passed[0];
    assert_eq!(resolution.id, id);
    assert_eq!(resolution.approved_power, 7);
    assert_eq!(resolution.voters.len(), 3);
    assert_eq!(resolution.body.as_deref(), Some(&b"credit alice 100"[..]));
    assert_eq!(resolution.type_name.as_deref(), Some(CREDIT));
    assert_eq!(resolution.proposer.as_deref(), Some(PROPOSER));
    assert!(!resolution.double_proposer_vote);
}

#[test_log::test(tokio::test)]
async fn threshold_boundary_is_inclusive() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3), (VAL_B, 2), (VAL_C, 2)]).await;

    let event = credit_event(b"boundary");
    let id = event.id();
    store::create_resolution(&mut db, &event, 100, PROPOSER).await.unwrap();

    store::approve_resolution(&mut db, id, 100, VAL_A).await.unwrap();
    let passed = store::get_resolutions_by_threshold_and_type(&mut db, 2, 3, CREDIT)
        .await
        .unwrap();
    assert!(passed.is_empty(), "3 of 7 power is below the required 5");

    store::approve_resolution(&mut db, id, 100, VAL_B).await.unwrap();
    let passed = store::get_resolutions_by_threshold_and_type(&mut db, 2, 3, CREDIT)
        .await
        .unwrap();
    assert_eq!(passed.len(), 1, "exactly the required power must pass");
    assert_eq!(passed[0].approved_power, 5);
}

#[test_log::test(tokio::test)]
async fn proposer_double_vote_sets_flag() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3), (VAL_B, 2)]).await;

    let event = credit_event(b"double vote body");
    let id = event.id();

    store::approve_resolution(&mut db, id, 50, VAL_A).await.unwrap();
    store::create_resolution(&mut db, &event, 50, VAL_A).await.unwrap();

    let info = store::get_resolution_info(&mut db, id).await.unwrap();
    assert!(
        info.double_proposer_vote,
        "the proposer approved before proposing"
    );

    // required power: ceil(5 * 1/2) = 3, and A alone has 3.
    let passed = store::get_resolutions_by_threshold_and_type(&mut db, 1, 2, CREDIT)
        .await
        .unwrap();
    assert_eq!(passed.len(), 1);
    assert_eq!(passed[0].id, id);
}

#[test_log::test(tokio::test)]
async fn create_without_prior_vote_leaves_flag_unset() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3)]).await;

    let event = credit_event(b"no prior vote");
    store::create_resolution(&mut db, &event, 50, VAL_A).await.unwrap();

    let info = store::get_resolution_info(&mut db, event.id()).await.unwrap();
    assert!(!info.double_proposer_vote);
}

#[test_log::test(tokio::test)]
async fn processed_resolutions_are_terminal() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3), (VAL_B, 1)]).await;

    let event = credit_event(b"terminal");
    let id = event.id();
    store::approve_resolution(&mut db, id, 10, VAL_A).await.unwrap();
    store::create_resolution(&mut db, &event, 10, PROPOSER).await.unwrap();

    store::mark_processed(&mut db, &[id]).await.unwrap();
    assert!(store::is_processed(&mut db, id).await.unwrap());

    // Approval becomes a silent no-op.
    store::approve_resolution(&mut db, id, 10, VAL_B).await.unwrap();
    assert!(
        !store::has_voted(&mut db, id, VAL_B).await.unwrap(),
        "no vote may be recorded against a processed id"
    );

    // Creation is refused.
    let err = store::create_resolution(&mut db, &event, 10, PROPOSER)
        .await
        .unwrap_err();
    assert!(matches!(err, VoteStoreError::AlreadyProcessed(got) if got == id));
}

#[test_log::test(tokio::test)]
async fn zero_power_evicts_and_shrinks_total() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3), (VAL_B, 2), (VAL_C, 2)]).await;
    assert_eq!(power::total_power(&mut db).await.unwrap(), 7);

    power::set_power(&mut db, VAL_C, 0).await.unwrap();

    assert_eq!(power::get_power(&mut db, VAL_C).await.unwrap(), 0);
    let voters = power::all_voters(&mut db).await.unwrap();
    assert!(
        voters.iter().all(|v| v.pub_key.as_ref() != VAL_C),
        "evicted voter still listed"
    );
    assert_eq!(power::total_power(&mut db).await.unwrap(), 5);
    // required power: ceil(5 * 2/3) = 4
    assert_eq!(threshold::required_power(&mut db, 2, 3).await.unwrap(), 4);
}

#[test_log::test(tokio::test)]
async fn negative_power_is_refused() {
    let mut db = new_store().await;
    let err = power::set_power(&mut db, VAL_A, -1).await.unwrap_err();
    assert!(matches!(err, VoteStoreError::InvalidArgument(_)));
}

#[test_log::test(tokio::test)]
async fn expiration_filter_tracks_processing() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3)]).await;

    let event = credit_event(b"expiring");
    let id = event.id();
    store::create_resolution(&mut db, &event, 12, PROPOSER).await.unwrap();

    assert!(
        store::get_expired(&mut db, 11).await.unwrap().is_empty(),
        "not yet expired at height 11"
    );

    let expired = store::get_expired(&mut db, 12).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, id);

    // Processed resolutions stop counting as expired even before deletion.
    store::mark_processed(&mut db, &[id]).await.unwrap();
    assert!(store::get_expired(&mut db, 12).await.unwrap().is_empty());

    store::delete_resolutions(&mut db, &[id]).await.unwrap();
    assert!(store::get_expired(&mut db, 12).await.unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn unknown_voter_leaves_no_trace() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3)]).await;

    let event = credit_event(b"never voted on");
    let id = event.id();

    let err = store::approve_resolution(&mut db, id, 100, b"stranger")
        .await
        .unwrap_err();
    assert!(matches!(err, VoteStoreError::UnknownVoter(_)));

    // The savepoint rolled back the implicit resolution insert too.
    assert!(!store::resolution_contains_body(&mut db, id).await.unwrap());
    assert!(
        store::filter_exists_no_body(&mut db, &[id]).await.unwrap().is_empty(),
        "rolled-back resolution row still present"
    );
}

#[test_log::test(tokio::test)]
async fn approvals_are_idempotent() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3)]).await;

    let event = credit_event(b"idempotent");
    let id = event.id();

    for _ in 0..3 {
        store::approve_resolution(&mut db, id, 100, VAL_A).await.unwrap();
    }
    store::create_resolution(&mut db, &event, 100, PROPOSER).await.unwrap();

    let info = store::get_resolution_info(&mut db, id).await.unwrap();
    assert_eq!(info.voters.len(), 1, "one voter, no matter how many approvals");
    assert_eq!(info.approved_power, 3);
}

#[test_log::test(tokio::test)]
async fn body_is_written_exactly_once() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3)]).await;

    let event = credit_event(b"contested body");
    let id = event.id();

    store::create_resolution(&mut db, &event, 100, PROPOSER).await.unwrap();

    let err = store::create_resolution(&mut db, &event, 100, VAL_A)
        .await
        .unwrap_err();
    assert!(matches!(err, VoteStoreError::ResolutionAlreadyHasBody(got) if got == id));

    // The original proposer keeps the reward claim.
    let info = store::get_resolution_info(&mut db, id).await.unwrap();
    assert_eq!(info.proposer.as_deref(), Some(PROPOSER));
}

#[test_log::test(tokio::test)]
async fn bodyless_resolutions_are_invisible_to_type_queries() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3)]).await;

    let event = credit_event(b"early approval");
    let id = event.id();
    store::approve_resolution(&mut db, id, 100, VAL_A).await.unwrap();

    assert!(
        store::get_resolutions_by_type(&mut db, CREDIT).await.unwrap().is_empty(),
        "a typeless row must not match by-type queries"
    );

    // But the row itself is queryable by id, typeless and bodyless.
    let info = store::get_resolution_info(&mut db, id).await.unwrap();
    assert_eq!(info.type_name, None);
    assert_eq!(info.body, None);
    assert_eq!(info.proposer, None);
    assert_eq!(info.approved_power, 3);

    assert_eq!(
        store::filter_exists_no_body(&mut db, &[id]).await.unwrap(),
        vec![id]
    );

    // The later create keeps the early votes.
    store::create_resolution(&mut db, &event, 100, PROPOSER).await.unwrap();
    let by_type = store::get_resolutions_by_type(&mut db, CREDIT).await.unwrap();
    assert_eq!(by_type.len(), 1);
    assert_eq!(by_type[0].voters.len(), 1);
    assert_eq!(by_type[0].voters[0].pub_key.as_ref(), VAL_A);
}

#[test_log::test(tokio::test)]
async fn filter_not_processed_includes_unknown_ids() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3)]).await;

    let processed = credit_event(b"already done");
    store::create_resolution(&mut db, &processed, 10, PROPOSER).await.unwrap();
    store::mark_processed(&mut db, &[processed.id()]).await.unwrap();

    let pending = credit_event(b"still pending");
    store::create_resolution(&mut db, &pending, 10, PROPOSER).await.unwrap();

    let unknown = credit_event(b"nobody has seen this").id();

    let out = store::filter_not_processed(
        &mut db,
        &[processed.id(), pending.id(), unknown],
    )
    .await
    .unwrap();
    assert_eq!(out, vec![pending.id(), unknown]);
}

#[test_log::test(tokio::test)]
async fn ids_by_type_and_proposer() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3)]).await;

    let first = credit_event(b"first");
    let second = credit_event(b"second");
    let other = VotableEvent::new(JOIN, &b"third"[..]);
    store::create_resolution(&mut db, &first, 10, PROPOSER).await.unwrap();
    store::create_resolution(&mut db, &second, 10, PROPOSER).await.unwrap();
    store::create_resolution(&mut db, &other, 10, VAL_A).await.unwrap();

    let mut ids = store::get_resolution_ids_by_type_and_proposer(&mut db, CREDIT, PROPOSER)
        .await
        .unwrap();
    ids.sort();
    let mut expected = vec![first.id(), second.id()];
    expected.sort();
    assert_eq!(ids, expected);

    let none = store::get_resolution_ids_by_type_and_proposer(&mut db, JOIN, PROPOSER)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[test_log::test(tokio::test)]
async fn caller_rollback_discards_lifecycle_writes() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3)]).await;

    let event = credit_event(b"rolled back with the block");
    let id = event.id();

    {
        let mut block_tx = db.transaction();
        store::approve_resolution(&mut block_tx, id, 100, VAL_A).await.unwrap();
        store::create_resolution(&mut block_tx, &event, 100, PROPOSER).await.unwrap();
        // The block fails; everything inside it is discarded.
        block_tx.rollback().await.unwrap();
    }

    assert!(!store::has_voted(&mut db, id, VAL_A).await.unwrap());
    assert!(!store::resolution_contains_body(&mut db, id).await.unwrap());

    {
        let mut block_tx = db.transaction();
        store::approve_resolution(&mut block_tx, id, 100, VAL_A).await.unwrap();
        block_tx.commit().await.unwrap();
    }

    assert!(store::has_voted(&mut db, id, VAL_A).await.unwrap());
}

#[test_log::test(tokio::test)]
async fn height_watermark_round_trip() {
    let mut db = new_store().await;

    assert_eq!(height::get_height(&mut db).await.unwrap(), -1);

    height::set_height(&mut db, 10).await.unwrap();
    assert_eq!(height::get_height(&mut db).await.unwrap(), 10);

    // The store does not enforce monotonicity.
    height::set_height(&mut db, 8).await.unwrap();
    assert_eq!(height::get_height(&mut db).await.unwrap(), 8);
}

#[test_log::test(tokio::test)]
async fn late_registered_type_is_picked_up_on_next_init() {
    let mut db = MemoryDb::new();
    initialize_vote_store(&mut db, &ResolutionRegistry::new([CREDIT]))
        .await
        .unwrap();
    seed_validators(&mut db, &[(VAL_A, 3)]).await;

    let event = VotableEvent::new(JOIN, &b"joins later"[..]);
    let err = store::create_resolution(&mut db, &event, 10, VAL_A)
        .await
        .unwrap_err();
    assert!(
        matches!(err, VoteStoreError::Storage(_)),
        "unregistered type must be rejected by the type constraint"
    );

    // A node restart with the new type registered picks it up.
    initialize_vote_store(&mut db, &ResolutionRegistry::new([CREDIT, JOIN]))
        .await
        .unwrap();
    store::create_resolution(&mut db, &event, 10, VAL_A).await.unwrap();
}

#[test_log::test(tokio::test)]
async fn threshold_snapshot_reads_do_not_mutate() {
    let mut db = new_store().await;
    seed_validators(&mut db, &[(VAL_A, 3), (VAL_B, 2)]).await;

    let event = credit_event(b"snapshot");
    store::approve_resolution(&mut db, event.id(), 10, VAL_A).await.unwrap();
    store::create_resolution(&mut db, &event, 10, PROPOSER).await.unwrap();

    let before = store::get_resolution_info(&mut db, event.id()).await.unwrap();
    let _ = store::get_resolutions_by_threshold_and_type(&mut db, 1, 2, CREDIT)
        .await
        .unwrap();
    let after = store::get_resolution_info(&mut db, event.id()).await.unwrap();
    assert_eq!(before, after, "read path must leave state untouched");
}
