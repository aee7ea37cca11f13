mod common;

use std::sync::Arc;

use chrono::Utc;
use common::{FlakyStore, post, seed_post, stored_post, vote_record};
use newsboard::{
    models::VoteDirection,
    services::reconcile_service::Reconciler,
    store::{DocumentStore, VOTES},
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn a_vote_landing_mid_repair_is_not_overwritten() {
    let store = Arc::new(FlakyStore::new());
    // Counters claim two upvotes, the ledger holds one
    seed_post(store.as_ref(), &post("p1", Utc::now(), 2)).await;
    store
        .create(VOTES, vote_record("v1", "alice", "p1", VoteDirection::Up))
        .await
        .unwrap();

    store.land_upvote_before_guarded_update(
        "p1",
        vote_record("v2", "bob", "p1", VoteDirection::Up),
    );

    let reconciler = Reconciler::new(store.clone(), 10);
    let report = reconciler.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.repaired, 0);
    assert_eq!(report.contended, 1);

    // bob's increments survived
    let p1 = stored_post(store.as_ref(), "p1").await;
    assert_eq!((p1.count_up, p1.count_down, p1.score), (3, 0, 3));

    let report = reconciler.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.repaired, 1);
    let p1 = stored_post(store.as_ref(), "p1").await;
    assert_eq!((p1.count_up, p1.count_down, p1.score), (2, 0, 2));
}

#[tokio::test]
async fn consistent_counters_are_left_alone() {
    let store = Arc::new(FlakyStore::new());
    seed_post(store.as_ref(), &post("p1", Utc::now(), 1)).await;
    store
        .create(VOTES, vote_record("v1", "alice", "p1", VoteDirection::Up))
        .await
        .unwrap();

    let report = Reconciler::new(store.clone(), 10)
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.repaired + report.contended + report.failed, 0);
}
