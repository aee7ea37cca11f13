mod common;

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use common::{FlakyStore, post, seed_post, stored_post};
use newsboard::{
    clock::{Clock, ManualClock},
    config::RankingConfig,
    models::{QualitySignals, ResourceType, VoteDirection, VoteIntent},
    services::{
        post_service::list_ranked_posts,
        ranking_service::{Cursor, Phase, RankingEngine},
        vote_service::VoteLedger,
    },
    store::MemoryStore,
};
use tokio_util::sync::CancellationToken;

fn start() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn config(page_size: usize) -> RankingConfig {
    RankingConfig {
        page_size,
        ..RankingConfig::default()
    }
}

#[tokio::test]
async fn expired_post_drops_below_a_fresh_one() {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(MemoryStore::new());
    let now = clock.now();

    // Stale values from before it expired
    seed_post(store.as_ref(), &post("old", now - Duration::hours(25), 50)).await;
    seed_post(store.as_ref(), &post("new", now - Duration::hours(1), 0)).await;

    let engine = RankingEngine::new(store.clone(), clock.clone(), config(100));
    let report = engine.run_once().await.unwrap();
    assert_eq!(report.updated, 2);
    assert_eq!(report.failed, 0);

    let old = stored_post(store.as_ref(), "old").await;
    let new = stored_post(store.as_ref(), "new").await;
    assert_eq!(old.time_score, 0.0);
    assert_eq!(old.rank, 50.0);
    assert!((new.time_score - 100.0 * 23.0 / 24.0).abs() < 1e-9);
    assert!(new.rank > old.rank);

    // Still on the front page, so it keeps being ranked at the floor
    let report = engine.run_once().await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(stored_post(store.as_ref(), "old").await.rank, 50.0);
}

#[tokio::test]
async fn votes_on_a_post_past_the_horizon_still_move_its_rank() {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(MemoryStore::new());
    let now = clock.now();
    seed_post(store.as_ref(), &post("a", now - Duration::hours(30), 0)).await;
    seed_post(store.as_ref(), &post("b", now - Duration::hours(30), 5)).await;

    let engine = RankingEngine::new(store.clone(), clock.clone(), config(10));
    engine.run_once().await.unwrap();
    assert_eq!(stored_post(store.as_ref(), "a").await.time_score, 0.0);

    let ledger = VoteLedger::new(store.clone(), clock.clone());
    for i in 0..20 {
        ledger
            .apply_vote(
                Some(&format!("user{}", i)),
                &VoteIntent {
                    resource_id: "a".to_string(),
                    resource_type: ResourceType::Post,
                    direction: VoteDirection::Up,
                },
            )
            .await
            .unwrap();
    }

    engine.run_once().await.unwrap();
    assert_eq!(stored_post(store.as_ref(), "a").await.rank, 20.0);

    let listed = list_ranked_posts(store.as_ref(), now, engine.config().listing_window, 10)
        .await
        .unwrap();
    let ids: Vec<_> = listed.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);
}

#[tokio::test]
async fn posts_older_than_the_listing_window_are_settled_once() {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(MemoryStore::new());
    seed_post(store.as_ref(), &post("ancient", clock.now() - Duration::days(10), 3)).await;

    let engine = RankingEngine::new(store.clone(), clock.clone(), config(10));
    let first = engine.run_once().await.unwrap();
    assert_eq!(first.updated, 1);
    assert_eq!(stored_post(store.as_ref(), "ancient").await.time_score, 0.0);

    let second = engine.run_once().await.unwrap();
    assert_eq!(second.scanned, 0);
}

#[tokio::test]
async fn reruns_at_the_same_instant_change_nothing() {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(MemoryStore::new());
    let now = clock.now();

    for (i, hours) in [0, 3, 11, 20].into_iter().enumerate() {
        let mut p = post(&format!("p{}", i), now - Duration::hours(hours), i as i64 * 3);
        if i == 2 {
            p.quality = QualitySignals {
                quality_score: Some(70.0),
                spam_score: Some(10.0),
                ..QualitySignals::default()
            };
        }
        seed_post(store.as_ref(), &p).await;
    }

    let engine = RankingEngine::new(store.clone(), clock.clone(), config(3));
    engine.run_once().await.unwrap();
    let mut first = Vec::new();
    for i in 0..4 {
        first.push(stored_post(store.as_ref(), &format!("p{}", i)).await);
    }

    engine.run_once().await.unwrap();
    for (i, before) in first.iter().enumerate() {
        let after = stored_post(store.as_ref(), &format!("p{}", i)).await;
        assert_eq!(before.time_score, after.time_score);
        assert_eq!(before.rank, after.rank);
    }

    // 11h old, score 6, quality mean of 70 and 90
    let with_quality = &first[2];
    let expected_time = 100.0 * (1.0 - 11.0 / 24.0);
    assert!((with_quality.rank - (6.0 + expected_time + 0.5 * 80.0)).abs() < 1e-9);
}

#[tokio::test]
async fn decay_follows_the_clock() {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(MemoryStore::new());
    seed_post(store.as_ref(), &post("p1", clock.now(), 2)).await;

    let engine = RankingEngine::new(store.clone(), clock.clone(), config(10));
    clock.advance(Duration::hours(6));
    engine.run_once().await.unwrap();
    assert_eq!(stored_post(store.as_ref(), "p1").await.time_score, 75.0);

    clock.advance(Duration::hours(30));
    engine.run_once().await.unwrap();
    let p = stored_post(store.as_ref(), "p1").await;
    assert_eq!(p.time_score, 0.0);
    assert_eq!(p.rank, 2.0);
}

#[tokio::test]
async fn a_failed_write_does_not_stop_the_pass() {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(FlakyStore::new());
    for i in 0..5 {
        seed_post(store.as_ref(), &post(&format!("p{}", i), clock.now(), 0)).await;
    }
    store.fail_updates_of("p1");
    clock.advance(Duration::hours(12));

    let engine = RankingEngine::new(store.clone(), clock.clone(), config(2));
    let report = engine.run_once().await.unwrap();

    assert_eq!(report.scanned, 5);
    assert_eq!(report.updated, 4);
    assert_eq!(report.failed, 1);
    assert_eq!(stored_post(store.as_ref(), "p1").await.time_score, 100.0);
    assert_eq!(stored_post(store.as_ref(), "p4").await.time_score, 50.0);
}

#[tokio::test]
async fn cancelled_pass_resumes_where_it_stopped() {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(FlakyStore::new());
    for i in 0..5 {
        seed_post(store.as_ref(), &post(&format!("p{}", i), clock.now(), 0)).await;
    }
    clock.advance(Duration::hours(6));

    let engine = RankingEngine::new(store.clone(), clock.clone(), config(2));
    let cancel = CancellationToken::new();
    store.cancel_on_list(1, cancel.clone());

    let interrupted = engine.run(None, &cancel).await.unwrap();
    assert!(interrupted.interrupted);
    assert_eq!(interrupted.updated, 2);
    assert_eq!(
        interrupted.resume_from,
        Some(Cursor {
            phase: Phase::Recent,
            after: Some("p1".to_string()),
        })
    );
    assert_eq!(stored_post(store.as_ref(), "p2").await.time_score, 100.0);

    let resumed = engine
        .run(interrupted.resume_from, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!resumed.interrupted);
    assert_eq!(resumed.updated, 3);
    for i in 0..5 {
        assert_eq!(
            stored_post(store.as_ref(), &format!("p{}", i)).await.time_score,
            75.0
        );
    }
}

#[tokio::test]
async fn cancelled_before_starting_touches_nothing() {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(MemoryStore::new());
    seed_post(store.as_ref(), &post("p1", clock.now() - Duration::hours(2), 0)).await;

    let engine = RankingEngine::new(store.clone(), clock.clone(), config(10));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = engine.run(None, &cancel).await.unwrap();
    assert!(report.interrupted);
    assert_eq!(report.scanned, 0);
    assert_eq!(stored_post(store.as_ref(), "p1").await.time_score, 100.0);
}
