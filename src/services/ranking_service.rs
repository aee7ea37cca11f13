//! Ranking engine.
//!
//! Recomputes `timeScore` and `rank` for every post that is still decaying
//! or still listed on the front page. The computation is a pure function of the post's current aggregates and
//! the clock, so re-running a pass (or resuming an interrupted one) never
//! accumulates drift.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    config::RankingConfig,
    error::Result,
    models::{INITIAL_TIME_SCORE, QualitySignals},
    store::{Document, DocumentStore, Filter, ListQuery, POSTS, float_field, int_field},
};

/// Linear decay from 100 at creation to `floor` at `horizon`.
pub fn time_score(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &RankingConfig,
) -> f64 {
    let horizon_ms = config.horizon.num_milliseconds().max(1) as f64;
    // Posts stamped in the future (clock skew) count as brand new.
    let age_ms = (now - created_at).num_milliseconds().max(0) as f64;
    let remaining = (1.0 - age_ms / horizon_ms).max(0.0);
    (INITIAL_TIME_SCORE * remaining).max(config.floor)
}

/// Mean of the present signals on a 0..=100 scale, spam inverted. `None`
/// when the post carries no signals at all.
pub fn quality_factor(signals: &QualitySignals) -> Option<f64> {
    let values: Vec<f64> = [
        signals.quality_score,
        signals.spelling_score,
        signals.safety_score,
        signals.spam_score.map(|spam| 100.0 - spam.clamp(0.0, 100.0)),
    ]
    .into_iter()
    .flatten()
    .filter(|v| v.is_finite())
    .map(|v| v.clamp(0.0, 100.0))
    .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn rank(score: i64, time_score: f64, quality: Option<f64>, config: &RankingConfig) -> f64 {
    config.vote_weight * score as f64
        + config.time_weight * time_score
        + quality.map_or(0.0, |q| config.quality_weight * q)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedValues {
    pub time_score: f64,
    pub rank: f64,
}

/// Computes the new values from a stored post document. Fields the
/// enhancement pipeline never filled in are simply skipped.
pub fn rank_document(doc: &Document, now: DateTime<Utc>, config: &RankingConfig) -> RankedValues {
    let created_at = DateTime::<Utc>::from_timestamp_millis(int_field(doc, "createdAt"))
        .unwrap_or(now);
    let signals = QualitySignals {
        spelling_score: float_field(doc, "spellingScore"),
        spam_score: float_field(doc, "spamScore"),
        safety_score: float_field(doc, "safetyScore"),
        quality_score: float_field(doc, "qualityScore"),
    };

    let time_score = time_score(created_at, now, config);
    RankedValues {
        time_score,
        rank: rank(
            int_field(doc, "score"),
            time_score,
            quality_factor(&signals),
            config,
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Posts inside the decay horizon.
    Recent,
    /// Posts past the horizon but still inside the listing window. Their time
    /// score sits at the floor; their rank still follows the votes.
    Settled,
    /// Older posts whose stored time score has not reached the floor.
    Stragglers,
}

/// Where an interrupted pass stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub phase: Phase,
    pub after: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankingReport {
    pub scanned: usize,
    pub updated: usize,
    pub failed: usize,
    pub pages: usize,
    pub interrupted: bool,
    pub resume_from: Option<Cursor>,
}

pub struct RankingEngine {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: RankingConfig,
}

impl RankingEngine {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: RankingConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// One full pass over every active post.
    pub async fn run_once(&self) -> Result<RankingReport> {
        self.run(None, &CancellationToken::new()).await
    }

    /// Runs a pass starting at `from`, stopping between pages once `cancel`
    /// fires. An interrupted report carries the cursor to resume from.
    pub async fn run(
        &self,
        from: Option<Cursor>,
        cancel: &CancellationToken,
    ) -> Result<RankingReport> {
        let now = self.clock.now();
        let cutoff = (now - self.config.horizon).timestamp_millis();
        let window_start =
            (now - self.config.listing_window.max(self.config.horizon)).timestamp_millis();
        let mut report = RankingReport::default();

        let mut cursor = from.unwrap_or(Cursor {
            phase: Phase::Recent,
            after: None,
        });

        loop {
            if cancel.is_cancelled() {
                tracing::info!(
                    "Ranking pass interrupted after {} pages ({} posts updated)",
                    report.pages,
                    report.updated
                );
                report.interrupted = true;
                report.resume_from = Some(cursor);
                return Ok(report);
            }

            let query = self
                .phase_query(cursor.phase, cutoff, window_start)
                .after(cursor.after.clone());
            let page = self.store.list(POSTS, &query).await?;
            let exhausted = page.len() < query.limit;
            let last_id = page.last().map(|(id, _)| id.clone());

            if !page.is_empty() {
                report.pages += 1;
                report.scanned += page.len();
                self.write_page(page, now, &mut report).await;
            }

            match (exhausted || last_id.is_none(), cursor.phase) {
                (false, _) => cursor.after = last_id,
                (true, Phase::Recent) => {
                    cursor = Cursor {
                        phase: Phase::Settled,
                        after: None,
                    }
                }
                (true, Phase::Settled) => {
                    cursor = Cursor {
                        phase: Phase::Stragglers,
                        after: None,
                    }
                }
                (true, Phase::Stragglers) => break,
            }
        }

        tracing::debug!(
            "Ranking pass done: {} scanned, {} updated, {} failed",
            report.scanned,
            report.updated,
            report.failed
        );
        Ok(report)
    }

    fn phase_query(&self, phase: Phase, cutoff: i64, window_start: i64) -> ListQuery {
        let query = ListQuery::new(self.config.page_size.max(1));
        match phase {
            Phase::Recent => query.filter(Filter::gte("createdAt", cutoff)),
            Phase::Settled => query
                .filter(Filter::lt("createdAt", cutoff))
                .filter(Filter::gte("createdAt", window_start)),
            Phase::Stragglers => query
                .filter(Filter::lt("createdAt", window_start))
                .filter(Filter::gt("timeScore", self.config.floor)),
        }
    }

    async fn write_page(
        &self,
        page: Vec<(String, Document)>,
        now: DateTime<Utc>,
        report: &mut RankingReport,
    ) {
        let patches: Vec<(String, Document)> = page
            .into_iter()
            .map(|(id, doc)| {
                let values = rank_document(&doc, now, &self.config);
                let mut patch = Document::new();
                patch.insert("timeScore".to_string(), Value::from(values.time_score));
                patch.insert("rank".to_string(), Value::from(values.rank));
                (id, patch)
            })
            .collect();
        let attempted = patches.len();

        match self.store.update_many(POSTS, patches).await {
            Ok(outcomes) => {
                for (id, outcome) in outcomes {
                    match outcome {
                        Ok(()) => report.updated += 1,
                        Err(e) => {
                            report.failed += 1;
                            tracing::warn!("Failed to write rank for post {}: {}", id, e);
                        }
                    }
                }
            }
            Err(e) => {
                report.failed += attempted;
                tracing::warn!("Bulk rank write of {} posts failed: {}", attempted, e);
            }
        }
    }
}
