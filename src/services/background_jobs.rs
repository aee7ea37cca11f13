use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::{
    error::Result,
    services::{
        ranking_service::{Cursor, RankingEngine},
        reconcile_service::Reconciler,
    },
};

#[derive(Clone)]
pub struct BackgroundJobsService {
    ranking: Arc<RankingEngine>,
    reconciler: Arc<Reconciler>,
    reconcile_interval: Duration,
    shutdown: CancellationToken,
}

impl BackgroundJobsService {
    pub fn new(
        ranking: Arc<RankingEngine>,
        reconciler: Arc<Reconciler>,
        reconcile_interval_secs: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ranking,
            reconciler,
            reconcile_interval: Duration::from_secs(reconcile_interval_secs.max(1)),
            shutdown,
        }
    }

    /// Start all background jobs. Each loop exits once the shutdown token fires.
    pub async fn start_all_jobs(&self) {
        let jobs_service = self.clone();
        let ranking_interval = Duration::from_secs(self.ranking.config().interval_secs.max(1));

        // Recompute time scores and ranks
        tokio::spawn(async move {
            let mut interval = interval(ranking_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut resume_from = None;
            loop {
                tokio::select! {
                    _ = jobs_service.shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match jobs_service.update_ranks(resume_from.take()).await {
                    Ok(next) => resume_from = next,
                    Err(e) => tracing::error!("Failed to update ranks: {}", e),
                }
            }
            tracing::debug!("Ranking job stopped");
        });

        let jobs_service = self.clone();

        // Repair counter drift left behind by failed increments
        tokio::spawn(async move {
            let mut interval = interval(jobs_service.reconcile_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so startup stays quiet.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = jobs_service.shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if let Err(e) = jobs_service.reconcile_counters().await {
                    tracing::error!("Failed to reconcile vote counters: {}", e);
                }
            }
            tracing::debug!("Reconciliation job stopped");
        });

        tracing::info!("Background jobs started successfully");
    }

    /// One ranking pass. Returns the cursor to resume from when shutdown
    /// interrupted the pass.
    async fn update_ranks(&self, from: Option<Cursor>) -> Result<Option<Cursor>> {
        let report = self.ranking.run(from, &self.shutdown).await?;
        if report.failed > 0 {
            tracing::warn!(
                "Ranking pass left {} of {} posts unchanged",
                report.failed,
                report.scanned
            );
        }
        tracing::debug!("Ranks updated for {} posts", report.updated);
        Ok(report.resume_from)
    }

    async fn reconcile_counters(&self) -> Result<()> {
        let report = self.reconciler.run(&self.shutdown).await?;
        if report.failed > 0 {
            tracing::warn!("Failed to repair {} resources", report.failed);
        }
        Ok(())
    }
}
