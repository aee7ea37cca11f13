use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    error::Result,
    models::{ResourceAggregate, ResourceType, Vote, VoteDirection},
    store::{Document, DocumentStore, Filter, ListQuery, StoreError, VOTES, list_all},
};

const COUNTERS: [&str; 3] = ["countUp", "countDown", "score"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub repaired: usize,
    /// Drifted resources whose counters moved before the repair landed.
    pub contended: usize,
    pub failed: usize,
    pub interrupted: bool,
}

/// Recounts aggregates from vote records and repairs counters that drifted
/// because a counter increment failed after its vote record was written.
///
/// Repairs are compare-and-set on the counters as they were read, so a vote
/// whose increments land mid-sweep is never overwritten; that resource is
/// left for the next sweep instead.
pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    page_size: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DocumentStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for resource_type in [ResourceType::Post, ResourceType::Comment] {
            self.sweep(resource_type, cancel, &mut report).await?;
            if report.interrupted {
                break;
            }
        }

        if report.repaired > 0 {
            tracing::info!(
                "Reconciliation repaired {} of {} resources",
                report.repaired,
                report.scanned
            );
        }
        Ok(report)
    }

    async fn sweep(
        &self,
        resource_type: ResourceType,
        cancel: &CancellationToken,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let collection = resource_type.collection();
        let mut after = None;

        loop {
            if cancel.is_cancelled() {
                report.interrupted = true;
                return Ok(());
            }

            let query = ListQuery::new(self.page_size).after(after.clone());
            let page = self.store.list(collection, &query).await?;
            let exhausted = page.len() < self.page_size;
            after = page.last().map(|(id, _)| id.clone());

            let ids: Vec<String> = page.iter().map(|(id, _)| id.clone()).collect();
            let recounted = self.recount(resource_type, &ids).await?;

            for (id, doc) in page {
                report.scanned += 1;
                let stored = ResourceAggregate::from_document(&doc);
                let expected = recounted.get(&id).copied().unwrap_or_default();
                if stored == expected {
                    continue;
                }

                tracing::warn!(
                    "Counter drift on {} {}: stored {:?}, recounted {:?}",
                    resource_type,
                    id,
                    stored,
                    expected
                );

                let guards: Vec<Filter> = COUNTERS
                    .iter()
                    .map(|field| Filter::unchanged(&doc, field))
                    .collect();
                let mut patch = Document::new();
                patch.insert("countUp".to_string(), Value::from(expected.count_up));
                patch.insert("countDown".to_string(), Value::from(expected.count_down));
                patch.insert("score".to_string(), Value::from(expected.score));

                match self.store.update_where(collection, &id, &guards, patch).await {
                    Ok(true) => report.repaired += 1,
                    Ok(false) | Err(StoreError::NotFound { .. }) => {
                        report.contended += 1;
                        tracing::debug!(
                            "{} {} changed during reconciliation, retrying next sweep",
                            resource_type,
                            id
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!("Failed to repair {} {}: {}", resource_type, id, e);
                    }
                }
            }

            if exhausted || after.is_none() {
                return Ok(());
            }
        }
    }

    async fn recount(
        &self,
        resource_type: ResourceType,
        ids: &[String],
    ) -> Result<HashMap<String, ResourceAggregate>> {
        let mut counts: HashMap<String, ResourceAggregate> = HashMap::new();
        if ids.is_empty() {
            return Ok(counts);
        }

        let query = ListQuery::new(self.page_size)
            .filter(Filter::eq("resourceType", resource_type.as_str()))
            .filter(Filter::any_of("resourceId", ids.iter().cloned()));

        for (id, doc) in list_all(self.store.as_ref(), VOTES, query).await? {
            let vote = Vote::from_document(id, doc)?;
            let entry = counts.entry(vote.resource_id).or_default();
            match vote.direction {
                VoteDirection::Up => entry.count_up += 1,
                VoteDirection::Down => entry.count_down += 1,
            }
            entry.score += vote.direction.count();
        }
        Ok(counts)
    }
}
