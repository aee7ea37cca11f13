//! Vote ledger.
//!
//! Keeps at most one vote record per `(user, resource type, resource)` and
//! mirrors every record transition onto the resource's `countUp`,
//! `countDown` and `score` counters through three independent atomic
//! increments. The vote record is always written first; counter updates
//! that fail afterwards are logged and left for the reconciliation sweep.

use std::{collections::HashMap, sync::Arc};

use serde_json::{Value, json};

use crate::{
    auth::IdentityError,
    clock::Clock,
    error::{AppError, Result},
    models::{
        BatchVoteState, ResourceAggregate, ResourceRef, ResourceType, Vote, VoteDirection,
        VoteIntent, VoteOutcome, VoteResult, VoteState, new_id, validate_id,
    },
    store::{
        Bounds, Document, DocumentStore, Filter, ListQuery, NewDocument, StoreError, VOTES,
        list_all,
    },
};

/// Re-read/re-decide attempts before a lost race is surfaced as `Conflict`.
const MAX_ATTEMPTS: usize = 3;

/// Upper bound on ids per batched lookup.
const BATCH_CHUNK: usize = 100;

/// A decided state change of one vote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Created(VoteDirection),
    Removed(VoteDirection),
    Changed {
        from: VoteDirection,
        to: VoteDirection,
    },
}

impl Transition {
    /// Decides the transition for `requested` given the current record.
    pub fn decide(existing: Option<VoteDirection>, requested: VoteDirection) -> Self {
        match existing {
            None => Transition::Created(requested),
            Some(current) if current == requested => Transition::Removed(current),
            Some(current) => Transition::Changed {
                from: current,
                to: requested,
            },
        }
    }

    /// Deltas for `countUp` / `countDown`.
    pub fn counter_deltas(&self) -> Vec<(&'static str, i64)> {
        match self {
            Transition::Created(d) => vec![(d.counter_field(), 1)],
            Transition::Removed(d) => vec![(d.counter_field(), -1)],
            Transition::Changed { from, to } => {
                vec![(from.counter_field(), -1), (to.counter_field(), 1)]
            }
        }
    }

    pub fn score_delta(&self) -> i64 {
        match self {
            Transition::Created(d) => d.count(),
            Transition::Removed(d) => -d.count(),
            Transition::Changed { to, .. } => 2 * to.count(),
        }
    }

    pub fn outcome(&self) -> VoteOutcome {
        match self {
            Transition::Created(_) => VoteOutcome::Created,
            Transition::Removed(_) => VoteOutcome::Removed,
            Transition::Changed { .. } => VoteOutcome::Changed,
        }
    }

    pub fn final_direction(&self) -> Option<VoteDirection> {
        match self {
            Transition::Created(d) => Some(*d),
            Transition::Removed(_) => None,
            Transition::Changed { to, .. } => Some(*to),
        }
    }
}

enum WriteError {
    /// Another writer changed the record between our read and our write.
    Raced,
    Failed(AppError),
}

impl From<StoreError> for WriteError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } | StoreError::NotFound { .. } => WriteError::Raced,
            other => WriteError::Failed(other.into()),
        }
    }
}

pub struct VoteLedger {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl VoteLedger {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Applies a vote intent as a toggle: create, flip, or remove.
    ///
    /// Not idempotent: the same call twice in a row removes the vote again.
    pub async fn apply_vote(&self, caller: Option<&str>, intent: &VoteIntent) -> Result<VoteResult> {
        let user_id = caller.ok_or(IdentityError::MissingCredential)?;
        validate_id("user", user_id).map_err(|_| IdentityError::InvalidCredential)?;
        validate_id("resource", &intent.resource_id)?;

        let collection = intent.resource_type.collection();
        let resource = self
            .store
            .get(collection, &intent.resource_id)
            .await?
            .ok_or_else(|| {
                AppError::InvalidArgument(format!(
                    "{} {} does not exist",
                    intent.resource_type, intent.resource_id
                ))
            })?;
        let baseline = ResourceAggregate::from_document(&resource);

        for attempt in 1..=MAX_ATTEMPTS {
            let existing = self
                .find_vote(user_id, intent.resource_type, &intent.resource_id)
                .await?;
            let transition = Transition::decide(
                existing.as_ref().map(|v| v.direction),
                intent.direction,
            );

            match self.write_record(user_id, intent, existing, transition).await {
                Ok(()) => {
                    let score = self
                        .apply_counters(intent.resource_type, &intent.resource_id, transition)
                        .await
                        .unwrap_or(baseline.score + transition.score_delta());

                    tracing::debug!(
                        "Vote {:?} by {} on {} {} (score {})",
                        transition.outcome(),
                        user_id,
                        intent.resource_type,
                        intent.resource_id,
                        score
                    );

                    return Ok(VoteResult {
                        result: transition.outcome(),
                        direction: transition.final_direction(),
                        score,
                    });
                }
                Err(WriteError::Raced) => {
                    tracing::debug!(
                        "Vote record for {} on {} {} changed concurrently (attempt {})",
                        user_id,
                        intent.resource_type,
                        intent.resource_id,
                        attempt
                    );
                }
                Err(WriteError::Failed(e)) => return Err(e),
            }
        }

        Err(AppError::Conflict(format!(
            "Concurrent votes on {} {}, retry",
            intent.resource_type, intent.resource_id
        )))
    }

    /// Current direction of `caller` and the stored score of a resource.
    /// Anonymous callers always see no direction.
    pub async fn get_vote_state(
        &self,
        caller: Option<&str>,
        resource_id: &str,
        resource_type: ResourceType,
    ) -> Result<VoteState> {
        validate_id("resource", resource_id)?;

        let resource = self
            .store
            .get(resource_type.collection(), resource_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("{} {} not found", resource_type, resource_id))
            })?;

        let direction = match caller {
            Some(user_id) => self
                .find_vote(user_id, resource_type, resource_id)
                .await?
                .map(|v| v.direction),
            None => None,
        };

        Ok(VoteState {
            direction,
            score: ResourceAggregate::from_document(&resource).score,
        })
    }

    /// Vote state for many resources at once. Never fails: unknown ids,
    /// malformed ids and resource types whose lookups failed all come back as
    /// neutral entries.
    pub async fn get_vote_states_batch(
        &self,
        caller: Option<&str>,
        resources: &[ResourceRef],
    ) -> HashMap<String, BatchVoteState> {
        let mut post_ids = Vec::new();
        let mut comment_ids = Vec::new();
        for r in resources {
            if validate_id("resource", &r.resource_id).is_err() {
                continue;
            }
            let bucket = match r.resource_type {
                ResourceType::Post => &mut post_ids,
                ResourceType::Comment => &mut comment_ids,
            };
            if !bucket.contains(&r.resource_id) {
                bucket.push(r.resource_id.clone());
            }
        }

        let (mut states, comment_states) = futures::join!(
            self.batch_for_type(caller, ResourceType::Post, post_ids),
            self.batch_for_type(caller, ResourceType::Comment, comment_ids),
        );
        states.extend(comment_states);

        for r in resources {
            states.entry(r.resource_id.clone()).or_default();
        }
        states
    }

    /// Deletes every vote record on a resource. Counters are not touched.
    pub async fn purge_votes(&self, resource_type: ResourceType, resource_id: &str) -> Result<usize> {
        let query = ListQuery::new(BATCH_CHUNK)
            .filter(Filter::eq("resourceType", resource_type.as_str()))
            .filter(Filter::eq("resourceId", resource_id));
        let votes = list_all(self.store.as_ref(), VOTES, query).await?;

        let mut purged = 0;
        for (id, _) in votes {
            match self.store.delete(VOTES, &id).await {
                Ok(()) => purged += 1,
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(purged)
    }

    async fn find_vote(
        &self,
        user_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Option<Vote>> {
        let query = ListQuery::new(2)
            .filter(Filter::eq("userId", user_id))
            .filter(Filter::eq("resourceType", resource_type.as_str()))
            .filter(Filter::eq("resourceId", resource_id));

        let mut found = self.store.list(VOTES, &query).await?;
        if found.len() > 1 {
            tracing::warn!(
                "Duplicate vote records for {} on {} {}",
                user_id,
                resource_type,
                resource_id
            );
        }

        match found.drain(..).next() {
            Some((id, doc)) => Ok(Some(Vote::from_document(id, doc)?)),
            None => Ok(None),
        }
    }

    async fn write_record(
        &self,
        user_id: &str,
        intent: &VoteIntent,
        existing: Option<Vote>,
        transition: Transition,
    ) -> std::result::Result<(), WriteError> {
        let now = self.clock.now();

        match (transition, existing) {
            (Transition::Created(direction), _) => {
                let vote = Vote {
                    id: new_id(),
                    user_id: user_id.to_string(),
                    resource_id: intent.resource_id.clone(),
                    resource_type: intent.resource_type,
                    direction,
                    created_at: now,
                    updated_at: now,
                };
                let data = vote.to_document().map_err(WriteError::Failed)?;
                self.store
                    .create(
                        VOTES,
                        NewDocument {
                            id: vote.id,
                            data,
                            unique_key: Some(Vote::unique_key(
                                user_id,
                                intent.resource_type,
                                &intent.resource_id,
                            )),
                        },
                    )
                    .await?;
                Ok(())
            }
            (Transition::Removed(direction), Some(vote)) => {
                let guard = [Filter::eq("direction", direction.count())];
                if self.store.delete_where(VOTES, &vote.id, &guard).await? {
                    Ok(())
                } else {
                    Err(WriteError::Raced)
                }
            }
            (Transition::Changed { from, to }, Some(vote)) => {
                let guard = [Filter::eq("direction", from.count())];
                let mut patch = Document::new();
                patch.insert("direction".to_string(), json!(to.count()));
                patch.insert(
                    "updatedAt".to_string(),
                    Value::from(now.timestamp_millis()),
                );
                if self.store.update_where(VOTES, &vote.id, &guard, patch).await? {
                    Ok(())
                } else {
                    Err(WriteError::Raced)
                }
            }
            (_, None) => Err(WriteError::Failed(AppError::Internal(
                "Vote transition without an existing record".to_string(),
            ))),
        }
    }

    /// Three independent atomic increments. Returns the new score when its
    /// increment succeeded.
    async fn apply_counters(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        transition: Transition,
    ) -> Option<i64> {
        let collection = resource_type.collection();

        for (field, delta) in transition.counter_deltas() {
            if let Err(e) = self
                .store
                .increment(collection, resource_id, field, delta, Bounds::NON_NEGATIVE)
                .await
            {
                tracing::warn!(
                    "Failed to adjust {} by {} on {} {}: {}",
                    field,
                    delta,
                    resource_type,
                    resource_id,
                    e
                );
            }
        }

        match self
            .store
            .increment(
                collection,
                resource_id,
                "score",
                transition.score_delta(),
                Bounds::UNBOUNDED,
            )
            .await
        {
            Ok(score) => Some(score),
            Err(e) => {
                tracing::warn!(
                    "Failed to adjust score on {} {}: {}",
                    resource_type,
                    resource_id,
                    e
                );
                None
            }
        }
    }

    async fn batch_for_type(
        &self,
        caller: Option<&str>,
        resource_type: ResourceType,
        ids: Vec<String>,
    ) -> HashMap<String, BatchVoteState> {
        let mut states = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return states;
        }

        for chunk in ids.chunks(BATCH_CHUNK) {
            let aggregates = match self.store.get_many(resource_type.collection(), chunk).await {
                Ok(docs) => docs,
                Err(e) => {
                    tracing::warn!(
                        "Batch lookup of {} {}s failed, returning neutral entries: {}",
                        chunk.len(),
                        resource_type,
                        e
                    );
                    continue;
                }
            };

            let directions = match caller {
                Some(user_id) => self
                    .directions_for(user_id, resource_type, chunk)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(
                            "Batch vote lookup for {} on {}s failed: {}",
                            user_id,
                            resource_type,
                            e
                        );
                        HashMap::new()
                    }),
                None => HashMap::new(),
            };

            for (id, doc) in aggregates {
                let direction = directions.get(&id).copied();
                states.insert(
                    id,
                    BatchVoteState::from_aggregate(ResourceAggregate::from_document(&doc), direction),
                );
            }
        }

        states
    }

    async fn directions_for(
        &self,
        user_id: &str,
        resource_type: ResourceType,
        ids: &[String],
    ) -> Result<HashMap<String, VoteDirection>> {
        let query = ListQuery::new(BATCH_CHUNK)
            .filter(Filter::eq("userId", user_id))
            .filter(Filter::eq("resourceType", resource_type.as_str()))
            .filter(Filter::any_of("resourceId", ids.iter().cloned()));

        let votes = list_all(self.store.as_ref(), VOTES, query).await?;
        let mut directions = HashMap::with_capacity(votes.len());
        for (id, doc) in votes {
            let vote = Vote::from_document(id, doc)?;
            directions.insert(vote.resource_id, vote.direction);
        }
        Ok(directions)
    }
}
