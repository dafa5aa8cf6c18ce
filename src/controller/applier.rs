//! Writes corrections to the record store
//!
//! Updates are version-checked. A conflicting write is retried as-is with
//! capped exponential backoff; the record is not re-read between attempts.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::drift::Mutation;
use super::events::{reason, EventRecorder, EventType};
use super::store::RecordStore;
use crate::error::{Error, Result};
use crate::model::{DiscoveryRecord, ManagedEntity};

/// Backoff for conflicting writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total write attempts, the first one included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(10),
            factor: 5,
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-indexed)
    ///
    /// Exponential: initial * factor^attempt, capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.saturating_pow(attempt.min(16));
        self.initial_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }
}

/// Performs creates and version-checked updates, emitting an event for each
pub struct Applier {
    store: Arc<dyn RecordStore>,
    recorder: Arc<dyn EventRecorder>,
    retry: RetryPolicy,
}

impl Applier {
    pub fn new(
        store: Arc<dyn RecordStore>,
        recorder: Arc<dyn EventRecorder>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            recorder,
            retry,
        }
    }

    /// Create the record for `entity`
    pub async fn create(
        &self,
        entity: &ManagedEntity,
        record: &DiscoveryRecord,
    ) -> Result<DiscoveryRecord> {
        let created = self.store.create_record(record).await?;

        info!("Created endpoints for service {}", entity.key());
        self.recorder
            .emit(
                entity,
                EventType::Normal,
                reason::CREATED_ENDPOINTS,
                &format!(
                    "Created endpoints with {} address(es): {}",
                    created.addresses.len(),
                    created.addresses.join(", ")
                ),
            )
            .await;

        Ok(created)
    }

    /// Apply `mutation` to `record` and write it back.
    ///
    /// Returns the stored record, whose resource version must be used for any
    /// further write in the same pass. A mutation the record refuses is not
    /// written and `record` is returned unchanged.
    pub async fn patch(
        &self,
        entity: &ManagedEntity,
        record: &DiscoveryRecord,
        mutation: &Mutation,
    ) -> Result<DiscoveryRecord> {
        let mut desired = record.clone();
        if !mutation.apply_to(&mut desired) {
            return Ok(record.clone());
        }

        let attempts = self.retry.max_attempts.max(1);

        for attempt in 0..attempts {
            match self.store.update_record(&desired).await {
                Ok(updated) => {
                    info!("Updated endpoints {}: {}", record.key(), mutation.describe());
                    self.recorder
                        .emit(
                            entity,
                            EventType::Normal,
                            reason::UPDATED_ENDPOINTS,
                            &format!("Endpoints {}", mutation.describe()),
                        )
                        .await;
                    return Ok(updated);
                }
                Err(e) if e.is_conflict() => {
                    if attempt + 1 < attempts {
                        let delay = self.retry.delay_for(attempt);
                        warn!(
                            "Conflict updating endpoints {} (attempt {}/{}), retrying in {:?}",
                            record.key(),
                            attempt + 1,
                            attempts,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::ConflictExhausted {
            name: record.name.clone(),
            namespace: record.namespace.clone(),
            attempts,
        })
    }
}
