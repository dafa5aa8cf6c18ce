use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Error, Result};
use crate::model::{DiscoveryRecord, ManagedEntity};

use super::applier::{Applier, RetryPolicy};
use super::drift;
use super::events::{reason, EventRecorder, EventType};
use super::health;
use super::metrics;
use super::probe::TargetProber;
use super::store::RecordStore;

/// How a single reconciliation pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No record existed; one was created from the unfiltered targets
    Created,
    /// Record already matched desired state
    InSync,
    /// One or two corrective writes were made
    Patched { ports: bool, addresses: bool },
    /// Every target failed; addresses were left as they were
    NoHealthyTargets { ports: bool },
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Created => "created",
            ReconcileOutcome::InSync => "in_sync",
            ReconcileOutcome::Patched { .. } => "patched",
            ReconcileOutcome::NoHealthyTargets { .. } => "no_healthy_targets",
        }
    }
}

/// Totals of one sweep over every managed Service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub entities: usize,
    pub created: usize,
    pub in_sync: usize,
    pub patched: usize,
    pub no_healthy_targets: usize,
    pub failed: usize,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SweepSummary {
    fn record(&mut self, result: &Result<ReconcileOutcome>) {
        match result {
            Ok(ReconcileOutcome::Created) => self.created += 1,
            Ok(ReconcileOutcome::InSync) => self.in_sync += 1,
            Ok(ReconcileOutcome::Patched { .. }) => self.patched += 1,
            Ok(ReconcileOutcome::NoHealthyTargets { .. }) => self.no_healthy_targets += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Shared state for the controller
pub struct ControllerState {
    pub store: Arc<dyn RecordStore>,
    pub recorder: Arc<dyn EventRecorder>,
    pub prober: Arc<dyn TargetProber>,
    pub applier: Applier,
    /// Blocks a target may trail the tallest one
    pub block_miss: u64,
    pub last_sweep: RwLock<Option<SweepSummary>>,
    /// `(namespace, name)` of every Service seen by the last sweep
    managed: Mutex<BTreeSet<(String, String)>>,
}

impl ControllerState {
    pub fn new(
        store: Arc<dyn RecordStore>,
        recorder: Arc<dyn EventRecorder>,
        prober: Arc<dyn TargetProber>,
        block_miss: u64,
    ) -> Self {
        Self::with_retry(store, recorder, prober, block_miss, RetryPolicy::default())
    }

    pub fn with_retry(
        store: Arc<dyn RecordStore>,
        recorder: Arc<dyn EventRecorder>,
        prober: Arc<dyn TargetProber>,
        block_miss: u64,
        retry: RetryPolicy,
    ) -> Self {
        let applier = Applier::new(store.clone(), recorder.clone(), retry);
        Self {
            store,
            recorder,
            prober,
            applier,
            block_miss,
            last_sweep: RwLock::new(None),
            managed: Mutex::new(BTreeSet::new()),
        }
    }
}

/// Main entry point to start the controller
///
/// Runs a full sweep every `resync` and reconciles single Services as they
/// arrive on `triggers`, one at a time, until `shutdown` is cancelled.
pub async fn run_controller(
    state: Arc<ControllerState>,
    resync: Duration,
    triggers: Option<BoxStream<'static, ManagedEntity>>,
    shutdown: CancellationToken,
) -> Result<()> {
    info!("Starting endpoint controller, syncing every {:?}", resync);

    let mut ticker = tokio::time::interval(resync);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut triggers = triggers.unwrap_or_else(|| stream::pending::<ManagedEntity>().boxed());

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Shutting down endpoint controller");
                break;
            }
            _ = ticker.tick() => {
                info!("Resyncing endpoints");
                match sweep(&state).await {
                    Ok(summary) => info!(
                        "Finished syncing endpoints: {} service(s), {} created, {} patched, {} failed",
                        summary.entities, summary.created, summary.patched, summary.failed
                    ),
                    Err(e) => error!("Endpoint resync failed: {}", e),
                }
            }
            Some(entity) = triggers.next() => {
                debug!("Service {} changed, reconciling", entity.key());
                if let Ok(outcome) = reconcile(&state, &entity).await {
                    debug!("Triggered reconcile of {} ended {}", entity.key(), outcome.as_str());
                }
            }
        }
    }

    Ok(())
}

/// Reconcile every managed Service once, sequentially.
///
/// A failing Service is logged and counted; it never stops the sweep. Only
/// a failure to list Services is returned. Services that dropped out since
/// the previous sweep stop exporting target metrics.
pub async fn sweep(state: &ControllerState) -> Result<SweepSummary> {
    let entities = state.store.list_managed_entities().await?;

    let current: BTreeSet<(String, String)> = entities
        .iter()
        .map(|e| (e.namespace.clone(), e.name.clone()))
        .collect();
    {
        let mut managed = state.managed.lock().await;
        for (namespace, name) in managed.difference(&current) {
            info!("Service {}/{} is no longer managed", namespace, name);
            metrics::remove_service(namespace, name);
        }
        *managed = current;
    }

    let mut summary = SweepSummary {
        entities: entities.len(),
        ..Default::default()
    };

    for entity in &entities {
        let result = reconcile(state, entity).await;
        summary.record(&result);
    }

    summary.finished_at = Some(Utc::now());
    *state.last_sweep.write().await = Some(summary.clone());

    Ok(summary)
}

/// Reconcile one Service, logging and reporting the outcome
pub async fn reconcile(state: &ControllerState, entity: &ManagedEntity) -> Result<ReconcileOutcome> {
    let result = reconcile_entity(state, entity).await;

    match &result {
        Ok(outcome) => {
            debug!("Reconciled {}: {:?}", entity.key(), outcome);
            metrics::inc_reconciliation(outcome.as_str());
        }
        Err(e) => {
            if e.is_retriable() {
                warn!("Reconciliation of {} failed, retrying next sync: {}", entity.key(), e);
            } else {
                error!("Reconciliation error for {}: {}", entity.key(), e);
            }
            metrics::inc_reconciliation("error");

            let event_reason = match e {
                Error::ConfigError(_) => reason::INVALID_TARGETS,
                _ => reason::RECONCILE_FAILED,
            };
            state
                .recorder
                .emit(entity, EventType::Warning, event_reason, &e.status_message())
                .await;
        }
    }

    result
}

/// The reconciliation pass for one Service
///
/// 1. Fetch the Endpoints; create them from the Service when missing
/// 2. Bring the ports in line with the Service
/// 3. Probe the targets on the record's ports
/// 4. Publish exactly the healthy targets
#[instrument(skip(state, entity), fields(name = %entity.name, namespace = %entity.namespace))]
pub async fn reconcile_entity(
    state: &ControllerState,
    entity: &ManagedEntity,
) -> Result<ReconcileOutcome> {
    let namespace = &entity.namespace;
    let name = &entity.name;

    // 1. Fetch or create
    let mut record = match state.store.get_record(namespace, name).await? {
        Some(record) => record,
        None => {
            info!("No endpoints for service {}/{}, creating", namespace, name);
            let record = DiscoveryRecord::for_entity(entity)?;
            state.applier.create(entity, &record).await?;
            return Ok(ReconcileOutcome::Created);
        }
    };

    // 2. Ports
    let mut ports_patched = false;
    if let Some(fix) = drift::port_correction(&entity.ports, &record) {
        info!("Ports of endpoints {}/{} drifted from service", namespace, name);
        record = state.applier.patch(entity, &record, &fix).await?;
        ports_patched = true;
    }

    // 3. Health, probed on the ports now published
    let targets = entity.target_addresses()?;
    let report =
        health::evaluate(state.prober.as_ref(), &targets, &record.ports, state.block_miss).await;

    metrics::set_target_health(
        namespace,
        name,
        report.healthy.len(),
        report.unhealthy.len(),
        report.highest_block,
    );

    for target in &report.unhealthy {
        debug!("Excluding target {} from {}/{}: {}", target.address, namespace, name, target.reason);
    }

    // 4. Addresses
    if report.healthy.is_empty() {
        warn!(
            "No healthy targets for {}/{}, keeping current addresses [{}]",
            namespace,
            name,
            record.addresses.join(", ")
        );
        state
            .recorder
            .emit(
                entity,
                EventType::Warning,
                reason::NO_HEALTHY_TARGETS,
                &format!(
                    "All {} target(s) failed health checks, endpoints left unchanged",
                    report.unhealthy.len()
                ),
            )
            .await;
        return Ok(ReconcileOutcome::NoHealthyTargets {
            ports: ports_patched,
        });
    }

    let mut addresses_patched = false;
    if let Some(fix) = drift::address_correction(&report.healthy, &record) {
        info!(
            "Endpoints {}/{} out of date: {}",
            namespace,
            name,
            report.summary()
        );
        state.applier.patch(entity, &record, &fix).await?;
        addresses_patched = true;
    }

    if ports_patched || addresses_patched {
        Ok(ReconcileOutcome::Patched {
            ports: ports_patched,
            addresses: addresses_patched,
        })
    } else {
        Ok(ReconcileOutcome::InSync)
    }
}
