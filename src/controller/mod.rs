//! Controller module for Endpoints reconciliation
//!
//! This module contains the controller loop, target health evaluation,
//! drift detection and the write path to the record store.

mod applier;
pub mod drift;
pub mod events;
mod health;
pub mod metrics;
mod probe;
mod reconciler;
mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use applier::{Applier, RetryPolicy};
pub use drift::{addresses_drifted, ports_drifted, Mutation};
pub use events::{EventRecorder, EventType, KubeEventRecorder};
pub use health::{evaluate, HealthReport, UnhealthyReason, UnhealthyTarget};
pub use probe::{parse_block_height, ChainStatus, NetProber, TargetProber};
pub use reconciler::{
    reconcile, reconcile_entity, run_controller, sweep, ControllerState, ReconcileOutcome,
    SweepSummary,
};
pub use store::{watch_managed_entities, KubeStore, RecordStore, FIELD_MANAGER};
