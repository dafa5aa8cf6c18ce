//! Domain model for the endpoint controller
//!
//! A [`ManagedEntity`] is a Service that opted in through annotations, a
//! [`DiscoveryRecord`] is the Endpoints object published for it.

mod annotations;
mod types;

pub use annotations::{
    is_enabled, parse_targets, ENABLE_ANNOTATION, ENABLE_VALUE, TARGETS_ANNOTATION,
};
pub use types::{DiscoveryRecord, ManagedEntity, PortSpec, RemovalOutcome, DEFAULT_PROTOCOL};
