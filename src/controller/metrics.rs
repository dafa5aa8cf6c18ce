//! Prometheus metrics for the endpoint controller

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicI64;

/// Labels identifying a managed Service
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceLabels {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResultLabels {
    pub result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProbeLabels {
    pub kind: String,
}

/// Reconciliations by outcome
pub static RECONCILIATIONS: Lazy<Family<ResultLabels, Counter>> = Lazy::new(Family::default);

/// Targets currently considered healthy per Service
pub static HEALTHY_TARGETS: Lazy<Family<ServiceLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Targets currently considered unhealthy per Service
pub static UNHEALTHY_TARGETS: Lazy<Family<ServiceLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Tallest block height seen among a Service's targets
pub static HIGHEST_BLOCK: Lazy<Family<ServiceLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Failed probes by failure kind
pub static PROBE_FAILURES: Lazy<Family<ProbeLabels, Counter>> = Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();
    registry.register(
        "endpoint_controller_reconciliations",
        "Reconciliation passes by result",
        RECONCILIATIONS.clone(),
    );
    registry.register(
        "endpoint_controller_healthy_targets",
        "Number of healthy targets published for the service",
        HEALTHY_TARGETS.clone(),
    );
    registry.register(
        "endpoint_controller_unhealthy_targets",
        "Number of targets left out of the service endpoints",
        UNHEALTHY_TARGETS.clone(),
    );
    registry.register(
        "endpoint_controller_highest_block",
        "Highest block height observed among the service targets",
        HIGHEST_BLOCK.clone(),
    );
    registry.register(
        "endpoint_controller_probe_failures",
        "Failed target probes by kind",
        PROBE_FAILURES.clone(),
    );
    registry
});

fn service_labels(namespace: &str, name: &str) -> ServiceLabels {
    ServiceLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

pub fn inc_reconciliation(result: &str) {
    RECONCILIATIONS
        .get_or_create(&ResultLabels {
            result: result.to_string(),
        })
        .inc();
}

pub fn inc_probe_failure(kind: &str) {
    PROBE_FAILURES
        .get_or_create(&ProbeLabels {
            kind: kind.to_string(),
        })
        .inc();
}

/// Update the target gauges of a Service after an evaluation
pub fn set_target_health(
    namespace: &str,
    name: &str,
    healthy: usize,
    unhealthy: usize,
    highest_block: Option<u64>,
) {
    let labels = service_labels(namespace, name);
    HEALTHY_TARGETS.get_or_create(&labels).set(healthy as i64);
    UNHEALTHY_TARGETS.get_or_create(&labels).set(unhealthy as i64);
    if let Some(height) = highest_block {
        HIGHEST_BLOCK.get_or_create(&labels).set(height as i64);
    }
}

/// Drop the target gauges of a Service that is no longer managed
pub fn remove_service(namespace: &str, name: &str) {
    let labels = service_labels(namespace, name);
    HEALTHY_TARGETS.remove(&labels);
    UNHEALTHY_TARGETS.remove(&labels);
    HIGHEST_BLOCK.remove(&labels);
}
