//! Health evaluation for the targets behind a Service
//!
//! A target is healthy when:
//!
//! 1. every declared port accepts a TCP connection (probed in order, the first
//!    failure short-circuits the rest),
//! 2. its `/status` endpoint reports a parseable block height, and
//! 3. that height is less than `block_miss` blocks behind the tallest height
//!    observed among the targets that passed 1 and 2.
//!
//! Targets are probed concurrently. Staleness is only decided once every
//! probe has finished.
//!
//! # Health Report
//!
//! Returns [`HealthReport`] containing:
//! - `healthy` - targets that may be published, in input order
//! - `unhealthy` - every other input target with the reason it was dropped
//! - `highest_block` - tallest height seen among reachable targets

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::metrics;
use super::probe::TargetProber;
use crate::error::ProbeError;
use crate::model::PortSpec;

/// Why a target was left out of the healthy set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnhealthyReason {
    /// A port or status probe failed
    ProbeFailed { kind: &'static str, message: String },
    /// Reachable, but too far behind the tallest target
    Lagging { height: u64, highest: u64 },
}

impl std::fmt::Display for UnhealthyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnhealthyReason::ProbeFailed { message, .. } => write!(f, "{}", message),
            UnhealthyReason::Lagging { height, highest } => write!(
                f,
                "at block {}, {} behind highest {}",
                height,
                highest - height,
                highest
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhealthyTarget {
    pub address: String,
    pub reason: UnhealthyReason,
}

/// Result of evaluating a set of targets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: Vec<String>,
    pub unhealthy: Vec<UnhealthyTarget>,
    pub highest_block: Option<u64>,
}

impl HealthReport {
    pub fn unhealthy_addresses(&self) -> Vec<&str> {
        self.unhealthy.iter().map(|t| t.address.as_str()).collect()
    }

    pub fn is_healthy(&self, address: &str) -> bool {
        self.healthy.iter().any(|a| a == address)
    }

    pub fn summary(&self) -> String {
        if self.healthy.is_empty() && self.unhealthy.is_empty() {
            "No targets configured".to_string()
        } else if self.unhealthy.is_empty() {
            format!("All {} target(s) healthy", self.healthy.len())
        } else if self.healthy.is_empty() {
            format!("All {} target(s) unhealthy", self.unhealthy.len())
        } else {
            format!(
                "{} healthy, {} unhealthy target(s)",
                self.healthy.len(),
                self.unhealthy.len()
            )
        }
    }
}

/// Probe every port of one target, then its chain status
async fn probe_target(
    prober: &dyn TargetProber,
    address: &str,
    ports: &[PortSpec],
) -> Result<u64, ProbeError> {
    for port in ports {
        prober.probe_port(address, port.port).await?;
    }

    let status = prober.probe_chain_status(address).await?;
    Ok(status.latest_block_height)
}

/// Classify `addresses` as healthy or unhealthy
///
/// # Arguments
/// * `prober` - Probe implementation
/// * `addresses` - Candidate targets
/// * `ports` - Ports every target must accept connections on
/// * `block_miss` - Lag (in blocks) at which a target counts as stale; 0 behaves as 1
pub async fn evaluate(
    prober: &dyn TargetProber,
    addresses: &[String],
    ports: &[PortSpec],
    block_miss: u64,
) -> HealthReport {
    if addresses.is_empty() {
        debug!("No targets to check, skipping health evaluation");
        return HealthReport::default();
    }

    let threshold = block_miss.max(1);

    // Repeated addresses are probed and reported once
    let mut unique: Vec<&String> = Vec::with_capacity(addresses.len());
    for address in addresses {
        if !unique.contains(&address) {
            unique.push(address);
        }
    }

    let results = join_all(
        unique
            .iter()
            .map(|address| probe_target(prober, address, ports)),
    )
    .await;

    let mut reachable: Vec<(&String, u64)> = Vec::new();
    let mut unhealthy = Vec::new();

    for (address, result) in unique.iter().copied().zip(results) {
        match result {
            Ok(height) => reachable.push((address, height)),
            Err(e) => {
                warn!("Target {} is unhealthy: {}", address, e);
                metrics::inc_probe_failure(e.kind());
                unhealthy.push(UnhealthyTarget {
                    address: address.clone(),
                    reason: UnhealthyReason::ProbeFailed {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                });
            }
        }
    }

    let highest = reachable.iter().map(|(_, h)| *h).max();
    let mut healthy = Vec::new();

    if let Some(highest) = highest {
        for (address, height) in reachable {
            if highest - height >= threshold {
                info!(
                    "Target {} is falling behind: block {} vs highest {}",
                    address, height, highest
                );
                unhealthy.push(UnhealthyTarget {
                    address: address.clone(),
                    reason: UnhealthyReason::Lagging { height, highest },
                });
            } else {
                healthy.push(address.clone());
            }
        }
    }

    // Keep both partitions in input order
    unhealthy.sort_by_key(|t| unique.iter().position(|a| **a == t.address));

    let report = HealthReport {
        healthy,
        unhealthy,
        highest_block: highest,
    };

    debug!("Health evaluation complete: {}", report.summary());

    report
}
