//! Drift detection between desired state and the published Endpoints

use crate::model::{DiscoveryRecord, PortSpec};

/// A corrective write against an existing record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Replace the port list with the Service's ports
    ReplacePorts(Vec<PortSpec>),
    /// Replace the address set with the healthy targets
    ReplaceAddresses(Vec<String>),
}

impl Mutation {
    /// Apply to a record in place; `false` if the record refused it
    pub fn apply_to(&self, record: &mut DiscoveryRecord) -> bool {
        match self {
            Mutation::ReplacePorts(ports) => {
                record.replace_ports(ports.clone());
                true
            }
            Mutation::ReplaceAddresses(addresses) => record.replace_addresses(addresses.clone()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Mutation::ReplacePorts(ports) => format!(
                "ports set to [{}]",
                ports
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Mutation::ReplaceAddresses(addresses) => {
                format!("addresses set to [{}]", addresses.join(", "))
            }
        }
    }
}

/// Whether the record's ports differ from `desired`.
///
/// Comparison is positional: reordering the Service's ports counts as drift.
pub fn ports_drifted(desired: &[PortSpec], record: &DiscoveryRecord) -> bool {
    desired.len() != record.ports.len()
        || desired.iter().zip(&record.ports).any(|(want, have)| want != have)
}

/// Whether the record's addresses differ from the healthy set.
///
/// Order does not matter, only size and membership.
pub fn addresses_drifted(healthy: &[String], record: &DiscoveryRecord) -> bool {
    healthy.len() != record.addresses.len() || healthy.iter().any(|a| !record.has_address(a))
}

/// Port correction needed for `record`, if any
pub fn port_correction(desired: &[PortSpec], record: &DiscoveryRecord) -> Option<Mutation> {
    ports_drifted(desired, record).then(|| Mutation::ReplacePorts(desired.to_vec()))
}

/// Address correction needed for `record`, if any
pub fn address_correction(healthy: &[String], record: &DiscoveryRecord) -> Option<Mutation> {
    addresses_drifted(healthy, record).then(|| Mutation::ReplaceAddresses(healthy.to_vec()))
}
