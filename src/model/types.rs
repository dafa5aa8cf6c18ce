//! Types shared by the drift detector, health evaluator and reconciler
//!
//! These are thin, comparable projections of the Kubernetes `Service` and
//! `Endpoints` objects. Only the fields the controller reasons about are kept;
//! conversions back to the API types live here as well.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Service, ServicePort,
};
use kube::ResourceExt;
use tracing::{info, warn};

use super::annotations::{
    is_enabled, parse_targets, ENABLE_ANNOTATION, ENABLE_VALUE, TARGETS_ANNOTATION,
};
use crate::error::Result;

/// Protocol assumed when a port does not declare one
pub const DEFAULT_PROTOCOL: &str = "TCP";

/// One `(name, protocol, number)` port tuple
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PortSpec {
    pub name: Option<String>,
    pub protocol: String,
    pub port: i32,
}

impl PortSpec {
    pub fn new(name: Option<&str>, protocol: Option<&str>, port: i32) -> Self {
        Self {
            name: name.filter(|n| !n.is_empty()).map(String::from),
            protocol: protocol
                .filter(|p| !p.is_empty())
                .unwrap_or(DEFAULT_PROTOCOL)
                .to_string(),
            port,
        }
    }
}

impl From<&ServicePort> for PortSpec {
    fn from(p: &ServicePort) -> Self {
        PortSpec::new(p.name.as_deref(), p.protocol.as_deref(), p.port)
    }
}

impl From<&EndpointPort> for PortSpec {
    fn from(p: &EndpointPort) -> Self {
        PortSpec::new(p.name.as_deref(), p.protocol.as_deref(), p.port)
    }
}

impl From<&PortSpec> for EndpointPort {
    fn from(p: &PortSpec) -> Self {
        EndpointPort {
            name: p.name.clone(),
            protocol: Some(p.protocol.clone()),
            port: p.port,
            ..Default::default()
        }
    }
}

impl std::fmt::Display for PortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}/{}/{}", name, self.protocol, self.port),
            None => write!(f, "{}/{}", self.protocol, self.port),
        }
    }
}

/// A Service that may be managed by the controller
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedEntity {
    pub name: String,
    pub namespace: String,
    pub uid: Option<String>,
    /// Value of the enable annotation
    pub enabled: bool,
    /// Raw targets annotation, parsed on demand
    pub raw_targets: Option<String>,
    /// Ports in the Service's declaration order
    pub ports: Vec<PortSpec>,
}

impl ManagedEntity {
    /// Parsed, trimmed target addresses
    pub fn target_addresses(&self) -> Result<Vec<String>> {
        parse_targets(&self.name, self.raw_targets.as_deref())
    }

    /// `namespace/name`, used in logs
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl From<&Service> for ManagedEntity {
    fn from(service: &Service) -> Self {
        let annotations = service.metadata.annotations.as_ref();
        let ports = service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .map(|ports| ports.iter().map(PortSpec::from).collect())
            .unwrap_or_default();

        Self {
            name: service.name_any(),
            namespace: service.namespace().unwrap_or_else(|| "default".to_string()),
            uid: service.metadata.uid.clone(),
            enabled: is_enabled(annotations),
            raw_targets: annotations.and_then(|a| a.get(TARGETS_ANNOTATION)).cloned(),
            ports,
        }
    }
}

/// Result of [`DiscoveryRecord::remove_address`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    Removed,
    NotPresent,
    /// The address was the only one left and was kept
    RefusedLastAddress,
}

/// The published Endpoints for one ManagedEntity.
///
/// The controller owns the ports and ready addresses of the first subset.
/// Everything else on a stored object is kept in `source` and written back
/// untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiscoveryRecord {
    pub name: String,
    pub namespace: String,
    /// Optimistic concurrency token; `None` for records not yet stored
    pub resource_version: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub ports: Vec<PortSpec>,
    pub addresses: Vec<String>,
    /// Object this record was read from; `None` for records not yet stored
    pub source: Option<Endpoints>,
}

impl DiscoveryRecord {
    /// Build a fresh record for an entity from its ports and unfiltered targets
    pub fn for_entity(entity: &ManagedEntity) -> Result<Self> {
        let addresses = entity.target_addresses()?;

        let mut annotations = BTreeMap::new();
        annotations.insert(ENABLE_ANNOTATION.to_string(), ENABLE_VALUE.to_string());

        Ok(Self {
            name: entity.name.clone(),
            namespace: entity.namespace.clone(),
            resource_version: None,
            labels: BTreeMap::new(),
            annotations,
            ports: entity.ports.clone(),
            addresses,
            source: None,
        })
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn has_address(&self, address: &str) -> bool {
        self.addresses.iter().any(|a| a == address)
    }

    pub fn replace_ports(&mut self, ports: Vec<PortSpec>) {
        self.ports = ports;
    }

    /// Replace the whole address set.
    ///
    /// An empty set is refused and leaves the record untouched; returns
    /// whether the replacement happened.
    pub fn replace_addresses(&mut self, addresses: Vec<String>) -> bool {
        if addresses.is_empty() {
            warn!("Refusing to clear every address from endpoints {}", self.key());
            return false;
        }
        self.addresses = addresses;
        true
    }

    /// Remove a single address, never the last one
    pub fn remove_address(&mut self, address: &str) -> RemovalOutcome {
        if !self.has_address(address) {
            return RemovalOutcome::NotPresent;
        }

        if self.addresses.len() < 2 {
            warn!(
                "Cannot remove the last address {} from endpoints {}",
                address,
                self.key()
            );
            return RemovalOutcome::RefusedLastAddress;
        }

        self.addresses.retain(|a| a != address);
        info!("Removed target {} from endpoints {}", address, self.key());
        RemovalOutcome::Removed
    }

    /// Convert into the Kubernetes `Endpoints` object to write.
    ///
    /// When the record was read from the store, the stored object is the
    /// base: only the first subset's ports and ready addresses are replaced.
    /// Addresses kept from the stored subset retain their hostname, node and
    /// target reference.
    pub fn to_endpoints(&self) -> Endpoints {
        let mut endpoints = self.source.clone().unwrap_or_default();

        let metadata = &mut endpoints.metadata;
        metadata.name = Some(self.name.clone());
        metadata.namespace = Some(self.namespace.clone());
        metadata.resource_version = self.resource_version.clone();
        metadata.labels = (!self.labels.is_empty()).then(|| self.labels.clone());
        metadata.annotations = (!self.annotations.is_empty()).then(|| self.annotations.clone());

        let subsets = endpoints.subsets.get_or_insert_with(Vec::new);
        if subsets.is_empty() {
            subsets.push(EndpointSubset::default());
        }
        let subset = &mut subsets[0];

        let previous = subset.addresses.take().unwrap_or_default();
        subset.addresses = Some(
            self.addresses
                .iter()
                .map(|ip| {
                    previous
                        .iter()
                        .find(|a| &a.ip == ip)
                        .cloned()
                        .unwrap_or_else(|| EndpointAddress {
                            ip: ip.clone(),
                            ..Default::default()
                        })
                })
                .collect(),
        );
        subset.ports = Some(self.ports.iter().map(EndpointPort::from).collect());

        endpoints
    }
}

impl From<&Endpoints> for DiscoveryRecord {
    /// Only the first subset is considered; a record without subsets has no
    /// ports and no addresses.
    fn from(endpoints: &Endpoints) -> Self {
        let subset = endpoints.subsets.as_ref().and_then(|s| s.first());

        let ports = subset
            .and_then(|s| s.ports.as_ref())
            .map(|ports| ports.iter().map(PortSpec::from).collect())
            .unwrap_or_default();

        let addresses = subset
            .and_then(|s| s.addresses.as_ref())
            .map(|addrs| addrs.iter().map(|a| a.ip.clone()).collect())
            .unwrap_or_default();

        Self {
            name: endpoints.name_any(),
            namespace: endpoints
                .namespace()
                .unwrap_or_else(|| "default".to_string()),
            resource_version: endpoints.metadata.resource_version.clone(),
            labels: endpoints.metadata.labels.clone().unwrap_or_default(),
            annotations: endpoints.metadata.annotations.clone().unwrap_or_default(),
            ports,
            addresses,
            source: Some(endpoints.clone()),
        }
    }
}
