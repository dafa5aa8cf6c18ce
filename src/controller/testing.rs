//! In-memory fakes for the store, event recorder and prober

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::events::{EventRecorder, EventType};
use super::probe::{ChainStatus, TargetProber};
use super::store::RecordStore;
use crate::error::{Error, ProbeError, Result};
use crate::model::{DiscoveryRecord, ManagedEntity, PortSpec, ENABLE_ANNOTATION, ENABLE_VALUE};

/// An opted-in Service in the `default` namespace
pub fn entity(name: &str, targets: &str, ports: Vec<PortSpec>) -> ManagedEntity {
    ManagedEntity {
        name: name.to_string(),
        namespace: "default".to_string(),
        uid: None,
        enabled: true,
        raw_targets: Some(targets.to_string()),
        ports,
    }
}

#[derive(Default)]
struct StoreState {
    entities: Vec<ManagedEntity>,
    records: BTreeMap<(String, String), DiscoveryRecord>,
    next_version: u64,
    pending_conflicts: u32,
    update_error: Option<String>,
    list_error: Option<String>,
    update_attempts: usize,
    create_calls: usize,
}

impl StoreState {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// [`RecordStore`] keeping everything in a map, with resource versions
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&self, entity: ManagedEntity) {
        self.state.lock().unwrap().entities.push(entity);
    }

    pub fn remove_entity(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .entities
            .retain(|e| e.namespace != namespace || e.name != name);
    }

    /// Store a record for `entity` with the entity's ports and `addresses`
    pub fn seed_record(&self, entity: &ManagedEntity, addresses: &[&str]) -> DiscoveryRecord {
        let mut state = self.state.lock().unwrap();
        let mut annotations = BTreeMap::new();
        annotations.insert(ENABLE_ANNOTATION.to_string(), ENABLE_VALUE.to_string());

        let record = DiscoveryRecord {
            name: entity.name.clone(),
            namespace: entity.namespace.clone(),
            resource_version: Some(state.bump()),
            labels: BTreeMap::new(),
            annotations,
            ports: entity.ports.clone(),
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
            source: None,
        };
        state.records.insert(
            (record.namespace.clone(), record.name.clone()),
            record.clone(),
        );
        record
    }

    pub fn record(&self, namespace: &str, name: &str) -> Option<DiscoveryRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Make the next `n` updates fail with a version conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.state.lock().unwrap().pending_conflicts = n;
    }

    pub fn fail_updates(&self, message: &str) {
        self.state.lock().unwrap().update_error = Some(message.to_string());
    }

    pub fn fail_listing(&self, message: &str) {
        self.state.lock().unwrap().list_error = Some(message.to_string());
    }

    pub fn update_attempts(&self) -> usize {
        self.state.lock().unwrap().update_attempts
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_managed_entities(&self) -> Result<Vec<ManagedEntity>> {
        let state = self.state.lock().unwrap();
        if let Some(msg) = &state.list_error {
            return Err(Error::ApiError(msg.clone()));
        }
        Ok(state.entities.iter().filter(|e| e.enabled).cloned().collect())
    }

    async fn get_record(&self, namespace: &str, name: &str) -> Result<Option<DiscoveryRecord>> {
        Ok(self.record(namespace, name))
    }

    async fn create_record(&self, record: &DiscoveryRecord) -> Result<DiscoveryRecord> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;

        let key = (record.namespace.clone(), record.name.clone());
        if state.records.contains_key(&key) {
            return Err(Error::ApiError(format!("endpoints {} already exists", record.key())));
        }

        let mut stored = record.clone();
        stored.resource_version = Some(state.bump());
        state.records.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update_record(&self, record: &DiscoveryRecord) -> Result<DiscoveryRecord> {
        let mut state = self.state.lock().unwrap();
        state.update_attempts += 1;

        if let Some(msg) = &state.update_error {
            return Err(Error::ApiError(msg.clone()));
        }

        let conflict = Error::VersionConflict {
            name: record.name.clone(),
            namespace: record.namespace.clone(),
        };

        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(conflict);
        }

        let key = (record.namespace.clone(), record.name.clone());
        let current = state
            .records
            .get(&key)
            .ok_or_else(|| Error::ApiError(format!("endpoints {} not found", record.key())))?;
        if current.resource_version != record.resource_version {
            return Err(conflict);
        }

        let mut stored = record.clone();
        stored.resource_version = Some(state.bump());
        state.records.insert(key, stored.clone());
        Ok(stored)
    }
}

/// Emitted event, as seen by [`RecordingRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub service: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
pub struct RecordingRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingRecorder {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl EventRecorder for RecordingRecorder {
    async fn emit(&self, entity: &ManagedEntity, event_type: EventType, reason: &str, message: &str) {
        self.events.lock().unwrap().push(RecordedEvent {
            service: entity.key(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

#[derive(Debug, Clone)]
struct Script {
    closed_ports: Vec<i32>,
    /// `None` answers the status query with a garbled payload
    height: Option<u64>,
}

/// [`TargetProber`] answering from a per-address script.
///
/// Unknown addresses are unreachable on every port.
#[derive(Default)]
pub struct ScriptedProber {
    scripts: Mutex<HashMap<String, Script>>,
    port_calls: Mutex<Vec<(String, i32)>>,
    status_calls: Mutex<Vec<String>>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// All ports open, status reports `height`
    pub fn healthy(self, address: &str, height: u64) -> Self {
        self.set(address, vec![], Some(height));
        self
    }

    /// `port` refuses connections
    pub fn closed_port(self, address: &str, port: i32, height: u64) -> Self {
        self.set(address, vec![port], Some(height));
        self
    }

    /// Ports open, status payload unparseable
    pub fn broken_status(self, address: &str) -> Self {
        self.set(address, vec![], None);
        self
    }

    pub fn set(&self, address: &str, closed_ports: Vec<i32>, height: Option<u64>) {
        self.scripts.lock().unwrap().insert(
            address.to_string(),
            Script {
                closed_ports,
                height,
            },
        );
    }

    pub fn remove(&self, address: &str) {
        self.scripts.lock().unwrap().remove(address);
    }

    pub fn ports_probed(&self, address: &str) -> Vec<i32> {
        self.port_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, p)| *p)
            .collect()
    }

    pub fn status_probed(&self, address: &str) -> bool {
        self.status_calls.lock().unwrap().iter().any(|a| a == address)
    }

    fn script(&self, address: &str) -> Option<Script> {
        self.scripts.lock().unwrap().get(address).cloned()
    }
}

#[async_trait]
impl TargetProber for ScriptedProber {
    async fn probe_port(&self, address: &str, port: i32) -> Result<(), ProbeError> {
        self.port_calls
            .lock()
            .unwrap()
            .push((address.to_string(), port));

        match self.script(address) {
            Some(script) if !script.closed_ports.contains(&port) => Ok(()),
            _ => Err(ProbeError::Unreachable {
                address: address.to_string(),
                port,
                reason: "connection refused".to_string(),
            }),
        }
    }

    async fn probe_chain_status(&self, address: &str) -> Result<ChainStatus, ProbeError> {
        self.status_calls.lock().unwrap().push(address.to_string());

        match self.script(address).and_then(|s| s.height) {
            Some(height) => Ok(ChainStatus {
                latest_block_height: height,
            }),
            None => Err(ProbeError::Malformed("expected value at line 1".to_string())),
        }
    }
}
