//! Kubernetes Events for controller actions
//!
//! Events are an audit trail only. A failed emission is logged and dropped.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::{
    api::{Api, PostParams},
    Client,
};
use tracing::{debug, warn};

use crate::model::ManagedEntity;

pub const REPORTING_COMPONENT: &str = "endpoint-controller";

/// Event reasons emitted by the controller
pub mod reason {
    pub const CREATED_ENDPOINTS: &str = "CreatedEndpoints";
    pub const UPDATED_ENDPOINTS: &str = "UpdatedEndpoints";
    pub const NO_HEALTHY_TARGETS: &str = "NoHealthyTargets";
    pub const INVALID_TARGETS: &str = "InvalidTargets";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// Fire-and-forget sink for events about a Service
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn emit(&self, entity: &ManagedEntity, event_type: EventType, reason: &str, message: &str);
}

/// [`EventRecorder`] creating `core/v1` Events
#[derive(Clone)]
pub struct KubeEventRecorder {
    client: Client,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn build_event(entity: &ManagedEntity, event_type: EventType, reason: &str, message: &str) -> Event {
    let now = chrono::Utc::now();

    Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", entity.name)),
            namespace: Some(entity.namespace.clone()),
            ..Default::default()
        },
        type_: Some(event_type.as_str().to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        involved_object: ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Service".to_string()),
            name: Some(entity.name.clone()),
            namespace: Some(entity.namespace.clone()),
            uid: entity.uid.clone(),
            ..Default::default()
        },
        source: Some(EventSource {
            component: Some(REPORTING_COMPONENT.to_string()),
            ..Default::default()
        }),
        reporting_component: Some(REPORTING_COMPONENT.to_string()),
        first_timestamp: Some(Time(now)),
        last_timestamp: Some(Time(now)),
        count: Some(1),
        ..Default::default()
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn emit(&self, entity: &ManagedEntity, event_type: EventType, reason: &str, message: &str) {
        let events: Api<Event> = Api::namespaced(self.client.clone(), &entity.namespace);
        let event = build_event(entity, event_type, reason, message);

        match events.create(&PostParams::default(), &event).await {
            Ok(_) => debug!("Emitted {} event for {}", reason, entity.key()),
            Err(e) => warn!("Failed to emit {} event for {}: {}", reason, entity.key(), e),
        }
    }
}
