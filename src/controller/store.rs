//! Access to Services and Endpoints
//!
//! The reconciler only sees the [`RecordStore`] trait. [`KubeStore`] is the
//! implementation backed by the cluster API.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::{
    api::{Api, ListParams, PostParams},
    runtime::{watcher, WatchStreamExt},
    Client,
};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{DiscoveryRecord, ManagedEntity};

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "endpoint-controller";

/// Read and write access to opted-in Services and their Endpoints
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All Services carrying the enable annotation
    async fn list_managed_entities(&self) -> Result<Vec<ManagedEntity>>;

    /// `None` when no Endpoints object exists yet
    async fn get_record(&self, namespace: &str, name: &str) -> Result<Option<DiscoveryRecord>>;

    async fn create_record(&self, record: &DiscoveryRecord) -> Result<DiscoveryRecord>;

    /// Version-checked replace; fails with [`Error::VersionConflict`] when the
    /// stored record changed since it was read
    async fn update_record(&self, record: &DiscoveryRecord) -> Result<DiscoveryRecord>;
}

/// [`RecordStore`] on top of the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn endpoints(&self, namespace: &str) -> Api<Endpoints> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl RecordStore for KubeStore {
    async fn list_managed_entities(&self) -> Result<Vec<ManagedEntity>> {
        let services: Api<Service> = Api::all(self.client.clone());
        let list = services.list(&ListParams::default()).await?;

        let entities: Vec<ManagedEntity> = list
            .items
            .iter()
            .map(ManagedEntity::from)
            .filter(|e| e.enabled)
            .collect();

        debug!(
            "Found {} managed service(s) out of {}",
            entities.len(),
            list.items.len()
        );
        Ok(entities)
    }

    async fn get_record(&self, namespace: &str, name: &str) -> Result<Option<DiscoveryRecord>> {
        match self.endpoints(namespace).get(name).await {
            Ok(endpoints) => Ok(Some(DiscoveryRecord::from(&endpoints))),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn create_record(&self, record: &DiscoveryRecord) -> Result<DiscoveryRecord> {
        let created = self
            .endpoints(&record.namespace)
            .create(&Self::post_params(), &record.to_endpoints())
            .await?;
        Ok(DiscoveryRecord::from(&created))
    }

    async fn update_record(&self, record: &DiscoveryRecord) -> Result<DiscoveryRecord> {
        match self
            .endpoints(&record.namespace)
            .replace(&record.name, &Self::post_params(), &record.to_endpoints())
            .await
        {
            Ok(updated) => Ok(DiscoveryRecord::from(&updated)),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(Error::VersionConflict {
                name: record.name.clone(),
                namespace: record.namespace.clone(),
            }),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}

/// Opted-in Services as they are added or modified
///
/// Watch errors are logged and skipped; the watcher backs off and resumes on
/// its own.
pub fn watch_managed_entities(client: Client) -> BoxStream<'static, ManagedEntity> {
    let services: Api<Service> = Api::all(client);

    watcher(services, watcher::Config::default())
        .default_backoff()
        .applied_objects()
        .filter_map(|event| async move {
            match event {
                Ok(service) => {
                    let entity = ManagedEntity::from(&service);
                    entity.enabled.then_some(entity)
                }
                Err(e) => {
                    warn!("Service watch error: {}", e);
                    None
                }
            }
        })
        .boxed()
}
