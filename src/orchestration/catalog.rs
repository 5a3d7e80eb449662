//! Resource catalog and living-instance registry.
//!
//! The orchestrator reads these during adaptive task generation. Both are
//! async traits so that real catalogs can sit behind I/O; [`InMemoryCatalog`]
//! implements both for the CLI and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;

/// A resource that can be transformed into a living instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub path: String,
    pub transformed: bool,
    /// Resource asks for a customized UI.
    pub ui_flagged: bool,
    pub has_customization: bool,
}

impl Resource {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            transformed: false,
            ui_flagged: false,
            has_customization: false,
        }
    }

    pub fn with_ui(mut self) -> Self {
        self.ui_flagged = true;
        self
    }

    pub fn transformed(mut self) -> Self {
        self.transformed = true;
        self
    }
}

/// A running product of a transformed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivingInstance {
    pub id: String,
    pub resource_path: String,
    pub last_updated: DateTime<Utc>,
    /// Health metrics in [0, 1], e.g. `performance`, `accuracy`.
    pub metrics: BTreeMap<String, f64>,
}

impl LivingInstance {
    pub fn new(id: &str, resource_path: &str) -> Self {
        Self {
            id: id.to_string(),
            resource_path: resource_path.to_string(),
            last_updated: Utc::now(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    /// No update for `stale_after`, or any metric under `metric_floor`.
    pub fn is_stale(
        &self,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
        metric_floor: f64,
    ) -> bool {
        now - self.last_updated > stale_after || self.metrics.values().any(|&m| m < metric_floor)
    }
}

#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    async fn resources(&self) -> Result<Vec<Resource>>;
}

#[async_trait]
pub trait LivingInstanceRegistry: Send + Sync {
    async fn instances(&self) -> Result<Vec<LivingInstance>>;
}

/// Process-local catalog and registry.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    resources: RwLock<BTreeMap<String, Resource>>,
    instances: RwLock<BTreeMap<String, LivingInstance>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_resource(&self, resource: Resource) {
        self.resources
            .write()
            .await
            .insert(resource.path.clone(), resource);
    }

    pub async fn add_instance(&self, instance: LivingInstance) {
        self.instances
            .write()
            .await
            .insert(instance.id.clone(), instance);
    }

    pub async fn resource(&self, path: &str) -> Option<Resource> {
        self.resources.read().await.get(path).cloned()
    }

    pub async fn instance(&self, id: &str) -> Option<LivingInstance> {
        self.instances.read().await.get(id).cloned()
    }

    /// Mark a resource transformed and register its living instance.
    ///
    /// Returns the new instance id, or `None` for an unknown resource.
    pub async fn mark_transformed(&self, path: &str) -> Option<String> {
        {
            let mut resources = self.resources.write().await;
            let resource = resources.get_mut(path)?;
            resource.transformed = true;
        }
        let id = format!("living-{}", uuid::Uuid::new_v4().simple());
        let instance = LivingInstance::new(&id, path)
            .with_metric("performance", 1.0)
            .with_metric("accuracy", 1.0);
        self.add_instance(instance).await;
        debug!(path, instance = %id, "Resource transformed");
        Some(id)
    }

    /// Mark a resource's UI as customized. Returns `false` when unknown.
    pub async fn mark_customized(&self, path: &str) -> bool {
        match self.resources.write().await.get_mut(path) {
            Some(resource) => {
                resource.has_customization = true;
                true
            }
            None => false,
        }
    }

    /// Refresh an instance and restore its metrics. Returns `false` when unknown.
    pub async fn record_optimization(&self, id: &str) -> bool {
        match self.instances.write().await.get_mut(id) {
            Some(instance) => {
                instance.last_updated = Utc::now();
                for value in instance.metrics.values_mut() {
                    *value = 1.0;
                }
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ResourceCatalog for InMemoryCatalog {
    async fn resources(&self) -> Result<Vec<Resource>> {
        Ok(self.resources.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl LivingInstanceRegistry for InMemoryCatalog {
    async fn instances(&self) -> Result<Vec<LivingInstance>> {
        Ok(self.instances.read().await.values().cloned().collect())
    }
}
