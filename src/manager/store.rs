//! Persistence for providers, deployments, services and properties
//!
//! [`DeploymentStore`] is the seam the orchestrator persists through.
//! [`MemoryStore`] keeps every row behind one lock and can mirror its state to
//! a JSON snapshot file so a restarted manager sees earlier deployments.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::api::{
    page_window, Deployment, DeploymentFilter, DeploymentId, DeploymentState, Properties,
    Provider, ProviderFilter, ProviderId, Service,
};
use crate::error::{Error, Result};

/// Persistence collaborator of the orchestrator
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert or replace a provider row
    async fn upsert_provider(&self, provider: &Provider) -> Result<()>;

    async fn list_providers(&self, filter: &ProviderFilter) -> Result<Vec<Provider>>;

    /// Persist a deployment row together with its service rows, atomically.
    /// The stored services replace any previously stored for the deployment.
    async fn save_deployment(&self, deployment: &Deployment) -> Result<()>;

    async fn get_deployment(&self, id: &DeploymentId) -> Result<Deployment>;

    /// Deployments matching the filter, newest first, one page
    async fn list_deployments(&self, filter: &DeploymentFilter) -> Result<Vec<Deployment>>;

    async fn update_deployment_state(&self, id: &DeploymentId, state: DeploymentState)
        -> Result<()>;

    /// Insert or update properties keyed by provider and application
    async fn upsert_properties(&self, properties: &Properties) -> Result<Properties>;

    async fn list_properties(&self, provider_id: &ProviderId) -> Result<Vec<Properties>>;
}

pub type SharedStore = Arc<dyn DeploymentStore>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreState {
    providers: BTreeMap<ProviderId, Provider>,
    /// Deployment rows, stored without their services
    deployments: BTreeMap<DeploymentId, Deployment>,
    services: BTreeMap<DeploymentId, Vec<Service>>,
    properties: Vec<Properties>,
    next_service_id: i64,
    next_properties_id: i64,
}

impl StoreState {
    fn deployment_with_services(&self, row: &Deployment) -> Deployment {
        let mut deployment = row.clone();
        deployment.services = self.services.get(&row.id).cloned().unwrap_or_default();
        deployment
    }
}

/// In-memory store with an optional JSON snapshot file
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    /// Create a new empty store that is never written to disk
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by a snapshot file, loading it when it exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| Error::Store(format!("{}: {}", path.display(), e)))?;
            let state: StoreState = serde_json::from_str(&raw)?;
            info!(
                "Loaded {} deployments and {} providers from {}",
                state.deployments.len(),
                state.providers.len(),
                path.display()
            );
            state
        } else {
            StoreState::default()
        };

        Ok(Self {
            state: Mutex::new(state),
            snapshot: Some(path),
        })
    }

    /// Apply a change to a copy of the state, persist the copy, then swap it
    /// in. A failed write leaves the current state untouched.
    ///
    /// File I/O runs on the blocking pool; the lock stays held across it so
    /// snapshots land in mutation order.
    async fn mutate<T>(&self, change: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let out = change(&mut next)?;
        if let Some(path) = &self.snapshot {
            let json = serde_json::to_string_pretty(&next)?;
            let path = path.clone();
            tokio::task::spawn_blocking(move || write_snapshot(&path, &json))
                .await
                .map_err(|e| Error::Store(format!("snapshot writer failed: {}", e)))??;
        }
        *state = next;
        Ok(out)
    }
}

/// Write the snapshot to a temp file and rename it over the target
fn write_snapshot(path: &Path, json: &str) -> Result<()> {
    let store_err = |e: std::io::Error| Error::Store(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(store_err)?;
    }

    let temp_path = path.with_extension("tmp");
    let result = fs::File::create(&temp_path)
        .and_then(|mut file| {
            file.write_all(json.as_bytes())?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&temp_path, path));
    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(store_err(e));
    }

    debug!("Wrote store snapshot to {}", path.display());
    Ok(())
}

fn paginate<T>(items: Vec<T>, page: i64, size: i64) -> Vec<T> {
    let (offset, limit) = page_window(page, size);
    items.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn upsert_provider(&self, provider: &Provider) -> Result<()> {
        self.mutate(|state| {
            let mut row = provider.clone();
            if let Some(existing) = state.providers.get(&provider.id) {
                row.created_at = existing.created_at;
            }
            state.providers.insert(row.id.clone(), row);
            Ok(())
        })
        .await
    }

    async fn list_providers(&self, filter: &ProviderFilter) -> Result<Vec<Provider>> {
        let state = self.state.lock().await;
        let mut providers: Vec<Provider> = state
            .providers
            .values()
            .filter(|p| filter.id.as_ref().is_none_or(|id| &p.id == id))
            .filter(|p| filter.owner.as_ref().is_none_or(|o| &p.owner == o))
            .filter(|p| filter.states.is_empty() || filter.states.contains(&p.state))
            .cloned()
            .collect();
        providers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(providers, filter.page, filter.size))
    }

    async fn save_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.mutate(|state| {
            let mut services = deployment.services.clone();
            for service in services.iter_mut() {
                if service.id == 0 {
                    state.next_service_id += 1;
                    service.id = state.next_service_id;
                }
                service.deployment_id = deployment.id.clone();
            }

            let mut row = deployment.clone();
            row.services.clear();
            state.deployments.insert(row.id.clone(), row);
            state.services.insert(deployment.id.clone(), services);
            Ok(())
        })
        .await
    }

    async fn get_deployment(&self, id: &DeploymentId) -> Result<Deployment> {
        let state = self.state.lock().await;
        state
            .deployments
            .get(id)
            .map(|row| state.deployment_with_services(row))
            .ok_or_else(|| Error::not_found(format!("deployment {}", id)))
    }

    async fn list_deployments(&self, filter: &DeploymentFilter) -> Result<Vec<Deployment>> {
        let state = self.state.lock().await;
        let mut rows: Vec<&Deployment> = state
            .deployments
            .values()
            .filter(|d| filter.deployment_id.as_ref().is_none_or(|id| &d.id == id))
            .filter(|d| filter.owner.as_ref().is_none_or(|o| &d.owner == o))
            .filter(|d| filter.states.is_empty() || filter.states.contains(&d.state))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(paginate(rows, filter.page, filter.size)
            .into_iter()
            .map(|row| state.deployment_with_services(row))
            .collect())
    }

    async fn update_deployment_state(
        &self,
        id: &DeploymentId,
        deployment_state: DeploymentState,
    ) -> Result<()> {
        self.mutate(|state| {
            let row = state
                .deployments
                .get_mut(id)
                .ok_or_else(|| Error::not_found(format!("deployment {}", id)))?;
            row.state = deployment_state;
            row.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn upsert_properties(&self, properties: &Properties) -> Result<Properties> {
        self.mutate(|state| {
            let existing = state.properties.iter_mut().find(|p| {
                p.provider_id == properties.provider_id && p.app_id == properties.app_id
            });

            let saved = match existing {
                Some(row) => {
                    row.app_type = properties.app_type;
                    row.updated_at = properties.updated_at;
                    row.clone()
                }
                None => {
                    state.next_properties_id += 1;
                    let row = Properties {
                        id: state.next_properties_id,
                        ..properties.clone()
                    };
                    state.properties.push(row.clone());
                    row
                }
            };
            Ok(saved)
        })
        .await
    }

    async fn list_properties(&self, provider_id: &ProviderId) -> Result<Vec<Properties>> {
        let state = self.state.lock().await;
        Ok(state
            .properties
            .iter()
            .filter(|p| &p.provider_id == provider_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn deployment(id: &str, state: DeploymentState, age_secs: i64) -> Deployment {
        let mut deployment = Deployment::new("p1")
            .with_id(id)
            .with_owner("alice")
            .with_service(Service::new("nginx"));
        deployment.state = state;
        deployment.created_at = Utc::now() - Duration::seconds(age_secs);
        deployment
    }

    #[tokio::test]
    async fn test_services_stamped_with_deployment_id() {
        let store = MemoryStore::new();
        store
            .save_deployment(&deployment("d1", DeploymentState::Active, 0))
            .await
            .unwrap();

        let saved = store.get_deployment(&"d1".into()).await.unwrap();
        assert_eq!(saved.services.len(), 1);
        assert_eq!(saved.services[0].deployment_id.as_str(), "d1");
        assert_eq!(saved.services[0].id, 1);
    }

    #[tokio::test]
    async fn test_list_filters_states_and_orders_newest_first() {
        let store = MemoryStore::new();
        store
            .save_deployment(&deployment("old", DeploymentState::Active, 60))
            .await
            .unwrap();
        store
            .save_deployment(&deployment("new", DeploymentState::Active, 0))
            .await
            .unwrap();
        store
            .save_deployment(&deployment("closed", DeploymentState::Close, 30))
            .await
            .unwrap();

        let active = store
            .list_deployments(&DeploymentFilter {
                states: vec![DeploymentState::Active],
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<&str> = active.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        let all = store
            .list_deployments(&DeploymentFilter {
                states: DeploymentState::ALL.to_vec(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_list_paginates() {
        let store = MemoryStore::new();
        for i in 0..25 {
            store
                .save_deployment(&deployment(&format!("d{}", i), DeploymentState::Active, i))
                .await
                .unwrap();
        }

        let page = |page, size| DeploymentFilter {
            page,
            size,
            ..Default::default()
        };
        assert_eq!(store.list_deployments(&page(0, 0)).await.unwrap().len(), 10);
        assert_eq!(store.list_deployments(&page(3, 10)).await.unwrap().len(), 5);
        let second = store.list_deployments(&page(2, 10)).await.unwrap();
        assert_eq!(second[0].id.as_str(), "d10");
    }

    #[tokio::test]
    async fn test_update_state() {
        let store = MemoryStore::new();
        store
            .save_deployment(&deployment("d1", DeploymentState::Active, 0))
            .await
            .unwrap();

        store
            .update_deployment_state(&"d1".into(), DeploymentState::Close)
            .await
            .unwrap();
        let saved = store.get_deployment(&"d1".into()).await.unwrap();
        assert_eq!(saved.state, DeploymentState::Close);

        let err = store
            .update_deployment_state(&"missing".into(), DeploymentState::Close)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_properties_upsert_by_provider_and_app() {
        let store = MemoryStore::new();
        let properties = Properties {
            provider_id: "p1".into(),
            app_id: "app".to_string(),
            ..Default::default()
        };

        let first = store.upsert_properties(&properties).await.unwrap();
        let second = store.upsert_properties(&properties).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_properties(&"p1".into()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("store.json");

        {
            let store = MemoryStore::open(&path).unwrap();
            store
                .save_deployment(&deployment("d1", DeploymentState::Active, 0))
                .await
                .unwrap();
            store.upsert_provider(&Provider::new("p1")).await.unwrap();
        }
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let reopened = MemoryStore::open(&path).unwrap();
        let saved = reopened.get_deployment(&"d1".into()).await.unwrap();
        assert_eq!(saved.services.len(), 1);
        let providers = reopened
            .list_providers(&ProviderFilter::default())
            .await
            .unwrap();
        assert_eq!(providers.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_snapshot_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();
        let store = MemoryStore::open(blocker.join("store.json")).unwrap();

        let err = store
            .save_deployment(&deployment("d1", DeploymentState::Active, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)), "got {:?}", err);
        assert!(matches!(
            store.get_deployment(&"d1".into()).await,
            Err(Error::NotFound(_))
        ));
    }
}
