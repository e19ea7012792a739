//! Durable resolver state: JSON file, hydration barrier, write-through setters.
//!
//! Every writer works on a copy, commits it to disk (temp file + rename) and
//! only then publishes it in memory, all under one lock, so readers never
//! observe state that is not on disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use waypoint_core::{AdPatch, PersistedState, StateError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("state encoding: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store not hydrated within {0:?}")]
    HydrationTimeout(Duration),
    #[error(transparent)]
    Invariant(#[from] StateError),
}

pub struct Store {
    path: PathBuf,
    defaults: PersistedState,
    state: Mutex<PersistedState>,
    hydrated: watch::Sender<bool>,
}

impl Store {
    /// Un-hydrated store backed by `path`. `defaults` seeds API hosts and cloud sources.
    pub fn new(path: impl Into<PathBuf>, defaults: PersistedState) -> Self {
        let (hydrated, _) = watch::channel(false);
        Self {
            path: path.into(),
            state: Mutex::new(defaults.clone()),
            defaults,
            hydrated,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state file into memory and release the hydration barrier.
    /// A missing or unreadable file falls back to the defaults.
    pub async fn hydrate(&self) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        let mut loaded = match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice::<PersistedState>(&bytes) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "corrupt state file, using defaults");
                    self.defaults.clone()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.defaults.clone(),
            Err(e) => return Err(e.into()),
        };
        // Cloud sources are static for the process lifetime.
        loaded.clouds = self.defaults.clouds.clone();
        if loaded.api_hosts.is_empty() {
            loaded.api_hosts = self.defaults.api_hosts.clone();
        }
        let mut dirty = false;
        if loaded.device_id.is_empty() {
            loaded.device_id = uuid::Uuid::new_v4().to_string();
            dirty = true;
        }
        if !loaded.is_consistent() {
            loaded.normalize();
            dirty = true;
        }
        loaded.hydrated = true;
        if dirty {
            self.commit(&loaded).await?;
        }
        *guard = loaded;
        drop(guard);
        self.hydrated.send_replace(true);
        tracing::debug!(path = %self.path.display(), "store hydrated");
        Ok(())
    }

    /// Block until the store has been hydrated at least once.
    pub async fn await_hydrated(&self, timeout: Duration) -> Result<(), StoreError> {
        let mut rx = self.hydrated.subscribe();
        let ready = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|h| *h)).await,
            Ok(Ok(_))
        );
        if ready {
            Ok(())
        } else {
            Err(StoreError::HydrationTimeout(timeout))
        }
    }

    /// Fresh copy of the current state.
    pub async fn snapshot(&self) -> PersistedState {
        self.state.lock().await.clone()
    }

    pub async fn merge_api_hosts(&self, hosts: &[String]) -> Result<(), StoreError> {
        self.update(|s| {
            s.merge_api_hosts(hosts);
            Ok(())
        })
        .await
    }

    pub async fn merge_content_hosts(&self, hosts: &[String]) -> Result<(), StoreError> {
        self.update(|s| {
            s.merge_content_hosts(hosts);
            Ok(())
        })
        .await
    }

    pub async fn replace_api_hosts(&self, hosts: &[String]) -> Result<(), StoreError> {
        self.update(|s| {
            s.replace_api_hosts(hosts);
            Ok(())
        })
        .await
    }

    pub async fn set_api_endpoint(&self, endpoint: &str) -> Result<(), StoreError> {
        self.update(|s| {
            s.api_endpoint = endpoint.to_string();
            Ok(())
        })
        .await
    }

    pub async fn set_content_endpoint(&self, endpoint: &str) -> Result<(), StoreError> {
        self.update(|s| {
            s.content_endpoint = endpoint.to_string();
            Ok(())
        })
        .await
    }

    pub async fn set_api_host_ready(&self, ready: bool) -> Result<(), StoreError> {
        self.update(|s| Ok(s.set_api_host_ready(ready)?)).await
    }

    /// Shallow-merge an advert patch into the stored descriptor.
    pub async fn set_ads(&self, patch: AdPatch) -> Result<(), StoreError> {
        self.update(|s| {
            s.ads.apply(patch);
            Ok(())
        })
        .await
    }

    pub async fn set_chat(&self, chat: &str) -> Result<(), StoreError> {
        self.update(|s| {
            s.chat = chat.to_string();
            Ok(())
        })
        .await
    }

    /// Out-of-band reset: back to defaults, keeping the device identity.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.update(|s| {
            let device_id = std::mem::take(&mut s.device_id);
            *s = self.defaults.clone();
            s.device_id = device_id;
            s.hydrated = true;
            Ok(())
        })
        .await
    }

    async fn update<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut PersistedState) -> Result<(), StoreError>,
    {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        f(&mut next)?;
        self.commit(&next).await?;
        *guard = next;
        Ok(())
    }

    async fn commit(&self, state: &PersistedState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
