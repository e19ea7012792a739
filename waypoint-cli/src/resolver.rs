//! Resolution cycle: race known API hosts, apply the winner's config, fall back to cloud registries.
//!
//! One cycle runs at a time per resolver. Probes within a phase run
//! concurrently and are all awaited before the fastest successful one is
//! chosen, so the winner depends only on latencies, not completion order.
//! Individual probe, decrypt and report failures are logged and dropped;
//! the only failure a caller sees is `None` once every cloud source is
//! exhausted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;
use waypoint_core::codec;
use waypoint_core::protocol::{
    self, clean, endpoint, is_url, API_PING_PATH, CONFIG_PATH, CONTENT_PING_PATH, DOMAIN_LOG_PATH,
};
use waypoint_core::{select, AdPatch, Advert, CloudSource, DecodedConfig, DomainReport, PayloadError, ProbeOutcome};

use crate::config::Config;
use crate::events::EventLog;
use crate::store::Store;
use crate::transport::{Transport, TransportError};

/// Knobs the resolver reads on every cycle.
#[derive(Debug, Clone)]
pub struct Settings {
    pub timeout: Duration,
    pub hydration_timeout: Duration,
    pub max_fallback_probes: usize,
    pub client_tag: String,
    pub region: String,
    pub report_host: Option<String>,
    pub image_host: Option<String>,
}

impl From<&Config> for Settings {
    fn from(c: &Config) -> Self {
        Self {
            timeout: c.timeout(),
            hydration_timeout: c.hydration_timeout(),
            max_fallback_probes: c.max_fallback_probes,
            client_tag: c.client_tag.clone(),
            region: c.region.clone(),
            report_host: c.report_host.clone(),
            image_host: c.image_host.clone(),
        }
    }
}

/// Where the resolver is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Resolving,
    Succeeded,
    ExhaustedFallback,
}

#[derive(Debug, thiserror::Error)]
enum ProbeError {
    #[error("timed out")]
    Timeout,
    #[error("{0}")]
    Network(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("body is not json")]
    NotJson,
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("asset decrypt: {0}")]
    Crypto(#[from] codec::CodecError),
    #[error("request encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<TransportError> for ProbeError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => ProbeError::Timeout,
            TransportError::Network(msg) => ProbeError::Network(msg),
        }
    }
}

/// Resets the phase and logs completion on every exit path, unwinding included.
struct FlightGuard<'a> {
    phase: &'a Mutex<Phase>,
    log: &'a EventLog,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        {
            let mut phase = self.phase.lock();
            if *phase == Phase::Resolving {
                *phase = Phase::Idle;
            }
        }
        self.log.log("Host resolution finished");
    }
}

pub struct Resolver {
    transport: Arc<dyn Transport>,
    store: Arc<Store>,
    log: EventLog,
    settings: Settings,
    phase: Mutex<Phase>,
}

impl Resolver {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<Store>, log: EventLog, settings: Settings) -> Self {
        Self {
            transport,
            store,
            log,
            settings,
            phase: Mutex::new(Phase::Idle),
        }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Run one resolution cycle. Returns the selected API host, or `None` when
    /// a cycle is already in flight or every source is exhausted.
    pub async fn resolve(&self) -> Option<String> {
        {
            let mut phase = self.phase.lock();
            if *phase == Phase::Resolving {
                tracing::debug!("resolution already in flight");
                return None;
            }
            *phase = Phase::Resolving;
        }
        let _guard = FlightGuard {
            phase: &self.phase,
            log: &self.log,
        };

        self.log.clear();
        self.log.log("Host resolution started");
        if let Err(e) = self.store.await_hydrated(self.settings.hydration_timeout).await {
            self.log.log(format!("Store not ready: {e}"));
            return None;
        }

        let result = match self.probe_known_hosts().await {
            Some(host) => Some(host),
            None => self.cloud_fallback().await,
        };
        *self.phase.lock() = if result.is_some() {
            Phase::Succeeded
        } else {
            Phase::ExhaustedFallback
        };
        result
    }

    /// Health check of an API host.
    pub async fn ping_api(&self, host: &str) -> bool {
        self.ping(endpoint(host, API_PING_PATH)).await.is_ok()
    }

    /// Racing probe phase over the currently known API hosts, applying the winner.
    async fn probe_known_hosts(&self) -> Option<String> {
        let candidates: Vec<String> = self
            .store
            .snapshot()
            .await
            .api_hosts
            .iter()
            .filter(|h| is_url(h))
            .map(|h| clean(h))
            .collect();
        self.log.log(format!("API host candidates: {}", candidates.len()));

        let probes = candidates
            .iter()
            .enumerate()
            .map(|(i, host)| self.timed("API", i, host, self.fetch_config(host)));
        let outcomes = join_all(probes).await;

        let Some(winner) = select::fastest(outcomes) else {
            self.log.log("No API host returned a usable config");
            return None;
        };
        let host = winner.host;
        self.log.log(format!(
            "Selected API host: {host} ({} ms)",
            winner.elapsed.as_millis()
        ));

        if let Err(e) = self.store.set_api_endpoint(&host).await {
            self.log.log(format!("Failed to persist API endpoint: {e}"));
        }
        if let Err(e) = self.store.set_api_host_ready(true).await {
            self.log.log(format!("Failed to persist readiness: {e}"));
        }
        if let Some(config) = winner.payload {
            self.apply_config(&config).await;
        }
        Some(host)
    }

    async fn apply_config(&self, config: &DecodedConfig) {
        if let Some(advert) = &config.advert {
            self.update_advert(advert).await;
        }
        self.refresh_content_hosts(&config.urls).await;
        self.merge_api_entries(&config.apis).await;
        if let Some(cs) = config.cs.as_deref().filter(|cs| !cs.is_empty()) {
            match self.store.set_chat(cs).await {
                Ok(()) => self.log.log("Support chat updated"),
                Err(e) => self.log.log(format!("Failed to persist support chat: {e}")),
            }
        }
    }

    /// Fetch and decrypt the advert image when it differs from the stored one.
    /// Returns true when a new image was stored.
    async fn update_advert(&self, advert: &Advert) -> bool {
        if advert.image.is_empty() {
            return false;
        }
        if self.store.snapshot().await.ads.image == advert.image {
            tracing::debug!(image = %advert.image, "advert unchanged");
            return false;
        }
        let Some(url) = self.asset_url(&advert.image) else {
            self.log.log("Advert image skipped: no image host configured");
            return false;
        };
        self.log.log("Advert image decrypting");
        let data_uri = match self.fetch_asset(&url).await {
            Ok(uri) => uri,
            Err(e) => {
                self.log.log(format!("Advert image decrypt failed: {e}"));
                return false;
            }
        };
        match self.store.set_ads(AdPatch::from_advert(advert, data_uri)).await {
            Ok(()) => {
                self.log.log("Advert image decrypt finished");
                true
            }
            Err(e) => {
                self.log.log(format!("Failed to persist advert: {e}"));
                false
            }
        }
    }

    fn asset_url(&self, image: &str) -> Option<String> {
        if is_url(image) {
            return Some(image.to_string());
        }
        let base = self.settings.image_host.as_deref()?;
        if image.starts_with('/') {
            Some(format!("{}{}", clean(base), image))
        } else {
            Some(format!("{}/{}", clean(base), image))
        }
    }

    async fn fetch_asset(&self, url: &str) -> Result<String, ProbeError> {
        let resp = self.transport.get(url, self.settings.timeout).await?;
        if !resp.is_success() {
            return Err(ProbeError::Status(resp.status));
        }
        let bytes = resp.body;
        let plain = tokio::task::spawn_blocking(move || codec::decrypt_asset(&bytes))
            .await
            .map_err(|e| ProbeError::Network(e.to_string()))??;
        Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(plain)))
    }

    /// Race the payload's content hosts; keep every reachable one, fastest first.
    async fn refresh_content_hosts(&self, urls: &[String]) {
        let candidates: Vec<String> = urls.iter().filter(|u| is_url(u)).map(|u| clean(u)).collect();
        if candidates.is_empty() {
            return;
        }
        self.log.log(format!("Content host candidates: {}", candidates.len()));
        let probes = candidates.iter().enumerate().map(|(i, host)| {
            self.timed("Content", i, host, self.ping(endpoint(host, CONTENT_PING_PATH)))
        });
        let outcomes = join_all(probes).await;
        let ranked = select::rank_reachable(&outcomes);
        let Some(primary) = ranked.first() else {
            self.log.log("No content host reachable");
            return;
        };
        self.log.log(format!("Selected content host: {primary}"));
        if let Err(e) = self.store.set_content_endpoint(primary).await {
            self.log.log(format!("Failed to persist content endpoint: {e}"));
        }
        if let Err(e) = self.store.merge_content_hosts(&ranked).await {
            self.log.log(format!("Failed to persist content hosts: {e}"));
        }
    }

    async fn merge_api_entries(&self, entries: &[String]) {
        if entries.is_empty() {
            return;
        }
        let hosts = self.decrypt_entries(entries);
        self.log.log(format!(
            "Decrypted API hosts: {}/{}",
            hosts.len(),
            entries.len()
        ));
        if hosts.is_empty() {
            return;
        }
        if let Err(e) = self.store.merge_api_hosts(&hosts).await {
            self.log.log(format!("Failed to persist API hosts: {e}"));
        }
    }

    /// Decrypt host entries one by one; failures and non-URL plaintexts are dropped.
    fn decrypt_entries(&self, entries: &[String]) -> Vec<String> {
        entries
            .iter()
            .filter_map(|entry| match codec::decrypt_host_entry(entry) {
                Ok(host) => Some(clean(&host)).filter(|h| is_url(h)),
                Err(e) => {
                    tracing::debug!(error = %e, "dropping host entry");
                    None
                }
            })
            .collect()
    }

    /// Walk the cloud sources in order. Each one yielding hosts replaces the API host list and triggers one re-probe.
    async fn cloud_fallback(&self) -> Option<String> {
        self.log.log("Switching to cloud fallback");
        let clouds = self.store.snapshot().await.clouds;
        let mut probes = 0usize;
        for cloud in &clouds {
            if probes >= self.settings.max_fallback_probes {
                self.log.log(format!("Fallback probe limit reached ({probes})"));
                break;
            }
            let hosts = self.fetch_cloud(cloud).await;
            if hosts.is_empty() {
                continue;
            }
            if let Err(e) = self.store.replace_api_hosts(&hosts).await {
                self.log.log(format!("Failed to persist cloud hosts: {e}"));
                continue;
            }
            self.log.log("Retrying API resolution with cloud hosts");
            probes += 1;
            if let Some(host) = self.probe_known_hosts().await {
                return Some(host);
            }
        }
        self.log.log("All cloud sources exhausted");
        None
    }

    async fn fetch_cloud(&self, cloud: &CloudSource) -> Vec<String> {
        self.log.log(format!("Fetch cloud: {} -> {}", cloud.name, cloud.url));
        let resp = match self.transport.get(&cloud.url, self.settings.timeout).await {
            Ok(resp) => resp,
            Err(e) => {
                self.log.log(format!("Cloud fetch error: {}: {e}", cloud.url));
                self.report_failed_domain(&cloud.url).await;
                return Vec::new();
            }
        };
        let Some(entries) = resp.json().as_ref().and_then(protocol::decode_cloud_list) else {
            self.log.log(format!("Cloud response invalid: {}", cloud.url));
            self.report_failed_domain(&cloud.url).await;
            return Vec::new();
        };
        self.log.log(format!("Cloud encrypted hosts: {}", entries.len()));
        let hosts = self.decrypt_entries(&entries);
        if hosts.is_empty() {
            self.log.log("Cloud decrypt produced no valid hosts");
            self.report_failed_domain(&cloud.url).await;
            return Vec::new();
        }
        self.log.log(format!("Cloud decrypt success ({} hosts)", hosts.len()));
        hosts
    }

    /// Best-effort; every failure is ignored.
    async fn report_failed_domain(&self, domain: &str) {
        let Some(report_host) = self.settings.report_host.as_deref() else {
            return;
        };
        let report = DomainReport {
            domain: domain.to_string(),
            region: self.settings.region.clone(),
            access_time: codec::unix_timestamp(),
        };
        let Ok(body) = serde_json::to_value(&report) else {
            return;
        };
        let url = endpoint(report_host, DOMAIN_LOG_PATH);
        if let Err(e) = self.transport.post(&url, &body, &[], self.settings.timeout).await {
            tracing::debug!(error = %e, "domain report failed");
        }
    }

    async fn fetch_config(&self, host: &str) -> Result<DecodedConfig, ProbeError> {
        let envelope =
            codec::encrypt_request(&json!({}), codec::unix_timestamp(), &self.settings.client_tag);
        let body = serde_json::to_value(&envelope)?;
        let resp = self
            .transport
            .post(&endpoint(host, CONFIG_PATH), &body, &[], self.settings.timeout)
            .await?;
        let value = resp.json().ok_or(ProbeError::NotJson)?;
        Ok(protocol::decode_config_response(&value)?)
    }

    async fn ping(&self, url: String) -> Result<(), ProbeError> {
        let resp = self.transport.get(&url, self.settings.timeout).await?;
        if resp.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(resp.status))
        }
    }

    /// Timing envelope: records elapsed time and outcome without ever failing.
    async fn timed<T, F>(&self, tier: &str, index: usize, host: &str, probe: F) -> ProbeOutcome<T>
    where
        F: Future<Output = Result<T, ProbeError>>,
    {
        let start = Instant::now();
        let result = probe.await;
        let elapsed = start.elapsed();
        let payload = match result {
            Ok(v) => {
                self.log
                    .log(format!("{tier} OK: {host} ({} ms)", elapsed.as_millis()));
                Some(v)
            }
            Err(e) => {
                self.log.log(format!("{tier} failed: {host}: {e}"));
                None
            }
        };
        ProbeOutcome {
            index,
            host: host.to_string(),
            elapsed,
            payload,
        }
    }
}
