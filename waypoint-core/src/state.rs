//! Persisted resolver state and its merge rules.
//!
//! Host lists are ordered as a probe-priority hint only: merges put new
//! arrivals first and drop later duplicates. Correctness never depends on
//! the order.

use serde::{Deserialize, Serialize};

use crate::protocol::{Advert, CloudSource};

/// Advert as persisted, including the decrypted image as a data URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdDescriptor {
    pub name: String,
    pub image: String,
    pub base64: String,
    pub position: Option<i64>,
    pub url: String,
}

/// Partial advert update; `None` fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdPatch {
    pub name: Option<String>,
    pub image: Option<String>,
    pub base64: Option<String>,
    pub position: Option<Option<i64>>,
    pub url: Option<String>,
}

impl AdPatch {
    /// Patch carrying every field of a server advert plus its decoded image.
    pub fn from_advert(advert: &Advert, base64: String) -> Self {
        Self {
            name: Some(advert.name.clone()),
            image: Some(advert.image.clone()),
            base64: Some(base64),
            position: Some(advert.position),
            url: Some(advert.url.clone()),
        }
    }
}

impl AdDescriptor {
    /// Shallow merge: fields absent from `patch` are preserved.
    pub fn apply(&mut self, patch: AdPatch) {
        if let Some(v) = patch.name {
            self.name = v;
        }
        if let Some(v) = patch.image {
            self.image = v;
        }
        if let Some(v) = patch.base64 {
            self.base64 = v;
        }
        if let Some(v) = patch.position {
            self.position = v;
        }
        if let Some(v) = patch.url {
            self.url = v;
        }
    }
}

/// Durable resolver state. `hydrated` is runtime-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub api_endpoint: String,
    pub content_endpoint: String,
    pub api_host_ready: bool,
    pub api_hosts: Vec<String>,
    pub content_hosts: Vec<String>,
    pub clouds: Vec<CloudSource>,
    pub ads: AdDescriptor,
    pub chat: String,
    pub device_id: String,
    #[serde(skip)]
    pub hydrated: bool,
}

/// Violation of a state invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("api host cannot be ready without an api endpoint")]
    ReadyWithoutEndpoint,
}

impl PersistedState {
    pub fn merge_api_hosts(&mut self, new_hosts: &[String]) {
        self.api_hosts = merge_hosts(new_hosts, &self.api_hosts);
    }

    pub fn merge_content_hosts(&mut self, new_hosts: &[String]) {
        self.content_hosts = merge_hosts(new_hosts, &self.content_hosts);
    }

    /// Replace the API host list outright. Only cloud fallback does this.
    pub fn replace_api_hosts(&mut self, hosts: &[String]) {
        self.api_hosts = dedupe(hosts.iter().cloned());
    }

    pub fn set_api_host_ready(&mut self, ready: bool) -> Result<(), StateError> {
        if ready && self.api_endpoint.is_empty() {
            return Err(StateError::ReadyWithoutEndpoint);
        }
        self.api_host_ready = ready;
        Ok(())
    }

    /// `api_host_ready` implies a non-empty API endpoint.
    pub fn is_consistent(&self) -> bool {
        !self.api_host_ready || !self.api_endpoint.is_empty()
    }

    /// Repair a state restored from disk that violates the readiness invariant.
    pub fn normalize(&mut self) {
        if !self.is_consistent() {
            self.api_host_ready = false;
        }
    }
}

/// `dedupe(new ++ previous)`, keeping the first occurrence of each value.
pub fn merge_hosts(new_hosts: &[String], previous: &[String]) -> Vec<String> {
    dedupe(new_hosts.iter().chain(previous.iter()).cloned())
}

fn dedupe(hosts: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for host in hosts {
        if !out.contains(&host) {
            out.push(host);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn merge_puts_new_first_and_dedupes() {
        assert_eq!(
            merge_hosts(&hosts(&["b", "c"]), &hosts(&["a", "b"])),
            hosts(&["b", "c", "a"])
        );
    }

    #[test]
    fn merge_keeps_relative_order_within_each_side() {
        assert_eq!(
            merge_hosts(&hosts(&["z", "y", "z"]), &hosts(&["x", "y", "w"])),
            hosts(&["z", "y", "x", "w"])
        );
        assert_eq!(merge_hosts(&[], &hosts(&["a"])), hosts(&["a"]));
    }

    #[test]
    fn state_merges_and_replaces() {
        let mut s = PersistedState {
            api_hosts: hosts(&["a", "b"]),
            content_hosts: hosts(&["w"]),
            ..Default::default()
        };
        s.merge_api_hosts(&hosts(&["b", "c"]));
        assert_eq!(s.api_hosts, hosts(&["b", "c", "a"]));
        s.merge_content_hosts(&hosts(&["v", "w"]));
        assert_eq!(s.content_hosts, hosts(&["v", "w"]));
        s.replace_api_hosts(&hosts(&["q", "q"]));
        assert_eq!(s.api_hosts, hosts(&["q"]));
    }

    #[test]
    fn ready_requires_endpoint() {
        let mut s = PersistedState::default();
        assert_eq!(
            s.set_api_host_ready(true),
            Err(StateError::ReadyWithoutEndpoint)
        );
        assert!(!s.api_host_ready);
        s.api_endpoint = "https://api.example.net".into();
        assert!(s.set_api_host_ready(true).is_ok());
        assert!(s.is_consistent());
    }

    #[test]
    fn normalize_clears_inconsistent_ready_flag() {
        let mut s = PersistedState {
            api_host_ready: true,
            ..Default::default()
        };
        s.normalize();
        assert!(!s.api_host_ready);
    }

    #[test]
    fn ad_patch_is_shallow() {
        let mut ads = AdDescriptor {
            name: "old".into(),
            url: "https://ad.example".into(),
            position: Some(2),
            ..Default::default()
        };
        ads.apply(AdPatch {
            image: Some("/img/1.bin".into()),
            ..Default::default()
        });
        assert_eq!(ads.name, "old");
        assert_eq!(ads.url, "https://ad.example");
        assert_eq!(ads.position, Some(2));
        assert_eq!(ads.image, "/img/1.bin");

        let advert = Advert {
            name: "new".into(),
            image: "/img/2.bin".into(),
            position: None,
            url: String::new(),
        };
        ads.apply(AdPatch::from_advert(&advert, "data:x".into()));
        assert_eq!(ads.name, "new");
        assert_eq!(ads.position, None);
        assert_eq!(ads.base64, "data:x");
    }

    #[test]
    fn hydrated_flag_is_not_serialized() {
        let s = PersistedState {
            hydrated: true,
            api_endpoint: "https://api.example.net".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("hydrated"));
        let back: PersistedState = serde_json::from_str(&json).unwrap();
        assert!(!back.hydrated);
        assert_eq!(back.api_endpoint, s.api_endpoint);
    }
}
