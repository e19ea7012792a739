//! Wire schemas: request envelope, config payload, cloud lists, domain reports, endpoint paths.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{self, CodecError};

/// Config endpoint, relative to an API host.
pub const CONFIG_PATH: &str = "/apiv1/latest-redbook-conf";
/// API liveness endpoint.
pub const API_PING_PATH: &str = "/apiv1/ping/ping";
/// Content host liveness file.
pub const CONTENT_PING_PATH: &str = "/ping.txt";
/// Domain failure report endpoint, relative to the report host.
pub const DOMAIN_LOG_PATH: &str = "/apiv1/domain/log";

/// Signed, encrypted request body sent to the config endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub client: String,
    pub timestamp: u64,
    pub data: String,
    pub sign: String,
}

/// Advert as delivered by the config endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advert {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub url: String,
}

/// Decrypted config payload. `apis` entries are still opaque host entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedConfig {
    #[serde(default)]
    pub advert: Option<Advert>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub apis: Vec<String>,
    #[serde(default)]
    pub cs: Option<String>,
}

impl DecodedConfig {
    /// True when the payload carries nothing the resolver can use.
    pub fn is_empty(&self) -> bool {
        self.advert.is_none()
            && self.urls.is_empty()
            && self.apis.is_empty()
            && self.cs.as_deref().map_or(true, str::is_empty)
    }
}

/// Independent fallback registry serving a JSON array of host entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudSource {
    pub name: String,
    #[serde(alias = "value")]
    pub url: String,
}

impl CloudSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Best-effort report of a domain that could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainReport {
    pub domain: String,
    pub region: String,
    pub access_time: u64,
}

/// Error decoding a config endpoint response.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("response carries no data field")]
    MissingData,
    #[error("decrypt failed: {0}")]
    Crypto(#[from] CodecError),
    #[error("schema mismatch: {0}")]
    Schema(#[from] serde_json::Error),
    #[error("payload is empty")]
    Empty,
}

/// Decode a config endpoint response body.
///
/// The body is either `{"data": "<ciphertext>"}`, whose plaintext is an
/// object with its own `data` field, or an already-plain `{"data": {...}}`.
pub fn decode_config_response(body: &Value) -> Result<DecodedConfig, PayloadError> {
    let inner = match body.get("data") {
        Some(Value::String(cipher)) => codec::decrypt_response(cipher)?,
        Some(Value::Null) | None => return Err(PayloadError::MissingData),
        Some(_) => body.clone(),
    };
    let data = inner.get("data").cloned().ok_or(PayloadError::MissingData)?;
    if data.is_null() {
        return Err(PayloadError::MissingData);
    }
    let config: DecodedConfig = serde_json::from_value(data)?;
    if config.is_empty() {
        return Err(PayloadError::Empty);
    }
    Ok(config)
}

/// Decode a cloud registry body: a JSON array of strings. `None` when the body has another shape.
pub fn decode_cloud_list(body: &Value) -> Option<Vec<String>> {
    let items = body.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

/// Well-formed candidate: an http(s) URL.
pub fn is_url(candidate: &str) -> bool {
    candidate.starts_with("http://") || candidate.starts_with("https://")
}

/// Strip trailing slashes.
pub fn clean(host: &str) -> String {
    host.trim().trim_end_matches('/').to_string()
}

/// Join a host and an endpoint path.
pub fn endpoint(host: &str, path: &str) -> String {
    format!("{}{}", clean(host), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_encrypted_response() {
        let plain = json!({ "data": { "urls": ["https://web.example.net"], "cs": "chat" } });
        let body = json!({ "data": codec::encrypt_payload(&plain) });
        let cfg = decode_config_response(&body).unwrap();
        assert_eq!(cfg.urls, vec!["https://web.example.net".to_string()]);
        assert_eq!(cfg.cs.as_deref(), Some("chat"));
        assert!(cfg.advert.is_none());
    }

    #[test]
    fn decodes_plain_response() {
        let body = json!({ "data": { "apis": ["a:b"], "advert": { "image": "/ad.bin" } } });
        let cfg = decode_config_response(&body).unwrap();
        assert_eq!(cfg.apis, vec!["a:b".to_string()]);
        assert_eq!(cfg.advert.unwrap().image, "/ad.bin");
    }

    #[test]
    fn empty_or_missing_payloads_are_rejected() {
        assert!(matches!(
            decode_config_response(&json!({ "code": 0 })),
            Err(PayloadError::MissingData)
        ));
        assert!(matches!(
            decode_config_response(&json!({ "data": null })),
            Err(PayloadError::MissingData)
        ));
        assert!(matches!(
            decode_config_response(&json!({ "data": {} })),
            Err(PayloadError::Empty)
        ));
        let cipher = codec::encrypt_payload(&json!({ "code": 1 }));
        assert!(matches!(
            decode_config_response(&json!({ "data": cipher })),
            Err(PayloadError::MissingData)
        ));
    }

    #[test]
    fn schema_mismatch_is_definite() {
        let body = json!({ "data": { "urls": "not-a-list" } });
        assert!(matches!(
            decode_config_response(&body),
            Err(PayloadError::Schema(_))
        ));
    }

    #[test]
    fn undecryptable_response_is_crypto_error() {
        let body = json!({ "data": "definitely not ciphertext" });
        assert!(matches!(
            decode_config_response(&body),
            Err(PayloadError::Crypto(_))
        ));
    }

    #[test]
    fn cloud_list_shapes() {
        assert_eq!(
            decode_cloud_list(&json!(["a", 1, "b"])),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(decode_cloud_list(&json!({ "hosts": [] })), None);
    }

    #[test]
    fn cloud_source_accepts_legacy_key() {
        let c: CloudSource =
            serde_json::from_value(json!({ "name": "gitlab", "value": "https://g.example/x.json" }))
                .unwrap();
        assert_eq!(c.url, "https://g.example/x.json");
    }

    #[test]
    fn url_helpers() {
        assert!(is_url("https://a.example"));
        assert!(is_url("http://a.example"));
        assert!(!is_url("ftp://a.example"));
        assert!(!is_url(""));
        assert_eq!(clean("https://a.example//"), "https://a.example");
        assert_eq!(
            endpoint("https://a.example/", CONFIG_PATH),
            "https://a.example/apiv1/latest-redbook-conf"
        );
    }
}
