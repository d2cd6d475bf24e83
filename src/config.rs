//! Relay configuration and the NIP-11 metadata document.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// The document served for `Accept: application/nostr+json` requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayInfo {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    pub supported_nips: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Default for RelayInfo {
    fn default() -> Self {
        RelayInfo {
            name: "nostr-relay".into(),
            description: "A Rust-based Nostr relay".into(),
            pubkey: None,
            contact: None,
            supported_nips: vec![1, 11],
            software: Some(env!("CARGO_PKG_NAME").into()),
            version: Some(env!("CARGO_PKG_VERSION").into()),
        }
    }
}

/// Runtime options for the relay binary. The binding to the environment
/// lives here; the core only ever sees the resolved values.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Connection string for the SQL store; `None` selects the in-memory
    /// store.
    pub persistent_store_dsn: Option<String>,
    /// When non-empty, events from any other pubkey are rejected at
    /// admission.
    pub allowed_pubkeys: Vec<String>,
    pub listen_address: SocketAddr,
    pub relay_metadata: RelayInfo,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let persistent_store_dsn = std::env::var("DATABASE_URL")
            .ok()
            .filter(|dsn| !dsn.is_empty());
        let allowed_pubkeys = std::env::var("ALLOWED_PUBKEYS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let listen_address = std::env::var("LISTEN_ADDR")
            .ok()
            .and_then(|addr| addr.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let mut relay_metadata = RelayInfo::default();
        if let Ok(name) = std::env::var("RELAY_NAME") {
            relay_metadata.name = name;
        }
        if let Ok(description) = std::env::var("RELAY_DESCRIPTION") {
            relay_metadata.description = description;
        }
        relay_metadata.pubkey = std::env::var("RELAY_PUBKEY").ok();
        relay_metadata.contact = std::env::var("RELAY_CONTACT").ok();

        RelayConfig {
            persistent_store_dsn,
            allowed_pubkeys,
            listen_address,
            relay_metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_document_omits_absent_fields() {
        let info = RelayInfo::default();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["name"], "nostr-relay");
        assert_eq!(json["supported_nips"], serde_json::json!([1, 11]));
        assert!(json.get("pubkey").is_none());
        assert!(json.get("contact").is_none());
    }
}
