//! TLS configuration for HTTPS stub servers.

use serde::{Deserialize, Serialize};

/// Certificate and key used when a stub server serves HTTPS
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Path to TLS certificate file (PEM format)
    pub cert_path: String,
    /// Path to TLS private key file (PEM format)
    pub key_path: String,
}
