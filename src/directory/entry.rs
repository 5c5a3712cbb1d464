//! Records held by the client directory.

use crate::crypto::{Credential, SecretString};
use serde::Deserialize;

/// An identity allowed to use the proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEntry {
    /// Distinguished name the client binds as.
    pub dn: String,
    /// Opaque credential record checked at bind time.
    #[serde(rename = "password")]
    pub credential: Credential,
}

impl ClientEntry {
    pub fn new(dn: impl Into<String>, credential: Credential) -> Self {
        Self {
            dn: dn.into(),
            credential,
        }
    }
}

/// One backend LDAP server and the service account the proxy uses there.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEntry {
    pub host: String,
    pub port: u16,
    /// Root of the subtree this backend serves.
    pub base_dn: String,
    /// Service account the proxy binds with. Client credentials are never
    /// forwarded to a backend.
    pub proxy_dn: String,
    pub proxy_password: SecretString,
}

impl ServerEntry {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        base_dn: impl Into<String>,
        proxy_dn: impl Into<String>,
        proxy_password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            base_dn: base_dn.into(),
            proxy_dn: proxy_dn.into(),
            proxy_password: SecretString::new(proxy_password.into()),
        }
    }

    /// LDAP URI for this backend.
    pub fn uri(&self) -> String {
        format!("ldap://{}:{}", self.host, self.port)
    }

    /// `host:port` form, used in logs and diagnostics.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
