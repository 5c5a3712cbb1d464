//! In-memory client directory.

use crate::directory::{ClientDirectory, ClientEntry, Lookup, ServerEntry};
use crate::dn;
use crate::errors::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Client directory backed by process memory.
///
/// Entries are keyed by canonical DN, so lookups are insensitive to
/// attribute-type case and component spacing.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    clients: HashMap<String, (ClientEntry, Vec<ServerEntry>)>,
}

/// On-disk document shape: the two persisted collections.
#[derive(Debug, Deserialize)]
struct DirectoryDocument {
    servers: Vec<ServerEntry>,
    clients: Vec<ClientEntry>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client with its ordered backend set.
    pub fn insert(&mut self, client: ClientEntry, backends: Vec<ServerEntry>) {
        let key = dn::canonicalize(&client.dn).unwrap_or_else(|_| client.dn.clone());
        self.clients.insert(key, (client, backends));
    }

    /// Parses a directory document from JSON. Every registered client is
    /// authorized for the full server list, in declaration order.
    pub fn from_json(raw: &str) -> Result<Self> {
        let doc: DirectoryDocument = serde_json::from_str(raw)?;

        let mut directory = Self::new();
        for client in doc.clients {
            directory.insert(client, doc.servers.clone());
        }
        Ok(directory)
    }

    /// Loads a directory document from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| crate::errors::ProxyError::Directory(e.to_string()))?;
        Self::from_json(&raw)
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl ClientDirectory for MemoryDirectory {
    async fn lookup(&self, dn: &str) -> Result<Lookup> {
        let key = match dn::canonicalize(dn) {
            Ok(key) => key,
            Err(_) => {
                debug!(dn, "unparseable bind DN; treating as unregistered");
                return Ok(Lookup::NotFound);
            }
        };

        match self.clients.get(&key) {
            Some((client, backends)) => Ok(Lookup::Found {
                client: client.clone(),
                backends: backends.clone(),
            }),
            None => Ok(Lookup::NotFound),
        }
    }
}
