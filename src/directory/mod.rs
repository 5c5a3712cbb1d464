//! The proxy's client directory.
//!
//! A lookup service from client DN to credential record and authorized
//! backend set. The merger depends only on the [`ClientDirectory`] trait;
//! the backing store is pluggable. [`MemoryDirectory`] ships as the
//! in-process implementation and can be loaded from a JSON document holding
//! the two persisted collections (`servers`, `clients`).

pub mod entry;
pub mod memory;

use crate::errors::Result;
use async_trait::async_trait;

pub use entry::{ClientEntry, ServerEntry};
pub use memory::MemoryDirectory;

/// Outcome of a successful directory query.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// The DN is registered; `backends` is the ordered set of servers the
    /// client is authorized to fan out over.
    Found {
        client: ClientEntry,
        backends: Vec<ServerEntry>,
    },
    /// The DN is not registered with the proxy.
    NotFound,
}

/// Lookup capability over the registered-client store.
///
/// `Err(_)` signals a backing-store failure, which callers must keep
/// distinct from [`Lookup::NotFound`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn lookup(&self, dn: &str) -> Result<Lookup>;
}
