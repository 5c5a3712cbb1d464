//! # Cerberus
//!
//! A read-only merging LDAP proxy. Clients authenticate against the proxy's
//! own client directory; Bind and Search are fanned out to every backend
//! under per-backend proxy credentials and merged into one reply. Merged
//! success requires every backend to succeed within the per-operation
//! deadline; everything else fails the whole operation.
//!
//! This crate provides:
//! - The LDAP front-end, dispatcher, and fan-out merger
//! - Per-session backend connectors over `ldap3`
//! - A pluggable client directory with an in-memory/JSON implementation
//! - Credential records with salted-hash verification
//!
//! ## Example
//!
//! ```rust,no_run
//! use cerberus::config::ProxyConfig;
//! use cerberus::directory::MemoryDirectory;
//! use cerberus::proxy::ProxyServer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProxyConfig::from_env()?;
//!     let directory = match &config.directory_file {
//!         Some(path) => MemoryDirectory::from_file(path)?,
//!         None => MemoryDirectory::new(),
//!     };
//!
//!     ProxyServer::new(config, Arc::new(directory)).serve().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod directory;
pub mod dn;
pub mod errors;
pub mod proxy;

pub use errors::{ProxyError, Result};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
