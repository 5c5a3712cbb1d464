//! Backend connectors.
//!
//! Each connector owns a single outbound LDAP session to one backend for the
//! lifetime of one client session. Connectors are never shared across client
//! sessions. A failed proxy bind poisons the connector: the recorded failure
//! is replayed on every subsequent call without new I/O.

use crate::directory::ServerEntry;
use crate::proxy::operations::{Entry, SearchSpec};
use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, SearchEntry, SearchOptions};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Classified transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    ConnectRefused,
    Timeout,
    ConnectionReset,
    Decode,
}

impl TransportKind {
    fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => TransportKind::ConnectRefused,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportKind::Timeout,
            io::ErrorKind::InvalidData => TransportKind::Decode,
            _ => TransportKind::ConnectionReset,
        }
    }
}

/// Per-backend, per-operation outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOutcome<T> {
    /// The backend completed the operation with result code 0.
    Ok(T),
    /// The backend answered with a protocol-level error.
    LdapError { code: u32, diagnostic: String },
    /// The backend could not be reached, or the exchange broke down.
    Transport(TransportKind),
}

impl<T> BackendOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, BackendOutcome::Ok(_))
    }
}

/// A bind failure recorded by a poisoned connector.
#[derive(Debug, Clone, PartialEq)]
enum RecordedFailure {
    Ldap { code: u32, diagnostic: String },
    Transport(TransportKind),
}

impl RecordedFailure {
    fn replay<T>(&self) -> BackendOutcome<T> {
        match self {
            RecordedFailure::Ldap { code, diagnostic } => BackendOutcome::LdapError {
                code: *code,
                diagnostic: diagnostic.clone(),
            },
            RecordedFailure::Transport(kind) => BackendOutcome::Transport(*kind),
        }
    }
}

/// One outbound LDAP session to one backend.
///
/// Production and test implementations satisfy the same interface; the
/// merger only sees this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send {
    /// Ensures the connector holds a session bound with the backend's proxy
    /// credentials. Memoized: at most one bind is attempted per session, and
    /// a failure is replayed on every later call without new I/O.
    async fn ensure_bound(&mut self) -> BackendOutcome<()>;

    /// Runs a search on the backend. Requires a prior successful bind;
    /// entries are returned in arrival order.
    async fn search(&mut self, spec: &SearchSpec) -> BackendOutcome<Vec<Entry>>;

    /// Releases the outbound session. Best-effort and idempotent.
    async fn teardown(&mut self);

    /// `host:port` of the backend, for logs.
    fn endpoint(&self) -> String;
}

/// Builds connectors for a session's backend set.
pub type ConnectorFactory = Arc<dyn Fn(&ServerEntry, Duration) -> Box<dyn Backend> + Send + Sync>;

/// The production factory: one [`LdapBackend`] per server entry.
pub fn ldap_connector_factory() -> ConnectorFactory {
    Arc::new(|server, deadline| {
        let backend: Box<dyn Backend> = Box::new(LdapBackend::new(server.clone(), deadline));
        backend
    })
}

#[derive(Debug)]
enum BindState {
    Unbound,
    Bound,
    Poisoned(RecordedFailure),
}

/// Connector implementation over the `ldap3` async client.
pub struct LdapBackend {
    server: ServerEntry,
    deadline: Duration,
    ldap: Option<Ldap>,
    state: BindState,
}

impl LdapBackend {
    pub fn new(server: ServerEntry, deadline: Duration) -> Self {
        Self {
            server,
            deadline,
            ldap: None,
            state: BindState::Unbound,
        }
    }

    /// Opens the transport and binds with the proxy service account.
    #[instrument(skip(self), fields(backend = %self.server.endpoint()))]
    async fn bind_inner(&mut self) -> BackendOutcome<()> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.deadline);

        debug!("connecting to backend");
        let (conn, mut ldap) =
            match LdapConnAsync::with_settings(settings, &self.server.uri()).await {
                Ok(pair) => pair,
                Err(e) => return classify(e),
            };

        // Connection driver; exits when the Ldap handle is dropped.
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                debug!("backend connection driver terminated: {}", e);
            }
        });

        let bound = ldap
            .with_timeout(self.deadline)
            .simple_bind(&self.server.proxy_dn, self.server.proxy_password.expose())
            .await
            .and_then(|res| res.success());

        match bound {
            Ok(_) => {
                debug!("proxy bind successful");
                self.ldap = Some(ldap);
                BackendOutcome::Ok(())
            }
            Err(e) => classify(e),
        }
    }
}

#[async_trait]
impl Backend for LdapBackend {
    async fn ensure_bound(&mut self) -> BackendOutcome<()> {
        match &self.state {
            BindState::Bound => return BackendOutcome::Ok(()),
            BindState::Poisoned(failure) => return failure.replay(),
            BindState::Unbound => {}
        }

        let outcome = self.bind_inner().await;
        match &outcome {
            BackendOutcome::Ok(()) => self.state = BindState::Bound,
            BackendOutcome::LdapError { code, diagnostic } => {
                warn!(backend = %self.server.endpoint(), code, "proxy bind rejected");
                self.state = BindState::Poisoned(RecordedFailure::Ldap {
                    code: *code,
                    diagnostic: diagnostic.clone(),
                });
                self.ldap = None;
            }
            BackendOutcome::Transport(kind) => {
                warn!(backend = %self.server.endpoint(), ?kind, "proxy bind transport failure");
                self.state = BindState::Poisoned(RecordedFailure::Transport(*kind));
                self.ldap = None;
            }
        }
        outcome
    }

    #[instrument(skip(self, spec), fields(backend = %self.server.endpoint(), base = %spec.base))]
    async fn search(&mut self, spec: &SearchSpec) -> BackendOutcome<Vec<Entry>> {
        match &self.state {
            BindState::Poisoned(failure) => return failure.replay(),
            BindState::Unbound => {
                return BackendOutcome::LdapError {
                    code: 1,
                    diagnostic: "search issued before bind".into(),
                }
            }
            BindState::Bound => {}
        }

        let ldap = match self.ldap.as_mut() {
            Some(ldap) => ldap,
            None => return BackendOutcome::Transport(TransportKind::ConnectionReset),
        };

        let options = SearchOptions::new()
            .sizelimit(spec.size_limit)
            .timelimit(spec.time_limit);

        let result = ldap
            .with_timeout(self.deadline)
            .with_search_options(options)
            .search(
                &spec.base,
                spec.scope.into(),
                &spec.filter,
                spec.attrs.clone(),
            )
            .await
            .and_then(|res| res.success());

        match result {
            Ok((entries, _res)) => {
                let entries: Vec<Entry> = entries
                    .into_iter()
                    .map(|entry| Entry::from(SearchEntry::construct(entry)))
                    .collect();
                debug!("search returned {} entries", entries.len());
                BackendOutcome::Ok(entries)
            }
            // Partial entries already decoded are dropped with the error.
            Err(e) => classify(e),
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut ldap) = self.ldap.take() {
            if let Err(e) = ldap.unbind().await {
                debug!(backend = %self.server.endpoint(), "unbind on teardown failed: {}", e);
            }
        }
        self.state = BindState::Unbound;
    }

    fn endpoint(&self) -> String {
        self.server.endpoint()
    }
}

/// Maps an `ldap3` error into the connector outcome taxonomy.
fn classify<T>(err: ldap3::LdapError) -> BackendOutcome<T> {
    match err {
        ldap3::LdapError::LdapResult { result } => BackendOutcome::LdapError {
            code: result.rc,
            diagnostic: result.text,
        },
        ldap3::LdapError::Io { source } => {
            BackendOutcome::Transport(TransportKind::from_io(&source))
        }
        ldap3::LdapError::Timeout { .. } => BackendOutcome::Transport(TransportKind::Timeout),
        ldap3::LdapError::EndOfStream => {
            BackendOutcome::Transport(TransportKind::ConnectionReset)
        }
        _ => BackendOutcome::Transport(TransportKind::Decode),
    }
}
