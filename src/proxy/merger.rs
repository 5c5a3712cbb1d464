//! The fan-out merger.
//!
//! Issues one operation to every backend of a session in parallel under a
//! shared deadline, then folds the per-backend outcomes into a single LDAP
//! result under the consistency-over-availability rule: merged success
//! requires every backend to succeed; any failure fails the whole
//! operation.

use crate::directory::{ClientDirectory, Lookup};
use crate::proxy::backend::{Backend, BackendOutcome, ConnectorFactory, TransportKind};
use crate::proxy::operations::{Entry, SearchSpec};
use crate::proxy::session::SessionContext;
use futures_util::future::join_all;
use ldap3_proto::proto::LdapResultCode;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Single reply produced by a merged operation.
#[derive(Debug, Clone, PartialEq)]
pub enum MergedResult<T> {
    Ok(T),
    Fail(LdapResultCode),
}

/// Merged Bind: credential gate against the client directory, then a
/// parallel proxy-credential bind on every authorized backend.
///
/// A re-bind on a bound session is a fresh gate: `bound_as` is cleared and
/// the previous connectors are torn down before anything else happens.
#[instrument(skip_all, fields(dn = %dn))]
pub async fn merge_bind(
    directory: &dyn ClientDirectory,
    factory: &ConnectorFactory,
    session: &mut SessionContext,
    dn: &str,
    password: &str,
) -> MergedResult<()> {
    session.bound_as = None;
    session.reset_backends().await;

    let lookup = match directory.lookup(dn).await {
        Ok(lookup) => lookup,
        Err(e) => {
            warn!("client directory lookup failed: {}", e);
            return MergedResult::Fail(LdapResultCode::Unavailable);
        }
    };

    let (client, backends) = match lookup {
        Lookup::Found { client, backends } => (client, backends),
        Lookup::NotFound => {
            debug!("bind DN not registered");
            return MergedResult::Fail(LdapResultCode::InvalidCredentials);
        }
    };

    match client.credential.verify(password) {
        Ok(true) => {}
        Ok(false) => {
            debug!("credential mismatch");
            return MergedResult::Fail(LdapResultCode::InvalidCredentials);
        }
        Err(e) => {
            // A corrupt stored record must not authenticate anyone.
            warn!("credential record unusable: {}", e);
            return MergedResult::Fail(LdapResultCode::InvalidCredentials);
        }
    }

    let deadline = session.deadline;
    session.backends = backends
        .iter()
        .map(|server| factory(server, deadline))
        .collect();

    let outcomes = fanout_bind(&mut session.backends, deadline).await;
    match consolidate(outcomes) {
        Ok(_) => {
            session.bound_as = Some(dn.to_string());
            MergedResult::Ok(())
        }
        Err(code) => MergedResult::Fail(code),
    }
}

/// Merged Search across the session's backend set. Entries are concatenated
/// in backend-declaration order; within one backend, arrival order is kept.
#[instrument(skip_all, fields(base = %spec.base, filter = %spec.filter))]
pub async fn merge_search(
    session: &mut SessionContext,
    spec: &SearchSpec,
) -> MergedResult<Vec<Entry>> {
    let deadline = session.deadline;
    let outcomes = fanout_search(&mut session.backends, spec, deadline).await;

    match consolidate(outcomes) {
        Ok(per_backend) => {
            let entries: Vec<Entry> = per_backend.into_iter().flatten().collect();
            warn_on_duplicate_dns(&entries);
            debug!("merged {} entries", entries.len());
            MergedResult::Ok(entries)
        }
        Err(code) => MergedResult::Fail(code),
    }
}

/// One concurrent bind per backend, each bounded by the shared deadline.
/// Futures still pending at expiry are dropped and recorded as timeouts.
async fn fanout_bind(
    backends: &mut [Box<dyn Backend>],
    deadline: Duration,
) -> Vec<BackendOutcome<()>> {
    join_all(backends.iter_mut().map(|backend| async move {
        match tokio::time::timeout(deadline, backend.ensure_bound()).await {
            Ok(outcome) => outcome,
            Err(_) => BackendOutcome::Transport(TransportKind::Timeout),
        }
    }))
    .await
}

/// One concurrent search per backend. The memoized bind and the search
/// share the deadline budget, matching the connect-plus-operation bound.
async fn fanout_search(
    backends: &mut [Box<dyn Backend>],
    spec: &SearchSpec,
    deadline: Duration,
) -> Vec<BackendOutcome<Vec<Entry>>> {
    join_all(backends.iter_mut().map(|backend| async move {
        let op = async {
            match backend.ensure_bound().await {
                BackendOutcome::Ok(()) => backend.search(spec).await,
                BackendOutcome::LdapError { code, diagnostic } => {
                    BackendOutcome::LdapError { code, diagnostic }
                }
                BackendOutcome::Transport(kind) => BackendOutcome::Transport(kind),
            }
        };
        match tokio::time::timeout(deadline, op).await {
            Ok(outcome) => outcome,
            Err(_) => BackendOutcome::Transport(TransportKind::Timeout),
        }
    }))
    .await
}

/// Applies the consistency rule. Failure precedence:
/// any transport failure wins, then the first protocol error in backend
/// order, then (should not occur) `other`.
fn consolidate<T>(outcomes: Vec<BackendOutcome<T>>) -> Result<Vec<T>, LdapResultCode> {
    let mut payloads = Vec::with_capacity(outcomes.len());
    let mut first_ldap_code: Option<u32> = None;
    let mut transport_failure = false;

    for outcome in outcomes {
        match outcome {
            BackendOutcome::Ok(payload) => payloads.push(payload),
            BackendOutcome::LdapError { code, .. } => {
                if first_ldap_code.is_none() {
                    first_ldap_code = Some(code);
                }
            }
            BackendOutcome::Transport(_) => transport_failure = true,
        }
    }

    if transport_failure {
        return Err(LdapResultCode::Unavailable);
    }
    if let Some(code) = first_ldap_code {
        return Err(backend_code(code));
    }
    Ok(payloads)
}

/// Maps a backend's numeric result code onto the code relayed to the
/// client. Codes outside the relayable set collapse to `other`.
fn backend_code(code: u32) -> LdapResultCode {
    match code {
        1 => LdapResultCode::OperationsError,
        2 => LdapResultCode::ProtocolError,
        3 => LdapResultCode::TimeLimitExceeded,
        4 => LdapResultCode::SizeLimitExceeded,
        16 => LdapResultCode::NoSuchAttribute,
        32 => LdapResultCode::NoSuchObject,
        34 => LdapResultCode::InvalidDNSyntax,
        48 => LdapResultCode::InappropriateAuthentication,
        49 => LdapResultCode::InvalidCredentials,
        50 => LdapResultCode::InsufficentAccessRights,
        51 => LdapResultCode::Busy,
        52 => LdapResultCode::Unavailable,
        53 => LdapResultCode::UnwillingToPerform,
        _ => LdapResultCode::Other,
    }
}

/// The proxy assumes disjoint backend namespaces and does not deduplicate;
/// it flags collisions so operators can spot overlapping trees.
fn warn_on_duplicate_dns(entries: &[Entry]) {
    let mut seen = HashSet::new();
    let duplicates = entries
        .iter()
        .filter(|entry| !seen.insert(entry.dn.as_str()))
        .count();
    if duplicates > 0 {
        warn!(
            duplicates,
            "merged result contains duplicate DNs; backend namespaces overlap"
        );
    }
}
