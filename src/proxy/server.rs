//! The LDAP front-end.
//!
//! Terminates client sessions over TCP, decodes PDUs with the
//! `ldap3_proto` codec, and drives the dispatcher. One task per inbound
//! session; requests are handled in arrival order, so replies preserve the
//! client's request order.

use crate::config::ProxyConfig;
use crate::directory::ClientDirectory;
use crate::errors::Result;
use crate::proxy::backend::{ldap_connector_factory, ConnectorFactory};
use crate::proxy::dispatcher::{disconnect_notice, dispatch, Dispatch};
use crate::proxy::session::SessionContext;
use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use ldap3_proto::proto::LdapResultCode;
use ldap3_proto::LdapCodec;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

/// The merging proxy server.
pub struct ProxyServer {
    config: ProxyConfig,
    directory: Arc<dyn ClientDirectory>,
    factory: ConnectorFactory,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig, directory: Arc<dyn ClientDirectory>) -> Self {
        Self {
            config,
            directory,
            factory: ldap_connector_factory(),
        }
    }

    /// Binds the configured listen address and serves until the listener
    /// fails.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        info!(addr = %self.config.listen_addr(), "proxy listening");
        self.serve_on(listener).await
    }

    /// Serves on an already-bound listener.
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        let server = Arc::new(self);
        loop {
            let (socket, peer) = listener.accept().await?;
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                server.client_session(socket, peer).await;
            });
        }
    }

    async fn client_session(&self, socket: TcpStream, peer: SocketAddr) {
        debug!(%peer, "client connected");

        let (read_half, write_half) = socket.into_split();
        let mut requests = FramedRead::new(read_half, LdapCodec::new(self.config.max_ber_size));
        let mut replies = FramedWrite::new(write_half, LdapCodec::new(self.config.max_ber_size));

        let mut session = SessionContext::new(self.config.deadline());

        while let Some(frame) = requests.next().await {
            let msg = match frame {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(%peer, "malformed PDU: {}", e);
                    let notice =
                        disconnect_notice(LdapResultCode::ProtocolError, "malformed PDU");
                    let _ = replies.send(notice).await;
                    break;
                }
            };

            match dispatch(self.directory.as_ref(), &self.factory, &mut session, msg).await {
                Dispatch::Reply(msgs) => {
                    let mut sink_gone = false;
                    for reply in msgs {
                        if replies.send(reply).await.is_err() {
                            warn!(%peer, "client went away mid-reply");
                            sink_gone = true;
                            break;
                        }
                    }
                    if sink_gone {
                        break;
                    }
                }
                Dispatch::Quit => break,
                Dispatch::Fatal(reply) => {
                    let _ = replies.send(reply).await;
                    break;
                }
            }
        }

        // Guaranteed teardown on every exit path.
        session.close().await;
        debug!(%peer, "session closed");
    }
}

#[cfg(test)]
mod tests {
    //! End-to-end scenarios: a real proxy over loopback TCP, scripted mock
    //! backend servers behind it, and `ldap3` as the test client.

    use super::*;
    use crate::crypto::{hash_password, HashMethod};
    use crate::directory::{ClientEntry, Lookup, MemoryDirectory, ServerEntry};
    use crate::errors::ProxyError;
    use async_trait::async_trait;
    use ldap3::{LdapConnAsync, Mod, Scope, SearchEntry};
    use ldap3_proto::proto::{
        LdapBindResponse, LdapMsg, LdapOp, LdapPartialAttribute, LdapResult,
        LdapSearchResultEntry,
    };
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    const CLIENT_DN: &str = "cn=client,dc=example,dc=org";
    const CLIENT_PW: &str = "clientpassword";
    const PROXY_DN: &str = "cn=proxy,dc=example,dc=org";

    #[derive(Clone, Copy, Debug)]
    enum MockBehavior {
        AcceptBind,
        RejectBind,
        UnresponsiveBind,
        SimpleSearch,
        UnresponsiveSearch,
    }

    /// Observed traffic at one mock backend.
    #[derive(Default)]
    struct BackendTraffic {
        connections: AtomicUsize,
        binds: AtomicUsize,
        bind_dns: Mutex<Vec<String>>,
    }

    fn ldap_result(code: LdapResultCode) -> LdapResult {
        LdapResult {
            code,
            matcheddn: String::new(),
            message: String::new(),
            referral: vec![],
        }
    }

    fn bob_entry() -> LdapSearchResultEntry {
        LdapSearchResultEntry {
            dn: "cn=Bob,dc=example,dc=org".to_string(),
            attributes: vec![
                LdapPartialAttribute {
                    atype: "cn".to_string(),
                    vals: vec![b"Bob".to_vec()],
                },
                LdapPartialAttribute {
                    atype: "sn".to_string(),
                    vals: vec![b"Bobby".to_vec()],
                },
                LdapPartialAttribute {
                    atype: "mail".to_string(),
                    vals: vec![b"bob@example.com".to_vec()],
                },
            ],
        }
    }

    async fn serve_mock(
        socket: TcpStream,
        behavior: MockBehavior,
        traffic: Arc<BackendTraffic>,
    ) {
        let (read_half, write_half) = socket.into_split();
        let mut requests = FramedRead::new(read_half, LdapCodec::new(None));
        let mut replies = FramedWrite::new(write_half, LdapCodec::new(None));

        while let Some(Ok(msg)) = requests.next().await {
            match msg.op {
                LdapOp::BindRequest(request) => {
                    traffic.binds.fetch_add(1, Ordering::SeqCst);
                    traffic.bind_dns.lock().unwrap().push(request.dn.clone());

                    let code = match behavior {
                        MockBehavior::RejectBind => LdapResultCode::InvalidCredentials,
                        MockBehavior::UnresponsiveBind => continue,
                        _ => LdapResultCode::Success,
                    };
                    let reply = LdapMsg {
                        msgid: msg.msgid,
                        op: LdapOp::BindResponse(LdapBindResponse {
                            res: ldap_result(code),
                            saslcreds: None,
                        }),
                        ctrl: vec![],
                    };
                    if replies.send(reply).await.is_err() {
                        break;
                    }
                }
                LdapOp::SearchRequest(_) => {
                    if matches!(behavior, MockBehavior::UnresponsiveSearch) {
                        continue;
                    }
                    if matches!(behavior, MockBehavior::SimpleSearch) {
                        let entry = LdapMsg {
                            msgid: msg.msgid,
                            op: LdapOp::SearchResultEntry(bob_entry()),
                            ctrl: vec![],
                        };
                        if replies.send(entry).await.is_err() {
                            break;
                        }
                    }
                    let done = LdapMsg {
                        msgid: msg.msgid,
                        op: LdapOp::SearchResultDone(ldap_result(LdapResultCode::Success)),
                        ctrl: vec![],
                    };
                    if replies.send(done).await.is_err() {
                        break;
                    }
                }
                LdapOp::UnbindRequest => break,
                _ => break,
            }
        }
    }

    /// Starts a scripted backend on an ephemeral port.
    async fn start_backend(behavior: MockBehavior) -> (SocketAddr, Arc<BackendTraffic>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let traffic = Arc::new(BackendTraffic::default());

        let observed = Arc::clone(&traffic);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                observed.connections.fetch_add(1, Ordering::SeqCst);
                let observed = Arc::clone(&observed);
                tokio::spawn(serve_mock(socket, behavior, observed));
            }
        });

        (addr, traffic)
    }

    fn server_entry(addr: SocketAddr) -> ServerEntry {
        ServerEntry::new(
            "127.0.0.1",
            addr.port(),
            "dc=example,dc=org",
            PROXY_DN,
            "proxypassword",
        )
    }

    fn one_client_directory(backends: Vec<ServerEntry>) -> MemoryDirectory {
        let mut directory = MemoryDirectory::new();
        directory.insert(
            ClientEntry::new(CLIENT_DN, hash_password(CLIENT_PW, HashMethod::Ssha).unwrap()),
            backends,
        );
        directory
    }

    /// A directory whose backing store is down.
    struct FailingDirectory;

    #[async_trait]
    impl ClientDirectory for FailingDirectory {
        async fn lookup(&self, _dn: &str) -> crate::errors::Result<Lookup> {
            Err(ProxyError::Directory("backing store offline".into()))
        }
    }

    async fn start_proxy(
        directory: Arc<dyn ClientDirectory>,
        deadline_ms: u64,
    ) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = ProxyConfig {
            listen_host: "127.0.0.1".into(),
            listen_port: addr.port(),
            per_op_deadline_ms: deadline_ms,
            ..Default::default()
        };

        let server = ProxyServer::new(config, directory);
        tokio::spawn(async move {
            let _ = server.serve_on(listener).await;
        });

        addr
    }

    async fn connect(proxy: SocketAddr) -> ldap3::Ldap {
        let (conn, ldap) = LdapConnAsync::new(&format!("ldap://{}", proxy))
            .await
            .unwrap();
        tokio::spawn(async move {
            let _ = conn.drive().await;
        });
        ldap
    }

    #[tokio::test]
    async fn test_registered_client_should_bind() {
        let (addr_a, traffic_a) = start_backend(MockBehavior::AcceptBind).await;
        let (addr_b, traffic_b) = start_backend(MockBehavior::AcceptBind).await;
        let directory =
            one_client_directory(vec![server_entry(addr_a), server_entry(addr_b)]);
        let proxy = start_proxy(Arc::new(directory), 1000).await;

        let mut ldap = connect(proxy).await;
        let res = ldap.simple_bind(CLIENT_DN, CLIENT_PW).await.unwrap();
        assert_eq!(res.rc, 0);

        // Authentication isolation: each backend saw the proxy identity,
        // never the client's.
        for traffic in [&traffic_a, &traffic_b] {
            let dns = traffic.bind_dns.lock().unwrap().clone();
            assert_eq!(dns, vec![PROXY_DN.to_string()]);
        }
    }

    #[tokio::test]
    async fn test_unregistered_client_should_not_bind() {
        let (addr_a, traffic_a) = start_backend(MockBehavior::AcceptBind).await;
        let (addr_b, traffic_b) = start_backend(MockBehavior::AcceptBind).await;
        let directory =
            one_client_directory(vec![server_entry(addr_a), server_entry(addr_b)]);
        let proxy = start_proxy(Arc::new(directory), 1000).await;

        let mut ldap = connect(proxy).await;
        let res = ldap
            .simple_bind("cn=worng,dc=example,dc=org", "wrongpassword")
            .await
            .unwrap();
        assert_eq!(res.rc, 49);

        // No bind PDU reached either backend.
        assert_eq!(traffic_a.connections.load(Ordering::SeqCst), 0);
        assert_eq!(traffic_b.connections.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bind_should_fail_when_one_server_is_unavailable() {
        let (addr_a, _) = start_backend(MockBehavior::AcceptBind).await;
        let (addr_b, _) = start_backend(MockBehavior::UnresponsiveBind).await;
        let directory =
            one_client_directory(vec![server_entry(addr_a), server_entry(addr_b)]);
        let proxy = start_proxy(Arc::new(directory), 1000).await;

        let mut ldap = connect(proxy).await;
        let started = Instant::now();
        let res = ldap.simple_bind(CLIENT_DN, CLIENT_PW).await.unwrap();

        assert_eq!(res.rc, 52);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_search_should_be_executed_on_all_servers() {
        let (addr_a, _) = start_backend(MockBehavior::SimpleSearch).await;
        let (addr_b, _) = start_backend(MockBehavior::SimpleSearch).await;
        let directory =
            one_client_directory(vec![server_entry(addr_a), server_entry(addr_b)]);
        let proxy = start_proxy(Arc::new(directory), 1000).await;

        let mut ldap = connect(proxy).await;
        let res = ldap.simple_bind(CLIENT_DN, CLIENT_PW).await.unwrap();
        assert_eq!(res.rc, 0);

        let (entries, res) = ldap
            .search(
                "dc=example,dc=org",
                Scope::Subtree,
                "(objectClass=*)",
                Vec::<&str>::new(),
            )
            .await
            .unwrap()
            .success()
            .unwrap();
        assert_eq!(res.rc, 0);
        assert_eq!(entries.len(), 2);

        for entry in entries {
            let entry = SearchEntry::construct(entry);
            assert_eq!(entry.attrs["cn"], vec!["Bob".to_string()]);
            assert_eq!(entry.attrs["sn"], vec!["Bobby".to_string()]);
            assert_eq!(entry.attrs["mail"], vec!["bob@example.com".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_search_should_fail_when_one_server_is_unavailable() {
        let (addr_a, _) = start_backend(MockBehavior::SimpleSearch).await;
        let (addr_b, _) = start_backend(MockBehavior::UnresponsiveSearch).await;
        let directory =
            one_client_directory(vec![server_entry(addr_a), server_entry(addr_b)]);
        let proxy = start_proxy(Arc::new(directory), 1000).await;

        let mut ldap = connect(proxy).await;
        let res = ldap.simple_bind(CLIENT_DN, CLIENT_PW).await.unwrap();
        assert_eq!(res.rc, 0);

        let started = Instant::now();
        let result = ldap
            .search(
                "dc=example,dc=org",
                Scope::Subtree,
                "(objectClass=*)",
                Vec::<&str>::new(),
            )
            .await
            .unwrap();

        // Single failure response, no partial entries.
        assert_eq!(result.1.rc, 52);
        assert!(result.0.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_only_read_operations_should_be_allowed() {
        let (addr_a, traffic_a) = start_backend(MockBehavior::AcceptBind).await;
        let (addr_b, traffic_b) = start_backend(MockBehavior::AcceptBind).await;
        let directory =
            one_client_directory(vec![server_entry(addr_a), server_entry(addr_b)]);
        let proxy = start_proxy(Arc::new(directory), 1000).await;

        let mut ldap = connect(proxy).await;

        let res = ldap.delete(CLIENT_DN).await.unwrap();
        assert_eq!(res.rc, 53);

        let mods = vec![Mod::Replace(
            "description".to_string(),
            HashSet::from(["updated".to_string()]),
        )];
        let res = ldap.modify(CLIENT_DN, mods).await.unwrap();
        assert_eq!(res.rc, 53);

        // Repeating a refusal changes nothing either.
        let res = ldap.delete(CLIENT_DN).await.unwrap();
        assert_eq!(res.rc, 53);

        // No TCP traffic toward any backend.
        assert_eq!(traffic_a.connections.load(Ordering::SeqCst), 0);
        assert_eq!(traffic_b.connections.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_request_should_fail_when_database_is_unavailable() {
        let proxy = start_proxy(Arc::new(FailingDirectory), 1000).await;

        let mut ldap = connect(proxy).await;
        let res = ldap.simple_bind(CLIENT_DN, CLIENT_PW).await.unwrap();
        assert_eq!(res.rc, 52);
    }

    #[tokio::test]
    async fn test_search_before_bind_is_refused() {
        let (addr_a, traffic_a) = start_backend(MockBehavior::SimpleSearch).await;
        let directory = one_client_directory(vec![server_entry(addr_a)]);
        let proxy = start_proxy(Arc::new(directory), 1000).await;

        let mut ldap = connect(proxy).await;
        let result = ldap
            .search(
                "dc=example,dc=org",
                Scope::Subtree,
                "(objectClass=*)",
                Vec::<&str>::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.1.rc, 50);
        assert!(result.0.is_empty());
        assert_eq!(traffic_a.connections.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rebind_is_a_fresh_credential_gate() {
        let (addr_a, _) = start_backend(MockBehavior::SimpleSearch).await;
        let directory = one_client_directory(vec![server_entry(addr_a)]);
        let proxy = start_proxy(Arc::new(directory), 1000).await;

        let mut ldap = connect(proxy).await;
        let res = ldap.simple_bind(CLIENT_DN, CLIENT_PW).await.unwrap();
        assert_eq!(res.rc, 0);

        // A failed re-bind resets the session to unbound.
        let res = ldap.simple_bind(CLIENT_DN, "wrongpassword").await.unwrap();
        assert_eq!(res.rc, 49);

        let result = ldap
            .search(
                "dc=example,dc=org",
                Scope::Subtree,
                "(objectClass=*)",
                Vec::<&str>::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.1.rc, 50);
    }
}
