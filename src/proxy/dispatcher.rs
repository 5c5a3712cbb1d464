//! Per-request dispatch and policy enforcement.
//!
//! Classifies each decoded request, refuses everything the read-only policy
//! forbids before any backend I/O happens, and drives the merger for the
//! two honored operations.

use crate::directory::ClientDirectory;
use crate::proxy::backend::ConnectorFactory;
use crate::proxy::filter::render_filter;
use crate::proxy::merger::{merge_bind, merge_search, MergedResult};
use crate::proxy::operations::{SearchScope, SearchSpec};
use crate::proxy::session::SessionContext;
use ldap3_proto::proto::{
    LdapBindCred, LdapBindResponse, LdapExtendedResponse, LdapMsg, LdapOp, LdapResult,
    LdapResultCode,
};
use tracing::{debug, trace, warn};

/// RFC 4532 "Who am I?" extended operation.
const WHOAMI_OID: &str = "1.3.6.1.4.1.4203.1.11.3";

/// RFC 4511 Notice of Disconnection.
const DISCONNECT_OID: &str = "1.3.6.1.4.1.1466.20036";

/// What the session loop should do with a handled request.
#[derive(Debug)]
pub enum Dispatch {
    /// Send these replies (possibly none) and keep the session open.
    Reply(Vec<LdapMsg>),
    /// Tear the session down without further replies.
    Quit,
    /// Send this final message, then tear the session down.
    Fatal(LdapMsg),
}

/// Handles one decoded request on a session.
pub async fn dispatch(
    directory: &dyn ClientDirectory,
    factory: &ConnectorFactory,
    session: &mut SessionContext,
    msg: LdapMsg,
) -> Dispatch {
    let msgid = msg.msgid;
    match msg.op {
        LdapOp::BindRequest(request) => {
            let password = match &request.cred {
                LdapBindCred::Simple(password) => password.clone(),
                LdapBindCred::SASL(_) => {
                    return Dispatch::Reply(vec![bind_response(
                        msgid,
                        LdapResultCode::AuthMethodNotSupported,
                    )]);
                }
            };

            let outcome =
                merge_bind(directory, factory, session, &request.dn, &password).await;

            let code = match outcome {
                MergedResult::Ok(()) => LdapResultCode::Success,
                MergedResult::Fail(code) => code,
            };
            Dispatch::Reply(vec![bind_response(msgid, code)])
        }

        LdapOp::SearchRequest(request) => {
            if !session.is_bound() {
                debug!("refusing search on unbound session");
                return Dispatch::Reply(vec![search_done(
                    msgid,
                    LdapResultCode::InsufficentAccessRights,
                    "bind before searching",
                )]);
            }

            let spec = SearchSpec {
                base: request.base,
                scope: SearchScope::from_wire(&request.scope),
                filter: render_filter(&request.filter),
                attrs: request.attrs,
                size_limit: request.sizelimit,
                time_limit: request.timelimit,
            };

            match merge_search(session, &spec).await {
                MergedResult::Ok(entries) => {
                    let mut replies: Vec<LdapMsg> = entries
                        .into_iter()
                        .map(|entry| LdapMsg {
                            msgid,
                            op: LdapOp::SearchResultEntry(entry.into_result_entry()),
                            ctrl: vec![],
                        })
                        .collect();
                    replies.push(search_done(msgid, LdapResultCode::Success, ""));
                    Dispatch::Reply(replies)
                }
                // No partial entries: a failed merge is a single response.
                MergedResult::Fail(code) => {
                    Dispatch::Reply(vec![search_done(msgid, code, "merged search failed")])
                }
            }
        }

        // The read-only policy: mutations are refused before any backend
        // traffic, with the response op the request kind expects.
        LdapOp::AddRequest(_) => refuse(msgid, LdapOp::AddResponse(unwilling())),
        LdapOp::ModifyRequest(_) => refuse(msgid, LdapOp::ModifyResponse(unwilling())),
        LdapOp::DelRequest(_) => refuse(msgid, LdapOp::DelResponse(unwilling())),
        LdapOp::ModifyDNRequest(_) => refuse(msgid, LdapOp::ModifyDNResponse(unwilling())),
        LdapOp::CompareRequest(_) => refuse(msgid, LdapOp::CompareResult(unwilling())),

        LdapOp::ExtendedRequest(request) if request.name == WHOAMI_OID => {
            let authz = match &session.bound_as {
                Some(dn) => format!("dn: {}", dn),
                None => String::new(),
            };
            Dispatch::Reply(vec![LdapMsg {
                msgid,
                op: LdapOp::ExtendedResponse(LdapExtendedResponse {
                    res: result(LdapResultCode::Success, ""),
                    name: None,
                    value: Some(authz.into_bytes()),
                }),
                ctrl: vec![],
            }])
        }
        LdapOp::ExtendedRequest(request) => {
            debug!(oid = %request.name, "refusing extended operation");
            refuse(
                msgid,
                LdapOp::ExtendedResponse(LdapExtendedResponse {
                    res: unwilling(),
                    name: None,
                    value: None,
                }),
            )
        }

        LdapOp::AbandonRequest(_) => {
            // Operations are serialized per session; there is never an
            // in-flight request to abandon, and Abandon has no response.
            trace!("abandon is a no-op");
            Dispatch::Reply(vec![])
        }

        LdapOp::UnbindRequest => {
            debug!("client unbind");
            Dispatch::Quit
        }

        other => {
            warn!(?other, "unexpected PDU from client");
            Dispatch::Fatal(disconnect_notice(
                LdapResultCode::ProtocolError,
                "unexpected PDU",
            ))
        }
    }
}

/// Unsolicited Notice of Disconnection, sent before closing on protocol
/// violations.
pub fn disconnect_notice(code: LdapResultCode, message: &str) -> LdapMsg {
    LdapMsg {
        msgid: 0,
        op: LdapOp::ExtendedResponse(LdapExtendedResponse {
            res: result(code, message),
            name: Some(DISCONNECT_OID.to_string()),
            value: None,
        }),
        ctrl: vec![],
    }
}

fn refuse(msgid: i32, op: LdapOp) -> Dispatch {
    Dispatch::Reply(vec![LdapMsg {
        msgid,
        op,
        ctrl: vec![],
    }])
}

fn result(code: LdapResultCode, message: &str) -> LdapResult {
    LdapResult {
        code,
        matcheddn: String::new(),
        message: message.to_string(),
        referral: vec![],
    }
}

fn unwilling() -> LdapResult {
    result(LdapResultCode::UnwillingToPerform, "proxy is read-only")
}

fn bind_response(msgid: i32, code: LdapResultCode) -> LdapMsg {
    LdapMsg {
        msgid,
        op: LdapOp::BindResponse(LdapBindResponse {
            res: result(code, ""),
            saslcreds: None,
        }),
        ctrl: vec![],
    }
}

fn search_done(msgid: i32, code: LdapResultCode, message: &str) -> LdapMsg {
    LdapMsg {
        msgid,
        op: LdapOp::SearchResultDone(result(code, message)),
        ctrl: vec![],
    }
}
