//! Client admission
//!
//! Every accepted client connection passes through [`AdmissionController::admit`].
//! The session is stored, and so counted as a clone of its address, before
//! any check runs. A rejected session is quit through the session store,
//! which releases that count exactly once.

use crate::bancache::BanVerdict;
use crate::dns::{self, HostResolver};
use crate::handles::Multiplexer;
use crate::policy::{self, ClassScope};
use crate::state::ServerState;
use crate::utils::address;
use crate::xline::XLineType;
use crate::{Error, Message, MessageType, User};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Why a connection was refused. `Display` gives the quit reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// No allowing connect class
    AccessDenied,
    /// Local soft limit or hard cap reached
    ConnectionLimit,
    /// Handle outside the handle table
    ServerFull,
    /// Per-address cap of the connect class
    ClassLimit(ClassScope),
    /// Cached ban verdict; carries the cached reason
    Banned(String),
    /// Matched a network rule; carries the quit reason
    XLined(String),
    /// UID collision or multiplexer failure
    Internal,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::AccessDenied => write!(f, "Access denied by configuration"),
            RejectReason::ConnectionLimit => write!(f, "No more connections allowed"),
            RejectReason::ServerFull => write!(f, "Server is full"),
            RejectReason::ClassLimit(scope) => write!(
                f,
                "No more connections allowed from your host via this connect class ({})",
                scope
            ),
            RejectReason::Banned(reason) | RejectReason::XLined(reason) => write!(f, "{}", reason),
            RejectReason::Internal => write!(f, "Internal error handling connection"),
        }
    }
}

/// Outcome of [`AdmissionController::admit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted(String),
    Rejected(RejectReason),
}

/// A freshly accepted transport
#[derive(Debug)]
pub struct NewConnection {
    /// Index into the handle table
    pub handle: usize,
    /// Local port the client connected to
    pub local_port: u16,
    /// Outbound queue drained by the transport's writer task
    pub sender: mpsc::UnboundedSender<Message>,
}

/// Gatekeeper for new client connections
pub struct AdmissionController {
    state: Arc<ServerState>,
    multiplexer: Arc<dyn Multiplexer>,
    resolver: Option<Arc<dyn HostResolver>>,
}

impl AdmissionController {
    pub fn new(
        state: Arc<ServerState>,
        multiplexer: Arc<dyn Multiplexer>,
        resolver: Option<Arc<dyn HostResolver>>,
    ) -> Self {
        Self {
            state,
            multiplexer,
            resolver,
        }
    }

    /// Run a new connection from `ip:port` through the admission checks
    pub fn admit(&self, conn: NewConnection, ip: IpAddr, port: u16) -> Admission {
        let state = &self.state;
        let now = state.now();
        let ip = address::canonical(ip);
        let handle = conn.handle;
        let sender = conn.sender.clone();

        let uid = state.users.next_uid();
        let user = User::local(
            uid.clone(),
            state.server_name(),
            ip,
            port,
            address::display_host(ip),
            handle,
            conn.sender,
            now,
        );

        // Stored here, so counted as a clone from this point on
        if let Err(e) = state.users.insert(user) {
            match e {
                Error::DuplicateUid(ref dup) => {
                    tracing::error!("Duplicate UID {} allocated!", dup)
                }
                ref other => tracing::error!("Failed to store session for {}: {}", ip, other),
            }
            let reason = RejectReason::Internal;
            // The session never made it into the store; tell the client directly
            let _ = sender.send(
                Message::new(MessageType::Error, Vec::new())
                    .trailing(format!("Closing link: (unknown@{}) [{}]", ip, reason)),
            );
            return Admission::Rejected(reason);
        }
        tracing::debug!("New user {} from {}:{} on handle {}", uid, ip, port, handle);

        let Some(class) = policy::select_class(&state.config.classes, ip, conn.local_port) else {
            return self.reject(&uid, RejectReason::AccessDenied);
        };
        if let Err(reason) = policy::check_class(class, ip, state.clones()) {
            return self.reject(&uid, reason);
        }
        state.users.update(&uid, |user| user.class = Some(class.name.clone()));

        let local = state.users.local_count();
        let limits = &state.config.limits;
        if local > limits.soft_limit || local >= limits.max_clients {
            tracing::warn!("Soft limit reached: {} clients", limits.soft_limit);
            return self.reject(&uid, RejectReason::ConnectionLimit);
        }

        if handle >= self.multiplexer.capacity() {
            return self.reject(&uid, RejectReason::ServerFull);
        }

        let exempt = state
            .xlines
            .matches_user(XLineType::E, "", &address::display_host(ip), ip, now)
            .is_some();
        state.users.update(&uid, |user| user.exempt = exempt);

        match state.bancache.get(ip) {
            Some(BanVerdict::Banned { reason, .. }) if !exempt => {
                tracing::debug!("Ban cache: positive hit for {}", ip);
                if let Some(ref notice) = state.config.security.ban_notice {
                    if let Some(user) = state.users.get(&uid) {
                        user.send(
                            Message::notice(user.notice_target(), format!("*** {}", notice))
                                .source(state.server_name()),
                        );
                    }
                }
                return self.reject(&uid, RejectReason::Banned(reason));
            }
            Some(_) => tracing::debug!("Ban cache: negative hit for {}", ip),
            None if !exempt => {
                if let Some(line) = state.xlines.matches_ip(XLineType::Z, ip, now) {
                    let reason = state.xlines.apply(&line, ip, &state.bancache);
                    return self.reject(&uid, RejectReason::XLined(reason));
                }
            }
            None => {}
        }

        if !self.multiplexer.register(handle, &uid) {
            tracing::debug!("Internal error on new connection {}", uid);
            return self.reject(&uid, RejectReason::Internal);
        }

        if let Some(user) = state.users.get(&uid) {
            user.send(
                Message::notice("Auth", "*** Looking up your hostname...")
                    .source(state.server_name()),
            );
        }

        match self.resolver {
            Some(ref resolver) if state.config.security.enable_dns => {
                dns::spawn_lookup(state.clone(), resolver.clone(), uid.clone(), ip);
            }
            _ => {
                state.users.complete_dns(&uid, None);
            }
        }

        Admission::Admitted(uid)
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Tear down an admitted session: release its handle, then quit it
    pub fn disconnect(&self, uid: &str, reason: &str) -> Option<User> {
        let user = self.state.quit_user(uid, reason)?;
        if let Some(handle) = user.handle {
            self.multiplexer.unregister(handle);
        }
        Some(user)
    }

    fn reject(&self, uid: &str, reason: RejectReason) -> Admission {
        tracing::debug!("Rejecting {}: {}", uid, reason);
        self.state.quit_user(uid, &reason.to_string());
        Admission::Rejected(reason)
    }
}
