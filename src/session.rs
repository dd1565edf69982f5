//! The session an operation originates from. Sessions are shared between
//! the network layer and every event spawned on behalf of the connection,
//! so they live behind an `Arc`; events hold only a weak back reference.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use uuid::Uuid;

use crate::event::Control;

/// Environment key consulted when a modify dn request does not state
/// whether the old rdn attribute should be kept.
pub const ENV_DELETE_OLD_RDN: &str = "delete-old-rdn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    // Server internal processing, bypasses access checks. Collateral
    // fixups run as this.
    Internal,
    // An authenticated connection.
    User { uuid: Uuid, spn: String },
}

#[derive(Debug)]
pub struct Session {
    session_id: Uuid,
    identity: Identity,
    // Controls supplied at bind time, visible to every operation on the
    // session.
    controls: Vec<Control>,
    // Set by an abandon request, polled by the chain at checkpoints.
    cancelled: AtomicBool,
    environment: HashMap<String, String>,
}

impl Session {
    pub fn new(identity: Identity) -> Arc<Self> {
        Arc::new(Session {
            session_id: Uuid::new_v4(),
            identity,
            controls: Vec::with_capacity(0),
            cancelled: AtomicBool::new(false),
            environment: HashMap::new(),
        })
    }

    pub fn new_internal() -> Arc<Self> {
        Self::new(Identity::Internal)
    }

    pub fn with_environment(
        identity: Identity,
        environment: HashMap<String, String>,
    ) -> Arc<Self> {
        Arc::new(Session {
            session_id: Uuid::new_v4(),
            identity,
            controls: Vec::with_capacity(0),
            cancelled: AtomicBool::new(false),
            environment,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.identity, Identity::Internal)
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn environment(&self, key: &str) -> Option<&str> {
        self.environment.get(key).map(String::as_str)
    }

    /// Request cancellation of in flight work on this session. Best
    /// effort: operations notice at their next checkpoint.
    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
