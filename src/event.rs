//! Operation events. Every request a connection issues becomes exactly one
//! of these typed events, built once at the head of the interceptor chain
//! and carried through it. The common `Event` core holds what all
//! operations share: a weak back reference to the originating session, the
//! target dn, the request and response controls, and the chain resume
//! cursor. The typed wrappers add the per operation parameters.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use smartstring::alias::String as AttrString;

use crate::dn::{Dn, Rdn};
use crate::entry::Entry;
use crate::error::OperationError;
use crate::filter::FilterNode;
use crate::modify::ModifyList;
use crate::session::Session;
use crate::value::AttributeValue;

/// The operation kinds of the ldap protocol set. ModifyDn requests are
/// split into their rename/move forms before they reach the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Add,
    Delete,
    Modify,
    Rename,
    Move,
    MoveAndRename,
    Search,
    Compare,
    Bind,
    Unbind,
    Abandon,
    Extended,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An ldap control: an oid, a criticality flag, and an opaque payload the
/// codec layer owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub oid: String,
    pub criticality: bool,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
    // Subtree excluding the base entry itself.
    Subordinate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DerefAliases {
    Never,
    Searching,
    Finding,
    Always,
}

/// The shared core of every operation event.
#[derive(Debug, Clone)]
pub struct Event {
    session: Weak<Session>,
    dn: Dn,
    pub request_controls: Vec<Control>,
    pub response_controls: Vec<Control>,
    op_type: OperationType,
    // True when this event is a side effect of another operation, such as
    // a referential integrity fixup after a delete.
    collateral: bool,
    pub(crate) collateral_depth: usize,
    pub(crate) next_interceptor: usize,
}

impl Event {
    pub fn new(session: &Arc<Session>, op_type: OperationType, dn: Dn) -> Self {
        Event {
            session: Arc::downgrade(session),
            dn,
            request_controls: Vec::with_capacity(0),
            response_controls: Vec::with_capacity(0),
            op_type,
            collateral: false,
            collateral_depth: 0,
            next_interceptor: 0,
        }
    }

    /// Derive the core of a collateral sub operation: same session, one
    /// level deeper, cursor reset so the chain re-enters from the top.
    pub fn new_collateral(parent: &Event, op_type: OperationType, dn: Dn) -> Self {
        Event {
            session: parent.session.clone(),
            dn,
            request_controls: Vec::with_capacity(0),
            response_controls: Vec::with_capacity(0),
            op_type,
            collateral: true,
            collateral_depth: parent.collateral_depth + 1,
            next_interceptor: 0,
        }
    }

    /// The originating session. Fails if the connection has already been
    /// torn down.
    pub fn session(&self) -> Result<Arc<Session>, OperationError> {
        self.session.upgrade().ok_or(OperationError::SessionExpired)
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    pub fn op_type(&self) -> OperationType {
        self.op_type
    }

    pub fn is_collateral(&self) -> bool {
        self.collateral
    }

    pub fn add_request_control(&mut self, control: Control) {
        self.request_controls.push(control);
    }

    pub fn add_response_control(&mut self, control: Control) {
        self.response_controls.push(control);
    }
}

#[derive(Debug, Clone)]
pub struct AddEvent {
    pub event: Event,
    pub entry: Entry,
}

impl AddEvent {
    pub fn new(session: &Arc<Session>, entry: Entry) -> Self {
        AddEvent {
            event: Event::new(session, OperationType::Add, entry.dn().clone()),
            entry,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeleteEvent {
    pub event: Event,
}

impl DeleteEvent {
    pub fn new(session: &Arc<Session>, dn: Dn) -> Self {
        DeleteEvent {
            event: Event::new(session, OperationType::Delete, dn),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModifyEvent {
    pub event: Event,
    pub modlist: ModifyList,
}

impl ModifyEvent {
    pub fn new(session: &Arc<Session>, dn: Dn, modlist: ModifyList) -> Self {
        ModifyEvent {
            event: Event::new(session, OperationType::Modify, dn),
            modlist,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenameEvent {
    pub event: Event,
    pub new_rdn: Rdn,
    pub delete_old_rdn: bool,
}

#[derive(Debug, Clone)]
pub struct MoveEvent {
    pub event: Event,
    pub new_superior: Dn,
}

#[derive(Debug, Clone)]
pub struct MoveAndRenameEvent {
    pub event: Event,
    pub new_superior: Dn,
    pub new_rdn: Rdn,
    pub delete_old_rdn: bool,
}

#[derive(Debug, Clone)]
pub struct SearchEvent {
    pub event: Event,
    pub scope: SearchScope,
    pub filter: FilterNode,
    // Zero means unlimited.
    pub size_limit: usize,
    // Seconds, zero means unlimited. Enforced by the backend.
    pub time_limit: usize,
    pub deref_aliases: DerefAliases,
    // Empty means all user attributes.
    pub returning_attributes: Vec<AttrString>,
    pub types_only: bool,
}

impl SearchEvent {
    pub fn new(session: &Arc<Session>, base: Dn, scope: SearchScope, filter: FilterNode) -> Self {
        SearchEvent {
            event: Event::new(session, OperationType::Search, base),
            scope,
            filter,
            size_limit: 0,
            time_limit: 0,
            deref_aliases: DerefAliases::Never,
            returning_attributes: Vec::with_capacity(0),
            types_only: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompareEvent {
    pub event: Event,
    pub attr: AttrString,
    pub assertion_value: AttributeValue,
}

impl CompareEvent {
    pub fn new(
        session: &Arc<Session>,
        dn: Dn,
        attr: &str,
        assertion_value: AttributeValue,
    ) -> Self {
        CompareEvent {
            event: Event::new(session, OperationType::Compare, dn),
            attr: attr.into(),
            assertion_value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BindEvent {
    pub event: Event,
    // Opaque credential material, interpreted by the authentication layer.
    pub credentials: Vec<u8>,
    pub sasl_mechanism: Option<String>,
}

impl BindEvent {
    pub fn new(session: &Arc<Session>, dn: Dn, credentials: Vec<u8>) -> Self {
        BindEvent {
            event: Event::new(session, OperationType::Bind, dn),
            credentials,
            sasl_mechanism: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnbindEvent {
    pub event: Event,
}

impl UnbindEvent {
    pub fn new(session: &Arc<Session>) -> Self {
        UnbindEvent {
            event: Event::new(session, OperationType::Unbind, Dn::empty()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AbandonEvent {
    pub event: Event,
    // The message id of the operation to abandon.
    pub abandoned_id: i32,
}

impl AbandonEvent {
    pub fn new(session: &Arc<Session>, abandoned_id: i32) -> Self {
        AbandonEvent {
            event: Event::new(session, OperationType::Abandon, Dn::empty()),
            abandoned_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtendedEvent {
    pub event: Event,
    pub request_oid: String,
    pub request_value: Option<Vec<u8>>,
}

impl ExtendedEvent {
    pub fn new(session: &Arc<Session>, request_oid: &str, request_value: Option<Vec<u8>>) -> Self {
        ExtendedEvent {
            event: Event::new(session, OperationType::Extended, Dn::empty()),
            request_oid: request_oid.to_string(),
            request_value,
        }
    }
}

/// The sum the chain dispatches over.
#[derive(Debug, Clone)]
pub enum OpEvent {
    Add(AddEvent),
    Delete(DeleteEvent),
    Modify(ModifyEvent),
    Rename(RenameEvent),
    Move(MoveEvent),
    MoveAndRename(MoveAndRenameEvent),
    Search(SearchEvent),
    Compare(CompareEvent),
    Bind(BindEvent),
    Unbind(UnbindEvent),
    Abandon(AbandonEvent),
    Extended(ExtendedEvent),
}

impl OpEvent {
    pub fn event(&self) -> &Event {
        match self {
            OpEvent::Add(e) => &e.event,
            OpEvent::Delete(e) => &e.event,
            OpEvent::Modify(e) => &e.event,
            OpEvent::Rename(e) => &e.event,
            OpEvent::Move(e) => &e.event,
            OpEvent::MoveAndRename(e) => &e.event,
            OpEvent::Search(e) => &e.event,
            OpEvent::Compare(e) => &e.event,
            OpEvent::Bind(e) => &e.event,
            OpEvent::Unbind(e) => &e.event,
            OpEvent::Abandon(e) => &e.event,
            OpEvent::Extended(e) => &e.event,
        }
    }

    pub fn event_mut(&mut self) -> &mut Event {
        match self {
            OpEvent::Add(e) => &mut e.event,
            OpEvent::Delete(e) => &mut e.event,
            OpEvent::Modify(e) => &mut e.event,
            OpEvent::Rename(e) => &mut e.event,
            OpEvent::Move(e) => &mut e.event,
            OpEvent::MoveAndRename(e) => &mut e.event,
            OpEvent::Search(e) => &mut e.event,
            OpEvent::Compare(e) => &mut e.event,
            OpEvent::Bind(e) => &mut e.event,
            OpEvent::Unbind(e) => &mut e.event,
            OpEvent::Abandon(e) => &mut e.event,
            OpEvent::Extended(e) => &mut e.event,
        }
    }

    pub fn op_type(&self) -> OperationType {
        self.event().op_type()
    }
}
