//! The backend nexus interface and the request dispatch helpers that sit
//! in front of the interceptor chain. The nexus is the storage engine the
//! chain terminates at; everything above it is backend agnostic.

use std::sync::Arc;

use crate::dn::{Dn, Rdn};
use crate::entry::Entry;
use crate::error::OperationError;
use crate::event::{
    Event, MoveAndRenameEvent, MoveEvent, OpEvent, OperationType, RenameEvent, SearchScope,
};
use crate::filter::FilterNode;
use crate::modify::ModifyList;
use crate::session::{Session, ENV_DELETE_OLD_RDN};
use crate::value::AttributeValue;

/// The storage engine surface the chain terminal consumes. Implementations
/// own consistency and indexing; errors they return surface to the caller
/// unchanged. Search results stream in the order the backend produces
/// them.
pub trait DirectoryNexus: Send + Sync {
    fn add(&self, entry: &Entry) -> Result<(), OperationError>;

    fn delete(&self, dn: &Dn) -> Result<(), OperationError>;

    fn modify(&self, dn: &Dn, modlist: &ModifyList) -> Result<(), OperationError>;

    fn rename(&self, dn: &Dn, new_rdn: &Rdn, delete_old_rdn: bool) -> Result<(), OperationError>;

    fn move_entry(&self, dn: &Dn, new_superior: &Dn) -> Result<(), OperationError>;

    fn lookup(&self, dn: &Dn) -> Result<Arc<Entry>, OperationError>;

    fn has_entry(&self, dn: &Dn) -> Result<bool, OperationError>;

    /// Immediate children of the named entry.
    fn list(&self, dn: &Dn) -> Result<Vec<Arc<Entry>>, OperationError>;

    fn search(
        &self,
        base: &Dn,
        scope: SearchScope,
        filter: &FilterNode,
    ) -> Result<Vec<Arc<Entry>>, OperationError>;

    fn compare(
        &self,
        dn: &Dn,
        attr: &str,
        value: &AttributeValue,
    ) -> Result<bool, OperationError>;
}

/// Split a modifydn request into the event the chain processes. Comparing
/// the old and new names decides the shape:
///
/// * same parent, different rdn: a pure rename.
/// * different parent, same rdn: a pure move.
/// * both different: the combined move and rename.
///
/// Rdn comparison is case insensitive. When the request does not say
/// whether the old rdn attribute value should be removed, the session
/// environment may decide; failing that it is removed.
pub fn dispatch_modify_dn(
    session: &Arc<Session>,
    old_dn: &Dn,
    new_dn: &Dn,
    delete_old_rdn: Option<bool>,
) -> Result<OpEvent, OperationError> {
    let old_rdn = old_dn
        .rdn()
        .ok_or_else(|| OperationError::InvalidDn("cannot rename the root dse".to_string()))?;
    let new_rdn = new_dn
        .rdn()
        .ok_or_else(|| OperationError::InvalidDn("cannot rename to the root dse".to_string()))?;

    let same_parent = old_dn.parent().eq_normalized(&new_dn.parent());
    let same_rdn = old_rdn.eq_normalized(new_rdn);
    let delete_old_rdn =
        delete_old_rdn.unwrap_or_else(|| delete_old_rdn_from_environment(session));

    let ev = if same_parent {
        // Includes the degenerate unchanged-name request, which is an
        // idempotent rename at the nexus.
        trace!(dn = %old_dn, new_rdn = %new_rdn, "modifydn resolves to rename");
        OpEvent::Rename(RenameEvent {
            event: Event::new(session, OperationType::Rename, old_dn.clone()),
            new_rdn: new_rdn.clone(),
            delete_old_rdn,
        })
    } else if same_rdn {
        trace!(dn = %old_dn, new_superior = %new_dn.parent(), "modifydn resolves to move");
        OpEvent::Move(MoveEvent {
            event: Event::new(session, OperationType::Move, old_dn.clone()),
            new_superior: new_dn.parent(),
        })
    } else {
        trace!(dn = %old_dn, new = %new_dn, "modifydn resolves to move and rename");
        OpEvent::MoveAndRename(MoveAndRenameEvent {
            event: Event::new(session, OperationType::MoveAndRename, old_dn.clone()),
            new_superior: new_dn.parent(),
            new_rdn: new_rdn.clone(),
            delete_old_rdn,
        })
    };
    Ok(ev)
}

// The session level toggle recognised when a request leaves the choice
// open. Only an explicit negative keeps the old rdn attribute.
fn delete_old_rdn_from_environment(session: &Arc<Session>) -> bool {
    match session.environment(ENV_DELETE_OLD_RDN) {
        Some(v) => !matches!(v.to_ascii_lowercase().as_str(), "false" | "no" | "0"),
        None => true,
    }
}
