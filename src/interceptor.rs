//! The interceptor chain. Interceptors inspect and transform operation
//! events on their way to the backend nexus; the chain drives them in a
//! fixed, configuration defined order and terminates at the nexus. An
//! interceptor may answer an event itself without passing it on, mutate it
//! and hand it to the next stage, or spawn collateral sub operations that
//! re-enter the chain from the top.
//!
//! Exactly one interceptor holds an event at a time; calling `next` is the
//! hand off of write access. Responses unwind through the same stages in
//! reverse as the calls return.

use std::sync::Arc;

use tracing::instrument;

use crate::config::CoreConfig;
use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::OperationError;
use crate::event::{OpEvent, OperationType};
use crate::server::DirectoryNexus;

/// What an operation produced. Mutating operations and bind/unbind only
/// signal completion; search and compare carry payloads.
#[derive(Debug, Clone)]
pub enum OpOutcome {
    Done,
    Entries(Vec<Arc<Entry>>),
    Compared(bool),
    Extended {
        response_oid: Option<String>,
        response_value: Option<Vec<u8>>,
    },
}

pub trait Interceptor: Send + Sync {
    fn id(&self) -> &'static str;

    fn intercept(
        &self,
        chain: &InterceptorChain,
        next: NextInterceptor<'_>,
        ev: &mut OpEvent,
    ) -> Result<OpOutcome, OperationError>;
}

/// A single use handle on the remainder of the chain. Dropping it without
/// invoking it is how an interceptor short circuits.
pub struct NextInterceptor<'a> {
    chain: &'a InterceptorChain,
    position: usize,
}

impl NextInterceptor<'_> {
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn invoke(self, ev: &mut OpEvent) -> Result<OpOutcome, OperationError> {
        self.chain.invoke_at(self.position, ev)
    }
}

pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
    nexus: Arc<dyn DirectoryNexus>,
    max_collateral_depth: usize,
    filter_max_elements: usize,
}

impl InterceptorChain {
    pub fn new(
        config: &CoreConfig,
        interceptors: Vec<Arc<dyn Interceptor>>,
        nexus: Arc<dyn DirectoryNexus>,
    ) -> Self {
        InterceptorChain {
            interceptors,
            nexus,
            max_collateral_depth: config.max_collateral_depth,
            filter_max_elements: config.filter_max_elements,
        }
    }

    pub fn nexus(&self) -> &dyn DirectoryNexus {
        self.nexus.as_ref()
    }

    /// Process an event through the full chain.
    #[instrument(level = "debug", skip_all, fields(op = %ev.op_type()))]
    pub fn handle(&self, ev: &mut OpEvent) -> Result<OpOutcome, OperationError> {
        self.handle_from(0, ev)
    }

    /// Process an event entering the chain at `position`. This is the
    /// resume path: collateral spawners may skip the stages that already
    /// saw the parent operation.
    pub fn handle_from(
        &self,
        position: usize,
        ev: &mut OpEvent,
    ) -> Result<OpOutcome, OperationError> {
        if ev.event().collateral_depth > self.max_collateral_depth {
            error!(
                op = %ev.op_type(),
                depth = ev.event().collateral_depth,
                "collateral operation recursion bound exceeded"
            );
            return Err(OperationError::CollateralRecursionTooDeep);
        }
        if let OpEvent::Search(se) = &*ev {
            if self.filter_max_elements != 0 && se.filter.size() > self.filter_max_elements {
                warn!(size = se.filter.size(), "search filter too large");
                return Err(OperationError::ResourceLimit);
            }
        }
        self.invoke_at(position, ev)
    }

    /// Re-enter the chain for a collateral sub operation built with
    /// `Event::new_collateral`.
    pub fn spawn_collateral(&self, ev: &mut OpEvent) -> Result<OpOutcome, OperationError> {
        debug_assert!(ev.event().is_collateral());
        self.handle_from(ev.event().next_interceptor, ev)
    }

    fn invoke_at(&self, position: usize, ev: &mut OpEvent) -> Result<OpOutcome, OperationError> {
        let session = ev.event().session()?;
        // Cancellation checkpoint: observed before every stage hand off.
        // The abandon event itself must still get through to do its work.
        if session.is_cancelled() && ev.op_type() != OperationType::Abandon {
            trace!(op = %ev.op_type(), "cancellation observed before stage {position}");
            return Err(OperationError::CancellationRequested);
        }

        match self.interceptors.get(position) {
            Some(interceptor) => {
                ev.event_mut().next_interceptor = position + 1;
                trace!(stage = interceptor.id(), op = %ev.op_type(), "entering interceptor");
                interceptor.intercept(
                    self,
                    NextInterceptor {
                        chain: self,
                        position: position + 1,
                    },
                    ev,
                )
            }
            None => self.terminate(ev),
        }
    }

    // End of chain: dispatch to the nexus. Errors surface unchanged.
    fn terminate(&self, ev: &mut OpEvent) -> Result<OpOutcome, OperationError> {
        match ev {
            OpEvent::Add(e) => {
                self.nexus.add(&e.entry)?;
                Ok(OpOutcome::Done)
            }
            OpEvent::Delete(e) => {
                self.nexus.delete(e.event.dn())?;
                Ok(OpOutcome::Done)
            }
            OpEvent::Modify(e) => {
                self.nexus.modify(e.event.dn(), &e.modlist)?;
                Ok(OpOutcome::Done)
            }
            OpEvent::Rename(e) => {
                self.nexus
                    .rename(e.event.dn(), &e.new_rdn, e.delete_old_rdn)?;
                Ok(OpOutcome::Done)
            }
            OpEvent::Move(e) => {
                self.nexus.move_entry(e.event.dn(), &e.new_superior)?;
                Ok(OpOutcome::Done)
            }
            OpEvent::MoveAndRename(e) => {
                // The nexus exposes the two primitive motions; the
                // combined form is their composition.
                let old_rdn = e
                    .event
                    .dn()
                    .rdn()
                    .ok_or_else(|| {
                        OperationError::InvalidDn("cannot relocate the root dse".to_string())
                    })?
                    .clone();
                self.nexus.move_entry(e.event.dn(), &e.new_superior)?;
                let moved = Dn::from_rdn_and_parent(old_rdn, &e.new_superior);
                self.nexus.rename(&moved, &e.new_rdn, e.delete_old_rdn)?;
                Ok(OpOutcome::Done)
            }
            OpEvent::Search(e) => {
                let session = e.event.session()?;
                let found = self.nexus.search(e.event.dn(), e.scope, &e.filter)?;
                let mut entries = Vec::with_capacity(found.len());
                for entry in found {
                    // Cancellation checkpoint: before each streamed entry.
                    if session.is_cancelled() {
                        return Err(OperationError::CancellationRequested);
                    }
                    if e.size_limit != 0 && entries.len() == e.size_limit {
                        debug!(limit = e.size_limit, "search size limit reached");
                        break;
                    }
                    entries.push(entry);
                }
                Ok(OpOutcome::Entries(entries))
            }
            OpEvent::Compare(e) => {
                let matched = self
                    .nexus
                    .compare(e.event.dn(), &e.attr, &e.assertion_value)?;
                Ok(OpOutcome::Compared(matched))
            }
            // Credential verification belongs to the authentication layer;
            // the chain only carries the event to it.
            OpEvent::Bind(_) | OpEvent::Unbind(_) => Ok(OpOutcome::Done),
            OpEvent::Abandon(e) => {
                debug!(msg_id = e.abandoned_id, "abandon requested");
                e.event.session()?.request_cancel();
                Ok(OpOutcome::Done)
            }
            OpEvent::Extended(e) => {
                // No extended operations are implemented in the core.
                trace!(oid = %e.request_oid, "unhandled extended operation");
                Ok(OpOutcome::Extended {
                    response_oid: None,
                    response_value: None,
                })
            }
        }
    }
}
