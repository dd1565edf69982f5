//! The Alder Directory Server core library. This implements the in memory
//! heart of the server: the search filter expression model and the typed
//! operation events that flow through the interceptor chain on their way
//! to a backend nexus. Wire codecs, storage engines, schema checking and
//! authentication are external collaborators consuming these types.

#![recursion_limit = "512"]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
extern crate tracing;

pub mod config;
pub mod dn;
pub mod entry;
pub mod error;
pub mod event;
pub mod filter;
pub mod interceptor;
pub mod modify;
pub mod server;
pub mod session;
#[cfg(test)]
pub(crate) mod testkit;
pub mod utils;
pub mod value;

/// A prelude of imports that should be imported by all other consuming
/// modules to help make imports cleaner.
pub mod prelude {
    pub use smartstring::alias::String as AttrString;
    pub use uuid::Uuid;

    pub use crate::config::CoreConfig;
    pub use crate::dn::{Dn, Rdn};
    pub use crate::entry::Entry;
    pub use crate::error::OperationError;
    pub use crate::event::{
        AbandonEvent, AddEvent, BindEvent, CompareEvent, Control, DeleteEvent, DerefAliases,
        Event, ExtendedEvent, ModifyEvent, MoveAndRenameEvent, MoveEvent, OpEvent, OperationType,
        RenameEvent, SearchEvent, SearchScope, UnbindEvent,
    };
    pub use crate::filter::{
        f_and, f_eq, f_not, f_or, f_pres, f_sub, AnnotationValue, FilterExpr, FilterNode,
        FilterVisitor,
    };
    pub use crate::interceptor::{Interceptor, InterceptorChain, NextInterceptor, OpOutcome};
    pub use crate::modify::{m_add, m_delete, m_purge, m_replace, Modify, ModifyList};
    pub use crate::server::{dispatch_modify_dn, DirectoryNexus};
    pub use crate::session::{Identity, Session, ENV_DELETE_OLD_RDN};
    pub use crate::value::AttributeValue;
}
