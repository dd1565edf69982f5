//! Error types for the core. These are "operation" level errors: failures
//! raised while building filter expressions or processing a directory
//! operation through the interceptor chain. They are reported to the caller
//! that issued the operation and are never swallowed internally.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationError {
    // Construction time failures.
    InvalidFilter(String),
    NotRefinable(String),
    InvalidDn(String),
    InvalidRdn(String),
    // Chain processing failures.
    CollateralRecursionTooDeep,
    PrefixNotAnAncestor,
    CancellationRequested,
    SessionExpired,
    ResourceLimit,
    // Surfaced from the nexus, unchanged.
    NoSuchEntry,
    EntryAlreadyExists,
    Backend(String),
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationError::InvalidFilter(reason) => write!(f, "invalid filter: {reason}"),
            OperationError::NotRefinable(reason) => write!(f, "not refinable: {reason}"),
            OperationError::InvalidDn(reason) => write!(f, "invalid dn: {reason}"),
            OperationError::InvalidRdn(reason) => write!(f, "invalid rdn: {reason}"),
            OperationError::CollateralRecursionTooDeep => {
                write!(f, "collateral operation recursion bound exceeded")
            }
            OperationError::PrefixNotAnAncestor => {
                write!(f, "prefix is not an ancestor of the name")
            }
            OperationError::CancellationRequested => write!(f, "operation abandoned"),
            OperationError::SessionExpired => write!(f, "originating session no longer exists"),
            OperationError::ResourceLimit => write!(f, "resource limit exceeded"),
            OperationError::NoSuchEntry => write!(f, "no such entry"),
            OperationError::EntryAlreadyExists => write!(f, "entry already exists"),
            OperationError::Backend(reason) => write!(f, "backend failure: {reason}"),
        }
    }
}

impl std::error::Error for OperationError {}
