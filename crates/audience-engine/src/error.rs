//! Error types for audience-engine crate.
//!
//! Only management operations (installing nodes, creating domains) return
//! these to callers. Arbitration and membership never fail outward: lookups
//! that miss are no-ops and predicate or applier failures are logged and
//! replaced by safe defaults.

use audience_types::{AudienceRef, ClientId, ResourceTypeId};
use thiserror::Error;

/// Errors that can occur while managing audiences.
#[derive(Debug, Error)]
pub enum AudienceError {
    /// No audience is installed under this reference.
    #[error("audience not found: {0}")]
    AudienceNotFound(AudienceRef),

    /// An audience with this reference is already installed.
    #[error("audience already installed: {0}")]
    AudienceAlreadyInstalled(AudienceRef),

    /// A node lists a child that is not installed.
    #[error("audience {parent} references unknown child {child}")]
    UnknownChild {
        parent: AudienceRef,
        child: AudienceRef,
    },

    /// An arbitration domain for this resource type already exists.
    #[error("arbitration domain already exists: {0}")]
    DomainAlreadyExists(ResourceTypeId),

    /// Predicate evaluation failed for a client.
    #[error("predicate failed for {client} in {audience}: {reason}")]
    PredicateFailed {
        audience: AudienceRef,
        client: ClientId,
        reason: String,
    },

    /// A resource applier could not apply or revert its effect.
    #[error("resource applier failed for {audience} on {slot}: {reason}")]
    ApplierFailed {
        audience: AudienceRef,
        slot: String,
        reason: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

/// Result type for audience operations.
pub type AudienceResult<T> = Result<T, AudienceError>;
