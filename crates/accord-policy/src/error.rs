// error.rs: Error types for policy negotiation and verification.

use thiserror::Error;

use crate::config::IntersectionMode;
use crate::qname::QName;
use crate::satisfaction::VerificationFault;

/// Errors that can occur while negotiating or verifying policies.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// An intersection mode other than strict was requested.
    #[error("intersection mode '{mode}' is not supported")]
    UnsupportedMode { mode: IntersectionMode },

    /// Two policy sources have no compatible alternative pair.
    #[error("incompatible policies for {context}: no compatible alternative")]
    IncompatiblePolicies { context: String },

    /// A requirement type has no registered builder and unknown
    /// requirements are not ignored.
    #[error("no builder registered for requirement type {name}")]
    UnknownRequirementType { name: QName },

    /// Negotiation succeeded but no alternative was honored at runtime.
    #[error("policy not satisfied: {0}")]
    Unsatisfied(VerificationFault),

    /// The policy has alternatives but none of them can be enforced.
    #[error("no selectable alternative for {context}")]
    NoSelectableAlternative { context: String },

    /// A requirement's nested policy refers back to the requirement itself.
    #[error("cyclic nested policy detected at requirement {name}")]
    CyclicPolicy { name: QName },

    /// A policy document could not be turned into a policy expression.
    #[error("invalid policy document: {reason}")]
    InvalidDocument { reason: String },

    /// Engine configuration is malformed.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PolicyError {
    /// Whether this error stems from configuration (and will not change
    /// without reconfiguring) rather than from a message that failed to
    /// honor a negotiated policy.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, PolicyError::Unsatisfied(_) | PolicyError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, PolicyError>;
