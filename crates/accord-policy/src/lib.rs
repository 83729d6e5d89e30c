//! # accord-policy
//!
//! Policy negotiation for message exchanges between service endpoints.
//!
//! A [`Policy`] is a boolean expression of typed requirements ("messages
//! must be signed", "transport must be TLS"). Endpoints, operations and
//! messages each carry their own policy. For every exchange the
//! [`PolicyEngine`] intersects the applicable policies, selects one
//! alternative to enforce, and caches the result as an [`EffectivePolicy`].
//! Each message then gets its own [`SatisfactionMap`], which handlers and
//! assertors fill in and which is verified before the message moves on.
//!
//! ## Key invariants
//!
//! - **Strict intersection only**: two requirements are compatible only if
//!   their type's builder says so. Lax mode is rejected up front.
//! - **Identity, not equality**: satisfaction tracks requirement instances.
//!   Two equal requirements from different sources are distinct entries.
//! - **No compatible alternative is a fault**: it never degrades to "no
//!   policy".
//! - **Per-exchange state**: effective policies are shared and immutable;
//!   satisfaction maps are never shared between exchanges.

pub mod config;
pub mod document;
pub mod effective;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod interceptor;
pub mod intersect;
pub mod policy;
pub mod qname;
pub mod registry;
pub mod requirement;
pub mod satisfaction;
pub mod selector;

pub use config::{IntersectionMode, PolicyConfig, SelectorKind};
pub use document::{PolicyDocument, RequirementElement};
pub use effective::{Direction, EffectivePolicy, ExchangeKey, MessageKind, Role};
pub use engine::{PolicyEngine, PolicyProvider, PolicySource};
pub use error::{PolicyError, Result};
pub use exchange::Exchange;
pub use interceptor::{Assertor, InterceptorProvider, InterceptorRef, InterceptorRegistry, PolicyInterceptor};
pub use intersect::Intersector;
pub use policy::{Alternative, Policy, PolicyNode};
pub use qname::QName;
pub use registry::{NestedRequirementBuilder, PrimitiveRequirementBuilder, RequirementBuilder, RequirementRegistry};
pub use requirement::{PrimitiveRequirement, Requirement, RequirementRef};
pub use satisfaction::{
    RequirementRecord, SatisfactionMap, UnmetAlternative, UnmetRequirement, Verification, VerificationFault,
};
pub use selector::{
    AlternativeSelector, AlternativeSupport, FirstAlternativeSelector, MaximalAlternativeSelector,
    MinimalAlternativeSelector,
};
