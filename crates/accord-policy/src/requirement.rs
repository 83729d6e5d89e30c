// requirement.rs: The requirement contract and the generic primitive requirement.
//
// A requirement is an opaque, immutable unit of protocol constraint. Only its
// builder understands the payload; the negotiation machinery sees the
// qualified name, the optional flag and an optional nested sub-policy.
// Runtime "satisfied" state never lives on the requirement: it is tracked in
// the per-exchange SatisfactionMap, keyed by instance identity.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::policy::Policy;
use crate::qname::QName;
use crate::satisfaction::SatisfactionMap;

/// Shared handle to a requirement instance. Two handles denote the same
/// requirement only if they point at the same allocation.
pub type RequirementRef = Arc<dyn Requirement>;

pub trait Requirement: Send + Sync + fmt::Debug {
    /// The qualified name identifying this requirement's type.
    fn name(&self) -> &QName;

    /// Optional requirements expand into an alternative with and one
    /// without them during normalization.
    fn is_optional(&self) -> bool {
        false
    }

    /// The sub-policy governing this requirement, if any.
    fn nested_policy(&self) -> Option<&Policy> {
        None
    }

    /// Human-readable detail reported when this requirement is not met.
    fn diagnostic(&self) -> Option<String> {
        None
    }

    /// Whether this requirement has been honored for the exchange tracked
    /// by `map`. The default checks this instance's own record and, for
    /// nested requirements, that some alternative of the nested policy is
    /// satisfied as well.
    fn is_satisfied(&self, map: &SatisfactionMap) -> bool {
        let own = map.is_instance_asserted(self.name(), (self as *const Self).cast::<()>());
        own && self
            .nested_policy()
            .map_or(true, |nested| map.policy_satisfied(nested))
    }

    /// Lets builders recover their concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Address identifying a requirement instance, independent of vtable.
pub fn instance_ptr(requirement: &RequirementRef) -> *const () {
    Arc::as_ptr(requirement).cast::<()>()
}

/// Identity comparison of two requirement handles.
pub fn same_instance(a: &RequirementRef, b: &RequirementRef) -> bool {
    instance_ptr(a) == instance_ptr(b)
}

/// A requirement whose payload is an opaque JSON value. This is what the
/// stock builders produce; domain-specific requirement types are free to
/// implement `Requirement` themselves.
#[derive(Debug, Clone)]
pub struct PrimitiveRequirement {
    name: QName,
    optional: bool,
    payload: Value,
    nested: Option<Policy>,
}

impl PrimitiveRequirement {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            optional: false,
            payload: Value::Null,
            nested: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn with_nested(mut self, nested: Policy) -> Self {
        self.nested = Some(nested);
        self
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> RequirementRef {
        Arc::new(self)
    }
}

impl Requirement for PrimitiveRequirement {
    fn name(&self) -> &QName {
        &self.name
    }

    fn is_optional(&self) -> bool {
        self.optional
    }

    fn nested_policy(&self) -> Option<&Policy> {
        self.nested.as_ref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
