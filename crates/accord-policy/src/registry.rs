// registry.rs: Requirement-type registry.
//
// Maps a requirement's qualified name to the builder that owns its semantics.
// A builder does two things: construct a requirement from its serialized
// element, and decide whether two instances of its type can coexist
// (returning the merged requirement if so). The second is the only place
// domain semantics enter negotiation.
//
// The registry is populated at startup and handed to the engine; it is
// read-only afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::config::IntersectionMode;
use crate::document::{PolicyDocument, RequirementElement};
use crate::error::{PolicyError, Result};
use crate::intersect::Intersector;
use crate::policy::{Policy, PolicyNode};
use crate::qname::QName;
use crate::requirement::{PrimitiveRequirement, RequirementRef};

/// Builds and merges requirements of one or more types.
pub trait RequirementBuilder: Send + Sync {
    /// The qualified names this builder is responsible for.
    fn known_names(&self) -> Vec<QName>;

    /// Construct a requirement from its serialized form.
    fn build(&self, element: &RequirementElement, registry: &RequirementRegistry) -> Result<RequirementRef>;

    /// A requirement expressing both `a` and `b`, or `None` if they cannot
    /// coexist. `a` is always of a type this builder knows.
    fn build_compatible(
        &self,
        a: &RequirementRef,
        b: &RequirementRef,
        registry: &RequirementRegistry,
    ) -> Result<Option<RequirementRef>>;
}

/// Process-scoped table of requirement builders.
#[derive(Clone, Default)]
pub struct RequirementRegistry {
    builders: HashMap<QName, Arc<dyn RequirementBuilder>>,
    ignore_unknown: bool,
}

impl fmt::Debug for RequirementRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.builders.keys().map(|n| n.to_string()).collect();
        names.sort();
        f.debug_struct("RequirementRegistry")
            .field("types", &names)
            .field("ignore_unknown", &self.ignore_unknown)
            .finish()
    }
}

impl RequirementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, requirements without a registered builder pass through:
    /// they are compatible with anything and count as satisfied.
    pub fn with_ignore_unknown(mut self, ignore: bool) -> Self {
        self.ignore_unknown = ignore;
        self
    }

    pub fn set_ignore_unknown(&mut self, ignore: bool) {
        self.ignore_unknown = ignore;
    }

    pub fn ignore_unknown(&self) -> bool {
        self.ignore_unknown
    }

    /// Register a builder under every name it knows. A later registration
    /// for the same name replaces the earlier one.
    pub fn register(&mut self, builder: Arc<dyn RequirementBuilder>) {
        for name in builder.known_names() {
            self.builders.insert(name, builder.clone());
        }
    }

    pub fn get(&self, name: &QName) -> Option<&Arc<dyn RequirementBuilder>> {
        self.builders.get(name)
    }

    pub fn is_registered(&self, name: &QName) -> bool {
        self.builders.contains_key(name)
    }

    /// Build a requirement through the builder registered for its name.
    pub fn build(&self, element: &RequirementElement) -> Result<RequirementRef> {
        match self.get(&element.name) {
            Some(builder) => builder.build(element, self),
            None if self.ignore_unknown => {
                warn!(requirement = %element.name, "no builder registered, passing requirement through");
                let mut requirement = PrimitiveRequirement::new(element.name.clone())
                    .with_optional(element.optional)
                    .with_payload(element.payload.clone());
                if let Some(nested) = self.nested_policy(element)? {
                    requirement = requirement.with_nested(nested);
                }
                Ok(requirement.into_ref())
            }
            None => Err(PolicyError::UnknownRequirementType {
                name: element.name.clone(),
            }),
        }
    }

    /// Build the nested sub-policy of an element, if it carries one.
    pub fn nested_policy(&self, element: &RequirementElement) -> Result<Option<Policy>> {
        element
            .policy
            .as_deref()
            .map(|doc| self.build_policy(doc))
            .transpose()
    }

    /// Turn a serialized policy tree into a policy expression.
    pub fn build_policy(&self, document: &PolicyDocument) -> Result<Policy> {
        Ok(Policy::from_node(self.build_node(document)?))
    }

    fn build_node(&self, document: &PolicyDocument) -> Result<PolicyNode> {
        Ok(match document {
            PolicyDocument::Requirement(element) => PolicyNode::Requirement(self.build(element)?),
            PolicyDocument::All(children) => PolicyNode::All(
                children
                    .iter()
                    .map(|c| self.build_node(c))
                    .collect::<Result<_>>()?,
            ),
            PolicyDocument::ExactlyOne(children) => PolicyNode::ExactlyOne(
                children
                    .iter()
                    .map(|c| self.build_node(c))
                    .collect::<Result<_>>()?,
            ),
        })
    }
}

/// Builder for requirements carrying only an opaque payload. Two instances
/// are compatible when they share a name and an equal payload and neither
/// carries a nested policy.
#[derive(Debug, Clone)]
pub struct PrimitiveRequirementBuilder {
    names: Vec<QName>,
}

impl PrimitiveRequirementBuilder {
    pub fn new(names: impl IntoIterator<Item = QName>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }
}

impl RequirementBuilder for PrimitiveRequirementBuilder {
    fn known_names(&self) -> Vec<QName> {
        self.names.clone()
    }

    fn build(&self, element: &RequirementElement, _registry: &RequirementRegistry) -> Result<RequirementRef> {
        if element.policy.is_some() {
            return Err(PolicyError::InvalidDocument {
                reason: format!("requirement {} does not accept a nested policy", element.name),
            });
        }
        Ok(PrimitiveRequirement::new(element.name.clone())
            .with_optional(element.optional)
            .with_payload(element.payload.clone())
            .into_ref())
    }

    fn build_compatible(
        &self,
        a: &RequirementRef,
        b: &RequirementRef,
        _registry: &RequirementRegistry,
    ) -> Result<Option<RequirementRef>> {
        if a.name() != b.name() || a.nested_policy().is_some() || b.nested_policy().is_some() {
            return Ok(None);
        }
        let (Some(pa), Some(pb)) = (
            a.as_any().downcast_ref::<PrimitiveRequirement>(),
            b.as_any().downcast_ref::<PrimitiveRequirement>(),
        ) else {
            return Ok(None);
        };
        if pa.payload() != pb.payload() {
            return Ok(None);
        }
        Ok(Some(
            PrimitiveRequirement::new(a.name().clone())
                .with_optional(a.is_optional() && b.is_optional())
                .with_payload(pa.payload().clone())
                .into_ref(),
        ))
    }
}

/// Builder for requirements governed by a nested sub-policy. Two instances
/// are compatible when they share a name and payload and their nested
/// policies intersect; the merged requirement carries the intersection.
#[derive(Debug, Clone)]
pub struct NestedRequirementBuilder {
    names: Vec<QName>,
}

impl NestedRequirementBuilder {
    pub fn new(names: impl IntoIterator<Item = QName>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }
}

impl RequirementBuilder for NestedRequirementBuilder {
    fn known_names(&self) -> Vec<QName> {
        self.names.clone()
    }

    fn build(&self, element: &RequirementElement, registry: &RequirementRegistry) -> Result<RequirementRef> {
        let nested = registry.nested_policy(element)?.unwrap_or_default();
        Ok(PrimitiveRequirement::new(element.name.clone())
            .with_optional(element.optional)
            .with_payload(element.payload.clone())
            .with_nested(nested)
            .into_ref())
    }

    fn build_compatible(
        &self,
        a: &RequirementRef,
        b: &RequirementRef,
        registry: &RequirementRegistry,
    ) -> Result<Option<RequirementRef>> {
        if a.name() != b.name() {
            return Ok(None);
        }
        let payload = match (
            a.as_any().downcast_ref::<PrimitiveRequirement>(),
            b.as_any().downcast_ref::<PrimitiveRequirement>(),
        ) {
            (Some(pa), Some(pb)) if pa.payload() == pb.payload() => pa.payload().clone(),
            _ => return Ok(None),
        };
        let empty = Policy::new();
        let na = a.nested_policy().unwrap_or(&empty);
        let nb = b.nested_policy().unwrap_or(&empty);
        let Some(nested) = Intersector::new(registry, IntersectionMode::Strict).intersect(na, nb)? else {
            return Ok(None);
        };
        Ok(Some(
            PrimitiveRequirement::new(a.name().clone())
                .with_optional(a.is_optional() && b.is_optional())
                .with_payload(payload)
                .with_nested(nested)
                .into_ref(),
        ))
    }
}
