// intersect.rs: Pairwise compatible merge of two policies.
//
// For every pair (alt1, alt2) of the two policies' alternatives, the pair is
// compatible when each requirement on either side has a compatible
// counterpart on the other side, as decided by the requirement's builder.
// Matching is per requirement: several requirements of one side may map to
// the same counterpart. A compatible pair contributes the union of both
// alternatives (original instances, not the merged ones), so each side keeps
// its own satisfaction record. The result is a choice over all such unions.
//
// Every pair is examined; no pair short-circuits another. Alternative counts
// are small in practice.

use tracing::{debug, warn};

use crate::config::IntersectionMode;
use crate::error::{PolicyError, Result};
use crate::policy::{Alternative, Policy};
use crate::registry::RequirementRegistry;
use crate::requirement::{PrimitiveRequirement, RequirementRef};

pub struct Intersector<'a> {
    registry: &'a RequirementRegistry,
    mode: IntersectionMode,
}

impl<'a> Intersector<'a> {
    pub fn new(registry: &'a RequirementRegistry, mode: IntersectionMode) -> Self {
        Self { registry, mode }
    }

    /// Compute the compatible combination of `p1` and `p2`.
    ///
    /// Returns `Ok(None)` when no alternative pair is compatible.
    pub fn intersect(&self, p1: &Policy, p2: &Policy) -> Result<Option<Policy>> {
        self.ensure_strict()?;

        let alts1 = p1.alternatives();
        let alts2 = p2.alternatives();
        let mut compatible = Vec::new();
        for alt1 in &alts1 {
            for alt2 in &alts2 {
                if self.compatible_alternatives(alt1, alt2)? {
                    compatible.push(alt1.union(alt2));
                }
            }
        }

        debug!(
            left = alts1.len(),
            right = alts2.len(),
            compatible = compatible.len(),
            "intersected policies"
        );
        if compatible.is_empty() {
            return Ok(None);
        }
        Ok(Some(Policy::from_alternatives(compatible)))
    }

    /// Whether two alternatives can hold together. An empty alternative
    /// places no constraint and is compatible with anything.
    pub fn compatible_alternatives(&self, alt1: &Alternative, alt2: &Alternative) -> Result<bool> {
        self.ensure_strict()?;
        if alt1.is_empty() || alt2.is_empty() {
            return Ok(true);
        }
        for r in alt1.iter() {
            if self.compatible_requirement(r, alt2)?.is_none() {
                return Ok(false);
            }
        }
        for r in alt2.iter() {
            if self.compatible_requirement(r, alt1)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The first merged requirement `requirement` forms with a member of
    /// `alternative`, if any.
    pub fn compatible_requirement(
        &self,
        requirement: &RequirementRef,
        alternative: &Alternative,
    ) -> Result<Option<RequirementRef>> {
        let Some(builder) = self.registry.get(requirement.name()) else {
            if self.registry.ignore_unknown() {
                warn!(requirement = %requirement.name(), "unknown requirement type treated as compatible");
                return Ok(Some(
                    PrimitiveRequirement::new(requirement.name().clone())
                        .with_optional(requirement.is_optional())
                        .into_ref(),
                ));
            }
            return Err(PolicyError::UnknownRequirementType {
                name: requirement.name().clone(),
            });
        };
        for candidate in alternative.iter() {
            if let Some(merged) = builder.build_compatible(requirement, candidate, self.registry)? {
                return Ok(Some(merged));
            }
        }
        Ok(None)
    }

    fn ensure_strict(&self) -> Result<()> {
        match self.mode {
            IntersectionMode::Strict => Ok(()),
            mode => Err(PolicyError::UnsupportedMode { mode }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use crate::document::RequirementElement;
    use crate::policy::PolicyNode;
    use crate::qname::QName;
    use crate::registry::{PrimitiveRequirementBuilder, RequirementBuilder};

    /// Builder whose compatibility check always succeeds.
    struct Permissive(Vec<QName>);

    impl RequirementBuilder for Permissive {
        fn known_names(&self) -> Vec<QName> {
            self.0.clone()
        }

        fn build(&self, element: &RequirementElement, _: &RequirementRegistry) -> Result<RequirementRef> {
            Ok(PrimitiveRequirement::new(element.name.clone()).into_ref())
        }

        fn build_compatible(
            &self,
            a: &RequirementRef,
            _b: &RequirementRef,
            _: &RequirementRegistry,
        ) -> Result<Option<RequirementRef>> {
            Ok(Some(PrimitiveRequirement::new(a.name().clone()).into_ref()))
        }
    }

    fn name(local: &str) -> QName {
        QName::new("urn:test", local)
    }

    fn req(local: &str) -> RequirementRef {
        PrimitiveRequirement::new(name(local)).into_ref()
    }

    fn policy(alternatives: &[&[&str]]) -> Policy {
        Policy::from_alternatives(
            alternatives
                .iter()
                .map(|alt| alt.iter().map(|l| req(l)).collect::<Alternative>()),
        )
    }

    fn strict_registry(locals: &[&str]) -> RequirementRegistry {
        let mut reg = RequirementRegistry::new();
        reg.register(Arc::new(PrimitiveRequirementBuilder::new(locals.iter().map(|l| name(l)))));
        reg
    }

    fn name_sets(p: &Policy) -> BTreeSet<Vec<String>> {
        p.alternatives()
            .iter()
            .map(|alt| {
                let mut names: Vec<String> = alt.names().iter().map(|n| n.to_string()).collect();
                names.sort();
                names
            })
            .collect()
    }

    #[test]
    fn keeps_only_compatible_pairs_as_unions() {
        let reg = strict_registry(&["A", "B", "C"]);
        let p1 = policy(&[&["A"], &["B"]]);
        let p2 = policy(&[&["A"], &["C"]]);
        let result = Intersector::new(&reg, IntersectionMode::Strict)
            .intersect(&p1, &p2)
            .unwrap()
            .unwrap();
        let alts = result.alternatives();
        assert_eq!(alts.len(), 1);
        // Both original instances are kept.
        assert_eq!(alts[0].len(), 2);
        assert!(alts[0].names().iter().all(|n| n.local_name == "A"));
    }

    #[test]
    fn different_types_do_not_intersect() {
        let reg = strict_registry(&["A", "B"]);
        let result = Intersector::new(&reg, IntersectionMode::Strict)
            .intersect(&policy(&[&["A"]]), &policy(&[&["B"]]))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn intersection_is_commutative_up_to_member_order() {
        let reg = strict_registry(&["A", "B", "C"]);
        let p1 = policy(&[&["A", "B"], &["C"], &["A"]]);
        let p2 = policy(&[&["A"], &["B", "A"], &["C"]]);
        let i = Intersector::new(&reg, IntersectionMode::Strict);
        let ab = i.intersect(&p1, &p2).unwrap().unwrap();
        let ba = i.intersect(&p2, &p1).unwrap().unwrap();
        assert_eq!(ab.alternatives().len(), ba.alternatives().len());
        assert_eq!(name_sets(&ab), name_sets(&ba));
    }

    #[test]
    fn always_compatible_type_sums_member_counts() {
        let mut reg = RequirementRegistry::new();
        reg.register(Arc::new(Permissive(vec![name("X"), name("Y")])));
        let p1 = policy(&[&["X", "Y"], &["X"]]);
        let p2 = policy(&[&["Y", "Y", "X"]]);
        let result = Intersector::new(&reg, IntersectionMode::Strict)
            .intersect(&p1, &p2)
            .unwrap()
            .unwrap();
        let alts = result.alternatives();
        assert_eq!(alts.len(), 2);
        assert_eq!(alts[0].len(), 2 + 3);
        assert_eq!(alts[1].len(), 1 + 3);
    }

    #[test]
    fn many_to_one_matching_is_allowed() {
        let reg = strict_registry(&["A"]);
        // Two A's on the left both match the single A on the right.
        let p1 = policy(&[&["A", "A"]]);
        let p2 = policy(&[&["A"]]);
        let result = Intersector::new(&reg, IntersectionMode::Strict)
            .intersect(&p1, &p2)
            .unwrap();
        assert_eq!(result.unwrap().alternatives()[0].len(), 3);
    }

    #[test]
    fn empty_alternative_is_compatible_with_anything() {
        let reg = strict_registry(&["A"]);
        let result = Intersector::new(&reg, IntersectionMode::Strict)
            .intersect(&Policy::new(), &policy(&[&["A"]]))
            .unwrap()
            .unwrap();
        assert_eq!(name_sets(&result), name_sets(&policy(&[&["A"]])));
    }

    #[test]
    fn zero_alternatives_never_intersect() {
        let reg = strict_registry(&["A"]);
        let result = Intersector::new(&reg, IntersectionMode::Strict)
            .intersect(&Policy::from_alternatives(Vec::new()), &policy(&[&["A"]]))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn unknown_type_is_fatal_unless_ignored() {
        let reg = strict_registry(&["A"]);
        let err = Intersector::new(&reg, IntersectionMode::Strict)
            .intersect(&policy(&[&["Mystery"]]), &policy(&[&["A"]]))
            .unwrap_err();
        assert!(matches!(err, PolicyError::UnknownRequirementType { .. }));

        let lenient = strict_registry(&["A"]).with_ignore_unknown(true);
        let result = Intersector::new(&lenient, IntersectionMode::Strict)
            .intersect(&policy(&[&["Mystery", "A"]]), &policy(&[&["A"]]))
            .unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn lax_mode_is_rejected_before_any_work() {
        let reg = RequirementRegistry::new();
        // Unknown types would otherwise fail first; lax must win.
        let err = Intersector::new(&reg, IntersectionMode::Lax)
            .intersect(&policy(&[&["Mystery"]]), &Policy::new())
            .unwrap_err();
        assert!(matches!(err, PolicyError::UnsupportedMode { mode: IntersectionMode::Lax }));
    }

    #[test]
    fn nested_choice_inside_conjunction_is_normalized_first() {
        let reg = strict_registry(&["A", "B"]);
        let p1 = Policy::from_node(PolicyNode::All(vec![PolicyNode::ExactlyOne(vec![
            PolicyNode::Requirement(req("A")),
            PolicyNode::Requirement(req("B")),
        ])]));
        let result = Intersector::new(&reg, IntersectionMode::Strict)
            .intersect(&p1, &policy(&[&["B"]]))
            .unwrap()
            .unwrap();
        assert_eq!(result.alternatives().len(), 1);
    }
}
