// policy.rs: Policy expressions and their normal form.
//
// A policy is a tree of two operators: All (conjunction) and ExactlyOne
// (choice), with requirements at the leaves. The root of a Policy is an
// implicit All. Normalization flattens the tree into a list of alternatives,
// each a set of requirements that must hold together.
//
// Normalization never descends into a requirement's nested policy. The
// nested policy travels with its requirement; only the satisfaction map
// flattens it, so that builders decide how nesting affects compatibility.

use std::collections::BTreeSet;

use crate::qname::QName;
use crate::requirement::{same_instance, RequirementRef};

/// A node of a policy expression tree.
#[derive(Debug, Clone)]
pub enum PolicyNode {
    Requirement(RequirementRef),
    /// Every child must apply.
    All(Vec<PolicyNode>),
    /// Exactly one child must apply.
    ExactlyOne(Vec<PolicyNode>),
}

/// A set of requirements that must all hold simultaneously.
///
/// Membership is by instance identity, not value equality: two distinct
/// instances of the same requirement type are not interchangeable, since
/// each carries its own satisfaction record. Insertion order is preserved.
#[derive(Debug, Clone, Default)]
pub struct Alternative {
    requirements: Vec<RequirementRef>,
}

impl Alternative {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a requirement unless this exact instance is already present.
    /// Returns whether it was added.
    pub fn push(&mut self, requirement: RequirementRef) -> bool {
        if self.contains(&requirement) {
            return false;
        }
        self.requirements.push(requirement);
        true
    }

    pub fn contains(&self, requirement: &RequirementRef) -> bool {
        self.requirements.iter().any(|r| same_instance(r, requirement))
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RequirementRef> {
        self.requirements.iter()
    }

    /// Qualified names of the members, in member order (duplicates kept).
    pub fn names(&self) -> Vec<&QName> {
        self.requirements.iter().map(|r| r.name()).collect()
    }

    /// Members of `self` followed by those members of `other` not already
    /// present.
    pub fn union(&self, other: &Alternative) -> Alternative {
        let mut merged = self.clone();
        for r in other.iter() {
            merged.push(r.clone());
        }
        merged
    }

    /// The alternative as a conjunction node.
    pub fn to_node(&self) -> PolicyNode {
        PolicyNode::All(
            self.requirements
                .iter()
                .cloned()
                .map(PolicyNode::Requirement)
                .collect(),
        )
    }
}

impl FromIterator<RequirementRef> for Alternative {
    fn from_iter<I: IntoIterator<Item = RequirementRef>>(iter: I) -> Self {
        let mut alt = Alternative::new();
        for r in iter {
            alt.push(r);
        }
        alt
    }
}

/// A policy expression. The root is an implicit conjunction.
#[derive(Debug, Clone)]
pub struct Policy {
    id: Option<String>,
    root: PolicyNode,
}

impl Default for Policy {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy {
    /// The empty policy: no operators, no requirements. Normalizes to a
    /// single empty alternative.
    pub fn new() -> Self {
        Self {
            id: None,
            root: PolicyNode::All(Vec::new()),
        }
    }

    pub fn from_node(node: PolicyNode) -> Self {
        let root = match node {
            all @ PolicyNode::All(_) => all,
            other => PolicyNode::All(vec![other]),
        };
        Self { id: None, root }
    }

    /// A policy in normal form: a choice over one conjunction per
    /// alternative. An empty list yields a policy with zero alternatives.
    pub fn from_alternatives(alternatives: impl IntoIterator<Item = Alternative>) -> Self {
        let choice = PolicyNode::ExactlyOne(alternatives.into_iter().map(|a| a.to_node()).collect());
        Self::from_node(choice)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn root(&self) -> &PolicyNode {
        &self.root
    }

    /// Normalize into the flat list of alternatives.
    pub fn alternatives(&self) -> Vec<Alternative> {
        normalize(&self.root)
    }

    /// Conjunction of two policies: both must apply.
    pub fn merge(&self, other: &Policy) -> Policy {
        Policy {
            id: None,
            root: PolicyNode::All(vec![self.root.clone(), other.root.clone()]),
        }
    }

    /// Every requirement leaf of the expression (nested policies excluded),
    /// in traversal order.
    pub fn requirements(&self, include_optional: bool) -> Vec<RequirementRef> {
        let mut out = Vec::new();
        collect_requirements(&self.root, include_optional, &mut out);
        out
    }

    /// The distinct qualified names used by the expression.
    pub fn vocabulary(&self, include_optional: bool) -> BTreeSet<QName> {
        self.requirements(include_optional)
            .iter()
            .map(|r| r.name().clone())
            .collect()
    }

    /// True if the expression contains no requirement at all.
    pub fn is_empty(&self) -> bool {
        self.requirements(true).is_empty()
    }
}

fn collect_requirements(node: &PolicyNode, include_optional: bool, out: &mut Vec<RequirementRef>) {
    match node {
        PolicyNode::Requirement(r) => {
            if include_optional || !r.is_optional() {
                out.push(r.clone());
            }
        }
        PolicyNode::All(children) | PolicyNode::ExactlyOne(children) => {
            for child in children {
                collect_requirements(child, include_optional, out);
            }
        }
    }
}

fn normalize(node: &PolicyNode) -> Vec<Alternative> {
    match node {
        PolicyNode::Requirement(r) => {
            let with: Alternative = std::iter::once(r.clone()).collect();
            if r.is_optional() {
                vec![with, Alternative::new()]
            } else {
                vec![with]
            }
        }
        PolicyNode::All(children) => {
            children.iter().fold(vec![Alternative::new()], |acc, child| {
                let child_alts = normalize(child);
                let mut product = Vec::with_capacity(acc.len() * child_alts.len());
                for left in &acc {
                    for right in &child_alts {
                        product.push(left.union(right));
                    }
                }
                product
            })
        }
        PolicyNode::ExactlyOne(children) => children.iter().flat_map(normalize).collect(),
    }
}
