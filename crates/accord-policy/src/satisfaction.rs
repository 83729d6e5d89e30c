// satisfaction.rs: Per-exchange tracking of which requirements were honored.
//
// Built fresh for every exchange from the effective policy. Every requirement
// reachable from the policy (recursively through nested sub-policies) gets
// exactly one tracking record, keyed by qualified name and matched by
// instance identity. Stage handlers and assertors flip records to asserted as
// the message is processed; the flag only ever goes unasserted -> asserted.
//
// Verification comes in two strengths:
// - alternative level: some alternative has every member satisfied;
// - strict: every tracked record is asserted.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{PolicyError, Result};
use crate::policy::{Alternative, Policy};
use crate::qname::QName;
use crate::registry::RequirementRegistry;
use crate::requirement::{instance_ptr, RequirementRef};

/// Tracking state for one requirement occurrence.
#[derive(Debug)]
pub struct RequirementRecord {
    requirement: RequirementRef,
    asserted: AtomicBool,
    known: bool,
    failure: Mutex<Option<String>>,
}

impl RequirementRecord {
    fn new(requirement: RequirementRef, known: bool) -> Self {
        Self {
            requirement,
            asserted: AtomicBool::new(false),
            known,
            failure: Mutex::new(None),
        }
    }

    pub fn requirement(&self) -> &RequirementRef {
        &self.requirement
    }

    /// Whether a handler or assertor marked this occurrence as honored.
    pub fn is_asserted(&self) -> bool {
        self.asserted.load(Ordering::Acquire)
    }

    /// Mark as honored. Idempotent; there is no way back.
    pub fn set_asserted(&self) {
        self.asserted.store(true, Ordering::Release);
    }

    /// Whether a builder is registered for this requirement's type.
    pub fn is_known(&self) -> bool {
        self.known
    }

    /// Attach a human-readable reason why enforcement failed. The asserted
    /// flag is left untouched.
    pub fn record_failure(&self, detail: impl Into<String>) {
        *self.failure.lock() = Some(detail.into());
    }

    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    fn matches(&self, ptr: *const ()) -> bool {
        instance_ptr(&self.requirement) == ptr
    }
}

/// A requirement found unmet during verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmetRequirement {
    pub name: QName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// An alternative that was not fully honored, with its unmet members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmetAlternative {
    /// Position of the alternative in the policy's normal form.
    pub index: usize,
    pub unmet: Vec<UnmetRequirement>,
}

/// Structured detail of a failed verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationFault {
    /// Per-alternative detail, filled by alternative-level verification.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<UnmetAlternative>,
    /// Every unasserted record, filled by strict verification.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unasserted: Vec<UnmetRequirement>,
}

impl fmt::Display for VerificationFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |reqs: &[UnmetRequirement]| {
            reqs.iter()
                .map(|r| match &r.detail {
                    Some(d) => format!("{} ({})", r.name, d),
                    None => r.name.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut parts: Vec<String> = self
            .alternatives
            .iter()
            .map(|a| format!("alternative {} unmet: {}", a.index, list(&a.unmet)))
            .collect();
        if !self.unasserted.is_empty() {
            parts.push(format!("unasserted: {}", list(&self.unasserted)));
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// Outcome of alternative-level verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// `alternative` is the index of the first fully honored alternative,
    /// or `None` when the policy has no alternatives to honor.
    Satisfied { alternative: Option<usize> },
    Unsatisfied(VerificationFault),
}

/// Per-exchange requirement tracking.
#[derive(Debug)]
pub struct SatisfactionMap {
    records: BTreeMap<QName, Vec<RequirementRecord>>,
    ignore_unknown: bool,
}

impl SatisfactionMap {
    /// Track every requirement reachable from `policy`.
    ///
    /// A requirement reached again through its own nested policy is a
    /// configuration error. The same instance reached along different paths
    /// (for example, shared by several intersected alternatives) is tracked
    /// once.
    pub fn new(policy: &Policy, registry: &RequirementRegistry) -> Result<Self> {
        let mut map = Self {
            records: BTreeMap::new(),
            ignore_unknown: registry.ignore_unknown(),
        };
        let mut seen = HashSet::new();
        let mut path = Vec::new();
        for requirement in policy.requirements(true) {
            map.track(&requirement, registry, &mut seen, &mut path)?;
        }
        Ok(map)
    }

    fn track(
        &mut self,
        requirement: &RequirementRef,
        registry: &RequirementRegistry,
        seen: &mut HashSet<usize>,
        path: &mut Vec<usize>,
    ) -> Result<()> {
        let addr = instance_ptr(requirement) as usize;
        if path.contains(&addr) {
            return Err(PolicyError::CyclicPolicy {
                name: requirement.name().clone(),
            });
        }
        if !seen.insert(addr) {
            return Ok(());
        }
        let known = registry.is_registered(requirement.name());
        self.records
            .entry(requirement.name().clone())
            .or_default()
            .push(RequirementRecord::new(requirement.clone(), known));

        if let Some(nested) = requirement.nested_policy() {
            path.push(addr);
            for child in nested.requirements(true) {
                self.track(&child, registry, seen, path)?;
            }
            path.pop();
        }
        Ok(())
    }

    /// Records for a requirement type, in tracking order.
    pub fn get(&self, name: &QName) -> &[RequirementRecord] {
        self.records.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn records(&self) -> impl Iterator<Item = &RequirementRecord> {
        self.records.values().flatten()
    }

    pub fn names(&self) -> impl Iterator<Item = &QName> {
        self.records.keys()
    }

    /// Number of tracked occurrences.
    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Mark every occurrence of a requirement type as honored. Returns how
    /// many occurrences were tracked under that name.
    pub fn assert_requirement(&self, name: &QName) -> usize {
        let records = self.get(name);
        for record in records {
            record.set_asserted();
        }
        records.len()
    }

    /// Mark one specific occurrence as honored.
    pub fn assert_instance(&self, requirement: &RequirementRef) -> bool {
        match self.record_for(requirement.name(), instance_ptr(requirement)) {
            Some(record) => {
                record.set_asserted();
                true
            }
            None => false,
        }
    }

    /// Attach a failure detail to every unasserted occurrence of a type.
    pub fn record_failure(&self, name: &QName, detail: &str) {
        for record in self.get(name).iter().filter(|r| !r.is_asserted()) {
            record.record_failure(detail);
        }
    }

    /// Whether the occurrence at `ptr` counts as asserted. Unknown types
    /// pass when unknown requirements are ignored.
    pub fn is_instance_asserted(&self, name: &QName, ptr: *const ()) -> bool {
        self.record_for(name, ptr)
            .is_some_and(|record| self.effectively_asserted(record))
    }

    /// Requirements currently asserted, in tracking order.
    pub fn asserted_requirements(&self) -> Vec<RequirementRef> {
        self.records()
            .filter(|r| self.effectively_asserted(r))
            .map(|r| r.requirement.clone())
            .collect()
    }

    /// Whether every member of `alternative` is satisfied.
    pub fn alternative_satisfied(&self, alternative: &Alternative) -> bool {
        alternative.iter().all(|r| r.is_satisfied(self))
    }

    /// Whether some alternative of `policy` is satisfied. A policy without
    /// alternatives imposes nothing.
    pub fn policy_satisfied(&self, policy: &Policy) -> bool {
        let alternatives = policy.alternatives();
        alternatives.is_empty() || alternatives.iter().any(|a| self.alternative_satisfied(a))
    }

    /// Alternative-level verification against `policy`.
    pub fn verify_effective_policy(&self, policy: &Policy) -> Result<Verification> {
        self.ensure_known()?;
        let alternatives = policy.alternatives();
        if alternatives.is_empty() {
            return Ok(Verification::Satisfied { alternative: None });
        }
        let mut fault = VerificationFault::default();
        for (index, alternative) in alternatives.iter().enumerate() {
            let unmet = self.unmet(alternative);
            if unmet.is_empty() {
                return Ok(Verification::Satisfied {
                    alternative: Some(index),
                });
            }
            fault.alternatives.push(UnmetAlternative { index, unmet });
        }
        Ok(Verification::Unsatisfied(fault))
    }

    /// Succeeds if at least one alternative of `policy` is fully honored.
    pub fn check_effective_policy(&self, policy: &Policy) -> Result<()> {
        match self.verify_effective_policy(policy)? {
            Verification::Satisfied { .. } => Ok(()),
            Verification::Unsatisfied(fault) => Err(PolicyError::Unsatisfied(fault)),
        }
    }

    /// Succeeds only if every tracked occurrence is asserted.
    pub fn check(&self) -> Result<()> {
        self.ensure_known()?;
        let unasserted: Vec<UnmetRequirement> = self
            .records()
            .filter(|r| !self.effectively_asserted(r))
            .map(|r| UnmetRequirement {
                name: r.requirement.name().clone(),
                detail: r.failure().or_else(|| r.requirement.diagnostic()),
            })
            .collect();
        if unasserted.is_empty() {
            return Ok(());
        }
        Err(PolicyError::Unsatisfied(VerificationFault {
            alternatives: Vec::new(),
            unasserted,
        }))
    }

    /// Unmet members of an alternative with their diagnostics.
    pub fn unmet(&self, alternative: &Alternative) -> Vec<UnmetRequirement> {
        alternative
            .iter()
            .filter(|r| !r.is_satisfied(self))
            .map(|r| UnmetRequirement {
                name: r.name().clone(),
                detail: self.detail_for(r),
            })
            .collect()
    }

    fn detail_for(&self, requirement: &RequirementRef) -> Option<String> {
        let record = self.record_for(requirement.name(), instance_ptr(requirement));
        record
            .and_then(RequirementRecord::failure)
            .or_else(|| requirement.diagnostic())
            .or_else(|| {
                let own_asserted = record.is_some_and(|r| self.effectively_asserted(r));
                (own_asserted && requirement.nested_policy().is_some())
                    .then(|| "no alternative of the nested policy is satisfied".to_string())
            })
    }

    fn record_for(&self, name: &QName, ptr: *const ()) -> Option<&RequirementRecord> {
        self.get(name).iter().find(|r| r.matches(ptr))
    }

    fn effectively_asserted(&self, record: &RequirementRecord) -> bool {
        record.is_asserted() || (!record.known && self.ignore_unknown)
    }

    fn ensure_known(&self) -> Result<()> {
        if self.ignore_unknown {
            return Ok(());
        }
        match self.records().find(|r| !r.known) {
            Some(unknown) => Err(PolicyError::UnknownRequirementType {
                name: unknown.requirement.name().clone(),
            }),
            None => Ok(()),
        }
    }
}
