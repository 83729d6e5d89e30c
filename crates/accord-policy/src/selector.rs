// selector.rs: Choosing the alternative to enforce.
//
// Candidates are the policy's alternatives that can be supported (each
// requirement has a handler, an assertor guarantees it, or it is optional)
// and, when answering a request that already proved some requirements, that
// cover every requirement type the request proved. Strategies differ only
// in which candidate they pick.

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::SelectorKind;
use crate::policy::{Alternative, Policy};
use crate::qname::QName;
use crate::requirement::RequirementRef;

/// Decides whether an alternative can be enforced at all.
pub trait AlternativeSupport {
    fn supports_alternative(&self, alternative: &Alternative) -> bool;
}

impl<F> AlternativeSupport for F
where
    F: Fn(&Alternative) -> bool,
{
    fn supports_alternative(&self, alternative: &Alternative) -> bool {
        self(alternative)
    }
}

pub trait AlternativeSelector: Send + Sync {
    /// Pick one alternative of `policy`.
    ///
    /// A policy with zero alternatives yields the empty alternative. `None`
    /// means the policy has alternatives but none is selectable.
    fn select(
        &self,
        policy: &Policy,
        support: &dyn AlternativeSupport,
        known_satisfied: Option<&[RequirementRef]>,
    ) -> Option<Alternative>;
}

/// Alternatives of `policy` that are supported and cover `known_satisfied`,
/// in normal-form order.
pub fn candidates(
    policy: &Policy,
    support: &dyn AlternativeSupport,
    known_satisfied: Option<&[RequirementRef]>,
) -> Vec<Alternative> {
    let required: BTreeSet<&QName> = known_satisfied
        .unwrap_or(&[])
        .iter()
        .map(|r| r.name())
        .collect();
    policy
        .alternatives()
        .into_iter()
        .filter(|alt| {
            let names: BTreeSet<&QName> = alt.names().into_iter().collect();
            required.is_subset(&names)
        })
        .filter(|alt| support.supports_alternative(alt))
        .collect()
}

fn pick(
    policy: &Policy,
    support: &dyn AlternativeSupport,
    known_satisfied: Option<&[RequirementRef]>,
    choose: impl FnOnce(Vec<Alternative>) -> Option<Alternative>,
) -> Option<Alternative> {
    if policy.alternatives().is_empty() {
        return Some(Alternative::new());
    }
    let candidates = candidates(policy, support, known_satisfied);
    debug!(candidates = candidates.len(), "selecting alternative");
    choose(candidates)
}

/// Picks the candidate with the fewest requirements; the first wins ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimalAlternativeSelector;

impl AlternativeSelector for MinimalAlternativeSelector {
    fn select(
        &self,
        policy: &Policy,
        support: &dyn AlternativeSupport,
        known_satisfied: Option<&[RequirementRef]>,
    ) -> Option<Alternative> {
        pick(policy, support, known_satisfied, |candidates| {
            candidates.into_iter().min_by_key(Alternative::len)
        })
    }
}

/// Picks the candidate with the most requirements; the first wins ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaximalAlternativeSelector;

impl AlternativeSelector for MaximalAlternativeSelector {
    fn select(
        &self,
        policy: &Policy,
        support: &dyn AlternativeSupport,
        known_satisfied: Option<&[RequirementRef]>,
    ) -> Option<Alternative> {
        pick(policy, support, known_satisfied, |candidates| {
            // max_by_key would keep the last of equal maxima.
            candidates.into_iter().fold(None, |best: Option<Alternative>, alt| match best {
                Some(b) if b.len() >= alt.len() => Some(b),
                _ => Some(alt),
            })
        })
    }
}

/// Picks the first supported candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstAlternativeSelector;

impl AlternativeSelector for FirstAlternativeSelector {
    fn select(
        &self,
        policy: &Policy,
        support: &dyn AlternativeSupport,
        known_satisfied: Option<&[RequirementRef]>,
    ) -> Option<Alternative> {
        pick(policy, support, known_satisfied, |candidates| candidates.into_iter().next())
    }
}

impl SelectorKind {
    /// The stock selector for this kind.
    pub fn selector(self) -> Box<dyn AlternativeSelector> {
        match self {
            SelectorKind::Minimal => Box::new(MinimalAlternativeSelector),
            SelectorKind::Maximal => Box::new(MaximalAlternativeSelector),
            SelectorKind::First => Box::new(FirstAlternativeSelector),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirement::PrimitiveRequirement;

    fn req(local: &str) -> RequirementRef {
        PrimitiveRequirement::new(QName::new("urn:test", local)).into_ref()
    }

    fn sized(sizes: &[usize]) -> Policy {
        Policy::from_alternatives(sizes.iter().enumerate().map(|(i, &n)| {
            (0..n)
                .map(|j| req(&format!("R{}_{}", i, j)))
                .collect::<Alternative>()
        }))
    }

    fn accept_all(_: &Alternative) -> bool {
        true
    }

    #[test]
    fn minimal_picks_smallest_regardless_of_order() {
        for sizes in [[3, 1, 2], [1, 2, 3], [2, 3, 1]] {
            let chosen = MinimalAlternativeSelector
                .select(&sized(&sizes), &accept_all, None)
                .unwrap();
            assert_eq!(chosen.len(), 1, "sizes {:?}", sizes);
        }
    }

    #[test]
    fn minimal_breaks_ties_by_first_occurrence() {
        let chosen = MinimalAlternativeSelector
            .select(&sized(&[2, 1, 1]), &accept_all, None)
            .unwrap();
        assert_eq!(chosen.names()[0].local_name, "R1_0");
    }

    #[test]
    fn maximal_and_first_strategies() {
        let policy = sized(&[2, 3, 3]);
        let max = MaximalAlternativeSelector.select(&policy, &accept_all, None).unwrap();
        assert_eq!(max.names()[0].local_name, "R1_0");
        let first = FirstAlternativeSelector.select(&policy, &accept_all, None).unwrap();
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn unsupported_alternatives_are_skipped() {
        let policy = sized(&[3, 1, 2]);
        let no_singletons = |alt: &Alternative| alt.len() != 1;
        let chosen = MinimalAlternativeSelector
            .select(&policy, &no_singletons, None)
            .unwrap();
        assert_eq!(chosen.len(), 2);

        let nothing = |_: &Alternative| false;
        assert!(MinimalAlternativeSelector.select(&policy, &nothing, None).is_none());
    }

    #[test]
    fn zero_alternatives_select_the_empty_alternative() {
        let policy = Policy::from_alternatives(Vec::new());
        let chosen = MinimalAlternativeSelector.select(&policy, &accept_all, None).unwrap();
        assert!(chosen.is_empty());
    }

    #[test]
    fn known_satisfied_requirements_must_be_covered() {
        let signed = req("Signed");
        let policy = Policy::from_alternatives([
            [req("Plain")].into_iter().collect::<Alternative>(),
            [req("Signed"), req("Timestamp")].into_iter().collect::<Alternative>(),
        ]);
        let chosen = MinimalAlternativeSelector
            .select(&policy, &accept_all, Some(std::slice::from_ref(&signed)))
            .unwrap();
        assert_eq!(chosen.len(), 2);
        assert_eq!(chosen.names()[0].local_name, "Signed");
    }

    #[test]
    fn kinds_map_to_selectors() {
        let policy = sized(&[2, 1]);
        let min = SelectorKind::Minimal.selector().select(&policy, &accept_all, None).unwrap();
        assert_eq!(min.len(), 1);
        let first = SelectorKind::First.selector().select(&policy, &accept_all, None).unwrap();
        assert_eq!(first.len(), 2);
    }
}
