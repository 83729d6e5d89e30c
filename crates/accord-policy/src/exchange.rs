// exchange.rs: One message exchange under an effective policy.
//
// Pairs the shared, immutable EffectivePolicy of the exchange's key with a
// fresh SatisfactionMap owned by this exchange alone. The surrounding
// pipeline runs the handlers (or lets an assertor vouch for requirements),
// then verifies before handing the message on.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::effective::{EffectivePolicy, ExchangeKey};
use crate::error::{PolicyError, Result};
use crate::interceptor::Assertor;
use crate::policy::Alternative;
use crate::satisfaction::{SatisfactionMap, Verification};

#[derive(Debug)]
pub struct Exchange {
    id: Uuid,
    effective: Arc<EffectivePolicy>,
    satisfaction: SatisfactionMap,
    properties: RwLock<HashMap<String, String>>,
}

impl Exchange {
    pub fn new(effective: Arc<EffectivePolicy>, satisfaction: SatisfactionMap) -> Self {
        Self {
            id: Uuid::new_v4(),
            effective,
            satisfaction,
            properties: RwLock::new(HashMap::new()),
        }
    }

    /// Correlates the negotiate and verify passes of this exchange in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &ExchangeKey {
        self.effective.key()
    }

    pub fn effective_policy(&self) -> &Arc<EffectivePolicy> {
        &self.effective
    }

    pub fn satisfaction(&self) -> &SatisfactionMap {
        &self.satisfaction
    }

    /// Message metadata shared by the pipeline and the handlers. Handlers
    /// only see `&Exchange`, so both sides may read and record entries.
    pub fn set_property(&self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.write().insert(name.into(), value.into());
    }

    pub fn property(&self, name: &str) -> Option<String> {
        self.properties.read().get(name).cloned()
    }

    /// Run the normal-path handlers in order, stopping at the first error.
    pub fn run_interceptors(&self) -> Result<()> {
        for interceptor in self.effective.interceptors() {
            debug!(exchange = %self.id, interceptor = interceptor.id(), "running policy interceptor");
            interceptor.handle(self)?;
        }
        Ok(())
    }

    /// Run the fault-path handlers in order, stopping at the first error.
    pub fn run_fault_interceptors(&self) -> Result<()> {
        for interceptor in self.effective.fault_interceptors() {
            debug!(exchange = %self.id, interceptor = interceptor.id(), "running policy fault interceptor");
            interceptor.handle(self)?;
        }
        Ok(())
    }

    /// Let an assertor mark the requirements it guarantees.
    pub fn assert_by(&self, assertor: &dyn Assertor) {
        assertor.assert_message(&self.satisfaction);
    }

    /// Alternative-level verification against the enforced policy.
    pub fn verify(&self) -> Result<()> {
        let result = self
            .satisfaction
            .check_effective_policy(self.effective.enforced_policy());
        self.log_outcome(&result);
        result
    }

    /// The first enforced alternative this exchange fully honored, or
    /// `None` if none is. Members are top-level requirements only; nested
    /// requirements stay inside their parents.
    pub fn satisfied_alternative(&self) -> Result<Option<Alternative>> {
        let enforced = self.effective.enforced_policy();
        match self.satisfaction.verify_effective_policy(enforced)? {
            Verification::Satisfied { alternative: Some(index) } => Ok(enforced.alternatives().into_iter().nth(index)),
            Verification::Satisfied { alternative: None } => Ok(Some(Alternative::new())),
            Verification::Unsatisfied(_) => Ok(None),
        }
    }

    /// Every tracked requirement must have been asserted.
    pub fn verify_strict(&self) -> Result<()> {
        let result = self.satisfaction.check();
        self.log_outcome(&result);
        result
    }

    fn log_outcome(&self, result: &Result<()>) {
        match result {
            Ok(()) => debug!(exchange = %self.id, key = %self.key(), "policy verified"),
            Err(PolicyError::Unsatisfied(fault)) => {
                warn!(exchange = %self.id, key = %self.key(), %fault, "policy not satisfied")
            }
            Err(e) => warn!(exchange = %self.id, key = %self.key(), error = %e, "policy verification failed"),
        }
    }
}
