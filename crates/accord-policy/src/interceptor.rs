// interceptor.rs: Stage handlers contributed by requirement types, and assertors.
//
// Each requirement type may come with processing-stage handlers that enforce
// it and mark it asserted in the exchange's satisfaction map. Providers are
// looked up by qualified name. An Assertor is an external party (typically a
// transport) that guarantees some requirement types by itself, so no handler
// is needed for them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::effective::Direction;
use crate::error::Result;
use crate::exchange::Exchange;
use crate::qname::QName;
use crate::satisfaction::SatisfactionMap;

pub type InterceptorRef = Arc<dyn PolicyInterceptor>;

/// A processing-stage handler enforcing one or more requirement types.
pub trait PolicyInterceptor: Send + Sync {
    /// Stable identifier; interceptor lists hold each id at most once.
    fn id(&self) -> &str;

    /// Process the exchange's message, asserting the requirements this
    /// handler enforced.
    fn handle(&self, exchange: &Exchange) -> Result<()>;
}

/// Supplies the handlers for a set of requirement types.
pub trait InterceptorProvider: Send + Sync {
    fn names(&self) -> Vec<QName>;

    /// Normal-path handlers for messages travelling in `direction`.
    fn interceptors(&self, direction: Direction) -> Vec<InterceptorRef>;

    /// Fault-path handlers for messages travelling in `direction`.
    fn fault_interceptors(&self, _direction: Direction) -> Vec<InterceptorRef> {
        Vec::new()
    }
}

/// Something outside the handler chain that can honor requirements itself.
pub trait Assertor: Send + Sync {
    fn can_assert(&self, name: &QName) -> bool;

    /// Mark the requirements this assertor guarantees.
    fn assert_message(&self, map: &SatisfactionMap) {
        let names: Vec<QName> = map.names().filter(|n| self.can_assert(n)).cloned().collect();
        for name in &names {
            map.assert_requirement(name);
        }
    }
}

/// Maps requirement types to their interceptor providers.
#[derive(Clone, Default)]
pub struct InterceptorRegistry {
    providers: HashMap<QName, Arc<dyn InterceptorProvider>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn InterceptorProvider>) {
        for name in provider.names() {
            self.providers.insert(name, provider.clone());
        }
    }

    pub fn get(&self, name: &QName) -> Option<&Arc<dyn InterceptorProvider>> {
        self.providers.get(name)
    }

    pub fn is_registered(&self, name: &QName) -> bool {
        self.providers.contains_key(name)
    }

    /// Handlers for the given requirement types, in name order, keeping the
    /// first occurrence of every id.
    pub fn interceptors_for(&self, names: &[QName], direction: Direction, fault: bool) -> Vec<InterceptorRef> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for name in names {
            let Some(provider) = self.get(name) else {
                continue;
            };
            let list = if fault {
                provider.fault_interceptors(direction)
            } else {
                provider.interceptors(direction)
            };
            for interceptor in list {
                if seen.insert(interceptor.id().to_string()) {
                    out.push(interceptor);
                }
            }
        }
        out
    }
}
