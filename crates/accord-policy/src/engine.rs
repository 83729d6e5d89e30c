// engine.rs: Policy engine facade.
//
// The PolicyEngine is what the message pipeline talks to. For an exchange
// key it:
//
// 1. Collects the policy of every applicable source, in order: transport,
//    endpoint (binding), operation, message, then any client override.
//    Several providers for the same source are merged (conjunction).
// 2. Intersects the sources pairwise: intersect(intersect(s1, s2), s3)...
//    No compatible alternative is a configuration fault, never "no policy".
// 3. Selects one alternative among those the runtime can support.
// 4. Caches the resulting EffectivePolicy per key.
//
// Every exchange then gets its own SatisfactionMap; only the effective
// policy is shared. Cache construction is double-checked: concurrent misses
// may compute in parallel, the first insert wins and the others are dropped.
// Every invalidation bumps the cache generation; a build that started under
// an older generation is thrown away and redone, so a configuration change
// never loses to a build already in flight.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{IntersectionMode, PolicyConfig};
use crate::effective::{EffectivePolicy, ExchangeKey, MessageKind};
use crate::error::{PolicyError, Result};
use crate::exchange::Exchange;
use crate::interceptor::{Assertor, InterceptorRegistry};
use crate::intersect::Intersector;
use crate::policy::{Alternative, Policy};
use crate::qname::QName;
use crate::registry::RequirementRegistry;
use crate::requirement::RequirementRef;
use crate::satisfaction::SatisfactionMap;
use crate::selector::AlternativeSelector;

/// Where a contributing policy comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    Transport,
    Endpoint,
    Operation,
    Message,
}

impl PolicySource {
    /// Resolution order.
    pub const ALL: [PolicySource; 4] = [
        PolicySource::Transport,
        PolicySource::Endpoint,
        PolicySource::Operation,
        PolicySource::Message,
    ];
}

/// Retrieves raw policies attached to a subject (WSDL attachments, external
/// attachment files, programmatic configuration, ...).
pub trait PolicyProvider: Send + Sync {
    fn policy_for(&self, source: PolicySource, key: &ExchangeKey) -> Option<Policy>;

    /// Names of the faults declared by the key's operation.
    fn faults(&self, _key: &ExchangeKey) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Default)]
struct EffectiveCache {
    entries: HashMap<ExchangeKey, Arc<EffectivePolicy>>,
    generation: u64,
}

impl EffectiveCache {
    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

pub struct PolicyEngine {
    config: PolicyConfig,
    registry: RequirementRegistry,
    interceptors: InterceptorRegistry,
    providers: Vec<Arc<dyn PolicyProvider>>,
    selector: Arc<dyn AlternativeSelector>,
    overrides: RwLock<HashMap<ExchangeKey, Policy>>,
    cache: RwLock<EffectiveCache>,
}

impl fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("providers", &self.providers.len())
            .field("cached", &self.cache.read().entries.len())
            .finish()
    }
}

impl PolicyEngine {
    /// Create an engine over a populated requirement registry.
    ///
    /// The registry's unknown-type handling is taken from `config`. Lax
    /// intersection is rejected here, before anything is built.
    pub fn new(config: PolicyConfig, mut registry: RequirementRegistry) -> Result<Self> {
        if config.intersection != IntersectionMode::Strict {
            return Err(PolicyError::UnsupportedMode {
                mode: config.intersection,
            });
        }
        registry.set_ignore_unknown(config.ignore_unknown_requirements);
        let selector: Arc<dyn AlternativeSelector> = Arc::from(config.selector.selector());
        Ok(Self {
            config,
            registry,
            interceptors: InterceptorRegistry::new(),
            providers: Vec::new(),
            selector,
            overrides: RwLock::new(HashMap::new()),
            cache: RwLock::new(EffectiveCache::default()),
        })
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn registry(&self) -> &RequirementRegistry {
        &self.registry
    }

    pub fn interceptor_registry(&self) -> &InterceptorRegistry {
        &self.interceptors
    }

    /// Replace the interceptor providers. Drops cached effective policies,
    /// whose interceptor lists depend on them.
    pub fn set_interceptor_registry(&mut self, interceptors: InterceptorRegistry) {
        self.interceptors = interceptors;
        self.invalidate_all();
    }

    pub fn add_provider(&mut self, provider: Arc<dyn PolicyProvider>) {
        self.providers.push(provider);
        self.invalidate_all();
    }

    /// Plug in a custom selection strategy.
    pub fn set_selector(&mut self, selector: Arc<dyn AlternativeSelector>) {
        self.selector = selector;
        self.invalidate_all();
    }

    /// Add a client-side policy that takes part in intersection for `key`.
    pub fn set_policy_override(&self, key: ExchangeKey, policy: Policy) {
        self.overrides.write().insert(key.clone(), policy);
        self.invalidate_key(&key);
    }

    pub fn clear_policy_override(&self, key: &ExchangeKey) {
        self.overrides.write().remove(key);
        self.invalidate_key(key);
    }

    /// Aggregate the policies all providers attach to one source.
    pub fn source_policy(&self, source: PolicySource, key: &ExchangeKey) -> Option<Policy> {
        self.providers
            .iter()
            .filter_map(|p| p.policy_for(source, key))
            .reduce(|acc, p| acc.merge(&p))
    }

    /// Intersect every applicable source for `key`.
    pub fn resolve_policy(&self, key: &ExchangeKey) -> Result<Policy> {
        let mut sources: Vec<Policy> = PolicySource::ALL
            .iter()
            .filter_map(|source| self.source_policy(*source, key))
            .collect();
        if let Some(client) = self.overrides.read().get(key) {
            sources.push(client.clone());
        }

        let intersector = Intersector::new(&self.registry, self.config.intersection);
        let mut sources = sources.into_iter();
        let Some(mut combined) = sources.next() else {
            debug!(%key, "no policy sources apply");
            return Ok(Policy::new());
        };
        for next in sources {
            combined = intersector
                .intersect(&combined, &next)?
                .ok_or_else(|| PolicyError::IncompatiblePolicies {
                    context: key.to_string(),
                })?;
        }
        Ok(combined)
    }

    /// Whether every requirement of `alternative` can be honored: it is
    /// optional, some interceptor provider handles it, the assertor
    /// guarantees it, or it is an ignored unknown type.
    pub fn supports_alternative(&self, alternative: &Alternative, assertor: Option<&dyn Assertor>) -> bool {
        alternative.iter().all(|r| {
            let name = r.name();
            r.is_optional()
                || self.interceptors.is_registered(name)
                || assertor.is_some_and(|a| a.can_assert(name))
                || (self.registry.ignore_unknown() && !self.registry.is_registered(name))
        })
    }

    /// The effective policy for `key`, computed on first use and cached.
    ///
    /// The assertor only influences the first computation for a key; later
    /// calls return the cached result.
    pub fn effective_policy(&self, key: &ExchangeKey, assertor: Option<&dyn Assertor>) -> Result<Arc<EffectivePolicy>> {
        loop {
            let generation = {
                let cache = self.cache.read();
                if let Some(cached) = cache.entries.get(key) {
                    return Ok(cached.clone());
                }
                cache.generation
            };

            let computed = Arc::new(self.compute(key, assertor, None)?);
            let mut cache = self.cache.write();
            if cache.generation != generation {
                debug!(%key, "cache invalidated while resolving, resolving again");
                continue;
            }
            let entry = cache.entries.entry(key.clone()).or_insert_with(|| {
                info!(
                    %key,
                    alternatives = computed.policy().alternatives().len(),
                    chosen = computed.chosen_alternative().len(),
                    interceptors = computed.interceptors().len(),
                    "effective policy resolved"
                );
                computed.clone()
            });
            return Ok(entry.clone());
        }
    }

    /// Pin a precomputed effective policy for its key. Builds of that key
    /// already in flight do not replace it.
    pub fn set_effective_policy(&self, policy: EffectivePolicy) {
        let key = policy.key().clone();
        let mut cache = self.cache.write();
        cache.bump();
        cache.entries.insert(key, Arc::new(policy));
    }

    /// Drop every cached effective policy of an endpoint, e.g. when it is
    /// stopped or its policy configuration changes.
    pub fn invalidate_endpoint(&self, endpoint: &str) -> usize {
        let mut cache = self.cache.write();
        cache.bump();
        let before = cache.entries.len();
        cache.entries.retain(|key, _| key.endpoint != endpoint);
        let removed = before - cache.entries.len();
        if removed > 0 {
            info!(endpoint, removed, "invalidated effective policies");
        }
        removed
    }

    pub fn invalidate_all(&self) {
        let mut cache = self.cache.write();
        cache.bump();
        cache.entries.clear();
    }

    fn invalidate_key(&self, key: &ExchangeKey) {
        let mut cache = self.cache.write();
        cache.bump();
        cache.entries.remove(key);
    }

    pub fn cached_keys(&self) -> Vec<ExchangeKey> {
        self.cache.read().entries.keys().cloned().collect()
    }

    /// Fault names of the key's operation, across all providers, first
    /// occurrence kept.
    pub fn fault_names(&self, key: &ExchangeKey) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for fault in self.providers.iter().flat_map(|p| p.faults(key)) {
            if !names.contains(&fault) {
                names.push(fault);
            }
        }
        names
    }

    /// Requirement types used by the fault policies of the key's operation.
    /// A fault key has no separate fault vocabulary.
    pub fn fault_vocabulary(&self, key: &ExchangeKey) -> Result<BTreeSet<QName>> {
        let mut vocabulary = BTreeSet::new();
        if key.is_fault() {
            return Ok(vocabulary);
        }
        for fault in self.fault_names(key) {
            let fault_key = ExchangeKey::new(
                key.endpoint.clone(),
                key.operation.clone(),
                key.role,
                MessageKind::Fault(fault),
            );
            vocabulary.extend(self.resolve_policy(&fault_key)?.vocabulary(true));
        }
        Ok(vocabulary)
    }

    /// Start an exchange on `key`: shared effective policy, fresh
    /// satisfaction map.
    pub fn begin_exchange(&self, key: &ExchangeKey, assertor: Option<&dyn Assertor>) -> Result<Exchange> {
        let effective = self.effective_policy(key, assertor)?;
        let satisfaction = SatisfactionMap::new(effective.policy(), &self.registry)?;
        Ok(Exchange::new(effective, satisfaction))
    }

    /// Negotiate the outbound policy of a response in light of what the
    /// inbound request already proved. Only alternatives covering every
    /// requirement type of the alternative the request honored are
    /// considered; a request that honored none adds no constraint. Not
    /// cached.
    pub fn negotiate_response(
        &self,
        key: &ExchangeKey,
        assertor: Option<&dyn Assertor>,
        request: &Exchange,
    ) -> Result<Exchange> {
        let proven: Vec<RequirementRef> = match request.satisfied_alternative()? {
            Some(alternative) => alternative.iter().cloned().collect(),
            None => {
                debug!(%key, request = %request.id(), "request honored no alternative");
                Vec::new()
            }
        };
        let effective = Arc::new(self.compute(key, assertor, Some(proven.as_slice()))?);
        let satisfaction = SatisfactionMap::new(effective.policy(), &self.registry)?;
        Ok(Exchange::new(effective, satisfaction))
    }

    fn compute(
        &self,
        key: &ExchangeKey,
        assertor: Option<&dyn Assertor>,
        known_satisfied: Option<&[RequirementRef]>,
    ) -> Result<EffectivePolicy> {
        let policy = self.resolve_policy(key)?;
        let support = |alt: &Alternative| self.supports_alternative(alt, assertor);
        let chosen = self
            .selector
            .select(&policy, &support, known_satisfied)
            .ok_or_else(|| PolicyError::NoSelectableAlternative {
                context: key.to_string(),
            })?;
        debug!(%key, chosen = ?chosen.names(), "alternative selected");
        let fault_vocabulary = self.fault_vocabulary(key)?;
        Ok(EffectivePolicy::new(
            key.clone(),
            policy,
            chosen,
            fault_vocabulary,
            &self.interceptors,
        ))
    }
}
