// effective.rs: Exchange keys and the resolved per-key effective policy.
//
// An EffectivePolicy is computed once per (endpoint, operation, role,
// message) key and shared read-only by every exchange on that key. Runtime
// satisfaction state never lives here; each exchange gets its own
// SatisfactionMap.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interceptor::{InterceptorRef, InterceptorRegistry};
use crate::policy::{Alternative, Policy};
use crate::qname::QName;

/// Which side of the exchange this runtime plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Server,
}

/// Which message of the operation the key refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    /// A named fault of the operation.
    Fault(String),
}

/// Whether the message leaves or enters this runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Cache key for effective policies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeKey {
    pub endpoint: String,
    pub operation: String,
    pub role: Role,
    pub message: MessageKind,
}

impl ExchangeKey {
    pub fn new(endpoint: impl Into<String>, operation: impl Into<String>, role: Role, message: MessageKind) -> Self {
        Self {
            endpoint: endpoint.into(),
            operation: operation.into(),
            role,
            message,
        }
    }

    pub fn client_request(endpoint: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(endpoint, operation, Role::Client, MessageKind::Request)
    }

    pub fn client_response(endpoint: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(endpoint, operation, Role::Client, MessageKind::Response)
    }

    pub fn server_request(endpoint: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(endpoint, operation, Role::Server, MessageKind::Request)
    }

    pub fn server_response(endpoint: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(endpoint, operation, Role::Server, MessageKind::Response)
    }

    /// Client requests and server responses/faults go out; the rest come in.
    pub fn direction(&self) -> Direction {
        match (self.role, &self.message) {
            (Role::Client, MessageKind::Request) => Direction::Outbound,
            (Role::Client, _) => Direction::Inbound,
            (Role::Server, MessageKind::Request) => Direction::Inbound,
            (Role::Server, _) => Direction::Outbound,
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self.message, MessageKind::Fault(_))
    }
}

impl fmt::Display for ExchangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            Role::Client => "client",
            Role::Server => "server",
        };
        match &self.message {
            MessageKind::Request => write!(f, "{}.{} ({} request)", self.endpoint, self.operation, role),
            MessageKind::Response => write!(f, "{}.{} ({} response)", self.endpoint, self.operation, role),
            MessageKind::Fault(name) => {
                write!(f, "{}.{} ({} fault {})", self.endpoint, self.operation, role, name)
            }
        }
    }
}

/// The negotiated policy for one exchange key.
pub struct EffectivePolicy {
    key: ExchangeKey,
    policy: Policy,
    chosen: Alternative,
    enforced: Policy,
    vocabulary: BTreeSet<QName>,
    fault_vocabulary: BTreeSet<QName>,
    interceptors: Vec<InterceptorRef>,
    fault_interceptors: Vec<InterceptorRef>,
    resolved_at: DateTime<Utc>,
}

impl EffectivePolicy {
    /// Assemble an effective policy and derive its interceptor lists.
    ///
    /// Outbound messages only need the handlers of the chosen alternative.
    /// Inbound messages may have been built against any alternative, so
    /// they get the handlers of the whole policy. `fault_vocabulary` holds
    /// the requirement types of the operation's fault messages; fault-path
    /// handlers cover those as well as the message's own types.
    pub fn new(
        key: ExchangeKey,
        policy: Policy,
        chosen: Alternative,
        fault_vocabulary: BTreeSet<QName>,
        providers: &InterceptorRegistry,
    ) -> Self {
        let message_vocabulary = policy.vocabulary(true);
        let direction = key.direction();
        let names: Vec<QName> = match direction {
            Direction::Outbound => chosen.names().into_iter().cloned().collect(),
            Direction::Inbound => message_vocabulary.iter().cloned().collect(),
        };
        let mut fault_names = names.clone();
        for name in &fault_vocabulary {
            if !fault_names.contains(name) {
                fault_names.push(name.clone());
            }
        }
        let interceptors = providers.interceptors_for(&names, direction, false);
        let fault_interceptors = providers.interceptors_for(&fault_names, direction, true);
        let enforced = match direction {
            Direction::Outbound => Policy::from_alternatives([chosen.clone()]),
            Direction::Inbound => policy.clone(),
        };
        let vocabulary = message_vocabulary.union(&fault_vocabulary).cloned().collect();
        Self {
            key,
            policy,
            chosen,
            enforced,
            vocabulary,
            fault_vocabulary,
            interceptors,
            fault_interceptors,
            resolved_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &ExchangeKey {
        &self.key
    }

    /// The merged policy expression for this key.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// The alternative selected for enforcement.
    pub fn chosen_alternative(&self) -> &Alternative {
        &self.chosen
    }

    /// The policy messages on this key are verified against: the chosen
    /// alternative for outbound messages, the whole merged policy for
    /// inbound ones.
    pub fn enforced_policy(&self) -> &Policy {
        &self.enforced
    }

    /// Every requirement type in play on the message and fault paths,
    /// optional ones included.
    pub fn vocabulary(&self) -> &BTreeSet<QName> {
        &self.vocabulary
    }

    /// Requirement types of the operation's fault messages.
    pub fn fault_vocabulary(&self) -> &BTreeSet<QName> {
        &self.fault_vocabulary
    }

    /// Normal-path stage handlers, in order.
    pub fn interceptors(&self) -> &[InterceptorRef] {
        &self.interceptors
    }

    /// Fault-path stage handlers, in order.
    pub fn fault_interceptors(&self) -> &[InterceptorRef] {
        &self.fault_interceptors
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }
}

impl fmt::Debug for EffectivePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |list: &[InterceptorRef]| list.iter().map(|i| i.id().to_string()).collect::<Vec<_>>();
        f.debug_struct("EffectivePolicy")
            .field("key", &self.key)
            .field("chosen", &self.chosen.names())
            .field("vocabulary", &self.vocabulary)
            .field("fault_vocabulary", &self.fault_vocabulary)
            .field("interceptors", &ids(&self.interceptors))
            .field("fault_interceptors", &ids(&self.fault_interceptors))
            .field("resolved_at", &self.resolved_at)
            .finish()
    }
}
