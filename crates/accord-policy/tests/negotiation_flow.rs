// negotiation_flow.rs: End-to-end negotiation between a client and a server.
//
// The server's endpoint policy offers two alternatives:
//
//   ExactlyOne { All { SecureTransport }, All { MessageSignature } }
//
// The client insists on SecureTransport. This exercises:
//
//   1. Engine configuration loaded from accord.toml
//   2. Server policy loaded from a YAML document through the registry
//   3. Client override intersected with the endpoint policy
//   4. A transport assertor vouching for SecureTransport with no handlers
//   5. A signature handler asserting (or failing) MessageSignature inbound
//   6. Verification faults naming the unmet requirements
//   7. Effective-policy caching and invalidation

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use tempfile::tempdir;

use accord_policy::{
    Assertor, Direction, Exchange, ExchangeKey, InterceptorProvider, InterceptorRef, InterceptorRegistry,
    IntersectionMode, Policy, PolicyConfig, PolicyDocument, PolicyEngine, PolicyError, PolicyInterceptor,
    PolicyProvider, PolicySource, PrimitiveRequirementBuilder, QName, RequirementRegistry, Result,
};

const SEC: &str = "urn:example:sec";

const SERVER_POLICY: &str = r#"
exactly_one:
  - all:
      - requirement:
          name: "{urn:example:sec}SecureTransport"
  - all:
      - requirement:
          name: "{urn:example:sec}MessageSignature"
"#;

const CLIENT_POLICY: &str = r#"{"all": [{"requirement": {"name": "{urn:example:sec}SecureTransport"}}]}"#;

fn secure_transport() -> QName {
    QName::new(SEC, "SecureTransport")
}

fn message_signature() -> QName {
    QName::new(SEC, "MessageSignature")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn registry() -> RequirementRegistry {
    let mut registry = RequirementRegistry::new();
    registry.register(Arc::new(PrimitiveRequirementBuilder::new([
        secure_transport(),
        message_signature(),
    ])));
    registry
}

/// Attaches the server's policy to every endpoint.
struct EndpointPolicies {
    policies: HashMap<String, Policy>,
}

impl PolicyProvider for EndpointPolicies {
    fn policy_for(&self, source: PolicySource, key: &ExchangeKey) -> Option<Policy> {
        match source {
            PolicySource::Endpoint => self.policies.get(&key.endpoint).cloned(),
            _ => None,
        }
    }
}

/// An HTTPS transport: guarantees SecureTransport by itself.
struct HttpsTransport;

impl Assertor for HttpsTransport {
    fn can_assert(&self, name: &QName) -> bool {
        *name == secure_transport()
    }
}

/// Checks the signature property set by the message layer.
struct SignatureCheck;

impl PolicyInterceptor for SignatureCheck {
    fn id(&self) -> &str {
        "signature-check"
    }

    fn handle(&self, exchange: &Exchange) -> Result<()> {
        match exchange.property("signature").as_deref() {
            Some("valid") => {
                exchange.satisfaction().assert_requirement(&message_signature());
            }
            Some(other) => exchange
                .satisfaction()
                .record_failure(&message_signature(), &format!("signature {}", other)),
            None => exchange
                .satisfaction()
                .record_failure(&message_signature(), "message is not signed"),
        }
        Ok(())
    }
}

struct SignatureProvider;

impl InterceptorProvider for SignatureProvider {
    fn names(&self) -> Vec<QName> {
        vec![message_signature()]
    }

    fn interceptors(&self, _direction: Direction) -> Vec<InterceptorRef> {
        vec![Arc::new(SignatureCheck)]
    }
}

/// Builds an engine from accord.toml and the server's YAML policy document.
fn setup(dir: &std::path::Path) -> PolicyEngine {
    fs::write(dir.join("accord.toml"), "selector = \"minimal\"\n").unwrap();
    fs::write(dir.join("greeter.yaml"), SERVER_POLICY).unwrap();

    let config = PolicyConfig::load_or_default(&dir.join("accord.toml")).unwrap();
    let mut engine = PolicyEngine::new(config, registry()).unwrap();

    let document = PolicyDocument::load(&dir.join("greeter.yaml")).unwrap();
    let server_policy = engine.registry().build_policy(&document).unwrap();
    let mut policies = HashMap::new();
    policies.insert("Greeter".to_string(), server_policy);
    engine.add_provider(Arc::new(EndpointPolicies { policies }));

    let mut interceptors = InterceptorRegistry::new();
    interceptors.register(Arc::new(SignatureProvider));
    engine.set_interceptor_registry(interceptors);
    engine
}

#[test]
fn client_and_server_agree_on_secure_transport() {
    init_tracing();
    let dir = tempdir().unwrap();
    let engine = setup(dir.path());

    let key = ExchangeKey::client_request("Greeter", "greet");
    let client = engine
        .registry()
        .build_policy(&PolicyDocument::from_json(CLIENT_POLICY).unwrap())
        .unwrap();
    engine.set_policy_override(key.clone(), client);

    let exchange = engine.begin_exchange(&key, Some(&HttpsTransport)).unwrap();
    let effective = exchange.effective_policy();

    // Only the SecureTransport alternative survives intersection; it holds
    // the client's and the server's instance.
    assert_eq!(effective.policy().alternatives().len(), 1);
    let chosen = effective.chosen_alternative();
    assert_eq!(chosen.len(), 2);
    assert!(chosen.names().iter().all(|n| **n == secure_transport()));
    assert!(effective.interceptors().is_empty());

    exchange.run_interceptors().unwrap();
    assert!(exchange.verify().is_err());

    exchange.assert_by(&HttpsTransport);
    exchange.verify().unwrap();
    exchange.verify_strict().unwrap();
}

#[test]
fn client_without_tls_falls_back_to_signing() {
    init_tracing();
    let dir = tempdir().unwrap();
    let engine = setup(dir.path());

    // No assertor: SecureTransport has no handler, so only the signing
    // alternative is supportable.
    let key = ExchangeKey::client_request("Greeter", "greet");
    let exchange = engine.begin_exchange(&key, None).unwrap();
    let chosen = exchange.effective_policy().chosen_alternative().names()[0].clone();
    assert_eq!(chosen, message_signature());
    assert_eq!(exchange.effective_policy().interceptors()[0].id(), "signature-check");

    exchange.set_property("signature", "valid");
    exchange.run_interceptors().unwrap();
    exchange.verify().unwrap();
}

#[test]
fn server_verifies_inbound_against_any_alternative() {
    init_tracing();
    let dir = tempdir().unwrap();
    let engine = setup(dir.path());
    let key = ExchangeKey::server_request("Greeter", "greet");

    // Signed message over plain HTTP.
    let signed = engine.begin_exchange(&key, None).unwrap();
    signed.set_property("signature", "valid");
    signed.run_interceptors().unwrap();
    signed.verify().unwrap();

    // Unsigned message over HTTPS.
    let tls = engine.begin_exchange(&key, Some(&HttpsTransport)).unwrap();
    tls.run_interceptors().unwrap();
    tls.assert_by(&HttpsTransport);
    tls.verify().unwrap();
    // The strict check wants both types asserted.
    assert!(tls.verify_strict().is_err());
}

#[test]
fn unsatisfied_inbound_message_reports_every_alternative() {
    init_tracing();
    let dir = tempdir().unwrap();
    let engine = setup(dir.path());
    let key = ExchangeKey::server_request("Greeter", "greet");

    let tampered = engine.begin_exchange(&key, None).unwrap();
    tampered.set_property("signature", "digest mismatch");
    tampered.run_interceptors().unwrap();

    let err = tampered.verify().unwrap_err();
    assert!(!err.is_configuration());
    let PolicyError::Unsatisfied(fault) = err else {
        panic!("expected an unsatisfied policy, got {:?}", err);
    };
    assert_eq!(fault.alternatives.len(), 2);
    let details: Vec<Option<String>> = fault
        .alternatives
        .iter()
        .flat_map(|alt| alt.unmet.iter())
        .filter(|u| u.name == message_signature())
        .map(|u| u.detail.clone())
        .collect();
    assert_eq!(details, vec![Some("signature digest mismatch".to_string())]);

    // The fault serializes for diagnostics.
    let json = serde_json::to_value(&fault).unwrap();
    assert!(json["alternatives"].is_array());
}

#[test]
fn effective_policy_is_shared_until_the_endpoint_is_stopped() {
    init_tracing();
    let dir = tempdir().unwrap();
    let engine = setup(dir.path());
    let key = ExchangeKey::server_request("Greeter", "greet");

    let first = engine.effective_policy(&key, None).unwrap();
    let second = engine.begin_exchange(&key, None).unwrap();
    assert!(Arc::ptr_eq(&first, second.effective_policy()));

    assert_eq!(engine.invalidate_endpoint("Greeter"), 1);
    let third = engine.effective_policy(&key, None).unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert!(third.resolved_at() >= first.resolved_at());
}

#[test]
fn lax_configuration_is_refused() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("accord.toml");
    fs::write(&path, "intersection = \"lax\"\n").unwrap();

    let config = PolicyConfig::load(&path).unwrap();
    assert_eq!(config.intersection, IntersectionMode::Lax);
    let err = PolicyEngine::new(config, registry()).unwrap_err();
    assert!(matches!(err, PolicyError::UnsupportedMode { .. }));
}

#[test]
fn unknown_requirement_types_fail_closed_by_default() {
    let dir = tempdir().unwrap();
    let engine = setup(dir.path());
    let document = PolicyDocument::from_json(r#"{"requirement": {"name": "{urn:example:rm}Reliable"}}"#).unwrap();
    let err = engine.registry().build_policy(&document).unwrap_err();
    assert!(matches!(err, PolicyError::UnknownRequirementType { .. }));
}
