// document.rs: Serialized policy form for programmatic configuration.
//
// Policies usually arrive from an external document builder (WSDL policy
// attachments and the like). For programmatic configuration the same tree is
// accepted as JSON or YAML:
//
// ```yaml
// exactly_one:
//   - all:
//       - requirement:
//           name: "{urn:example:sec}TransportBinding"
//           payload: { protection: "tls" }
//   - all:
//       - requirement:
//           name: "{urn:example:sec}MessageSignature"
//           optional: true
// ```
//
// Operators are single-key maps, not YAML tags, in both directions.
//
// Turning a document into a Policy is the RequirementRegistry's job, since
// each requirement element is handed to the builder registered for its name.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PolicyError, Result};
use crate::qname::QName;

/// One node of a serialized policy tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDocument {
    All(Vec<PolicyDocument>),
    ExactlyOne(Vec<PolicyDocument>),
    Requirement(RequirementElement),
}

/// The serialized form of a single requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementElement {
    pub name: QName,

    #[serde(default)]
    pub optional: bool,

    /// Type-specific content, opaque to everything but the builder.
    #[serde(default)]
    pub payload: Value,

    /// Nested sub-policy governing this requirement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Box<PolicyDocument>>,
}

impl RequirementElement {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            optional: false,
            payload: Value::Null,
            policy: None,
        }
    }
}

impl PolicyDocument {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| PolicyError::InvalidDocument {
            reason: e.to_string(),
        })
    }

    /// Parse the YAML form, where every operator is a single-key map
    /// (`all:`, `exactly_one:`, `requirement:`) rather than a YAML tag.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::with::singleton_map_recursive::deserialize(serde_yaml::Deserializer::from_str(content)).map_err(
            |e| PolicyError::InvalidDocument {
                reason: e.to_string(),
            },
        )
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PolicyError::InvalidDocument {
            reason: e.to_string(),
        })
    }

    /// Render the YAML form accepted by [`PolicyDocument::from_yaml`].
    pub fn to_yaml(&self) -> Result<String> {
        let invalid = |e: serde_yaml::Error| PolicyError::InvalidDocument {
            reason: e.to_string(),
        };
        let mut out = Vec::new();
        let mut serializer = serde_yaml::Serializer::new(&mut out);
        serde_yaml::with::singleton_map_recursive::serialize(self, &mut serializer).map_err(invalid)?;
        drop(serializer);
        String::from_utf8(out).map_err(|e| PolicyError::InvalidDocument {
            reason: e.to_string(),
        })
    }

    /// Load a document, choosing the format by file extension
    /// (`.json`, or `.yaml`/`.yml`).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            other => Err(PolicyError::InvalidDocument {
                reason: format!(
                    "unsupported policy document extension {:?} for '{}'",
                    other,
                    path.display()
                ),
            }),
        }
    }
}
