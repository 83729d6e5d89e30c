// qname.rs: Qualified names identifying requirement types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A namespace-qualified name, e.g. `{http://docs.oasis-open.org/ws-sx/ws-securitypolicy/200702}TransportBinding`.
///
/// Requirement builders, interceptor providers and satisfaction records are
/// all keyed by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QName {
    pub namespace: String,
    pub local_name: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local_name: local_name.into(),
        }
    }

    /// Parse the `{namespace}local` notation produced by `Display`.
    /// A string without braces is taken as a local name in no namespace.
    pub fn parse(s: &str) -> Option<Self> {
        match s.strip_prefix('{') {
            Some(rest) => {
                let (ns, local) = rest.split_once('}')?;
                if local.is_empty() {
                    return None;
                }
                Some(Self::new(ns, local))
            }
            None if !s.is_empty() && !s.contains('}') => Some(Self::new("", s)),
            None => None,
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.local_name)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local_name)
        }
    }
}

impl TryFrom<String> for QName {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        QName::parse(&s).ok_or_else(|| format!("malformed qualified name '{}'", s))
    }
}

impl From<QName> for String {
    fn from(name: QName) -> Self {
        name.to_string()
    }
}
