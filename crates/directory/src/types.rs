//! Value types shared by directory clients and the engine.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag set applied to an identity (key replacement semantics).
pub type Tags = BTreeMap<String, String>;

/// Prefix marking a policy reference as already fully qualified.
const QUALIFIED_PREFIX: &str = "arn:";

/// Fully-qualified reference to a managed policy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyRef(String);

impl PolicyRef {
    /// Wrap an already-qualified reference.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The full reference string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The policy name, i.e. the segment after the last `/`.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account-scope identifier used to qualify policy names.
///
/// Fetched once per run and shared read-only between all pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountScope(String);

impl AccountScope {
    /// Create a scope from the directory's account identifier.
    pub fn new(account_id: impl Into<String>) -> Self {
        Self(account_id.into())
    }

    /// The raw account identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }

    /// Resolve a policy name to a fully-qualified reference.
    ///
    /// Names that are already qualified pass through unchanged.
    #[must_use]
    pub fn qualify(&self, policy: &str) -> PolicyRef {
        if policy.starts_with(QUALIFIED_PREFIX) {
            PolicyRef::new(policy)
        } else {
            PolicyRef::new(format!("arn:aws:iam::{}:policy/{policy}", self.0))
        }
    }
}

impl fmt::Display for AccountScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualify_policy_name() {
        let scope = AccountScope::new("123456789012");
        let policy = scope.qualify("EngReadOnly");
        assert_eq!(
            policy.as_str(),
            "arn:aws:iam::123456789012:policy/EngReadOnly"
        );
        assert_eq!(policy.name(), "EngReadOnly");
    }

    #[test]
    fn test_qualified_reference_passes_through() {
        let scope = AccountScope::new("123456789012");
        let policy = scope.qualify("arn:aws:iam::aws:policy/ReadOnlyAccess");
        assert_eq!(policy.as_str(), "arn:aws:iam::aws:policy/ReadOnlyAccess");
        assert_eq!(policy.name(), "ReadOnlyAccess");
    }

    #[test]
    fn test_policy_ref_serializes_as_string() -> Result<(), serde_json::Error> {
        let policy = PolicyRef::new("arn:aws:iam::1:policy/P");
        assert_eq!(serde_json::to_string(&policy)?, "\"arn:aws:iam::1:policy/P\"");
        Ok(())
    }
}
