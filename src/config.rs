//! Verification policy: the import allowlist, identifier denylist and the
//! naming rules for host-injected parameters.
//!
//! A `Policy` is built once, validated, then shared read-only by every
//! verification that uses it. Policies load from TOML:
//!
//! ```toml
//! allowed_modules = ["math", "typing"]
//! denied_identifiers = ["eval", "exec", "open"]
//! reserved_prefix = "_"
//! reserved_parameters = ["_storage", "_tx_context"]
//! lifecycle_function = "init"
//! ```
//!
//! Omitted keys keep their reference values.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::error::{Error, Result};

static REFERENCE_POLICY: OnceCell<Arc<Policy>> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    /// Modules importable by exact dotted name
    pub allowed_modules: BTreeSet<String>,
    /// Identifiers rejected anywhere in a module
    pub denied_identifiers: BTreeSet<String>,
    /// Parameters starting with this prefix are host-injected
    pub reserved_prefix: String,
    /// The only prefixed parameter names a function may declare
    pub reserved_parameters: BTreeSet<String>,
    /// Function that may declare reserved parameters only
    pub lifecycle_function: String,
}

fn owned(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allowed_modules: owned(REFERENCE_ALLOWED_MODULES),
            denied_identifiers: owned(REFERENCE_DENIED_IDENTIFIERS),
            reserved_prefix: REFERENCE_RESERVED_PREFIX.to_string(),
            reserved_parameters: owned(REFERENCE_RESERVED_PARAMETERS),
            lifecycle_function: REFERENCE_LIFECYCLE_FUNCTION.to_string(),
        }
    }
}

impl Policy {
    /// Process-wide reference policy, built on first use
    pub fn reference() -> Arc<Policy> {
        REFERENCE_POLICY
            .get_or_init(|| Arc::new(Policy::default()))
            .clone()
    }

    /// Parse and validate a TOML policy
    pub fn from_toml(contents: &str) -> Result<Self> {
        let policy: Policy = toml::from_str(contents)?;
        policy.validate()?;
        log::debug!(
            "policy loaded: modules={} denied={} reserved={}",
            policy.allowed_modules.len(),
            policy.denied_identifiers.len(),
            policy.reserved_parameters.len()
        );
        Ok(policy)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config { message: e.to_string() })
    }

    pub fn validate(&self) -> Result<()> {
        if self.reserved_prefix.is_empty() {
            return Err(Error::config("reserved_prefix must not be empty"));
        }
        if self.lifecycle_function.is_empty() {
            return Err(Error::config("lifecycle_function must not be empty"));
        }
        if let Some(name) = self
            .reserved_parameters
            .iter()
            .find(|name| !name.starts_with(&self.reserved_prefix))
        {
            return Err(Error::config(format!(
                "reserved parameter '{}' does not start with prefix '{}'",
                name, self.reserved_prefix
            )));
        }
        Ok(())
    }

    pub fn is_module_allowed(&self, module: &str) -> bool {
        self.allowed_modules.contains(module)
    }

    pub fn is_identifier_denied(&self, name: &str) -> bool {
        self.denied_identifiers.contains(name)
    }

    pub fn has_reserved_prefix(&self, parameter: &str) -> bool {
        parameter.starts_with(&self.reserved_prefix)
    }

    pub fn is_reserved_parameter(&self, parameter: &str) -> bool {
        self.reserved_parameters.contains(parameter)
    }

    pub fn is_lifecycle_function(&self, function: &str) -> bool {
        self.lifecycle_function == function
    }

    pub fn with_allowed_module(mut self, module: impl Into<String>) -> Self {
        self.allowed_modules.insert(module.into());
        self
    }

    pub fn without_allowed_module(mut self, module: &str) -> Self {
        self.allowed_modules.remove(module);
        self
    }

    pub fn with_denied_identifier(mut self, name: impl Into<String>) -> Self {
        self.denied_identifiers.insert(name.into());
        self
    }

    pub fn with_reserved_parameter(mut self, name: impl Into<String>) -> Self {
        self.reserved_parameters.insert(name.into());
        self
    }

    pub fn with_lifecycle_function(mut self, name: impl Into<String>) -> Self {
        self.lifecycle_function = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_policy_tables() {
        let policy = Policy::reference();
        for module in ["math", "cmath", "typing", "hashlib", "hmac"] {
            assert!(policy.is_module_allowed(module), "{} should be allowed", module);
        }
        assert!(!policy.is_module_allowed("os"));
        assert!(!policy.is_module_allowed("math.x"));
        assert_eq!(policy.denied_identifiers.len(), 17);
        assert!(policy.is_identifier_denied("__import__"));
        assert!(!policy.is_identifier_denied("Open"));
        assert!(Arc::ptr_eq(&policy, &Policy::reference()));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let policy = Policy::from_toml("allowed_modules = [\"math\", \"json\"]\n").expect("policy");
        assert!(policy.is_module_allowed("json"));
        assert!(!policy.is_module_allowed("typing"));
        assert!(policy.is_identifier_denied("eval"));
        assert_eq!(policy.lifecycle_function, "init");
    }

    #[test]
    fn test_validation_rejects_unprefixed_reserved_name() {
        let err = Policy::from_toml("reserved_parameters = [\"storage\"]\n").unwrap_err();
        assert!(err.to_string().contains("does not start with prefix"));

        let err = Policy::from_toml("reserved_prefix = \"\"\n").unwrap_err();
        assert!(err.to_string().contains("reserved_prefix"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(matches!(Policy::from_toml("allow = []\n"), Err(Error::Toml(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let policy = Policy::default().with_allowed_module("json").with_denied_identifier("getattr");
        let text = policy.to_toml().expect("serialize");
        assert_eq!(Policy::from_toml(&text).expect("parse"), policy);
    }
}
