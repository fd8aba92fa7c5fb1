//! Protected prefixes and declaration validation.

use std::collections::BTreeSet;

use crate::model::entry::validate_arn;
use crate::model::{EntryKind, MappingEntry, SnippetSpec, ValidationError};

/// RBAC name prefix of node identities managed by the platform.
pub const DEFAULT_PROTECTED_PREFIX: &str = "system:node:";

/// Merge-time rules shared by every snippet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergePolicy {
    protected_prefixes: Vec<String>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            protected_prefixes: vec![DEFAULT_PROTECTED_PREFIX.to_owned()],
        }
    }
}

impl MergePolicy {
    /// A policy with the given protected prefixes. Empty prefixes are ignored.
    #[must_use]
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            protected_prefixes: prefixes
                .into_iter()
                .map(Into::into)
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Configured prefixes.
    #[must_use]
    pub fn protected_prefixes(&self) -> &[String] {
        &self.protected_prefixes
    }

    /// `true` if `rbac_name` falls under a protected prefix.
    #[must_use]
    pub fn is_protected_name(&self, rbac_name: &str) -> bool {
        self.protected_prefixes
            .iter()
            .any(|p| rbac_name.starts_with(p.as_str()))
    }

    /// `true` if the entry is platform-managed.
    #[must_use]
    pub fn is_protected(&self, entry: &MappingEntry) -> bool {
        self.is_protected_name(&entry.rbac_name)
    }
}

/// Check a declaration before it is merged.
///
/// Rejects malformed ARNs, empty RBAC names, RBAC names under a protected
/// prefix, and an ARN declared twice within one kind.
///
/// # Errors
/// Returns the first problem found, in declaration order.
pub fn validate(spec: &SnippetSpec, policy: &MergePolicy) -> Result<(), ValidationError> {
    for kind in EntryKind::ALL {
        let mut seen = BTreeSet::new();
        for entry in spec.entries(kind) {
            validate_arn(kind, &entry.principal_arn)?;
            if entry.rbac_name.is_empty() {
                return Err(ValidationError {
                    subject: format!("username for {kind}"),
                    value: entry.principal_arn.clone(),
                    reason: "must not be empty".to_owned(),
                });
            }
            if policy.is_protected(entry) {
                return Err(ValidationError {
                    subject: format!("username for {kind} {}", entry.principal_arn),
                    value: entry.rbac_name.clone(),
                    reason: "uses a protected prefix reserved for platform identities".to_owned(),
                });
            }
            if !seen.insert(entry.principal_arn.as_str()) {
                return Err(ValidationError {
                    subject: format!("{kind} arn"),
                    value: entry.principal_arn.clone(),
                    reason: "declared more than once".to_owned(),
                });
            }
        }
    }
    Ok(())
}
