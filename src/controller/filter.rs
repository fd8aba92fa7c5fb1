//! Namespace watch filter.

use std::collections::BTreeSet;

/// Which namespaces' snippets the controller handles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceFilter {
    /// `None` admits everything.
    allowed: Option<BTreeSet<String>>,
}

impl NamespaceFilter {
    /// Build from a watch list. An empty list, or one holding only empty
    /// strings, admits every namespace.
    #[must_use]
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed: BTreeSet<String> = namespaces
            .into_iter()
            .filter(|ns| !ns.as_ref().is_empty())
            .map(|ns| ns.as_ref().to_owned())
            .collect();
        Self {
            allowed: (!allowed.is_empty()).then_some(allowed),
        }
    }

    /// `true` if snippets in `namespace` are handled.
    #[must_use]
    pub fn admits(&self, namespace: &str) -> bool {
        self.allowed
            .as_ref()
            .is_none_or(|allowed| allowed.contains(namespace))
    }

    /// `true` if every namespace is admitted.
    #[must_use]
    pub const fn admits_all(&self) -> bool {
        self.allowed.is_none()
    }
}
