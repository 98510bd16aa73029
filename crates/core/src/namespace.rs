//! Namespace scoping.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Allow-set of namespace names. Empty means every namespace is in scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceWhitelist(BTreeSet<String>);

impl NamespaceWhitelist {
    pub fn unrestricted() -> Self { Self::default() }

    pub fn is_unrestricted(&self) -> bool { self.0.is_empty() }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &str> { self.0.iter().map(String::as_str) }

    /// True when the whitelist is unrestricted or names `namespace`.
    /// Cluster-scoped resources (empty namespace) are only in scope when
    /// unrestricted.
    pub fn in_scope(&self, namespace: &str) -> bool {
        self.0.is_empty() || self.0.contains(namespace)
    }

    /// Keep the in-scope names of a live listing, in the listing's order.
    pub fn filter<I, S>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().map(Into::into).filter(|n| self.in_scope(n)).collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for NamespaceWhitelist {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }
}

impl FromStr for NamespaceWhitelist {
    type Err = std::convert::Infallible;

    /// Comma-separated names; blanks are dropped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.split(',').collect())
    }
}
