//! Composable predicates over host attributes.
//!
//! Platform confinement is decided before any scheduling, as an explicit
//! run/skip value rather than thrown-and-rescued control flow.

use std::sync::Arc;

use crate::host::{Host, Role};

/// Scheduling decision produced by evaluating a predicate over hosts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    /// At least one host satisfies the predicate.
    Run,
    /// No host satisfies the predicate.
    Skip,
}

/// Pure predicate over a single host, composable with and/or/not.
#[derive(Clone)]
pub struct HostPredicate(Arc<dyn Fn(&Host) -> bool + Send + Sync>);

impl HostPredicate {
    /// Wraps an arbitrary predicate function.
    #[must_use]
    pub fn from_fn<F>(predicate: F) -> Self
    where
        F: Fn(&Host) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    /// Matches hosts whose platform starts with `prefix`.
    #[must_use]
    pub fn platform_starts_with(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::from_fn(move |host| host.config().platform.starts_with(&prefix))
    }

    /// Matches hosts carrying `role`.
    #[must_use]
    pub fn has_role(role: Role) -> Self {
        Self::from_fn(move |host| host.has_role(&role))
    }

    /// Matches hosts named `name`.
    #[must_use]
    pub fn name_is(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::from_fn(move |host| host.name() == name)
    }

    /// Conjunction.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::from_fn(move |host| self.matches(host) && other.matches(host))
    }

    /// Disjunction.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::from_fn(move |host| self.matches(host) || other.matches(host))
    }

    /// Negation.
    #[must_use]
    pub fn not(self) -> Self {
        Self::from_fn(move |host| !self.matches(host))
    }

    /// Evaluates the predicate against one host.
    #[must_use]
    pub fn matches(&self, host: &Host) -> bool {
        (self.0)(host)
    }
}

impl std::fmt::Debug for HostPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HostPredicate")
    }
}

/// Evaluates `predicate` over the inventory: run when any host matches,
/// skip otherwise.
pub fn decide<'a>(
    predicate: &HostPredicate,
    hosts: impl IntoIterator<Item = &'a Host>,
) -> Decision {
    if hosts.into_iter().any(|host| predicate.matches(host)) {
        Decision::Run
    } else {
        Decision::Skip
    }
}
