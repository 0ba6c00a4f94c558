//! Dependency reference resolution.
//!
//! Resources name their dependencies with plain strings.  [`resolve_reference`]
//! turns such a reference into a concrete [`ResourceName`] using nothing but
//! a [`NameIndex`] of the names currently visible, so it can be tested
//! without a graph or a scheduler.
//!
//! # Rules
//!
//! | Reference | Resolution |
//! |---|---|
//! | full name (`rdk:component:motor/r1:m`) | exact lookup |
//! | qualified short name (`r1:m`) | the one resource with that short name |
//! | simple name (`m`) | the one local match; else the one remote match |
//!
//! More than one local match, or no local match and matches on several
//! remotes, is [`Resolution::Ambiguous`].  `builtin` is an ordinary name.

use std::collections::{BTreeSet, HashMap};

use mechos_types::ResourceName;

/// Outcome of resolving one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResourceName),
    Ambiguous(Vec<ResourceName>),
    Unresolved,
}

/// Lookup tables over the currently visible resource names.
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    names: BTreeSet<ResourceName>,
    by_short: HashMap<String, Vec<ResourceName>>,
    by_simple: HashMap<String, Vec<ResourceName>>,
}

impl NameIndex {
    pub fn new(names: impl IntoIterator<Item = ResourceName>) -> Self {
        let mut index = Self::default();
        for name in names {
            index.insert(name);
        }
        index
    }

    pub fn insert(&mut self, name: ResourceName) {
        if !self.names.insert(name.clone()) {
            return;
        }
        self.by_short
            .entry(name.short_name())
            .or_default()
            .push(name.clone());
        self.by_simple
            .entry(name.name.clone())
            .or_default()
            .push(name);
    }

    pub fn contains(&self, name: &ResourceName) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Resolve `reference` against `index`.
pub fn resolve_reference(reference: &str, index: &NameIndex) -> Resolution {
    let reference = reference.trim();
    if reference.is_empty() {
        return Resolution::Unresolved;
    }

    if reference.contains('/') {
        return match reference.parse::<ResourceName>() {
            Ok(name) if index.contains(&name) => Resolution::Resolved(name),
            _ => Resolution::Unresolved,
        };
    }

    if reference.contains(':') {
        let candidates = index.by_short.get(reference).cloned().unwrap_or_default();
        return pick(candidates);
    }

    let matches = index.by_simple.get(reference).cloned().unwrap_or_default();
    let (local, remote): (Vec<ResourceName>, Vec<ResourceName>) =
        matches.into_iter().partition(|n| !n.is_remote());
    if !local.is_empty() {
        return pick(local);
    }
    pick(remote)
}

fn pick(mut candidates: Vec<ResourceName>) -> Resolution {
    match candidates.len() {
        0 => Resolution::Unresolved,
        1 => Resolution::Resolved(candidates.remove(0)),
        _ => {
            candidates.sort();
            Resolution::Ambiguous(candidates)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mechos_types::Api;

    fn motor(n: &str) -> ResourceName {
        ResourceName::new(Api::component("motor"), n)
    }

    #[test]
    fn local_match_wins_over_remote() {
        let index = NameIndex::new([motor("m"), motor("m").prepend_remote("r1")]);
        assert_eq!(resolve_reference("m", &index), Resolution::Resolved(motor("m")));
    }

    #[test]
    fn single_remote_match_binds() {
        let index = NameIndex::new([motor("m").prepend_remote("r1"), motor("x")]);
        assert_eq!(
            resolve_reference("m", &index),
            Resolution::Resolved(motor("m").prepend_remote("r1"))
        );
    }

    #[test]
    fn matches_on_two_remotes_are_ambiguous() {
        let r1 = motor("m").prepend_remote("r1");
        let r2 = motor("m").prepend_remote("r2");
        let index = NameIndex::new([r2.clone(), r1.clone()]);
        assert_eq!(
            resolve_reference("m", &index),
            Resolution::Ambiguous(vec![r1.clone(), r2])
        );
        assert_eq!(resolve_reference("r1:m", &index), Resolution::Resolved(r1));
        assert_eq!(resolve_reference("r3:m", &index), Resolution::Unresolved);
    }

    #[test]
    fn local_names_across_apis_are_ambiguous() {
        let sensor = ResourceName::new(Api::component("sensor"), "m");
        let index = NameIndex::new([motor("m"), sensor]);
        assert!(matches!(
            resolve_reference("m", &index),
            Resolution::Ambiguous(c) if c.len() == 2
        ));
        assert_eq!(
            resolve_reference("rdk:component:motor/m", &index),
            Resolution::Resolved(motor("m"))
        );
    }

    #[test]
    fn builtin_is_an_ordinary_name() {
        let index = NameIndex::new([motor("x")]);
        assert_eq!(resolve_reference("builtin", &index), Resolution::Unresolved);

        let user = ResourceName::new(Api::service("motion"), "builtin");
        let index = NameIndex::new([user.clone()]);
        assert_eq!(resolve_reference("builtin", &index), Resolution::Resolved(user));
    }

    #[test]
    fn unknown_and_malformed_references() {
        let index = NameIndex::new([motor("m")]);
        assert_eq!(resolve_reference("", &index), Resolution::Unresolved);
        assert_eq!(resolve_reference("nope", &index), Resolution::Unresolved);
        assert_eq!(resolve_reference("rdk:motor/m", &index), Resolution::Unresolved);
        assert_eq!(
            resolve_reference("rdk:component:motor/other", &index),
            Resolution::Unresolved
        );
    }
}
