//! Config differ: what changed between two [`Snapshot`]s.
//!
//! Every kind (components, services, remotes, processes, modules) is indexed
//! by its key and compared independently.  Entries present in both snapshots
//! with identical contents are left out of the [`Diff`] entirely.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use mechos_types::{
    MechError, ModuleConfig, ProcessConfig, RemoteConfig, ResourceConfig, ResourceName, Snapshot,
};

/// Added, modified, and removed entries of one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct KindDiff<T> {
    pub added: Vec<T>,
    pub modified: Vec<T>,
    pub removed: Vec<T>,
}

impl<T> Default for KindDiff<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            modified: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl<T> KindDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Changes between two snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub components: KindDiff<ResourceConfig>,
    pub services: KindDiff<ResourceConfig>,
    pub remotes: KindDiff<RemoteConfig>,
    pub processes: KindDiff<ProcessConfig>,
    pub modules: KindDiff<ModuleConfig>,
    /// True when every kind is unchanged.
    pub resources_equal: bool,
}

impl Diff {
    /// Added components and services.
    pub fn added_resources(&self) -> impl Iterator<Item = &ResourceConfig> {
        self.components.added.iter().chain(&self.services.added)
    }

    /// Modified components and services.
    pub fn modified_resources(&self) -> impl Iterator<Item = &ResourceConfig> {
        self.components.modified.iter().chain(&self.services.modified)
    }

    /// Removed components and services.
    pub fn removed_resources(&self) -> impl Iterator<Item = &ResourceConfig> {
        self.components.removed.iter().chain(&self.services.removed)
    }
}

trait Keyed {
    type Key: Eq + Hash + Display;
    const KIND: &'static str;
    fn key(&self) -> Self::Key;
}

impl Keyed for ResourceConfig {
    type Key = ResourceName;
    const KIND: &'static str = "resource";
    fn key(&self) -> ResourceName {
        self.resource_name()
    }
}

impl Keyed for RemoteConfig {
    type Key = String;
    const KIND: &'static str = "remote";
    fn key(&self) -> String {
        self.name.clone()
    }
}

impl Keyed for ProcessConfig {
    type Key = String;
    const KIND: &'static str = "process";
    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Keyed for ModuleConfig {
    type Key = String;
    const KIND: &'static str = "module";
    fn key(&self) -> String {
        self.name.clone()
    }
}

fn index_by_key<T: Keyed>(items: &[T]) -> Result<HashMap<T::Key, &T>, MechError> {
    let mut index = HashMap::with_capacity(items.len());
    for item in items {
        let key = item.key();
        if index.contains_key(&key) {
            return Err(MechError::DuplicateName {
                kind: T::KIND.to_string(),
                name: key.to_string(),
            });
        }
        index.insert(key, item);
    }
    Ok(index)
}

fn diff_kind<T: Keyed + PartialEq + Clone>(old: &[T], new: &[T]) -> Result<KindDiff<T>, MechError> {
    let old_index = index_by_key(old)?;
    let new_index = index_by_key(new)?;
    let mut diff = KindDiff::default();

    for item in new {
        match old_index.get(&item.key()) {
            None => diff.added.push(item.clone()),
            Some(previous) if *previous != item => diff.modified.push(item.clone()),
            Some(_) => {}
        }
    }
    for item in old {
        if !new_index.contains_key(&item.key()) {
            diff.removed.push(item.clone());
        }
    }
    Ok(diff)
}

/// Compute the changes from `old` to `new`.
///
/// # Errors
///
/// Returns [`MechError::DuplicateName`] if either snapshot lists two entries
/// of the same kind under the same key.
pub fn diff_snapshots(old: &Snapshot, new: &Snapshot) -> Result<Diff, MechError> {
    let mut diff = Diff {
        components: diff_kind(&old.components, &new.components)?,
        services: diff_kind(&old.services, &new.services)?,
        remotes: diff_kind(&old.remotes, &new.remotes)?,
        processes: diff_kind(&old.processes, &new.processes)?,
        modules: diff_kind(&old.modules, &new.modules)?,
        resources_equal: false,
    };
    diff.resources_equal = diff.components.is_empty()
        && diff.services.is_empty()
        && diff.remotes.is_empty()
        && diff.processes.is_empty()
        && diff.modules.is_empty();
    Ok(diff)
}
