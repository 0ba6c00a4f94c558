//! Soft-dependency refresh.
//!
//! Optional and weak dependencies never appear as graph edges, so a node that
//! gains or loses one is not touched by the pass that changed it.  After a
//! pass settles, [`refresh_soft_dependents`] picks every settled node that
//! could be affected, and the manager runs a second pass with that set as
//! the refresh list so each one is reconfigured (or rebuilt) against the
//! current live set.

use std::collections::HashSet;

use mechos_hal::Registry;
use mechos_types::ResourceName;

use crate::graph::ResourceGraph;
use crate::node::NodeState;

/// Ready local nodes that declare optional references or whose model
/// registers weak matchers.
pub fn refresh_soft_dependents(graph: &ResourceGraph, registry: &Registry) -> HashSet<ResourceName> {
    graph
        .nodes()
        .filter(|node| !node.is_proxy() && !node.dirty && node.state == NodeState::Ready)
        .filter(|node| {
            let declares_optional = node
                .declared
                .as_ref()
                .is_some_and(|d| !d.optional.is_empty());
            declares_optional
                || node.config.as_ref().is_some_and(|conf| {
                    registry
                        .lookup(&conf.api, &conf.model)
                        .is_some_and(|reg| !reg.weak_dependencies().is_empty())
                })
        })
        .map(|node| node.name.clone())
        .collect()
}
