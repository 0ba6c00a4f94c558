//! End-to-end behaviour of [`ResourceManager`] against simulated resources
//! and remotes.

use std::sync::Arc;
use std::time::Duration;

use mechos_hal::sim_registry::{
    FAKE_MODEL, FakeResource, SimCall, SimConnector, SimRegistry, SimRemote, SimStats,
};
use async_trait::async_trait;
use mechos_hal::{Matcher, RemoteConnection, RemoteConnector, Resource};
use mechos_types::{Api, MechError, Model, RemoteConfig, ResourceConfig, ResourceName, Snapshot};
use serde_json::json;

use crate::manager::ResourceManager;
use crate::node::{ErrorCause, NodeState};
use crate::settings::KernelSettings;

fn motor(name: &str) -> ResourceConfig {
    ResourceConfig::new(Api::component("motor"), name, FAKE_MODEL)
}

fn arm(name: &str) -> ResourceConfig {
    ResourceConfig::new(Api::component("arm"), name, FAKE_MODEL)
}

fn motor_name(name: &str) -> ResourceName {
    ResourceName::new(Api::component("motor"), name)
}

fn arm_name(name: &str) -> ResourceName {
    ResourceName::new(Api::component("arm"), name)
}

fn components(components: Vec<ResourceConfig>) -> Snapshot {
    Snapshot {
        components,
        ..Snapshot::default()
    }
}

fn remote_config(name: &str) -> RemoteConfig {
    RemoteConfig {
        name: name.to_string(),
        address: format!("sim://{name}"),
        prefix: None,
    }
}

fn sim() -> SimRegistry {
    SimRegistry::builder()
        .with_fake(Api::component("motor"))
        .with_fake(Api::component("arm"))
        .with_fake(Api::service("motion"))
        .build()
}

fn manager(sim: &SimRegistry) -> ResourceManager {
    ResourceManager::new(sim.registry.clone(), KernelSettings::default())
}

fn fake(resource: &Arc<dyn Resource>) -> &FakeResource {
    resource
        .downcast_ref::<FakeResource>()
        .expect("resource is a FakeResource")
}

fn assert_not_found(mgr: &ResourceManager, name: &ResourceName) {
    assert!(
        matches!(mgr.resource_by_name(name), Err(MechError::NotFound(_))),
        "{name} should look absent"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Local graphs
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn identical_snapshot_makes_no_calls() {
    let sim = sim();
    let mgr = manager(&sim);
    let snapshot = components(vec![
        motor("m"),
        arm("oc")
            .with_attribute("required", json!(["m"]))
            .with_attribute("optional", json!(["m1"])),
    ]);
    mgr.reconfigure(snapshot.clone()).await.unwrap();
    let before = mgr.resource_by_name(&arm_name("oc")).unwrap();
    let calls = sim.stats.total_calls();

    let report = mgr.reconfigure(snapshot).await.unwrap();

    assert!(report.completed.is_empty());
    assert_eq!(sim.stats.total_calls(), calls);
    let after = mgr.resource_by_name(&arm_name("oc")).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn required_dependencies_reach_terminal_state_first() {
    let sim = sim();
    let mgr = manager(&sim);
    let report = mgr
        .reconfigure(components(vec![
            arm("gripper").with_attribute("required", json!(["shoulder"])),
            arm("shoulder")
                .with_attribute("required", json!(["base"]))
                .with_attribute("build_delay_ms", 20),
            motor("base").with_attribute("build_delay_ms", 30),
            motor("wheel").with_attribute("build_delay_ms", 5),
        ]))
        .await
        .unwrap();

    assert!(report.is_clean(), "{report:?}");
    let pos = |call, name| sim.stats.position(call, name).unwrap();
    assert!(pos(SimCall::Construct, "base") < pos(SimCall::ConstructStart, "shoulder"));
    assert!(pos(SimCall::Construct, "shoulder") < pos(SimCall::ConstructStart, "gripper"));
    let done = |n: &ResourceName| report.completion_index(n).unwrap();
    assert!(done(&motor_name("base")) < done(&arm_name("shoulder")));
    assert!(done(&arm_name("shoulder")) < done(&arm_name("gripper")));
}

#[tokio::test]
async fn unresolved_optional_dependency_never_blocks() {
    let sim = sim();
    let mgr = manager(&sim);
    mgr.reconfigure(components(vec![
        arm("oc").with_attribute("optional", json!(["ghost"])),
    ]))
    .await
    .unwrap();

    assert_eq!(mgr.node_state(&arm_name("oc")), Some(NodeState::Ready));
    let oc = mgr.resource_by_name(&arm_name("oc")).unwrap();
    assert!(fake(&oc).dependency_names().is_empty());
}

#[tokio::test]
async fn optional_cycle_converges_and_survives_removal() {
    let sim = sim();
    let mgr = manager(&sim);
    let a = motor("a").with_attribute("optional", json!(["b"]));
    let b = motor("b").with_attribute("optional", json!(["a"]));
    mgr.reconfigure(components(vec![a.clone(), b])).await.unwrap();

    let ra = mgr.resource_by_name(&motor_name("a")).unwrap();
    let rb = mgr.resource_by_name(&motor_name("b")).unwrap();
    assert!(fake(&ra).has_dependency("b"));
    assert!(fake(&rb).has_dependency("a"));
    assert!(mgr.dependencies_of(&motor_name("a")).is_empty());

    mgr.reconfigure(components(vec![a])).await.unwrap();
    assert_eq!(mgr.node_state(&motor_name("a")), Some(NodeState::Ready));
    let ra = mgr.resource_by_name(&motor_name("a")).unwrap();
    assert!(!fake(&ra).has_dependency("b"));
    assert_eq!(sim.stats.closes("b"), 1);
}

#[tokio::test]
async fn required_and_optional_motor() {
    let sim = sim();
    let mgr = manager(&sim);
    let oc = arm("oc")
        .with_attribute("required", json!(["m"]))
        .with_attribute("optional", json!(["m1"]));

    mgr.reconfigure(components(vec![motor("m"), oc.clone()]))
        .await
        .unwrap();
    let handle = mgr.resource_by_name(&arm_name("oc")).unwrap();
    assert!(fake(&handle).has_dependency("m"));
    assert!(!fake(&handle).has_dependency("m1"));

    mgr.reconfigure(components(vec![motor("m"), motor("m1"), oc.clone()]))
        .await
        .unwrap();
    let again = mgr.resource_by_name(&arm_name("oc")).unwrap();
    assert!(Arc::ptr_eq(&handle, &again));
    assert!(fake(&again).has_dependency("m"));
    assert!(fake(&again).has_dependency("m1"));
    assert_eq!(sim.stats.constructs("oc"), 1);

    let report = mgr
        .reconfigure(components(vec![motor("m1"), oc]))
        .await
        .unwrap();
    assert_eq!(report.unresolved, vec![arm_name("oc")]);
    assert_eq!(
        mgr.node_state(&arm_name("oc")),
        Some(NodeState::Errored(ErrorCause::UnresolvedDependencies))
    );
    assert_not_found(&mgr, &arm_name("oc"));
}

#[tokio::test]
async fn weak_dependent_sees_every_component() {
    let sim = SimRegistry::builder()
        .with_fake(Api::component("motor"))
        .with_weak_fake(
            Api::service("frames"),
            Model::new(FAKE_MODEL),
            vec![Matcher::all_components()],
        )
        .build();
    let mgr = manager(&sim);
    let frames = ResourceConfig::new(Api::service("frames"), "frames", FAKE_MODEL);
    let frames_name = frames.resource_name();
    let seen = |mgr: &ResourceManager| {
        let res = mgr.resource_by_name(&frames_name).unwrap();
        fake(&res).dependency_names().len()
    };

    let mut snapshot = Snapshot {
        services: vec![frames],
        ..Snapshot::default()
    };
    mgr.reconfigure(snapshot.clone()).await.unwrap();
    assert_eq!(seen(&mgr), 0);

    snapshot.components.push(motor("left"));
    mgr.reconfigure(snapshot.clone()).await.unwrap();
    assert_eq!(seen(&mgr), 1);

    snapshot.components.push(motor("right").with_depends_on("left"));
    mgr.reconfigure(snapshot).await.unwrap();
    assert_eq!(seen(&mgr), 2);

    assert!(mgr.dependencies_of(&frames_name).is_empty());
    assert_eq!(
        mgr.build_order()
            .into_iter()
            .filter(|n| n.api.is_component())
            .collect::<Vec<_>>(),
        vec![motor_name("left"), motor_name("right")]
    );
}

#[tokio::test]
async fn builtin_is_resolved_like_any_other_name() {
    let sim = sim();
    let mgr = manager(&sim);
    let planner = arm("planner").with_attribute("required", json!(["builtin"]));

    mgr.reconfigure(components(vec![planner.clone()]))
        .await
        .unwrap();
    assert_not_found(&mgr, &arm_name("planner"));

    let user_builtin = ResourceConfig::new(Api::service("motion"), "builtin", FAKE_MODEL);
    mgr.reconfigure(Snapshot {
        components: vec![planner],
        services: vec![user_builtin.clone()],
        ..Snapshot::default()
    })
    .await
    .unwrap();
    assert_eq!(
        mgr.dependencies_of(&arm_name("planner")),
        vec![user_builtin.resource_name()]
    );
    assert!(mgr.resource_by_name(&arm_name("planner")).is_ok());
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_reconfigure_keeps_last_good_instance() {
    let sim = sim();
    let mgr = manager(&sim);
    mgr.reconfigure(components(vec![motor("m")])).await.unwrap();
    let good = mgr.resource_by_name(&motor_name("m")).unwrap();

    let report = mgr
        .reconfigure(components(vec![
            motor("m").with_attribute("fail_reconfigure", true),
        ]))
        .await
        .unwrap();
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(
        mgr.resource_by_name(&motor_name("m")),
        Err(MechError::Build { .. })
    ));
    assert_eq!(sim.stats.closes("m"), 0);

    mgr.reconfigure(components(vec![motor("m").with_attribute("max_rpm", 10)]))
        .await
        .unwrap();
    let healed = mgr.resource_by_name(&motor_name("m")).unwrap();
    assert!(Arc::ptr_eq(&good, &healed));
}

#[tokio::test]
async fn first_build_failure_holds_no_instance() {
    let sim = sim();
    let mgr = manager(&sim);
    mgr.reconfigure(components(vec![
        motor("m").with_attribute("fail_build", true),
        arm("oc").with_attribute("required", json!(["m"])),
    ]))
    .await
    .unwrap();

    assert!(matches!(
        mgr.resource_by_name(&motor_name("m")),
        Err(MechError::Build { .. })
    ));
    assert_not_found(&mgr, &arm_name("oc"));
    assert_eq!(sim.stats.construct_attempts("oc"), 0);
    assert!(mgr.resource_names().is_empty());
}

#[tokio::test]
async fn rebuild_request_replaces_instance_and_touches_dependents() {
    let sim = sim();
    let mgr = manager(&sim);
    let oc = arm("oc").with_attribute("required", json!(["m"]));
    mgr.reconfigure(components(vec![motor("m"), oc.clone()]))
        .await
        .unwrap();
    let old = mgr.resource_by_name(&motor_name("m")).unwrap();

    let report = mgr
        .reconfigure(components(vec![motor("m").with_attribute("rebuild", true), oc]))
        .await
        .unwrap();

    let new = mgr.resource_by_name(&motor_name("m")).unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    assert_eq!(sim.stats.constructs("m"), 2);
    assert_eq!(sim.stats.closes("m"), 1);
    assert!(report.reconfigured.contains(&arm_name("oc")));
    assert_eq!(sim.stats.reconfigures("oc"), 1);
}

#[tokio::test]
async fn non_reconfigurable_model_is_rebuilt_on_change() {
    let sim = SimRegistry::builder()
        .with_fake_model(Api::component("motor"), Model::new("acme:motors:stepper"), false)
        .build();
    let mgr = manager(&sim);
    let stepper = ResourceConfig::new(Api::component("motor"), "s", "acme:motors:stepper");
    mgr.reconfigure(components(vec![stepper.clone()]))
        .await
        .unwrap();
    mgr.reconfigure(components(vec![stepper.with_attribute("steps", 200)]))
        .await
        .unwrap();

    assert_eq!(sim.stats.constructs("s"), 2);
    assert_eq!(sim.stats.reconfigures("s"), 0);
    assert_eq!(sim.stats.closes("s"), 1);
}

#[tokio::test]
async fn construct_timeout_surfaces_on_lookup() {
    let sim = sim();
    let settings = KernelSettings {
        resource_configuration_timeout: Duration::from_millis(50),
        ..KernelSettings::default()
    };
    let mgr = ResourceManager::new(sim.registry.clone(), settings);
    mgr.reconfigure(components(vec![
        motor("slow").with_attribute("build_delay_ms", 1_000),
        motor("fast"),
    ]))
    .await
    .unwrap();

    assert!(matches!(
        mgr.resource_by_name(&motor_name("slow")),
        Err(MechError::Timeout { .. })
    ));
    assert!(mgr.resource_by_name(&motor_name("fast")).is_ok());
}

#[tokio::test]
async fn cancelled_pass_is_finished_by_retry() {
    let sim = sim();
    let mgr = Arc::new(manager(&sim));
    let pass = {
        let mgr = mgr.clone();
        tokio::spawn(async move {
            mgr.reconfigure(components(vec![
                motor("slow").with_attribute("build_delay_ms", 200),
                arm("after").with_attribute("required", json!(["slow"])),
            ]))
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    mgr.cancel_pass();
    let report = pass.await.unwrap().unwrap();

    assert_eq!(report.skipped, vec![arm_name("after")]);
    assert_eq!(sim.stats.construct_attempts("after"), 0);
    assert_eq!(mgr.node_state(&arm_name("after")), Some(NodeState::Absent));
    assert!(mgr.needs_retry());

    let retry = mgr.retry_now().await.unwrap();
    assert!(retry.built.contains(&arm_name("after")));
    assert!(!mgr.needs_retry());
}

#[tokio::test]
async fn unresolved_node_recovers_when_dependency_appears() {
    let sim = sim();
    let mgr = manager(&sim);
    let oc = arm("oc").with_attribute("required", json!(["m"]));
    mgr.reconfigure(components(vec![oc.clone()])).await.unwrap();
    assert_not_found(&mgr, &arm_name("oc"));

    mgr.reconfigure(components(vec![oc, motor("m")])).await.unwrap();
    assert_eq!(mgr.node_state(&arm_name("oc")), Some(NodeState::Ready));
    assert_eq!(sim.stats.constructs("oc"), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Remotes
// ─────────────────────────────────────────────────────────────────────────────

struct Robots {
    mgr: ResourceManager,
    stats: Arc<SimStats>,
    r1: Arc<SimRemote>,
}

/// A manager connected to `r1` and `r2`, both serving a motor called `m`.
fn federated() -> Robots {
    let sim = sim();
    let connector = SimConnector::new();
    let r1 = Arc::new(SimRemote::new("r1", vec![motor_name("m")]));
    connector.add(r1.clone());
    connector.add(Arc::new(SimRemote::new("r2", vec![motor_name("m")])));
    let mgr = manager(&sim).with_connector(Arc::new(connector));
    Robots {
        mgr,
        stats: sim.stats,
        r1,
    }
}

fn with_remotes(components: Vec<ResourceConfig>, remotes: &[&str]) -> Snapshot {
    Snapshot {
        components,
        remotes: remotes.iter().map(|r| remote_config(r)).collect(),
        ..Snapshot::default()
    }
}

#[tokio::test]
async fn short_name_on_two_remotes_is_ambiguous() {
    let robots = federated();
    let mgr = &robots.mgr;
    mgr.reconfigure(with_remotes(
        vec![arm("oc").with_attribute("required", json!(["m"]))],
        &["r1", "r2"],
    ))
    .await
    .unwrap();

    let r1m = motor_name("m").prepend_remote("r1");
    assert!(mgr.resource_names().contains(&r1m));
    assert_eq!(
        mgr.node_state(&arm_name("oc")),
        Some(NodeState::Errored(ErrorCause::UnresolvedDependencies))
    );
    let status = mgr
        .statuses()
        .into_iter()
        .find(|s| s.name == arm_name("oc").to_string())
        .unwrap();
    assert!(status.error.unwrap().contains("ambiguous"));
    assert_not_found(mgr, &arm_name("oc"));
    assert!(matches!(
        mgr.resource_by_name(&motor_name("m")),
        Err(MechError::AmbiguousDependency { .. })
    ));

    mgr.reconfigure(with_remotes(
        vec![arm("oc").with_attribute("required", json!(["r1:m"]))],
        &["r1", "r2"],
    ))
    .await
    .unwrap();
    assert_eq!(mgr.node_state(&arm_name("oc")), Some(NodeState::Ready));
    assert_eq!(mgr.dependencies_of(&arm_name("oc")), vec![r1m]);
}

#[tokio::test]
async fn remote_flap_does_not_reconfigure_dependents() {
    let robots = federated();
    let mgr = &robots.mgr;
    mgr.reconfigure(with_remotes(
        vec![arm("oc").with_attribute("required", json!(["m"]))],
        &["r1"],
    ))
    .await
    .unwrap();
    let r1m = motor_name("m").prepend_remote("r1");
    assert_eq!(mgr.dependencies_of(&arm_name("oc")), vec![r1m.clone()]);
    let proxy = mgr.resource_by_name(&r1m).unwrap();
    assert!(proxy.do_command(json!({"ping": true})).await.is_ok());
    // Unique across remotes, so the local short name reaches it too.
    assert!(mgr.resource_by_name(&motor_name("m")).is_ok());

    robots.r1.set_connected(false);
    mgr.sync_remotes().await.unwrap();
    assert!(!mgr.resource_names().contains(&r1m));
    assert!(!mgr.remote_statuses()[0].connected);
    assert_not_found(mgr, &r1m);
    assert!(matches!(
        proxy.do_command(json!({})).await,
        Err(MechError::RemoteUnavailable { .. })
    ));
    assert_eq!(mgr.node_state(&arm_name("oc")), Some(NodeState::Ready));

    robots.r1.set_connected(true);
    mgr.sync_remotes().await.unwrap();
    assert!(mgr.resource_names().contains(&r1m));
    assert!(proxy.do_command(json!({})).await.is_ok());

    assert_eq!(robots.stats.constructs("oc"), 1);
    assert_eq!(robots.stats.reconfigures("oc"), 0);
    assert_eq!(mgr.node_state(&arm_name("oc")), Some(NodeState::Ready));
}

#[tokio::test]
async fn resource_dropped_upstream_unresolves_dependents() {
    let robots = federated();
    let mgr = &robots.mgr;
    mgr.reconfigure(with_remotes(
        vec![arm("oc").with_attribute("required", json!(["r1:m"]))],
        &["r1"],
    ))
    .await
    .unwrap();
    assert_eq!(mgr.node_state(&arm_name("oc")), Some(NodeState::Ready));

    robots.r1.set_resource_names(vec![]);
    let report = mgr.sync_remotes().await.unwrap();

    assert_eq!(report.unresolved, vec![arm_name("oc")]);
    assert!(mgr.node_state(&motor_name("m").prepend_remote("r1")).is_none());
    assert_not_found(mgr, &arm_name("oc"));
}

#[tokio::test]
async fn explicit_merge_and_unmerge() {
    let robots = federated();
    let mgr = &robots.mgr;
    mgr.reconfigure(with_remotes(
        vec![arm("oc").with_attribute("optional", json!(["r1:gripper"]))],
        &["r1"],
    ))
    .await
    .unwrap();

    let gripper = ResourceName::new(Api::component("gripper"), "gripper");
    mgr.merge_remote_resources("r1", vec![motor_name("m"), gripper.clone()])
        .await
        .unwrap();
    let oc = mgr.resource_by_name(&arm_name("oc")).unwrap();
    assert!(fake(&oc).has_dependency("r1:gripper"));

    mgr.unmerge_remote_resources("r1").await.unwrap();
    assert!(!fake(&oc).has_dependency("r1:gripper"));
    assert!(mgr.resource_names().iter().all(|n| !n.is_remote()));

    assert!(matches!(
        mgr.merge_remote_resources("r9", vec![gripper]).await,
        Err(MechError::NotFound(_))
    ));
}

#[tokio::test]
async fn removing_remote_drops_its_proxies() {
    let robots = federated();
    let mgr = &robots.mgr;
    mgr.reconfigure(with_remotes(vec![], &["r1", "r2"]))
        .await
        .unwrap();
    assert_eq!(mgr.resource_names().len(), 2);

    mgr.reconfigure(with_remotes(vec![], &["r2"])).await.unwrap();
    assert_eq!(
        mgr.resource_names(),
        vec![motor_name("m").prepend_remote("r2")]
    );
    assert_eq!(mgr.remote_statuses().len(), 1);

    mgr.close().await;
    assert!(mgr.remote_statuses().is_empty());
    assert!(mgr.statuses().is_empty());
}

/// A remote that accepts connections but never answers a listing.
struct SilentRemote;

#[async_trait]
impl RemoteConnection for SilentRemote {
    async fn resource_names(&self) -> Result<Vec<ResourceName>, MechError> {
        std::future::pending().await
    }

    async fn do_command(
        &self,
        _name: &ResourceName,
        _cmd: serde_json::Value,
    ) -> Result<serde_json::Value, MechError> {
        std::future::pending().await
    }

    async fn status(&self, _name: &ResourceName) -> Result<serde_json::Value, MechError> {
        std::future::pending().await
    }

    fn is_connected(&self) -> bool {
        true
    }
}

/// Dials forever, or hands out a [`SilentRemote`] when `silent` is set.
struct StuckConnector {
    silent: bool,
}

#[async_trait]
impl RemoteConnector for StuckConnector {
    async fn connect(&self, _config: &RemoteConfig) -> Result<Arc<dyn RemoteConnection>, MechError> {
        if self.silent {
            return Ok(Arc::new(SilentRemote));
        }
        std::future::pending().await
    }
}

fn stuck_manager(sim: &SimRegistry, silent: bool) -> ResourceManager {
    let settings = KernelSettings {
        remote_connect_timeout: Duration::from_millis(100),
        ..KernelSettings::default()
    };
    ResourceManager::new(sim.registry.clone(), settings)
        .with_connector(Arc::new(StuckConnector { silent }))
}

#[tokio::test]
async fn unanswered_dial_does_not_block_local_builds() {
    let sim = sim();
    let mgr = stuck_manager(&sim, false);

    let applied = tokio::time::timeout(
        Duration::from_secs(3),
        mgr.reconfigure(with_remotes(vec![motor("m")], &["r1"])),
    )
    .await;

    assert!(applied.is_ok(), "reconfigure stalled on the remote");
    assert!(mgr.resource_by_name(&motor_name("m")).is_ok());
    let status = mgr.remote_statuses();
    assert_eq!(status.len(), 1);
    assert!(!status[0].connected);

    // A probe gives up on the dial too, and close is not held up.
    tokio::time::timeout(Duration::from_secs(3), mgr.sync_remotes())
        .await
        .expect("probe bounded")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(3), mgr.close())
        .await
        .expect("close bounded");
}

#[tokio::test]
async fn unanswered_listing_is_bounded() {
    let sim = sim();
    let mgr = stuck_manager(&sim, true);

    tokio::time::timeout(
        Duration::from_secs(3),
        mgr.reconfigure(with_remotes(vec![motor("m")], &["r1"])),
    )
    .await
    .expect("reconfigure bounded")
    .unwrap();
    assert!(mgr.resource_by_name(&motor_name("m")).is_ok());
    assert_eq!(mgr.resource_names(), vec![motor_name("m")]);

    tokio::time::timeout(Duration::from_secs(3), mgr.sync_remotes())
        .await
        .expect("probe bounded")
        .unwrap();
    assert_eq!(sim.stats.constructs("m"), 1);
}
