//! In-process cluster for tests and dry runs.
//!
//! [`MemoryCluster`] implements both cluster traits over a map of objects and
//! behaves like a small API server: it enforces `expected_version`
//! preconditions, bumps `resourceVersion` and `generation`, fills in server
//! defaults, and can simulate a rollout that has not been observed yet. Faults
//! can be scripted per change kind and target.

use async_trait::async_trait;
use kintent_core::merge;
use kintent_core::{
    Change, ChangeKind, ClassifiedError, ClusterReader, ClusterWriter, Manifest, ObservedResource,
    ResourceRef,
};
use serde_json::{Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// A scripted failure for matching writes.
#[derive(Debug, Clone)]
pub struct Fault {
    kind: Option<ChangeKind>,
    target: Option<ResourceRef>,
    error: ClassifiedError,
    remaining: u32,
}

impl Fault {
    /// Fail writes of any kind.
    pub fn any(error: ClassifiedError) -> Self {
        Self {
            kind: None,
            target: None,
            error,
            remaining: 1,
        }
    }

    /// Fail writes of one change kind.
    pub fn on(kind: ChangeKind, error: ClassifiedError) -> Self {
        Self {
            kind: Some(kind),
            ..Self::any(error)
        }
    }

    pub fn target(mut self, target: ResourceRef) -> Self {
        self.target = Some(target);
        self
    }

    /// Fire this many times (default once).
    pub fn times(mut self, times: u32) -> Self {
        self.remaining = times;
        self
    }

    /// Fire on every matching write.
    pub fn always(self) -> Self {
        self.times(u32::MAX)
    }

    fn matches(&self, change: &Change) -> bool {
        self.kind.is_none_or(|k| k == change.kind())
            && self.target.as_ref().is_none_or(|t| t == change.target())
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    manifest: Manifest,
    resource_version: u64,
    generation: i64,
    /// Reads left before the controller catches up with `generation`.
    pending_reads: u32,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ResourceRef, StoredObject>,
    last_version: u64,
    rollout_lag: u32,
    faults: VecDeque<Fault>,
    writes: Vec<Change>,
    write_attempts: u32,
}

impl State {
    fn bump_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }
}

/// In-memory implementation of [`ClusterReader`] and [`ClusterWriter`].
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an existing, fully rolled-out object.
    pub fn insert(&self, manifest: Manifest) -> ObservedResource {
        let mut state = self.state();
        let version = state.bump_version();
        let mut manifest = manifest;
        apply_server_defaults(&mut manifest.spec);
        let object = StoredObject {
            manifest,
            resource_version: version,
            generation: 1,
            pending_reads: 0,
        };
        let observed = observe(&object, 0);
        state.objects.insert(observed.resource_ref(), object);
        observed
    }

    /// Number of reads a spec change stays unobserved for.
    pub fn set_rollout_lag(&self, reads: u32) {
        self.state().rollout_lag = reads;
    }

    /// Simulate an external spec change whose rollout is still in progress
    /// for the next `reads` reads.
    pub fn begin_rollout(&self, target: &ResourceRef, reads: u32) -> bool {
        let mut state = self.state();
        let version = state.bump_version();
        match state.objects.get_mut(target) {
            Some(object) => {
                object.generation += 1;
                object.resource_version = version;
                object.pending_reads = reads;
                true
            }
            None => false,
        }
    }

    /// Simulate a concurrent writer touching `target` (new resourceVersion).
    pub fn touch(&self, target: &ResourceRef) -> bool {
        let mut state = self.state();
        let version = state.bump_version();
        match state.objects.get_mut(target) {
            Some(object) => {
                object.resource_version = version;
                true
            }
            None => false,
        }
    }

    pub fn inject(&self, fault: Fault) {
        self.state().faults.push_back(fault);
    }

    /// Current stored manifest, without affecting rollout simulation.
    pub fn manifest(&self, target: &ResourceRef) -> Option<Manifest> {
        self.state().objects.get(target).map(|o| o.manifest.clone())
    }

    /// All stored manifests, keyed by reference.
    pub fn dump(&self) -> BTreeMap<ResourceRef, Manifest> {
        self.state()
            .objects
            .iter()
            .map(|(k, v)| (k.clone(), v.manifest.clone()))
            .collect()
    }

    /// Changes that were applied successfully, in order.
    pub fn writes(&self) -> Vec<Change> {
        self.state().writes.clone()
    }

    /// Every write call made, including failed ones.
    pub fn write_attempts(&self) -> u32 {
        self.state().write_attempts
    }

    fn take_fault(state: &mut State, change: &Change) -> Option<ClassifiedError> {
        let idx = state.faults.iter().position(|f| f.matches(change))?;
        let fault = &mut state.faults[idx];
        let error = fault.error.clone();
        fault.remaining = fault.remaining.saturating_sub(1);
        if fault.remaining == 0 {
            state.faults.remove(idx);
        }
        Some(error)
    }
}

fn observe(object: &StoredObject, pending_reads: u32) -> ObservedResource {
    let observed_generation = if pending_reads > 0 {
        object.generation - 1
    } else {
        object.generation
    };
    ObservedResource {
        manifest: object.manifest.clone(),
        resource_version: object.resource_version.to_string(),
        generation: object.generation,
        observed_generation: Some(observed_generation),
        terminating: false,
    }
}

/// Fill in the defaults the API server adds to a Deployment.
fn apply_server_defaults(spec: &mut Value) {
    let Some(spec) = spec.as_object_mut() else {
        return;
    };
    spec.entry("revisionHistoryLimit").or_insert(json!(10));
    spec.entry("progressDeadlineSeconds").or_insert(json!(600));
    spec.entry("strategy").or_insert(json!({
        "type": "RollingUpdate",
        "rollingUpdate": {"maxSurge": "25%", "maxUnavailable": "25%"}
    }));

    let containers = spec
        .get_mut("template")
        .and_then(|t| t.get_mut("spec"))
        .and_then(|s| s.get_mut("containers"))
        .and_then(Value::as_array_mut);
    for container in containers.into_iter().flatten() {
        let Some(container) = container.as_object_mut() else {
            continue;
        };
        container
            .entry("imagePullPolicy")
            .or_insert(json!("IfNotPresent"));
        container
            .entry("terminationMessagePath")
            .or_insert(json!("/dev/termination-log"));
        let ports = container.get_mut("ports").and_then(Value::as_array_mut);
        for port in ports.into_iter().flatten() {
            if let Some(port) = port.as_object_mut() {
                port.entry("protocol").or_insert(json!("TCP"));
            }
        }
    }
}

fn check_version(
    target: &ResourceRef,
    expected: Option<&str>,
    actual: u64,
) -> Result<(), ClassifiedError> {
    match expected {
        Some(expected) if expected != actual.to_string() => Err(ClassifiedError::Conflict(format!(
            "{} has resourceVersion {}, expected {}",
            target, actual, expected
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl ClusterReader for MemoryCluster {
    async fn get(&self, target: &ResourceRef) -> Result<Option<ObservedResource>, ClassifiedError> {
        let mut state = self.state();
        let Some(object) = state.objects.get_mut(target) else {
            return Ok(None);
        };
        let pending = object.pending_reads;
        object.pending_reads = pending.saturating_sub(1);
        Ok(Some(observe(object, pending)))
    }
}

#[async_trait]
impl ClusterWriter for MemoryCluster {
    async fn apply(&self, change: &Change) -> Result<(), ClassifiedError> {
        let mut state = self.state();
        state.write_attempts += 1;

        if let Some(error) = Self::take_fault(&mut state, change) {
            tracing::debug!(change = %change.describe(), error = %error, "Injected fault");
            return Err(error);
        }

        let target = change.target().clone();
        match change {
            Change::Create { manifest, .. } => {
                if state.objects.contains_key(&target) {
                    return Err(ClassifiedError::Conflict(format!("{} already exists", target)));
                }
                let version = state.bump_version();
                let mut manifest = manifest.clone();
                apply_server_defaults(&mut manifest.spec);
                let pending_reads = state.rollout_lag;
                state.objects.insert(
                    target,
                    StoredObject {
                        manifest,
                        resource_version: version,
                        generation: 1,
                        pending_reads,
                    },
                );
            }
            Change::Update {
                expected_version,
                patch,
                ..
            } => {
                let current = state
                    .objects
                    .get(&target)
                    .ok_or_else(|| ClassifiedError::Fatal(format!("{} not found", target)))?;
                check_version(&target, expected_version.as_deref(), current.resource_version)?;

                let mut body = current.manifest.body();
                merge::apply_patch(&mut body, patch);
                let mut manifest = current.manifest.clone();
                manifest.set_body(&body);
                apply_server_defaults(&mut manifest.spec);
                let spec_changed = manifest.spec != current.manifest.spec;

                let version = state.bump_version();
                let lag = state.rollout_lag;
                if let Some(object) = state.objects.get_mut(&target) {
                    object.manifest = manifest;
                    object.resource_version = version;
                    if spec_changed {
                        object.generation += 1;
                        object.pending_reads = lag;
                    }
                }
            }
            Change::Delete {
                expected_version, ..
            } => {
                let current = state
                    .objects
                    .get(&target)
                    .ok_or_else(|| ClassifiedError::Fatal(format!("{} not found", target)))?;
                check_version(&target, expected_version.as_deref(), current.resource_version)?;
                state.objects.remove(&target);
            }
        }

        state.writes.push(change.clone());
        Ok(())
    }
}
