//! In-memory implementations of [`Discover`] and [`Access`]

use super::{Access, Discover, Objects, ResourceType};
use kube_core::{discovery::Scope, ApiResource, DynamicObject, ErrorResponse, GroupVersionKind};
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};

/// A fake API server that stores objects as JSON and records every call.
#[derive(Clone, Default)]
pub(crate) struct FakeCluster {
    state: Arc<Mutex<State>>,
}

#[derive(Clone, Debug)]
pub(crate) enum Call {
    Get {
        name: String,
    },
    Create(DynamicObject),
    Patch {
        name: String,
        patch: Value,
    },
}

pub(crate) struct FakeObjects {
    state: Arc<Mutex<State>>,
    plural: String,
    namespace: Option<String>,
}

type Key = (String, Option<String>, String);

#[derive(Default)]
struct State {
    kinds: Vec<ResourceType>,
    objects: BTreeMap<Key, Value>,
    calls: Vec<Call>,
    version: u64,
    get_failure: Option<u16>,
    create_failure: Option<u16>,
    patch_failure: Option<u16>,
    forbidden_patches: usize,
}

pub(crate) fn api_error(code: u16, reason: &str) -> kube_client::Error {
    kube_client::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} (fake)"),
        reason: reason.to_string(),
        code,
    })
}

// === impl FakeCluster ===

impl FakeCluster {
    /// A cluster that serves `batch/v1` CronJobs, `v1` ConfigMaps, and `v1` Namespaces.
    pub(crate) fn new() -> Self {
        Self::default()
            .with_kind(("batch", "v1", "CronJob"), "cronjobs", Scope::Namespaced)
            .with_kind(("", "v1", "ConfigMap"), "configmaps", Scope::Namespaced)
            .with_kind(("", "v1", "Namespace"), "namespaces", Scope::Cluster)
    }

    pub(crate) fn with_kind(
        self,
        (group, version, kind): (&str, &str, &str),
        plural: &str,
        scope: Scope,
    ) -> Self {
        let gvk = GroupVersionKind::gvk(group, version, kind);
        self.state.lock().kinds.push(ResourceType {
            api: ApiResource::from_gvk_with_plural(&gvk, plural),
            scope,
        });
        self
    }

    /// Stores an object as though it had been created by another client.
    pub(crate) fn seed(&self, plural: &str, namespace: Option<&str>, mut obj: Value) {
        let mut state = self.state.lock();
        state.version += 1;
        obj["metadata"]["resourceVersion"] = state.version.to_string().into();
        let name = obj["metadata"]["name"]
            .as_str()
            .expect("seeded objects must be named")
            .to_string();
        state
            .objects
            .insert((plural.to_string(), namespace.map(Into::into), name), obj);
    }

    pub(crate) fn object(&self, plural: &str, namespace: Option<&str>, name: &str) -> Option<Value> {
        let key = (plural.to_string(), namespace.map(Into::into), name.to_string());
        self.state.lock().objects.get(&key).cloned()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub(crate) fn patches(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Patch { patch, .. } => Some(patch),
                _ => None,
            })
            .collect()
    }

    /// Fails every get with the given status code.
    pub(crate) fn fail_gets(&self, code: u16) {
        self.state.lock().get_failure = Some(code);
    }

    /// Fails every create with the given status code.
    pub(crate) fn fail_creates(&self, code: u16) {
        self.state.lock().create_failure = Some(code);
    }

    /// Fails every patch with the given status code.
    pub(crate) fn fail_patches(&self, code: u16) {
        self.state.lock().patch_failure = Some(code);
    }

    /// Rejects the next `n` patches as forbidden.
    pub(crate) fn forbid_patches(&self, n: usize) {
        self.state.lock().forbidden_patches = n;
    }
}

impl Discover for FakeCluster {
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<ResourceType, kube_client::Error> {
        self.state
            .lock()
            .kinds
            .iter()
            .find(|rt| {
                rt.api.group == gvk.group && rt.api.version == gvk.version && rt.api.kind == gvk.kind
            })
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))
    }
}

impl Access for FakeCluster {
    type Objects = FakeObjects;

    fn objects(&self, resource: &ResourceType, namespace: Option<&str>) -> FakeObjects {
        FakeObjects {
            state: self.state.clone(),
            plural: resource.api.plural.clone(),
            namespace: namespace.map(Into::into),
        }
    }
}

// === impl FakeObjects ===

impl FakeObjects {
    fn key(&self, name: &str) -> Key {
        (self.plural.clone(), self.namespace.clone(), name.to_string())
    }
}

impl Objects for FakeObjects {
    async fn get(&self, name: &str) -> Result<Option<DynamicObject>, kube_client::Error> {
        let mut state = self.state.lock();
        state.calls.push(Call::Get {
            name: name.to_string(),
        });
        if let Some(code) = state.get_failure {
            return Err(api_error(code, "InternalError"));
        }
        let obj = state.objects.get(&self.key(name)).cloned();
        Ok(obj.map(|obj| serde_json::from_value(obj).expect("stored objects must decode")))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, kube_client::Error> {
        let mut state = self.state.lock();
        state.calls.push(Call::Create(obj.clone()));
        if let Some(code) = state.create_failure {
            return Err(api_error(code, "AlreadyExists"));
        }
        let name = obj.metadata.name.clone().expect("created objects must be named");
        let key = self.key(&name);
        if state.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        if obj.metadata.resource_version.is_some() {
            return Err(api_error(500, "resourceVersion should not be set on objects to be created"));
        }

        state.version += 1;
        let mut created = obj.clone();
        created.metadata.resource_version = Some(state.version.to_string());
        created.metadata.namespace = self.namespace.clone();
        let value = serde_json::to_value(&created).expect("objects must encode");
        state.objects.insert(key, value);
        Ok(created)
    }

    async fn patch(&self, name: &str, patch: &Value) -> Result<DynamicObject, kube_client::Error> {
        let mut state = self.state.lock();
        state.calls.push(Call::Patch {
            name: name.to_string(),
            patch: patch.clone(),
        });
        if state.forbidden_patches > 0 {
            state.forbidden_patches -= 1;
            return Err(api_error(403, "Forbidden"));
        }
        if let Some(code) = state.patch_failure {
            return Err(api_error(code, "Invalid"));
        }

        let key = self.key(name);
        let State {
            objects, version, ..
        } = &mut *state;
        let obj = objects
            .get_mut(&key)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        let current = &obj["metadata"]["resourceVersion"];
        match patch["metadata"].get("resourceVersion") {
            Some(requested) if requested != current => return Err(api_error(409, "Conflict")),
            _ => {}
        }
        merge(obj, patch);
        *version += 1;
        obj["metadata"]["resourceVersion"] = version.to_string().into();
        Ok(serde_json::from_value(obj.clone()).expect("stored objects must decode"))
    }
}

/// Applies a JSON merge patch (RFC 7386).
fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Value::Object(target) = target {
        for (k, v) in patch {
            if v.is_null() {
                target.remove(k);
            } else {
                merge(target.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}
