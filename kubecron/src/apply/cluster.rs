use super::{Access, Discover, Objects, ResourceType};
use kube_client::{
    api::{Api, Patch, PatchParams, PostParams},
    Client,
};
use kube_core::{DynamicObject, GroupVersionKind};
use std::borrow::Cow;

/// Resolves kinds with the API server's discovery endpoints
#[derive(Clone)]
pub struct ClusterDiscovery {
    client: Client,
}

/// Reads and writes objects through the Kubernetes API
#[derive(Clone)]
pub struct ClusterAccess {
    client: Client,
    field_manager: Cow<'static, str>,
}

/// A handle to the objects of one resource type, in one namespace
#[derive(Clone)]
pub struct ClusterObjects {
    api: Api<DynamicObject>,
    field_manager: String,
}

// === impl ClusterDiscovery ===

impl ClusterDiscovery {
    /// Discovers resources with the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Discover for ClusterDiscovery {
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<ResourceType, kube_client::Error> {
        let (api, caps) = kube_client::discovery::pinned_kind(&self.client, gvk).await?;
        tracing::debug!(?gvk, plural = %api.plural, scope = ?caps.scope, "Discovered");
        Ok(ResourceType {
            api,
            scope: caps.scope,
        })
    }
}

// === impl ClusterAccess ===

impl ClusterAccess {
    pub(crate) const DEFAULT_FIELD_MANAGER: &'static str = "kubecron";

    /// Accesses objects with the given client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: Self::DEFAULT_FIELD_MANAGER.into(),
        }
    }

    /// Overrides the field manager recorded on created and patched objects
    pub fn with_field_manager(mut self, field_manager: impl Into<Cow<'static, str>>) -> Self {
        self.field_manager = field_manager.into();
        self
    }
}

impl Access for ClusterAccess {
    type Objects = ClusterObjects;

    fn objects(&self, resource: &ResourceType, namespace: Option<&str>) -> ClusterObjects {
        let client = self.client.clone();
        let api = match namespace {
            Some(ns) if resource.is_namespaced() => Api::namespaced_with(client, ns, &resource.api),
            // Namespaced manifests without a namespace use the kubeconfig's default.
            None if resource.is_namespaced() => Api::default_namespaced_with(client, &resource.api),
            _ => Api::all_with(client, &resource.api),
        };
        ClusterObjects {
            api,
            field_manager: self.field_manager.to_string(),
        }
    }
}

// === impl ClusterObjects ===

impl Objects for ClusterObjects {
    async fn get(&self, name: &str) -> Result<Option<DynamicObject>, kube_client::Error> {
        self.api.get_opt(name).await
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, kube_client::Error> {
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        self.api.create(&params, obj).await
    }

    async fn patch(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, kube_client::Error> {
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        self.api.patch(name, &params, &Patch::Merge(patch)).await
    }
}
