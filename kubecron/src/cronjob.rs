//! CronJob lifecycle operations
//!
//! [`CronJobs`] wraps the typed `batch/v1` CronJob API for a single namespace. Apart from
//! [`CronJobs::apply`], each operation is a single API call whose errors are returned as-is.

use crate::{
    apply::{self, Access, Applied, ClusterAccess, ClusterDiscovery, Discover, Reconciler},
    manifest::Manifests,
    RetryParams,
};
use k8s_openapi::api::{batch::v1::CronJob, core::v1::Event};
use kube_client::{
    api::{Api, DeleteParams, ListParams},
    Client,
};
use kube_core::ResourceExt;
use std::borrow::Cow;

/// Manages the CronJobs in a namespace
#[derive(Clone)]
pub struct CronJobs {
    client: Client,
    namespace: String,
    field_manager: Cow<'static, str>,
    retry: RetryParams,
}

// === impl CronJobs ===

impl CronJobs {
    /// The only kind accepted by [`CronJobs::apply`]
    pub const KIND: &'static str = "CronJob";

    /// Manages CronJobs in `namespace` with the given client
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            field_manager: ClusterAccess::DEFAULT_FIELD_MANAGER.into(),
            retry: RetryParams::default(),
        }
    }

    /// Overrides the field manager used when applying manifests
    pub fn with_field_manager(mut self, field_manager: impl Into<Cow<'static, str>>) -> Self {
        self.field_manager = field_manager.into();
        self
    }

    /// Overrides how long each applied manifest may be retried
    pub fn with_retry(mut self, retry: RetryParams) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the namespace in which CronJobs are managed
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Creates or updates the CronJobs described by `manifests`.
    ///
    /// Every document must be a CronJob. Manifests that do not set a namespace are applied in
    /// this instance's namespace.
    pub async fn apply(&self, manifests: &[u8]) -> Result<Vec<Applied>, apply::Error> {
        let access = ClusterAccess::new(self.client.clone())
            .with_field_manager(self.field_manager.clone());
        let reconciler = Reconciler::new(ClusterDiscovery::new(self.client.clone()), access)
            .with_retry(self.retry)
            .with_default_namespace(self.namespace.clone());
        apply_cronjobs(&reconciler, manifests).await
    }

    /// Fetches a CronJob by name
    pub async fn get(&self, name: &str) -> Result<CronJob, kube_client::Error> {
        self.api().get(name).await
    }

    /// Lists all CronJobs in the namespace
    pub async fn list(&self) -> Result<Vec<CronJob>, kube_client::Error> {
        let list = self.api().list(&ListParams::default()).await?;
        Ok(list.items)
    }

    /// Deletes a CronJob by name
    pub async fn delete(&self, name: &str) -> Result<(), kube_client::Error> {
        self.api().delete(name, &DeleteParams::default()).await?;
        tracing::info!(namespace = %self.namespace, %name, "Deleted CronJob");
        Ok(())
    }

    /// Lists the events that reference a CronJob
    pub async fn events(&self, name: &str) -> Result<Vec<Event>, kube_client::Error> {
        let cronjob = self.get(name).await?;
        let namespace = cronjob.namespace().unwrap_or_else(|| self.namespace.clone());
        let selector = involved_object_selector(
            Self::KIND,
            Some(&namespace),
            Some(&cronjob.name_any()),
            cronjob.uid().as_deref(),
        );
        tracing::debug!(%selector, "Listing events");

        let events = Api::<Event>::namespaced(self.client.clone(), &namespace);
        let list = events.list(&ListParams::default().fields(&selector)).await?;
        Ok(list.items)
    }

    fn api(&self) -> Api<CronJob> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

/// Applies `manifests` after checking that every document is a CronJob.
///
/// No object is written if any document is malformed or of another kind.
pub async fn apply_cronjobs<D, A>(
    reconciler: &Reconciler<D, A>,
    manifests: &[u8],
) -> Result<Vec<Applied>, apply::Error>
where
    D: Discover,
    A: Access,
{
    let mut count = 0;
    for manifest in Manifests::new(manifests) {
        let manifest = manifest?;
        let kind = manifest.types.map(|t| t.kind).unwrap_or_default();
        if kind != CronJobs::KIND {
            return Err(apply::Error::UnexpectedKind {
                expected: CronJobs::KIND,
                found: kind,
            });
        }
        count += 1;
    }
    if count == 0 {
        return Err(apply::Error::Empty);
    }

    reconciler.apply_all(manifests).await
}

/// Builds a field selector matching events about the given object.
///
/// Parts that are unset or empty are omitted from the selector.
pub fn involved_object_selector(
    kind: &str,
    namespace: Option<&str>,
    name: Option<&str>,
    uid: Option<&str>,
) -> String {
    [
        ("involvedObject.kind", Some(kind)),
        ("involvedObject.namespace", namespace),
        ("involvedObject.name", name),
        ("involvedObject.uid", uid),
    ]
    .into_iter()
    .filter_map(|(field, value)| match value {
        Some(v) if !v.is_empty() => Some(format!("{field}={v}")),
        _ => None,
    })
    .collect::<Vec<_>>()
    .join(",")
}
