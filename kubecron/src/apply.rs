//! Creates or updates arbitrary resources from a stream of manifests
//!
//! [`Reconciler`] decodes manifests one at a time. Each manifest's kind is resolved via a
//! [`Discover`] implementation and the object is then either created (if it does not exist) or
//! updated with a JSON merge patch (if it does) through an [`Access`] implementation. Manifests
//! are processed strictly in order and the first error aborts the stream.
//!
//! A patch that is rejected as `403 Forbidden` is retried at a fixed interval until the
//! [`RetryParams::timeout`] elapses. This tolerates admission webhooks and RBAC bindings that are
//! still being rolled out, but a genuine permission denial is also only reported as an
//! [`Error::Timeout`] once the retry window is exhausted.

use crate::manifest::{self, DecodeError, Manifests};
use kube_core::{discovery::Scope, ApiResource, DynamicObject, GroupVersionKind};
use std::{fmt, future::Future, sync::Arc};
use tokio::time::{self, Duration};

mod cluster;
#[cfg(test)]
pub(crate) mod fake;

pub use self::cluster::{ClusterAccess, ClusterDiscovery, ClusterObjects};

/// Resolves a group, version, and kind to a [`ResourceType`]
pub trait Discover {
    /// Looks up the resource that serves `gvk`.
    fn resolve(
        &self,
        gvk: &GroupVersionKind,
    ) -> impl Future<Output = Result<ResourceType, kube_client::Error>> + Send;
}

/// Provides access to the objects of a resource type
pub trait Access {
    /// The handle used to read and write objects in a single namespace
    type Objects: Objects;

    /// Returns a handle for `resource` objects in `namespace`.
    ///
    /// `namespace` is always `None` for cluster-scoped resources.
    fn objects(&self, resource: &ResourceType, namespace: Option<&str>) -> Self::Objects;
}

/// Reads and writes the objects of a single resource type and namespace
pub trait Objects {
    /// Fetches the named object, returning `None` if it does not exist.
    fn get(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<DynamicObject>, kube_client::Error>> + Send;

    /// Creates a new object.
    fn create(
        &self,
        obj: &DynamicObject,
    ) -> impl Future<Output = Result<DynamicObject, kube_client::Error>> + Send;

    /// Applies a JSON merge patch to the named object.
    fn patch(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> impl Future<Output = Result<DynamicObject, kube_client::Error>> + Send;
}

/// Describes the collection that serves a kind
#[derive(Clone, Debug)]
pub struct ResourceType {
    /// The resource's group, version, kind, and plural name.
    pub api: ApiResource,

    /// Whether objects of this type are namespaced.
    pub scope: Scope,
}

/// Rewrites a manifest before it is written.
///
/// The first argument is the live object, if one exists.
pub type Transform = Arc<dyn Fn(Option<&DynamicObject>, DynamicObject) -> DynamicObject + Send + Sync>;

/// Configures how long a manifest may be retried
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryParams {
    /// The delay between attempts.
    pub interval: Duration,

    /// The maximum amount of time spent applying a single manifest.
    pub timeout: Duration,
}

/// Creates or updates objects from manifests
pub struct Reconciler<D, A> {
    discover: D,
    access: A,
    transform: Option<Transform>,
    retry: RetryParams,
    default_namespace: Option<String>,
}

/// Describes a manifest that was written to the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Applied {
    /// Whether the object was created or patched.
    pub action: Action,

    /// The object's kind.
    pub kind: String,

    /// The object's namespace, if it is namespaced.
    pub namespace: Option<String>,

    /// The object's name.
    pub name: String,

    /// The resource version returned by the API server.
    pub resource_version: Option<String>,
}

/// The write used to apply a manifest
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// The object did not exist and was created.
    Created,

    /// The object existed and was merge-patched.
    Patched,
}

/// Indicates that manifests could not be applied
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A manifest could not be decoded
    #[error("failed to decode manifest: {0}")]
    Decode(#[from] DecodeError),

    /// The stream did not contain any manifests
    #[error("no manifests found")]
    Empty,

    /// A manifest was not of the expected kind
    #[error("kind must be {expected}, got: {found}")]
    UnexpectedKind {
        /// The required kind.
        expected: &'static str,
        /// The manifest's kind.
        found: String,
    },

    /// A manifest does not have a name
    #[error("{kind} manifest does not have a name")]
    MissingName {
        /// The manifest's kind.
        kind: String,
    },

    /// The manifest's kind could not be resolved to a resource
    #[error("failed to discover resource for {gvk}: {source}")]
    Discovery {
        /// The unresolved group/version/kind.
        gvk: String,
        /// The discovery failure.
        #[source]
        source: kube_client::Error,
    },

    /// The live object could not be fetched
    #[error("failed to retrieve current configuration of {target}: {source}")]
    Get {
        /// The object being applied.
        target: Target,
        /// The API error.
        #[source]
        source: kube_client::Error,
    },

    /// The object could not be created
    #[error("failed to create {target}: {source}")]
    Create {
        /// The object being applied.
        target: Target,
        /// The API error.
        #[source]
        source: kube_client::Error,
    },

    /// The manifest could not be encoded as a patch
    #[error("failed to encode patch for {target}: {source}")]
    Encode {
        /// The object being applied.
        target: Target,
        /// The serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// The existing object could not be patched
    #[error("failed to update {target}: {source}")]
    Patch {
        /// The object being applied.
        target: Target,
        /// The API error.
        #[source]
        source: kube_client::Error,
    },

    /// The object could not be written before the retry timeout elapsed
    #[error("timed out after {timeout:?} applying {target}")]
    Timeout {
        /// The object being applied.
        target: Target,
        /// The retry timeout.
        timeout: Duration,
        /// The most recent retryable error.
        #[source]
        last: kube_client::Error,
    },

    /// The retry timeout cannot be represented as a deadline
    #[error("retry timeout is too large: {timeout:?}")]
    InvalidTimeout {
        /// The configured retry timeout.
        timeout: Duration,
    },
}

/// Identifies the object a manifest describes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// The object's kind.
    pub kind: String,

    /// The object's namespace, if it is namespaced.
    pub namespace: Option<String>,

    /// The object's name.
    pub name: String,
}

enum Attempt {
    Applied(Applied),
    Forbidden(kube_client::Error),
}

// === impl RetryParams ===

impl Default for RetryParams {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            timeout: Duration::from_secs(2),
        }
    }
}

// === impl ResourceType ===

impl ResourceType {
    /// Returns true iff objects of this type live in a namespace
    #[inline]
    pub fn is_namespaced(&self) -> bool {
        matches!(self.scope, Scope::Namespaced)
    }
}

// === impl Reconciler ===

impl<D, A> Reconciler<D, A>
where
    D: Discover,
    A: Access,
{
    /// Creates a reconciler that uses the default [`RetryParams`] and no transform
    pub fn new(discover: D, access: A) -> Self {
        Self {
            discover,
            access,
            transform: None,
            retry: RetryParams::default(),
            default_namespace: None,
        }
    }

    /// Rewrites each manifest with `transform` before it is written
    pub fn with_transform(
        mut self,
        transform: impl Fn(Option<&DynamicObject>, DynamicObject) -> DynamicObject
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Overrides the retry interval and timeout
    pub fn with_retry(mut self, retry: RetryParams) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the namespace used for namespaced manifests that do not specify one
    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = Some(namespace.into());
        self
    }

    /// Applies every manifest in `manifests`, in order.
    ///
    /// Processing stops at the first error; manifests before it have already been applied.
    pub async fn apply_all(&self, manifests: &[u8]) -> Result<Vec<Applied>, Error> {
        let mut applied = Vec::new();
        for manifest in Manifests::new(manifests) {
            let manifest = manifest.map_err(|error| {
                tracing::info!(%error, "Failed to decode manifest");
                error
            })?;
            applied.push(self.apply(manifest).await?);
        }
        tracing::debug!(manifests = applied.len(), "Applied all manifests");
        Ok(applied)
    }

    /// Creates or patches the object described by a single manifest
    pub async fn apply(&self, manifest: DynamicObject) -> Result<Applied, Error> {
        let gvk = manifest::gvk(&manifest)?;
        let name = manifest
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::MissingName {
                kind: gvk.kind.clone(),
            })?;

        // Unknown kinds are not retried.
        let resource = self.discover.resolve(&gvk).await.map_err(|source| {
            tracing::info!(error = %source, ?gvk, "Failed to discover resource");
            Error::Discovery {
                gvk: format!("{}/{}, Kind={}", gvk.group, gvk.version, gvk.kind),
                source,
            }
        })?;

        let namespace = if resource.is_namespaced() {
            manifest
                .metadata
                .namespace
                .clone()
                .or_else(|| self.default_namespace.clone())
        } else {
            None
        };
        let objects = self.access.objects(&resource, namespace.as_deref());
        let target = Target {
            kind: gvk.kind,
            namespace,
            name,
        };

        let deadline = time::Instant::now()
            .checked_add(self.retry.timeout)
            .ok_or(Error::InvalidTimeout {
                timeout: self.retry.timeout,
            })?;
        loop {
            let error = match self.try_apply(&objects, &target, manifest.clone()).await? {
                Attempt::Applied(applied) => return Ok(applied),
                Attempt::Forbidden(error) => error,
            };

            let next = time::Instant::now()
                .checked_add(self.retry.interval)
                .filter(|next| *next <= deadline);
            let Some(next) = next else {
                tracing::info!(%target, timeout = ?self.retry.timeout, "Timed out applying manifest");
                return Err(Error::Timeout {
                    target,
                    timeout: self.retry.timeout,
                    last: error,
                });
            };
            time::sleep_until(next).await;
        }
    }

    async fn try_apply(
        &self,
        objects: &A::Objects,
        target: &Target,
        mut manifest: DynamicObject,
    ) -> Result<Attempt, Error> {
        let live = objects
            .get(&target.name)
            .await
            .map_err(|source| Error::Get {
                target: target.clone(),
                source,
            })?;

        let Some(live) = live else {
            manifest.metadata.resource_version = None;
            let manifest = self.transform(None, manifest);
            let created = objects
                .create(&manifest)
                .await
                .map_err(|source| {
                    tracing::info!(error = %source, %target, "Failed to create");
                    Error::Create {
                        target: target.clone(),
                        source,
                    }
                })?;
            tracing::info!(%target, version = ?created.metadata.resource_version, "Created");
            return Ok(Attempt::Applied(target.applied(Action::Created, created)));
        };

        let mut manifest = self.transform(Some(&live), manifest);
        manifest.metadata.resource_version = live.metadata.resource_version.clone();
        let patch = serde_json::to_value(&manifest).map_err(|source| Error::Encode {
            target: target.clone(),
            source,
        })?;
        tracing::trace!(%patch);

        match objects.patch(&target.name, &patch).await {
            Ok(patched) => {
                tracing::info!(%target, version = ?patched.metadata.resource_version, "Updated");
                Ok(Attempt::Applied(target.applied(Action::Patched, patched)))
            }
            Err(error) if is_forbidden(&error) => {
                tracing::debug!(%error, %target, "Update forbidden, retrying");
                Ok(Attempt::Forbidden(error))
            }
            Err(source) => {
                tracing::info!(error = %source, %target, "Failed to update");
                Err(Error::Patch {
                    target: target.clone(),
                    source,
                })
            }
        }
    }

    fn transform(&self, live: Option<&DynamicObject>, manifest: DynamicObject) -> DynamicObject {
        match self.transform.as_ref() {
            Some(transform) => transform(live, manifest),
            None => manifest,
        }
    }
}

fn is_forbidden(error: &kube_client::Error) -> bool {
    matches!(
        error,
        kube_client::Error::Api(kube_core::ErrorResponse { code, .. })
            if hyper::StatusCode::from_u16(*code).ok() == Some(hyper::StatusCode::FORBIDDEN)
    )
}

// === impl Error ===

impl Error {
    /// Returns true iff the error can only be fixed by changing the manifests.
    ///
    /// Malformed documents, unexpected or unknown kinds, and unnamed objects are structural.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Decode(_)
                | Self::Empty
                | Self::UnexpectedKind { .. }
                | Self::MissingName { .. }
                | Self::Discovery { .. }
        )
    }

    /// Returns true iff the retry window elapsed without a successful write.
    ///
    /// Applying the same manifests again may succeed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// === impl Target ===

impl Target {
    fn applied(&self, action: Action, obj: DynamicObject) -> Applied {
        Applied {
            action,
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            resource_version: obj.metadata.resource_version,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace.as_deref() {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

// === impl Applied ===

impl fmt::Display for Applied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            Action::Created => "created",
            Action::Patched => "updated",
        };
        match self.namespace.as_deref() {
            Some(ns) => write!(f, "{} {}/{} {}", self.kind, ns, self.name, action),
            None => write!(f, "{} {} {}", self.kind, self.name, action),
        }
    }
}
