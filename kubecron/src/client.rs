//! Loads Kubernetes clients from the ambient kubeconfig

pub use kube_client::Client;

/// Selects the kubeconfig context, cluster, and user used by the client.
///
/// Unset fields fall back to the kubeconfig's current context.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct ClientArgs {
    /// The name of the kubeconfig context to use
    #[cfg_attr(feature = "clap", arg(long, global = true))]
    pub context: Option<String>,

    /// The name of the kubeconfig cluster to use
    #[cfg_attr(feature = "clap", arg(long, global = true))]
    pub cluster: Option<String>,

    /// The name of the kubeconfig user to use
    #[cfg_attr(feature = "clap", arg(long, global = true))]
    pub user: Option<String>,
}

/// Indicates that a client could not be configured
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The kubeconfig could not be loaded
    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube_client::config::KubeconfigError),

    /// The client could not be built from the kubeconfig
    #[error("failed to build client: {0}")]
    Client(#[from] kube_client::Error),
}

impl ClientArgs {
    /// Loads the kubeconfig and builds a client from it
    pub async fn try_client(self) -> Result<Client, ConfigError> {
        let options = kube_client::config::KubeConfigOptions {
            context: self.context,
            cluster: self.cluster,
            user: self.user,
            ..Default::default()
        };
        let config = kube_client::Config::from_kubeconfig(&options).await?;
        tracing::debug!(cluster_url = %config.cluster_url, namespace = %config.default_namespace);
        Client::try_from(config).map_err(Into::into)
    }
}
