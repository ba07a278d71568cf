#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use kube_core::Duration as KubeDuration;
use kubecron::{CronJobs, RetryParams};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kubecron", version, about = "CronJob operations against a Kubernetes cluster")]
struct Args {
    /// The tracing filter used for logs
    #[arg(
        long,
        env = "KUBECRON_LOG",
        default_value = "kubecron=info,warn",
        global = true
    )]
    log_level: String,

    /// The logging format
    #[arg(long, default_value = "plain", global = true)]
    log_format: kubecron::LogFormat,

    #[clap(flatten)]
    client: kubecron::ClientArgs,

    /// The namespace in which CronJobs are managed
    #[arg(
        short,
        long,
        default_value = "default",
        global = true,
        value_parser = clap::builder::NonEmptyStringValueParser::new()
    )]
    namespace: String,

    /// The format used to print resources
    #[arg(short, long, value_enum, default_value = "yaml", global = true)]
    output: Output,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::Subcommand)]
enum Command {
    /// Create or update CronJobs from a YAML or JSON file
    Apply {
        /// The manifest file to apply
        #[arg(short, long)]
        file: PathBuf,

        /// The field manager recorded on written CronJobs
        #[arg(long, default_value = "kubecron")]
        field_manager: String,

        /// The delay between attempts to write a CronJob
        #[arg(long, default_value = "50ms")]
        poll_interval: KubeDuration,

        /// How long to keep retrying a CronJob whose update is forbidden
        #[arg(long, default_value = "2s")]
        apply_timeout: KubeDuration,
    },

    /// Get a CronJob
    Get { name: String },

    /// List CronJobs
    List,

    /// Delete a CronJob
    Delete { name: String },

    /// List the events that reference a CronJob
    Events { name: String },
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum Output {
    Yaml,
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let Args {
        log_level,
        log_format,
        client,
        namespace,
        output,
        command,
    } = Args::parse();

    let filter = kubecron::LogFilter::try_new(&log_level).context("invalid log level")?;
    log_format.try_init(filter)?;

    let client = client
        .try_client()
        .await
        .context("failed to initialize Kubernetes client")?;
    let cronjobs = CronJobs::new(client, namespace);

    match command {
        Command::Apply {
            file,
            field_manager,
            poll_interval,
            apply_timeout,
        } => {
            let manifests = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            tracing::debug!(file = %file.display(), bytes = manifests.len(), "Applying");
            let applied = cronjobs
                .with_field_manager(field_manager)
                .with_retry(RetryParams {
                    interval: poll_interval.into(),
                    timeout: apply_timeout.into(),
                })
                .apply(&manifests)
                .await
                .context("failed to create or update CronJobs")?;
            for applied in applied {
                println!("{applied}");
            }
        }

        Command::Get { name } => output.print(&cronjobs.get(&name).await?)?,

        Command::List => output.print(&cronjobs.list().await?)?,

        Command::Delete { name } => {
            cronjobs.delete(&name).await?;
            println!("deleted CronJob {}/{}", cronjobs.namespace(), name);
        }

        Command::Events { name } => output.print(&cronjobs.events(&name).await?)?,
    }

    Ok(())
}

// === impl Output ===

impl Output {
    fn print<T: serde::Serialize>(self, value: &T) -> Result<()> {
        let text = match self {
            Self::Yaml => serde_yaml::to_string(value)?,
            Self::Json => {
                let mut json = serde_json::to_string_pretty(value)?;
                json.push('\n');
                json
            }
        };
        print!("{text}");
        Ok(())
    }
}
