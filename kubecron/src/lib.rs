//! CronJob lifecycle operations built on [`kube`]
//!
//! The core of this crate is [`apply::Reconciler`], which creates or merge-patches every object
//! described by a stream of YAML or JSON manifests, in order. [`CronJobs`] builds the
//! `apply`/`get`/`list`/`delete`/`events` operations of the `kubecron` command on top of it.
//!
//! # Crate Features
//!
//! All feature flags are disabled by default.
//!
//! - **clap**: Enables command-line parsing of [`ClientArgs`] using [`clap`].
//! - **log**: Enables the [`log`] module, which configures a global [`tracing`] subscriber.
//! - **rustls-tls**: Use [`rustls`] as the client's TLS implementation. A crypto provider must
//!   also be selected, either with one of the features below or by the application.
//! - **rustls-tls-aws-lc-rs**: Use `rustls` with the `aws-lc-rs` crypto provider.
//! - **rustls-tls-ring**: Use `rustls` with the `ring` crypto provider.
//! - **openssl-tls**: Use OpenSSL as the client's TLS implementation.
//!
//! [`kube`]: https://github.com/kube-rs/kube-rs
//! [`clap`]: https://crates.io/crates/clap
//! [`tracing`]: https://crates.io/crates/tracing
//! [`rustls`]: https://crates.io/crates/rustls

#![deny(rust_2018_idioms)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod apply;
pub mod client;
pub mod cronjob;
pub mod manifest;

#[cfg(feature = "log")]
#[cfg_attr(docsrs, doc(cfg(feature = "log")))]
pub mod log;

pub use self::apply::{Applied, Reconciler, RetryParams};
pub use self::client::ClientArgs;
pub use self::cronjob::CronJobs;

#[cfg(feature = "log")]
pub use self::log::{LogFilter, LogFormat, LogInitError};
