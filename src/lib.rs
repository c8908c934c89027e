//! aksprobe - validation suite for provisioned AKS infrastructure
//!
//! Checks that an already-provisioned AKS cluster, its virtual network and
//! network security group, and a workload deployed into it exist and behave
//! as expected. All the heavy lifting is done by `az`, `kubectl` and `curl`;
//! this crate wraps them, and polls the cluster while freshly applied
//! resources settle.
//!
//! # Example
//!
//! ```ignore
//! use aksprobe::{Context, RetryBudget};
//!
//! #[aksprobe::test(namespace = "aksinternetns")]
//! async fn test_workload(ctx: Context) {
//!     ctx.apply_manifest("./nginx-deployment.yml").await.unwrap();
//!
//!     let endpoints = ctx.resolve_endpoints(RetryBudget::default()).await.unwrap();
//!     aksprobe::Curl::new().get(&endpoints.pod_url()).unwrap();
//! }
//! ```
//!
//! Live suites are `#[ignore]`d; run them with `cargo test -- --ignored`
//! after `az login`.

pub mod azure;
pub mod cli;
pub mod config;
pub mod context;
pub mod curl;
pub mod endpoints;
pub mod kubectl;
pub mod poll;
pub mod telemetry;
pub mod text;

pub use aksprobe_macros::test;

pub use azure::{Azure, AzureError, ManagedCluster, NsgRules};
pub use cli::{CliError, CommandOutput, CommandRunner, SystemRunner};
pub use config::{ClusterTarget, ConfigError, NetworkTarget, Overridable, WorkloadTarget};
pub use context::{Context, ContextError};
pub use curl::Curl;
pub use endpoints::{resolve_endpoints, Endpoints};
pub use kubectl::Kubectl;
pub use poll::{PollError, PollResult, Poller, Query, QueryError, RetryBudget};
pub use text::trim_quotes;

#[doc(hidden)]
pub mod __private {
    pub use futures;
}
