//! Namespace-scoped test context
//!
//! A [`Context`] owns one namespace in the cluster for the duration of a
//! test. Manifests applied through it are remembered so [`Context::cleanup`]
//! can delete them together with the namespace. The `#[aksprobe::test]`
//! macro creates the context and runs cleanup on every exit path.
//!
//! # Example
//!
//! ```ignore
//! use aksprobe::Context;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = Context::with_namespace("aksinternetns").await?;
//!
//!     ctx.apply_manifest("./nginx-deployment.yml").await?;
//!     ctx.wait_service_available("nginx-service", 10, Duration::from_secs(20)).await?;
//!
//!     ctx.cleanup().await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

use crate::cli::CliError;
use crate::endpoints::{resolve_endpoints, Endpoints};
use crate::kubectl::Kubectl;
use crate::poll::{PollError, Poller, RetryBudget};

/// Label put on every namespace this crate creates
pub const NAMESPACE_LABEL: &str = "aksprobe.io/test";

/// Errors from Context operations
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Failed to create Kubernetes client: {0}")]
    ClientError(String),

    #[error("Failed to create namespace: {0}")]
    NamespaceError(String),

    #[error("Failed to cleanup namespace: {0}")]
    CleanupError(String),

    #[error("Failed to get resource: {0}")]
    GetError(String),

    #[error("Service '{name}' not available after {attempts} checks: {last_state}")]
    ServiceUnavailable {
        name: String,
        attempts: u32,
        last_state: String,
    },

    #[error(transparent)]
    Cli(#[from] CliError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

/// Connection to the cluster plus one namespace owned by the current test
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Namespace for operations
    pub namespace: String,
    kubectl: Kubectl,
    applied: Mutex<Vec<PathBuf>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("namespace", &self.namespace)
            .field("kubectl", &self.kubectl)
            .finish_non_exhaustive()
    }
}

/// Random namespace name, `aksprobe-` plus eight hex digits
pub fn generate_namespace() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("aksprobe-{}", &id[..8])
}

impl Context {
    /// Create a context in a fresh, randomly named namespace
    pub async fn new() -> Result<Self, ContextError> {
        Self::with_namespace(generate_namespace()).await
    }

    /// Create a context in `namespace` (lowercased)
    ///
    /// A namespace left over from an earlier, aborted run is reused.
    pub async fn with_namespace(namespace: impl Into<String>) -> Result<Self, ContextError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ContextError::ClientError(e.to_string()))?;

        Self::with_client(client, Kubectl::new(), namespace).await
    }

    /// Create a context from an existing client and `kubectl` wrapper
    pub async fn with_client(
        client: Client,
        kubectl: Kubectl,
        namespace: impl Into<String>,
    ) -> Result<Self, ContextError> {
        let namespace = namespace.into().to_lowercase();

        let namespaces: Api<Namespace> = Api::all(client.clone());
        let ns = Namespace {
            metadata: kube::api::ObjectMeta {
                name: Some(namespace.clone()),
                labels: Some(
                    [(NAMESPACE_LABEL.to_string(), "true".to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };

        match namespaces.create(&PostParams::default(), &ns).await {
            Ok(_) => info!(namespace = %namespace, "Created test namespace"),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                warn!(namespace = %namespace, "Namespace already exists, reusing");
            }
            Err(e) => return Err(ContextError::NamespaceError(e.to_string())),
        }

        Ok(Self {
            client,
            namespace,
            kubectl,
            applied: Mutex::new(Vec::new()),
        })
    }

    /// The `kubectl` wrapper this context shells out through
    pub fn kubectl(&self) -> &Kubectl {
        &self.kubectl
    }

    /// `kubectl apply -f` a manifest into the test namespace
    ///
    /// The manifest is deleted again by [`cleanup`](Self::cleanup).
    pub async fn apply_manifest(&self, path: impl AsRef<Path>) -> Result<(), ContextError> {
        let path = path.as_ref().to_path_buf();
        let kubectl = self.kubectl.clone();
        let namespace = self.namespace.clone();
        let manifest = path.clone();
        run_blocking(move || kubectl.apply(&manifest, &namespace)).await?;

        self.applied
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(path);
        Ok(())
    }

    /// Get a namespaced resource by name
    pub async fn get<K>(&self, name: &str) -> Result<K, ContextError>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        api.get(name)
            .await
            .map_err(|e| ContextError::GetError(format!("{name}: {e}")))
    }

    /// Wait until a Service exists and, if it is a load balancer, has an
    /// ingress address
    ///
    /// Checks up to `max_retries` times, `interval` apart.
    pub async fn wait_service_available(
        &self,
        name: &str,
        max_retries: u32,
        interval: Duration,
    ) -> Result<Service, ContextError> {
        wait_for_service(name, max_retries, interval, || self.get::<Service>(name)).await
    }

    /// Resolve pod name, pod IP and ingress IP of the test namespace
    ///
    /// The poll blocks between attempts, so it runs on the blocking pool.
    pub async fn resolve_endpoints(&self, budget: RetryBudget) -> Result<Endpoints, ContextError> {
        let kubectl = self.kubectl.clone();
        let namespace = self.namespace.clone();

        run_blocking(move || resolve_endpoints(&Poller::new(budget), &kubectl, &namespace)).await
    }

    /// Delete applied manifests, then the namespace
    ///
    /// Both steps are always attempted; the first failure is returned.
    pub async fn cleanup(&self) -> Result<(), ContextError> {
        let applied: Vec<PathBuf> = std::mem::take(
            &mut *self
                .applied
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );

        let mut first_error = None;
        for manifest in applied.into_iter().rev() {
            let kubectl = self.kubectl.clone();
            let namespace = self.namespace.clone();
            let path = manifest.clone();
            if let Err(e) = run_blocking(move || kubectl.delete(&path, &namespace)).await {
                warn!(manifest = %manifest.display(), error = %e, "Failed to delete manifest");
                first_error.get_or_insert(ContextError::CleanupError(e.to_string()));
            }
        }

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces
            .delete(&self.namespace, &DeleteParams::default())
            .await
        {
            Ok(_) => info!(namespace = %self.namespace, "Deleted test namespace"),
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "Failed to delete namespace");
                first_error.get_or_insert(ContextError::CleanupError(e.to_string()));
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// Run a blocking CLI call on tokio's blocking pool
async fn run_blocking<T, E, F>(f: F) -> Result<T, ContextError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ContextError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ContextError::TaskFailed(e.to_string()))?
        .map_err(Into::into)
}

/// Check a Service up to `max_retries` times, `interval` apart, until it
/// is [available](service_available)
///
/// There is no sleep after the last check. Zero retries fails without
/// calling `fetch`.
pub async fn wait_for_service<F, Fut>(
    name: &str,
    max_retries: u32,
    interval: Duration,
    mut fetch: F,
) -> Result<Service, ContextError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Service, ContextError>>,
{
    let mut last_state = "never checked".to_string();

    for attempt in 1..=max_retries {
        match fetch().await {
            Ok(svc) if service_available(&svc) => {
                info!(service = %name, attempt = attempt, "Service is available");
                return Ok(svc);
            }
            Ok(svc) => last_state = service_state(&svc),
            Err(e) => last_state = e.to_string(),
        }

        debug!(
            service = %name,
            attempt = attempt,
            max_retries = max_retries,
            state = %last_state,
            "Service not available yet"
        );
        if attempt < max_retries {
            tokio::time::sleep(interval).await;
        }
    }

    Err(ContextError::ServiceUnavailable {
        name: name.to_string(),
        attempts: max_retries,
        last_state,
    })
}

/// Whether a Service can take traffic
///
/// Load balancers need at least one ingress IP or hostname; every other
/// service type is available as soon as it exists.
pub fn service_available(svc: &Service) -> bool {
    let is_load_balancer = svc
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .is_some_and(|t| t == "LoadBalancer");

    if !is_load_balancer {
        return true;
    }

    svc.status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .is_some_and(|ingress| {
            ingress
                .iter()
                .any(|i| i.ip.is_some() || i.hostname.is_some())
        })
}

/// Human-readable description of a Service's readiness
pub fn service_state(svc: &Service) -> String {
    let svc_type = svc
        .spec
        .as_ref()
        .and_then(|s| s.type_.clone())
        .unwrap_or_else(|| "ClusterIP".to_string());

    if service_available(svc) {
        format!("{svc_type} available")
    } else {
        format!("{svc_type} waiting for load balancer ingress")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, ServiceSpec, ServiceStatus,
    };

    fn service(type_: &str, ingress: Option<Vec<LoadBalancerIngress>>) -> Service {
        Service {
            spec: Some(ServiceSpec {
                type_: Some(type_.to_string()),
                ..Default::default()
            }),
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus { ingress }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_generate_namespace() {
        let a = generate_namespace();
        let b = generate_namespace();

        assert!(a.starts_with("aksprobe-"), "got: {a}");
        assert_eq!(a.len(), "aksprobe-".len() + 8);
        assert_eq!(a, a.to_lowercase());
        assert_ne!(a, b);
    }

    #[test]
    fn test_cluster_ip_service_is_available() {
        let svc = service("ClusterIP", None);
        assert!(service_available(&svc));
        assert_eq!(service_state(&svc), "ClusterIP available");
    }

    #[test]
    fn test_service_without_spec_is_available() {
        assert!(service_available(&Service::default()));
    }

    #[test]
    fn test_load_balancer_without_ingress_is_pending() {
        let svc = service("LoadBalancer", None);
        assert!(!service_available(&svc));
        assert_eq!(
            service_state(&svc),
            "LoadBalancer waiting for load balancer ingress"
        );

        let svc = service("LoadBalancer", Some(vec![]));
        assert!(!service_available(&svc));
    }

    #[test]
    fn test_load_balancer_with_ip_is_available() {
        let svc = service(
            "LoadBalancer",
            Some(vec![LoadBalancerIngress {
                ip: Some("20.1.2.3".to_string()),
                ..Default::default()
            }]),
        );
        assert!(service_available(&svc));
    }

    #[test]
    fn test_load_balancer_with_hostname_is_available() {
        let svc = service(
            "LoadBalancer",
            Some(vec![LoadBalancerIngress {
                hostname: Some("lb.example.com".to_string()),
                ..Default::default()
            }]),
        );
        assert!(service_available(&svc));
    }

    fn pending() -> Service {
        service("LoadBalancer", None)
    }

    fn available() -> Service {
        service(
            "LoadBalancer",
            Some(vec![LoadBalancerIngress {
                ip: Some("20.1.2.3".to_string()),
                ..Default::default()
            }]),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_service_settles_on_third_check() {
        let checks = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let svc = wait_for_service("nginx-service", 10, Duration::from_secs(20), || {
            let n = checks.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(if n >= 3 { available() } else { pending() }) }
        })
        .await
        .unwrap();

        assert!(service_available(&svc));
        assert_eq!(checks.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_service_exhausts_without_trailing_sleep() {
        let checks = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let err = wait_for_service("nginx-service", 4, Duration::from_secs(20), || {
            checks.fetch_add(1, Ordering::SeqCst);
            async { Ok(pending()) }
        })
        .await
        .unwrap_err();

        match err {
            ContextError::ServiceUnavailable {
                name,
                attempts,
                last_state,
            } => {
                assert_eq!(name, "nginx-service");
                assert_eq!(attempts, 4);
                assert_eq!(last_state, "LoadBalancer waiting for load balancer ingress");
            }
            other => panic!("expected ServiceUnavailable, got {other:?}"),
        }
        assert_eq!(checks.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_service_keeps_last_fetch_error() {
        let err = wait_for_service("nginx-service", 2, Duration::from_secs(1), || async {
            Err(ContextError::GetError("nginx-service: NotFound".to_string()))
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("NotFound"), "got: {err}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_service_zero_retries_never_checks() {
        let checks = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let err = wait_for_service("nginx-service", 0, Duration::from_secs(20), || {
            checks.fetch_add(1, Ordering::SeqCst);
            async { Ok(available()) }
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            ContextError::ServiceUnavailable { attempts: 0, ref last_state, .. } if last_state == "never checked"
        ));
        assert_eq!(checks.load(Ordering::SeqCst), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_run_blocking_leaves_the_runtime_thread() {
        let caller = std::thread::current().id();

        let worker = run_blocking(|| Ok::<_, CliError>(std::thread::current().id()))
            .await
            .unwrap();

        assert_ne!(caller, worker);
    }

    #[tokio::test]
    async fn test_run_blocking_converts_errors() {
        let err = run_blocking(|| Err::<(), _>(CliError::CommandNotFound("kubectl".to_string())))
            .await
            .unwrap_err();

        assert!(matches!(err, ContextError::Cli(CliError::CommandNotFound(_))));
    }

    #[tokio::test]
    #[ignore] // Requires a real cluster
    async fn test_context_creates_and_cleans_up_namespace() {
        let ctx = Context::new().await.expect("Should create context");

        let namespaces: Api<Namespace> = Api::all(ctx.client.clone());
        let ns = namespaces
            .get(&ctx.namespace)
            .await
            .expect("Namespace should exist in cluster");
        assert_eq!(
            ns.metadata.labels.unwrap().get(NAMESPACE_LABEL),
            Some(&"true".to_string())
        );

        ctx.cleanup().await.expect("Should cleanup");
    }
}
