//! Discovery of a freshly deployed workload's addresses
//!
//! Resolves the pod name, the pod IP and the ingress IP of a namespace with
//! a [`Poller`], since all three lag behind `kubectl apply`.

use tracing::info;

use crate::curl::http_url;
use crate::kubectl::Kubectl;
use crate::poll::{PollError, PollResult, Poller, Query, QueryError, Sleeper};

pub const POD_NAME: &str = "pod name";
pub const POD_IP: &str = "pod ip";
pub const INGRESS_IP: &str = "ingress ip";

/// Addresses of a deployed workload
///
/// Values are whatever `kubectl` reported once every lookup stopped
/// erroring, minus outer quotes. They may be empty: an ingress can exist
/// before its load balancer address is assigned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub pod_name: String,
    pub pod_ip: String,
    pub ingress_ip: String,
}

impl Endpoints {
    fn from_result(result: &PollResult) -> Self {
        let value = |q| result.get(q).unwrap_or_default().to_string();
        Self {
            pod_name: value(POD_NAME),
            pod_ip: value(POD_IP),
            ingress_ip: value(INGRESS_IP),
        }
    }

    pub fn pod_url(&self) -> String {
        http_url(&self.pod_ip)
    }

    pub fn ingress_url(&self) -> String {
        http_url(&self.ingress_ip)
    }

    /// `true` if any address came back empty
    pub fn is_blank(&self) -> bool {
        self.pod_name.is_empty() || self.pod_ip.is_empty() || self.ingress_ip.is_empty()
    }
}

/// Pod name, pod IP and ingress IP lookups for `namespace`, in that order
pub fn endpoint_queries<'a>(kubectl: &'a Kubectl, namespace: &'a str) -> Vec<Query<'a>> {
    vec![
        Query::new(POD_NAME, move |_| kubectl.pod_names(namespace)),
        Query::new(POD_IP, move |seen: &PollResult| {
            let pod = seen.require(POD_NAME)?;
            Ok::<_, QueryError>(kubectl.pod_ip(pod, namespace)?)
        }),
        Query::new(INGRESS_IP, move |_| kubectl.ingress_ip(namespace)),
    ]
}

/// Poll until all three lookups succeed
pub fn resolve_endpoints<S: Sleeper>(
    poller: &Poller<S>,
    kubectl: &Kubectl,
    namespace: &str,
) -> Result<Endpoints, PollError> {
    let mut queries = endpoint_queries(kubectl, namespace);
    let settled = poller.run(&mut queries)?;
    let endpoints = Endpoints::from_result(&settled.result);

    info!(
        namespace = %namespace,
        pod = %endpoints.pod_name,
        pod_ip = %endpoints.pod_ip,
        ingress_ip = %endpoints.ingress_ip,
        attempts = settled.attempts,
        "Resolved workload endpoints"
    );
    Ok(endpoints)
}
