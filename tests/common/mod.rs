//! Expected values shared by the live suites
//!
//! Defaults describe the SIT environment; every value can be overridden
//! with the matching `AKSPROBE_*` variable.

#![allow(dead_code)]

use aksprobe::{Azure, ClusterTarget, NetworkTarget, Overridable, WorkloadTarget};

pub fn cluster() -> ClusterTarget {
    ClusterTarget::new("cri3-aks01_re1-ez-sit-004", "cri3-aks01-ez-cls_r1-sit-004")
        .node_count(1)
        .env_overrides()
        .expect("invalid cluster overrides")
}

pub fn network() -> NetworkTarget {
    NetworkTarget::new("cri3-bastion-nprd", "htx-platform")
        .subnet("AzureBastionSubnet", "192.168.5.0/26")
        // 10 custom rules + 6 Azure defaults
        .nsg("cri3-nw-bz-nw_rg-nprod-004", "cri3-nw-bz-bastion01_nsg-nprod-004", 16)
        .env_overrides()
        .expect("invalid network overrides")
}

pub fn workload() -> WorkloadTarget {
    WorkloadTarget::new("aksinternetns-rk")
        .manifest(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/nginx-deployment.yml"))
        .service("nginx-service")
        .env_overrides()
        .expect("invalid workload overrides")
}

/// Merge the cluster's credentials into the default kubeconfig
///
/// Overwrites `~/.kube/config` entries for the cluster. Panics on failure:
/// nothing else can run without credentials.
pub fn fetch_credentials() {
    let cluster = cluster();
    Azure::new()
        .subscription(&cluster.subscription)
        .get_aks_credentials(&cluster.resource_group, &cluster.name, cluster.admin)
        .unwrap_or_else(|e| panic!("Error getting AKS credentials: {e}"));
}
