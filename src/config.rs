//! Configuration types for the validation suite
//!
//! Targets are built programmatically with the values a deployment is
//! expected to have, then optionally overridden from `AKSPROBE_*`
//! environment variables so the same suite can point at another stage.
//!
//! # Example
//!
//! ```
//! use aksprobe::config::{ClusterTarget, NetworkTarget, WorkloadTarget};
//!
//! let cluster = ClusterTarget::new("rg-aks", "aks-01").node_count(1);
//!
//! let network = NetworkTarget::new("bastion-vnet", "rg-net")
//!     .subnet("AzureBastionSubnet", "192.168.5.0/26")
//!     .nsg("rg-nsg", "bastion-nsg", 16);
//!
//! let workload = WorkloadTarget::new("AksInternetNs")
//!     .manifest("./nginx-deployment.yml")
//!     .service("nginx-service");
//!
//! assert_eq!(workload.namespace, "aksinternetns");
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::poll::RetryBudget;

/// Errors from reading configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },
}

/// Source of override values, usually the process environment
pub trait Lookup {
    fn get(&self, key: &str) -> Option<String>;
}

impl<F> Lookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        self(key)
    }
}

/// Reads overrides from the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Lookup for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Values that can be overridden from a [`Lookup`]
pub trait Overridable: Sized {
    /// Replace fields whose variable is set
    fn overrides(self, lookup: &dyn Lookup) -> Result<Self, ConfigError>;

    /// [`overrides`](Self::overrides) from the process environment
    fn env_overrides(self) -> Result<Self, ConfigError> {
        self.overrides(&ProcessEnv)
    }
}

fn override_string(lookup: &dyn Lookup, var: &str, field: &mut String) {
    if let Some(value) = lookup.get(var) {
        *field = value;
    }
}

fn override_parsed<T>(lookup: &dyn Lookup, var: &str, field: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = lookup.get(var) {
        *field = value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: var.to_string(),
            value: value.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

fn override_secs(lookup: &dyn Lookup, var: &str, field: &mut Duration) -> Result<(), ConfigError> {
    let mut secs = field.as_secs();
    override_parsed(lookup, var, &mut secs)?;
    *field = Duration::from_secs(secs);
    Ok(())
}

/// The managed cluster under test
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterTarget {
    /// Resource group holding the cluster
    pub resource_group: String,

    /// Managed cluster name
    pub name: String,

    /// Subscription id; empty means the CLI's current subscription
    pub subscription: String,

    /// Fetch admin credentials instead of user credentials
    pub admin: bool,

    /// Expected node count of the first agent pool
    pub node_count: i32,
}

impl ClusterTarget {
    pub fn new(resource_group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_group: resource_group.into(),
            name: name.into(),
            subscription: String::new(),
            admin: true,
            node_count: 1,
        }
    }

    pub fn subscription(mut self, id: impl Into<String>) -> Self {
        self.subscription = id.into();
        self
    }

    pub fn admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    pub fn node_count(mut self, count: i32) -> Self {
        self.node_count = count;
        self
    }
}

impl Overridable for ClusterTarget {
    fn overrides(mut self, lookup: &dyn Lookup) -> Result<Self, ConfigError> {
        override_string(lookup, "AKSPROBE_RESOURCE_GROUP", &mut self.resource_group);
        override_string(lookup, "AKSPROBE_CLUSTER_NAME", &mut self.name);
        override_string(lookup, "AKSPROBE_SUBSCRIPTION_ID", &mut self.subscription);
        override_parsed(lookup, "AKSPROBE_ADMIN_CREDENTIALS", &mut self.admin)?;
        override_parsed(lookup, "AKSPROBE_NODE_COUNT", &mut self.node_count)?;
        Ok(self)
    }
}

/// The virtual network and NSG under test
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkTarget {
    /// Virtual network name
    pub vnet: String,

    /// Resource group holding the virtual network
    pub vnet_resource_group: String,

    /// Subnet expected inside the virtual network
    pub subnet: String,

    /// Expected address prefix of `subnet`
    pub subnet_prefix: String,

    /// Resource group holding the NSG
    pub nsg_resource_group: String,

    /// Network security group name
    pub nsg: String,

    /// Custom rules plus the six Azure default rules
    pub nsg_rule_count: usize,

    /// Subscription id; empty means the CLI's current subscription
    pub subscription: String,
}

impl NetworkTarget {
    pub fn new(vnet: impl Into<String>, resource_group: impl Into<String>) -> Self {
        Self {
            vnet: vnet.into(),
            vnet_resource_group: resource_group.into(),
            subnet: String::new(),
            subnet_prefix: String::new(),
            nsg_resource_group: String::new(),
            nsg: String::new(),
            nsg_rule_count: 6,
            subscription: String::new(),
        }
    }

    pub fn subnet(mut self, name: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.subnet = name.into();
        self.subnet_prefix = prefix.into();
        self
    }

    pub fn nsg(
        mut self,
        resource_group: impl Into<String>,
        name: impl Into<String>,
        rule_count: usize,
    ) -> Self {
        self.nsg_resource_group = resource_group.into();
        self.nsg = name.into();
        self.nsg_rule_count = rule_count;
        self
    }

    pub fn subscription(mut self, id: impl Into<String>) -> Self {
        self.subscription = id.into();
        self
    }
}

impl Overridable for NetworkTarget {
    fn overrides(mut self, lookup: &dyn Lookup) -> Result<Self, ConfigError> {
        override_string(lookup, "AKSPROBE_VNET_NAME", &mut self.vnet);
        override_string(lookup, "AKSPROBE_VNET_RESOURCE_GROUP", &mut self.vnet_resource_group);
        override_string(lookup, "AKSPROBE_SUBNET_NAME", &mut self.subnet);
        override_string(lookup, "AKSPROBE_SUBNET_PREFIX", &mut self.subnet_prefix);
        override_string(lookup, "AKSPROBE_NSG_RESOURCE_GROUP", &mut self.nsg_resource_group);
        override_string(lookup, "AKSPROBE_NSG_NAME", &mut self.nsg);
        override_parsed(lookup, "AKSPROBE_NSG_RULE_COUNT", &mut self.nsg_rule_count)?;
        override_string(lookup, "AKSPROBE_SUBSCRIPTION_ID", &mut self.subscription);
        Ok(self)
    }
}

/// The workload deployed into the cluster for connectivity checks
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadTarget {
    /// Namespace the workload is deployed into (always lowercase)
    pub namespace: String,

    /// Manifest applied with `kubectl apply -f`
    pub manifest: PathBuf,

    /// Service that must become available
    pub service: String,

    /// Service availability checks before giving up
    pub service_retries: u32,

    /// Wait between service availability checks
    pub service_interval: Duration,

    /// Pause between applying the manifest and the first endpoint lookup
    pub settle_delay: Duration,

    /// Retry budget for endpoint lookups
    pub poll: RetryBudget,

    /// Upper bound on each HTTP probe
    pub http_timeout: Duration,
}

impl WorkloadTarget {
    /// Namespaces must be lowercase, so `namespace` is lowercased here
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into().to_lowercase(),
            manifest: PathBuf::from("nginx-deployment.yml"),
            service: "nginx-service".to_string(),
            service_retries: 10,
            service_interval: Duration::from_secs(20),
            settle_delay: Duration::from_secs(30),
            poll: RetryBudget::default(),
            http_timeout: Duration::from_secs(30),
        }
    }

    pub fn manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest = path.into();
        self
    }

    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.service = name.into();
        self
    }

    pub fn service_wait(mut self, retries: u32, interval: Duration) -> Self {
        self.service_retries = retries;
        self.service_interval = interval;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn poll(mut self, budget: RetryBudget) -> Self {
        self.poll = budget;
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
}

impl Overridable for WorkloadTarget {
    fn overrides(mut self, lookup: &dyn Lookup) -> Result<Self, ConfigError> {
        override_string(lookup, "AKSPROBE_NAMESPACE", &mut self.namespace);
        self.namespace = self.namespace.to_lowercase();

        if let Some(path) = lookup.get("AKSPROBE_MANIFEST") {
            self.manifest = PathBuf::from(path);
        }
        override_string(lookup, "AKSPROBE_SERVICE_NAME", &mut self.service);
        override_parsed(lookup, "AKSPROBE_SERVICE_RETRIES", &mut self.service_retries)?;
        override_secs(lookup, "AKSPROBE_SERVICE_INTERVAL_SECS", &mut self.service_interval)?;
        override_secs(lookup, "AKSPROBE_SETTLE_DELAY_SECS", &mut self.settle_delay)?;
        override_secs(lookup, "AKSPROBE_HTTP_TIMEOUT_SECS", &mut self.http_timeout)?;

        let mut retries = self.poll.max_retries();
        let mut delay = self.poll.delay();
        override_parsed(lookup, "AKSPROBE_POLL_RETRIES", &mut retries)?;
        override_secs(lookup, "AKSPROBE_POLL_DELAY_SECS", &mut delay)?;
        self.poll = RetryBudget::new(retries, delay);

        Ok(self)
    }
}
