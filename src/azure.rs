//! Azure resource lookups through the `az` CLI
//!
//! Every call asks `az` for JSON and decodes only the fields the suite
//! asserts on. An empty subscription means "whatever `az account show`
//! says is current".

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::cli::{render_command, CliError, CommandRunner, SystemRunner};

/// Errors from Azure lookups
#[derive(Debug, thiserror::Error)]
pub enum AzureError {
    #[error(transparent)]
    Cli(#[from] CliError),

    #[error("failed to decode output of `{command}`: {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected output from `{command}`: {output}")]
    UnexpectedOutput { command: String, output: String },
}

/// Managed cluster fields the suite checks
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedCluster {
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub kubernetes_version: Option<String>,
    #[serde(default)]
    pub provisioning_state: Option<String>,
    #[serde(default)]
    pub agent_pool_profiles: Vec<AgentPoolProfile>,
}

impl ManagedCluster {
    /// Node count of the first agent pool
    pub fn first_pool_node_count(&self) -> Option<i32> {
        self.agent_pool_profiles.first().and_then(|p| p.count)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolProfile {
    pub name: String,
    #[serde(default)]
    pub count: Option<i32>,
    #[serde(default)]
    pub vm_size: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    pub name: String,
    #[serde(default)]
    pub address_prefix: Option<String>,
    #[serde(default)]
    pub address_prefixes: Vec<String>,
}

impl Subnet {
    /// Single prefix, falling back to the first of a multi-prefix subnet
    pub fn prefix(&self) -> Option<&str> {
        self.address_prefix
            .as_deref()
            .or_else(|| self.address_prefixes.first().map(String::as_str))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRule {
    pub name: String,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkSecurityGroup {
    #[serde(default)]
    security_rules: Vec<SecurityRule>,
    #[serde(default)]
    default_security_rules: Vec<SecurityRule>,
}

/// Rules of a network security group
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NsgRules {
    /// Custom rules followed by the Azure default rules
    pub summarized_rules: Vec<SecurityRule>,
    /// How many of `summarized_rules` are custom
    pub custom_count: usize,
}

impl NsgRules {
    /// Custom rules; all rules if `custom_count` overshoots
    pub fn custom(&self) -> &[SecurityRule] {
        self.summarized_rules
            .get(..self.custom_count)
            .unwrap_or(&self.summarized_rules)
    }

    pub fn defaults(&self) -> &[SecurityRule] {
        self.summarized_rules
            .get(self.custom_count..)
            .unwrap_or_default()
    }

    pub fn find(&self, name: &str) -> Option<&SecurityRule> {
        self.summarized_rules.iter().find(|r| r.name == name)
    }
}

/// `az` bound to an optional subscription
#[derive(Debug, Clone)]
pub struct Azure {
    runner: Arc<dyn CommandRunner>,
    subscription: Option<String>,
}

impl Default for Azure {
    fn default() -> Self {
        Self::new()
    }
}

impl Azure {
    #[must_use]
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SystemRunner))
    }

    #[must_use]
    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            subscription: None,
        }
    }

    /// Target a specific subscription; empty ids are ignored
    #[must_use]
    pub fn subscription(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.subscription = (!id.is_empty()).then_some(id);
        self
    }

    fn run(&self, args: &[&str]) -> Result<String, CliError> {
        let mut full = args.to_vec();
        if let Some(ref id) = self.subscription {
            full.extend(["--subscription", id.as_str()]);
        }
        self.runner.stdout("az", &full)
    }

    fn json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, AzureError> {
        let mut full = args.to_vec();
        full.extend(["--output", "json"]);
        let stdout = self.run(&full)?;
        serde_json::from_str(&stdout).map_err(|source| AzureError::Decode {
            command: render_command("az", &full),
            source,
        })
    }

    /// Merge AKS credentials into the default kubeconfig
    ///
    /// Runs `az aks get-credentials`, overwriting any existing entry for the
    /// cluster.
    #[instrument(skip(self))]
    pub fn get_aks_credentials(
        &self,
        resource_group: &str,
        cluster: &str,
        admin: bool,
    ) -> Result<(), AzureError> {
        let mut args = vec!["aks", "get-credentials"];
        if admin {
            args.push("--admin");
        }
        args.extend([
            "--resource-group",
            resource_group,
            "--name",
            cluster,
            "--overwrite-existing",
        ]);
        let out = self.run(&args)?;
        info!(output = %out.trim(), "Fetched AKS credentials");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn resource_group_exists(&self, resource_group: &str) -> Result<bool, AzureError> {
        let args = ["group", "exists", "--name", resource_group];
        let out = self.run(&args)?;
        match out.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(AzureError::UnexpectedOutput {
                command: render_command("az", &args),
                output: other.to_string(),
            }),
        }
    }

    #[instrument(skip(self))]
    pub fn managed_cluster(
        &self,
        resource_group: &str,
        cluster: &str,
    ) -> Result<ManagedCluster, AzureError> {
        let mc: ManagedCluster =
            self.json(&["aks", "show", "--resource-group", resource_group, "--name", cluster])?;
        debug!(
            provisioning_state = ?mc.provisioning_state,
            pools = mc.agent_pool_profiles.len(),
            "Fetched managed cluster"
        );
        Ok(mc)
    }

    #[instrument(skip(self))]
    pub fn virtual_network_exists(&self, vnet: &str, resource_group: &str) -> Result<bool, AzureError> {
        let names: Vec<String> = self.json(&[
            "network",
            "vnet",
            "list",
            "--resource-group",
            resource_group,
            "--query",
            "[].name",
        ])?;
        Ok(names.iter().any(|n| n == vnet))
    }

    #[instrument(skip(self))]
    pub fn subnets(&self, vnet: &str, resource_group: &str) -> Result<Vec<Subnet>, AzureError> {
        self.json(&[
            "network",
            "vnet",
            "subnet",
            "list",
            "--resource-group",
            resource_group,
            "--vnet-name",
            vnet,
        ])
    }

    pub fn subnet_exists(
        &self,
        subnet: &str,
        vnet: &str,
        resource_group: &str,
    ) -> Result<bool, AzureError> {
        Ok(self.subnets(vnet, resource_group)?.iter().any(|s| s.name == subnet))
    }

    /// Subnet name to address prefix
    ///
    /// Subnets without any prefix map to an empty string.
    pub fn virtual_network_subnets(
        &self,
        vnet: &str,
        resource_group: &str,
    ) -> Result<HashMap<String, String>, AzureError> {
        Ok(self
            .subnets(vnet, resource_group)?
            .into_iter()
            .map(|s| {
                let prefix = s.prefix().unwrap_or_default().to_string();
                (s.name, prefix)
            })
            .collect())
    }

    /// Custom and default rules of a network security group
    #[instrument(skip(self))]
    pub fn nsg_rules(&self, resource_group: &str, nsg: &str) -> Result<NsgRules, AzureError> {
        let group: NetworkSecurityGroup = self.json(&[
            "network",
            "nsg",
            "show",
            "--resource-group",
            resource_group,
            "--name",
            nsg,
        ])?;

        let custom_count = group.security_rules.len();
        let mut summarized_rules = group.security_rules;
        summarized_rules.extend(group.default_security_rules);

        debug!(
            custom = custom_count,
            total = summarized_rules.len(),
            "Fetched NSG rules"
        );
        Ok(NsgRules {
            summarized_rules,
            custom_count,
        })
    }
}
