//! `kubectl` wrapper
//!
//! Thin, typed front for the handful of `kubectl` invocations the suite
//! needs. Lookups return raw output: quote trimming is the poller's job.

use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::cli::{CliError, CommandRunner, SystemRunner};
use crate::text::strip_line_terminator;

/// `kubectl` bound to an optional kubeconfig and context
#[derive(Debug, Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    kubeconfig: Option<String>,
    context: Option<String>,
}

impl Default for Kubectl {
    fn default() -> Self {
        Self::new()
    }
}

impl Kubectl {
    /// Use the default kubeconfig and current context
    #[must_use]
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SystemRunner))
    }

    #[must_use]
    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            kubeconfig: None,
            context: None,
        }
    }

    /// Set kubeconfig path
    #[must_use]
    pub fn kubeconfig(mut self, path: impl Into<String>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Set kubectl context
    #[must_use]
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    fn run(&self, args: &[&str]) -> Result<String, CliError> {
        let mut full: Vec<&str> = Vec::with_capacity(args.len() + 4);
        if let Some(ref kubeconfig) = self.kubeconfig {
            full.extend(["--kubeconfig", kubeconfig.as_str()]);
        }
        if let Some(ref context) = self.context {
            full.extend(["--context", context.as_str()]);
        }
        full.extend_from_slice(args);

        let stdout = self.runner.stdout("kubectl", &full)?;
        Ok(strip_line_terminator(&stdout).to_string())
    }

    /// `kubectl apply -f <manifest> -n <namespace>`
    #[instrument(skip(self, manifest), fields(manifest = %manifest.as_ref().display()))]
    pub fn apply(&self, manifest: impl AsRef<Path>, namespace: &str) -> Result<(), CliError> {
        let path = manifest.as_ref().to_string_lossy();
        let path: &str = &path;
        self.run(&["apply", "-f", path, "-n", namespace])?;
        info!("Applied manifest");
        Ok(())
    }

    /// `kubectl delete -f <manifest> -n <namespace>`
    #[instrument(skip(self, manifest), fields(manifest = %manifest.as_ref().display()))]
    pub fn delete(&self, manifest: impl AsRef<Path>, namespace: &str) -> Result<(), CliError> {
        let path = manifest.as_ref().to_string_lossy();
        let path: &str = &path;
        self.run(&[
            "delete",
            "-f",
            path,
            "-n",
            namespace,
            "--ignore-not-found",
        ])?;
        info!("Deleted manifest resources");
        Ok(())
    }

    /// Names of the pods in `namespace`, one per line, no header
    pub fn pod_names(&self, namespace: &str) -> Result<String, CliError> {
        self.run(&[
            "get",
            "pods",
            "-n",
            namespace,
            "--no-headers",
            "-o",
            "custom-columns=:metadata.name",
        ])
    }

    /// IP of `pod`, rendered through a quoted Go template
    pub fn pod_ip(&self, pod: &str, namespace: &str) -> Result<String, CliError> {
        self.run(&[
            "get",
            "pod",
            pod,
            "-n",
            namespace,
            "--template",
            "'{{.status.podIP}}'",
        ])
    }

    /// First load balancer IP of each ingress in `namespace`
    pub fn ingress_ip(&self, namespace: &str) -> Result<String, CliError> {
        self.run(&[
            "get",
            "ingress",
            "-n",
            namespace,
            "--no-headers",
            "-o",
            "custom-columns=:status.loadBalancer.ingress[0].ip",
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::testing::ScriptedRunner;
    use crate::cli::CommandOutput;

    fn kubectl(runner: ScriptedRunner) -> (Kubectl, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        (Kubectl::with_runner(runner.clone()), runner)
    }

    #[test]
    fn test_pod_names_command() {
        let (k, runner) = kubectl(ScriptedRunner::new().respond(CommandOutput::success("nginx-7c5\n")));

        let out = k.pod_names("web").unwrap();

        assert_eq!(out, "nginx-7c5");
        assert_eq!(
            runner.calls()[0],
            vec![
                "kubectl",
                "get",
                "pods",
                "-n",
                "web",
                "--no-headers",
                "-o",
                "custom-columns=:metadata.name"
            ]
        );
    }

    #[test]
    fn test_pod_ip_keeps_template_quotes() {
        let (k, runner) = kubectl(ScriptedRunner::new().respond(CommandOutput::success("'10.244.0.12'")));

        let out = k.pod_ip("nginx-7c5", "web").unwrap();

        assert_eq!(out, "'10.244.0.12'");
        assert_eq!(runner.calls()[0][2..4], ["pod", "nginx-7c5"]);
        assert_eq!(runner.calls()[0].last().unwrap(), "'{{.status.podIP}}'");
    }

    #[test]
    fn test_ingress_ip_command() {
        let (k, runner) = kubectl(ScriptedRunner::new().respond(CommandOutput::success("20.1.2.3\n")));

        assert_eq!(k.ingress_ip("web").unwrap(), "20.1.2.3");
        assert!(runner.calls()[0].contains(&"custom-columns=:status.loadBalancer.ingress[0].ip".to_string()));
    }

    #[test]
    fn test_kubeconfig_and_context_come_first() {
        let runner = Arc::new(ScriptedRunner::new().respond(CommandOutput::success("")));
        let k = Kubectl::with_runner(runner.clone())
            .kubeconfig("/tmp/aks.yaml")
            .context("aks-admin");

        k.ingress_ip("web").unwrap();

        assert_eq!(
            runner.calls()[0][..5],
            ["kubectl", "--kubeconfig", "/tmp/aks.yaml", "--context", "aks-admin"]
        );
    }

    #[test]
    fn test_apply_and_delete_commands() {
        let (k, runner) = kubectl(
            ScriptedRunner::new()
                .respond(CommandOutput::success("deployment.apps/nginx created\n"))
                .respond(CommandOutput::success("deployment.apps \"nginx\" deleted\n")),
        );

        k.apply("nginx-deployment.yml", "web").unwrap();
        k.delete("nginx-deployment.yml", "web").unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0], vec!["kubectl", "apply", "-f", "nginx-deployment.yml", "-n", "web"]);
        assert_eq!(calls[1][1], "delete");
        assert!(calls[1].contains(&"--ignore-not-found".to_string()));
    }

    #[test]
    fn test_non_zero_exit_is_an_error() {
        let (k, _) = kubectl(
            ScriptedRunner::new().respond(CommandOutput::failure(1, "Error from server (NotFound)\n")),
        );

        let err = k.pod_ip("missing", "web").unwrap_err();

        match err {
            CliError::NonZeroExit { exit_code, stderr, .. } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "Error from server (NotFound)");
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }
}
