use anyhow::Context;
use serde_json::Value;

use engine::{KubeFetcher, KubernetesResource, Namespace};

/// Fetches Kubernetes resources by shelling out to kubectl. The engine
/// invokes this from its blocking fetch workers.
pub struct Kubectl;

impl KubeFetcher for Kubectl {
    fn fetch(&self, resource: &KubernetesResource, namespace: &Namespace) -> anyhow::Result<Value> {
        let mut args: Vec<&str> = vec!["get", &resource.name];
        if resource.namespaced {
            match namespace {
                Namespace::All => args.push("--all-namespaces"),
                Namespace::Named(name) => {
                    args.push("-n");
                    args.push(name);
                }
                Namespace::Default => {
                    args.push("-n");
                    args.push("default");
                }
            }
        }
        args.extend(["-o", "json"]);

        tracing::debug!(target: "kubectl", ?args, "invoking kubectl");
        let output = std::process::Command::new("kubectl")
            .args(&args)
            .output()
            .context("failed to run kubectl")?;
        if !output.status.success() {
            anyhow::bail!(
                "kubectl get {} exited with {}: {}",
                resource.name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        serde_json::from_slice(&output.stdout).context("kubectl output is not JSON")
    }
}
