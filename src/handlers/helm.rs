// src/handlers/helm.rs

//! Helm chart handler
//!
//! Spec keys:
//! - `chart` (required): chart reference
//! - `repo`: chart repository URL
//! - `release_name`: defaults to the resource name
//! - `values`: object merged under the deployment parameters
//!
//! The merged values are written to a temporary JSON file (valid YAML) and
//! passed with `-f`. Helm itself waits up to the resource timeout; the
//! process gets an extra minute of grace before it is killed.

use super::{ResourceHandler, value_text};
use crate::command::{CommandRunner, CommandSpec};
use crate::error::{Error, Result};
use crate::recipe::{ParameterValues, RecipeResource};
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(120);
const STATUS_TIMEOUT: Duration = Duration::from_secs(30);
const PROCESS_GRACE_SECS: u64 = 60;

pub struct HelmHandler {
    binary: String,
    runner: Arc<dyn CommandRunner>,
}

impl HelmHandler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: "helm".to_string(),
            runner,
        }
    }

    /// Use a different helm executable
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn release_name(resource: &RecipeResource) -> &str {
        resource.spec_str("release_name").unwrap_or(&resource.name)
    }

    /// Chart values with parameters layered on top
    fn merged_values(resource: &RecipeResource, params: &ParameterValues) -> Map<String, Value> {
        let mut values = match resource.spec.get("values") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        for (key, value) in params {
            values.insert(key.clone(), value.clone());
        }
        values
    }

    fn run(&self, spec: CommandSpec) -> Result<crate::command::CommandOutput> {
        self.runner.run(&spec).map_err(|e| match e {
            Error::NotFoundError(_) => Error::HandlerError("Helm not installed".to_string()),
            other => other,
        })
    }
}

impl ResourceHandler for HelmHandler {
    fn deploy(
        &self,
        resource: &RecipeResource,
        params: &ParameterValues,
        namespace: Option<&str>,
    ) -> Result<String> {
        let chart = resource.spec_str("chart").ok_or_else(|| {
            Error::HandlerError(format!("Helm resource {} has no chart", resource.name))
        })?;
        let release = Self::release_name(resource);

        let values = Self::merged_values(resource, params);
        let mut values_file = tempfile::Builder::new()
            .prefix("debvisor-values-")
            .suffix(".json")
            .tempfile()?;
        values_file.write_all(&serde_json::to_vec_pretty(&Value::Object(values))?)?;
        values_file.flush()?;

        let mut spec = CommandSpec::new(
            &self.binary,
            Duration::from_secs(resource.timeout_seconds + PROCESS_GRACE_SECS),
        )
        .args(["upgrade", "--install", release, chart]);
        if let Some(repo) = resource.spec_str("repo").filter(|r| !r.is_empty()) {
            spec = spec.args(["--repo", repo]);
        }
        if let Some(ns) = namespace {
            spec = spec.args(["--namespace", ns, "--create-namespace"]);
        }
        spec = spec
            .arg("-f")
            .arg(values_file.path().to_string_lossy())
            .arg("--wait")
            .arg("--timeout")
            .arg(format!("{}s", resource.timeout_seconds));

        info!("Installing Helm release {} from chart {}", release, chart);
        let output = self.run(spec)?;

        if output.success() {
            Ok(format!("Helm release {release} deployed"))
        } else {
            Err(Error::HandlerError(output.stderr.trim().to_string()))
        }
    }

    fn rollback(&self, resource: &RecipeResource, namespace: Option<&str>) -> Result<()> {
        let release = Self::release_name(resource);
        let mut spec = CommandSpec::new(&self.binary, ROLLBACK_TIMEOUT).args(["rollback", release]);
        if let Some(ns) = namespace {
            spec = spec.args(["--namespace", ns]);
        }

        info!("Rolling back Helm release {}", release);
        let output = self.run(spec)?;
        if output.success() {
            Ok(())
        } else {
            Err(Error::HandlerError(format!(
                "helm rollback {} failed: {}",
                release,
                output.stderr.trim()
            )))
        }
    }

    fn check_health(&self, resource: &RecipeResource, namespace: Option<&str>) -> bool {
        let release = Self::release_name(resource);
        let mut spec =
            CommandSpec::new(&self.binary, STATUS_TIMEOUT).args(["status", release, "-o", "json"]);
        if let Some(ns) = namespace {
            spec = spec.args(["--namespace", ns]);
        }

        let output = match self.run(spec) {
            Ok(output) if output.success() => output,
            Ok(output) => {
                debug!("helm status {} exited with {:?}", release, output.code);
                return false;
            }
            Err(e) => {
                warn!("Health check of {} failed: {}", release, e);
                return false;
            }
        };

        serde_json::from_str::<Value>(&output.stdout)
            .ok()
            .and_then(|status| status.pointer("/info/status").map(value_text))
            .is_some_and(|s| s == "deployed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::recipe::ResourceKind;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Records commands and the values file contents, returns canned output
    struct Recorder {
        output: CommandOutput,
        calls: Mutex<Vec<CommandSpec>>,
        values: Mutex<Option<Value>>,
    }

    impl Recorder {
        fn new(output: CommandOutput) -> Arc<Self> {
            Arc::new(Self {
                output,
                calls: Mutex::new(Vec::new()),
                values: Mutex::new(None),
            })
        }
    }

    impl CommandRunner for Recorder {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            if let Some(pos) = spec.args.iter().position(|a| a == "-f") {
                let content = std::fs::read_to_string(&spec.args[pos + 1]).unwrap();
                *self.values.lock() = Some(serde_json::from_str(&content).unwrap());
            }
            self.calls.lock().push(spec.clone());
            Ok(self.output.clone())
        }
    }

    fn resource() -> RecipeResource {
        RecipeResource::new("nextcloud-helm", ResourceKind::Helm)
            .with_spec("chart", json!("nextcloud"))
            .with_spec("repo", json!("https://nextcloud.github.io/helm/"))
            .with_spec("values", json!({"replicas": 1, "secret": "default"}))
    }

    #[test]
    fn test_deploy_builds_upgrade_command() {
        let runner = Recorder::new(CommandOutput::ok(""));
        let handler = HelmHandler::new(runner.clone());

        let mut params = ParameterValues::new();
        params.insert("secret".to_string(), json!("s3cr3t"));

        let msg = handler.deploy(&resource(), &params, Some("apps")).unwrap();
        assert_eq!(msg, "Helm release nextcloud-helm deployed");

        let calls = runner.calls.lock();
        let args = &calls[0].args;
        assert_eq!(&args[..4], &["upgrade", "--install", "nextcloud-helm", "nextcloud"]);
        assert!(args.windows(2).any(|w| w == ["--repo", "https://nextcloud.github.io/helm/"]));
        assert!(args.windows(3).any(|w| w == ["--namespace", "apps", "--create-namespace"]));
        assert!(args.windows(2).any(|w| w == ["--timeout", "300s"]));
        assert_eq!(calls[0].timeout, Duration::from_secs(360));

        let values = runner.values.lock().clone().unwrap();
        assert_eq!(values, json!({"replicas": 1, "secret": "s3cr3t"}));
    }

    #[test]
    fn test_deploy_failure_carries_stderr() {
        let runner = Recorder::new(CommandOutput::failed(1, "Error: chart not found\n"));
        let handler = HelmHandler::new(runner);

        let err = handler
            .deploy(&resource(), &ParameterValues::new(), None)
            .unwrap_err();
        assert!(err.to_string().contains("chart not found"));
    }

    #[test]
    fn test_missing_chart() {
        let runner = Recorder::new(CommandOutput::ok(""));
        let handler = HelmHandler::new(runner.clone());
        let bare = RecipeResource::new("x", ResourceKind::Helm);

        assert!(handler.deploy(&bare, &ParameterValues::new(), None).is_err());
        assert!(runner.calls.lock().is_empty());
    }

    #[test]
    fn test_rollback_and_release_name() {
        let runner = Recorder::new(CommandOutput::ok(""));
        let handler = HelmHandler::new(runner.clone());
        let res = resource().with_spec("release_name", json!("cloud"));

        handler.rollback(&res, Some("apps")).unwrap();
        assert_eq!(
            runner.calls.lock()[0].args,
            vec!["rollback", "cloud", "--namespace", "apps"]
        );
    }

    #[test]
    fn test_health_reads_release_status() {
        let deployed = Recorder::new(CommandOutput::ok(r#"{"info": {"status": "deployed"}}"#));
        assert!(HelmHandler::new(deployed).check_health(&resource(), None));

        let pending =
            Recorder::new(CommandOutput::ok(r#"{"info": {"status": "pending-install"}}"#));
        assert!(!HelmHandler::new(pending).check_health(&resource(), None));

        let missing = Recorder::new(CommandOutput::failed(1, "release: not found"));
        assert!(!HelmHandler::new(missing).check_health(&resource(), None));
    }
}
