// src/handlers/manifest.rs

//! Raw Kubernetes manifest handler
//!
//! `spec.manifests` is a list of manifest objects. Each is serialised to
//! JSON, `${name}` placeholders are replaced textually with parameter values
//! and the result is piped to `kubectl apply -f -`. The first failing
//! manifest stops the resource.
//!
//! Applied objects are not tracked, so this handler cannot roll back.

use super::{ResourceHandler, value_text};
use crate::command::{CommandRunner, CommandSpec};
use crate::error::{Error, Result};
use crate::recipe::{ParameterValues, RecipeResource};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct ManifestHandler {
    binary: String,
    runner: Arc<dyn CommandRunner>,
}

impl ManifestHandler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: "kubectl".to_string(),
            runner,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

/// Replace every `${key}` in `text` with the value of parameter `key`
pub fn substitute_parameters(text: &str, params: &ParameterValues) -> String {
    let mut out = text.to_string();
    for (key, value) in params {
        out = out.replace(&format!("${{{key}}}"), &value_text(value));
    }
    out
}

impl ResourceHandler for ManifestHandler {
    fn deploy(
        &self,
        resource: &RecipeResource,
        params: &ParameterValues,
        namespace: Option<&str>,
    ) -> Result<String> {
        let manifests: &[Value] = match resource.spec.get("manifests") {
            Some(Value::Array(items)) => items.as_slice(),
            None => &[],
            Some(_) => {
                return Err(Error::HandlerError(format!(
                    "Manifest resource {}: manifests must be a list",
                    resource.name
                )));
            }
        };

        for (idx, manifest) in manifests.iter().enumerate() {
            let rendered = substitute_parameters(&serde_json::to_string(manifest)?, params);

            let mut spec = CommandSpec::new(
                &self.binary,
                Duration::from_secs(resource.timeout_seconds),
            )
            .args(["apply", "-f", "-"])
            .stdin(rendered);
            if let Some(ns) = namespace {
                spec = spec.args(["--namespace", ns]);
            }

            debug!("Applying manifest {} of {}", idx + 1, resource.name);
            let output = self.runner.run(&spec).map_err(|e| match e {
                Error::NotFoundError(_) => Error::HandlerError("kubectl not installed".to_string()),
                other => other,
            })?;
            if !output.success() {
                return Err(Error::HandlerError(output.stderr.trim().to_string()));
            }
        }

        info!("Applied {} manifest(s) for {}", manifests.len(), resource.name);
        Ok("Manifests applied".to_string())
    }

    fn rollback(&self, resource: &RecipeResource, _namespace: Option<&str>) -> Result<()> {
        Err(Error::HandlerError(format!(
            "Rollback of manifest resource {} is not supported",
            resource.name
        )))
    }

    fn check_health(&self, _resource: &RecipeResource, _namespace: Option<&str>) -> bool {
        true
    }

    fn supports_rollback(&self) -> bool {
        false
    }
}
