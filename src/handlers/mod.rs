// src/handlers/mod.rs

//! Resource handlers
//!
//! Each deployable resource kind is rolled out by a [`ResourceHandler`].
//! Handlers know nothing about deployments or their state machine: they
//! receive one resource, the effective parameter values and an optional
//! namespace, and report success or failure. The installer looks them up in
//! a [`HandlerRegistry`] keyed by [`ResourceKind`]. Kinds without a handler
//! are skipped at deploy time.
//!
//! Built-in handlers:
//! - [`HelmHandler`]: `helm upgrade --install` with a generated values file
//! - [`ManifestHandler`]: `kubectl apply` with `${param}` substitution
//! - [`VmImageHandler`]: VM provisioning request

mod helm;
mod manifest;
mod vm;

pub use helm::HelmHandler;
pub use manifest::{ManifestHandler, substitute_parameters};
pub use vm::VmImageHandler;

use crate::command::{CommandRunner, SystemCommandRunner};
use crate::error::Result;
use crate::recipe::{ParameterValues, RecipeResource, ResourceKind};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Deploys, rolls back and health-checks one kind of resource
pub trait ResourceHandler: Send + Sync {
    /// Roll out `resource`; returns a human-readable success message
    ///
    /// Implementations honour `resource.timeout_seconds` for their external
    /// calls and report failures as [`crate::Error::HandlerError`] or
    /// [`crate::Error::TimeoutError`].
    fn deploy(
        &self,
        resource: &RecipeResource,
        params: &ParameterValues,
        namespace: Option<&str>,
    ) -> Result<String>;

    /// Undo a previous deploy of `resource`
    fn rollback(&self, resource: &RecipeResource, namespace: Option<&str>) -> Result<()>;

    /// Whether the deployed resource is healthy
    fn check_health(&self, resource: &RecipeResource, namespace: Option<&str>) -> bool;

    /// Whether [`ResourceHandler::rollback`] can undo a deploy
    fn supports_rollback(&self) -> bool {
        true
    }
}

/// Handlers by resource kind
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ResourceKind, Arc<dyn ResourceHandler>>,
}

impl HandlerRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in handlers running commands on the local system
    pub fn with_defaults() -> Self {
        Self::with_runner(Arc::new(SystemCommandRunner))
    }

    /// Built-in handlers running commands through `runner`
    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        let mut registry = Self::new();
        registry.register(ResourceKind::Helm, HelmHandler::new(Arc::clone(&runner)));
        registry.register(ResourceKind::Manifest, ManifestHandler::new(runner));
        registry.register(ResourceKind::VmImage, VmImageHandler::new());
        registry
    }

    /// Install `handler` for `kind`, replacing any existing one
    pub fn register(&mut self, kind: ResourceKind, handler: impl ResourceHandler + 'static) {
        self.handlers.insert(kind, Arc::new(handler));
    }

    /// Install a shared handler for `kind`
    pub fn register_shared(&mut self, kind: ResourceKind, handler: Arc<dyn ResourceHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: ResourceKind) -> Option<Arc<dyn ResourceHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Kinds with a handler, sorted
    pub fn kinds(&self) -> Vec<ResourceKind> {
        let set: BTreeSet<ResourceKind> = self.handlers.keys().copied().collect();
        set.into_iter().collect()
    }

    /// Kinds whose handler can roll back
    pub fn rollback_kinds(&self) -> BTreeSet<ResourceKind> {
        self.handlers
            .iter()
            .filter(|(_, h)| h.supports_rollback())
            .map(|(kind, _)| *kind)
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Render a parameter value as plain text
///
/// Strings are used verbatim, everything else in its JSON form.
pub(crate) fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
