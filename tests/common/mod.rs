// tests/common/mod.rs

//! Shared fakes and fixtures for integration tests.
//!
//! Nothing here touches the network or runs external binaries.

#![allow(dead_code)]

use debvisor_marketplace::command::{CommandOutput, CommandRunner, CommandSpec};
use debvisor_marketplace::handlers::ResourceHandler;
use debvisor_marketplace::installer::{InstallerOptions, MarketplaceInstaller};
use debvisor_marketplace::recipe::{ParameterValues, Recipe, RecipeResource, ResourceKind};
use debvisor_marketplace::repository::RecipeFetcher;
use debvisor_marketplace::security::{CveRecord, ScanBackend, ScanMode, Severity};
use debvisor_marketplace::{
    Error, HandlerRegistry, MarketplaceCatalog, Result, SecurityScanner, SignatureVerifier,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Generous upper bound for a deployment in tests
pub const WAIT: Duration = Duration::from_secs(20);

/// Command runner that succeeds for everything and remembers what it ran
#[derive(Default)]
pub struct RecordingRunner {
    pub commands: Mutex<Vec<CommandSpec>>,
}

impl RecordingRunner {
    pub fn programs(&self) -> Vec<String> {
        self.commands
            .lock()
            .iter()
            .map(|spec| format!("{} {}", spec.program, spec.args.first().cloned().unwrap_or_default()))
            .collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.commands.lock().push(spec.clone());
        Ok(CommandOutput::ok(r#"{"info": {"status": "deployed"}}"#))
    }
}

/// Scan backend with canned findings per image
#[derive(Default)]
pub struct FakeScanner {
    pub findings: HashMap<String, Vec<CveRecord>>,
    pub unavailable: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeScanner {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn with_finding(mut self, image: &str, severity: Severity) -> Self {
        self.findings
            .entry(image.to_string())
            .or_default()
            .push(cve(severity));
        self
    }
}

impl ScanBackend for FakeScanner {
    fn name(&self) -> &str {
        "fake"
    }

    fn scan(&self, _mode: ScanMode, target: &str) -> Result<Vec<CveRecord>> {
        self.calls.lock().push(target.to_string());
        if self.unavailable {
            return Err(Error::ScannerUnavailable("fake scanner offline".to_string()));
        }
        Ok(self.findings.get(target).cloned().unwrap_or_default())
    }
}

pub fn cve(severity: Severity) -> CveRecord {
    CveRecord {
        cve_id: format!("CVE-2024-{}", severity.as_str().len()),
        severity,
        package: "openssl".to_string(),
        installed_version: "3.0.1".to_string(),
        fixed_version: Some("3.0.13".to_string()),
        description: "test finding".to_string(),
        cvss_score: 9.8,
    }
}

/// What a [`ScriptedHandler`] was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Deploy(String),
    Rollback(String),
}

/// Handler whose behaviour is scripted per resource name
#[derive(Default)]
pub struct ScriptedHandler {
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub fail_deploy: HashSet<String>,
    pub fail_rollback: HashSet<String>,
    pub panic_rollback: HashSet<String>,
    pub delay: Option<Duration>,
}

impl ScriptedHandler {
    pub fn new(calls: Arc<Mutex<Vec<Call>>>) -> Self {
        Self {
            calls,
            ..Default::default()
        }
    }

    pub fn fail_deploy(mut self, name: &str) -> Self {
        self.fail_deploy.insert(name.to_string());
        self
    }

    pub fn fail_rollback(mut self, name: &str) -> Self {
        self.fail_rollback.insert(name.to_string());
        self
    }

    pub fn panic_rollback(mut self, name: &str) -> Self {
        self.panic_rollback.insert(name.to_string());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl ResourceHandler for ScriptedHandler {
    fn deploy(
        &self,
        resource: &RecipeResource,
        _params: &ParameterValues,
        _namespace: Option<&str>,
    ) -> Result<String> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.calls.lock().push(Call::Deploy(resource.name.clone()));
        if self.fail_deploy.contains(&resource.name) {
            return Err(Error::HandlerError(format!("{} refused", resource.name)));
        }
        Ok(format!("{} deployed", resource.name))
    }

    fn rollback(&self, resource: &RecipeResource, _namespace: Option<&str>) -> Result<()> {
        self.calls.lock().push(Call::Rollback(resource.name.clone()));
        if self.panic_rollback.contains(&resource.name) {
            panic!("rollback of {} blew up", resource.name);
        }
        if self.fail_rollback.contains(&resource.name) {
            return Err(Error::HandlerError(format!("{} rollback failed", resource.name)));
        }
        Ok(())
    }

    fn check_health(&self, resource: &RecipeResource, _namespace: Option<&str>) -> bool {
        !self.fail_rollback.contains(&resource.name)
    }
}

/// Fetcher serving fixed documents by URL
#[derive(Default)]
pub struct StaticFetcher {
    pub pages: HashMap<String, String>,
}

impl StaticFetcher {
    pub fn page(mut self, url: &str, body: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), body.into());
        self
    }
}

impl RecipeFetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| Error::DownloadError(format!("HTTP 404 Not Found from {url}")))
    }
}

/// Installer over an in-memory catalog
pub fn installer(
    catalog: &Arc<MarketplaceCatalog>,
    scanner: SecurityScanner,
    handlers: HandlerRegistry,
) -> MarketplaceInstaller {
    installer_with(catalog, scanner, Arc::new(SignatureVerifier::new()), handlers, InstallerOptions::default())
}

pub fn installer_with(
    catalog: &Arc<MarketplaceCatalog>,
    scanner: SecurityScanner,
    verifier: Arc<SignatureVerifier>,
    handlers: HandlerRegistry,
    options: InstallerOptions,
) -> MarketplaceInstaller {
    MarketplaceInstaller::new(
        Arc::clone(catalog),
        Arc::new(scanner),
        verifier,
        handlers,
        options,
    )
    .unwrap()
}

/// Recipe with manifest resources `names`, each depending on the previous
pub fn chained_recipe(name: &str, names: &[&str]) -> Recipe {
    let mut recipe = Recipe::new(name, "1.0.0", "debvisor", "chained test recipe");
    let mut previous: Option<&str> = None;
    for resource in names {
        let mut r = RecipeResource::new(*resource, ResourceKind::Manifest);
        if let Some(prev) = previous {
            r = r.depends_on(prev);
        }
        recipe.resources.push(r);
        previous = Some(resource);
    }
    recipe
}
