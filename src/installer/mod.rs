// src/installer/mod.rs

//! Deployment orchestration
//!
//! [`MarketplaceInstaller::deploy`] looks the recipe up synchronously,
//! registers a [`DeploymentRecord`] in `pending` state and hands it to a
//! bounded worker pool. The worker owns the record until it reaches a
//! terminal state and runs the phases strictly in order:
//!
//! 1. `verify_signature`: a valid signature upgrades the recipe's trust
//!    level to `verified`; an invalid one is recorded but not fatal
//! 2. `security_scan`: every container image is scanned; any critical
//!    finding fails the deployment before a single resource is touched.
//!    Skipped when the request asks for it
//! 3. `trust_policy`: only with the trust policy enabled, and regardless of
//!    whether the scan ran
//! 4. `resolve_dependencies`: every required recipe dependency must exist
//!    in the catalog (version constraints are reported, not enforced)
//! 5. `deploy_<kind>`: resources in dependency order through the handler
//!    registered for their kind. A kind without a handler is skipped; the
//!    first handler failure or panic stops the deployment
//!
//! Observers are notified after every step. Failures never escape the
//! worker: any other error or panic fails the step that was running and
//! ends up as an `error` step and a `failed` status.
//!
//! Rollback is explicit and synchronous, see [`MarketplaceInstaller::rollback`].

mod record;

pub use record::{
    DeploymentRecord, DeploymentStatus, DeploymentStep, RollbackEntry, RollbackOutcome,
    StepStatus,
};

use crate::catalog::MarketplaceCatalog;
use crate::error::{Error, Result};
use crate::handlers::HandlerRegistry;
use crate::progress::{DeploymentObserver, ObserverList, panic_message};
use crate::recipe::graph::{dangling_references, find_cycles};
use crate::recipe::{ParameterValues, Recipe, ResourceKind, TrustLevel, deployment_order};
use crate::security::{
    DEFAULT_MIN_TRUST_SCORE, SecurityScanResult, SecurityScanner, SignatureVerifier,
    enforce_policy,
};
use crate::version::{RecipeVersion, VersionConstraint};
use chrono::Utc;
use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default worker pool width
pub const DEFAULT_WORKERS: usize = 4;

/// Installer tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerOptions {
    pub workers: usize,
    /// Run `enforce_policy` before resolving dependencies, even when the
    /// request skips the security scan
    pub enforce_trust_policy: bool,
    pub min_trust_score: u32,
}

impl Default for InstallerOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            enforce_trust_policy: false,
            min_trust_score: DEFAULT_MIN_TRUST_SCORE,
        }
    }
}

/// What to deploy
#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    pub name: String,
    /// None deploys the latest version
    pub version: Option<String>,
    pub parameters: ParameterValues,
    pub namespace: Option<String>,
    pub skip_security_scan: bool,
}

impl DeployRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn parameters(mut self, parameters: ParameterValues) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn skip_security_scan(mut self) -> Self {
        self.skip_security_scan = true;
        self
    }
}

/// Health of one deployed resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHealth {
    pub resource_name: String,
    pub kind: ResourceKind,
    pub healthy: bool,
}

/// A deployment and its worker-side bookkeeping
struct Tracked {
    record: RwLock<DeploymentRecord>,
    /// Insertion order, breaks `created_at` ties when listing
    seq: u64,
    cancel: AtomicBool,
    finished: Mutex<bool>,
    finished_cv: Condvar,
}

impl Tracked {
    fn snapshot(&self) -> DeploymentRecord {
        self.record.read().clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn mark_finished(&self) {
        *self.finished.lock() = true;
        self.finished_cv.notify_all();
    }
}

/// Outcome of one worker phase
enum Phase {
    Continue,
    /// Terminal state already recorded
    Stop,
}

struct Shared {
    catalog: Arc<MarketplaceCatalog>,
    scanner: Arc<SecurityScanner>,
    verifier: Arc<SignatureVerifier>,
    handlers: HandlerRegistry,
    observers: ObserverList,
    deployments: RwLock<HashMap<String, Arc<Tracked>>>,
    next_seq: AtomicU64,
    options: InstallerOptions,
}

/// Runs recipe deployments on a worker pool
pub struct MarketplaceInstaller {
    shared: Arc<Shared>,
    pool: rayon::ThreadPool,
}

impl MarketplaceInstaller {
    pub fn new(
        catalog: Arc<MarketplaceCatalog>,
        scanner: Arc<SecurityScanner>,
        verifier: Arc<SignatureVerifier>,
        handlers: HandlerRegistry,
        options: InstallerOptions,
    ) -> Result<Self> {
        let workers = options.workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("deploy-{i}"))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to start deployment workers: {e}")))?;

        info!(
            "Installer ready: {} worker(s), handlers for {:?}",
            workers,
            handlers.kinds()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                catalog,
                scanner,
                verifier,
                handlers,
                observers: ObserverList::new(),
                deployments: RwLock::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                options,
            }),
            pool,
        })
    }

    /// Receive progress notifications for every deployment
    pub fn register_observer(&self, observer: impl DeploymentObserver + 'static) {
        self.shared.observers.register(Arc::new(observer));
    }

    /// Start a deployment and return its id without waiting for it
    ///
    /// Fails synchronously, creating nothing, when the recipe is unknown.
    pub fn deploy(&self, request: DeployRequest) -> Result<String> {
        let recipe = self
            .shared
            .catalog
            .get(&request.name, request.version.as_deref())
            .ok_or_else(|| {
                Error::NotFoundError(format!(
                    "Recipe not found: {}:{}",
                    request.name,
                    request.version.as_deref().unwrap_or("latest")
                ))
            })?;

        let id = uuid::Uuid::new_v4().to_string();
        let label = recipe.label();
        let record = DeploymentRecord::new(&id, recipe, request.parameters, request.namespace);

        let tracked = Arc::new(Tracked {
            record: RwLock::new(record),
            seq: self.shared.next_seq.fetch_add(1, Ordering::SeqCst),
            cancel: AtomicBool::new(false),
            finished: Mutex::new(false),
            finished_cv: Condvar::new(),
        });
        self.shared
            .deployments
            .write()
            .insert(id.clone(), Arc::clone(&tracked));

        let shared = Arc::clone(&self.shared);
        let skip_scan = request.skip_security_scan;
        self.pool.spawn(move || shared.run_deployment(&tracked, skip_scan));

        info!("Started deployment {} for {}", id, label);
        Ok(id)
    }

    /// Snapshot of a deployment
    pub fn get_deployment(&self, id: &str) -> Option<DeploymentRecord> {
        self.shared.tracked(id).map(|t| t.snapshot())
    }

    /// Snapshots of all deployments, newest first
    pub fn list_deployments(&self, status: Option<DeploymentStatus>) -> Vec<DeploymentRecord> {
        let mut entries: Vec<(u64, DeploymentRecord)> = self
            .shared
            .deployments
            .read()
            .values()
            .map(|t| (t.seq, t.snapshot()))
            .filter(|(_, r)| status.is_none_or(|s| r.status == s))
            .collect();

        entries.sort_by(|a, b| {
            b.1.created_at
                .cmp(&a.1.created_at)
                .then_with(|| b.0.cmp(&a.0))
        });
        entries.into_iter().map(|(_, r)| r).collect()
    }

    /// Block until the deployment's worker has finished with it
    pub fn wait(&self, id: &str, timeout: Duration) -> Result<DeploymentRecord> {
        let tracked = self
            .shared
            .tracked(id)
            .ok_or_else(|| Error::NotFoundError(format!("Deployment not found: {id}")))?;

        let deadline = Instant::now() + timeout;
        let mut finished = tracked.finished.lock();
        while !*finished {
            if tracked.finished_cv.wait_until(&mut finished, deadline).timed_out() {
                return Err(Error::TimeoutError(format!(
                    "Deployment {} still running after {}s",
                    id,
                    timeout.as_secs()
                )));
            }
        }
        drop(finished);

        Ok(tracked.snapshot())
    }

    /// Ask a running deployment to stop
    ///
    /// The worker checks before every phase and every resource; a handler
    /// call already in flight is not interrupted. Returns false when the
    /// deployment had already finished.
    pub fn cancel(&self, id: &str) -> Result<bool> {
        let tracked = self
            .shared
            .tracked(id)
            .ok_or_else(|| Error::NotFoundError(format!("Deployment not found: {id}")))?;

        if tracked.record.read().status.is_terminal() {
            return Ok(false);
        }
        tracked.cancel.store(true, Ordering::SeqCst);
        info!("Cancellation requested for deployment {}", id);
        Ok(true)
    }

    /// Roll back a completed deployment
    ///
    /// Deployed resources are rolled back in reverse deployment order and
    /// each outcome is appended to the record's `rollback_log`. The final
    /// status is `rolled_back` when nothing failed, `partially_rolled_back`
    /// when some succeeded and some failed, and `rollback_failed` when no
    /// attempted rollback succeeded. Returns whether the result is
    /// `rolled_back`.
    pub fn rollback(&self, id: &str) -> Result<bool> {
        let tracked = self
            .shared
            .tracked(id)
            .ok_or_else(|| Error::NotFoundError(format!("Deployment not found: {id}")))?;

        let (recipe, namespace, deployed) = {
            let mut record = tracked.record.write();
            if record.status != DeploymentStatus::Completed || !record.rollback_available {
                return Err(Error::InvalidState(format!(
                    "Deployment {} cannot be rolled back from status {}{}",
                    id,
                    record.status,
                    if record.rollback_available {
                        ""
                    } else {
                        " (rollback unavailable)"
                    }
                )));
            }
            record.status = DeploymentStatus::RollingBack;
            record.rollback_log.clear();
            let deployed: Vec<String> = record
                .deployed_resources()
                .into_iter()
                .map(str::to_string)
                .collect();
            (record.recipe.clone(), record.namespace.clone(), deployed)
        };
        self.shared.notify(&tracked);
        info!("Rolling back deployment {} ({} resources)", id, deployed.len());

        for name in deployed.iter().rev() {
            let entry = self.shared.rollback_resource(&recipe, name, namespace.as_deref());
            match entry.outcome {
                RollbackOutcome::Failed => warn!("Rollback of {} failed: {}", name, entry.message),
                _ => debug!("Rollback of {}: {}", name, entry.outcome),
            }
            tracked.record.write().rollback_log.push(entry);
        }

        let status = {
            let mut record = tracked.record.write();
            let succeeded = record
                .rollback_log
                .iter()
                .filter(|e| e.outcome == RollbackOutcome::Success)
                .count();
            let failed = record
                .rollback_log
                .iter()
                .filter(|e| e.outcome == RollbackOutcome::Failed)
                .count();

            record.status = if failed == 0 {
                DeploymentStatus::RolledBack
            } else if succeeded > 0 {
                DeploymentStatus::PartiallyRolledBack
            } else {
                DeploymentStatus::RollbackFailed
            };
            record.rollback_available = false;
            record.completed_at = Some(Utc::now());
            record.status
        };
        self.shared.notify(&tracked);

        info!("Deployment {} rollback finished: {}", id, status);
        Ok(status == DeploymentStatus::RolledBack)
    }

    /// Ask each deployed resource's handler whether it is healthy
    pub fn check_health(&self, id: &str) -> Result<Vec<ResourceHealth>> {
        let record = self
            .get_deployment(id)
            .ok_or_else(|| Error::NotFoundError(format!("Deployment not found: {id}")))?;

        let mut report = Vec::new();
        for name in record.deployed_resources() {
            let Some(resource) = record.recipe.resource(name) else {
                continue;
            };
            let Some(handler) = self.shared.handlers.get(resource.kind) else {
                continue;
            };
            report.push(ResourceHealth {
                resource_name: name.to_string(),
                kind: resource.kind,
                healthy: handler.check_health(resource, record.namespace.as_deref()),
            });
        }
        Ok(report)
    }
}

impl Shared {
    fn tracked(&self, id: &str) -> Option<Arc<Tracked>> {
        self.deployments.read().get(id).cloned()
    }

    fn notify(&self, tracked: &Tracked) {
        if !self.observers.is_empty() {
            self.observers.notify(&tracked.snapshot());
        }
    }

    /// Worker entry point; never panics or returns an error
    fn run_deployment(&self, tracked: &Tracked, skip_scan: bool) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(tracked, skip_scan)));

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(format!("Worker panicked: {}", panic_message(payload.as_ref()))),
        };

        if let Some(message) = failure {
            let id = {
                let mut record = tracked.record.write();
                for step in record
                    .steps
                    .iter_mut()
                    .filter(|s| s.status == StepStatus::Running)
                {
                    step.fail(message.clone());
                }
                let mut step = DeploymentStep::start("error", None);
                step.fail(message.clone());
                record.steps.push(step);
                record.fail(message.clone());
                record.id.clone()
            };
            error!("Deployment {} failed: {}", id, message);
            self.notify(tracked);
        }

        tracked.mark_finished();
    }

    fn execute(&self, tracked: &Tracked, skip_scan: bool) -> Result<()> {
        let (mut recipe, parameters, namespace) = {
            let mut record = tracked.record.write();
            record.started_at = Some(Utc::now());
            record.status = DeploymentStatus::Validating;
            record.warnings = record.recipe.validate_parameters(&record.parameters);
            (
                record.recipe.clone(),
                record.parameters.clone(),
                record.namespace.clone(),
            )
        };
        for warning in &tracked.record.read().warnings {
            warn!("{}: {}", recipe.label(), warning);
        }
        self.notify(tracked);

        if let Phase::Stop = self.verify_signature(tracked, &mut recipe) {
            return Ok(());
        }
        if !skip_scan
            && let Phase::Stop = self.security_scan(tracked, &mut recipe)
        {
            return Ok(());
        }
        if self.options.enforce_trust_policy
            && let Phase::Stop = self.trust_policy(tracked, &recipe)
        {
            return Ok(());
        }
        if let Phase::Stop = self.resolve_dependencies(tracked, &recipe) {
            return Ok(());
        }
        if let Phase::Stop = self.deploy_resources(tracked, &recipe, &parameters, namespace.as_deref())
        {
            return Ok(());
        }

        let rollback_kinds = self.handlers.rollback_kinds();
        let recipe_kinds: BTreeSet<ResourceKind> = recipe.resources.iter().map(|r| r.kind).collect();
        {
            let mut record = tracked.record.write();
            record.rollback_available = !recipe_kinds.is_disjoint(&rollback_kinds);
            record.status = DeploymentStatus::Completed;
            record.completed_at = Some(Utc::now());
            info!("Deployment {} completed successfully", record.id);
        }
        self.notify(tracked);
        Ok(())
    }

    /// Record cancellation if it was requested
    fn check_cancelled(&self, tracked: &Tracked) -> Phase {
        if !tracked.is_cancelled() {
            return Phase::Continue;
        }

        {
            let mut record = tracked.record.write();
            let mut step = DeploymentStep::start("cancelled", None);
            step.status = StepStatus::Cancelled;
            step.completed_at = step.started_at;
            step.output = Some(format!("Cancelled during {}", record.status));
            record.steps.push(step);
            record.status = DeploymentStatus::Cancelled;
            record.error = Some("Deployment cancelled".to_string());
            record.completed_at = Some(Utc::now());
            info!("Deployment {} cancelled", record.id);
        }
        self.notify(tracked);
        Phase::Stop
    }

    fn push_step(&self, tracked: &Tracked, name: &str, resource: Option<&str>) {
        tracked
            .record
            .write()
            .steps
            .push(DeploymentStep::start(name, resource));
    }

    /// Apply `f` to the running step and notify observers
    fn finish_step(&self, tracked: &Tracked, f: impl FnOnce(&mut DeploymentRecord)) {
        f(&mut tracked.record.write());
        self.notify(tracked);
    }

    fn verify_signature(&self, tracked: &Tracked, recipe: &mut Recipe) -> Phase {
        if let Phase::Stop = self.check_cancelled(tracked) {
            return Phase::Stop;
        }
        self.push_step(tracked, "verify_signature", None);

        let check = self.verifier.verify_recipe(recipe);
        if check.valid {
            recipe.trust_level = TrustLevel::Verified;
        } else {
            warn!("Signature verification of {} failed: {}", recipe.label(), check.reason);
        }

        self.finish_step(tracked, |record| {
            record.recipe.trust_level = recipe.trust_level;
            if let Some(step) = record.last_step_mut() {
                step.complete(check.reason);
            }
        });
        Phase::Continue
    }

    fn security_scan(&self, tracked: &Tracked, recipe: &mut Recipe) -> Phase {
        if let Phase::Stop = self.check_cancelled(tracked) {
            return Phase::Stop;
        }
        tracked.record.write().status = DeploymentStatus::Scanning;
        self.notify(tracked);
        self.push_step(tracked, "security_scan", None);

        let images: Vec<String> = recipe
            .container_images()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut aggregate: Option<SecurityScanResult> = None;

        for image in &images {
            let result = match self.scanner.scan_container_image(image) {
                Ok(result) => result,
                Err(e) => {
                    let message = e.to_string();
                    self.finish_step(tracked, |record| {
                        if let Some(step) = record.last_step_mut() {
                            step.fail(message.clone());
                        }
                        record.fail(format!("Security scan failed: {message}"));
                    });
                    return Phase::Stop;
                }
            };

            let passed = result.passed;
            let summary = result.summary();
            let combined = match aggregate.take() {
                Some(previous) => previous.merge(result),
                None => result,
            };
            recipe.security_scan = Some(combined.clone());
            aggregate = Some(combined);

            if !passed {
                warn!("Critical vulnerabilities in {}: {}", image, summary);
                let scan = recipe.security_scan.clone();
                self.finish_step(tracked, |record| {
                    record.recipe.security_scan = scan;
                    if let Some(step) = record.last_step_mut() {
                        step.fail(format!("Critical vulnerabilities found in {image}: {summary}"));
                    }
                    record.fail("Security scan failed");
                });
                return Phase::Stop;
            }
        }

        let output = aggregate
            .as_ref()
            .map(|scan| scan.summary())
            .unwrap_or_else(|| "No images to scan".to_string());
        let scan = recipe.security_scan.clone();
        self.finish_step(tracked, |record| {
            record.recipe.security_scan = scan;
            if let Some(step) = record.last_step_mut() {
                step.complete(output);
            }
        });
        Phase::Continue
    }

    fn trust_policy(&self, tracked: &Tracked, recipe: &Recipe) -> Phase {
        if let Phase::Stop = self.check_cancelled(tracked) {
            return Phase::Stop;
        }
        self.push_step(tracked, "trust_policy", None);

        let decision = enforce_policy(recipe, self.options.min_trust_score);
        if !decision.allowed {
            warn!("Trust policy rejected {}: {}", recipe.label(), decision.reason);
            self.finish_step(tracked, |record| {
                if let Some(step) = record.last_step_mut() {
                    step.fail(decision.reason.clone());
                }
                record.fail(format!("Trust policy rejected deployment: {}", decision.reason));
            });
            return Phase::Stop;
        }

        self.finish_step(tracked, |record| {
            if let Some(step) = record.last_step_mut() {
                step.complete(format!("{} (score {})", decision.reason, decision.score));
            }
        });
        Phase::Continue
    }

    fn resolve_dependencies(&self, tracked: &Tracked, recipe: &Recipe) -> Phase {
        if let Phase::Stop = self.check_cancelled(tracked) {
            return Phase::Stop;
        }
        self.push_step(tracked, "resolve_dependencies", None);

        let mut notes = Vec::new();
        for dep in recipe.dependencies.iter().filter(|d| d.is_recipe()) {
            let Some(found) = self.catalog.get(&dep.name, None) else {
                if dep.optional {
                    notes.push(format!("{}: optional, not installed", dep.name));
                    continue;
                }
                let name = dep.name.clone();
                self.finish_step(tracked, |record| {
                    if let Some(step) = record.last_step_mut() {
                        step.fail(format!("Missing dependency: {name}"));
                    }
                    record.fail(format!("Dependency not found: {name}"));
                });
                return Phase::Stop;
            };

            notes.push(constraint_note(&dep.name, &dep.version_constraint, &found.version));
        }

        let output = if notes.is_empty() {
            "No dependencies".to_string()
        } else {
            notes.join("; ")
        };
        self.finish_step(tracked, |record| {
            if let Some(step) = record.last_step_mut() {
                step.complete(output);
            }
        });
        Phase::Continue
    }

    fn deploy_resources(
        &self,
        tracked: &Tracked,
        recipe: &Recipe,
        parameters: &ParameterValues,
        namespace: Option<&str>,
    ) -> Phase {
        if let Phase::Stop = self.check_cancelled(tracked) {
            return Phase::Stop;
        }
        tracked.record.write().status = DeploymentStatus::Running;
        self.notify(tracked);

        let plan = deployment_order(&recipe.resources);
        if !plan.is_complete() {
            let warning = format!(
                "Resources deployed without dependency order: {}{}",
                plan.unresolved.join(", "),
                ordering_detail(recipe)
            );
            warn!("{}: {}", recipe.label(), warning);
            tracked.record.write().warnings.push(warning);
        }

        let values = recipe.effective_parameters(parameters);

        for resource in plan.order {
            if let Phase::Stop = self.check_cancelled(tracked) {
                return Phase::Stop;
            }

            let step_name = format!("deploy_{}", resource.kind.as_str());
            self.push_step(tracked, &step_name, Some(&resource.name));
            self.notify(tracked);

            let Some(handler) = self.handlers.get(resource.kind) else {
                debug!("No handler for {}, skipping {}", resource.kind, resource.name);
                self.finish_step(tracked, |record| {
                    if let Some(step) = record.last_step_mut() {
                        step.skip(format!("No handler for {}", resource.kind));
                    }
                });
                continue;
            };

            info!("Deploying {} ({})", resource.name, resource.kind);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                handler.deploy(resource, &values, namespace)
            }))
            .unwrap_or_else(|payload| {
                Err(Error::HandlerError(format!(
                    "Handler panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
            match outcome {
                Ok(message) => {
                    self.finish_step(tracked, |record| {
                        if let Some(step) = record.last_step_mut() {
                            step.complete(message);
                        }
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    error!("Resource {} failed: {}", resource.name, message);
                    self.finish_step(tracked, |record| {
                        if let Some(step) = record.last_step_mut() {
                            step.fail(message.clone());
                        }
                        record.fail(format!("Resource {} failed: {}", resource.name, message));
                    });
                    return Phase::Stop;
                }
            }
        }

        Phase::Continue
    }

    fn rollback_resource(
        &self,
        recipe: &Recipe,
        name: &str,
        namespace: Option<&str>,
    ) -> RollbackEntry {
        let entry = |kind, outcome, message: String| RollbackEntry {
            resource_name: name.to_string(),
            kind,
            outcome,
            message,
        };

        let Some(resource) = recipe.resource(name) else {
            return entry(
                ResourceKind::Manifest,
                RollbackOutcome::Skipped,
                format!("Resource {name} is not part of the recipe"),
            );
        };
        let kind = resource.kind;

        let Some(handler) = self.handlers.get(kind) else {
            return entry(kind, RollbackOutcome::Skipped, format!("No handler for {kind}"));
        };
        if !handler.supports_rollback() {
            return entry(
                kind,
                RollbackOutcome::Skipped,
                format!("Handler for {kind} does not support rollback"),
            );
        }

        match panic::catch_unwind(AssertUnwindSafe(|| handler.rollback(resource, namespace))) {
            Ok(Ok(())) => entry(kind, RollbackOutcome::Success, "Rolled back".to_string()),
            Ok(Err(e)) => entry(kind, RollbackOutcome::Failed, e.to_string()),
            Err(payload) => entry(
                kind,
                RollbackOutcome::Failed,
                format!("Rollback panicked: {}", panic_message(payload.as_ref())),
            ),
        }
    }
}

/// Why ordering degraded: each cycle and each unknown dependency
fn ordering_detail(recipe: &Recipe) -> String {
    let mut reasons = Vec::new();
    for cycle in find_cycles(&recipe.resources) {
        if let Some(first) = cycle.first() {
            reasons.push(format!("cycle {} -> {}", cycle.join(" -> "), first));
        }
    }
    for (resource, missing) in dangling_references(&recipe.resources) {
        reasons.push(format!("{resource} depends on unknown {missing}"));
    }

    if reasons.is_empty() {
        String::new()
    } else {
        format!(" ({})", reasons.join("; "))
    }
}

/// Advisory check of a dependency's version constraint
fn constraint_note(name: &str, constraint: &str, latest: &str) -> String {
    match VersionConstraint::parse(constraint) {
        Ok(parsed) if parsed.satisfies(&RecipeVersion::from_str_lossy(latest)) => {
            format!("{name} {latest} satisfies {parsed}")
        }
        Ok(parsed) => format!("{name} {latest} does not satisfy {parsed}"),
        Err(_) => format!("{name} {latest} (unparsed constraint '{constraint}')"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::ResourceHandler;
    use crate::recipe::{RecipeDependency, RecipeResource};
    use crate::security::{CveRecord, ScanBackend, ScanMode};
    use serde_json::json;

    struct CleanScan;

    impl ScanBackend for CleanScan {
        fn name(&self) -> &str {
            "clean"
        }

        fn scan(&self, _mode: ScanMode, _target: &str) -> Result<Vec<CveRecord>> {
            Ok(Vec::new())
        }
    }

    struct Noop;

    impl ResourceHandler for Noop {
        fn deploy(
            &self,
            resource: &RecipeResource,
            _params: &ParameterValues,
            _namespace: Option<&str>,
        ) -> Result<String> {
            Ok(format!("{} ok", resource.name))
        }

        fn rollback(&self, _resource: &RecipeResource, _namespace: Option<&str>) -> Result<()> {
            Ok(())
        }

        fn check_health(&self, _resource: &RecipeResource, _namespace: Option<&str>) -> bool {
            true
        }
    }

    fn installer(catalog: Arc<MarketplaceCatalog>) -> MarketplaceInstaller {
        let mut handlers = HandlerRegistry::new();
        handlers.register(ResourceKind::Manifest, Noop);
        MarketplaceInstaller::new(
            catalog,
            Arc::new(SecurityScanner::new(CleanScan)),
            Arc::new(SignatureVerifier::new()),
            handlers,
            InstallerOptions::default(),
        )
        .unwrap()
    }

    fn recipe(name: &str) -> Recipe {
        let mut recipe = Recipe::new(name, "1.0.0", "debvisor", "test");
        recipe
            .resources
            .push(RecipeResource::new("cfg", ResourceKind::Manifest));
        recipe
    }

    #[test]
    fn test_unknown_recipe_creates_nothing() {
        let installer = installer(Arc::new(MarketplaceCatalog::in_memory()));
        let err = installer.deploy(DeployRequest::new("ghost")).unwrap_err();
        assert!(matches!(err, Error::NotFoundError(_)));
        assert!(installer.list_deployments(None).is_empty());
    }

    #[test]
    fn test_phases_in_order() {
        let catalog = Arc::new(MarketplaceCatalog::in_memory());
        catalog.add(recipe("app")).unwrap();
        let installer = installer(Arc::clone(&catalog));

        let id = installer.deploy(DeployRequest::new("app")).unwrap();
        let record = installer.wait(&id, Duration::from_secs(10)).unwrap();

        assert_eq!(record.status, DeploymentStatus::Completed);
        let names: Vec<&str> = record.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["verify_signature", "security_scan", "resolve_dependencies", "deploy_manifest"]
        );
        assert_eq!(record.steps[1].output.as_deref(), Some("No images to scan"));
        assert!(record.rollback_available);
        assert!(record.started_at.is_some() && record.completed_at.is_some());
    }

    #[test]
    fn test_missing_dependency_fails_before_resources() {
        let catalog = Arc::new(MarketplaceCatalog::in_memory());
        let mut r = recipe("app");
        r.dependencies.push(RecipeDependency::recipe("postgres", ">=14"));
        let mut optional = RecipeDependency::recipe("redis", "*");
        optional.optional = true;
        r.dependencies.push(optional);
        catalog.add(r).unwrap();
        let installer = installer(Arc::clone(&catalog));

        let id = installer
            .deploy(DeployRequest::new("app").skip_security_scan())
            .unwrap();
        let record = installer.wait(&id, Duration::from_secs(10)).unwrap();

        assert_eq!(record.status, DeploymentStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Dependency not found: postgres"));
        assert!(record.deployed_resources().is_empty());
        assert!(!installer.rollback(&id).unwrap_or(false));
    }

    #[test]
    fn test_dependency_constraints_are_advisory() {
        let catalog = Arc::new(MarketplaceCatalog::in_memory());
        catalog
            .add(Recipe::new("postgres", "13.2", "debvisor", "db"))
            .unwrap();
        let mut r = recipe("app");
        r.dependencies.push(RecipeDependency::recipe("postgres", ">=14"));
        catalog.add(r).unwrap();
        let installer = installer(Arc::clone(&catalog));

        let id = installer.deploy(DeployRequest::new("app")).unwrap();
        let record = installer.wait(&id, Duration::from_secs(10)).unwrap();

        assert_eq!(record.status, DeploymentStatus::Completed);
        let resolve = record.steps_named("resolve_dependencies").next().unwrap();
        assert_eq!(
            resolve.output.as_deref(),
            Some("postgres 13.2 does not satisfy >= 14")
        );
    }

    #[test]
    fn test_rollback_rejected_unless_completed() {
        let catalog = Arc::new(MarketplaceCatalog::in_memory());
        catalog.add(recipe("app")).unwrap();
        let installer = installer(Arc::clone(&catalog));

        assert!(matches!(installer.rollback("nope"), Err(Error::NotFoundError(_))));

        let id = installer.deploy(DeployRequest::new("app")).unwrap();
        installer.wait(&id, Duration::from_secs(10)).unwrap();

        assert!(installer.rollback(&id).unwrap());
        let record = installer.get_deployment(&id).unwrap();
        assert_eq!(record.status, DeploymentStatus::RolledBack);
        assert_eq!(record.rollback_log.len(), 1);
        assert_eq!(record.rollback_log[0].outcome, RollbackOutcome::Success);

        assert!(matches!(installer.rollback(&id), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_ordering_detail_names_cycles_and_unknown_targets() {
        let mut r = Recipe::new("app", "1.0.0", "debvisor", "test");
        r.resources = vec![
            RecipeResource::new("a", ResourceKind::Manifest).depends_on("b"),
            RecipeResource::new("b", ResourceKind::Manifest).depends_on("a"),
            RecipeResource::new("web", ResourceKind::Manifest).depends_on("ghost"),
        ];
        assert_eq!(
            ordering_detail(&r),
            " (cycle a -> b -> a; web depends on unknown ghost)"
        );

        assert_eq!(ordering_detail(&recipe("plain")), "");
    }

    #[test]
    fn test_constraint_note() {
        assert_eq!(constraint_note("pg", "*", "14.1"), "pg 14.1 satisfies *");
        assert_eq!(
            constraint_note("pg", ">=15", "14.1"),
            "pg 14.1 does not satisfy >= 15"
        );
    }

    #[test]
    fn test_parameter_warnings_are_recorded() {
        let catalog = Arc::new(MarketplaceCatalog::in_memory());
        let mut r = recipe("app");
        r.parameters
            .push(crate::recipe::RecipeParameter::new("secret", "secret").required());
        catalog.add(r).unwrap();
        let installer = installer(Arc::clone(&catalog));

        let id = installer
            .deploy(DeployRequest::new("app").parameter("other", json!(1)))
            .unwrap();
        let record = installer.wait(&id, Duration::from_secs(10)).unwrap();

        assert_eq!(record.status, DeploymentStatus::Completed);
        assert_eq!(record.warnings, vec!["Missing required parameter: secret"]);
    }
}
