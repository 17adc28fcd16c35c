// src/security/scanner.rs

//! CVE scanning of container images and filesystems
//!
//! Scanning is delegated to a [`ScanBackend`]; the default backend runs
//! Trivy. Image results are cached per image for a configurable TTL
//! (24 hours by default) so installing the same recipe repeatedly does not
//! rescan. Filesystem scans are never cached.
//!
//! When the backend reports itself unavailable (binary missing, non-zero
//! exit, unparseable output) the scanner either fails (strict mode) or
//! returns a deterministic mock result and logs a warning.

use crate::command::{CommandRunner, CommandSpec, SystemCommandRunner};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default cache lifetime for image scans
pub const DEFAULT_CACHE_TTL_HOURS: i64 = 24;

/// Default scanner timeout
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(300);

/// Descriptions longer than this are truncated
const MAX_DESCRIPTION_LEN: usize = 200;

/// Vulnerability severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Parse a scanner severity label; unknown labels map to `Info`
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_uppercase().as_str() {
            "CRITICAL" => Self::Critical,
            "HIGH" => Self::High,
            "MEDIUM" => Self::Medium,
            "LOW" => Self::Low,
            _ => Self::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One vulnerability finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CveRecord {
    pub cve_id: String,
    pub severity: Severity,
    pub package: String,
    pub installed_version: String,
    pub fixed_version: Option<String>,
    pub description: String,
    pub cvss_score: f64,
}

/// Outcome of one scan
///
/// `passed` is false iff at least one critical finding is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityScanResult {
    /// Image or path that was scanned
    pub target: String,
    pub scanner: String,
    pub scanned_at: DateTime<Utc>,
    pub passed: bool,
    pub vulnerabilities: Vec<CveRecord>,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    /// Produced by the fallback path, not by a real scanner run
    #[serde(default)]
    pub mock: bool,
}

impl SecurityScanResult {
    /// Build a result from findings, deriving counts and the pass flag
    pub fn from_findings(scanner: impl Into<String>, vulnerabilities: Vec<CveRecord>) -> Self {
        let mut result = Self {
            target: String::new(),
            scanner: scanner.into(),
            scanned_at: Utc::now(),
            passed: true,
            vulnerabilities,
            critical_count: 0,
            high_count: 0,
            medium_count: 0,
            low_count: 0,
            mock: false,
        };
        result.recount();
        result
    }

    /// Set the scanned target
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    fn recount(&mut self) {
        let count = |sev: Severity| {
            self.vulnerabilities
                .iter()
                .filter(|v| v.severity == sev)
                .count()
        };
        self.critical_count = count(Severity::Critical);
        self.high_count = count(Severity::High);
        self.medium_count = count(Severity::Medium);
        self.low_count = count(Severity::Low);
        self.passed = self.critical_count == 0;
    }

    /// "Critical: n, High: n, Medium: n, Low: n"
    pub fn summary(&self) -> String {
        format!(
            "Critical: {}, High: {}, Medium: {}, Low: {}",
            self.critical_count, self.high_count, self.medium_count, self.low_count
        )
    }

    /// Combine two results into one covering both targets
    pub fn merge(mut self, other: SecurityScanResult) -> Self {
        if self.target.is_empty() {
            self.target = other.target;
        } else if !other.target.is_empty() {
            self.target = format!("{}, {}", self.target, other.target);
        }
        self.scanned_at = self.scanned_at.min(other.scanned_at);
        self.mock |= other.mock;
        self.vulnerabilities.extend(other.vulnerabilities);
        self.recount();
        self
    }
}

/// What a backend is asked to scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Image,
    Filesystem,
}

impl ScanMode {
    /// Subcommand understood by the scanner CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Filesystem => "fs",
        }
    }
}

/// A vulnerability scanner implementation
///
/// Implementations return [`Error::ScannerUnavailable`] when they cannot
/// produce a trustworthy result.
pub trait ScanBackend: Send + Sync {
    /// Scanner name recorded on results
    fn name(&self) -> &str;

    fn scan(&self, mode: ScanMode, target: &str) -> Result<Vec<CveRecord>>;
}

/// Trivy command-line backend
pub struct TrivyBackend {
    binary: String,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl TrivyBackend {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self::with_runner(binary, timeout, Arc::new(SystemCommandRunner))
    }

    pub fn with_runner(
        binary: impl Into<String>,
        timeout: Duration,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            runner,
        }
    }
}

impl ScanBackend for TrivyBackend {
    fn name(&self) -> &str {
        &self.binary
    }

    fn scan(&self, mode: ScanMode, target: &str) -> Result<Vec<CveRecord>> {
        let spec = CommandSpec::new(&self.binary, self.timeout).args([
            mode.as_str(),
            "--format",
            "json",
            "--severity",
            "CRITICAL,HIGH,MEDIUM,LOW",
            target,
        ]);

        let output = self.runner.run(&spec).map_err(|e| {
            Error::ScannerUnavailable(format!("{} could not be run: {}", self.binary, e))
        })?;

        if !output.success() {
            return Err(Error::ScannerUnavailable(format!(
                "{} exited with {:?}: {}",
                self.binary,
                output.code,
                output.stderr.trim()
            )));
        }

        parse_trivy_report(&output.stdout)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyReport {
    #[serde(default)]
    results: Vec<TrivyTarget>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyTarget {
    #[serde(default)]
    vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID", default)]
    vulnerability_id: Option<String>,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    pkg_name: String,
    #[serde(default)]
    installed_version: String,
    #[serde(default)]
    fixed_version: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "CVSS", default)]
    cvss: HashMap<String, TrivyCvss>,
}

#[derive(Deserialize)]
struct TrivyCvss {
    #[serde(rename = "V3Score", default)]
    v3_score: Option<f64>,
}

/// Parse Trivy's JSON report into findings
pub fn parse_trivy_report(stdout: &str) -> Result<Vec<CveRecord>> {
    if stdout.trim().is_empty() {
        return Err(Error::ScannerUnavailable("scanner produced no output".to_string()));
    }

    let report: TrivyReport = serde_json::from_str(stdout)
        .map_err(|e| Error::ScannerUnavailable(format!("malformed scanner output: {e}")))?;

    let records = report
        .results
        .into_iter()
        .flat_map(|t| t.vulnerabilities.unwrap_or_default())
        .map(|v| {
            let description = v.title.or(v.description).unwrap_or_default();
            CveRecord {
                cve_id: v.vulnerability_id.unwrap_or_else(|| "UNKNOWN".to_string()),
                severity: Severity::from_label(&v.severity),
                package: v.pkg_name,
                installed_version: v.installed_version,
                fixed_version: v.fixed_version.filter(|f| !f.is_empty()),
                description: description.chars().take(MAX_DESCRIPTION_LEN).collect(),
                cvss_score: v.cvss.get("nvd").and_then(|c| c.v3_score).unwrap_or(0.0),
            }
        })
        .collect();

    Ok(records)
}

/// Deterministic result used when no scanner is available
fn mock_findings() -> Vec<CveRecord> {
    vec![CveRecord {
        cve_id: "CVE-2024-0001".to_string(),
        severity: Severity::Medium,
        package: "libssl".to_string(),
        installed_version: "1.1.1".to_string(),
        fixed_version: Some("1.1.1t".to_string()),
        description: "[MOCK] Example vulnerability for testing".to_string(),
        cvss_score: 5.5,
    }]
}

/// Caching front end over a scan backend
pub struct SecurityScanner {
    backend: Box<dyn ScanBackend>,
    cache: Mutex<HashMap<String, SecurityScanResult>>,
    cache_ttl: ChronoDuration,
    strict: bool,
}

impl SecurityScanner {
    /// Scanner over `backend` with the default TTL, non-strict
    pub fn new(backend: impl ScanBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            cache: Mutex::new(HashMap::new()),
            cache_ttl: ChronoDuration::hours(DEFAULT_CACHE_TTL_HOURS),
            strict: false,
        }
    }

    /// Trivy on the local system
    pub fn trivy() -> Self {
        Self::new(TrivyBackend::new("trivy", DEFAULT_SCAN_TIMEOUT))
    }

    pub fn with_cache_ttl(mut self, ttl: ChronoDuration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Fail instead of falling back to a mock result
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Scan a container image, serving fresh cached results
    ///
    /// Expired entries are dropped on every lookup.
    pub fn scan_container_image(&self, image: &str) -> Result<SecurityScanResult> {
        let key = format!("container:{image}");

        {
            let mut cache = self.cache.lock();
            let now = Utc::now();
            let before = cache.len();
            cache.retain(|_, entry| now - entry.scanned_at < self.cache_ttl);
            if cache.len() < before {
                debug!("Evicted {} expired scan result(s)", before - cache.len());
            }
            if let Some(cached) = cache.get(&key) {
                debug!("Using cached scan for {}", image);
                return Ok(cached.clone());
            }
        }

        let result = self.run(ScanMode::Image, image)?;
        self.cache.lock().insert(key, result.clone());
        Ok(result)
    }

    /// Scan a directory tree; never cached
    pub fn scan_filesystem(&self, path: &str) -> Result<SecurityScanResult> {
        self.run(ScanMode::Filesystem, path)
    }

    /// Drop all cached results
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Number of cached results
    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    fn run(&self, mode: ScanMode, target: &str) -> Result<SecurityScanResult> {
        info!("Scanning {} ({})", target, mode.as_str());

        match self.backend.scan(mode, target) {
            Ok(findings) => {
                let result =
                    SecurityScanResult::from_findings(self.backend.name(), findings).with_target(target);
                info!("Scan of {} finished: {}", target, result.summary());
                Ok(result)
            }
            Err(Error::ScannerUnavailable(reason)) if !self.strict => {
                warn!(
                    "Scanner unavailable for {} ({}), using mock scan result",
                    target, reason
                );
                let mut result =
                    SecurityScanResult::from_findings(self.backend.name(), mock_findings())
                        .with_target(target);
                result.mock = true;
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }
}
