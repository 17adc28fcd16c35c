// src/security/mod.rs

//! Security gating for recipes
//!
//! Three independent pieces feed the installer's security phase:
//! - [`SignatureVerifier`]: publisher signatures over the recipe digest
//! - [`SecurityScanner`]: CVE scans of the recipe's container images
//! - [`calculate_trust_score`] / [`enforce_policy`]: a 0-100 score derived
//!   from scan findings and metadata completeness, and the policy gate on it

mod scanner;
mod trust;
mod verify;

pub use scanner::{
    CveRecord, DEFAULT_CACHE_TTL_HOURS, DEFAULT_SCAN_TIMEOUT, ScanBackend, ScanMode,
    SecurityScanResult, SecurityScanner, Severity, TrivyBackend, parse_trivy_report,
};
pub use trust::{DEFAULT_MIN_TRUST_SCORE, PolicyDecision, calculate_trust_score, enforce_policy};
pub use verify::{PublicKey, SignatureCheck, SignatureVerifier, sign_recipe};
