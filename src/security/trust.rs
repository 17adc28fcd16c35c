// src/security/trust.rs

//! Trust scoring and governance policy

use crate::recipe::Recipe;

/// Minimum score accepted by the default policy
pub const DEFAULT_MIN_TRUST_SCORE: u32 = 70;

/// Trust score in `0..=100`
///
/// Starts at 100 and deducts 50 per critical, 20 per high, 5 per medium and
/// 1 per low finding of the attached scan, then 30 when unsigned, 10
/// without a license and 5 without a homepage.
pub fn calculate_trust_score(recipe: &Recipe) -> u32 {
    let mut penalty: u64 = 0;

    if let Some(scan) = &recipe.security_scan {
        penalty += 50 * scan.critical_count as u64;
        penalty += 20 * scan.high_count as u64;
        penalty += 5 * scan.medium_count as u64;
        penalty += scan.low_count as u64;
    }
    if recipe.signatures.is_empty() {
        penalty += 30;
    }
    if recipe.license.is_none() {
        penalty += 10;
    }
    if recipe.homepage.is_none() {
        penalty += 5;
    }

    100u64.saturating_sub(penalty) as u32
}

/// Policy decision for a recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub score: u32,
    pub reason: String,
}

/// Decide whether `recipe` may be deployed
///
/// A failed scan rejects regardless of score.
pub fn enforce_policy(recipe: &Recipe, min_score: u32) -> PolicyDecision {
    let score = calculate_trust_score(recipe);

    if let Some(scan) = &recipe.security_scan
        && !scan.passed
    {
        return PolicyDecision {
            allowed: false,
            score,
            reason: "Security scan failed (Critical vulnerabilities found)".to_string(),
        };
    }

    if score < min_score {
        return PolicyDecision {
            allowed: false,
            score,
            reason: format!("Trust score {score} below minimum {min_score}"),
        };
    }

    PolicyDecision {
        allowed: true,
        score,
        reason: "Policy check passed".to_string(),
    }
}
