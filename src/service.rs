// src/service.rs

//! Marketplace service wiring
//!
//! [`MarketplaceService`] owns one instance of every component and connects
//! them the way a running node uses them: the installer and the repository
//! syncer share the catalog and the signature verifier, and the installer
//! scans through the shared scanner cache.

use crate::catalog::{JsonFileStore, MarketplaceCatalog};
use crate::config::MarketplaceConfig;
use crate::error::{Error, Result};
use crate::handlers::HandlerRegistry;
use crate::installer::{InstallerOptions, MarketplaceInstaller};
use crate::recipe::Recipe;
use crate::repository::{HttpFetcher, RecipeFetcher, RepositorySyncer};
use crate::security::{
    PolicyDecision, SecurityScanner, SignatureCheck, SignatureVerifier, TrivyBackend,
    calculate_trust_score, enforce_policy,
};
use chrono::Duration as ChronoDuration;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Trust assessment of one recipe
#[derive(Debug, Clone)]
pub struct TrustReport {
    pub recipe: String,
    pub score: u32,
    pub signature: SignatureCheck,
    pub policy: PolicyDecision,
}

/// Every marketplace component, wired together
pub struct MarketplaceService {
    catalog: Arc<MarketplaceCatalog>,
    scanner: Arc<SecurityScanner>,
    verifier: Arc<SignatureVerifier>,
    installer: MarketplaceInstaller,
    syncer: RepositorySyncer,
    min_trust_score: u32,
}

impl MarketplaceService {
    /// Build the service described by `config`
    ///
    /// Opens the on-disk catalog, trusts every configured key and registers
    /// every configured repository. A bad key or repository is an error.
    pub fn from_config(config: &MarketplaceConfig) -> Result<Self> {
        let catalog = Arc::new(MarketplaceCatalog::open(JsonFileStore::new(
            &config.storage.path,
        ))?);

        let scanner = Arc::new(
            SecurityScanner::new(TrivyBackend::new(
                config.scanner.binary.clone(),
                config.scanner.timeout(),
            ))
            .with_cache_ttl(ChronoDuration::hours(config.scanner.cache_ttl_hours))
            .strict(config.scanner.strict),
        );

        let verifier = Arc::new(SignatureVerifier::new());
        for key in &config.trusted_keys {
            verifier
                .add_trusted_key(&key.key_id, key.read()?.as_bytes())
                .map_err(|e| Error::ConfigError(format!("Trusted key {}: {e}", key.key_id)))?;
        }

        let service = Self::with_components(
            catalog,
            scanner,
            verifier,
            HandlerRegistry::with_defaults(),
            HttpFetcher::new()?,
            config.installer_options(),
        )?;

        for section in &config.repositories {
            service.syncer.add_repository(section.to_repository()?)?;
        }

        info!(
            "Marketplace service ready: {} recipe(s), {} repositor(ies), {} trusted key(s)",
            service.catalog.len(),
            config.repositories.len(),
            config.trusted_keys.len()
        );
        Ok(service)
    }

    /// Build the service from explicit components
    pub fn with_components(
        catalog: Arc<MarketplaceCatalog>,
        scanner: Arc<SecurityScanner>,
        verifier: Arc<SignatureVerifier>,
        handlers: HandlerRegistry,
        fetcher: impl RecipeFetcher + 'static,
        options: InstallerOptions,
    ) -> Result<Self> {
        let min_trust_score = options.min_trust_score;
        let installer = MarketplaceInstaller::new(
            Arc::clone(&catalog),
            Arc::clone(&scanner),
            Arc::clone(&verifier),
            handlers,
            options,
        )?;
        let syncer = RepositorySyncer::new(Arc::clone(&catalog), Arc::clone(&verifier), fetcher);

        Ok(Self {
            catalog,
            scanner,
            verifier,
            installer,
            syncer,
            min_trust_score,
        })
    }

    pub fn catalog(&self) -> &MarketplaceCatalog {
        &self.catalog
    }

    pub fn scanner(&self) -> &SecurityScanner {
        &self.scanner
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    pub fn installer(&self) -> &MarketplaceInstaller {
        &self.installer
    }

    pub fn syncer(&self) -> &RepositorySyncer {
        &self.syncer
    }

    /// Read a recipe document from disk and add it to the catalog
    ///
    /// Returns the recipe and its digest.
    pub fn import_recipe_file(&self, path: &Path) -> Result<(Recipe, String)> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", path.display())))?;
        let recipe = Recipe::from_json(&content)?;
        let digest = self.catalog.add(recipe.clone())?;
        Ok((recipe, digest))
    }

    /// Signature, score and policy decision for a catalog recipe
    ///
    /// Container images are scanned first so the score reflects their
    /// findings.
    pub fn trust_report(&self, name: &str, version: Option<&str>) -> Result<TrustReport> {
        let mut recipe = self.catalog.get(name, version).ok_or_else(|| {
            Error::NotFoundError(format!(
                "Recipe not found: {}:{}",
                name,
                version.unwrap_or("latest")
            ))
        })?;

        for image in recipe.container_images().into_iter().map(str::to_string).collect::<Vec<_>>() {
            let result = self.scanner.scan_container_image(&image)?;
            recipe.security_scan = Some(match recipe.security_scan.take() {
                Some(previous) => previous.merge(result),
                None => result,
            });
        }

        let signature = self.verifier.verify_recipe(&recipe);
        Ok(TrustReport {
            recipe: recipe.label(),
            score: calculate_trust_score(&recipe),
            signature,
            policy: enforce_policy(&recipe, self.min_trust_score),
        })
    }
}
