// src/repository/sync.rs

//! Repository synchronization
//!
//! A repository publishes `index.json` at its base URL:
//!
//! ```json
//! {"recipes": [{"name": "gitea", "path": "apps/gitea.json"}]}
//! ```
//!
//! Each entry's document is fetched, decoded, stamped with the repository's
//! trust level and added to the catalog. A bad entry is reported and the
//! remaining entries are still synced.

use super::client::{RecipeFetcher, join_url};
use crate::catalog::MarketplaceCatalog;
use crate::error::{Error, Result};
use crate::recipe::{Recipe, TrustLevel};
use crate::security::SignatureVerifier;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Default interval between automatic syncs
pub const DEFAULT_SYNC_INTERVAL_HOURS: u64 = 24;

/// A remote recipe repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepository {
    pub name: String,
    pub url: String,
    pub enabled: bool,
    /// Stamped on every recipe synced from this repository
    pub trust_level: TrustLevel,
    pub sync_interval_hours: u64,
    pub last_sync: Option<DateTime<Utc>>,
    /// Key material (PEM or base64) trusted under the repository's name
    pub public_key: Option<String>,
}

impl RemoteRepository {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
            trust_level: TrustLevel::Community,
            sync_interval_hours: DEFAULT_SYNC_INTERVAL_HOURS,
            last_sync: None,
            public_key: None,
        }
    }

    pub fn trust_level(mut self, level: TrustLevel) -> Self {
        self.trust_level = level;
        self
    }

    pub fn public_key(mut self, material: impl Into<String>) -> Self {
        self.public_key = Some(material.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Whether the repository is due for a sync
pub fn needs_sync(repo: &RemoteRepository) -> bool {
    needs_sync_at(repo, Utc::now())
}

fn needs_sync_at(repo: &RemoteRepository, now: DateTime<Utc>) -> bool {
    match repo.last_sync {
        None => true,
        Some(last) => (now - last).num_hours().max(0) as u64 >= repo.sync_interval_hours,
    }
}

/// Outcome of syncing one repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn failed(message: String) -> Self {
        Self {
            added: 0,
            errors: vec![message],
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RecipeIndex {
    #[serde(default)]
    recipes: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

/// Pulls recipes from remote repositories into the catalog
pub struct RepositorySyncer {
    catalog: Arc<MarketplaceCatalog>,
    verifier: Arc<SignatureVerifier>,
    fetcher: Box<dyn RecipeFetcher>,
    repositories: RwLock<BTreeMap<String, RemoteRepository>>,
}

impl RepositorySyncer {
    pub fn new(
        catalog: Arc<MarketplaceCatalog>,
        verifier: Arc<SignatureVerifier>,
        fetcher: impl RecipeFetcher + 'static,
    ) -> Self {
        Self {
            catalog,
            verifier,
            fetcher: Box::new(fetcher),
            repositories: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a repository, replacing one with the same name
    ///
    /// A configured public key is trusted under the repository's name; a key
    /// that cannot be parsed rejects the repository.
    pub fn add_repository(&self, repo: RemoteRepository) -> Result<()> {
        if let Some(material) = &repo.public_key {
            self.verifier
                .add_trusted_key(&repo.name, material.as_bytes())
                .map_err(|e| {
                    Error::SignatureError(format!("Repository {} public key: {}", repo.name, e))
                })?;
        }

        info!("Added repository: {} ({})", repo.name, repo.url);
        self.repositories.write().insert(repo.name.clone(), repo);
        Ok(())
    }

    /// Forget a repository and its key; returns whether it existed
    pub fn remove_repository(&self, name: &str) -> bool {
        let Some(repo) = self.repositories.write().remove(name) else {
            return false;
        };
        if repo.public_key.is_some() {
            self.verifier.remove_trusted_key(name);
        }
        info!("Removed repository: {}", name);
        true
    }

    /// Registered repositories, sorted by name
    pub fn repositories(&self) -> Vec<RemoteRepository> {
        self.repositories.read().values().cloned().collect()
    }

    pub fn repository(&self, name: &str) -> Option<RemoteRepository> {
        self.repositories.read().get(name).cloned()
    }

    /// Sync one repository
    ///
    /// Never fails as a whole: an unknown repository or an unreadable index
    /// is reported as the only error.
    pub fn sync_repository(&self, name: &str) -> SyncReport {
        let Some(repo) = self.repository(name) else {
            return SyncReport::failed(format!("Repository not found: {name}"));
        };

        let index_url = join_url(&repo.url, "index.json");
        info!("Syncing repository {} from {}", repo.name, index_url);

        let index: RecipeIndex = match self
            .fetcher
            .fetch(&index_url)
            .and_then(|body| serde_json::from_str(&body).map_err(Error::from))
        {
            Ok(index) => index,
            Err(e) => {
                error!("Repository sync failed: {}", e);
                return SyncReport::failed(e.to_string());
            }
        };

        let mut report = SyncReport::default();
        for entry in &index.recipes {
            let label = entry.name.as_deref().unwrap_or("unknown");
            match self.import_entry(&repo, entry) {
                Ok(digest) => {
                    debug!("Imported {} from {} ({})", label, repo.name, digest);
                    report.added += 1;
                }
                Err(e) => {
                    warn!("Failed to fetch {} from {}: {}", label, repo.name, e);
                    report.errors.push(format!("Failed to fetch {label}: {e}"));
                }
            }
        }

        if let Some(stored) = self.repositories.write().get_mut(name) {
            stored.last_sync = Some(Utc::now());
        }

        info!(
            "Synced {} recipes from {} ({} errors)",
            report.added,
            name,
            report.errors.len()
        );
        report
    }

    /// Sync every enabled repository
    pub fn sync_all(&self) -> BTreeMap<String, SyncReport> {
        self.repositories()
            .into_iter()
            .filter(|repo| repo.enabled)
            .map(|repo| {
                let report = self.sync_repository(&repo.name);
                (repo.name, report)
            })
            .collect()
    }

    /// Sync enabled repositories whose interval has elapsed
    pub fn sync_due(&self) -> BTreeMap<String, SyncReport> {
        self.repositories()
            .into_iter()
            .filter(|repo| repo.enabled && needs_sync(repo))
            .map(|repo| {
                let report = self.sync_repository(&repo.name);
                (repo.name, report)
            })
            .collect()
    }

    fn import_entry(&self, repo: &RemoteRepository, entry: &IndexEntry) -> Result<String> {
        let path = entry
            .path
            .as_deref()
            .ok_or_else(|| Error::ParseError("index entry has no path".to_string()))?;

        let body = self.fetcher.fetch(&join_url(&repo.url, path))?;
        let mut recipe = Recipe::from_json(&body)?;
        recipe.trust_level = repo.trust_level;
        self.catalog.add(recipe)
    }
}
