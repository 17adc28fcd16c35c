// src/catalog/mod.rs

//! Versioned recipe catalog
//!
//! Recipes are stored as `name -> {version -> Recipe}`. Looking a recipe up
//! without a version returns the highest version by segment comparison
//! (see [`crate::version::compare_versions`]), so `1.10.0` beats `1.9.9`.
//!
//! Every mutation takes the write lock, applies the change to a copy and
//! persists that copy through the configured [`CatalogStore`]. The copy only
//! replaces the in-memory catalog once the store accepted it, so a failed
//! save leaves memory and disk agreeing on the previous state.

mod store;

pub use store::{CATALOG_FILE, CatalogSnapshot, CatalogStore, JsonFileStore, MemoryStore};

use crate::error::Result;
use crate::recipe::Recipe;
use crate::version::compare_versions;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Recipe catalog backed by a durable store
pub struct MarketplaceCatalog {
    recipes: RwLock<CatalogSnapshot>,
    store: Box<dyn CatalogStore>,
}

impl MarketplaceCatalog {
    /// Open a catalog, loading whatever `store` already holds
    pub fn open(store: impl CatalogStore + 'static) -> Result<Self> {
        let recipes = store.load()?;
        info!("Catalog opened with {} recipe(s)", recipes.len());

        Ok(Self {
            recipes: RwLock::new(recipes),
            store: Box::new(store),
        })
    }

    /// An empty catalog that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            recipes: RwLock::new(CatalogSnapshot::new()),
            store: Box::new(MemoryStore::new()),
        }
    }

    /// Register a recipe, replacing any recipe with the same name and version
    ///
    /// Returns the recipe digest.
    pub fn add(&self, mut recipe: Recipe) -> Result<String> {
        let digest = recipe.compute_digest();
        recipe.checksum = Some(digest.clone());

        let mut recipes = self.recipes.write();
        let mut next = recipes.clone();
        let label = recipe.label();
        let replaced = next
            .entry(recipe.name.clone())
            .or_default()
            .insert(recipe.version.clone(), recipe)
            .is_some();
        self.store.save(&next)?;
        *recipes = next;

        if replaced {
            info!("Replaced recipe {} ({})", label, &digest[..12]);
        } else {
            info!("Added recipe {} ({})", label, &digest[..12]);
        }
        Ok(digest)
    }

    /// Look up a recipe by name, optionally pinned to a version
    ///
    /// Without a version the highest stored version is returned.
    pub fn get(&self, name: &str, version: Option<&str>) -> Option<Recipe> {
        let recipes = self.recipes.read();
        let versions = recipes.get(name)?;

        match version {
            Some(v) => versions.get(v).cloned(),
            None => latest(versions).cloned(),
        }
    }

    /// Whether any version of `name` is stored
    pub fn contains(&self, name: &str) -> bool {
        self.recipes.read().contains_key(name)
    }

    /// Stored versions of `name`, highest first
    pub fn list_versions(&self, name: &str) -> Vec<String> {
        let recipes = self.recipes.read();
        let Some(versions) = recipes.get(name) else {
            return Vec::new();
        };

        let mut list: Vec<String> = versions.keys().cloned().collect();
        list.sort_by(|a, b| compare_versions(b, a));
        list
    }

    /// Search the latest version of every recipe
    ///
    /// `query` is a case-insensitive substring of the name or description
    /// (empty matches everything). `category` must match exactly when given.
    /// When `tags` is non-empty a recipe must carry at least one of them.
    /// Results are sorted by name.
    pub fn search(&self, query: &str, category: Option<&str>, tags: &[String]) -> Vec<Recipe> {
        let query = query.to_lowercase();
        let recipes = self.recipes.read();

        let results: Vec<Recipe> = recipes
            .values()
            .filter_map(latest)
            .filter(|r| {
                query.is_empty()
                    || r.name.to_lowercase().contains(&query)
                    || r.description.to_lowercase().contains(&query)
            })
            .filter(|r| category.is_none() || r.category.as_deref() == category)
            .filter(|r| tags.is_empty() || r.tags.iter().any(|t| tags.contains(t)))
            .cloned()
            .collect();

        debug!("Search '{}' matched {} recipe(s)", query, results.len());
        results
    }

    /// Remove one version of a recipe, or every version when `version` is None
    ///
    /// Returns whether anything was removed.
    pub fn remove(&self, name: &str, version: Option<&str>) -> Result<bool> {
        let mut recipes = self.recipes.write();
        let mut next = recipes.clone();

        let removed = match version {
            None => next.remove(name).is_some(),
            Some(v) => {
                let Some(versions) = next.get_mut(name) else {
                    return Ok(false);
                };
                let removed = versions.remove(v).is_some();
                if versions.is_empty() {
                    next.remove(name);
                }
                removed
            }
        };

        if removed {
            self.store.save(&next)?;
            *recipes = next;
            info!("Removed recipe {} {}", name, version.unwrap_or("(all versions)"));
        }
        Ok(removed)
    }

    /// Distinct categories across all stored recipes, sorted
    pub fn categories(&self) -> Vec<String> {
        let recipes = self.recipes.read();
        let set: BTreeSet<String> = recipes
            .values()
            .flat_map(|versions| versions.values())
            .filter_map(|r| r.category.clone())
            .collect();
        set.into_iter().collect()
    }

    /// Most used tags with their counts, most frequent first
    ///
    /// Every stored version counts. Ties are broken by tag name.
    pub fn popular_tags(&self, limit: usize) -> Vec<(String, usize)> {
        let recipes = self.recipes.read();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for recipe in recipes.values().flat_map(|versions| versions.values()) {
            for tag in &recipe.tags {
                *counts.entry(tag.as_str()).or_insert(0) += 1;
            }
        }

        let mut tags: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(tag, count)| (tag.to_string(), count))
            .collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        tags.truncate(limit);
        tags
    }

    /// Stored recipe names, sorted
    pub fn names(&self) -> Vec<String> {
        self.recipes.read().keys().cloned().collect()
    }

    /// Number of distinct recipe names
    pub fn len(&self) -> usize {
        self.recipes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.read().is_empty()
    }
}

fn latest(versions: &BTreeMap<String, Recipe>) -> Option<&Recipe> {
    versions
        .iter()
        .max_by(|a, b| compare_versions(a.0, b.0))
        .map(|(_, recipe)| recipe)
}
