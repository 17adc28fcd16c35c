// src/lib.rs

//! DebVisor Marketplace
//!
//! Deployment orchestration for marketplace recipes: a versioned catalog of
//! signed, dependency-aware recipes and an installer that gates them on
//! signature, CVE scan and trust policy before rolling their resources out
//! through pluggable handlers.
//!
//! # Architecture
//!
//! - Catalog: `name -> version -> Recipe`, persisted as whole snapshots
//! - Security: Ed25519/RSA signatures over a content digest, Trivy scans,
//!   a 0-100 trust score
//! - Installer: bounded worker pool, phases verify -> scan -> resolve ->
//!   deploy, explicit reverse-order rollback
//! - Handlers: Helm, raw manifests and VM images behind one trait
//! - Repositories: `index.json` based remote catalogs

pub mod catalog;
pub mod command;
pub mod config;
mod error;
pub mod handlers;
pub mod installer;
pub mod progress;
pub mod recipe;
pub mod repository;
pub mod security;
pub mod service;
pub mod version;

pub use catalog::{CatalogStore, JsonFileStore, MarketplaceCatalog, MemoryStore};
pub use config::MarketplaceConfig;
pub use error::{Error, Result};
pub use handlers::{HandlerRegistry, ResourceHandler};
pub use installer::{
    DeployRequest, DeploymentRecord, DeploymentStatus, DeploymentStep, InstallerOptions,
    MarketplaceInstaller, StepStatus,
};
pub use progress::{ChannelObserver, DeploymentObserver, LogObserver};
pub use recipe::{ParameterValues, Recipe, RecipeResource, ResourceKind, TrustLevel};
pub use repository::{RecipeFetcher, RemoteRepository, RepositorySyncer, SyncReport};
pub use security::{SecurityScanResult, SecurityScanner, SignatureVerifier};
pub use service::MarketplaceService;
pub use version::{RecipeVersion, VersionConstraint, compare_versions};
