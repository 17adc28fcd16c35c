// tests/catalog.rs

//! Catalog persistence, repository sync and trust reporting.

mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use common::{FakeScanner, StaticFetcher, WAIT};
use debvisor_marketplace::catalog::{CATALOG_FILE, JsonFileStore};
use debvisor_marketplace::installer::{DeployRequest, DeploymentStatus, InstallerOptions};
use debvisor_marketplace::recipe::{Recipe, RecipeResource, ResourceKind, TrustLevel};
use debvisor_marketplace::repository::RemoteRepository;
use debvisor_marketplace::security::{SecurityScanner, Severity, SignatureVerifier, sign_recipe};
use debvisor_marketplace::{HandlerRegistry, MarketplaceCatalog, MarketplaceService};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde_json::json;
use std::sync::Arc;

fn recipe(name: &str, version: &str) -> Recipe {
    let mut recipe = Recipe::new(name, version, "debvisor", format!("{name} recipe"));
    recipe.category = Some("devtools".to_string());
    recipe.tags = vec!["git".to_string()];
    recipe
}

#[test]
fn test_catalog_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let catalog = MarketplaceCatalog::open(JsonFileStore::new(dir.path())).unwrap();
        catalog.add(recipe("gitea", "1.9.9")).unwrap();
        catalog.add(recipe("gitea", "1.10.0")).unwrap();
        catalog.add(recipe("forgejo", "7.0.0")).unwrap();
        assert!(catalog.remove("forgejo", None).unwrap());
    }
    assert!(dir.path().join(CATALOG_FILE).exists());

    let catalog = MarketplaceCatalog::open(JsonFileStore::new(dir.path())).unwrap();
    assert_eq!(catalog.names(), vec!["gitea"]);
    assert_eq!(catalog.list_versions("gitea"), vec!["1.10.0", "1.9.9"]);
    assert_eq!(catalog.get("gitea", None).unwrap().version, "1.10.0");

    let stored = catalog.get("gitea", Some("1.10.0")).unwrap();
    assert_eq!(stored.checksum.as_deref(), Some(stored.compute_digest().as_str()));
}

#[test]
fn test_signatures_survive_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let key = SigningKey::generate(&mut OsRng);

    let mut signed = recipe("gitea", "1.21.0");
    sign_recipe(&mut signed, "publisher", &key);
    MarketplaceCatalog::open(JsonFileStore::new(dir.path()))
        .unwrap()
        .add(signed)
        .unwrap();

    let catalog = MarketplaceCatalog::open(JsonFileStore::new(dir.path())).unwrap();
    let loaded = catalog.get("gitea", None).unwrap();

    let verifier = SignatureVerifier::new();
    verifier
        .add_trusted_key("publisher", BASE64.encode(key.verifying_key().as_bytes()).as_bytes())
        .unwrap();
    let check = verifier.verify_recipe(&loaded);
    assert!(check.valid, "{}", check.reason);
    assert_eq!(check.key_id.as_deref(), Some("publisher"));
}

#[test]
fn test_search_and_discovery() {
    let catalog = MarketplaceCatalog::in_memory();
    catalog.add(recipe("gitea", "1.0.0")).unwrap();
    catalog.add(recipe("gitea", "2.0.0")).unwrap();
    let mut db = recipe("postgres", "16.1");
    db.category = Some("databases".to_string());
    db.tags = vec!["sql".to_string(), "git".to_string()];
    catalog.add(db).unwrap();

    let hits = catalog.search("", None, &[]);
    let labels: Vec<String> = hits.iter().map(|r| r.label()).collect();
    assert_eq!(labels, vec!["gitea:2.0.0", "postgres:16.1"]);

    assert_eq!(catalog.search("", Some("databases"), &[]).len(), 1);
    assert_eq!(catalog.search("", None, &["sql".to_string()]).len(), 1);
    assert_eq!(catalog.categories(), vec!["databases", "devtools"]);
    assert_eq!(catalog.popular_tags(1), vec![("git".to_string(), 3)]);
}

#[test]
fn test_synced_recipes_verify_with_repository_key() {
    let key = SigningKey::generate(&mut OsRng);
    let mut gitea = recipe("gitea", "1.21.0");
    sign_recipe(&mut gitea, "official", &key);
    let mut forgejo = recipe("forgejo", "7.0.0");
    sign_recipe(&mut forgejo, "someone-else", &key);

    let fetcher = StaticFetcher::default()
        .page(
            "https://recipes.example.org/index.json",
            json!({"recipes": [
                {"name": "gitea", "path": "apps/gitea.json"},
                {"name": "forgejo", "path": "apps/forgejo.json"},
                {"name": "missing", "path": "apps/missing.json"}
            ]})
            .to_string(),
        )
        .page("https://recipes.example.org/apps/gitea.json", gitea.to_json().unwrap())
        .page("https://recipes.example.org/apps/forgejo.json", forgejo.to_json().unwrap());

    let catalog = Arc::new(MarketplaceCatalog::in_memory());
    let verifier = Arc::new(SignatureVerifier::new());
    let service = MarketplaceService::with_components(
        Arc::clone(&catalog),
        Arc::new(SecurityScanner::new(FakeScanner::clean())),
        Arc::clone(&verifier),
        HandlerRegistry::new(),
        fetcher,
        InstallerOptions::default(),
    )
    .unwrap();

    service
        .syncer()
        .add_repository(
            RemoteRepository::new("official", "https://recipes.example.org")
                .trust_level(TrustLevel::Trusted)
                .public_key(BASE64.encode(key.verifying_key().as_bytes())),
        )
        .unwrap();
    assert_eq!(verifier.trusted_key_ids(), vec!["official"]);

    let results = service.syncer().sync_all();
    let report = &results["official"];
    assert_eq!(report.added, 2);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("Failed to fetch missing: "));

    let synced = catalog.get("gitea", None).unwrap();
    assert_eq!(synced.trust_level, TrustLevel::Trusted);
    assert!(verifier.verify_recipe(&synced).valid);
    let other = catalog.get("forgejo", None).unwrap();
    assert_eq!(verifier.verify_recipe(&other).reason, "No valid signature found");

    // synced recipes deploy like any other
    let id = service.installer().deploy(DeployRequest::new("gitea")).unwrap();
    let record = service.installer().wait(&id, WAIT).unwrap();
    assert_eq!(record.status, DeploymentStatus::Completed);

    assert!(service.syncer().remove_repository("official"));
    assert!(verifier.trusted_key_ids().is_empty());
}

#[test]
fn test_trust_report_includes_scan_findings() {
    let catalog = Arc::new(MarketplaceCatalog::in_memory());
    let mut app = recipe("web", "1.0.0");
    app.license = Some("MIT".to_string());
    app.homepage = Some("https://web.example.org".to_string());
    app.resources.push(
        RecipeResource::new("image", ResourceKind::ContainerImage)
            .with_spec("image", json!("web:1")),
    );
    catalog.add(app).unwrap();

    let scanner = FakeScanner::clean().with_finding("web:1", Severity::High);
    let service = MarketplaceService::with_components(
        Arc::clone(&catalog),
        Arc::new(SecurityScanner::new(scanner)),
        Arc::new(SignatureVerifier::new()),
        HandlerRegistry::new(),
        StaticFetcher::default(),
        InstallerOptions::default(),
    )
    .unwrap();

    let report = service.trust_report("web", None).unwrap();
    // unsigned (-30), one high finding (-20)
    assert_eq!(report.score, 50);
    assert!(!report.signature.valid);
    assert!(!report.policy.allowed);
    assert_eq!(report.policy.reason, "Trust score 50 below minimum 70");
    assert_eq!(service.scanner().cached_count(), 1);

    assert!(service.trust_report("nope", None).is_err());
}

#[test]
fn test_import_recipe_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gitea.json");
    std::fs::write(&path, recipe("gitea", "1.21.0").to_json().unwrap()).unwrap();
    std::fs::write(dir.path().join("bad.json"), "{\"name\": 1}").unwrap();

    let service = MarketplaceService::with_components(
        Arc::new(MarketplaceCatalog::in_memory()),
        Arc::new(SecurityScanner::new(FakeScanner::clean())),
        Arc::new(SignatureVerifier::new()),
        HandlerRegistry::new(),
        StaticFetcher::default(),
        InstallerOptions::default(),
    )
    .unwrap();

    let (imported, digest) = service.import_recipe_file(&path).unwrap();
    assert_eq!(imported.label(), "gitea:1.21.0");
    assert_eq!(digest, imported.compute_digest());
    assert!(service.catalog().contains("gitea"));

    assert!(service.import_recipe_file(&dir.path().join("bad.json")).is_err());
    assert!(service.import_recipe_file(&dir.path().join("absent.json")).is_err());
}
