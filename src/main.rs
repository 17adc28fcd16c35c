// src/main.rs

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use debvisor_marketplace::installer::DeployRequest;
use debvisor_marketplace::progress::LogObserver;
use debvisor_marketplace::{MarketplaceConfig, MarketplaceService, Recipe, SyncReport};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "debvisor-market")]
#[command(author, version, about = "DebVisor marketplace: recipe catalog, security gating and deployment", long_about = None)]
struct Cli {
    /// Configuration file (default: /etc/debvisor/marketplace.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the catalog (latest version of each match)
    Search {
        /// Case-insensitive text matched against name and description
        #[arg(default_value = "")]
        query: String,
        #[arg(long)]
        category: Option<String>,
        /// Required tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Show one recipe as JSON
    Show {
        name: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// List the stored versions of a recipe, newest first
    Versions { name: String },
    /// Add a recipe document to the catalog
    Add {
        /// Path to the recipe JSON file
        path: PathBuf,
    },
    /// Remove a recipe, or one version of it
    Remove {
        name: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// List categories and popular tags
    Categories {
        /// Number of tags to show
        #[arg(long, default_value_t = 10)]
        tags: usize,
    },
    /// Scan a container image (or a directory with --fs)
    Scan {
        target: String,
        #[arg(long)]
        fs: bool,
    },
    /// Show signature, trust score and policy decision for a recipe
    Trust {
        name: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// Sync one configured repository, or all enabled ones
    RepoSync { name: Option<String> },
    /// Deploy a recipe and wait for the outcome
    Deploy {
        name: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(short, long)]
        namespace: Option<String>,
        /// Parameter as key=value; JSON values are decoded (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
        #[arg(long)]
        skip_scan: bool,
        /// Seconds to wait for the deployment to finish
        #[arg(long, default_value_t = 3600)]
        timeout: u64,
    },
}

/// Split `key=value`, decoding the value as JSON when it parses
fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("Invalid parameter '{raw}', expected KEY=VALUE");
    };
    if key.is_empty() {
        bail!("Invalid parameter '{raw}', empty key");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn print_recipe_line(recipe: &Recipe) {
    println!(
        "{:<24} {:<12} {:<10} {}",
        recipe.name,
        recipe.version,
        recipe.trust_level.as_str(),
        recipe.description
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = MarketplaceConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let service =
        MarketplaceService::from_config(&config).context("Failed to start marketplace service")?;

    match cli.command {
        Commands::Search {
            query,
            category,
            tags,
        } => {
            let results = service.catalog().search(&query, category.as_deref(), &tags);
            if results.is_empty() {
                println!("No recipes found");
            }
            for recipe in &results {
                print_recipe_line(recipe);
            }
            Ok(())
        }
        Commands::Show { name, version } => {
            let recipe = service
                .catalog()
                .get(&name, version.as_deref())
                .with_context(|| format!("Recipe not found: {name}"))?;
            println!("{}", recipe.to_json()?);
            Ok(())
        }
        Commands::Versions { name } => {
            let versions = service.catalog().list_versions(&name);
            if versions.is_empty() {
                bail!("Recipe not found: {name}");
            }
            for version in versions {
                println!("{version}");
            }
            Ok(())
        }
        Commands::Add { path } => {
            let (recipe, digest) = service
                .import_recipe_file(&path)
                .with_context(|| format!("Failed to add {}", path.display()))?;
            println!("Added {} ({})", recipe.label(), digest);
            Ok(())
        }
        Commands::Remove { name, version } => {
            if service.catalog().remove(&name, version.as_deref())? {
                println!("Removed {name}");
                Ok(())
            } else {
                bail!("Recipe not found: {name}");
            }
        }
        Commands::Categories { tags } => {
            println!("Categories:");
            for category in service.catalog().categories() {
                println!("  {category}");
            }
            println!("Popular tags:");
            for (tag, count) in service.catalog().popular_tags(tags) {
                println!("  {tag:<20} {count}");
            }
            Ok(())
        }
        Commands::Scan { target, fs } => {
            let result = if fs {
                service.scanner().scan_filesystem(&target)?
            } else {
                service.scanner().scan_container_image(&target)?
            };
            println!(
                "{} {} ({}){}",
                target,
                if result.passed { "PASSED" } else { "FAILED" },
                result.summary(),
                if result.mock { " [mock]" } else { "" }
            );
            for vuln in &result.vulnerabilities {
                println!(
                    "  {:<16} {:<8} {} {}",
                    vuln.cve_id,
                    vuln.severity.as_str(),
                    vuln.package,
                    vuln.installed_version
                );
            }
            Ok(())
        }
        Commands::Trust { name, version } => {
            let report = service.trust_report(&name, version.as_deref())?;
            println!("Recipe:    {}", report.recipe);
            println!("Signature: {}", report.signature.reason);
            println!("Score:     {}", report.score);
            println!(
                "Policy:    {} ({})",
                if report.policy.allowed { "allowed" } else { "denied" },
                report.policy.reason
            );
            Ok(())
        }
        Commands::RepoSync { name } => {
            let reports: BTreeMap<String, SyncReport> = match name {
                Some(name) => {
                    let report = service.syncer().sync_repository(&name);
                    std::iter::once((name, report)).collect()
                }
                None => service.syncer().sync_all(),
            };
            let mut failed = false;
            for (repo, report) in &reports {
                println!("{}: {} recipe(s) added", repo, report.added);
                for error in &report.errors {
                    println!("  error: {error}");
                    failed = true;
                }
            }
            if failed {
                bail!("Repository sync finished with errors");
            }
            Ok(())
        }
        Commands::Deploy {
            name,
            version,
            namespace,
            set,
            skip_scan,
            timeout,
        } => {
            let mut request = DeployRequest::new(&name);
            if let Some(version) = version {
                request = request.version(version);
            }
            if let Some(namespace) = namespace {
                request = request.namespace(namespace);
            }
            for raw in &set {
                let (key, value) = parse_assignment(raw)?;
                request = request.parameter(key, value);
            }
            if skip_scan {
                request = request.skip_security_scan();
            }

            let installer = service.installer();
            installer.register_observer(LogObserver);
            let id = installer.deploy(request)?;
            info!("Waiting for deployment {}", id);

            let record = installer.wait(&id, Duration::from_secs(timeout))?;
            println!("Deployment {} {}", record.id, record.status);
            for step in &record.steps {
                let target = step
                    .resource_name
                    .as_deref()
                    .map(|r| format!(" ({r})"))
                    .unwrap_or_default();
                let detail = step.error.as_deref().or(step.output.as_deref()).unwrap_or("");
                println!(
                    "  {:<22} {:<10} {}",
                    format!("{}{}", step.name, target),
                    step.status.as_str(),
                    detail
                );
            }
            for warning in &record.warnings {
                println!("  warning: {warning}");
            }
            if let Some(error) = &record.error {
                bail!("Deployment failed: {error}");
            }
            Ok(())
        }
    }
}
