// src/recipe/mod.rs

//! Recipe model: the declarative unit of deployment
//!
//! A recipe is identified by `name` + `version` and bundles:
//! - **Resources**: Helm charts, manifests, VM images, container images...
//!   with intra-recipe `depends_on` ordering
//! - **Dependencies**: other recipes that must be present in the catalog
//! - **Parameters**: user inputs with defaults, choices and validation
//! - **Trust metadata**: publisher signatures over the content digest and a
//!   coarse trust level
//!
//! The digest (see [`Recipe::compute_digest`]) covers the canonical form only,
//! so attaching signatures or a scan result never changes it.

mod digest;
mod format;
pub mod graph;

pub use format::{
    DEFAULT_RESOURCE_TIMEOUT, ParameterValues, Recipe, RecipeDependency, RecipeParameter,
    RecipeResource, ResourceKind, TrustLevel,
};
pub use graph::{DeploymentOrder, deployment_order};
