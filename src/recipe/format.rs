// src/recipe/format.rs

//! Recipe document format definitions
//!
//! A recipe is a JSON document published by a vendor or community member
//! describing everything needed to deploy an application: the resources to
//! roll out, other recipes it needs, and the parameters a user may set.
//!
//! ```json
//! {
//!   "name": "nextcloud",
//!   "version": "1.0.0",
//!   "publisher": "debvisor",
//!   "description": "Nextcloud collaboration suite",
//!   "resources": [
//!     {"name": "nextcloud-helm", "kind": "helm",
//!      "spec": {"chart": "nextcloud", "repo": "https://nextcloud.github.io/helm/"}}
//!   ],
//!   "parameters": [{"name": "admin_password", "type": "secret", "required": true}],
//!   "signatures": {"debvisor-2024": "<base64>"}
//! }
//! ```

use crate::error::{Error, Result};
use crate::security::SecurityScanResult;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// User-supplied parameter values keyed by parameter name
pub type ParameterValues = BTreeMap<String, Value>;

/// Default per-resource timeout in seconds
pub const DEFAULT_RESOURCE_TIMEOUT: u64 = 300;

/// Kind of deployable resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "helm")]
    Helm,
    #[serde(rename = "manifest")]
    Manifest,
    #[serde(rename = "kustomize")]
    Kustomize,
    #[serde(rename = "vm-image")]
    VmImage,
    #[serde(rename = "container-image", alias = "container")]
    ContainerImage,
    #[serde(rename = "storage-pool")]
    StoragePool,
    #[serde(rename = "network")]
    Network,
    #[serde(rename = "secret")]
    Secret,
    #[serde(rename = "configmap")]
    Configmap,
}

impl ResourceKind {
    /// Document spelling of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Helm => "helm",
            Self::Manifest => "manifest",
            Self::Kustomize => "kustomize",
            Self::VmImage => "vm-image",
            Self::ContainerImage => "container-image",
            Self::StoragePool => "storage-pool",
            Self::Network => "network",
            Self::Secret => "secret",
            Self::Configmap => "configmap",
        }
    }

    /// Parse from the document spelling
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "helm" => Some(Self::Helm),
            "manifest" => Some(Self::Manifest),
            "kustomize" => Some(Self::Kustomize),
            "vm-image" => Some(Self::VmImage),
            "container-image" | "container" => Some(Self::ContainerImage),
            "storage-pool" => Some(Self::StoragePool),
            "network" => Some(Self::Network),
            "secret" => Some(Self::Secret),
            "configmap" => Some(Self::Configmap),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance classification of a recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Publisher signature verified
    Verified,
    /// From a trusted repository
    Trusted,
    /// Community contributed
    Community,
    /// No provenance information
    #[default]
    Unknown,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Trusted => "trusted",
            Self::Community => "community",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "verified" => Some(Self::Verified),
            "trusted" => Some(Self::Trusted),
            "community" => Some(Self::Community),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_constraint() -> String {
    "*".to_string()
}

fn default_dependency_type() -> String {
    "recipe".to_string()
}

fn default_parameter_type() -> String {
    "string".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_RESOURCE_TIMEOUT
}

/// Dependency on another recipe or on an external capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDependency {
    pub name: String,
    /// Version constraint, e.g. ">=8.0" or "*"
    #[serde(default = "default_constraint")]
    pub version_constraint: String,
    /// recipe | k8s-api | storage | network
    #[serde(rename = "type", default = "default_dependency_type")]
    pub dep_type: String,
    #[serde(default)]
    pub optional: bool,
    /// Free-form condition expression, carried but not evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl RecipeDependency {
    /// A required recipe dependency with the given constraint
    pub fn recipe(name: impl Into<String>, version_constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_constraint: version_constraint.into(),
            dep_type: default_dependency_type(),
            optional: false,
            condition: None,
        }
    }

    /// Whether this dependency refers to another recipe in the catalog
    pub fn is_recipe(&self) -> bool {
        self.dep_type == "recipe"
    }
}

/// One deployable unit inside a recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeResource {
    /// Unique within the recipe
    pub name: String,
    pub kind: ResourceKind,
    /// Kind-specific, opaque to the orchestrator
    #[serde(default)]
    pub spec: Map<String, Value>,
    /// Names of other resources in the same recipe
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<Value>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl RecipeResource {
    /// Create a resource with an empty spec and no dependencies
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            spec: Map::new(),
            depends_on: Vec::new(),
            rollback_hint: None,
            health_check: None,
            timeout_seconds: DEFAULT_RESOURCE_TIMEOUT,
        }
    }

    /// Set a spec entry
    pub fn with_spec(mut self, key: &str, value: Value) -> Self {
        self.spec.insert(key.to_string(), value);
        self
    }

    /// Add a dependency on another resource of the same recipe
    pub fn depends_on(mut self, name: &str) -> Self {
        self.depends_on.push(name.to_string());
        self
    }

    /// String value of a spec entry, if present
    pub fn spec_str(&self, key: &str) -> Option<&str> {
        self.spec.get(key).and_then(Value::as_str)
    }
}

/// User-configurable input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeParameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// string | int | bool | choice | secret
    #[serde(rename = "type", default = "default_parameter_type")]
    pub param_type: String,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub choices: Vec<String>,
    /// Regex the whole value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
}

impl RecipeParameter {
    pub fn new(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            param_type: param_type.into(),
            default: None,
            required: false,
            choices: Vec::new(),
            validation: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// A complete, publishable recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    pub version: String,
    pub publisher: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    #[serde(default)]
    pub dependencies: Vec<RecipeDependency>,
    #[serde(default)]
    pub resources: Vec<RecipeResource>,
    #[serde(default)]
    pub parameters: Vec<RecipeParameter>,

    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_platform_version: Option<String>,

    /// key id -> base64 signature over the digest
    #[serde(default)]
    pub signatures: BTreeMap<String, String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub trust_level: TrustLevel,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Populated during installation, never persisted
    #[serde(skip)]
    pub security_scan: Option<SecurityScanResult>,
}

impl Recipe {
    /// Create a recipe with only identity fields set
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        publisher: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            publisher: publisher.into(),
            description: description.into(),
            long_description: None,
            icon_url: None,
            homepage: None,
            source_url: None,
            dependencies: Vec::new(),
            resources: Vec::new(),
            parameters: Vec::new(),
            category: None,
            tags: Vec::new(),
            license: None,
            min_platform_version: None,
            signatures: BTreeMap::new(),
            checksum: None,
            trust_level: TrustLevel::Unknown,
            created_at: Utc::now(),
            updated_at: None,
            security_scan: None,
        }
    }

    /// `name:version` label used in logs and messages
    pub fn label(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    /// Find a resource by name
    pub fn resource(&self, name: &str) -> Option<&RecipeResource> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Images referenced by `container-image` resources, in recipe order
    pub fn container_images(&self) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|r| r.kind == ResourceKind::ContainerImage)
            .map(|r| r.spec_str("image").unwrap_or(""))
            .collect()
    }

    /// Parameter values with declared defaults filled in
    ///
    /// Supplied values win; undeclared supplied keys are passed through.
    pub fn effective_parameters(&self, supplied: &ParameterValues) -> ParameterValues {
        let mut values: ParameterValues = self
            .parameters
            .iter()
            .filter_map(|p| p.default.clone().map(|d| (p.name.clone(), d)))
            .collect();

        for (key, value) in supplied {
            values.insert(key.clone(), value.clone());
        }

        values
    }

    /// Check supplied values against the declared parameters
    ///
    /// Returns human-readable problems; an empty list means the values are
    /// acceptable.
    pub fn validate_parameters(&self, supplied: &ParameterValues) -> Vec<String> {
        let mut problems = Vec::new();

        for param in &self.parameters {
            let Some(value) = supplied.get(&param.name) else {
                if param.required && param.default.is_none() {
                    problems.push(format!("Missing required parameter: {}", param.name));
                }
                continue;
            };

            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };

            if !param.choices.is_empty() && !param.choices.contains(&text) {
                problems.push(format!(
                    "Parameter {} must be one of [{}], got '{}'",
                    param.name,
                    param.choices.join(", "),
                    text
                ));
            }

            if let Some(pattern) = &param.validation {
                match Regex::new(&format!("^(?:{})$", pattern)) {
                    Ok(re) if !re.is_match(&text) => problems.push(format!(
                        "Parameter {} does not match pattern {}",
                        param.name, pattern
                    )),
                    Ok(_) => {}
                    Err(e) => problems.push(format!(
                        "Parameter {} has an invalid validation pattern: {}",
                        param.name, e
                    )),
                }
            }
        }

        problems
    }

    /// Encode as a recipe document
    ///
    /// `checksum` is always written as the current digest.
    pub fn to_document(&self) -> Result<Value> {
        let mut doc = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut doc {
            map.insert("checksum".to_string(), Value::String(self.compute_digest()));
        }
        Ok(doc)
    }

    /// Decode a recipe document
    pub fn from_document(doc: Value) -> Result<Self> {
        let label = match (doc.get("name"), doc.get("version")) {
            (Some(Value::String(n)), Some(Value::String(v))) => format!("{n}:{v}"),
            _ => "<unnamed>".to_string(),
        };

        serde_json::from_value(doc)
            .map_err(|e| Error::ParseError(format!("Invalid recipe document {label}: {e}")))
    }

    /// Encode as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document()?)?)
    }

    /// Decode from a JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(content)
            .map_err(|e| Error::ParseError(format!("Invalid recipe JSON: {e}")))?;
        Self::from_document(doc)
    }
}
