// src/recipe/graph.rs

//! Resource ordering within a recipe
//!
//! Resources declare `depends_on` edges to other resources of the same
//! recipe. Deployment walks them in topological order. Ordering never fails:
//! when no remaining resource has all of its dependencies placed (a cycle,
//! or a reference to a resource that does not exist) the rest are appended
//! in their declared order and deployment proceeds best-effort.
//!
//! # Example
//!
//! ```ignore
//! let plan = deployment_order(&recipe.resources);
//! for resource in &plan.order {
//!     // deploy
//! }
//! if !plan.unresolved.is_empty() {
//!     warn!("ordering degraded for {:?}", plan.unresolved);
//! }
//! ```

use super::format::RecipeResource;
use std::collections::{HashMap, HashSet};

/// Result of ordering a recipe's resources
#[derive(Debug)]
pub struct DeploymentOrder<'a> {
    /// Every input resource exactly once
    pub order: Vec<&'a RecipeResource>,
    /// Resources appended without their dependencies satisfied
    pub unresolved: Vec<String>,
}

impl DeploymentOrder<'_> {
    /// Whether every resource was placed after its dependencies
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Resource names in deployment order
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|r| r.name.as_str()).collect()
    }
}

/// Compute the deployment order of `resources`
pub fn deployment_order(resources: &[RecipeResource]) -> DeploymentOrder<'_> {
    let mut order = Vec::with_capacity(resources.len());
    let mut placed: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&RecipeResource> = resources.iter().collect();

    while !remaining.is_empty() {
        let ready = remaining
            .iter()
            .position(|r| r.depends_on.iter().all(|dep| placed.contains(dep.as_str())));

        match ready {
            Some(idx) => {
                let resource = remaining.remove(idx);
                placed.insert(resource.name.as_str());
                order.push(resource);
            }
            None => {
                let unresolved = remaining.iter().map(|r| r.name.clone()).collect();
                order.extend(remaining);
                return DeploymentOrder { order, unresolved };
            }
        }
    }

    DeploymentOrder {
        order,
        unresolved: Vec::new(),
    }
}

/// `depends_on` entries that name no resource in the recipe
///
/// Returns `(resource, missing dependency)` pairs.
pub fn dangling_references(resources: &[RecipeResource]) -> Vec<(String, String)> {
    let names: HashSet<&str> = resources.iter().map(|r| r.name.as_str()).collect();

    resources
        .iter()
        .flat_map(|r| {
            r.depends_on
                .iter()
                .filter(|dep| !names.contains(dep.as_str()))
                .map(|dep| (r.name.clone(), dep.clone()))
        })
        .collect()
}

/// Find dependency cycles among resources
///
/// Each cycle is reported once, as the list of resource names along it.
pub fn find_cycles(resources: &[RecipeResource]) -> Vec<Vec<String>> {
    let edges: HashMap<&str, &[String]> = resources
        .iter()
        .map(|r| (r.name.as_str(), r.depends_on.as_slice()))
        .collect();

    let mut cycles = Vec::new();
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for resource in resources {
        if !visited.contains(resource.name.as_str()) {
            find_cycles_dfs(
                resource.name.as_str(),
                &edges,
                &mut visited,
                &mut rec_stack,
                &mut path,
                &mut cycles,
            );
        }
    }

    cycles
}

fn find_cycles_dfs<'a>(
    node: &'a str,
    edges: &HashMap<&'a str, &'a [String]>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
    cycles: &mut Vec<Vec<String>>,
) {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(deps) = edges.get(node) {
        for dep in deps.iter() {
            // Dangling references are not part of any cycle
            let Some((&dep, _)) = edges.get_key_value(dep.as_str()) else {
                continue;
            };
            if !visited.contains(&dep) {
                find_cycles_dfs(dep, edges, visited, rec_stack, path, cycles);
            } else if rec_stack.contains(&dep)
                && let Some(start) = path.iter().position(|x| *x == dep)
            {
                cycles.push(path[start..].iter().map(|s| s.to_string()).collect());
            }
        }
    }

    path.pop();
    rec_stack.remove(node);
}
