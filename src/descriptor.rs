//! Resource descriptors and the dependency graph
//!
//! A descriptor is the declarative intent for one resource: kind, name,
//! container scope, opaque desired configuration, and the names it depends
//! on. Descriptors are constructed once per scenario; names are
//! scenario-scoped so that parallel scenarios never collide.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

/// Hierarchical container address for a resource (account + group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub account: String,
    pub group: String,
}

impl Scope {
    pub fn new(account: &str, group: &str) -> Self {
        Scope {
            account: account.to_string(),
            group: group.to_string(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.group)
    }
}

/// Declarative intent for one remote resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Resource type tag ("network", "interface", "instance", ...)
    pub kind: String,
    /// Scenario-scoped name, unique within one descriptor graph
    pub name: String,
    pub scope: Scope,
    /// Opaque payload passed through to the creation call
    pub desired_config: serde_json::Value,
    /// Names of descriptors that must be available before this one is created
    pub depends_on: Vec<String>,
}

impl ResourceDescriptor {
    pub fn new(kind: &str, name: &str, scope: Scope, desired_config: serde_json::Value) -> Self {
        ResourceDescriptor {
            kind: kind.to_string(),
            name: name.to_string(),
            scope,
            desired_config,
            depends_on: Vec::new(),
        }
    }

    /// Add a dependency on another descriptor's name.
    pub fn depends_on(mut self, name: &str) -> Self {
        self.depends_on.push(name.to_string());
        self
    }
}

/// Lifecycle state of a resource as tracked by the orchestrator.
///
/// `NotFound` is observed absence without a prior delete, distinct from
/// `Deleted` (absence following an explicit delete).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    Unknown,
    Creating,
    Succeeded,
    Failed,
    Deleting,
    Deleted,
    NotFound,
}

impl ProvisioningState {
    /// Terminal states admit no further automatic transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProvisioningState::Succeeded | ProvisioningState::Failed | ProvisioningState::Deleted
        )
    }
}

/// A descriptor graph that failed validation.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate descriptor name '{0}'")]
    DuplicateName(String),
    #[error("descriptor '{name}' depends on unknown descriptor '{dependency}'")]
    UnknownDependency { name: String, dependency: String },
    #[error("dependency cycle involving {0:?}")]
    Cycle(Vec<String>),
}

/// Compute a valid creation order for the descriptor graph.
///
/// Kahn's algorithm, stable with respect to input order: a descriptor is
/// emitted as soon as all of its dependencies have been, and ties keep
/// the order the caller wrote. Teardown walks the exact reverse of this
/// order.
pub fn creation_order(descriptors: &[ResourceDescriptor]) -> Result<Vec<usize>, GraphError> {
    let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(descriptors.len());
    for (i, d) in descriptors.iter().enumerate() {
        if index_of.insert(d.name.as_str(), i).is_some() {
            return Err(GraphError::DuplicateName(d.name.clone()));
        }
    }

    let mut indegree = vec![0usize; descriptors.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); descriptors.len()];
    for (i, d) in descriptors.iter().enumerate() {
        for dep in &d.depends_on {
            let Some(&j) = index_of.get(dep.as_str()) else {
                return Err(GraphError::UnknownDependency {
                    name: d.name.clone(),
                    dependency: dep.clone(),
                });
            };
            indegree[i] += 1;
            dependents[j].push(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..descriptors.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(descriptors.len());
    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &dep in &dependents[i] {
            indegree[dep] -= 1;
            if indegree[dep] == 0 {
                ready.push_back(dep);
            }
        }
    }

    if order.len() != descriptors.len() {
        let ordered: HashSet<usize> = order.into_iter().collect();
        let cycle = descriptors
            .iter()
            .enumerate()
            .filter(|(i, _)| !ordered.contains(i))
            .map(|(_, d)| d.name.clone())
            .collect();
        return Err(GraphError::Cycle(cycle));
    }

    Ok(order)
}

/// Names of every transitive dependent of `root` within the graph.
///
/// Used to mark the whole downstream branch skipped when a node cannot
/// be provisioned due to quota.
pub fn transitive_dependents(
    descriptors: &[ResourceDescriptor],
    root: &str,
) -> HashSet<String> {
    let mut affected: HashSet<String> = HashSet::new();
    affected.insert(root.to_string());
    // Descriptors are small graphs; a fixpoint pass is simpler than
    // building an adjacency index.
    loop {
        let mut grew = false;
        for d in descriptors {
            if !affected.contains(&d.name) && d.depends_on.iter().any(|dep| affected.contains(dep))
            {
                affected.insert(d.name.clone());
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    affected.remove(root);
    affected
}
