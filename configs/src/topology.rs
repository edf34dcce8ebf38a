use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::AGENT_COMMAND_PORT;

/// Errors raised while loading a topology snapshot from disk.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to read topology file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse topology file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    Invalid(#[from] TopologyInvariantError),
}

/// Shape invariants every topology snapshot must satisfy.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyInvariantError {
    #[error("topology has no nodes")]
    EmptyTopology,
    #[error("node {node} has no pods")]
    EmptyNode { node: String },
    #[error("pod name {pod} appears more than once")]
    DuplicatePod { pod: String },
    #[error("pod {pod} has an empty cgroup path")]
    EmptyCgroup { pod: String },
}

/// One tenant replica pinned to a node.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Pod {
    pub name: String,
    /// Per-pod weight feeding the tenant's nominal load computation.
    pub fair_share: f64,
    /// Pod-UID path segment under the kubepods cgroup hierarchy.
    pub cgroup: String,
}

impl Pod {
    /// Logical tenant this replica belongs to.
    #[must_use]
    pub fn app(&self) -> &str {
        app_of(&self.name)
    }
}

#[derive(Debug, Deserialize)]
struct NodeSpec {
    name: String,
    ip: String,
    #[serde(default = "default_agent_port")]
    agent_port: u16,
    milli_cores: u32,
    pods: Vec<Pod>,
}

const fn default_agent_port() -> u16 {
    AGENT_COMMAND_PORT
}

/// One worker node of the fleet, with its agent endpoint and resident pods.
#[derive(Clone, Debug)]
pub struct Node {
    /// Position in the topology; stable for the process lifetime.
    pub index: usize,
    pub name: String,
    pub ip: String,
    pub agent_port: u16,
    pub milli_cores: u32,
    /// Pods in declaration order; names are globally unique.
    pub pods: Vec<Pod>,
}

impl Node {
    /// Agent command-channel address in `ip:port` form.
    #[must_use]
    pub fn agent_addr(&self) -> String {
        format!("{}:{}", self.ip, self.agent_port)
    }
}

#[derive(Debug, Deserialize)]
struct TopologyFile {
    nodes: Vec<NodeSpec>,
}

/// Immutable fleet snapshot the controller operates on. Loaded once at
/// startup; node indexes and pod cgroup paths never change afterwards.
#[derive(Clone, Debug)]
pub struct Topology {
    nodes: Vec<Node>,
    apps: Vec<String>,
}

impl Topology {
    /// Load and validate a YAML snapshot.
    pub fn load(path: &Path) -> Result<Self, TopologyError> {
        let text = fs::read_to_string(path).map_err(|source| TopologyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let file: TopologyFile =
            serde_yaml::from_str(&text).map_err(|source| TopologyError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::from_specs(file.nodes)?)
    }

    fn from_specs(specs: Vec<NodeSpec>) -> Result<Self, TopologyInvariantError> {
        let nodes = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Node {
                index,
                name: spec.name,
                ip: spec.ip,
                agent_port: spec.agent_port,
                milli_cores: spec.milli_cores,
                pods: spec.pods,
            })
            .collect();
        Self::from_nodes(nodes)
    }

    /// Build a topology from already-indexed nodes, enforcing the shape
    /// invariants.
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self, TopologyInvariantError> {
        if nodes.is_empty() {
            return Err(TopologyInvariantError::EmptyTopology);
        }

        let mut seen = std::collections::BTreeSet::new();
        let mut apps = std::collections::BTreeSet::new();
        for node in &nodes {
            if node.pods.is_empty() {
                return Err(TopologyInvariantError::EmptyNode {
                    node: node.name.clone(),
                });
            }
            for pod in &node.pods {
                if !seen.insert(pod.name.clone()) {
                    return Err(TopologyInvariantError::DuplicatePod {
                        pod: pod.name.clone(),
                    });
                }
                if pod.cgroup.is_empty() {
                    return Err(TopologyInvariantError::EmptyCgroup {
                        pod: pod.name.clone(),
                    });
                }
                apps.insert(pod.app().to_owned());
            }
        }

        Ok(Self {
            nodes,
            apps: apps.into_iter().collect(),
        })
    }

    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Tenant names in ascending order; index positions feed the legacy
    /// optimizer query parameters.
    #[must_use]
    pub fn apps(&self) -> &[String] {
        &self.apps
    }

    /// Position of a tenant in the sorted app list.
    #[must_use]
    pub fn app_index(&self, app: &str) -> Option<usize> {
        self.apps.binary_search_by(|known| known.as_str().cmp(app)).ok()
    }
}

/// Strip the `-<replicaIndex>` suffix from a pod name to recover its tenant.
/// A name without the suffix is its own tenant.
#[must_use]
pub fn app_of(pod_name: &str) -> &str {
    match pod_name.rsplit_once('-') {
        Some((app, suffix))
            if !app.is_empty()
                && !suffix.is_empty()
                && suffix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            app
        }
        _ => pod_name,
    }
}
