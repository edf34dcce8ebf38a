use std::collections::BTreeMap;

use cpu_arbiter_config::{
    constants::{CPUS_IN_NODE, OPTIMAL_STATUS, OPTIMIZER_DEADLINE},
    topology::Topology,
};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::demand::AppDemand;

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("optimizer request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("optimizer call exceeded its deadline")]
    Deadline,
    #[error("optimizer returned non-optimal status {status}")]
    NonOptimal { status: i64 },
}

/// Allocation matrix of the legacy fixed-topology API. Cell `tij` carries
/// app `i+1`'s allocation on node `j+1`; only the five cells of the
/// experiment topology are populated.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct LegacyAllocation {
    pub status: i64,
    #[serde(default)]
    pub t00: f64,
    #[serde(default)]
    pub t01: f64,
    #[serde(default)]
    pub t11: f64,
    #[serde(default)]
    pub t12: f64,
    #[serde(default)]
    pub t20: f64,
}

impl LegacyAllocation {
    /// Allocation of the `app_index`-th tenant on the `node_index`-th node;
    /// cells outside the fixed topology are zero.
    #[must_use]
    pub fn cell(&self, app_index: usize, node_index: usize) -> f64 {
        match (app_index, node_index) {
            (0, 0) => self.t00,
            (0, 1) => self.t01,
            (1, 1) => self.t11,
            (1, 2) => self.t12,
            (2, 0) => self.t20,
            _ => 0.0,
        }
    }
}

/// Response of the generic API: per-app, per-replica allocations.
#[derive(Debug, Deserialize)]
pub struct GenericAllocation {
    pub status: i64,
    #[serde(default)]
    pub result: BTreeMap<String, BTreeMap<String, f64>>,
}

#[derive(Debug, Serialize)]
struct HostEntry {
    name: String,
    cap: f64,
}

#[derive(Debug, Serialize)]
struct TenantEntry {
    name: String,
    load: f64,
    fshareload: f64,
}

#[derive(Debug, Serialize)]
struct PodEntry {
    name: String,
    tenant: String,
    host: String,
}

/// Client hiding the two optimizer APIs behind one call point. The adapter
/// is a pure function from (topology, demand) to an allocation; any failure
/// is fatal to the current round only.
#[derive(Clone, Debug)]
pub struct OptimizerClient {
    http: Client,
    base_url: Url,
}

impl OptimizerClient {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            http: Client::new(),
            base_url,
        }
    }

    /// Legacy GET used by the quota and share loops: demand is passed as
    /// `t<i>` query parameters with apps in ascending name order.
    pub async fn solve_legacy(
        &self,
        apps: &[String],
        demand: &AppDemand,
    ) -> Result<LegacyAllocation, OptimizerError> {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("host_cap", &(CPUS_IN_NODE * 100).to_string());
            for (index, app) in apps.iter().enumerate() {
                let load = demand.get(app).copied().unwrap_or(0.0);
                query.append_pair(&format!("t{index}"), &format!("{load:.6}"));
            }
        }

        let allocation: LegacyAllocation = self.call(self.http.get(url)).await?;
        Self::require_optimal(allocation.status)?;
        debug!(?allocation, "legacy allocation received");
        Ok(allocation)
    }

    /// Generic POST used by the LB loop: the body is the JSON array
    /// `[hosts, tenants, pods]`.
    pub async fn solve_generic(
        &self,
        topology: &Topology,
        demand: &AppDemand,
    ) -> Result<GenericAllocation, OptimizerError> {
        let hosts: Vec<HostEntry> = topology
            .nodes()
            .iter()
            .map(|node| HostEntry {
                name: node.name.clone(),
                cap: f64::from(node.milli_cores) / 10.0,
            })
            .collect();

        let tenants: Vec<TenantEntry> = topology
            .apps()
            .iter()
            .map(|app| TenantEntry {
                name: app.clone(),
                load: demand.get(app).copied().unwrap_or(0.0),
                fshareload: fair_share_load(topology, app),
            })
            .collect();

        let pods: Vec<PodEntry> = topology
            .nodes()
            .iter()
            .flat_map(|node| {
                node.pods.iter().map(|pod| PodEntry {
                    name: pod.name.clone(),
                    tenant: pod.app().to_owned(),
                    host: node.name.clone(),
                })
            })
            .collect();

        let body = json!([hosts, tenants, pods]);
        let allocation: GenericAllocation = self
            .call(self.http.post(self.base_url.clone()).json(&body))
            .await?;
        Self::require_optimal(allocation.status)?;
        debug!(status = allocation.status, "generic allocation received");
        Ok(allocation)
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, OptimizerError> {
        let exchange = async {
            let response = request.send().await?.error_for_status()?;
            response.json::<T>().await
        };
        timeout(OPTIMIZER_DEADLINE, exchange)
            .await
            .map_err(|_| OptimizerError::Deadline)?
            .map_err(OptimizerError::from)
    }

    fn require_optimal(status: i64) -> Result<(), OptimizerError> {
        if status == OPTIMAL_STATUS {
            Ok(())
        } else {
            Err(OptimizerError::NonOptimal { status })
        }
    }
}

/// Nominal tenant load: Σ pod.fair_share × node.milli_cores over the
/// tenant's replicas.
fn fair_share_load(topology: &Topology, app: &str) -> f64 {
    topology
        .nodes()
        .iter()
        .map(|node| {
            node.pods
                .iter()
                .filter(|pod| pod.app() == app)
                .map(|pod| pod.fair_share * f64::from(node.milli_cores))
                .sum::<f64>()
        })
        .sum()
}
