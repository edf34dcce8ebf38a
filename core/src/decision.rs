use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Write as _,
};

use cpu_arbiter_config::{
    constants::{
        CFS_PERIOD_US, CPUS_IN_NODE, MINIMUM_CPU_QUOTA_US, POD_QUOTA_OVERHEAD_PCT, SHARE_BUDGET,
    },
    topology::Topology,
};

use crate::optimizer::LegacyAllocation;

/// Per-node tenant allocations derived from an optimizer solution, indexed
/// like the topology.
pub type NodeShares = Vec<BTreeMap<String, f64>>;

/// Per-pod command batches, indexed like the topology.
pub type QuotaBatches = Vec<Vec<(String, i64)>>;
pub type ShareBatches = Vec<Vec<(String, f64)>>;

/// Project the legacy allocation matrix onto the topology: for each node,
/// the allocation of every tenant that has a pod there.
#[must_use]
pub fn project_allocation(topology: &Topology, allocation: &LegacyAllocation) -> NodeShares {
    topology
        .nodes()
        .iter()
        .map(|node| {
            let apps: BTreeSet<&str> = node.pods.iter().map(|pod| pod.app()).collect();
            apps.into_iter()
                .map(|app| {
                    let share = topology
                        .app_index(app)
                        .map_or(0.0, |app_index| allocation.cell(app_index, node.index));
                    (app.to_owned(), share)
                })
                .collect()
        })
        .collect()
}

/// CFS quota per pod: the tenant's slice of the node bandwidth, floored,
/// clamped to the minimum, then padded with the per-node headroom. A node
/// whose allocations sum to zero floors every pod.
#[must_use]
pub fn cpu_quotas(topology: &Topology, shares: &NodeShares) -> QuotaBatches {
    let node_bandwidth = (CFS_PERIOD_US * CPUS_IN_NODE) as f64;
    let pad = CFS_PERIOD_US * CPUS_IN_NODE * POD_QUOTA_OVERHEAD_PCT / 100;
    topology
        .nodes()
        .iter()
        .map(|node| {
            let node_shares = &shares[node.index];
            let node_sum: f64 = node_shares.values().sum();
            node.pods
                .iter()
                .map(|pod| {
                    let quota = if node_sum > 0.0 {
                        let app_share = node_shares.get(pod.app()).copied().unwrap_or(0.0);
                        let sliced = (app_share * node_bandwidth / node_sum).floor() as i64;
                        sliced.max(MINIMUM_CPU_QUOTA_US)
                    } else {
                        MINIMUM_CPU_QUOTA_US
                    };
                    (pod.name.clone(), quota + pad)
                })
                .collect()
        })
        .collect()
}

/// cpu.shares per pod: the tenant's slice of the per-node credit budget, or
/// an equal split when the solver handed the node nothing.
#[must_use]
pub fn cpu_shares(topology: &Topology, shares: &NodeShares) -> ShareBatches {
    topology
        .nodes()
        .iter()
        .map(|node| {
            let node_shares = &shares[node.index];
            let node_sum: f64 = node_shares.values().sum();
            let equal_split = SHARE_BUDGET / node_shares.len().max(1) as f64;
            node.pods
                .iter()
                .map(|pod| {
                    let share = if node_sum > 0.0 {
                        node_shares.get(pod.app()).copied().unwrap_or(0.0) * SHARE_BUDGET
                            / node_sum
                    } else {
                        equal_split
                    };
                    (pod.name.clone(), share)
                })
                .collect()
        })
        .collect()
}

/// Translate a generic allocation into LB weights: each app's replica
/// allocations are normalized to a 100-point scale, with an equal split when
/// the solver returns all zeros. Replicas are emitted in ascending order of
/// their key so the wire string is deterministic.
///
/// Returns the wire string broadcast to every node plus the per-app map for
/// the round log.
#[must_use]
pub fn lb_weights(
    result: &BTreeMap<String, BTreeMap<String, f64>>,
) -> (String, BTreeMap<String, BTreeMap<String, f64>>) {
    let mut wire = String::new();
    let mut log = BTreeMap::new();
    for (app, replicas) in result {
        if replicas.is_empty() {
            continue;
        }
        let total: f64 = replicas.values().sum();
        let equal_split = 100.0 / replicas.len() as f64;
        let mut app_weights = BTreeMap::new();
        for (pod, allocation) in replicas {
            let weight = if total > 0.0 {
                allocation * 100.0 / total
            } else {
                equal_split
            };
            let _ = write!(wire, "{app}:{weight:.6} ");
            app_weights.insert(pod.clone(), weight);
        }
        log.insert(app.clone(), app_weights);
    }
    (wire, log)
}
