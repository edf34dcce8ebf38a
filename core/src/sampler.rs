use std::{collections::BTreeMap, sync::Arc};

use cpu_arbiter_config::topology::app_of;
use cpu_arbiter_protocol::{Command, Response};
use thiserror::Error;
use tokio::task::JoinSet;

use crate::transport::{NodeLink, TransportError};

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("sampling {node} failed: {source}")]
    Node {
        node: String,
        #[source]
        source: TransportError,
    },
    #[error("unexpected reply to getCPUUtilizations from {node}")]
    UnexpectedReply { node: String },
    #[error("sampling task failed to join: {0}")]
    Join(String),
}

/// Per-pod utilization percentages reported by one node, in session order.
pub type NodeUtilizations = Vec<(String, f64)>;

/// Fan out `getCPUUtilizations` to every node and rejoin at the barrier.
///
/// Replies arrive in arbitrary order and are reassembled by node index, so
/// the caller's view is indexed like the topology. Every task is drained
/// before the first failure is reported: aborting a task mid-exchange would
/// leave a reply in flight on its persistent connection and desynchronize
/// the next round.
pub async fn sample_all(links: &[Arc<NodeLink>]) -> Result<Vec<NodeUtilizations>, SampleError> {
    let mut tasks = JoinSet::new();
    for (index, link) in links.iter().enumerate() {
        let link = Arc::clone(link);
        tasks.spawn(async move { (index, link.exchange(&Command::GetCpuUtilizations).await) });
    }

    let mut slots: Vec<Option<NodeUtilizations>> = (0..links.len()).map(|_| None).collect();
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(Response::Utilizations(report)))) => slots[index] = Some(report),
            Ok((index, Ok(_))) => {
                first_error.get_or_insert(SampleError::UnexpectedReply {
                    node: links[index].name().to_owned(),
                });
            }
            Ok((index, Err(source))) => {
                first_error.get_or_insert(SampleError::Node {
                    node: links[index].name().to_owned(),
                    source,
                });
            }
            Err(join_error) => {
                first_error.get_or_insert(SampleError::Join(join_error.to_string()));
            }
        }
    }
    if let Some(error) = first_error {
        return Err(error);
    }

    let mut report = Vec::with_capacity(slots.len());
    for (index, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(utilizations) => report.push(utilizations),
            None => {
                return Err(SampleError::Join(format!(
                    "no reply recorded for node index {index}"
                )));
            }
        }
    }
    Ok(report)
}

/// Sum per-pod utilization into per-app demand. The replica suffix is
/// stripped from pod names; the failed-sample sentinel stays out of the sum.
#[must_use]
pub fn aggregate_by_app(samples: &[NodeUtilizations]) -> BTreeMap<String, f64> {
    let mut demand = BTreeMap::new();
    for node in samples {
        for (pod, pct) in node {
            let total = demand.entry(app_of(pod).to_owned()).or_insert(0.0);
            if *pct >= 0.0 {
                *total += pct;
            }
        }
    }
    demand
}

/// Flatten the per-node reports into one per-pod map for the round log,
/// keeping failed samples verbatim.
#[must_use]
pub fn flatten_pods(samples: &[NodeUtilizations]) -> BTreeMap<String, f64> {
    samples
        .iter()
        .flatten()
        .map(|(pod, pct)| (pod.clone(), *pct))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_strips_replicas_and_skips_failed_samples() {
        let samples = vec![
            vec![("app1-0".to_owned(), 12.5), ("app2-0".to_owned(), -1.0)],
            vec![("app1-1".to_owned(), 7.5)],
        ];
        let demand = aggregate_by_app(&samples);
        assert_eq!(demand["app1"], 20.0);
        assert_eq!(demand["app2"], 0.0);
    }

    #[test]
    fn flattening_keeps_the_sentinel() {
        let samples = vec![vec![("app1-0".to_owned(), -1.0)]];
        assert_eq!(flatten_pods(&samples)["app1-0"], -1.0);
    }
}
