use std::{path::PathBuf, sync::Arc, time::Duration};

use cpu_arbiter_protocol::{Command, ProtocolError, Response};
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::{
    cgroup::{CFS_QUOTA_FILE, CPU_SHARES_FILE, CgroupLayout, CgroupWriter},
    pods::PodRegistry,
    weights::SharedWeights,
};

/// Utilization reported for a pod whose usage counter could not be read.
pub const FAILED_SAMPLE: f64 = -1.0;

/// Per-connection command processor.
///
/// Owns the session pod registry; shares the weights cell and the cgroup
/// write path with every other connection.
pub struct CommandSession {
    pods: PodRegistry,
    layout: CgroupLayout,
    writer: Arc<dyn CgroupWriter>,
    weights: SharedWeights,
    sample_interval: Duration,
}

impl CommandSession {
    #[must_use]
    pub fn new(
        layout: CgroupLayout,
        writer: Arc<dyn CgroupWriter>,
        weights: SharedWeights,
        sample_interval: Duration,
    ) -> Self {
        Self {
            pods: PodRegistry::new(),
            layout,
            writer,
            weights,
            sample_interval,
        }
    }

    /// Process one framed command and produce exactly one wire response.
    pub async fn handle(&mut self, frame: &str) -> Response {
        match Command::parse(frame) {
            Ok(command) => self.dispatch(command).await,
            Err(ProtocolError::UnknownCommand(keyword)) => {
                warn!(%keyword, "unknown command on the channel");
                Response::UnknownCommand
            }
            Err(error) => {
                warn!(%error, "malformed command");
                Response::Failure
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> Response {
        match command {
            Command::UpdatePods(bindings) => {
                self.pods.replace(bindings);
                debug!(pods = self.pods.len(), "session pod map replaced");
                Response::Success
            }
            Command::ApplyCpuShares(batch) => {
                let floored = batch
                    .into_iter()
                    .map(|(pod, share)| (pod, share.floor() as i64))
                    .collect();
                self.apply_batch(floored, CPU_SHARES_FILE).await
            }
            Command::ApplyCpuQuotas(batch) => self.apply_batch(batch, CFS_QUOTA_FILE).await,
            Command::ApplyLbWeights(payload) => {
                self.weights.replace(payload);
                Response::Success
            }
            Command::GetCpuUtilizations => {
                Response::Utilizations(self.sample_utilizations().await)
            }
        }
    }

    /// Write one value per pod into the named cgroup file.
    ///
    /// The whole batch is staged before the first write, so an unknown pod
    /// rejects the command without touching the kernel. A failing write
    /// stops the batch.
    async fn apply_batch(&self, batch: Vec<(String, i64)>, file: &'static str) -> Response {
        let mut staged: Vec<(&str, i64, PathBuf)> = Vec::with_capacity(batch.len());
        for (pod, value) in &batch {
            match self.pods.resolve(pod) {
                Ok(uid) => staged.push((pod, *value, self.layout.file_path(uid, file))),
                Err(error) => {
                    warn!(%error, file, "rejecting batch");
                    return Response::Failure;
                }
            }
        }

        for (pod, value, path) in staged {
            if let Err(error) = self.writer.write_value(value, &path).await {
                warn!(pod, value, %error, "cgroup write failed, aborting batch");
                return Response::Failure;
            }
        }
        Response::Success
    }

    /// Capture every pod's usage counter, sleep the sampling interval on
    /// this handler, capture again and convert the deltas to percentages.
    ///
    /// The sleep intentionally occupies the command channel: the elapsed
    /// time measured here is the controller's time base for the round.
    async fn sample_utilizations(&self) -> Vec<(String, f64)> {
        let mut first_pass = Vec::with_capacity(self.pods.len());
        for (pod, uid) in self.pods.iter() {
            let before = match self.layout.read_usage(uid).await {
                Ok(usage) => Some(usage),
                Err(error) => {
                    warn!(pod, %error, "usage capture failed");
                    None
                }
            };
            first_pass.push((pod.to_owned(), uid.to_owned(), before));
        }

        let started = Instant::now();
        sleep(self.sample_interval).await;
        let elapsed_ns = started.elapsed().as_nanos() as f64;

        let mut report = Vec::with_capacity(first_pass.len());
        for (pod, uid, before) in first_pass {
            let pct = match before {
                Some(before) => match self.layout.read_usage(&uid).await {
                    Ok(after) => after.saturating_sub(before) as f64 / elapsed_ns * 100.0,
                    Err(error) => {
                        warn!(pod = %pod, %error, "usage capture failed");
                        FAILED_SAMPLE
                    }
                },
                None => FAILED_SAMPLE,
            };
            report.push((pod, pct));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;

    use super::*;
    use crate::cgroup::{CPU_USAGE_FILE, CgroupError};

    struct DirectWriter;

    #[async_trait]
    impl CgroupWriter for DirectWriter {
        async fn write_value(&self, value: i64, path: &Path) -> Result<(), CgroupError> {
            tokio::fs::write(path, value.to_string())
                .await
                .map_err(|source| CgroupError::Write {
                    path: path.to_owned(),
                    source,
                })
        }
    }

    fn session(root: &Path) -> CommandSession {
        CommandSession::new(
            CgroupLayout::new(root),
            Arc::new(DirectWriter),
            SharedWeights::new(),
            Duration::from_millis(10),
        )
    }

    fn seed_pod(root: &Path, uid: &str, usage: u64) {
        let dir = root.join(uid);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(CPU_USAGE_FILE), usage.to_string()).unwrap();
    }

    #[tokio::test]
    async fn update_pods_then_apply_shares_writes_floored_values() {
        let dir = tempfile::tempdir().unwrap();
        seed_pod(dir.path(), "uid-1", 0);
        let mut session = session(dir.path());

        assert_eq!(
            session.handle("updatePods app1-0:uid-1").await,
            Response::Success
        );
        assert_eq!(
            session.handle("applyCPUShares app1-0:255.900000").await,
            Response::Success
        );
        let written =
            std::fs::read_to_string(dir.path().join("uid-1").join(CPU_SHARES_FILE)).unwrap();
        assert_eq!(written, "255");
    }

    #[tokio::test]
    async fn unknown_pod_rejects_batch_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        seed_pod(dir.path(), "uid-1", 0);
        let mut session = session(dir.path());
        session.handle("updatePods app1-0:uid-1").await;

        assert_eq!(
            session
                .handle("applyCPUQuotas app1-0:20000 ghost-0:20000")
                .await,
            Response::Failure
        );
        assert!(!dir.path().join("uid-1").join(CFS_QUOTA_FILE).exists());
    }

    #[tokio::test]
    async fn unknown_command_keeps_session_usable() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());

        assert_eq!(
            session.handle("restartNode node1").await,
            Response::UnknownCommand
        );
        assert_eq!(
            session.handle("applyLBWeights app1:100.000000 ").await,
            Response::Success
        );
    }

    #[tokio::test]
    async fn sampling_reports_idle_and_failed_pods() {
        let dir = tempfile::tempdir().unwrap();
        seed_pod(dir.path(), "uid-1", 500_000);
        let mut session = session(dir.path());
        session
            .handle("updatePods app1-0:uid-1 app2-0:uid-missing")
            .await;

        let response = session.handle("getCPUUtilizations").await;
        let Response::Utilizations(report) = response else {
            panic!("expected utilizations, got {response:?}");
        };
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].0, "app1-0");
        assert!(report[0].1.abs() < f64::EPSILON, "idle pod reports zero");
        assert_eq!(report[1], ("app2-0".to_owned(), FAILED_SAMPLE));
    }

    #[tokio::test]
    async fn remap_redirects_usage_reads() {
        let dir = tempfile::tempdir().unwrap();
        seed_pod(dir.path(), "uid-a", 0);
        let mut session = session(dir.path());

        session.handle("updatePods p1:uid-a").await;
        let Response::Utilizations(report) = session.handle("getCPUUtilizations").await else {
            panic!("expected utilizations");
        };
        assert!(report[0].1 >= 0.0);

        session.handle("updatePods p1:uid-b").await;
        let Response::Utilizations(report) = session.handle("getCPUUtilizations").await else {
            panic!("expected utilizations");
        };
        assert_eq!(report[0], ("p1".to_owned(), FAILED_SAMPLE));
    }
}
