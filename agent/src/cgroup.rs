use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{fs, process::Command};
use tracing::debug;

/// Controlled file under each pod's cgroup directory.
pub const CPU_SHARES_FILE: &str = "cpu.shares";
/// CFS quota file under each pod's cgroup directory.
pub const CFS_QUOTA_FILE: &str = "cpu.cfs_quota_us";
/// Cumulative usage counter, in nanoseconds, monotonic per pod.
pub const CPU_USAGE_FILE: &str = "cpuacct.usage";

#[derive(Debug, Error)]
pub enum CgroupError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unparsable usage counter in {}", path.display())]
    Malformed { path: PathBuf },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to run write helper {}: {source}", helper.display())]
    HelperSpawn {
        helper: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write helper exited with {status} writing {}", path.display())]
    HelperFailed {
        status: std::process::ExitStatus,
        path: PathBuf,
    },
}

/// Path layout of the controlled cgroup hierarchy:
/// `<root>/<podUID>/{cpu.shares, cpu.cfs_quota_us, cpuacct.usage}`.
#[derive(Clone, Debug)]
pub struct CgroupLayout {
    root: PathBuf,
}

impl CgroupLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of one controlled file for a pod.
    #[must_use]
    pub fn file_path(&self, pod_uid: &str, file: &str) -> PathBuf {
        self.root.join(pod_uid).join(file)
    }

    /// Read the pod's cumulative CPU usage counter, in nanoseconds.
    pub async fn read_usage(&self, pod_uid: &str) -> Result<u64, CgroupError> {
        let path = self.file_path(pod_uid, CPU_USAGE_FILE);
        let text = fs::read_to_string(&path)
            .await
            .map_err(|source| CgroupError::Read {
                path: path.clone(),
                source,
            })?;
        text.trim()
            .parse()
            .map_err(|_| CgroupError::Malformed { path })
    }
}

/// Sink for privileged cgroup writes.
#[async_trait]
pub trait CgroupWriter: Send + Sync {
    async fn write_value(&self, value: i64, path: &Path) -> Result<(), CgroupError>;
}

/// Production writer delegating every write to the privileged shell helper
/// (`bash <helper> <value> <path>`). The helper's exit status is the single
/// source of truth for success.
#[derive(Clone, Debug)]
pub struct HelperScriptWriter {
    helper: PathBuf,
}

impl HelperScriptWriter {
    #[must_use]
    pub fn new(helper: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
        }
    }
}

#[async_trait]
impl CgroupWriter for HelperScriptWriter {
    async fn write_value(&self, value: i64, path: &Path) -> Result<(), CgroupError> {
        let status = Command::new("bash")
            .arg(&self.helper)
            .arg(value.to_string())
            .arg(path)
            .status()
            .await
            .map_err(|source| CgroupError::HelperSpawn {
                helper: self.helper.clone(),
                source,
            })?;
        if !status.success() {
            return Err(CgroupError::HelperFailed {
                status,
                path: path.to_owned(),
            });
        }
        debug!(value, path = %path.display(), "cgroup write applied");
        Ok(())
    }
}
