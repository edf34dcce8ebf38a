use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Write as _},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;

/// One control-round record, written as one JSON object per line.
///
/// The field names are part of the downstream analysis format; fields that
/// do not apply to the active enforcement mode stay present as empty maps.
#[derive(Debug, Default, Serialize)]
pub struct RoundRecord {
    /// Wall clock of the round, in unix nanoseconds.
    pub time: u64,
    #[serde(rename = "CPUUtilizations")]
    pub cpu_utilizations: BTreeMap<String, f64>,
    #[serde(rename = "CPUShares")]
    pub cpu_shares: BTreeMap<String, f64>,
    #[serde(rename = "CPUQuotas")]
    pub cpu_quotas: BTreeMap<String, i64>,
    #[serde(rename = "LBWeights")]
    pub lb_weights: BTreeMap<String, BTreeMap<String, f64>>,
}

impl RoundRecord {
    /// Empty record stamped with the current wall clock.
    #[must_use]
    pub fn now() -> Self {
        Self {
            time: unix_nanos(),
            ..Self::default()
        }
    }
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as u64)
}

/// Append-only JSON-lines sink for round records.
#[derive(Debug)]
pub struct RoundLog {
    path: PathBuf,
    file: File,
}

impl RoundLog {
    /// Create `<prefix>/<folder>/<mode>_CPU_<run>`, creating parent
    /// directories as needed.
    pub fn create(prefix: &Path, folder: &str, mode_tag: &str, run: &str) -> io::Result<Self> {
        let dir = prefix.join(folder);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{mode_tag}_CPU_{run}"));
        let file = File::create(&path)?;
        Ok(Self { path, file })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    pub fn append(&mut self, record: &RoundRecord) -> io::Result<()> {
        let line = serde_json::to_string(record).map_err(io::Error::other)?;
        writeln!(self.file, "{line}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_with_the_analysis_field_names() {
        let mut record = RoundRecord {
            time: 42,
            ..RoundRecord::default()
        };
        record
            .cpu_utilizations
            .insert("app1-0".to_owned(), 40.0);

        let line = serde_json::to_string(&record).unwrap();
        assert_eq!(
            line,
            r#"{"time":42,"CPUUtilizations":{"app1-0":40.0},"CPUShares":{},"CPUQuotas":{},"LBWeights":{}}"#
        );
    }

    #[test]
    fn log_file_lands_under_prefix_and_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RoundLog::create(dir.path(), "experiment-a", "none", "1").unwrap();
        log.append(&RoundRecord::now()).unwrap();
        log.append(&RoundRecord::now()).unwrap();

        let expected = dir.path().join("experiment-a").join("none_CPU_1");
        assert_eq!(log.path(), expected);
        let contents = std::fs::read_to_string(expected).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
