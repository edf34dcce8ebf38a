use std::collections::BTreeMap;

use thiserror::Error;

/// Error raised when a command references a pod the session does not know.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown pod {pod}")]
pub struct UnknownPod {
    pod: String,
}

/// Per-connection pod registry installed by `updatePods`.
///
/// Every command channel owns its own registry, so no locking is needed. The
/// map is replaced wholesale by each `updatePods`; later commands resolve
/// pods through the most recent install and fail as a whole on an unknown
/// name.
#[derive(Debug, Default)]
pub struct PodRegistry {
    uids: BTreeMap<String, String>,
}

impl PodRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole registry with new `podName → podUID` bindings.
    pub fn replace(&mut self, bindings: Vec<(String, String)>) {
        self.uids = bindings.into_iter().collect();
    }

    /// Resolve a pod name to its current UID.
    pub fn resolve(&self, pod: &str) -> Result<&str, UnknownPod> {
        self.uids
            .get(pod)
            .map(String::as_str)
            .ok_or_else(|| UnknownPod {
                pod: pod.to_owned(),
            })
    }

    /// Known pods in ascending name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.uids
            .iter()
            .map(|(pod, uid)| (pod.as_str(), uid.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.uids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_is_wholesale() {
        let mut pods = PodRegistry::new();
        pods.replace(vec![
            ("app1-0".to_owned(), "uid-a".to_owned()),
            ("app2-0".to_owned(), "uid-b".to_owned()),
        ]);
        assert_eq!(pods.resolve("app1-0").unwrap(), "uid-a");

        pods.replace(vec![("app1-0".to_owned(), "uid-c".to_owned())]);
        assert_eq!(pods.resolve("app1-0").unwrap(), "uid-c");
        assert!(pods.resolve("app2-0").is_err());
        assert_eq!(pods.len(), 1);
    }

    #[test]
    fn iteration_is_name_ordered() {
        let mut pods = PodRegistry::new();
        pods.replace(vec![
            ("b-0".to_owned(), "uid-b".to_owned()),
            ("a-0".to_owned(), "uid-a".to_owned()),
        ]);
        let names: Vec<_> = pods.iter().map(|(pod, _)| pod.to_owned()).collect();
        assert_eq!(names, ["a-0", "b-0"]);
    }
}
