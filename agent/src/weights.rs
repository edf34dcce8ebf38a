use std::sync::{Arc, Mutex, PoisonError};

/// Most recently accepted LB weights string, shared between the command
/// channel (writer) and the HTTP endpoint (reader).
///
/// The mutex is held only for the clone or the assignment, so a reader never
/// observes a partial write.
#[derive(Clone, Debug, Default)]
pub struct SharedWeights {
    inner: Arc<Mutex<String>>,
}

impl SharedWeights {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current weights string.
    #[must_use]
    pub fn current(&self) -> String {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the weights string atomically.
    pub fn replace(&self, weights: String) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = weights;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_is_whole_string() {
        let weights = SharedWeights::new();
        assert_eq!(weights.current(), "");

        weights.replace("app1:100.000000 ".to_owned());
        assert_eq!(weights.current(), "app1:100.000000 ");

        let reader = weights.clone();
        weights.replace(String::new());
        assert_eq!(reader.current(), "");
    }
}
