use std::collections::{BTreeMap, VecDeque};

use cpu_arbiter_config::constants::{
    DEMAND_WINDOW, NOISE_FLOOR_PCT, OVERHEAD_PCT, SINGLE_PAD_APP,
};

/// Per-app demand in CPU percent.
pub type AppDemand = BTreeMap<String, f64>;

/// Rolling window of per-app demand snapshots.
///
/// The average runs over the number of snapshots actually collected, so the
/// estimate warms up as `sum/k` during the first `k < W` rounds. An app
/// missing from a snapshot contributes zero for that round.
#[derive(Debug)]
pub struct DemandWindow {
    capacity: usize,
    snapshots: VecDeque<AppDemand>,
}

impl DemandWindow {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            snapshots: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a snapshot, dropping the oldest once the window is full.
    pub fn push(&mut self, snapshot: AppDemand) {
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Arithmetic mean per app over the current window.
    #[must_use]
    pub fn average(&self) -> AppDemand {
        let mut totals = AppDemand::new();
        for snapshot in &self.snapshots {
            for (app, pct) in snapshot {
                *totals.entry(app.clone()).or_insert(0.0) += pct;
            }
        }
        let rounds = self.snapshots.len() as f64;
        if rounds > 0.0 {
            for total in totals.values_mut() {
                *total /= rounds;
            }
        }
        totals
    }
}

impl Default for DemandWindow {
    fn default() -> Self {
        Self::new(DEMAND_WINDOW)
    }
}

/// Shape raw demand for the optimizer: zero out sampling noise, then add the
/// scheduling-overhead pad. The designated tenant receives a single pad,
/// every other tenant a double one.
#[must_use]
pub fn effective_demand(raw: &AppDemand) -> AppDemand {
    raw.iter()
        .map(|(app, pct)| {
            let base = if *pct < NOISE_FLOOR_PCT { 0.0 } else { *pct };
            let pad = if app == SINGLE_PAD_APP {
                OVERHEAD_PCT
            } else {
                OVERHEAD_PCT * 2.0
            };
            (app.clone(), base + pad)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(&str, f64)]) -> AppDemand {
        pairs
            .iter()
            .map(|(app, pct)| ((*app).to_owned(), *pct))
            .collect()
    }

    #[test]
    fn warm_up_divides_by_rounds_collected() {
        let mut window = DemandWindow::new(50);
        window.push(snapshot(&[("app1", 10.0)]));
        window.push(snapshot(&[("app1", 20.0)]));
        assert_eq!(window.average()["app1"], 15.0);
    }

    #[test]
    fn missing_apps_average_over_the_full_window() {
        let mut window = DemandWindow::new(50);
        window.push(snapshot(&[("app1", 30.0)]));
        window.push(snapshot(&[("app2", 10.0)]));
        let average = window.average();
        assert_eq!(average["app1"], 15.0);
        assert_eq!(average["app2"], 5.0);
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let mut window = DemandWindow::new(3);
        for round in 0..10 {
            window.push(snapshot(&[("app1", round as f64)]));
            assert!(window.len() <= 3);
        }
        // Only the three most recent snapshots (7, 8, 9) survive.
        assert_eq!(window.average()["app1"], 8.0);
    }

    #[test]
    fn noise_is_zeroed_before_the_pad() {
        let demand = effective_demand(&snapshot(&[("app1", 1.5), ("app2", 30.0)]));
        assert_eq!(demand["app1"], 10.0);
        assert_eq!(demand["app2"], 40.0);
    }

    #[test]
    fn designated_app_gets_a_single_pad() {
        let demand = effective_demand(&snapshot(&[("app3", 8.0)]));
        assert_eq!(demand["app3"], 13.0);
    }
}
