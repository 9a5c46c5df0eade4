//! Periodic routing table and data store maintenance.

use std::time::{Duration, Instant};

/// Tracks when the node last ran its maintenance round.
#[derive(Debug)]
pub struct Maintenance {
    last_round: Instant,
    interval: Duration,
}

/// Decisions about what maintenance to perform on a tick.
#[derive(Debug, PartialEq, Eq)]
pub struct MaintenanceDecisions {
    /// Whether to refresh the k-buckets that were not looked up recently.
    pub should_refresh_table: bool,

    /// Whether to republish, replicate, or expire stored values.
    pub should_republish: bool,
}

impl Maintenance {
    /// Run a maintenance round every fifth of the refresh timeout.
    pub fn new(refresh_timeout: Duration) -> Self {
        Maintenance {
            last_round: Instant::now(),
            interval: (refresh_timeout / 5).max(Duration::from_secs(1)),
        }
    }

    pub fn decisions(&mut self, table_is_empty: bool) -> MaintenanceDecisions {
        self.decisions_at(Instant::now(), table_is_empty)
    }

    fn decisions_at(&mut self, now: Instant, table_is_empty: bool) -> MaintenanceDecisions {
        let is_due = now.duration_since(self.last_round) >= self.interval;

        if is_due {
            self.last_round = now;
        }

        MaintenanceDecisions {
            should_refresh_table: is_due && !table_is_empty,
            should_republish: is_due,
        }
    }
}
