//! Process-wide counters for the network, tick and maintenance paths.
//! Read through [`snapshot`]; the `status` subcommand and sweep debug logs print them.
use std::sync::atomic::{AtomicU64, Ordering};

static CONNECTIONS_ACCEPTED: AtomicU64 = AtomicU64::new(0);
static CONNECTIONS_CLOSED: AtomicU64 = AtomicU64::new(0);
static FRAMES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static PROTOCOL_ERRORS: AtomicU64 = AtomicU64::new(0);
static HANDLER_PANICS: AtomicU64 = AtomicU64::new(0);
static ONLINE_TICKS: AtomicU64 = AtomicU64::new(0);
static OFFLINE_SWEEPS: AtomicU64 = AtomicU64::new(0);
static PLOTS_ACCRUED: AtomicU64 = AtomicU64::new(0);
static STORAGE_FAILURES: AtomicU64 = AtomicU64::new(0);
static MAINTENANCE_RUNS: AtomicU64 = AtomicU64::new(0);

pub fn inc_connections_accepted() {
    CONNECTIONS_ACCEPTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_connections_closed() {
    CONNECTIONS_CLOSED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frames_received() {
    FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_protocol_errors() {
    PROTOCOL_ERRORS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_handler_panics() {
    HANDLER_PANICS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_online_ticks() {
    ONLINE_TICKS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_offline_sweeps() {
    OFFLINE_SWEEPS.fetch_add(1, Ordering::Relaxed);
}
pub fn add_plots_accrued(n: u64) {
    PLOTS_ACCRUED.fetch_add(n, Ordering::Relaxed);
}
pub fn inc_storage_failures() {
    STORAGE_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_maintenance_runs() {
    MAINTENANCE_RUNS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub frames_received: u64,
    pub protocol_errors: u64,
    pub handler_panics: u64,
    pub online_ticks: u64,
    pub offline_sweeps: u64,
    pub plots_accrued: u64,
    pub storage_failures: u64,
    pub maintenance_runs: u64,
}

impl Snapshot {
    pub fn connections_open(&self) -> u64 {
        self.connections_accepted
            .saturating_sub(self.connections_closed)
    }
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        connections_accepted: CONNECTIONS_ACCEPTED.load(Ordering::Relaxed),
        connections_closed: CONNECTIONS_CLOSED.load(Ordering::Relaxed),
        frames_received: FRAMES_RECEIVED.load(Ordering::Relaxed),
        protocol_errors: PROTOCOL_ERRORS.load(Ordering::Relaxed),
        handler_panics: HANDLER_PANICS.load(Ordering::Relaxed),
        online_ticks: ONLINE_TICKS.load(Ordering::Relaxed),
        offline_sweeps: OFFLINE_SWEEPS.load(Ordering::Relaxed),
        plots_accrued: PLOTS_ACCRUED.load(Ordering::Relaxed),
        storage_failures: STORAGE_FAILURES.load(Ordering::Relaxed),
        maintenance_runs: MAINTENANCE_RUNS.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_only_move_forward() {
        let before = snapshot();
        inc_connections_accepted();
        add_plots_accrued(3);
        inc_maintenance_runs();
        let after = snapshot();
        // other tests run in parallel, so compare with >=
        assert!(after.connections_accepted > before.connections_accepted);
        assert!(after.plots_accrued >= before.plots_accrued + 3);
        assert!(after.maintenance_runs > before.maintenance_runs);
    }
}
