//! Per-tick growth accrual.
//!
//! The same arithmetic is used for live sessions and for the offline sweep, so it is
//! kept free of I/O and of the clock: callers pass `now` explicitly.

use chrono::{DateTime, Duration, Utc};

use super::types::{LandPlot, PlayerRecord};
use crate::config::{GrowthPolicy, TickConfig};

/// What one accrual pass did to a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccrualSummary {
    /// Plots whose `grow_time` moved forward.
    pub plots_advanced: usize,
    /// Plots whose fertilizer ran out during this pass.
    pub fertilizer_expired: usize,
}

impl AccrualSummary {
    pub fn changed(&self) -> bool {
        self.plots_advanced > 0 || self.fertilizer_expired > 0
    }
}

/// Outcome for a single plot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotAccrual {
    /// Not dug, not planted, or dead.
    Skipped,
    Applied {
        increase: u64,
        advanced: bool,
        fertilizer_expired: bool,
    },
}

/// Growth to add this tick, before capping. Expires the fertilizer as a side effect.
fn tick_increase(
    plot: &mut LandPlot,
    new_player: bool,
    policy: &GrowthPolicy,
    now: DateTime<Utc>,
) -> (u64, bool) {
    let mut increase = policy.base_increment;
    if new_player {
        increase = increase.saturating_add(policy.new_player_bonus);
    }
    let tier = usize::from(plot.land_level);
    increase = increase.saturating_add(policy.land_level_bonus.get(tier).copied().unwrap_or(0));

    let mut expired = false;
    if plot.fertilized {
        let active = plot.fertilize_started_at.is_some_and(|started| {
            let elapsed = now.signed_duration_since(started).num_seconds();
            elapsed <= plot.fertilize_duration as i64
        });
        if active {
            increase = increase.saturating_add(plot.fertilize_bonus);
        } else {
            plot.clear_fertilizer();
            expired = true;
        }
    } else if plot.fertilize_started_at.is_some() {
        plot.clear_fertilizer();
    }

    (increase.max(1), expired)
}

/// Apply one tick of growth to `plot`.
pub fn accrue_plot(
    plot: &mut LandPlot,
    new_player: bool,
    policy: &GrowthPolicy,
    now: DateTime<Utc>,
) -> PlotAccrual {
    if !plot.dug || !plot.planted || plot.dead {
        return PlotAccrual::Skipped;
    }
    let (increase, fertilizer_expired) = tick_increase(plot, new_player, policy, now);
    let before = plot.grow_time;
    plot.grow_time = before.saturating_add(increase).min(plot.max_grow_time);
    PlotAccrual::Applied {
        increase,
        advanced: plot.grow_time > before,
        fertilizer_expired,
    }
}

/// Apply one tick of growth to every plot of `record`.
pub fn accrue_record(
    record: &mut PlayerRecord,
    policy: &GrowthPolicy,
    now: DateTime<Utc>,
) -> AccrualSummary {
    let new_player = record.is_new_player(now, policy.new_player_window_secs);
    let mut summary = AccrualSummary::default();
    for plot in record.land.iter_mut() {
        if let PlotAccrual::Applied {
            advanced,
            fertilizer_expired,
            ..
        } = accrue_plot(plot, new_player, policy, now)
        {
            if advanced {
                summary.plots_advanced += 1;
            }
            if fertilizer_expired {
                summary.fertilizer_expired += 1;
            }
        }
    }
    summary
}

/// Apply every tick `record` is owed as of `now` and move `updated_at` to the last
/// tick boundary covered. `None` when no full tick has elapsed since the marker.
///
/// At most `tick.max_backlog_secs` worth of ticks are applied; an older marker is
/// treated as if it sat that far back. Once nothing on the farm is growing the
/// remaining ticks cannot change it, so they are settled in one step.
pub fn catch_up(
    record: &mut PlayerRecord,
    policy: &GrowthPolicy,
    tick: &TickConfig,
    now: DateTime<Utc>,
) -> Option<AccrualSummary> {
    let interval_ms = tick.online_interval_ms.max(1) as i64;
    let elapsed = now.signed_duration_since(record.updated_at).num_milliseconds();
    let owed = elapsed / interval_ms;
    if owed <= 0 {
        return None;
    }
    let cap = (tick.max_backlog_secs.saturating_mul(1000) / interval_ms as u64).clamp(1, i64::MAX as u64) as i64;
    let ticks = owed.min(cap);
    let end = if owed > cap {
        now
    } else {
        record.updated_at + Duration::milliseconds(interval_ms * ticks)
    };
    let start = end - Duration::milliseconds(interval_ms * ticks);

    let mut total = AccrualSummary::default();
    for n in 1..=ticks {
        let at = start + Duration::milliseconds(interval_ms * n);
        let step = accrue_record(record, policy, at);
        total.plots_advanced += step.plots_advanced;
        total.fertilizer_expired += step.fertilizer_expired;
        if n < ticks && !record.has_growing_plot() {
            // only fertilizer expiry is left to settle
            let tail = accrue_record(record, policy, end);
            total.fertilizer_expired += tail.fertilizer_expired;
            break;
        }
    }
    record.updated_at = end;
    Some(total)
}
