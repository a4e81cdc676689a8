//! DMS/legacy window sizing and per-group DMS offset assignment.
//!
//! Each AP repeats a cycle of `dms + legacy` ticks. Every managed group owns a
//! DMS window of `dms` ticks starting at its offset and spends the rest of the
//! cycle in legacy mode. The more groups an AP serves, the shorter the DMS
//! window, bounded by the configured minimum and maximum:
//!
//! ```text
//! dms    = max(ceil(min / tick), min(floor(max / tick), floor(period / n / tick)))
//! legacy = max(floor(period / tick) - dms, 1)
//! ```
//!
//! Offsets are handed out round-robin over `floor(cycle / dms)` blocks. With
//! more groups than blocks, groups share blocks.

use serde::Serialize;

use crate::access_point::AccessPoint;
use crate::config::SchedulerConfig;

/// Window lengths of one AP, in ticks. Both are always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Windows {
    pub dms: u32,
    pub legacy: u32,
}

impl Windows {
    pub fn cycle(&self) -> u32 {
        self.dms.saturating_add(self.legacy)
    }

    /// Number of whole DMS blocks that fit in one cycle.
    pub fn blocks(&self) -> u32 {
        (self.cycle() / self.dms.max(1)).max(1)
    }

    /// DMS start offset for the group at position `index` in the AP's
    /// managed-group order.
    pub fn offset_for(&self, index: usize) -> u32 {
        let block = (index % self.blocks() as usize) as u32;
        block * self.dms
    }
}

fn ticks(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy)]
pub struct PeriodAllocator {
    tick_ms: u64,
    period_length_ms: u64,
    dms_min_length_ms: u64,
    dms_max_length_ms: u64,
}

impl PeriodAllocator {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            tick_ms: config.tick_ms.max(1),
            period_length_ms: config.period_length_ms,
            dms_min_length_ms: config.dms_min_length_ms,
            dms_max_length_ms: config.dms_max_length_ms,
        }
    }

    fn min_dms(&self) -> u32 {
        ticks(self.dms_min_length_ms.div_ceil(self.tick_ms)).max(1)
    }

    fn max_dms(&self) -> u32 {
        ticks(self.dms_max_length_ms / self.tick_ms)
    }

    fn with_dms(&self, dms: u32) -> Windows {
        let dms = dms.max(1);
        let period = ticks(self.period_length_ms / self.tick_ms);
        Windows {
            dms,
            legacy: period.saturating_sub(dms).max(1),
        }
    }

    /// Windows of an AP with no managed groups.
    pub fn initial_windows(&self) -> Windows {
        self.with_dms(self.min_dms().max(self.max_dms()))
    }

    pub fn windows_for(&self, group_count: usize) -> Windows {
        if group_count == 0 {
            return self.initial_windows();
        }
        let share = ticks(self.period_length_ms / group_count as u64 / self.tick_ms);
        self.with_dms(self.min_dms().max(self.max_dms().min(share)))
    }

    /// Recomputes the AP's windows after its group set changed and, when they
    /// moved or the groups no longer fit, reassigns every DMS offset.
    ///
    /// Returns whether offsets were reassigned. Unchanged windows without
    /// overlap leave in-flight schedules untouched.
    pub fn reallocate(&self, ap: &mut AccessPoint) -> bool {
        let group_count = ap.group_count();
        let windows = self.windows_for(group_count);
        let overlap = u64::from(windows.dms) * group_count as u64 > u64::from(windows.cycle());

        if !overlap && windows == ap.windows() {
            return false;
        }

        ap.set_windows(windows);
        if group_count == 0 {
            return true;
        }
        for (index, group) in ap.groups_mut().iter_mut().enumerate() {
            group.dms_start_offset = windows.offset_for(index);
        }
        tracing::debug!(
            ap = %ap.addr(),
            dms = windows.dms,
            legacy = windows.legacy,
            groups = group_count,
            overlap,
            "reassigned dms offsets"
        );
        true
    }
}
