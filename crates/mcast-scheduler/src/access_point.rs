use serde::Serialize;

use crate::arbiter::ArbitratedRate;
use crate::period::Windows;
use crate::types::{GroupAddr, HwAddr, ProbSource, Rate, TxMode, TxPolicy};

/// Cumulative transmit counters for one group and the delta since the
/// previous sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficCounters {
    pub last_tx_packets: u64,
    pub last_tx_bytes: u64,
    #[serde(skip)]
    cumulative_packets: Option<u64>,
    #[serde(skip)]
    cumulative_bytes: Option<u64>,
}

fn delta(previous: Option<u64>, raw: u64) -> u64 {
    match previous {
        Some(prev) if raw >= prev => raw - prev,
        // first sample, or the counter was reset on the AP
        _ => raw,
    }
}

impl TrafficCounters {
    pub fn record(&mut self, tx_packets: u64, tx_bytes: u64) {
        self.last_tx_packets = delta(self.cumulative_packets, tx_packets);
        self.last_tx_bytes = delta(self.cumulative_bytes, tx_bytes);
        self.cumulative_packets = Some(tx_packets);
        self.cumulative_bytes = Some(tx_bytes);
    }
}

/// Transmission-policy state of one managed group on one AP.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupPolicy {
    pub group: GroupAddr,
    pub dms_start_offset: u32,
    pub mode: TxMode,
    /// Last EWMA-derived legacy rate.
    pub rate: Rate,
    /// Last cur-prob-derived legacy rate.
    pub cur_prob_rate: Rate,
    pub prob_source: ProbSource,
    pub counters: TrafficCounters,
}

impl GroupPolicy {
    fn new(group: GroupAddr, rate: Rate, prob_source: ProbSource, dms_start_offset: u32) -> Self {
        Self {
            group,
            dms_start_offset,
            mode: TxMode::Legacy,
            rate,
            cur_prob_rate: rate,
            prob_source,
            counters: TrafficCounters::default(),
        }
    }

    /// Rate selected by the group's probability source.
    pub fn legacy_rate(&self) -> Rate {
        match self.prob_source {
            ProbSource::Ewma => self.rate,
            ProbSource::CurProb => self.cur_prob_rate,
        }
    }

    pub fn in_dms_window(&self, period: u32, dms_len: u32) -> bool {
        period >= self.dms_start_offset && period < self.dms_start_offset + dms_len
    }

    /// Applies an arbitration result and switches to legacy mode.
    pub fn apply_arbitration(&mut self, rates: ArbitratedRate) -> TxPolicy {
        self.rate = rates.ewma_rate;
        self.cur_prob_rate = rates.cur_prob_rate;
        self.mode = TxMode::Legacy;
        self.policy()
    }

    pub fn policy(&self) -> TxPolicy {
        TxPolicy {
            mode: self.mode,
            rate: self.legacy_rate(),
        }
    }
}

/// An access point managed by the scheduler.
///
/// Group policies live in one ordered vector: insertion order drives DMS
/// offset assignment, and a group's address, offset and policy can never
/// drift apart.
#[derive(Debug, Clone)]
pub struct AccessPoint {
    addr: HwAddr,
    capabilities: Vec<Rate>,
    windows: Windows,
    current_period: u32,
    next_period: u32,
    groups: Vec<GroupPolicy>,
}

impl AccessPoint {
    /// Returns `None` when the AP advertises no rates.
    pub fn new(
        addr: HwAddr,
        capabilities: impl IntoIterator<Item = Rate>,
        windows: Windows,
    ) -> Option<Self> {
        let mut capabilities: Vec<Rate> =
            capabilities.into_iter().filter(|r| *r > 0).collect();
        capabilities.sort_unstable();
        capabilities.dedup();
        if capabilities.is_empty() {
            return None;
        }
        Some(Self {
            addr,
            capabilities,
            windows,
            current_period: 0,
            next_period: 0,
            groups: Vec::new(),
        })
    }

    pub fn addr(&self) -> HwAddr {
        self.addr
    }

    /// Supported rates, ascending.
    pub fn capabilities(&self) -> &[Rate] {
        &self.capabilities
    }

    pub fn lowest_rate(&self) -> Rate {
        self.capabilities[0]
    }

    pub fn windows(&self) -> Windows {
        self.windows
    }

    /// Replaces the window lengths, keeping the period counters inside the
    /// new cycle.
    pub fn set_windows(&mut self, windows: Windows) {
        self.windows = windows;
        let cycle = windows.cycle().max(1);
        self.current_period %= cycle;
        self.next_period %= cycle;
    }

    pub fn current_period(&self) -> u32 {
        self.current_period
    }

    /// Moves to the next period of the cycle and returns it.
    pub fn advance_period(&mut self) -> u32 {
        self.current_period = self.next_period;
        self.next_period = (self.next_period + 1) % self.windows.cycle().max(1);
        self.current_period
    }

    pub fn groups(&self) -> &[GroupPolicy] {
        &self.groups
    }

    pub(crate) fn groups_mut(&mut self) -> &mut [GroupPolicy] {
        &mut self.groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group(&self, group: &GroupAddr) -> Option<&GroupPolicy> {
        self.groups.iter().find(|p| p.group == *group)
    }

    pub fn group_mut(&mut self, group: &GroupAddr) -> Option<&mut GroupPolicy> {
        self.groups.iter_mut().find(|p| p.group == *group)
    }

    pub fn contains_group(&self, group: &GroupAddr) -> bool {
        self.group(group).is_some()
    }

    /// Starts managing `group` in legacy mode at the lowest rate. The group
    /// takes the offset round-robin assignment gives its position. Returns
    /// `false` if it was already managed.
    pub fn insert_group(&mut self, group: GroupAddr, prob_source: ProbSource) -> bool {
        if self.contains_group(&group) {
            return false;
        }
        let offset = self.windows.offset_for(self.groups.len());
        let lowest = self.lowest_rate();
        self.groups.push(GroupPolicy::new(group, lowest, prob_source, offset));
        true
    }

    /// Puts a group back to legacy mode at the lowest capability rate.
    pub fn demote_group(&mut self, group: &GroupAddr) -> Option<TxPolicy> {
        let lowest = self.lowest_rate();
        let policy = self.group_mut(group)?;
        policy.mode = TxMode::Legacy;
        policy.rate = lowest;
        policy.cur_prob_rate = lowest;
        Some(policy.policy())
    }
}
