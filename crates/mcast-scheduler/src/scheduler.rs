//! Per-AP DMS/legacy scheduling.
//!
//! Every tick, each AP with at least one managed group advances its period
//! counter by one (modulo its cycle). Each group is then in DMS mode while
//! the period lies inside its DMS window and in legacy mode otherwise:
//!
//! ```text
//!            offset         offset + dms
//! ───────────┼──────────────┼──────────────────────▶ period
//!   Legacy   │     DMS      │        Legacy
//!                           └─ arbitrate legacy rate, push policy
//! ```
//!
//! The legacy rate is only recomputed on the DMS → legacy edge; while in DMS
//! the AP delivers per station and the shared rate is irrelevant.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::access_point::AccessPoint;
use crate::arbiter::{self, ArbitratedRate};
use crate::config::SchedulerConfig;
use crate::link_quality::{LinkQuality, RatesTable};
use crate::period::PeriodAllocator;
use crate::sink::PolicySink;
use crate::station::Station;
use crate::types::{GroupAddr, HwAddr, ProbSource, Rate, TxMode, TxPolicy};

/// Owns all AP and station state of one controller instance.
///
/// Not internally synchronized: callers serialize events against
/// [`Scheduler::on_tick`], as [`crate::runtime::SchedulerRuntime`] does by
/// owning the scheduler on a single worker thread.
pub struct Scheduler<S: PolicySink + ?Sized> {
    pub(crate) config: SchedulerConfig,
    pub(crate) allocator: PeriodAllocator,
    pub(crate) access_points: BTreeMap<HwAddr, AccessPoint>,
    pub(crate) stations: BTreeMap<HwAddr, Station>,
    pub(crate) sink: Arc<S>,
    ticks: u64,
}

/// Link quality of every station receiving `group` through `ap`.
fn subscribers<'a>(
    stations: &'a BTreeMap<HwAddr, Station>,
    ap: HwAddr,
    group: GroupAddr,
) -> impl Iterator<Item = &'a LinkQuality> + 'a {
    stations
        .values()
        .filter(move |sta| sta.receives(&ap, &group))
        .map(Station::link_quality)
}

pub(crate) fn push<S: PolicySink + ?Sized>(
    sink: &S,
    ap: HwAddr,
    group: GroupAddr,
    policy: TxPolicy,
) {
    if let Err(e) = sink.set_policy(ap, group, policy) {
        warn!(
            ap = %ap,
            group = %group,
            mode = policy.mode.as_str(),
            rate = policy.rate,
            "policy push failed: {}",
            e
        );
    }
}

impl<S: PolicySink + ?Sized> Scheduler<S> {
    pub fn new(config: SchedulerConfig, sink: Arc<S>) -> Self {
        Self {
            allocator: PeriodAllocator::new(&config),
            config,
            access_points: BTreeMap::new(),
            stations: BTreeMap::new(),
            sink,
            ticks: 0,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn access_point(&self, addr: &HwAddr) -> Option<&AccessPoint> {
        self.access_points.get(addr)
    }

    pub fn access_points(&self) -> impl Iterator<Item = &AccessPoint> {
        self.access_points.values()
    }

    pub fn station(&self, addr: &HwAddr) -> Option<&Station> {
        self.stations.get(addr)
    }

    pub fn stations(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    /// Number of ticks executed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Starts tracking a connected AP. Ignored if the AP is already known or
    /// advertises no rates.
    pub fn add_access_point(
        &mut self,
        addr: HwAddr,
        capabilities: impl IntoIterator<Item = Rate>,
    ) -> bool {
        if self.access_points.contains_key(&addr) {
            return false;
        }
        let Some(ap) = AccessPoint::new(addr, capabilities, self.allocator.initial_windows())
        else {
            debug!(ap = %addr, "ignoring access point without supported rates");
            return false;
        };
        info!(
            ap = %addr,
            rates = ?ap.capabilities(),
            dms = ap.windows().dms,
            legacy = ap.windows().legacy,
            "access point up"
        );
        self.access_points.insert(addr, ap);
        true
    }

    /// Drops an AP, all of its group state and every station attached to it.
    pub fn remove_access_point(&mut self, addr: &HwAddr) -> bool {
        let Some(ap) = self.access_points.remove(addr) else {
            return false;
        };
        let before = self.stations.len();
        self.stations.retain(|_, sta| sta.access_point() != *addr);
        info!(
            ap = %addr,
            groups = ap.group_count(),
            stations = before - self.stations.len(),
            "access point down"
        );
        true
    }

    /// Tracks a newly associated station. Duplicate associations and
    /// stations on unknown APs are ignored.
    pub fn add_station(&mut self, addr: HwAddr, access_point: HwAddr) -> bool {
        if self.stations.contains_key(&addr) || !self.access_points.contains_key(&access_point) {
            return false;
        }
        debug!(sta = %addr, ap = %access_point, "station joined");
        self.stations.insert(
            addr,
            Station::new(addr, access_point, self.config.prob_threshold),
        );
        true
    }

    /// Forgets a station and re-arbitrates every group it received, which
    /// falls back to the AP's lowest rate when it was the last subscriber.
    /// Groups stay registered.
    pub fn remove_station(&mut self, addr: &HwAddr) -> bool {
        let Some(station) = self.stations.remove(addr) else {
            return false;
        };
        let ap_addr = station.access_point();
        debug!(sta = %addr, ap = %ap_addr, groups = station.groups().len(), "station left");

        let Some(ap) = self.access_points.get_mut(&ap_addr) else {
            return true;
        };
        let lowest = ap.lowest_rate();
        for group in station.groups() {
            let Some(policy) = ap.group_mut(group) else {
                continue;
            };
            let rates = arbiter::best_rate(subscribers(&self.stations, ap_addr, *group), lowest);
            let tx = policy.apply_arbitration(rates);
            debug!(ap = %ap_addr, group = %group, rate = tx.rate, "re-arbitrated after leave");
            push(&*self.sink, ap_addr, *group, tx);
        }
        true
    }

    /// Applies a fresh link-quality report for a station.
    pub fn update_link_quality(&mut self, addr: &HwAddr, rates: RatesTable) -> bool {
        match self.stations.get_mut(addr) {
            Some(station) => station.link_quality_mut().update(rates),
            None => false,
        }
    }

    /// Records a cumulative counter sample for a managed group.
    pub fn record_traffic(
        &mut self,
        ap: &HwAddr,
        group: &GroupAddr,
        tx_packets: u64,
        tx_bytes: u64,
    ) -> bool {
        match self
            .access_points
            .get_mut(ap)
            .and_then(|ap| ap.group_mut(group))
        {
            Some(policy) => {
                policy.counters.record(tx_packets, tx_bytes);
                true
            }
            None => false,
        }
    }

    /// Selects which arbitration output drives a group's legacy rate from the
    /// next DMS → legacy transition on.
    pub fn set_prob_source(&mut self, ap: &HwAddr, group: &GroupAddr, source: ProbSource) -> bool {
        match self
            .access_points
            .get_mut(ap)
            .and_then(|ap| ap.group_mut(group))
        {
            Some(policy) => {
                policy.prob_source = source;
                true
            }
            None => false,
        }
    }

    /// Legacy rate for `group` on `ap` given current subscriptions and link
    /// quality. `None` if the AP is unknown.
    pub fn best_rate(&self, ap: &HwAddr, group: &GroupAddr) -> Option<ArbitratedRate> {
        let access_point = self.access_points.get(ap)?;
        Some(arbiter::best_rate(
            subscribers(&self.stations, *ap, *group),
            access_point.lowest_rate(),
        ))
    }

    /// Recomputes the DMS windows and offsets of an AP.
    pub fn reallocate(&mut self, ap: &HwAddr) -> bool {
        match self.access_points.get_mut(ap) {
            Some(access_point) => self.allocator.reallocate(access_point),
            None => false,
        }
    }

    /// Advances every active AP by one period and applies mode transitions.
    pub fn on_tick(&mut self) {
        self.ticks += 1;
        let stations = &self.stations;
        let sink = &*self.sink;

        for ap in self.access_points.values_mut() {
            if ap.group_count() == 0 {
                continue;
            }
            let period = ap.advance_period();
            let dms_len = ap.windows().dms;
            let addr = ap.addr();
            let lowest = ap.lowest_rate();

            for policy in ap.groups_mut() {
                if policy.in_dms_window(period, dms_len) {
                    if policy.mode != TxMode::Dms {
                        policy.mode = TxMode::Dms;
                        debug!(ap = %addr, group = %policy.group, period, "dms window open");
                        push(sink, addr, policy.group, policy.policy());
                    }
                } else if policy.mode == TxMode::Dms {
                    let rates =
                        arbiter::best_rate(subscribers(stations, addr, policy.group), lowest);
                    let tx = policy.apply_arbitration(rates);
                    debug!(
                        ap = %addr,
                        group = %policy.group,
                        period,
                        ewma_rate = rates.ewma_rate,
                        cur_prob_rate = rates.cur_prob_rate,
                        source = policy.prob_source.as_str(),
                        "dms window closed"
                    );
                    push(sink, addr, policy.group, tx);
                }
            }
        }
    }
}
