//! Translation of lifecycle and membership events into scheduler state.
//!
//! Membership reports follow the IGMP source-filter model: a report for
//! `INCLUDE` mode (with an empty source list) means the station wants *no*
//! traffic for the group, while `EXCLUDE` mode means it wants all of it.
//! Hence `MODE_IS_INCLUDE`/`CHANGE_TO_INCLUDE` unregister and
//! `MODE_IS_EXCLUDE`/`CHANGE_TO_EXCLUDE` register. Source list changes and
//! queries do not alter the scheduler.

use tracing::{debug, info};

use crate::link_quality::RatesTable;
use crate::scheduler::{push, Scheduler};
use crate::sink::PolicySink;
use crate::types::{GroupAddr, HwAddr, ProbSource, Rate};

/// Membership record or message type, as decoded from IGMPv1/v2/v3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipKind {
    V3ModeIsInclude,
    V3ModeIsExclude,
    V3ChangeToInclude,
    V3ChangeToExclude,
    V3AllowNewSources,
    V3BlockOldSources,
    V2JoinGroup,
    V2LeaveGroup,
    V1MembershipReport,
    V1V2MembershipQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipAction {
    Register,
    Unregister,
    Query,
}

impl MembershipKind {
    pub fn action(self) -> MembershipAction {
        use MembershipKind::*;
        match self {
            V3ModeIsExclude | V3ChangeToExclude | V2JoinGroup | V1MembershipReport => {
                MembershipAction::Register
            }
            V3ModeIsInclude | V3ChangeToInclude | V2LeaveGroup => MembershipAction::Unregister,
            V3AllowNewSources | V3BlockOldSources | V1V2MembershipQuery => MembershipAction::Query,
        }
    }
}

/// A decoded membership report from a station, relayed by its AP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipReport {
    pub kind: MembershipKind,
    pub station: HwAddr,
    pub group: GroupAddr,
    pub access_point: HwAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    AccessPointConnected { addr: HwAddr, capabilities: Vec<Rate> },
    AccessPointDisconnected { addr: HwAddr },
    StationAssociated { addr: HwAddr, access_point: HwAddr },
    StationDisassociated { addr: HwAddr },
}

/// Everything the scheduler consumes from the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Lifecycle(LifecycleEvent),
    Membership(MembershipReport),
    /// An AP saw traffic for a multicast address no station reported yet.
    IncomingGroup { access_point: HwAddr, group: GroupAddr },
    LinkQuality { station: HwAddr, rates: RatesTable },
    TrafficCounters {
        access_point: HwAddr,
        group: GroupAddr,
        tx_packets: u64,
        tx_bytes: u64,
    },
    SetProbSource {
        access_point: HwAddr,
        group: GroupAddr,
        source: ProbSource,
    },
}

impl<S: PolicySink + ?Sized> Scheduler<S> {
    /// Applies one external event. Events naming unknown entities are
    /// dropped.
    pub fn handle_event(&mut self, event: SchedulerEvent) {
        let applied = match &event {
            SchedulerEvent::Lifecycle(LifecycleEvent::AccessPointConnected {
                addr,
                capabilities,
            }) => self.add_access_point(*addr, capabilities.iter().copied()),
            SchedulerEvent::Lifecycle(LifecycleEvent::AccessPointDisconnected { addr }) => {
                self.remove_access_point(addr)
            }
            SchedulerEvent::Lifecycle(LifecycleEvent::StationAssociated { addr, access_point }) => {
                self.add_station(*addr, *access_point)
            }
            SchedulerEvent::Lifecycle(LifecycleEvent::StationDisassociated { addr }) => {
                self.remove_station(addr)
            }
            SchedulerEvent::Membership(report) => self.handle_membership(*report),
            SchedulerEvent::IncomingGroup {
                access_point,
                group,
            } => self.register(None, *group, *access_point),
            SchedulerEvent::LinkQuality { station, rates } => {
                self.update_link_quality(station, rates.clone())
            }
            SchedulerEvent::TrafficCounters {
                access_point,
                group,
                tx_packets,
                tx_bytes,
            } => self.record_traffic(access_point, group, *tx_packets, *tx_bytes),
            SchedulerEvent::SetProbSource {
                access_point,
                group,
                source,
            } => self.set_prob_source(access_point, group, *source),
        };
        if !applied {
            debug!(?event, "event not applied");
        }
    }

    /// Dispatches a membership report. Reports from unknown stations or
    /// through unknown APs are dropped.
    pub fn handle_membership(&mut self, report: MembershipReport) -> bool {
        if !self.access_points.contains_key(&report.access_point)
            || !self.stations.contains_key(&report.station)
        {
            return false;
        }
        match report.kind.action() {
            MembershipAction::Register => {
                self.register(Some(report.station), report.group, report.access_point)
            }
            MembershipAction::Unregister => {
                self.unregister(Some(report.station), report.group, report.access_point)
            }
            MembershipAction::Query => true,
        }
    }

    /// Makes `ap` forward `group` and, if given and known, subscribes
    /// `station` to it.
    ///
    /// A group new to the AP starts in legacy mode at the AP's lowest rate,
    /// and the AP's DMS windows are reallocated.
    pub fn register(&mut self, station: Option<HwAddr>, group: GroupAddr, ap: HwAddr) -> bool {
        let Some(access_point) = self.access_points.get_mut(&ap) else {
            return false;
        };

        if access_point.insert_group(group, self.config.prob_source) {
            self.allocator.reallocate(access_point);
            if let Some(policy) = access_point.group(&group) {
                info!(
                    ap = %ap,
                    group = %group,
                    offset = policy.dms_start_offset,
                    groups = access_point.group_count(),
                    "multicast group registered"
                );
                push(&*self.sink, ap, group, policy.policy());
            }
        }

        if let Some(sta) = station.and_then(|addr| self.stations.get_mut(&addr)) {
            if sta.subscribe(group) {
                debug!(sta = %sta.addr(), group = %group, "station subscribed");
            }
        }
        true
    }

    /// Unsubscribes `station` from `group`. Once no station on `ap` receives
    /// the group any more, its policy drops to legacy at the lowest rate.
    /// The group itself stays registered on the AP.
    pub fn unregister(&mut self, station: Option<HwAddr>, group: GroupAddr, ap: HwAddr) -> bool {
        if let Some(sta) = station.and_then(|addr| self.stations.get_mut(&addr)) {
            if sta.unsubscribe(&group) {
                debug!(sta = %sta.addr(), group = %group, "station unsubscribed");
            }
        }

        if self.stations.values().any(|sta| sta.receives(&ap, &group)) {
            return true;
        }
        let Some(access_point) = self.access_points.get_mut(&ap) else {
            return false;
        };
        if let Some(policy) = access_point.demote_group(&group) {
            debug!(ap = %ap, group = %group, rate = policy.rate, "last subscriber gone");
            push(&*self.sink, ap, group, policy);
        }
        true
    }
}
