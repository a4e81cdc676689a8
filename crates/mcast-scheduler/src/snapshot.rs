//! Serializable status view of the scheduler.

use serde::Serialize;

use crate::access_point::{AccessPoint, GroupPolicy};
use crate::scheduler::Scheduler;
use crate::sink::PolicySink;
use crate::station::Station;
use crate::types::{GroupAddr, HwAddr, Rate};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerSnapshot {
    pub ticks: u64,
    pub access_points: Vec<AccessPointSnapshot>,
    pub stations: Vec<StationSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessPointSnapshot {
    pub addr: HwAddr,
    pub capabilities: Vec<Rate>,
    pub dms_window: u32,
    pub legacy_window: u32,
    pub current_period: u32,
    pub attached_stations: usize,
    pub groups: Vec<GroupPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationSnapshot {
    pub addr: HwAddr,
    pub access_point: HwAddr,
    pub groups: Vec<GroupAddr>,
    pub has_link_report: bool,
    pub best_ewma_rate: Rate,
    pub best_cur_prob_rate: Rate,
    pub reliable_ewma_rates: Vec<Rate>,
    pub reliable_cur_prob_rates: Vec<Rate>,
}

impl AccessPointSnapshot {
    fn new(ap: &AccessPoint, attached_stations: usize) -> Self {
        let windows = ap.windows();
        Self {
            addr: ap.addr(),
            capabilities: ap.capabilities().to_vec(),
            dms_window: windows.dms,
            legacy_window: windows.legacy,
            current_period: ap.current_period(),
            attached_stations,
            groups: ap.groups().to_vec(),
        }
    }
}

impl From<&Station> for StationSnapshot {
    fn from(sta: &Station) -> Self {
        let best = sta.link_quality().best_rates();
        Self {
            addr: sta.addr(),
            access_point: sta.access_point(),
            groups: sta.groups().iter().copied().collect(),
            has_link_report: sta.link_quality().has_report(),
            best_ewma_rate: best.ewma_rate,
            best_cur_prob_rate: best.cur_prob_rate,
            reliable_ewma_rates: best.reliable_ewma.keys().copied().collect(),
            reliable_cur_prob_rates: best.reliable_cur_prob.keys().copied().collect(),
        }
    }
}

impl SchedulerSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl<S: PolicySink + ?Sized> Scheduler<S> {
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let access_points = self
            .access_points()
            .map(|ap| {
                let attached = self
                    .stations()
                    .filter(|sta| sta.access_point() == ap.addr())
                    .count();
                AccessPointSnapshot::new(ap, attached)
            })
            .collect();
        SchedulerSnapshot {
            ticks: self.ticks(),
            access_points,
            stations: self.stations().map(StationSnapshot::from).collect(),
        }
    }
}
