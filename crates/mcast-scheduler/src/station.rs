use std::collections::BTreeSet;

use crate::link_quality::LinkQuality;
use crate::types::{GroupAddr, HwAddr};

/// An associated client station.
#[derive(Debug, Clone)]
pub struct Station {
    addr: HwAddr,
    access_point: HwAddr,
    groups: BTreeSet<GroupAddr>,
    link_quality: LinkQuality,
}

impl Station {
    pub fn new(addr: HwAddr, access_point: HwAddr, prob_threshold: u8) -> Self {
        Self {
            addr,
            access_point,
            groups: BTreeSet::new(),
            link_quality: LinkQuality::new(prob_threshold),
        }
    }

    pub fn addr(&self) -> HwAddr {
        self.addr
    }

    /// AP the station is scheduled on.
    pub fn access_point(&self) -> HwAddr {
        self.access_point
    }

    pub fn groups(&self) -> &BTreeSet<GroupAddr> {
        &self.groups
    }

    pub fn is_subscribed(&self, group: &GroupAddr) -> bool {
        self.groups.contains(group)
    }

    /// Whether this station receives `group` through `ap`.
    pub fn receives(&self, ap: &HwAddr, group: &GroupAddr) -> bool {
        self.access_point == *ap && self.groups.contains(group)
    }

    pub fn subscribe(&mut self, group: GroupAddr) -> bool {
        self.groups.insert(group)
    }

    pub fn unsubscribe(&mut self, group: &GroupAddr) -> bool {
        self.groups.remove(group)
    }

    pub fn link_quality(&self) -> &LinkQuality {
        &self.link_quality
    }

    pub fn link_quality_mut(&mut self) -> &mut LinkQuality {
        &mut self.link_quality
    }
}
