//! Addresses, rates and transmission modes shared by every scheduler module.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use macaddr::MacAddr6;
use serde::{Deserialize, Serialize, Serializer};

/// Legacy transmission rate, in the unit used by the AP capability table
/// (integral Mbps for 802.11a/g rates).
pub type Rate = u32;

/// 48-bit IEEE 802 hardware address identifying an access point or station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HwAddr(pub MacAddr6);

impl HwAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        let [a, b, c, d, e, f] = octets;
        Self(MacAddr6::new(a, b, c, d, e, f))
    }

    pub fn octets(&self) -> [u8; 6] {
        let mut octets = [0u8; 6];
        octets.copy_from_slice(self.0.as_bytes());
        octets
    }

    /// True for group (multicast/broadcast) addresses: I/G bit set.
    pub fn is_multicast(&self) -> bool {
        self.0.is_multicast()
    }
}

impl Default for HwAddr {
    fn default() -> Self {
        Self(MacAddr6::nil())
    }
}

impl From<MacAddr6> for HwAddr {
    fn from(addr: MacAddr6) -> Self {
        Self(addr)
    }
}

impl std::ops::Deref for HwAddr {
    type Target = MacAddr6;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for HwAddr {
    type Err = macaddr::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(HwAddr)
    }
}

impl fmt::Display for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for HwAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Multicast group as seen on the wireless side: the group's link-layer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct GroupAddr(HwAddr);

impl GroupAddr {
    pub const fn new(addr: HwAddr) -> Self {
        Self(addr)
    }

    /// Maps an IPv4 multicast group onto `01:00:5E` plus its low 23 bits
    /// (RFC 1112). `None` outside 224.0.0.0/4.
    pub fn from_ipv4(ip: Ipv4Addr) -> Option<Self> {
        if !ip.is_multicast() {
            return None;
        }
        let o = ip.octets();
        Some(Self(HwAddr::new([0x01, 0x00, 0x5E, o[1] & 0x7F, o[2], o[3]])))
    }

    pub fn hwaddr(&self) -> HwAddr {
        self.0
    }
}

impl fmt::Display for GroupAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<HwAddr> for GroupAddr {
    fn from(addr: HwAddr) -> Self {
        Self(addr)
    }
}

/// Multicast transmission mode applied by an AP to one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxMode {
    /// Per-station Direct Multicast Service delivery.
    Dms,
    /// Shared-rate legacy multicast.
    #[default]
    Legacy,
}

impl TxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxMode::Dms => "dms",
            TxMode::Legacy => "legacy",
        }
    }
}

/// Which probability metric drives a group's legacy rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbSource {
    #[default]
    Ewma,
    CurProb,
}

impl ProbSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbSource::Ewma => "ewma",
            ProbSource::CurProb => "cur_prob",
        }
    }
}

/// Delivery policy pushed to an AP for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TxPolicy {
    pub mode: TxMode,
    pub rate: Rate,
}
