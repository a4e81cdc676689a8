//! Multicast transmission-mode scheduling for Wi-Fi access points.
//!
//! Each AP time-multiplexes every multicast group it forwards between:
//! - **DMS**: per-station Direct Multicast Service delivery during a
//!   dedicated window of the AP's cycle, and
//! - **Legacy**: shared-rate multicast for the rest of the cycle, at the
//!   highest rate every subscriber has proven reliable.
//!
//! The crate contains:
//! - [`link_quality`]: per-station best and reliable rates from rate tables
//! - [`arbiter`]: one legacy rate for a group's subscribers
//! - [`period`]: DMS/legacy window sizing and DMS offsets
//! - [`scheduler`]: the per-tick DMS/legacy state machine
//! - [`gateway`]: lifecycle and IGMP membership events
//! - [`runtime`]: worker thread driving ticks and serializing events

pub mod access_point;
pub mod arbiter;
pub mod config;
pub mod gateway;
pub mod link_quality;
pub mod period;
pub mod runtime;
pub mod scheduler;
pub mod sink;
pub mod snapshot;
pub mod station;
pub mod types;

pub use config::{ConfigError, SchedulerConfig};
pub use gateway::{LifecycleEvent, MembershipKind, MembershipReport, SchedulerEvent};
pub use runtime::{SchedulerRuntime, SubmitError};
pub use scheduler::Scheduler;
pub use sink::{ChannelSink, PolicySink, PolicyUpdate};
pub use types::{GroupAddr, HwAddr, ProbSource, Rate, TxMode, TxPolicy};
