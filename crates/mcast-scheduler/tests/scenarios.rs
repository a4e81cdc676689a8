//! End-to-end scheduler scenarios.
//!
//! Drives the scheduler through lifecycle, membership and link-quality
//! events the way the controller's event bus would, and checks:
//! 1. Window sizing and DMS offsets as groups are registered
//! 2. Best-rate estimation quirks for a single station
//! 3. Rate agreement between subscribers of one group
//! 4. Fallback when the last subscriber leaves
//! 5. Event flow through the runtime worker into a channel sink

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcast_scheduler::link_quality::{RateStats, RatesTable};
use mcast_scheduler::{
    ChannelSink, GroupAddr, HwAddr, LifecycleEvent, MembershipKind, MembershipReport,
    PolicySink, PolicyUpdate, Rate, Scheduler, SchedulerConfig, SchedulerEvent,
    SchedulerRuntime, TxMode, TxPolicy,
};

// ─── Mock sink ───────────────────────────────────────────────────────────

#[derive(Default)]
struct MockSink {
    updates: Mutex<Vec<PolicyUpdate>>,
}

impl MockSink {
    fn take(&self) -> Vec<PolicyUpdate> {
        std::mem::take(&mut *self.updates.lock().unwrap())
    }
}

impl PolicySink for MockSink {
    fn set_policy(&self, ap: HwAddr, group: GroupAddr, policy: TxPolicy) -> anyhow::Result<()> {
        self.updates
            .lock()
            .unwrap()
            .push(PolicyUpdate { ap, group, policy });
        Ok(())
    }
}

const AP: HwAddr = HwAddr::new([0x00, 0x0D, 0xB9, 0x2F, 0x56, 0x64]);
const CAPABILITIES: [Rate; 8] = [6, 9, 12, 18, 24, 36, 48, 54];

fn sta(n: u8) -> HwAddr {
    HwAddr::new([0x60, 0xF1, 0x89, 0x00, 0x00, n])
}

fn group(n: u8) -> GroupAddr {
    GroupAddr::from_ipv4(std::net::Ipv4Addr::new(239, 0, 0, n)).unwrap()
}

fn setup() -> (Scheduler<MockSink>, Arc<MockSink>) {
    let sink = Arc::new(MockSink::default());
    let mut sched = Scheduler::new(SchedulerConfig::default(), sink.clone());
    sched.handle_event(SchedulerEvent::Lifecycle(
        LifecycleEvent::AccessPointConnected {
            addr: AP,
            capabilities: CAPABILITIES.to_vec(),
        },
    ));
    (sched, sink)
}

fn join(sched: &mut Scheduler<MockSink>, station: HwAddr, g: GroupAddr) {
    sched.handle_event(SchedulerEvent::Lifecycle(LifecycleEvent::StationAssociated {
        addr: station,
        access_point: AP,
    }));
    sched.handle_event(SchedulerEvent::Membership(MembershipReport {
        kind: MembershipKind::V2JoinGroup,
        station,
        group: g,
        access_point: AP,
    }));
}

/// Table where `reliable` rates sit at 99% and every other rate at 50%.
fn table_with_reliable(reliable: &[Rate]) -> RatesTable {
    CAPABILITIES
        .iter()
        .map(|&rate| {
            let prob = if reliable.contains(&rate) { 99.0 } else { 50.0 };
            (
                rate,
                RateStats {
                    ewma_prob: prob,
                    cur_prob: prob,
                },
            )
        })
        .collect()
}

fn report_link_quality(sched: &mut Scheduler<MockSink>, station: HwAddr, rates: RatesTable) {
    sched.handle_event(SchedulerEvent::LinkQuality { station, rates });
}

// ─── Window allocation ───────────────────────────────────────────────────

/// The first group gets the maximum DMS window (500 ms / 50 ms) at offset 0.
#[test]
fn first_group_gets_max_dms_window() {
    let (mut sched, sink) = setup();
    sched.register(None, group(1), AP);

    let ap = sched.access_point(&AP).unwrap();
    assert_eq!(ap.windows().dms, 10);
    assert_eq!(ap.windows().legacy, 50);
    assert_eq!(ap.group(&group(1)).unwrap().dms_start_offset, 0);

    let updates = sink.take();
    assert_eq!(updates.len(), 1);
    assert_eq!(
        updates[0].policy,
        TxPolicy {
            mode: TxMode::Legacy,
            rate: 6
        }
    );
}

/// floor(3000 / 2 / 50) = 30 still exceeds the 10-tick maximum, so two
/// groups keep 10-tick windows in consecutive blocks.
#[test]
fn two_groups_take_consecutive_blocks() {
    let (mut sched, _sink) = setup();
    sched.register(None, group(1), AP);
    sched.register(None, group(2), AP);

    let ap = sched.access_point(&AP).unwrap();
    assert_eq!(ap.windows().dms, 10);
    assert_eq!(ap.windows().legacy, 50);
    assert_eq!(ap.group(&group(1)).unwrap().dms_start_offset, 0);
    assert_eq!(ap.group(&group(2)).unwrap().dms_start_offset, 10);
}

/// A seventh group shrinks the window to floor(3000 / 7 / 50) = 8 ticks and
/// every offset is reassigned on the new block grid.
#[test]
fn shrinking_window_reassigns_all_offsets() {
    let (mut sched, _sink) = setup();
    for n in 1..=6 {
        sched.register(None, group(n), AP);
    }
    let before: Vec<u32> = sched
        .access_point(&AP)
        .unwrap()
        .groups()
        .iter()
        .map(|g| g.dms_start_offset)
        .collect();
    assert_eq!(before, vec![0, 10, 20, 30, 40, 50]);

    sched.register(None, group(7), AP);
    let ap = sched.access_point(&AP).unwrap();
    assert_eq!(ap.windows().dms, 8);
    assert_eq!(ap.windows().legacy, 52);
    let after: Vec<u32> = ap.groups().iter().map(|g| g.dms_start_offset).collect();
    assert_eq!(after, vec![0, 8, 16, 24, 32, 40, 48]);
}

/// With more groups than blocks, offsets wrap and groups share DMS windows.
#[test]
fn excess_groups_share_blocks() {
    let (mut sched, _sink) = setup();
    for n in 1..=20 {
        sched.register(None, group(n), AP);
    }
    let ap = sched.access_point(&AP).unwrap();
    assert_eq!(ap.windows().dms, 4);
    assert_eq!(ap.windows().legacy, 56);
    let offsets: Vec<u32> = ap.groups().iter().map(|g| g.dms_start_offset).collect();
    assert_eq!(offsets[14], 56);
    assert_eq!(offsets[15], 0);
    assert_eq!(offsets[19], 16);
    assert!(offsets.iter().all(|o| o + 4 <= 60));
}

// ─── Link quality and arbitration ────────────────────────────────────────

/// Rate 9 wins on EWMA probability and is substituted by 12.
#[test]
fn quirk_rate_resolves_to_twelve() {
    let (mut sched, _sink) = setup();
    join(&mut sched, sta(1), group(1));

    let mut rates: RatesTable = CAPABILITIES
        .iter()
        .map(|&rate| {
            (
                rate,
                RateStats {
                    ewma_prob: 60.0,
                    cur_prob: 60.0,
                },
            )
        })
        .collect();
    rates.insert(
        9,
        RateStats {
            ewma_prob: 98.0,
            cur_prob: 90.0,
        },
    );
    report_link_quality(&mut sched, sta(1), rates);

    let best = sched.station(&sta(1)).unwrap().link_quality().best_rates();
    assert_eq!(best.ewma_rate, 12);
}

/// Reliable sets {24, 36} and {36, 48} agree on 36.
#[test]
fn subscribers_agree_on_common_reliable_rate() {
    let (mut sched, sink) = setup();
    join(&mut sched, sta(1), group(1));
    join(&mut sched, sta(2), group(1));
    report_link_quality(&mut sched, sta(1), table_with_reliable(&[24, 36]));
    report_link_quality(&mut sched, sta(2), table_with_reliable(&[36, 48]));

    assert_eq!(sched.best_rate(&AP, &group(1)).unwrap().ewma_rate, 36);

    // the rate is applied when the DMS window closes
    sink.take();
    for _ in 0..11 {
        sched.on_tick();
    }
    let updates = sink.take();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].policy.mode, TxMode::Dms);
    assert_eq!(
        updates[1].policy,
        TxPolicy {
            mode: TxMode::Legacy,
            rate: 36
        }
    );
}

/// A subscriber with no reliable rate drags the group down to the weakest
/// best-rate estimate.
#[test]
fn weak_subscriber_lowers_the_rate() {
    let (mut sched, _sink) = setup();
    join(&mut sched, sta(1), group(1));
    join(&mut sched, sta(2), group(1));
    report_link_quality(&mut sched, sta(1), table_with_reliable(&[24, 36, 48]));

    let weak: RatesTable = [(6, 90.0), (12, 92.0), (18, 70.0)]
        .into_iter()
        .map(|(rate, prob)| {
            (
                rate,
                RateStats {
                    ewma_prob: prob,
                    cur_prob: prob,
                },
            )
        })
        .collect();
    report_link_quality(&mut sched, sta(2), weak);

    let rate = sched.best_rate(&AP, &group(1)).unwrap();
    assert_eq!(rate.ewma_rate, 12);
    assert_eq!(rate.cur_prob_rate, 12);
}

// ─── Membership changes ──────────────────────────────────────────────────

/// The sole subscriber leaving reverts the group to legacy at the lowest
/// rate; the group stays managed.
#[test]
fn sole_subscriber_leaving_reverts_to_lowest_rate() {
    let (mut sched, sink) = setup();
    join(&mut sched, sta(1), group(1));
    report_link_quality(&mut sched, sta(1), table_with_reliable(&[24, 36, 48, 54]));
    for _ in 0..11 {
        sched.on_tick();
    }
    assert_eq!(
        sched.access_point(&AP).unwrap().group(&group(1)).unwrap().rate,
        54
    );
    sink.take();

    sched.handle_event(SchedulerEvent::Lifecycle(
        LifecycleEvent::StationDisassociated { addr: sta(1) },
    ));

    let ap = sched.access_point(&AP).unwrap();
    let policy = ap.group(&group(1)).unwrap();
    assert_eq!(policy.mode, TxMode::Legacy);
    assert_eq!(policy.rate, 6);
    assert_eq!(policy.cur_prob_rate, 6);
    assert!(ap.contains_group(&group(1)));
    assert!(sched.station(&sta(1)).is_none());
    assert_eq!(
        sink.take().last().unwrap().policy,
        TxPolicy {
            mode: TxMode::Legacy,
            rate: 6
        }
    );
}

/// An AP disconnect removes its state before the next tick.
#[test]
fn disconnected_ap_receives_no_policies() {
    let (mut sched, sink) = setup();
    join(&mut sched, sta(1), group(1));
    sched.handle_event(SchedulerEvent::Lifecycle(
        LifecycleEvent::AccessPointDisconnected { addr: AP },
    ));
    sink.take();
    for _ in 0..60 {
        sched.on_tick();
    }
    assert!(sink.take().is_empty());
    assert!(sched.access_point(&AP).is_none());
}

// ─── Runtime ─────────────────────────────────────────────────────────────

#[test]
fn runtime_pushes_policies_through_channel_sink() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("mcast_scheduler=debug"))
        .with_test_writer()
        .try_init();

    let config = SchedulerConfig::from_toml_str(
        r#"
            tick_ms = 5
            period_length_ms = 100
            dms_min_length_ms = 10
            dms_max_length_ms = 20
            snapshot_interval_ms = 10
        "#,
    )
    .unwrap();
    let (sink, updates) = ChannelSink::new(256);
    let mut runtime = SchedulerRuntime::new(config, Arc::new(sink));

    runtime
        .submit(SchedulerEvent::Lifecycle(
            LifecycleEvent::AccessPointConnected {
                addr: AP,
                capabilities: CAPABILITIES.to_vec(),
            },
        ))
        .unwrap();
    runtime
        .submit(SchedulerEvent::Lifecycle(LifecycleEvent::StationAssociated {
            addr: sta(1),
            access_point: AP,
        }))
        .unwrap();
    runtime
        .submit(SchedulerEvent::Membership(MembershipReport {
            kind: MembershipKind::V3ChangeToExclude,
            station: sta(1),
            group: group(1),
            access_point: AP,
        }))
        .unwrap();
    runtime
        .submit(SchedulerEvent::LinkQuality {
            station: sta(1),
            rates: table_with_reliable(&[12, 24]),
        })
        .unwrap();

    // registration, then dms at period 0 and legacy at period 4 of each
    // 20-tick cycle
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    while std::time::Instant::now() < deadline {
        if let Ok(update) = updates.recv_timeout(Duration::from_millis(50)) {
            seen.push(update);
            if seen.len() >= 3 {
                break;
            }
        }
    }
    runtime.shutdown();

    assert!(seen.len() >= 3, "expected three policy pushes, got {seen:?}");
    assert_eq!(
        seen[0].policy,
        TxPolicy {
            mode: TxMode::Legacy,
            rate: 6
        }
    );
    assert_eq!(seen[1].policy.mode, TxMode::Dms);
    assert_eq!(
        seen[2].policy,
        TxPolicy {
            mode: TxMode::Legacy,
            rate: 24
        }
    );

    let snap = runtime.snapshot();
    assert_eq!(snap.stations.len(), 1);
    assert_eq!(snap.stations[0].best_ewma_rate, 24);
}
