use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use quanta::Instant;
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::gateway::SchedulerEvent;
use crate::scheduler::Scheduler;
use crate::sink::PolicySink;
use crate::snapshot::SchedulerSnapshot;

/// Error returned when an event cannot be queued for the scheduler worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("scheduler event queue is full")]
    Full,
    #[error("scheduler worker has stopped")]
    Disconnected,
}

enum ControlMessage {
    Event(Box<SchedulerEvent>),
    Shutdown,
}

/// Thread-safe handle to the scheduler worker.
///
/// The worker thread owns the [`Scheduler`]: events are queued on a bounded
/// channel and applied between ticks, so a tick never observes a
/// half-applied event. Ticks fire every `tick_ms`; a status snapshot is
/// published every `snapshot_interval`.
///
/// Dropping the runtime shuts the worker down.
pub struct SchedulerRuntime {
    control_tx: Sender<ControlMessage>,
    shutdown: Arc<AtomicBool>,
    snapshot: Arc<Mutex<SchedulerSnapshot>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SchedulerRuntime {
    pub fn new(config: SchedulerConfig, sink: Arc<dyn PolicySink>) -> Self {
        let (control_tx, control_rx) = bounded(config.event_capacity);
        let snapshot = Arc::new(Mutex::new(SchedulerSnapshot::default()));
        let snapshot_clone = snapshot.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name("mcast-scheduler".into())
            .spawn(move || runtime_worker(control_rx, config, sink, snapshot_clone, shutdown_clone))
            .expect("failed to spawn scheduler worker");

        Self {
            control_tx,
            shutdown,
            snapshot,
            handle: Some(handle),
        }
    }

    /// Queues an event, blocking while the queue is full.
    pub fn submit(&self, event: SchedulerEvent) -> anyhow::Result<()> {
        self.control_tx
            .send(ControlMessage::Event(Box::new(event)))
            .map_err(|e| anyhow::anyhow!("Failed to submit event: {}", e))
    }

    /// Queues an event without blocking.
    pub fn try_submit(&self, event: SchedulerEvent) -> Result<(), SubmitError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(SubmitError::Disconnected);
        }
        match self.control_tx.try_send(ControlMessage::Event(Box::new(event))) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("scheduler event queue full, dropping event");
                Err(SubmitError::Full)
            }
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::Disconnected),
        }
    }

    /// Returns the last published snapshot.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Gracefully shuts down the worker thread. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.control_tx.send(ControlMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SchedulerRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn publish(snapshot: &Mutex<SchedulerSnapshot>, scheduler: &Scheduler<dyn PolicySink>) {
    let current = scheduler.snapshot();
    *snapshot.lock().unwrap_or_else(|e| e.into_inner()) = current;
}

fn runtime_worker(
    control_rx: Receiver<ControlMessage>,
    config: SchedulerConfig,
    sink: Arc<dyn PolicySink>,
    snapshot: Arc<Mutex<SchedulerSnapshot>>,
    shutdown: Arc<AtomicBool>,
) {
    let tick = config.tick();
    let snapshot_interval = config.snapshot_interval;
    let drain_limit = config.event_capacity;
    let mut scheduler: Scheduler<dyn PolicySink> = Scheduler::new(config, sink);

    info!(tick_ms = tick.as_millis() as u64, "mcast scheduler started");

    let mut next_tick = Instant::now() + tick;
    let mut last_snapshot = Instant::now();

    'outer: loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let wait = next_tick.saturating_duration_since(Instant::now());
        match control_rx.recv_timeout(wait) {
            Ok(ControlMessage::Event(event)) => {
                scheduler.handle_event(*event);
                // apply whatever else queued up before the tick runs
                for _ in 0..drain_limit {
                    match control_rx.try_recv() {
                        Ok(ControlMessage::Event(event)) => scheduler.handle_event(*event),
                        Ok(ControlMessage::Shutdown) => break 'outer,
                        Err(_) => break,
                    }
                }
            }
            Ok(ControlMessage::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        if now >= next_tick {
            scheduler.on_tick();
            next_tick += tick;
            if next_tick <= now {
                // fell behind by more than a tick: resynchronize
                next_tick = now + tick;
            }
        }

        if now.saturating_duration_since(last_snapshot) >= snapshot_interval {
            publish(&snapshot, &scheduler);
            last_snapshot = now;
        }
    }

    publish(&snapshot, &scheduler);
    info!(ticks = scheduler.ticks(), "mcast scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::LifecycleEvent;
    use crate::scheduler::tests::{group, RecordingSink, AP, RATES};
    use std::time::Duration;

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            tick_ms: 5,
            period_length_ms: 300,
            dms_min_length_ms: 10,
            dms_max_length_ms: 25,
            snapshot_interval: Duration::from_millis(5),
            ..SchedulerConfig::default()
        }
    }

    #[test]
    fn runtime_applies_events_and_ticks() {
        let sink = Arc::new(RecordingSink::default());
        let mut runtime = SchedulerRuntime::new(fast_config(), sink.clone());

        runtime
            .submit(SchedulerEvent::Lifecycle(LifecycleEvent::AccessPointConnected {
                addr: AP,
                capabilities: RATES.to_vec(),
            }))
            .unwrap();
        runtime
            .submit(SchedulerEvent::IncomingGroup {
                access_point: AP,
                group: group(1),
            })
            .unwrap();

        thread::sleep(Duration::from_millis(200));
        runtime.shutdown();

        let snap = runtime.snapshot();
        assert!(snap.ticks > 0);
        assert_eq!(snap.access_points.len(), 1);
        assert_eq!(snap.access_points[0].groups.len(), 1);
        // registration push plus at least one dms window opening
        assert!(sink.take().len() >= 2);
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let mut runtime =
            SchedulerRuntime::new(fast_config(), Arc::new(RecordingSink::default()));
        runtime.shutdown();
        // idempotent
        runtime.shutdown();
        assert_eq!(
            runtime.try_submit(SchedulerEvent::Lifecycle(
                LifecycleEvent::AccessPointDisconnected { addr: AP }
            )),
            Err(SubmitError::Disconnected)
        );
        assert!(runtime
            .submit(SchedulerEvent::Lifecycle(
                LifecycleEvent::AccessPointDisconnected { addr: AP }
            ))
            .is_err());
    }
}
