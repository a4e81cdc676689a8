use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::types::{GroupAddr, HwAddr, TxPolicy};

/// Outbound seam towards the access points.
///
/// `set_policy` is called from inside the scheduler tick and must not block:
/// implementations hand the update to their own I/O path and return. Errors
/// are logged by the scheduler and dropped; the next mode transition pushes
/// the then-current policy again.
pub trait PolicySink: Send + Sync {
    fn set_policy(&self, ap: HwAddr, group: GroupAddr, policy: TxPolicy) -> Result<()>;
}

/// A policy update as queued by [`ChannelSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyUpdate {
    pub ap: HwAddr,
    pub group: GroupAddr,
    pub policy: TxPolicy,
}

/// Sink that queues updates on a bounded channel for a connection task to
/// drain. A full queue drops the update.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<PolicyUpdate>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, Receiver<PolicyUpdate>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl PolicySink for ChannelSink {
    fn set_policy(&self, ap: HwAddr, group: GroupAddr, policy: TxPolicy) -> Result<()> {
        match self.tx.try_send(PolicyUpdate { ap, group, policy }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(anyhow::anyhow!("policy queue full")),
            Err(TrySendError::Disconnected(_)) => Err(anyhow::anyhow!("policy queue closed")),
        }
    }
}
