//! Moderation requests raised during a turn and applied after it.
//!
//! Tools never act on the host directly: they push a [`PendingOp`] and the
//! caller drains the queue once the turn's events have been delivered.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PendingOp {
    /// Mute the user on the platform. Zero lifts an existing ban.
    Ban { user_id: String, duration: Duration },
    /// Hide the user's messages from this agent. Zero unblocks.
    Block { user_id: String, duration: Duration },
}

impl PendingOp {
    pub fn user_id(&self) -> &str {
        match self {
            PendingOp::Ban { user_id, .. } | PendingOp::Block { user_id, .. } => user_id,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            PendingOp::Ban { duration, .. } | PendingOp::Block { duration, .. } => *duration,
        }
    }

    fn same_target(&self, other: &PendingOp) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.user_id() == other.user_id()
    }
}

/// Ordered queue of [`PendingOp`]s, shared between an agent and its tools.
#[derive(Debug, Default)]
pub struct DeferredOperationQueue {
    ops: Mutex<Vec<PendingOp>>,
}

impl DeferredOperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, op: PendingOp) {
        tracing::debug!(?op, "deferred operation queued");
        self.ops.lock().push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    /// Take everything queued so far. Repeated requests of the same kind
    /// for the same user collapse into one carrying the latest duration,
    /// kept at the position of the first request.
    pub fn drain(&self) -> Vec<PendingOp> {
        let queued = std::mem::take(&mut *self.ops.lock());
        let mut out: Vec<PendingOp> = Vec::with_capacity(queued.len());
        for op in queued {
            match out.iter_mut().find(|o| o.same_target(&op)) {
                Some(existing) => *existing = op,
                None => out.push(op),
            }
        }
        out
    }
}
