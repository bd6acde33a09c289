//! Correlation table: routes replies back to the request that caused them.
//!
//! A caller registers a correlation ID *before* sending the request and keeps
//! the returned receiver. The first inbound envelope carrying that ID fires
//! the receiver and removes the entry; nothing ever fires twice. A reply that
//! arrives before registration falls through to the kind switch.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use vex_shared::protocol::Envelope;

use crate::lock;

/// Outcome of offering an envelope to the table.
#[derive(Debug)]
pub enum Dispatch {
    /// A waiting continuation took the envelope.
    Consumed,
    /// No entry matched; the caller handles the envelope by kind.
    Unconsumed(Envelope),
}

#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, oneshot::Sender<Envelope>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot continuation for `id`.
    ///
    /// Entries whose receiver has already been dropped are pruned here: they
    /// could never fire.
    pub fn register(&self, id: impl Into<String>) -> oneshot::Receiver<Envelope> {
        let (tx, rx) = oneshot::channel();
        let mut pending = lock(&self.pending);
        pending.retain(|_, waiter| !waiter.is_closed());
        pending.insert(id.into(), tx);
        rx
    }

    pub fn dispatch(&self, envelope: Envelope) -> Dispatch {
        let waiter = match envelope.correlation_id() {
            Some(id) => lock(&self.pending).remove(id),
            None => None,
        };

        match waiter {
            Some(tx) => {
                if let Err(envelope) = tx.send(envelope) {
                    debug!(kind = envelope.kind(), "Reply arrived after its waiter gave up");
                }
                Dispatch::Consumed
            }
            None => Dispatch::Unconsumed(envelope),
        }
    }

    /// Drop every pending continuation; their receivers observe cancellation.
    pub fn cancel_all(&self) {
        let cancelled = {
            let mut pending = lock(&self.pending);
            let count = pending.len();
            pending.clear();
            count
        };
        if cancelled > 0 {
            debug!(cancelled, "Cancelled pending requests");
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
