//! Ping-based liveness monitor.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use vex_shared::protocol::{new_correlation_id, Envelope, Outbound};

use crate::connector::ConnectorInner;
use crate::events::{CloseReason, ConnectorEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Alive,
    Unresponsive,
}

/// Counts consecutive unanswered probes.
#[derive(Debug, Clone)]
pub struct Liveness {
    threshold: u32,
    misses: u32,
}

impl Liveness {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            misses: 0,
        }
    }

    /// Record whether the previous probe was answered before this tick.
    pub fn observe(&mut self, answered: bool) -> Verdict {
        if answered {
            self.misses = 0;
        } else {
            self.misses += 1;
        }
        if self.misses >= self.threshold {
            Verdict::Unresponsive
        } else {
            Verdict::Alive
        }
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }
}

impl ConnectorInner {
    /// Tick every interval, starting one interval from now. A probe counts as
    /// answered if its pong landed any time before the following tick.
    pub(crate) async fn run_heartbeat(self: Arc<Self>) {
        let period = self.config.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut liveness = Liveness::new(self.config.heartbeat_miss_threshold);
        let mut probe: Option<oneshot::Receiver<Envelope>> = None;

        loop {
            ticker.tick().await;
            if self.is_closed() {
                return;
            }

            let answered = probe.take().map_or(true, |mut rx| rx.try_recv().is_ok());
            if liveness.observe(answered) == Verdict::Unresponsive {
                warn!(
                    host = %self.target.host,
                    misses = liveness.misses(),
                    "Server not responding"
                );
                self.emit(ConnectorEvent::Unresponsive);
                self.close(CloseReason::Unresponsive);
                return;
            }
            if !answered {
                debug!(misses = liveness.misses(), "Ping went unanswered");
            }

            let id = new_correlation_id();
            probe = Some(self.table.register(id.clone()));
            self.send(Outbound::Ping { message_id: id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_needs_consecutive_misses() {
        let mut liveness = Liveness::new(3);
        assert_eq!(liveness.observe(false), Verdict::Alive);
        assert_eq!(liveness.observe(false), Verdict::Alive);
        assert_eq!(liveness.observe(true), Verdict::Alive);
        assert_eq!(liveness.misses(), 0);

        assert_eq!(liveness.observe(false), Verdict::Alive);
        assert_eq!(liveness.observe(false), Verdict::Alive);
        assert_eq!(liveness.observe(false), Verdict::Unresponsive);
    }

    #[test]
    fn test_zero_threshold_behaves_as_one() {
        let mut liveness = Liveness::new(0);
        assert_eq!(liveness.observe(true), Verdict::Alive);
        assert_eq!(liveness.observe(false), Verdict::Unresponsive);
    }
}
