//! Reconnect controller.
//!
//! A session owns the sequence of connectors for one target. When a
//! connector closes for a retryable reason (transport loss, unresponsive
//! server, handshake timeout) the session waits a flat delay and starts a
//! fresh connector, handing it the channel the old one was in. Local and
//! fatal closes end the session, as does failing to connect the first time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Target;
use crate::connector::{Connector, ConnectorContext};
use crate::events::{CloseReason, ConnectorEvent};
use crate::transport::Dialer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The last connector closed for a reason that is not retried.
    Closed(CloseReason),
    /// The very first connection attempt failed.
    ConnectFailed(String),
    /// [`SessionHandle::stop`] was called between connectors.
    Stopped,
}

#[derive(Debug)]
pub enum SessionEvent {
    Connector(ConnectorEvent),
    /// Waiting `delay` before attempt number `attempt`.
    Reconnecting { attempt: u32, delay: Duration },
    Ended(SessionEnd),
}

pub struct SessionHandle {
    current: watch::Receiver<Option<Connector>>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// The live connector, if one is up right now.
    pub fn connector(&self) -> Option<Connector> {
        self.current.borrow().clone()
    }

    /// Close the current connector and stop reconnecting.
    pub fn stop(&self) {
        self.stop.send_replace(true);
        if let Some(connector) = self.connector() {
            connector.close();
        }
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Start a session. Events from every connector, plus reconnect status, are
/// delivered on the returned receiver, which yields `Ended` last.
pub fn spawn_session<D: Dialer>(
    dialer: D,
    target: Target,
    ctx: ConnectorContext,
    channel: Option<Uuid>,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (current_tx, current_rx) = watch::channel(None);
    let (stop_tx, stop_rx) = watch::channel(false);

    let task = tokio::spawn(run_session(
        Arc::new(dialer),
        target,
        ctx,
        channel,
        events_tx,
        current_tx,
        stop_rx,
    ));

    (
        SessionHandle {
            current: current_rx,
            stop: stop_tx,
            task,
        },
        events_rx,
    )
}

async fn run_session<D: Dialer>(
    dialer: Arc<D>,
    target: Target,
    ctx: ConnectorContext,
    mut channel: Option<Uuid>,
    events: mpsc::UnboundedSender<SessionEvent>,
    current: watch::Sender<Option<Connector>>,
    mut stop: watch::Receiver<bool>,
) {
    let delay = ctx.config.reconnect_delay;
    let mut established = false;
    let mut attempt = 0u32;

    let end = loop {
        if *stop.borrow() {
            break SessionEnd::Stopped;
        }

        let dialed = tokio::select! {
            dialed = dialer.dial(&target) => dialed,
            _ = stop.wait_for(|stopped| *stopped) => break SessionEnd::Stopped,
        };

        match dialed {
            Err(e) if !established => {
                warn!(server = %target, error = %e, "Could not connect");
                break SessionEnd::ConnectFailed(e.to_string());
            }
            Err(e) => warn!(server = %target, error = %e, "Reconnect attempt failed"),
            Ok(transport) => {
                established = true;
                let (connector, mut connector_events) =
                    Connector::spawn(transport, target.clone(), ctx.clone(), channel);
                current.send_replace(Some(connector.clone()));
                if *stop.borrow() {
                    connector.close();
                }

                let mut reason = CloseReason::Local;
                while let Some(event) = connector_events.recv().await {
                    let closed = match &event {
                        ConnectorEvent::Closed(r) => Some(r.clone()),
                        _ => None,
                    };
                    let _ = events.send(SessionEvent::Connector(event));
                    if let Some(r) = closed {
                        reason = r;
                        break;
                    }
                }

                channel = connector.resume_channel().or(channel);
                current.send_replace(None);

                if !reason.is_retryable() {
                    break SessionEnd::Closed(reason);
                }
                attempt = 0;
            }
        }

        attempt += 1;
        info!(server = %target, attempt, ?delay, "Reconnecting");
        let _ = events.send(SessionEvent::Reconnecting { attempt, delay });
        tokio::select! {
            _ = time::sleep(delay) => {}
            _ = stop.wait_for(|stopped| *stopped) => break SessionEnd::Stopped,
        }
    };

    info!(server = %target, ?end, "Session ended");
    let _ = events.send(SessionEvent::Ended(end));
}
