//! Connection core of the vex client: websocket transport, request/reply
//! correlation, handshake with TOFU key pinning, heartbeat, history sync and
//! the reconnecting session around them.

pub mod config;
pub mod connector;
pub mod correlation;
pub mod error;
pub mod events;
mod handshake;
pub mod heartbeat;
mod history;
pub mod session;
pub mod transport;
pub mod trust;

use std::sync::{Arc, Mutex, MutexGuard};

use vex_store::Database;

pub use config::{ConnectorConfig, Target};
pub use connector::{Connector, ConnectorContext};
pub use correlation::{CorrelationTable, Dispatch};
pub use error::ConnectorError;
pub use events::{
    ChatEvent, ChatOrigin, CloseReason, ConnectorEvent, KeyMismatch, Phase, SecurityFailure,
};
pub use session::{spawn_session, SessionEnd, SessionEvent, SessionHandle};
pub use transport::{Dialer, Transport, TransportEvent, WebSocketDialer};

/// The store shared by every connector in the process.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
