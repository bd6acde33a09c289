//! Events a connector reports to whoever drives it.

use std::fmt;

use tokio::sync::oneshot;
use uuid::Uuid;

use vex_shared::identity::fingerprint;
use vex_shared::protocol::{ChannelInfo, UserInfo};
use vex_store::ChatMessage;

/// Connection phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    RegisteringIdentity,
    AwaitingChallenge,
    Authenticated,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityFailure {
    BadSignature,
    KeyMismatch,
}

impl fmt::Display for SecurityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSignature => f.write_str("BADSIGNATURE"),
            Self::KeyMismatch => f.write_str("KEYMISMATCH"),
        }
    }
}

/// Why a connector closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by its owner.
    Local,
    /// The socket failed or the server hung up.
    Transport(String),
    /// Heartbeat threshold reached.
    Unresponsive,
    /// The handshake did not finish within the watchdog.
    HandshakeTimeout,
    /// The server refused an application step, e.g. identity registration.
    Rejected(String),
    /// The local store failed mid-handshake.
    Store(String),
    Security(SecurityFailure),
}

impl CloseReason {
    /// Whether the reconnect loop should try again after this close.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Unresponsive | Self::HandshakeTimeout
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("closed locally"),
            Self::Transport(reason) => write!(f, "connection lost: {reason}"),
            Self::Unresponsive => f.write_str("server unresponsive"),
            Self::HandshakeTimeout => f.write_str("handshake timed out"),
            Self::Rejected(reason) => write!(f, "rejected by server: {reason}"),
            Self::Store(reason) => write!(f, "local store failure: {reason}"),
            Self::Security(failure) => write!(f, "security failure: {failure}"),
        }
    }
}

/// A server presented a validly signed key that differs from the pin.
///
/// The handshake waits until [`accept`](Self::accept) or
/// [`reject`](Self::reject) is called. Dropping the prompt rejects.
#[derive(Debug)]
pub struct KeyMismatch {
    pub host: String,
    pub pinned: [u8; 32],
    pub presented: [u8; 32],
    pub(crate) decision: oneshot::Sender<bool>,
}

impl KeyMismatch {
    /// Re-pin the presented key and continue.
    pub fn accept(self) {
        let _ = self.decision.send(true);
    }

    pub fn reject(self) {
        let _ = self.decision.send(false);
    }

    pub fn pinned_fingerprint(&self) -> String {
        fingerprint(&self.pinned)
    }

    pub fn presented_fingerprint(&self) -> String {
        fingerprint(&self.presented)
    }
}

/// Where a displayed chat message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOrigin {
    /// Replayed from the local cache on join.
    Cache,
    /// Received before the history reply for the channel arrived.
    Backlog,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub message: ChatMessage,
    pub origin: ChatOrigin,
    /// Authored by the server itself rather than a user.
    pub from_server: bool,
    /// A live message from someone else that contains our username.
    pub mentions_me: bool,
}

#[derive(Debug)]
pub enum ConnectorEvent {
    Phase(Phase),
    /// We verified the server's key; heartbeat is running.
    HandshakeComplete,
    /// The server accepted our challenge response.
    Authenticated,
    KeyMismatch(KeyMismatch),
    Welcome(String),
    ServerNotice(String),
    ServerError(String),
    /// Our own account as the server reports it.
    ClientInfo(UserInfo),
    ChannelList(Vec<ChannelInfo>),
    Joined { channel_id: Uuid, name: String },
    JoinRejected(String),
    Left(Uuid),
    PermissionResult { status: String },
    /// Uncorrelated user search results.
    UserSearch(Vec<UserInfo>),
    Chat(ChatEvent),
    HistorySynced { channel_id: Uuid },
    Unresponsive,
    Closed(CloseReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classes() {
        assert!(CloseReason::Transport("reset".into()).is_retryable());
        assert!(CloseReason::Unresponsive.is_retryable());
        assert!(CloseReason::HandshakeTimeout.is_retryable());

        assert!(!CloseReason::Local.is_retryable());
        assert!(!CloseReason::Rejected("FAIL".into()).is_retryable());
        assert!(!CloseReason::Security(SecurityFailure::BadSignature).is_retryable());
        assert!(!CloseReason::Security(SecurityFailure::KeyMismatch).is_retryable());
    }

    #[tokio::test]
    async fn test_dropped_prompt_rejects() {
        let (tx, rx) = oneshot::channel();
        let prompt = KeyMismatch {
            host: "h".into(),
            pinned: [1; 32],
            presented: [2; 32],
            decision: tx,
        };
        assert_ne!(prompt.pinned_fingerprint(), prompt.presented_fingerprint());
        drop(prompt);
        assert!(rx.await.is_err());
    }
}
