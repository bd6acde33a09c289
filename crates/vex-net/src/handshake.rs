//! Identity registration and the challenge exchange with the server.
//!
//! The server's own challenge to us is answered from the reader's kind
//! switch at any time; this module drives the other direction: register if
//! we have no account, then challenge the server and check its key against
//! the trust store. The watchdog covers only the network round trips, so an
//! operator taking their time over a key mismatch prompt does not time out.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use vex_shared::constants::DEFAULT_USERNAME;
use vex_shared::identity::fingerprint;
use vex_shared::protocol::{
    new_correlation_id, ChallengeReply, IdentityCreated, IdentityRequest, Outbound, StatusReply,
};
use vex_store::{Account, ServerRecord, StoreError};

use crate::connector::ConnectorInner;
use crate::error::ConnectorError;
use crate::events::{CloseReason, ConnectorEvent, KeyMismatch, Phase, SecurityFailure};
use crate::lock;
use crate::trust::{self, TrustDecision};

fn store_failure(e: StoreError) -> CloseReason {
    CloseReason::Store(e.to_string())
}

fn abort_reason(e: ConnectorError) -> CloseReason {
    match e {
        ConnectorError::Cancelled => CloseReason::Local,
        ConnectorError::Timeout(_) => CloseReason::HandshakeTimeout,
        ConnectorError::Rejected { operation, status } => {
            CloseReason::Rejected(format!("{operation}: {status}"))
        }
        ConnectorError::ServerError(message) => CloseReason::Rejected(message),
        ConnectorError::Store(e) => store_failure(e),
        ConnectorError::Protocol(e) => CloseReason::Rejected(format!("malformed reply: {e}")),
        other => CloseReason::Transport(other.to_string()),
    }
}

impl ConnectorInner {
    pub(crate) async fn run_handshake(self: Arc<Self>) {
        let deadline = Instant::now() + self.config.handshake_timeout;
        match self.handshake(deadline).await {
            Ok(()) => {
                self.handshake_complete.send_replace(true);
                info!(host = %self.target.host, "Server verified");
                self.emit(ConnectorEvent::HandshakeComplete);
                self.spawn(self.clone().run_heartbeat());
            }
            Err(reason) => self.close(reason),
        }
    }

    async fn handshake(&self, deadline: Instant) -> Result<(), CloseReason> {
        let host = self.target.host.clone();
        let (server, account) = {
            let db = lock(&self.db);
            let server = db.get_server(&host).map_err(store_failure)?;
            let account = db.get_account(&host).map_err(store_failure)?;
            (server, account)
        };

        let pinned = match server {
            Some(record) => record.pubkey,
            None => {
                info!(host, "First contact, saving provisional server record");
                let record = ServerRecord {
                    hostname: host.clone(),
                    port: self.target.port,
                    pubkey: None,
                };
                lock(&self.db)
                    .upsert_server(&record)
                    .map_err(store_failure)?;
                None
            }
        };

        match account {
            Some(account) => debug!(host, uuid = account.uuid, "Using existing account"),
            None => {
                self.set_phase(Phase::RegisteringIdentity);
                timeout_at(deadline, self.register_identity())
                    .await
                    .map_err(|_| CloseReason::HandshakeTimeout)?
                    .map_err(abort_reason)?;
            }
        }

        self.set_phase(Phase::AwaitingChallenge);
        let nonce = new_correlation_id();
        let challenge = Outbound::Challenge {
            message_id: nonce.clone(),
            pubkey: self.identity.public_key_hex(),
        };
        let reply = timeout_at(deadline, self.request(nonce.clone(), challenge))
            .await
            .map_err(|_| CloseReason::HandshakeTimeout)?
            .map_err(abort_reason)?;

        let reply: ChallengeReply = reply.decode().map_err(|e| {
            warn!(host, error = %e, "Unreadable challenge reply");
            CloseReason::Security(SecurityFailure::BadSignature)
        })?;

        match trust::evaluate(pinned, &nonce, &reply) {
            TrustDecision::Trusted => debug!(host, "Server key matches pin"),
            TrustDecision::FirstUse(key) => {
                self.pin_key(&key).map_err(store_failure)?;
                info!(host, fingerprint = %fingerprint(&key), "Pinned server key");
            }
            TrustDecision::Mismatch { pinned, presented } => {
                warn!(
                    host,
                    pinned = %fingerprint(&pinned),
                    presented = %fingerprint(&presented),
                    "Server key changed"
                );
                if !self.ask_operator(pinned, presented).await {
                    return Err(CloseReason::Security(SecurityFailure::KeyMismatch));
                }
                self.pin_key(&presented).map_err(store_failure)?;
                info!(host, fingerprint = %fingerprint(&presented), "Re-pinned server key");
            }
            TrustDecision::BadSignature => {
                warn!(host, "Server sent back a bad signature");
                return Err(CloseReason::Security(SecurityFailure::BadSignature));
            }
        }

        Ok(())
    }

    /// `identity/CREATE`, sign the issued token, `identity/REGISTER`, then
    /// persist the account.
    async fn register_identity(&self) -> Result<(), ConnectorError> {
        let create_id = new_correlation_id();
        let created: IdentityCreated = self
            .request(
                create_id.clone(),
                Outbound::Identity(IdentityRequest::Create {
                    message_id: create_id,
                }),
            )
            .await?
            .decode()?;

        let register_id = new_correlation_id();
        let status: StatusReply = self
            .request(
                register_id.clone(),
                Outbound::Identity(IdentityRequest::Register {
                    message_id: register_id,
                    pubkey: self.identity.public_key_hex(),
                    signed: self.identity.sign_hex(created.uuid.as_bytes()),
                    uuid: created.uuid.clone(),
                }),
            )
            .await?
            .decode()?;

        if !status.is_success() {
            return Err(ConnectorError::Rejected {
                operation: "identity registration",
                status: status.status,
            });
        }

        lock(&self.db).insert_account(&Account {
            hostname: self.target.host.clone(),
            username: DEFAULT_USERNAME.to_string(),
            uuid: created.uuid,
        })?;
        info!(host = %self.target.host, "Registered new identity");
        Ok(())
    }

    fn pin_key(&self, key: &[u8; 32]) -> Result<(), StoreError> {
        let db = lock(&self.db);
        if !db.pin_server_key(&self.target.host, key)? {
            db.upsert_server(&ServerRecord {
                hostname: self.target.host.clone(),
                port: self.target.port,
                pubkey: Some(*key),
            })?;
        }
        Ok(())
    }

    /// Surface a key mismatch and wait for the operator. A dropped prompt or
    /// a close while waiting counts as rejection.
    async fn ask_operator(&self, pinned: [u8; 32], presented: [u8; 32]) -> bool {
        let (tx, rx) = oneshot::channel();
        self.emit(ConnectorEvent::KeyMismatch(KeyMismatch {
            host: self.target.host.clone(),
            pinned,
            presented,
            decision: tx,
        }));
        let accepted = self.await_decision(rx).await;
        if !accepted {
            warn!(host = %self.target.host, "Changed server key rejected");
        }
        accepted
    }

    async fn await_decision(&self, rx: oneshot::Receiver<bool>) -> bool {
        tokio::select! {
            decision = rx => decision.unwrap_or(false),
            _ = self.wait_closed() => false,
        }
    }
}
