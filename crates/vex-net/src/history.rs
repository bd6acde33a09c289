//! History sync on channel join.
//!
//! The newest cached message for the channel is the cursor. Cached messages
//! up to the cursor are replayed first, then the server is asked for
//! everything newer. Incoming `chat` frames are cached by message ID and a
//! duplicate is neither stored nor shown twice, so replay and fetch never
//! overlap on screen even if the server resends the cursor message.

use std::sync::Arc;

use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vex_shared::protocol::{new_correlation_id, ChatPayload, HistoryRequest, Outbound};
use vex_shared::types::{NIL_CURSOR, SERVER_USER_ID};
use vex_store::{ChatMessage, StoreError};

use crate::connector::{server_reply, ConnectorInner};
use crate::error::ConnectorError;
use crate::events::{ChatEvent, ChatOrigin, ConnectorEvent};
use crate::lock;

/// Cache row for a chat frame received from `server`.
pub(crate) fn chat_record(payload: ChatPayload, server: &str) -> ChatMessage {
    ChatMessage {
        message_id: payload.message_id,
        channel_id: payload.channel_id,
        server: server.to_string(),
        user_id: payload.user_id,
        username: payload.username,
        message: payload.message,
        created_at: payload.created_at,
        updated_at: payload.updated_at,
        deleted_at: payload.deleted_at,
    }
}

impl ConnectorInner {
    /// Called from the reader right after a successful join.
    pub(crate) fn sync_history(self: &Arc<Self>, channel_id: Uuid) {
        lock(&self.state).history_retrieved = false;

        let (cursor, cached) = match self.cached_window(channel_id) {
            Ok(window) => window,
            Err(e) => {
                warn!(%channel_id, error = %e, "Failed to read history cache");
                (NIL_CURSOR, Vec::new())
            }
        };
        debug!(%channel_id, %cursor, cached = cached.len(), "Syncing history");

        let authenticated = *self.authenticated.borrow();
        if authenticated {
            // Inline, so the replay lands before any frame read after this one.
            self.replay(cached);
            self.request_history(channel_id, cursor);
        } else {
            let inner = self.clone();
            self.spawn(async move {
                if inner.wait_flag(&inner.authenticated).await.is_err() {
                    return;
                }
                inner.replay(cached);
                inner.request_history(channel_id, cursor);
            });
        }
    }

    fn cached_window(&self, channel_id: Uuid) -> Result<(Uuid, Vec<ChatMessage>), StoreError> {
        let host = &self.target.host;
        let db = lock(&self.db);
        match db.get_latest_message(channel_id, host)? {
            Some(latest) => {
                let window = db.get_messages_before(
                    channel_id,
                    host,
                    latest.created_at,
                    self.config.history_replay_limit,
                )?;
                Ok((latest.message_id, window))
            }
            None => Ok((NIL_CURSOR, Vec::new())),
        }
    }

    fn replay(&self, cached: Vec<ChatMessage>) {
        for message in cached {
            let from_server = message.user_id == SERVER_USER_ID;
            self.emit(ConnectorEvent::Chat(ChatEvent {
                message,
                origin: ChatOrigin::Cache,
                from_server,
                mentions_me: false,
            }));
        }
    }

    fn request_history(self: &Arc<Self>, channel_id: Uuid, cursor: Uuid) {
        let id = new_correlation_id();
        let rx = self.table.register(id.clone());
        self.send(Outbound::HistoryReq(HistoryRequest::Retrieve {
            message_id: id,
            channel_id,
            top_message: cursor,
        }));

        let inner = self.clone();
        self.spawn(async move {
            let limit = inner.config.history_timeout;
            let reply = time::timeout(limit, async {
                server_reply(inner.await_reply(rx).await?)
            })
            .await;
            match reply {
                Ok(Ok(_)) => {
                    {
                        let mut state = lock(&inner.state);
                        if state.channel_id == Some(channel_id) {
                            state.history_retrieved = true;
                        }
                    }
                    info!(%channel_id, "History retrieved");
                    inner.emit(ConnectorEvent::HistorySynced { channel_id });
                }
                Ok(Err(ConnectorError::ServerError(message))) => {
                    warn!(%channel_id, %message, "Server refused history request");
                    inner.emit(ConnectorEvent::ServerError(message));
                }
                Ok(Err(_)) => {}
                Err(_) => warn!(%channel_id, "Timed out waiting for history"),
            }
        });
    }
}
