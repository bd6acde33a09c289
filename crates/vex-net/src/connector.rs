//! The connector: one websocket session with a vex server.
//!
//! Each connector runs a reader task (inbound frames), a handshake task and,
//! once the server is verified, a heartbeat task. Every inbound frame goes
//! through the correlation table first and only then through the typed kind
//! switch. Flags that other tasks wait on (`authenticated`,
//! `handshake_complete`, `shutdown`) are `watch` channels, so waits are real
//! waits and all of them are released by [`Connector::close`].

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vex_shared::constants::STATUS_SUCCESS;
use vex_shared::protocol::{
    new_correlation_id, ChannelInfo, ChannelRequest, ChatRequest, Envelope, ErrorReply, Inbound,
    Outbound, Permission, PermissionRequest, UserInfo, UserInfoRequest, UserRequest,
    UserSearchReply,
};
use vex_shared::types::{UserRef, SERVER_USER_ID};
use vex_shared::Identity;

use crate::config::{ConnectorConfig, Target};
use crate::correlation::{CorrelationTable, Dispatch};
use crate::error::ConnectorError;
use crate::events::{ChatEvent, ChatOrigin, CloseReason, ConnectorEvent, Phase};
use crate::history::chat_record;
use crate::transport::{Transport, TransportEvent};
use crate::{lock, SharedDatabase};

/// Collaborators injected into every connector of a session.
#[derive(Clone)]
pub struct ConnectorContext {
    pub identity: Arc<Identity>,
    pub db: SharedDatabase,
    pub config: ConnectorConfig,
}

/// Mutable per-connection state. Nothing here outlives the connection
/// except what the session reads back to resume into a fresh connector.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) phase: Phase,
    pub(crate) channel_id: Option<Uuid>,
    pub(crate) channels: Vec<ChannelInfo>,
    pub(crate) user: Option<UserInfo>,
    /// Channel to join as soon as it shows up in a channel list.
    pub(crate) autojoin: Option<Uuid>,
    pub(crate) history_retrieved: bool,
}

pub(crate) struct ConnectorInner {
    pub(crate) target: Target,
    pub(crate) config: ConnectorConfig,
    pub(crate) identity: Arc<Identity>,
    pub(crate) db: SharedDatabase,
    pub(crate) table: CorrelationTable,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) authenticated: watch::Sender<bool>,
    pub(crate) handshake_complete: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    events: mpsc::UnboundedSender<ConnectorEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectorInner {
    pub(crate) fn emit(&self, event: ConnectorEvent) {
        let _ = self.events.send(event);
    }

    /// Serialize and queue a frame. Sending on a closed connector is a no-op.
    pub(crate) fn send(&self, message: Outbound) -> bool {
        let Some(tx) = lock(&self.outbound).clone() else {
            debug!(kind = message.kind(), "Dropping frame, connector is closed");
            return false;
        };
        match message.to_json() {
            Ok(text) => tx.send(text).is_ok(),
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "Failed to encode frame");
                false
            }
        }
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        {
            let mut state = lock(&self.state);
            if state.phase == Phase::Closed || state.phase == phase {
                return;
            }
            state.phase = phase;
        }
        debug!(host = %self.target.host, ?phase, "Phase changed");
        self.emit(ConnectorEvent::Phase(phase));
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run `fut` as a connector task, aborted on close.
    pub(crate) fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        let mut tasks = lock(&self.tasks);
        if self.is_closed() {
            handle.abort();
            return;
        }
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Tear the connection down. Only the first call has any effect.
    pub(crate) fn close(&self, reason: CloseReason) {
        {
            let mut state = lock(&self.state);
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Closed;
        }

        self.shutdown.send_replace(true);
        lock(&self.outbound).take();
        self.table.cancel_all();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }

        if reason.is_retryable() || reason == CloseReason::Local {
            info!(host = %self.target.host, %reason, "Connector closed");
        } else {
            warn!(host = %self.target.host, %reason, "Connector closed");
        }
        self.emit(ConnectorEvent::Phase(Phase::Closed));
        self.emit(ConnectorEvent::Closed(reason));
    }

    /// Wait until `flag` is set. Returns `Cancelled` if the connector closes
    /// first.
    pub(crate) async fn wait_flag(
        &self,
        flag: &watch::Sender<bool>,
    ) -> Result<(), ConnectorError> {
        let mut rx = flag.subscribe();
        tokio::select! {
            set = rx.wait_for(|set| *set) => set.map(|_| ()).map_err(|_| ConnectorError::Cancelled),
            _ = self.wait_closed() => Err(ConnectorError::Cancelled),
        }
    }

    pub(crate) async fn wait_closed(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let _ = shutdown.wait_for(|down| *down).await;
    }

    pub(crate) async fn await_reply(
        &self,
        rx: oneshot::Receiver<Envelope>,
    ) -> Result<Envelope, ConnectorError> {
        tokio::select! {
            reply = rx => reply.map_err(|_| ConnectorError::Cancelled),
            _ = self.wait_closed() => Err(ConnectorError::Cancelled),
        }
    }

    /// Register `id`, send `message`, and wait for the correlated reply.
    pub(crate) async fn request(
        &self,
        id: String,
        message: Outbound,
    ) -> Result<Envelope, ConnectorError> {
        if self.is_closed() {
            return Err(ConnectorError::Cancelled);
        }
        let rx = self.table.register(id);
        self.send(message);
        server_reply(self.await_reply(rx).await?)
    }

    fn handle_frame(self: &Arc<Self>, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        let envelope = match self.table.dispatch(envelope) {
            Dispatch::Consumed => return,
            Dispatch::Unconsumed(envelope) => envelope,
        };

        let kind = envelope.kind().to_string();
        match envelope.into_inbound() {
            Ok(Inbound::Unknown) => debug!(kind, "Ignoring unknown frame kind"),
            Ok(inbound) => self.handle_inbound(inbound),
            Err(e) => warn!(kind, error = %e, "Dropping undecodable frame"),
        }
    }

    fn handle_inbound(self: &Arc<Self>, inbound: Inbound) {
        match inbound {
            Inbound::ClientInfo { client } => {
                lock(&self.state).user = Some(client.clone());
                if let Err(e) =
                    lock(&self.db).update_account_username(&self.target.host, &client.username)
                {
                    warn!(error = %e, "Failed to refresh account username");
                }
                self.emit(ConnectorEvent::ClientInfo(client));
            }
            Inbound::ServerMessage { message } => self.emit(ConnectorEvent::ServerNotice(message)),
            Inbound::ChannelPermRes { status } => {
                self.emit(ConnectorEvent::PermissionResult { status })
            }
            Inbound::UserInfoRes { match_list } => {
                self.emit(ConnectorEvent::UserSearch(match_list))
            }
            Inbound::ChannelLeaveRes { channel_id } => {
                {
                    let mut state = lock(&self.state);
                    if state.channel_id == Some(channel_id) {
                        state.channel_id = None;
                    }
                }
                self.emit(ConnectorEvent::Left(channel_id));
            }
            Inbound::AuthResult { status } => {
                if status == STATUS_SUCCESS {
                    info!(host = %self.target.host, "Authenticated");
                    self.authenticated.send_replace(true);
                    self.set_phase(Phase::Authenticated);
                    self.emit(ConnectorEvent::Authenticated);
                    self.send(Outbound::Channel(ChannelRequest::List {
                        message_id: new_correlation_id(),
                    }));
                } else {
                    warn!(host = %self.target.host, status, "Authentication refused");
                    self.close(CloseReason::Rejected(format!("authentication: {status}")));
                }
            }
            Inbound::WelcomeMessage { message } => self.emit(ConnectorEvent::Welcome(message)),
            Inbound::Chat(payload) => self.handle_chat(chat_record(payload, &self.target.host)),
            Inbound::ChannelList { channels } => {
                let autojoin = {
                    let mut state = lock(&self.state);
                    state.channels = channels.clone();
                    let listed = state
                        .autojoin
                        .filter(|id| channels.iter().any(|c| c.channel_id == *id));
                    if listed.is_some() {
                        state.autojoin = None;
                    }
                    listed
                };
                if let Some(channel_id) = autojoin {
                    info!(%channel_id, "Rejoining channel");
                    self.send(Outbound::Channel(ChannelRequest::Join {
                        transmission_id: new_correlation_id(),
                        channel_id,
                    }));
                }
                self.emit(ConnectorEvent::ChannelList(channels));
            }
            Inbound::ChannelJoinRes {
                status,
                channel_id,
                name,
            } => match channel_id {
                Some(channel_id) if status == STATUS_SUCCESS => {
                    {
                        let mut state = lock(&self.state);
                        state.channel_id = Some(channel_id);
                        state.autojoin = None;
                    }
                    info!(%channel_id, name, "Joined channel");
                    self.emit(ConnectorEvent::Joined { channel_id, name });
                    self.sync_history(channel_id);
                }
                _ => self.emit(ConnectorEvent::JoinRejected(status)),
            },
            Inbound::Error { message } => {
                warn!(host = %self.target.host, error = %message, "Server error");
                self.emit(ConnectorEvent::ServerError(message));
            }
            Inbound::Challenge { nonce, message_id } => {
                let Some(nonce) = nonce.or(message_id) else {
                    warn!("Challenge without a nonce, dropping");
                    return;
                };
                debug!("Answering server challenge");
                self.send(Outbound::ChallengeRes {
                    message_id: new_correlation_id(),
                    pubkey: self.identity.public_key_hex(),
                    response: self.identity.sign_hex(nonce.as_bytes()),
                });
            }
            Inbound::Pong => debug!("Uncorrelated pong"),
            Inbound::Unknown => {}
        }
    }

    fn handle_chat(&self, message: vex_store::ChatMessage) {
        let fresh = match lock(&self.db).insert_message(&message) {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(message_id = %message.message_id, error = %e, "Failed to cache message");
                true
            }
        };
        if !fresh {
            debug!(message_id = %message.message_id, "Ignoring duplicate chat message");
            return;
        }

        let (origin, username) = {
            let state = lock(&self.state);
            let origin = if state.history_retrieved {
                ChatOrigin::Live
            } else {
                ChatOrigin::Backlog
            };
            (origin, state.user.as_ref().map(|u| u.username.clone()))
        };
        let from_server = message.user_id == SERVER_USER_ID;
        let mentions_me = origin == ChatOrigin::Live
            && !from_server
            && username.is_some_and(|name| !name.is_empty() && message.message.contains(&name));

        self.emit(ConnectorEvent::Chat(ChatEvent {
            message,
            origin,
            from_server,
            mentions_me,
        }));
    }
}

/// Turn a correlated `error` frame into [`ConnectorError::ServerError`]
/// carrying the server's message.
pub(crate) fn server_reply(reply: Envelope) -> Result<Envelope, ConnectorError> {
    if reply.kind() != "error" {
        return Ok(reply);
    }
    let message = reply
        .decode::<ErrorReply>()
        .map(|e| e.message)
        .unwrap_or_default();
    Err(ConnectorError::ServerError(message))
}

async fn read_loop(
    inner: Arc<ConnectorInner>,
    mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Frame(text) => inner.handle_frame(&text),
            TransportEvent::Closed(reason) => {
                let reason = reason.unwrap_or_else(|| "connection closed".to_string());
                inner.close(CloseReason::Transport(reason));
                return;
            }
        }
    }
    inner.close(CloseReason::Transport("connection closed".to_string()));
}

/// Handle to a running connector. Cheap to clone.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("target", &self.inner.target)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Connector {
    /// Start a connector on an open transport.
    ///
    /// `autojoin` is joined once it appears in the server's channel list.
    pub fn spawn(
        transport: Transport,
        target: Target,
        ctx: ConnectorContext,
        autojoin: Option<Uuid>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectorEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let Transport { outbound, inbound } = transport;

        let inner = Arc::new(ConnectorInner {
            target,
            config: ctx.config,
            identity: ctx.identity,
            db: ctx.db,
            table: CorrelationTable::new(),
            state: Mutex::new(SessionState {
                phase: Phase::Connecting,
                channel_id: None,
                channels: Vec::new(),
                user: None,
                autojoin,
                history_retrieved: false,
            }),
            authenticated: watch::channel(false).0,
            handshake_complete: watch::channel(false).0,
            shutdown: watch::channel(false).0,
            outbound: Mutex::new(Some(outbound)),
            events: events_tx,
            tasks: Mutex::new(Vec::new()),
        });

        info!(server = %inner.target, "Connector starting");
        inner.spawn(read_loop(inner.clone(), inbound));
        inner.spawn(inner.clone().run_handshake());

        (Self { inner }, events_rx)
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    pub fn phase(&self) -> Phase {
        lock(&self.inner.state).phase
    }

    pub fn is_authenticated(&self) -> bool {
        *self.inner.authenticated.borrow()
    }

    pub fn is_handshake_complete(&self) -> bool {
        *self.inner.handshake_complete.borrow()
    }

    pub fn history_retrieved(&self) -> bool {
        lock(&self.inner.state).history_retrieved
    }

    pub fn channel_id(&self) -> Option<Uuid> {
        lock(&self.inner.state).channel_id
    }

    pub fn channels(&self) -> Vec<ChannelInfo> {
        lock(&self.inner.state).channels.clone()
    }

    /// Our account as last pushed by the server.
    pub fn user(&self) -> Option<UserInfo> {
        lock(&self.inner.state).user.clone()
    }

    /// Channel a replacement connector should rejoin: the current one, or
    /// the one still waiting to be auto-joined.
    pub fn resume_channel(&self) -> Option<Uuid> {
        let state = lock(&self.inner.state);
        state.channel_id.or(state.autojoin)
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.table.len()
    }

    /// Wait for the server to accept our challenge response.
    pub async fn authenticated(&self) -> Result<(), ConnectorError> {
        self.inner.wait_flag(&self.inner.authenticated).await
    }

    /// Wait for the server's key to be verified.
    pub async fn handshake_completed(&self) -> Result<(), ConnectorError> {
        self.inner.wait_flag(&self.inner.handshake_complete).await
    }

    pub fn close(&self) {
        self.inner.close(CloseReason::Local);
    }

    // -- lookups ---------------------------------------------------------

    /// Match a channel by list index, name or channel ID.
    pub fn find_channel(&self, reference: &str) -> Option<ChannelInfo> {
        let reference = reference.trim();
        let index = reference.parse::<i64>().ok();
        let id = Uuid::parse_str(reference).ok();
        lock(&self.inner.state)
            .channels
            .iter()
            .find(|c| Some(c.index) == index || c.name == reference || Some(c.channel_id) == id)
            .cloned()
    }

    /// Search users by name and tag.
    pub async fn lookup_user(
        &self,
        username: &str,
        tag: &str,
    ) -> Result<Vec<UserInfo>, ConnectorError> {
        let id = new_correlation_id();
        let message = Outbound::UserInfo(UserInfoRequest::Retrieve {
            transmission_id: id.clone(),
            username: username.to_string(),
            user_tag: tag.to_string(),
        });
        let timeout = self.inner.config.request_timeout;
        let reply = time::timeout(timeout, self.inner.request(id, message))
            .await
            .map_err(|_| ConnectorError::Timeout("user lookup"))??;
        Ok(reply.decode::<UserSearchReply>()?.match_list)
    }

    /// Turn a user reference into a user ID. Tags must match exactly one user.
    pub async fn resolve_user(&self, user: &UserRef) -> Result<Uuid, ConnectorError> {
        match user {
            UserRef::Id(id) => Ok(*id),
            UserRef::Tag { username, tag } => {
                let matches = self.lookup_user(username, tag).await?;
                match matches.as_slice() {
                    [only] => Ok(only.user_id),
                    [] => Err(ConnectorError::UserNotFound(user.to_string())),
                    several => Err(ConnectorError::AmbiguousUser {
                        reference: user.to_string(),
                        count: several.len(),
                    }),
                }
            }
        }
    }

    // -- outbound --------------------------------------------------------

    pub fn send_chat(&self, text: &str) -> Result<(), ConnectorError> {
        let channel_id = self.channel_id().ok_or(ConnectorError::NotInChannel)?;
        self.inner.send(Outbound::Chat(ChatRequest::Create {
            transmission_id: new_correlation_id(),
            channel_id,
            message: text.to_string(),
        }));
        Ok(())
    }

    pub fn list_channels(&self) {
        self.inner.send(Outbound::Channel(ChannelRequest::List {
            message_id: new_correlation_id(),
        }));
    }

    pub fn create_channel(&self, name: &str, private: bool) {
        self.inner.send(Outbound::Channel(ChannelRequest::Create {
            transmission_id: new_correlation_id(),
            name: name.to_string(),
            private_channel: private,
        }));
    }

    pub fn delete_channel(&self, channel_id: Uuid) {
        self.inner.send(Outbound::Channel(ChannelRequest::Delete {
            transmission_id: new_correlation_id(),
            channel_id,
        }));
    }

    /// Join a channel from the last list, leaving the current one first.
    pub fn join_channel(&self, reference: &str) -> Result<Uuid, ConnectorError> {
        let channel = self
            .find_channel(reference)
            .ok_or_else(|| ConnectorError::UnknownChannel(reference.to_string()))?;

        if let Some(current) = self.channel_id() {
            self.inner.send(Outbound::Channel(ChannelRequest::Leave {
                transmission_id: new_correlation_id(),
                channel_id: current,
            }));
        }
        self.inner.send(Outbound::Channel(ChannelRequest::Join {
            transmission_id: new_correlation_id(),
            channel_id: channel.channel_id,
        }));
        Ok(channel.channel_id)
    }

    pub fn leave_channel(&self) -> Result<(), ConnectorError> {
        let channel_id = self.channel_id().ok_or(ConnectorError::NotInChannel)?;
        self.inner.send(Outbound::Channel(ChannelRequest::Leave {
            transmission_id: new_correlation_id(),
            channel_id,
        }));
        Ok(())
    }

    pub fn set_nickname(&self, username: &str) {
        self.inner.send(Outbound::User(UserRequest::Nick {
            channel_id: self.channel_id(),
            username: username.to_string(),
        }));
    }

    /// Grant `user` access to a private channel. The outcome arrives as
    /// [`ConnectorEvent::PermissionResult`].
    pub async fn grant_permission(
        &self,
        channel: &str,
        user: &UserRef,
    ) -> Result<(), ConnectorError> {
        let permission = self.permission_for(channel, user).await?;
        self.inner.send(Outbound::ChannelPerm(PermissionRequest::Grant {
            transmission_id: new_correlation_id(),
            permission,
        }));
        Ok(())
    }

    pub async fn revoke_permission(
        &self,
        channel: &str,
        user: &UserRef,
    ) -> Result<(), ConnectorError> {
        let permission = self.permission_for(channel, user).await?;
        self.inner.send(Outbound::ChannelPerm(PermissionRequest::Revoke {
            transmission_id: new_correlation_id(),
            permission,
        }));
        Ok(())
    }

    async fn permission_for(
        &self,
        channel: &str,
        user: &UserRef,
    ) -> Result<Permission, ConnectorError> {
        let user_id = self.resolve_user(user).await?;
        let channel = self
            .find_channel(channel)
            .ok_or_else(|| ConnectorError::UnknownChannel(channel.to_string()))?;
        Ok(Permission {
            channel_id: channel.channel_id,
            user_id,
            power_level: 0,
        })
    }

    pub async fn set_power_level(
        &self,
        user: &UserRef,
        power_level: i64,
    ) -> Result<Uuid, ConnectorError> {
        let user_id = self.resolve_user(user).await?;
        self.inner.send(Outbound::User(UserRequest::PowerLevel {
            user_id,
            power_level,
        }));
        Ok(user_id)
    }

    pub async fn kick(&self, user: &UserRef) -> Result<Uuid, ConnectorError> {
        let user_id = self.resolve_user(user).await?;
        self.inner.send(Outbound::User(UserRequest::Kick { user_id }));
        Ok(user_id)
    }

    pub async fn ban(&self, user: &UserRef) -> Result<Uuid, ConnectorError> {
        let user_id = self.resolve_user(user).await?;
        self.inner.send(Outbound::User(UserRequest::Ban { user_id }));
        Ok(user_id)
    }
}
