//! Turning session events into terminal lines.

use chrono::Local;

use vex_net::{ChatEvent, ChatOrigin, ConnectorEvent, KeyMismatch, SessionEnd, SessionEvent};
use vex_shared::types::user_tag;

/// One line per event worth showing. Phase changes and bookkeeping events
/// render as nothing.
pub fn render(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Connector(event) => render_connector(event),
        SessionEvent::Reconnecting { attempt, delay } => Some(format!(
            "-- reconnecting in {}s (attempt {attempt})",
            delay.as_secs()
        )),
        SessionEvent::Ended(end) => Some(ended(end)),
    }
}

fn render_connector(event: &ConnectorEvent) -> Option<String> {
    let line = match event {
        ConnectorEvent::Authenticated => "-- logged in".to_string(),
        ConnectorEvent::Welcome(text) => format!("-- {text}"),
        ConnectorEvent::ServerNotice(text) => format!("-- server: {text}"),
        ConnectorEvent::ServerError(text) => format!("!! {text}"),
        ConnectorEvent::ClientInfo(user) => format!(
            "-- you are {}#{}",
            user.username,
            user_tag(&user.user_id)
        ),
        ConnectorEvent::ChannelList(channels) => {
            let mut lines = vec!["-- channels:".to_string()];
            for channel in channels {
                let private = if channel.is_public { "" } else { " (private)" };
                lines.push(format!("  {:>3}  #{}{private}", channel.index, channel.name));
            }
            lines.join("\n")
        }
        ConnectorEvent::Joined { name, .. } => format!("-- joined #{name}"),
        ConnectorEvent::JoinRejected(status) => format!("!! join refused: {status}"),
        ConnectorEvent::Left(_) => "-- left channel".to_string(),
        ConnectorEvent::PermissionResult { status } => format!("-- permission change: {status}"),
        ConnectorEvent::UserSearch(users) => format!("-- {} user(s) found", users.len()),
        ConnectorEvent::Chat(chat) => chat_line(chat),
        ConnectorEvent::HistorySynced { .. } => "-- up to date".to_string(),
        ConnectorEvent::Unresponsive => "!! server stopped answering".to_string(),
        ConnectorEvent::Closed(reason) => format!("-- disconnected: {reason}"),
        ConnectorEvent::KeyMismatch(prompt) => key_warning(prompt),
        ConnectorEvent::Phase(_) | ConnectorEvent::HandshakeComplete => return None,
    };
    Some(line)
}

pub fn chat_line(chat: &ChatEvent) -> String {
    let message = &chat.message;
    let time = message.created_at.with_timezone(&Local).format("%H:%M");
    if chat.from_server {
        return format!("[{time}] * {}", message.message);
    }
    let marker = match (chat.mentions_me, chat.origin) {
        (true, _) => ">",
        (false, ChatOrigin::Cache) => ".",
        (false, _) => " ",
    };
    format!(
        "[{time}]{marker}{}#{}: {}",
        message.username,
        user_tag(&message.user_id),
        message.message
    )
}

pub fn key_warning(prompt: &KeyMismatch) -> String {
    format!(
        "!! the key for {} changed\n   pinned:    {}\n   presented: {}\n   trust the new key? [y/N]",
        prompt.host,
        prompt.pinned_fingerprint(),
        prompt.presented_fingerprint()
    )
}

pub fn ended(end: &SessionEnd) -> String {
    match end {
        SessionEnd::Closed(reason) => format!("-- session over: {reason}"),
        SessionEnd::ConnectFailed(e) => format!("!! could not connect: {e}"),
        SessionEnd::Stopped => "-- session over".to_string(),
    }
}
