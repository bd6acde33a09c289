use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User ID that servers put on messages they author themselves.
pub const SERVER_USER_ID: Uuid = Uuid::nil();

/// Cursor sent when nothing for the channel is cached yet.
pub const NIL_CURSOR: Uuid = Uuid::nil();

/// A way to name a user in moderation commands: either the exact user UUID
/// or a `username#tag` pair that the server resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRef {
    Id(Uuid),
    Tag { username: String, tag: String },
}

impl FromStr for UserRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = Uuid::parse_str(s) {
            return Ok(Self::Id(id));
        }
        match s.split_once('#') {
            Some((username, tag)) if !username.is_empty() && !tag.is_empty() => Ok(Self::Tag {
                username: username.to_string(),
                tag: tag.to_string(),
            }),
            _ => Err(format!("expected a user UUID or name#tag, got {s:?}")),
        }
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Tag { username, tag } => write!(f, "{username}#{tag}"),
        }
    }
}

/// The tag shown after a username: the second dash group of the user UUID.
pub fn user_tag(user_id: &Uuid) -> String {
    user_id
        .to_string()
        .split('-')
        .nth(1)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_ref_parses_uuid_and_tag() {
        let id = Uuid::new_v4();
        assert_eq!(id.to_string().parse::<UserRef>().unwrap(), UserRef::Id(id));
        assert_eq!(
            "Anonymous#2dcb".parse::<UserRef>().unwrap(),
            UserRef::Tag {
                username: "Anonymous".into(),
                tag: "2dcb".into()
            }
        );
        assert!("Anonymous".parse::<UserRef>().is_err());
        assert!("#2dcb".parse::<UserRef>().is_err());
    }

    #[test]
    fn test_user_tag() {
        let id = Uuid::parse_str("3cd23d1a-c267-4b4b-ab2a-1649b3aec322").unwrap();
        assert_eq!(user_tag(&id), "c267");
    }
}
