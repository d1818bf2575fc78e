//! Address (JID) resolution.
//!
//! The network addresses accounts and conversations with JIDs of the form
//! `<local>@<server>`. Three shapes are meaningful to subscribers:
//!
//! - `5511999999999@s.whatsapp.net` : a phone-number account
//! - `12036-1599@g.us` : a group; the part before `-` is the creator's number
//! - `abcdEF123@lid` : an opaque linked identity, not resolvable to a number
//!
//! Anything else resolves to nothing. Resolution never fails.

pub const USER_SERVER: &str = "@s.whatsapp.net";
pub const GROUP_SERVER: &str = "@g.us";
pub const LID_MARKER: &str = "@lid";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Jid {
    User { number: String },
    Group { creator: String },
    Lid { id: String },
    Unresolved,
}

impl Jid {
    pub fn parse(raw: &str) -> Self {
        if let Some(number) = raw.strip_suffix(USER_SERVER) {
            return Self::User {
                number: number.to_string(),
            };
        }
        if raw.ends_with(GROUP_SERVER) {
            let local = raw.split('@').next().unwrap_or_default();
            let creator = local.split('-').next().unwrap_or_default();
            return Self::Group {
                creator: creator.to_string(),
            };
        }
        if raw.contains(LID_MARKER) {
            let id = raw.split('@').next().unwrap_or_default();
            return Self::Lid { id: id.to_string() };
        }
        Self::Unresolved
    }

    /// Parse an optional address; a missing address is unresolved.
    pub fn parse_opt(raw: Option<&str>) -> Self {
        raw.map_or(Self::Unresolved, Self::parse)
    }

    /// Phone-style identifier: the account number, or the group creator.
    pub fn phone(&self) -> Option<&str> {
        match self {
            Self::User { number } => Some(number),
            Self::Group { creator } => Some(creator),
            Self::Lid { .. } | Self::Unresolved => None,
        }
    }

    pub fn lid(&self) -> Option<&str> {
        match self {
            Self::Lid { id } => Some(id),
            _ => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group { .. })
    }
}
