use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of message types a subscriber can receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    /// Audio flagged push-to-talk.
    Voice,
    Document,
    Sticker,
    Location,
    Contact,
    Contacts,
    Poll,
    Reaction,
    /// The envelope carried no payload.
    Unknown,
    /// A payload was present but of no recognized kind.
    Unsupported,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Location => "location",
            Self::Contact => "contact",
            Self::Contacts => "contacts",
            Self::Poll => "poll",
            Self::Reaction => "reaction",
            Self::Unknown => "unknown",
            Self::Unsupported => "unsupported",
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(
            self,
            Self::Image | Self::Video | Self::Audio | Self::Voice | Self::Document | Self::Sticker
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotedMessage {
    pub message_id: Option<String>,
    pub participant: Option<String>,
    pub participant_lid: Option<String>,
    pub participant_jid: Option<String>,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: Option<Value>,
    pub longitude: Option<Value>,
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub display_name: Option<String>,
    pub vcard: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollData {
    pub name: Option<String>,
    pub options: Vec<Option<String>>,
    pub selectable_count: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionData {
    pub emoji: Option<String>,
    pub target_message_id: Option<String>,
}

/// The canonical, consumer-facing record for one inbound message.
///
/// Every optional field serializes as `null` when unset so subscribers see a
/// stable set of keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    pub message_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub from: Option<String>,
    pub from_lid: Option<String>,
    pub from_jid: Option<String>,
    pub from_me: bool,
    pub participant: Option<String>,
    pub participant_lid: Option<String>,
    pub participant_jid: Option<String>,
    pub is_group: bool,
    pub message_type: MessageType,
    pub content: Option<String>,
    pub caption: Option<String>,
    pub quoted_message: Option<QuotedMessage>,
    pub mentions: Vec<String>,
    pub mention_lids: Vec<String>,
    pub has_media: bool,
    pub media_url: Option<String>,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<Value>,
    pub duration: Option<Value>,
    pub location: Option<Location>,
    pub contacts: Option<Vec<Contact>>,
    pub poll_data: Option<PollData>,
    pub reaction_data: Option<ReactionData>,
    pub raw_message: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&MessageType::Voice).unwrap(), "\"voice\"");
        assert_eq!(
            serde_json::to_string(&MessageType::Unsupported).unwrap(),
            "\"unsupported\""
        );
    }

    #[test]
    fn display_matches_wire_name() {
        assert_eq!(MessageType::Contacts.to_string(), "contacts");
        assert_eq!(MessageType::Unknown.to_string(), "unknown");
    }

    #[test]
    fn media_kinds() {
        assert!(MessageType::Voice.is_media());
        assert!(MessageType::Sticker.is_media());
        assert!(!MessageType::Location.is_media());
        assert!(!MessageType::Text.is_media());
    }
}
