//! Inbound wire payloads as the transport delivers them.
//!
//! A raw inbound event is an envelope `{ key, messageTimestamp, pushName,
//! message }` where `message` holds exactly one "content kind" field
//! (`conversation`, `imageMessage`, ...) next to optional bookkeeping keys
//! such as `messageContextInfo`. [`MessageContent::classify`] turns that
//! object into a sum type so the rest of the pipeline never probes optional
//! fields.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One inbound message exactly as received. Never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawInboundEvent(Value);

impl RawInboundEvent {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn key(&self) -> MessageKey<'_> {
        MessageKey(self.0.get("key"))
    }

    /// The `message` object, if present and non-null.
    pub fn message(&self) -> Option<&Value> {
        self.0.get("message").filter(|m| !m.is_null())
    }

    /// `messageTimestamp` in seconds. Accepts a number, a numeric string,
    /// or a `{low, high}` 64-bit long as emitted by protobuf JSON encoders.
    pub fn timestamp_secs(&self) -> Option<u64> {
        match self.0.get("messageTimestamp")? {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
            Value::String(s) => s.trim().parse().ok(),
            Value::Object(long) => {
                let low = long.get("low")?.as_i64()?;
                let high = long.get("high").and_then(Value::as_i64).unwrap_or(0);
                Some(((high as u64) << 32) | (low as u32 as u64))
            }
            _ => None,
        }
    }
}

/// Borrowed view of the `key` sub-object.
#[derive(Clone, Copy, Debug)]
pub struct MessageKey<'a>(Option<&'a Value>);

impl<'a> MessageKey<'a> {
    fn str_field(&self, name: &str) -> Option<&'a str> {
        self.0?.get(name)?.as_str()
    }

    pub fn id(&self) -> Option<&'a str> {
        self.str_field("id")
    }

    pub fn remote_jid(&self) -> Option<&'a str> {
        self.str_field("remoteJid")
    }

    pub fn participant(&self) -> Option<&'a str> {
        self.str_field("participant").filter(|p| !p.is_empty())
    }

    pub fn from_me(&self) -> bool {
        self.0
            .and_then(|k| k.get("fromMe"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextInfo {
    #[serde(deserialize_with = "tolerant")]
    pub stanza_id: Option<String>,
    #[serde(deserialize_with = "tolerant")]
    pub participant: Option<String>,
    #[serde(deserialize_with = "tolerant")]
    pub quoted_message: Option<Value>,
    #[serde(deserialize_with = "tolerant_list")]
    pub mentioned_jid: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtendedText {
    #[serde(deserialize_with = "tolerant")]
    pub text: Option<String>,
    #[serde(deserialize_with = "tolerant")]
    pub context_info: Option<ContextInfo>,
}

/// Shared shape of image, video, audio, document and sticker payloads.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaPayload {
    #[serde(deserialize_with = "tolerant")]
    pub url: Option<String>,
    #[serde(deserialize_with = "tolerant")]
    pub mimetype: Option<String>,
    #[serde(deserialize_with = "tolerant")]
    pub caption: Option<String>,
    #[serde(deserialize_with = "tolerant")]
    pub file_name: Option<String>,
    #[serde(deserialize_with = "tolerant")]
    pub file_length: Option<Value>,
    #[serde(deserialize_with = "tolerant")]
    pub seconds: Option<Value>,
    #[serde(deserialize_with = "tolerant")]
    pub ptt: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationPayload {
    #[serde(deserialize_with = "tolerant")]
    pub degrees_latitude: Option<Value>,
    #[serde(deserialize_with = "tolerant")]
    pub degrees_longitude: Option<Value>,
    #[serde(deserialize_with = "tolerant")]
    pub name: Option<String>,
    #[serde(deserialize_with = "tolerant")]
    pub address: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactCard {
    #[serde(deserialize_with = "tolerant")]
    pub display_name: Option<String>,
    #[serde(deserialize_with = "tolerant")]
    pub vcard: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContactsArray {
    #[serde(deserialize_with = "tolerant_list")]
    pub contacts: Vec<ContactCard>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollOption {
    #[serde(deserialize_with = "tolerant")]
    pub option_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollCreation {
    #[serde(deserialize_with = "tolerant")]
    pub name: Option<String>,
    #[serde(deserialize_with = "tolerant_list")]
    pub options: Vec<PollOption>,
    #[serde(deserialize_with = "tolerant")]
    pub selectable_options_count: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReactionKey {
    #[serde(deserialize_with = "tolerant")]
    pub id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReactionPayload {
    #[serde(deserialize_with = "tolerant")]
    pub text: Option<String>,
    #[serde(deserialize_with = "tolerant")]
    pub key: Option<ReactionKey>,
}

/// The content kind carried by one message.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageContent {
    /// No `message` object, or an empty one.
    Empty,
    Conversation(String),
    ExtendedText(ExtendedText),
    Image(MediaPayload),
    Video(MediaPayload),
    Audio(MediaPayload),
    Document(MediaPayload),
    Sticker(MediaPayload),
    Location(LocationPayload),
    Contact(ContactCard),
    ContactsArray(ContactsArray),
    Poll(PollCreation),
    Reaction(ReactionPayload),
    /// A payload with no recognized kind; carries its first key for diagnostics.
    Unsupported { first_key: String },
}

impl MessageContent {
    /// Classify a `message` object. Kinds are tested in a fixed priority
    /// order; the first populated one wins.
    pub fn classify(message: Option<&Value>) -> Self {
        let Some(Value::Object(fields)) = message else {
            return Self::Empty;
        };
        if fields.is_empty() {
            return Self::Empty;
        }

        if let Some(text) = fields.get("conversation").and_then(Value::as_str) {
            if !text.is_empty() {
                return Self::Conversation(text.to_string());
            }
        }
        if let Some(v) = kind(fields, "extendedTextMessage") {
            return Self::ExtendedText(lenient(v));
        }
        if let Some(v) = kind(fields, "imageMessage") {
            return Self::Image(lenient(v));
        }
        if let Some(v) = kind(fields, "videoMessage") {
            return Self::Video(lenient(v));
        }
        if let Some(v) = kind(fields, "audioMessage") {
            return Self::Audio(lenient(v));
        }
        if let Some(v) = kind(fields, "documentMessage") {
            return Self::Document(lenient(v));
        }
        if let Some(v) = kind(fields, "stickerMessage") {
            return Self::Sticker(lenient(v));
        }
        if let Some(v) = kind(fields, "locationMessage") {
            return Self::Location(lenient(v));
        }
        if let Some(v) = kind(fields, "contactMessage") {
            return Self::Contact(lenient(v));
        }
        if let Some(v) = kind(fields, "contactsArrayMessage") {
            return Self::ContactsArray(lenient(v));
        }
        if let Some(v) = kind(fields, "pollCreationMessage") {
            return Self::Poll(lenient(v));
        }
        if let Some(v) = kind(fields, "reactionMessage") {
            return Self::Reaction(lenient(v));
        }

        // Wire order is preserved (serde_json `preserve_order`).
        let first_key = fields.keys().next().cloned().unwrap_or_default();
        Self::Unsupported { first_key }
    }
}

fn kind<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    fields.get(name).filter(|v| v.is_object())
}

/// Deserialize a sub-payload, degrading to defaults when the shape is off.
fn lenient<T: DeserializeOwned + Default>(value: &Value) -> T {
    T::deserialize(value).unwrap_or_default()
}

/// One field of a sub-payload. A `null` or mistyped value becomes the
/// default for that field only, so its siblings survive.
fn tolerant<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// A list field. Anything but an array is empty; malformed elements are
/// dropped individually.
fn tolerant_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| T::deserialize(item).ok())
        .collect())
}
