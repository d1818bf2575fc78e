//! Raw inbound payload → [`NormalizedMessage`].
//!
//! The normalizer is a pure, total function: every input produces a record,
//! malformed sub-objects degrade to defaults, and the same input always
//! yields the same output for a given receipt time.

use serde_json::Value;

use courier_core::normalized::{Contact, Location, PollData, QuotedMessage, ReactionData};
use courier_core::wire::{ContextInfo, MediaPayload, MessageContent, RawInboundEvent};
use courier_core::{Jid, MessageType, NormalizedMessage};

/// Normalize with the wall clock as receipt time.
pub fn normalize_now(raw: &RawInboundEvent) -> NormalizedMessage {
    normalize(raw, chrono::Utc::now().timestamp_millis().max(0) as u64)
}

/// Normalize one inbound message. `received_at_ms` stands in for a missing
/// or unparseable `messageTimestamp`.
pub fn normalize(raw: &RawInboundEvent, received_at_ms: u64) -> NormalizedMessage {
    let key = raw.key();
    let remote_jid = key.remote_jid();
    let from = Jid::parse_opt(remote_jid);
    let participant_jid = key.participant();
    let participant = Jid::parse_opt(participant_jid);

    let timestamp = raw
        .timestamp_secs()
        .filter(|secs| *secs > 0)
        .map_or(received_at_ms, |secs| secs.saturating_mul(1000));

    let mut out = NormalizedMessage {
        message_id: key.id().unwrap_or_default().to_string(),
        timestamp,
        from: from.phone().map(String::from),
        from_lid: from.lid().map(String::from),
        from_jid: remote_jid.map(String::from),
        from_me: key.from_me(),
        participant: participant.phone().map(String::from),
        participant_lid: participant.lid().map(String::from),
        participant_jid: participant_jid.map(String::from),
        is_group: from.is_group(),
        message_type: MessageType::Unknown,
        content: None,
        caption: None,
        quoted_message: None,
        mentions: Vec::new(),
        mention_lids: Vec::new(),
        has_media: false,
        media_url: None,
        mime_type: None,
        file_name: None,
        file_size: None,
        duration: None,
        location: None,
        contacts: None,
        poll_data: None,
        reaction_data: None,
        raw_message: raw
            .message()
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())),
    };

    match MessageContent::classify(raw.message()) {
        MessageContent::Empty => {}
        MessageContent::Conversation(text) => {
            out.message_type = MessageType::Text;
            out.content = Some(text);
        }
        MessageContent::ExtendedText(ext) => {
            out.message_type = MessageType::Text;
            out.content = ext.text;
            if let Some(ctx) = ext.context_info {
                apply_context(&mut out, ctx);
            }
        }
        MessageContent::Image(media) => apply_media(&mut out, MessageType::Image, media),
        MessageContent::Video(media) => apply_media(&mut out, MessageType::Video, media),
        MessageContent::Audio(media) => {
            let kind = if media.ptt.unwrap_or(false) {
                MessageType::Voice
            } else {
                MessageType::Audio
            };
            apply_media(&mut out, kind, media);
        }
        MessageContent::Document(media) => apply_media(&mut out, MessageType::Document, media),
        MessageContent::Sticker(media) => apply_media(&mut out, MessageType::Sticker, media),
        MessageContent::Location(loc) => {
            out.message_type = MessageType::Location;
            out.location = Some(Location {
                latitude: loc.degrees_latitude,
                longitude: loc.degrees_longitude,
                name: non_empty(loc.name),
                address: non_empty(loc.address),
            });
        }
        MessageContent::Contact(card) => {
            out.message_type = MessageType::Contact;
            out.contacts = Some(vec![Contact {
                display_name: card.display_name,
                vcard: card.vcard,
            }]);
        }
        MessageContent::ContactsArray(list) => {
            out.message_type = MessageType::Contacts;
            out.contacts = Some(
                list.contacts
                    .into_iter()
                    .map(|c| Contact {
                        display_name: c.display_name,
                        vcard: c.vcard,
                    })
                    .collect(),
            );
        }
        MessageContent::Poll(poll) => {
            out.message_type = MessageType::Poll;
            out.poll_data = Some(PollData {
                name: poll.name,
                options: poll.options.into_iter().map(|o| o.option_name).collect(),
                selectable_count: poll.selectable_options_count,
            });
        }
        MessageContent::Reaction(reaction) => {
            out.message_type = MessageType::Reaction;
            out.reaction_data = Some(ReactionData {
                emoji: reaction.text,
                target_message_id: reaction.key.and_then(|k| k.id),
            });
        }
        MessageContent::Unsupported { first_key } => {
            out.message_type = MessageType::Unsupported;
            out.content = Some(first_key);
        }
    }

    out
}

fn apply_media(out: &mut NormalizedMessage, kind: MessageType, media: MediaPayload) {
    out.message_type = kind;
    out.has_media = kind.is_media();
    out.media_url = non_empty(media.url);
    out.mime_type = media.mimetype;
    out.file_size = media.file_length;

    match kind {
        MessageType::Image => {
            out.caption = non_empty(media.caption);
        }
        MessageType::Video => {
            out.caption = non_empty(media.caption);
            out.duration = media.seconds;
        }
        MessageType::Audio | MessageType::Voice => {
            out.duration = media.seconds;
        }
        MessageType::Document => {
            out.caption = non_empty(media.caption);
            out.file_name = media.file_name;
        }
        _ => {}
    }
}

fn apply_context(out: &mut NormalizedMessage, ctx: ContextInfo) {
    if let Some(quoted) = ctx.quoted_message.as_ref().filter(|q| q.is_object()) {
        let sender = Jid::parse_opt(ctx.participant.as_deref());
        out.quoted_message = Some(QuotedMessage {
            message_id: ctx.stanza_id.clone(),
            participant: sender.phone().map(String::from),
            participant_lid: sender.lid().map(String::from),
            participant_jid: ctx.participant.clone(),
            content: quoted_content(quoted),
        });
    }

    for raw in &ctx.mentioned_jid {
        let jid = Jid::parse(raw);
        if let Some(phone) = jid.phone() {
            out.mentions.push(phone.to_string());
        } else if let Some(lid) = jid.lid() {
            out.mention_lids.push(lid.to_string());
        }
    }
}

/// One-line rendering of a quoted message. Only one level deep.
pub fn quoted_content(quoted: &Value) -> String {
    match MessageContent::classify(Some(quoted)) {
        MessageContent::Conversation(text) => text,
        MessageContent::ExtendedText(ext) => ext.text.unwrap_or_default(),
        MessageContent::Image(m) => non_empty(m.caption).unwrap_or_else(|| "[Image]".into()),
        MessageContent::Video(m) => non_empty(m.caption).unwrap_or_else(|| "[Video]".into()),
        MessageContent::Audio(_) => "[Audio]".into(),
        MessageContent::Document(m) => {
            non_empty(m.file_name).unwrap_or_else(|| "[Document]".into())
        }
        MessageContent::Sticker(_) => "[Sticker]".into(),
        MessageContent::Location(_) => "[Location]".into(),
        MessageContent::Contact(_) => "[Contact]".into(),
        _ => "[Unknown]".into(),
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}
