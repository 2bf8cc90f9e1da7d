//! Logical inbound message shape, independent of wire format.

/// A single inbound event as delivered by the socket, already decoded from
/// whatever wire format the underlying client library uses.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: String,
    /// RawID of the conversation (DM peer or group).
    pub remote_id: String,
    pub from_me: bool,
    /// Present for group messages; identifies the sender within the group.
    pub participant_id: Option<String>,
    pub push_name: Option<String>,
    pub timestamp: i64,
    pub payload: Option<MessagePayload>,
}

/// The tagged union of everything a message payload can carry.
///
/// `ViewOnce`, `Ephemeral` and `Edited` are wrappers; callers must unwrap
/// them with [`unwrap_payload`] before inspecting the remaining variants.
#[derive(Debug, Clone)]
pub enum MessagePayload {
    Text(String),
    ExtendedText {
        text: String,
        context: Option<MessageContext>,
    },
    Image(MediaPayload),
    Video(MediaPayload),
    Audio(MediaPayload),
    Document(MediaPayload),
    Sticker(MediaPayload),
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
    },
    Contact {
        names: Vec<String>,
    },
    ViewOnce(Box<MessagePayload>),
    Ephemeral(Box<MessagePayload>),
    Edited(Box<MessagePayload>),
}

#[derive(Debug, Clone, Default)]
pub struct MediaPayload {
    pub mime_type: Option<String>,
    pub caption: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub seconds: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub is_voice_note: Option<bool>,
    pub media_key: Option<String>,
    pub direct_path: Option<String>,
    pub url: Option<String>,
    pub context: Option<MessageContext>,
}

/// Context info carried alongside a payload: mentions and the quoted message.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    pub mentioned_jid: Vec<String>,
    pub quoted: Option<Box<MessagePayload>>,
}

/// The media kind reported in an [`super::text::MediaRef`], mirroring the
/// wrapper variant that was unwrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

/// Strip view-once / ephemeral / edit wrappers, revealing the inner payload.
/// Wrappers may nest; this unwraps until a non-wrapper variant is reached.
pub fn unwrap_payload(payload: &MessagePayload) -> &MessagePayload {
    match payload {
        MessagePayload::ViewOnce(inner)
        | MessagePayload::Ephemeral(inner)
        | MessagePayload::Edited(inner) => unwrap_payload(inner),
        other => other,
    }
}

impl MessagePayload {
    /// Context info attached to this payload, if any.
    pub fn context(&self) -> Option<&MessageContext> {
        match self {
            MessagePayload::ExtendedText { context, .. } => context.as_ref(),
            MessagePayload::Image(m)
            | MessagePayload::Video(m)
            | MessagePayload::Audio(m)
            | MessagePayload::Document(m)
            | MessagePayload::Sticker(m) => m.context.as_ref(),
            _ => None,
        }
    }
}
