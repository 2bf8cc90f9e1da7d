//! Envelope formatting and directive handling for agent input.

use crate::message::MessagePayload;
use crate::text::MediaRef;

const NO_REPLY_DIRECTIVE: &str = "<no-reply/>";

/// Metadata describing one inbound conversation turn, used to render the
/// `<message-context>` envelope prepended to agent input.
#[derive(Debug, Clone)]
pub struct EnvelopeMeta {
    pub channel: &'static str,
    pub kind: ConversationKind,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub timestamp: i64,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub is_mentioned: bool,
    pub quoted_text: Option<String>,
    pub media: Option<MediaRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationKind {
    Dm,
    Group,
}

impl ConversationKind {
    fn as_str(self) -> &'static str {
        match self {
            ConversationKind::Dm => "dm",
            ConversationKind::Group => "group",
        }
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

/// Render the `<context>…</context>` XML block for a conversation turn.
pub fn format_message_envelope(meta: &EnvelopeMeta) -> String {
    let mut out = String::new();
    out.push_str("<context>\n");
    out.push_str(&format!("  <channel>{}</channel>\n", meta.channel));
    out.push_str(&format!("  <type>{}</type>\n", meta.kind.as_str()));

    out.push_str("  <sender");
    if let Some(name) = &meta.sender_name {
        out.push_str(&format!(" name=\"{}\"", escape_attr(name)));
    }
    out.push_str(&format!(" jid=\"{}\" />\n", escape_attr(&meta.sender_id)));

    out.push_str(&format!("  <timestamp>{}</timestamp>\n", meta.timestamp));

    if meta.kind == ConversationKind::Group {
        out.push_str("  <group");
        if let Some(name) = &meta.group_name {
            out.push_str(&format!(" name=\"{}\"", escape_attr(name)));
        }
        if let Some(gid) = &meta.group_id {
            out.push_str(&format!(" jid=\"{}\"", escape_attr(gid)));
        }
        out.push_str(" />\n");

        if meta.is_mentioned {
            out.push_str("  <mentioned>true</mentioned>\n");
        }
    }

    if let Some(quoted) = &meta.quoted_text {
        out.push_str(&format!("  <quoted>{}</quoted>\n", escape_text(quoted)));
    }

    if let Some(media) = &meta.media {
        out.push_str("  <attachment type=\"");
        out.push_str(media_kind_str(media));
        out.push('"');
        if let Some(mime) = &media.mime_type {
            out.push_str(&format!(" mimeType=\"{}\"", escape_attr(mime)));
        }
        if let Some(size) = media.file_size {
            out.push_str(&format!(" size=\"{}\"", size));
        }
        if let Some(name) = &media.file_name {
            out.push_str(&format!(" fileName=\"{}\"", escape_attr(name)));
        }
        out.push_str(" />\n");
    }

    out.push_str("</context>");
    out
}

fn media_kind_str(media: &MediaRef) -> &'static str {
    use crate::message::MediaKind;
    match media.kind {
        MediaKind::Image => "image",
        MediaKind::Video => "video",
        MediaKind::Audio => "audio",
        MediaKind::Document => "document",
        MediaKind::Sticker => "sticker",
    }
}

/// Does the text contain the literal, case-sensitive no-reply directive?
pub fn contains_no_reply(text: &str) -> bool {
    text.contains(NO_REPLY_DIRECTIVE)
}

/// Remove the no-reply directive, trimming surrounding whitespace.
pub fn strip_directives(text: &str) -> String {
    text.replace(NO_REPLY_DIRECTIVE, "").trim().to_string()
}

/// Compare the message's mentioned-jid list against the bot's id(s) by
/// leading digit segment.
pub fn is_bot_mentioned(payload: &MessagePayload, bot_id: &str, bot_alt: Option<&str>) -> bool {
    let Some(context) = payload.context() else {
        return false;
    };

    let bot_digits = leading_digits(bot_id);
    let alt_digits = bot_alt.map(leading_digits);

    context.mentioned_jid.iter().any(|jid| {
        let jid_digits = leading_digits(jid);
        jid_digits == bot_digits || alt_digits.as_deref() == Some(jid_digits.as_str())
    })
}

fn leading_digits(s: &str) -> String {
    s.chars().take_while(|c| c.is_ascii_digit()).collect()
}

/// Extract the quoted message's text, if any context-info carries one.
pub fn get_quoted_text(payload: &MessagePayload) -> Option<String> {
    let context = payload.context()?;
    let quoted = context.quoted.as_ref()?;
    let text = crate::text::extract_text(quoted);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageContext;

    #[test]
    fn test_envelope_dm_minimal() {
        let meta = EnvelopeMeta {
            channel: "whatsapp",
            kind: ConversationKind::Dm,
            sender_id: "+1234567890".to_string(),
            sender_name: None,
            timestamp: 1700000000,
            group_id: None,
            group_name: None,
            is_mentioned: false,
            quoted_text: None,
            media: None,
        };
        let xml = format_message_envelope(&meta);
        assert!(xml.contains("<channel>whatsapp</channel>"));
        assert!(xml.contains("<type>dm</type>"));
        assert!(xml.contains("jid=\"+1234567890\""));
        assert!(!xml.contains("<group"));
    }

    #[test]
    fn test_envelope_group_mentioned() {
        let meta = EnvelopeMeta {
            channel: "whatsapp",
            kind: ConversationKind::Group,
            sender_id: "+1234567890".to_string(),
            sender_name: Some("Alice".to_string()),
            timestamp: 1700000000,
            group_id: Some("123@g.us".to_string()),
            group_name: Some("Team".to_string()),
            is_mentioned: true,
            quoted_text: Some("earlier message".to_string()),
            media: None,
        };
        let xml = format_message_envelope(&meta);
        assert!(xml.contains("<group name=\"Team\" jid=\"123@g.us\" />"));
        assert!(xml.contains("<mentioned>true</mentioned>"));
        assert!(xml.contains("<quoted>earlier message</quoted>"));
    }

    #[test]
    fn test_envelope_escapes_attribute_values() {
        let meta = EnvelopeMeta {
            channel: "whatsapp",
            kind: ConversationKind::Dm,
            sender_id: "+1 \"quote\" <tag>".to_string(),
            sender_name: None,
            timestamp: 0,
            group_id: None,
            group_name: None,
            is_mentioned: false,
            quoted_text: None,
            media: None,
        };
        let xml = format_message_envelope(&meta);
        assert!(xml.contains("&quot;"));
        assert!(xml.contains("&lt;tag&gt;"));
    }

    #[test]
    fn test_contains_and_strip_no_reply() {
        assert!(contains_no_reply("ok <no-reply/>"));
        assert!(!contains_no_reply("no reply here"));
        assert_eq!(strip_directives("  ok <no-reply/>  "), "ok");
    }

    #[test]
    fn test_is_bot_mentioned_matches_leading_digits() {
        let payload = MessagePayload::ExtendedText {
            text: "hey @bot".to_string(),
            context: Some(MessageContext {
                mentioned_jid: vec!["5551234@s.whatsapp.net".to_string()],
                quoted: None,
            }),
        };
        assert!(is_bot_mentioned(&payload, "5551234:7@s.whatsapp.net", None));
        assert!(!is_bot_mentioned(&payload, "9999999", None));
    }

    #[test]
    fn test_get_quoted_text() {
        let payload = MessagePayload::ExtendedText {
            text: "reply".to_string(),
            context: Some(MessageContext {
                mentioned_jid: vec![],
                quoted: Some(Box::new(MessagePayload::Text("original".to_string()))),
            }),
        };
        assert_eq!(get_quoted_text(&payload).as_deref(), Some("original"));
    }
}
