//! Text and media extraction from inbound payloads, and outbound chunking.

use crate::message::{unwrap_payload, MediaKind, MediaPayload, MessagePayload};

/// A media descriptor recovered from an inbound payload, used for the
/// envelope's `<attachment/>` element and optionally for download.
#[derive(Debug, Clone)]
pub struct MediaRef {
    pub kind: MediaKind,
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
}

fn media_ref(kind: MediaKind, m: &MediaPayload) -> MediaRef {
    MediaRef {
        kind,
        mime_type: m.mime_type.clone(),
        caption: m.caption.clone(),
        file_name: m.file_name.clone(),
        file_size: m.file_size,
        seconds: m.seconds,
        width: m.width,
        height: m.height,
        is_voice_note: m.is_voice_note,
        media_key: m.media_key.clone(),
        direct_path: m.direct_path.clone(),
        url: m.url.clone(),
    }
}

/// Extract the best plain-text representation of an inbound payload.
/// Returns empty string when no text is present.
pub fn extract_text(payload: &MessagePayload) -> String {
    match unwrap_payload(payload) {
        MessagePayload::Text(text) => text.clone(),
        MessagePayload::ExtendedText { text, .. } => text.clone(),
        MessagePayload::Image(m) | MessagePayload::Video(m) | MessagePayload::Document(m) => {
            m.caption.clone().unwrap_or_default()
        }
        MessagePayload::Location {
            latitude,
            longitude,
            name,
        } => match name {
            Some(name) => format!("[Location: {}, {} — {}]", latitude, longitude, name),
            None => format!("[Location: {}, {}]", latitude, longitude),
        },
        _ => String::new(),
    }
}

/// Extract a media descriptor from an inbound payload, if the unwrapped
/// payload carries one.
pub fn extract_media(payload: &MessagePayload) -> Option<MediaRef> {
    match unwrap_payload(payload) {
        MessagePayload::Image(m) => Some(media_ref(MediaKind::Image, m)),
        MessagePayload::Video(m) => Some(media_ref(MediaKind::Video, m)),
        MessagePayload::Audio(m) => Some(media_ref(MediaKind::Audio, m)),
        MessagePayload::Document(m) => Some(media_ref(MediaKind::Document, m)),
        MessagePayload::Sticker(m) => Some(media_ref(MediaKind::Sticker, m)),
        _ => None,
    }
}

/// Greedy, line-preserving packer: never splits a line across chunks unless
/// the line itself exceeds `limit`, in which case it is hard-split.
pub fn chunk_text(input: &str, limit: usize) -> Vec<String> {
    if input.is_empty() {
        return vec![String::new()];
    }
    if input.len() <= limit {
        return vec![input.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in input.split('\n') {
        let mut line = line;
        loop {
            let needed = if current.is_empty() {
                line.len()
            } else {
                current.len() + 1 + line.len()
            };

            if needed <= limit {
                if !current.is_empty() {
                    current.push('\n');
                }
                current.push_str(line);
                break;
            }

            if line.len() > limit {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                let mut split_at = limit;
                while !line.is_char_boundary(split_at) {
                    split_at -= 1;
                }
                let (head, tail) = line.split_at(split_at);
                chunks.push(head.to_string());
                line = tail;
                continue;
            }

            chunks.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageContext;

    #[test]
    fn test_extract_text_plain() {
        let payload = MessagePayload::Text("hello".to_string());
        assert_eq!(extract_text(&payload), "hello");
    }

    #[test]
    fn test_extract_text_unwraps_view_once() {
        let inner = MessagePayload::Text("secret".to_string());
        let payload = MessagePayload::ViewOnce(Box::new(MessagePayload::Ephemeral(Box::new(
            inner,
        ))));
        assert_eq!(extract_text(&payload), "secret");
    }

    #[test]
    fn test_extract_text_location() {
        let payload = MessagePayload::Location {
            latitude: 1.5,
            longitude: 2.5,
            name: Some("HQ".to_string()),
        };
        assert_eq!(extract_text(&payload), "[Location: 1.5, 2.5 — HQ]");
    }

    #[test]
    fn test_extract_text_empty_for_contact() {
        let payload = MessagePayload::Contact {
            names: vec!["Alice".to_string()],
        };
        assert_eq!(extract_text(&payload), "");
    }

    #[test]
    fn test_extract_media_image_with_caption() {
        let media = MediaPayload {
            mime_type: Some("image/jpeg".to_string()),
            caption: Some("a photo".to_string()),
            context: Some(MessageContext::default()),
            ..Default::default()
        };
        let payload = MessagePayload::Image(media);
        let extracted = extract_media(&payload).unwrap();
        assert_eq!(extracted.kind, MediaKind::Image);
        assert_eq!(extracted.caption.as_deref(), Some("a photo"));
    }

    #[test]
    fn test_chunk_text_short_input_single_chunk() {
        assert_eq!(chunk_text("hello", 100), vec!["hello".to_string()]);
    }

    #[test]
    fn test_chunk_text_empty_input() {
        assert_eq!(chunk_text("", 100), vec!["".to_string()]);
    }

    #[test]
    fn test_chunk_text_packs_lines() {
        let input = "aaaa\nbbbb\ncccc";
        let chunks = chunk_text(input, 9);
        assert_eq!(chunks, vec!["aaaa\nbbbb".to_string(), "cccc".to_string()]);
        for chunk in &chunks {
            assert!(chunk.len() <= 9);
        }
    }

    #[test]
    fn test_chunk_text_hard_splits_long_line() {
        let input = "x".repeat(25);
        let chunks = chunk_text(&input, 10);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.len() <= 10);
        }
        assert_eq!(chunks.concat(), input);
    }
}
