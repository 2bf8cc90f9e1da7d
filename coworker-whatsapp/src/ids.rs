//! Conversation identity normalization.

const GROUP_SUFFIX: &str = "@g.us";
const DM_SUFFIX: &str = "@s.whatsapp.net";

/// Normalize a raw network identifier into its canonical form.
///
/// Group ids pass through unchanged. DM ids have their `@...` suffix and
/// `:...` device sub-id stripped; an all-digit head is prefixed with `+`.
pub fn normalize_id(s: &str) -> String {
    let s = s.trim();
    if s.is_empty() {
        return String::new();
    }
    if s.ends_with(GROUP_SUFFIX) {
        return s.to_string();
    }

    let head = s.split('@').next().unwrap_or(s);
    let head = head.split(':').next().unwrap_or(head);

    if head.starts_with('+') {
        return head.to_string();
    }
    if !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()) {
        return format!("+{}", head);
    }
    head.to_string()
}

/// Whether a raw conversation id identifies a group.
pub fn is_group_id(s: &str) -> bool {
    s.ends_with(GROUP_SUFFIX)
}

/// Convert a phone-like identifier into a DM JID, passing group/DM JIDs
/// that already carry an `@` through unchanged.
pub fn to_jid(s: &str) -> String {
    if s.contains('@') {
        return s.to_string();
    }
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{}{}", digits, DM_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_digits() {
        assert_eq!(normalize_id("1234567890"), "+1234567890");
    }

    #[test]
    fn test_normalize_strips_suffix_and_device_id() {
        assert_eq!(normalize_id("1234567890:5@s.whatsapp.net"), "+1234567890");
    }

    #[test]
    fn test_normalize_preserves_leading_plus() {
        assert_eq!(normalize_id("+1234567890@s.whatsapp.net"), "+1234567890");
    }

    #[test]
    fn test_normalize_preserves_group_suffix() {
        assert_eq!(normalize_id("123-456@g.us"), "123-456@g.us");
    }

    #[test]
    fn test_normalize_empty_is_empty() {
        assert_eq!(normalize_id(""), "");
        assert_eq!(normalize_id("   "), "");
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = normalize_id("1234567890:5@s.whatsapp.net");
        let twice = normalize_id(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_is_group_id() {
        assert!(is_group_id("123-456@g.us"));
        assert!(!is_group_id("1234567890@s.whatsapp.net"));
    }

    #[test]
    fn test_to_jid_passthrough() {
        assert_eq!(to_jid("123@g.us"), "123@g.us");
    }

    #[test]
    fn test_to_jid_from_phone() {
        assert_eq!(to_jid("+1 234 567"), "1234567@s.whatsapp.net");
    }
}
