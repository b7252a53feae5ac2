//! Pure input checks and sanitizers. Nothing here fails: validators return
//! `bool`, sanitizers always return a usable string.

pub const MAX_MESSAGE_CHARS: usize = 500;
pub const MAX_DISPLAY_NAME_CHARS: usize = 50;

const SESSION_HANDLE_MIN: usize = 6;
const SESSION_HANDLE_MAX: usize = 12;

/// Reactions a member may attach to a message.
pub const ALLOWED_EMOJI: [&str; 8] = ["👍", "❤️", "😂", "🔥", "🍻", "🎉", "😮", "🐺"];

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

pub fn sanitize_message(text: &str) -> String {
    let stripped = strip_angle_brackets(text);
    let collapsed = collapse_whitespace(stripped.trim());
    truncate_chars(&collapsed, MAX_MESSAGE_CHARS)
}

pub fn sanitize_display_name(name: &str) -> String {
    let stripped = strip_angle_brackets(name);
    truncate_chars(stripped.trim(), MAX_DISPLAY_NAME_CHARS)
        .trim_end()
        .to_owned()
}

/// Canonical id shape: hyphenated 8-4-4-4-12 hex, version nibble 1-5,
/// variant nibble 8/9/a/b.
pub fn validate_identifier(id: &str) -> bool {
    let bytes = id.as_bytes();
    if bytes.len() != 36 {
        return false;
    }

    for (index, byte) in bytes.iter().enumerate() {
        let ok = match index {
            8 | 13 | 18 | 23 => *byte == b'-',
            _ => byte.is_ascii_hexdigit(),
        };
        if !ok {
            return false;
        }
    }

    let version = bytes[14];
    let variant = bytes[19].to_ascii_lowercase();
    (b'1'..=b'5').contains(&version) && matches!(variant, b'8' | b'9' | b'a' | b'b')
}

pub fn validate_session_handle(handle: &str) -> bool {
    (SESSION_HANDLE_MIN..=SESSION_HANDLE_MAX).contains(&handle.len())
        && handle.chars().all(|ch| ch.is_ascii_alphanumeric())
}

pub fn validate_emoji(emoji: &str) -> bool {
    ALLOWED_EMOJI.contains(&emoji)
}

/// Image refs must be https and end in an approved image extension
/// (query strings and fragments are ignored for the extension check).
pub fn validate_image_ref(url: &str) -> bool {
    let Some(rest) = url.strip_prefix("https://") else {
        return false;
    };

    let path = rest.split(['?', '#']).next().unwrap_or_default();
    let Some((host, file_path)) = path.split_once('/') else {
        return false;
    };
    if host.is_empty() || url.chars().any(|ch| ch.is_whitespace() || ch == '<' || ch == '>') {
        return false;
    }

    file_path
        .rsplit_once('.')
        .map(|(stem, ext)| {
            !stem.is_empty() && IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        })
        .unwrap_or(false)
}

fn strip_angle_brackets(input: &str) -> String {
    input.chars().filter(|ch| *ch != '<' && *ch != '>').collect()
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}
