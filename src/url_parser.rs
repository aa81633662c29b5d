//! Share link parser for extracting share ids and extraction codes from free text.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{PanError, Result};
use crate::models::ShareReference;

/// Web share links: `https://<host>/s/<id>[...]`.
static SHARE_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://[a-z0-9.-]+(?::\d+)?/s/([a-zA-Z0-9_-]+)[\x21-\x7E]*")
        .expect("Invalid share URL regex")
});

/// App deep links: `quark://share/<id>`.
static APP_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)quark://share/([a-zA-Z0-9_-]+)[\x21-\x7E]*").expect("Invalid app URL regex")
});

/// Extraction code carried in the URL query.
static QUERY_PASSWORD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[?&](?:pwd|passcode)=([a-zA-Z0-9]+)").expect("Invalid query password regex")
});

/// Extraction code label in the surrounding text. English labels need a separator so that
/// ordinary prose ("the code is ...") is not mistaken for a label.
static TEXT_PASSWORD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:(?:密码|提取码|访问码)\s*[:：=]?|\b(?:passcode|password|pwd|code)\s*[:：=])\s*([a-zA-Z0-9]+)",
    )
    .expect("Invalid text password regex")
});

/// Characters that commonly trail a pasted link but are not part of it.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ')', ']', '!', '"', '\'', '>'];

/// Parse user supplied text into a [`ShareReference`].
///
/// The first share link in the text wins. The extraction code may appear before or after the
/// link, or in its query string.
///
/// # Examples
///
/// ```
/// use pan_share::url_parser::parse_share_text;
///
/// let share = parse_share_text("https://pan.example.com/s/abc123 密码: 1234").unwrap();
/// assert_eq!(share.share_id, "abc123");
/// assert_eq!(share.password.as_deref(), Some("1234"));
/// ```
pub fn parse_share_text(text: &str) -> Result<ShareReference> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PanError::Parse("input is empty".to_string()));
    }

    let captures = SHARE_URL_REGEX
        .captures(trimmed)
        .or_else(|| APP_URL_REGEX.captures(trimmed))
        .ok_or_else(|| PanError::Parse(format!("no share link found in: {}", trimmed)))?;

    let (Some(whole), Some(id)) = (captures.get(0), captures.get(1)) else {
        return Err(PanError::Parse(format!("no share link found in: {}", trimmed)));
    };

    let raw_url = whole.as_str().trim_end_matches(TRAILING_PUNCTUATION);
    let share_id = id.as_str().to_string();

    let password = QUERY_PASSWORD_REGEX
        .captures(raw_url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| {
            // Scan the text with the link cut out, so nothing inside the URL matches a label.
            let rest = format!("{} {}", &trimmed[..whole.start()], &trimmed[whole.end()..]);
            TEXT_PASSWORD_REGEX
                .captures(&rest)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        });

    Ok(ShareReference {
        share_id,
        password,
        raw_url: raw_url.to_string(),
    })
}
