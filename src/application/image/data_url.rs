//! Inline (`data:`) image encoding helpers.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const FALLBACK_MIME: &str = "application/octet-stream";

/// Encodes raw bytes as a `data:<mime>;base64,<payload>` string.
#[must_use]
pub fn to_data_url(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Splits a base64 data URL into its MIME type and decoded bytes.
#[must_use]
pub fn decode_data_url(value: &str) -> Option<(String, Vec<u8>)> {
    let rest = value.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let bytes = STANDARD.decode(payload).ok()?;
    Some((mime.to_string(), bytes))
}

/// Returns true if `value` is already inline image data.
#[must_use]
pub fn is_inline(value: &str) -> bool {
    value.starts_with("data:")
}

/// Picks the MIME type for fetched bytes: the reported content type when
/// present, otherwise a guess from the URL extension.
#[must_use]
pub fn resolve_mime(content_type: Option<&str>, url: &str) -> String {
    content_type
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
        .filter(|ct| !ct.is_empty())
        .map(str::to_ascii_lowercase)
        .or_else(|| mime_from_url(url).map(String::from))
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

/// Guesses an image MIME type from the path extension of `url`.
#[must_use]
pub fn mime_from_url(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file.rsplit_once('.')?;

    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

/// File extension used when storing an upload of the given MIME type.
#[must_use]
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_encode_and_decode() {
        let url = to_data_url(b"\x89PNG", "image/png");
        assert_eq!(url, "data:image/png;base64,iVBORw==");
        assert!(is_inline(&url));

        let (mime, bytes) = decode_data_url(&url).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"\x89PNG");
    }

    #[test]
    fn test_decode_rejects_non_base64_urls() {
        assert!(decode_data_url("https://x.test/a.png").is_none());
        assert!(decode_data_url("data:text/plain,hello").is_none());
    }

    #[test_case(Some("image/webp"), "https://x.test/a.png", "image/webp" ; "content_type_wins")]
    #[test_case(Some("image/JPEG; charset=binary"), "https://x.test/a", "image/jpeg" ; "params_stripped")]
    #[test_case(None, "https://x.test/a.PNG?token=abc", "image/png" ; "extension_with_query")]
    #[test_case(Some(""), "https://x.test/a.gif#frag", "image/gif" ; "empty_content_type")]
    #[test_case(None, "https://x.test/avatar", "application/octet-stream" ; "unknown")]
    fn test_resolve_mime(content_type: Option<&str>, url: &str, expected: &str) {
        assert_eq!(resolve_mime(content_type, url), expected);
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("image/jpeg"), Some("jpg"));
        assert_eq!(extension_for_mime("text/plain"), None);
    }
}
