//! Base64URL codec for `/fetch/{token}` targets.
//!
//! Tokens use the RFC 4648 §5 alphabet (`A-Z a-z 0-9 - _`) with optional
//! trailing padding. Decoding maps the token back onto the standard
//! alphabet, restores padding, and decodes strictly: malformed input is
//! rejected, never repaired.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;

use crate::error::DecodeError;

/// Encode a target URL as an unpadded Base64URL token.
pub fn encode_target(url: &str) -> String {
    URL_SAFE_NO_PAD.encode(url.as_bytes())
}

/// Decode a Base64URL token back into the target string.
///
/// The result is not yet validated as a URL; see [`crate::TargetUrl::parse`].
pub fn decode_target(token: &str) -> Result<String, DecodeError> {
    let body = token.trim_end_matches('=');
    let padding = token.len() - body.len();

    if body.is_empty() {
        return Err(DecodeError::InvalidEncoding("empty token".into()));
    }
    if let Some(bad) = body
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(DecodeError::InvalidEncoding(format!(
            "character {bad:?} is outside the Base64URL alphabet"
        )));
    }
    if padding > 2 || (padding > 0 && token.len() % 4 != 0) {
        return Err(DecodeError::InvalidEncoding("malformed padding".into()));
    }
    if body.len() % 4 == 1 {
        return Err(DecodeError::InvalidEncoding(format!(
            "token length {} cannot be Base64",
            body.len()
        )));
    }

    let mut standard: String = body
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while standard.len() % 4 != 0 {
        standard.push('=');
    }

    let bytes = STANDARD
        .decode(standard.as_bytes())
        .map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;

    String::from_utf8(bytes)
        .map_err(|_| DecodeError::InvalidEncoding("decoded bytes are not UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_tokens() {
        assert_eq!(
            decode_target("aHR0cDovL2V4YW1wbGUuY29t").unwrap(),
            "http://example.com"
        );
        assert_eq!(
            decode_target("ZmlsZTovLy9ldGMvcGFzc3dk").unwrap(),
            "file:///etc/passwd"
        );
    }

    #[test]
    fn encode_strips_padding_and_uses_url_alphabet() {
        // "?>?" encodes to "Pz4/" in the standard alphabet.
        let token = encode_target("?>?");
        assert_eq!(token, "Pz4_");
        let token = encode_target("http://a.kr");
        assert!(!token.contains('='));
    }

    #[test]
    fn round_trips_urls_with_query_and_unicode() {
        let urls = [
            "http://www.law.go.kr/DRF/lawSearch.do?OC=test&target=law&type=XML&query=%EB%AF%BC%EB%B2%95",
            "https://example.com/",
            "https://example.com/a?b=c&d=e#frag",
            "http://korea.kr/민법",
        ];
        for url in urls {
            assert_eq!(decode_target(&encode_target(url)).unwrap(), url);
        }
    }

    #[test]
    fn accepts_optional_padding() {
        assert_eq!(decode_target("aGk").unwrap(), "hi");
        assert_eq!(decode_target("aGk=").unwrap(), "hi");
    }

    #[test]
    fn rejects_characters_outside_alphabet() {
        for token in ["invalid!!!", "aGk+", "aG/k", "a=Gk", "aGk%3D", "aGk k"] {
            let err = decode_target(token).unwrap_err();
            assert!(
                matches!(err, DecodeError::InvalidEncoding(_)),
                "{token}: {err:?}"
            );
        }
    }

    #[test]
    fn rejects_impossible_lengths_and_padding() {
        assert!(decode_target("").is_err());
        assert!(decode_target("====").is_err());
        assert!(decode_target("a").is_err());
        assert!(decode_target("aGk==").is_err());
        assert!(decode_target("aG===").is_err());
    }

    #[test]
    fn rejects_non_utf8_payload() {
        // 0xff 0xff
        let err = decode_target("__4").unwrap_err();
        assert_eq!(err.code(), "invalid-encoding");
    }
}
