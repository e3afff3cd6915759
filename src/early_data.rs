use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed early data header: {0}")]
pub struct EarlyDataError(String);

/// Decodes the optional 0-RTT payload carried in the `sec-websocket-protocol`
/// request header.
///
/// Clients encode it with the URL-safe base64 alphabet (`-`/`_`), usually
/// unpadded; the standard alphabet and trailing padding are tolerated. An
/// absent or empty header yields an empty payload, not an error.
pub fn decode(header: Option<&str>) -> Result<Vec<u8>, EarlyDataError> {
    let Some(raw) = header else {
        return Ok(Vec::new());
    };
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let normalized = raw
        .replace('+', "-")
        .replace('/', "_")
        .trim_end_matches('=')
        .to_string();

    URL_SAFE_NO_PAD
        .decode(normalized)
        .map_err(|e| EarlyDataError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_url_safe_encoding() {
        let plaintext: Vec<u8> = (0u8..=255).collect();
        let encoded = URL_SAFE_NO_PAD.encode(&plaintext);
        assert_eq!(decode(Some(&encoded)).unwrap(), plaintext);
    }

    #[test]
    fn accepts_standard_alphabet_with_padding() {
        use base64::engine::general_purpose::STANDARD;
        let plaintext = vec![0xFF, 0xFE, 0x01];
        let encoded = STANDARD.encode(&plaintext);
        assert_eq!(decode(Some(&encoded)).unwrap(), plaintext);
    }

    #[test]
    fn absent_and_empty_headers_yield_empty_payload() {
        assert_eq!(decode(None).unwrap(), Vec::<u8>::new());
        assert_eq!(decode(Some("")).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn malformed_base64_is_an_error() {
        assert!(decode(Some("!!not base64!!")).is_err());
    }
}
