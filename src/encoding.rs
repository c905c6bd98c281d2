//! Text codec registry and detection.
//!
//! Responses arrive as bytes; everything downstream (text matching, length
//! checks, the expression binding) wants text. The registry maps the
//! user-facing codec names to `encoding_rs` codecs, auto-detection layers a
//! BOM sniff over the Content-Type charset hint, and calibration detection
//! brute-forces the registry looking for a codec whose decoded output
//! contains a string the user knows must appear.

use encoding_rs::Encoding;
use once_cell::sync::Lazy;

use crate::error::Error;

/// Registered codecs in calibration-probe order: common East-Asian codecs
/// first, since that is where calibration is actually used. Order is a
/// performance choice, not a correctness contract.
static REGISTRY: Lazy<Vec<(&'static str, &'static Encoding)>> = Lazy::new(|| {
    const NAMES: [&str; 37] = [
        "UTF-8",
        "GBK",
        "GB2312",
        "GB18030",
        "Big5",
        "Shift_JIS",
        "EUC-JP",
        "ISO-2022-JP",
        "EUC-KR",
        "UTF-16",
        "UTF-16BE",
        "UTF-16LE",
        "ISO-8859-1",
        "ISO-8859-2",
        "ISO-8859-3",
        "ISO-8859-4",
        "ISO-8859-5",
        "ISO-8859-6",
        "ISO-8859-7",
        "ISO-8859-8",
        "ISO-8859-9",
        "ISO-8859-10",
        "ISO-8859-13",
        "ISO-8859-14",
        "ISO-8859-15",
        "ISO-8859-16",
        "Windows-1250",
        "Windows-1251",
        "Windows-1252",
        "Windows-1253",
        "Windows-1254",
        "Windows-1255",
        "Windows-1256",
        "Windows-1257",
        "Windows-1258",
        "KOI8-R",
        "KOI8-U",
    ];
    NAMES
        .into_iter()
        .map(|name| (name, resolve_label(name)))
        .collect()
});

fn resolve_label(name: &str) -> &'static Encoding {
    match name {
        // WHATWG maps the bare "utf-16" label to little-endian; the registry
        // treats plain UTF-16 as big-endian unless a BOM says otherwise.
        "UTF-16" | "UTF-16BE" => encoding_rs::UTF_16BE,
        "UTF-16LE" => encoding_rs::UTF_16LE,
        other => Encoding::for_label(other.as_bytes())
            .unwrap_or_else(|| panic!("registry name '{other}' is not a known encoding label")),
    }
}

fn lookup(name: &str) -> Option<(&'static str, &'static Encoding)> {
    REGISTRY
        .iter()
        .find(|(registered, _)| registered.eq_ignore_ascii_case(name))
        .copied()
}

/// All registered codec names, in registry order.
pub fn supported_encodings() -> Vec<&'static str> {
    REGISTRY.iter().map(|(name, _)| *name).collect()
}

/// The short list surfaced as defaults for calibration.
pub fn common_encodings() -> Vec<&'static str> {
    vec![
        "UTF-8",
        "GBK",
        "GB2312",
        "GB18030",
        "Big5",
        "UTF-16",
        "UTF-16BE",
        "UTF-16LE",
        "ISO-8859-1",
        "Windows-1252",
        "Shift_JIS",
        "EUC-JP",
        "EUC-KR",
        "KOI8-R",
        "Windows-1251",
    ]
}

pub fn is_registered(name: &str) -> bool {
    lookup(name).is_some()
}

/// Decodes bytes with a named codec. Malformed sequences become the codec's
/// replacement character; only an unregistered name fails.
pub fn decode(bytes: &[u8], name: &str) -> Result<String, Error> {
    let (registered, encoding) = lookup(name).ok_or_else(|| Error::UnknownCodec(name.to_string()))?;
    Ok(decode_with(bytes, registered, encoding))
}

fn decode_with(bytes: &[u8], name: &str, encoding: &'static Encoding) -> String {
    // Plain "UTF-16" honors a BOM before falling back to big-endian.
    if name.eq_ignore_ascii_case("utf-16") {
        if let Some((bom_encoding, _)) = Encoding::for_bom(bytes) {
            return bom_encoding.decode(bytes).0.into_owned();
        }
    }
    // A matching BOM is stripped; a foreign BOM never switches the codec.
    let (text, _) = encoding.decode_with_bom_removal(bytes);
    text.into_owned()
}

/// Auto-detects the codec of a response body: BOM first, then the
/// Content-Type `charset=` hint, then a strict UTF-8 check, then
/// windows-1252. Returns the decoded text and the winning codec's name.
/// When the winner is UTF-8 the text is simply the bytes read as UTF-8.
pub fn auto_detect(bytes: &[u8], content_type: &str) -> (String, &'static str) {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        let (text, _, _) = encoding.decode(bytes);
        return (text.into_owned(), encoding.name());
    }

    if let Some(charset) = charset_hint(content_type) {
        if let Some(encoding) = Encoding::for_label(charset.as_bytes()) {
            if encoding != encoding_rs::UTF_8 {
                let (text, _, _) = encoding.decode(bytes);
                return (text.into_owned(), encoding.name());
            }
        }
    }

    if std::str::from_utf8(bytes).is_ok() {
        return (String::from_utf8_lossy(bytes).into_owned(), "UTF-8");
    }

    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    (text.into_owned(), encoding_rs::WINDOWS_1252.name())
}

/// Finds the first registered codec whose decoded text contains the
/// calibration string.
pub fn detect_by_calibration(bytes: &[u8], calibration: &str) -> Result<&'static str, Error> {
    if calibration.is_empty() {
        return Err(Error::Decode("calibration text is empty".to_string()));
    }

    for (name, encoding) in REGISTRY.iter().copied() {
        let decoded = decode_with(bytes, name, encoding);
        if decoded.contains(calibration) {
            tracing::debug!(encoding = name, "calibration text matched");
            return Ok(name);
        }
    }

    Err(Error::Decode(format!(
        "no registered encoding decodes to text containing '{calibration}'"
    )))
}

fn charset_hint(content_type: &str) -> Option<String> {
    let lower = content_type.to_ascii_lowercase();
    let start = lower.find("charset=")? + "charset=".len();
    let rest = &content_type[start..];
    let end = rest.find(';').unwrap_or(rest.len());
    let charset = rest[..end].trim().trim_matches('"').trim_matches('\'');
    if charset.is_empty() {
        None
    } else {
        Some(charset.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // "欢迎" in GBK.
    const GBK_WELCOME: [u8; 4] = [0xBB, 0xB6, 0xD3, 0xAD];

    #[test]
    fn registry_contains_the_required_families() {
        let names = supported_encodings();
        for expected in [
            "UTF-8",
            "UTF-16",
            "GBK",
            "GB18030",
            "Big5",
            "Shift_JIS",
            "EUC-JP",
            "ISO-2022-JP",
            "EUC-KR",
            "ISO-8859-1",
            "ISO-8859-16",
            "Windows-1250",
            "Windows-1258",
            "KOI8-R",
            "KOI8-U",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn decode_with_named_codec() {
        assert_eq!(decode(&GBK_WELCOME, "GBK").unwrap(), "欢迎");
        assert_eq!(decode("欢迎".as_bytes(), "UTF-8").unwrap(), "欢迎");
    }

    #[test]
    fn decode_names_are_case_insensitive() {
        assert_eq!(decode(&GBK_WELCOME, "gbk").unwrap(), "欢迎");
    }

    #[test]
    fn decode_rejects_unknown_codec() {
        let err = decode(b"x", "EBCDIC-42").unwrap_err();
        assert!(matches!(err, Error::UnknownCodec(_)));
    }

    #[test]
    fn malformed_bytes_decode_to_replacement_characters() {
        let decoded = decode(&GBK_WELCOME, "UTF-8").unwrap();
        assert!(decoded.contains('\u{FFFD}'));
        assert!(!decoded.contains("欢迎"));
    }

    #[test]
    fn calibration_finds_gbk() {
        assert_eq!(detect_by_calibration(&GBK_WELCOME, "欢迎").unwrap(), "GBK");
    }

    #[test]
    fn calibration_requires_text() {
        assert!(detect_by_calibration(&GBK_WELCOME, "").is_err());
    }

    #[test]
    fn calibration_fails_when_nothing_matches() {
        let err = detect_by_calibration(&GBK_WELCOME, "definitely-absent").unwrap_err();
        assert!(err.to_string().contains("no registered encoding"));
    }

    #[test]
    fn auto_detect_prefers_bom() {
        let utf16le = [0xFF, 0xFE, b'h', 0x00, b'i', 0x00];
        let (text, name) = auto_detect(&utf16le, "text/plain; charset=gbk");
        assert_eq!(text, "hi");
        assert_eq!(name, "UTF-16LE");
    }

    #[test]
    fn auto_detect_uses_charset_hint() {
        let (text, name) = auto_detect(&GBK_WELCOME, "text/html; charset=gbk");
        assert_eq!(text, "欢迎");
        assert_eq!(name, "GBK");
    }

    #[test]
    fn auto_detect_falls_back_to_utf8_for_valid_utf8() {
        let (text, name) = auto_detect("plain ascii".as_bytes(), "");
        assert_eq!(text, "plain ascii");
        assert_eq!(name, "UTF-8");
    }

    #[test]
    fn auto_detect_falls_back_to_windows_1252() {
        let (text, name) = auto_detect(&[0xE9], "");
        assert_eq!(text, "é");
        assert_eq!(name, "windows-1252");
    }

    #[test]
    fn auto_then_explicit_decode_agree() {
        let (auto_text, name) = auto_detect(&GBK_WELCOME, "text/html; charset=gbk");
        assert_eq!(decode(&GBK_WELCOME, name).unwrap(), auto_text);
    }

    #[test]
    fn common_encodings_are_all_registered() {
        for name in common_encodings() {
            assert!(is_registered(name), "{name} missing from registry");
        }
    }

    #[test]
    fn charset_hint_parsing() {
        assert_eq!(
            charset_hint("text/html; charset=UTF-8; boundary=x").as_deref(),
            Some("UTF-8")
        );
        assert_eq!(
            charset_hint("text/html; charset=\"gbk\"").as_deref(),
            Some("gbk")
        );
        assert_eq!(charset_hint("text/html"), None);
    }
}
