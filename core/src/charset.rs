//! Response body decoding.
//!
//! The charset declared in `Content-Type` always wins over the caller's
//! default. `Encoding::Raw` bypasses decoding entirely.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::FetchError;

/// Charset used when neither the response nor the caller names one.
pub const DEFAULT_CHARSET: &str = "utf-8";

static CHARSET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)charset\s*=\s*"?([^\s;"]+)"#).expect("charset pattern is valid"));

/// How the body of a successful response is turned into a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// Decode to text. The label is the fallback charset, used only when the
    /// response declares none; an empty label means `DEFAULT_CHARSET`.
    Decode(String),
    /// Return the body bytes untouched.
    Raw,
}

impl Encoding {
    pub fn decode(charset: impl Into<String>) -> Self {
        Encoding::Decode(charset.into())
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Decode(DEFAULT_CHARSET.to_string())
    }
}

/// Extract the `charset` parameter from a Content-Type value, lowercased.
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    CHARSET_PATTERN
        .captures(content_type)
        .map(|caps| caps[1].to_ascii_lowercase())
}

/// Pick the charset for a body: declared, else `fallback`, else the default.
pub fn resolve_charset(content_type: Option<&str>, fallback: &str) -> String {
    if let Some(declared) = content_type.and_then(charset_from_content_type) {
        return declared;
    }
    let fallback = fallback.trim();
    if fallback.is_empty() {
        DEFAULT_CHARSET.to_string()
    } else {
        fallback.to_ascii_lowercase()
    }
}

/// Labels decoded as true ISO-8859-1, where every byte is the code point
/// of the same value. The WHATWG registry would read them as windows-1252.
const LATIN1_LABELS: &[&str] = &[
    "iso-8859-1",
    "iso8859-1",
    "iso_8859-1",
    "latin1",
    "latin-1",
    "l1",
];

/// Labels decoded as 7-bit ASCII.
const ASCII_LABELS: &[&str] = &["ascii", "us-ascii"];

fn is_one_of(charset: &str, labels: &[&str]) -> bool {
    labels.iter().any(|label| label.eq_ignore_ascii_case(charset))
}

/// Decode `bytes` strictly under `charset`. No BOM sniffing is done, so a
/// leading BOM stays in the text.
pub fn decode(bytes: &[u8], charset: &str) -> Result<String, FetchError> {
    let charset = charset.trim();
    let malformed = || FetchError::Decode {
        charset: charset.to_string(),
    };

    if is_one_of(charset, LATIN1_LABELS) {
        return Ok(bytes.iter().map(|&b| char::from(b)).collect());
    }
    if is_one_of(charset, ASCII_LABELS) {
        if !bytes.is_ascii() {
            return Err(malformed());
        }
        return Ok(bytes.iter().map(|&b| char::from(b)).collect());
    }

    let encoding = encoding_rs::Encoding::for_label(charset.as_bytes()).ok_or_else(|| {
        FetchError::UnknownCharset {
            charset: charset.to_string(),
        }
    })?;
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
        .ok_or_else(malformed)
}
