//! Binary request-body encoding for the auth protocol.
//!
//! Bodies are sequences of length-prefixed fields: a tag byte, a varint
//! length, then the value. Field tags and lengths are protocol constants
//! reproduced bit-exact from the live service; they are not negotiable.
//! Every authenticated request carries a freshly generated 150-character
//! alphanumeric nonce.

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{Error, Result};

/// Tag of the phone-number field
const TAG_PHONE: u8 = 0x0a;
/// Tag of the nonce field (also used for the password field in login bodies)
const TAG_NONCE: u8 = 0x12;
/// Tag of the SMS-code field (also used for the version-code field)
const TAG_CODE: u8 = 0x1a;

/// Length of the random nonce included in every authenticated request
pub const NONCE_LEN: usize = 150;

/// Length of the password when framed after a backtick marker
const MARKED_PASSWORD_LEN: usize = 96;
/// Byte range of the password in the unmarked response framing
const UNMARKED_PASSWORD_RANGE: std::ops::Range<usize> = 5..166;

/// Generate a random alphanumeric token of the given length
pub fn generate_nonce(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Append one tag + varint-length + value field to `buf`
fn push_field(buf: &mut Vec<u8>, tag: u8, value: &[u8]) {
    buf.push(tag);
    let mut len = value.len();
    loop {
        let byte = (len & 0x7f) as u8;
        len >>= 7;
        if len == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
    buf.extend_from_slice(value);
}

/// Body of a `users.reserve` (request SMS code) call
pub fn request_code_body(phone: &str, nonce: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + phone.len() + 3 + nonce.len());
    push_field(&mut buf, TAG_PHONE, phone.as_bytes());
    push_field(&mut buf, TAG_NONCE, nonce.as_bytes());
    buf
}

/// Body of a `users.register` (validate SMS code) call
pub fn validate_code_body(phone: &str, nonce: &str, code: &str) -> Vec<u8> {
    let mut buf = request_code_body(phone, nonce);
    push_field(&mut buf, TAG_CODE, code.as_bytes());
    buf
}

/// Body of a `token` (login) call
pub fn login_body(phone: &str, nonce: &str, password: &str, version_code: &str) -> Vec<u8> {
    let mut buf = request_code_body(phone, nonce);
    push_field(&mut buf, TAG_NONCE, password.as_bytes());
    push_field(&mut buf, TAG_CODE, version_code.as_bytes());
    buf
}

/// Extract the account password from a `users.register` response body.
///
/// Two framings are observed in the wild and both are permanently supported,
/// selected only by the presence of the backtick marker byte: the password is
/// the 96 bytes following the marker if one is present, otherwise a fixed
/// 161-byte slice starting at offset 5.
pub fn extract_password(body: &[u8]) -> Result<String> {
    let slice = match body.iter().position(|&b| b == b'`') {
        Some(marker) => {
            let start = marker + 1;
            body.get(start..start + MARKED_PASSWORD_LEN).ok_or_else(|| {
                Error::Protocol(format!(
                    "marked register response truncated at {} bytes",
                    body.len()
                ))
            })?
        }
        None => body.get(UNMARKED_PASSWORD_RANGE).ok_or_else(|| {
            Error::Protocol(format!(
                "register response too short for password: {} bytes",
                body.len()
            ))
        })?,
    };

    String::from_utf8(slice.to_vec())
        .map_err(|_| Error::Protocol("password is not valid UTF-8".to_string()))
}

/// Filter a login response down to printable characters; the remainder is the
/// bearer token (the framing bytes around it are non-printable).
pub fn filter_printable(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_graphic() || matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c'))
        .collect()
}
