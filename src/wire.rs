//! Query-string payload codec.
//!
//! Every message on the bus is a flat `key=value&key2=value2` string.
//! Keys are case-sensitive and may repeat; the core only ever reads the
//! first value of a key.
//!
//! Decoding is strict: every `&`-separated field must contain `=`, and an
//! empty field (`a=1&&b=2`, or an empty payload) is malformed.  Blank
//! values are kept.  `+` decodes to a space and `%XX` to the byte it
//! names; an invalid escape is left as-is.

use core::fmt::Write as _;

use crate::error::{Error, Result};

/// A decoded payload.  Field order follows the first occurrence of each key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    fields: Vec<(String, Vec<String>)>,
}

impl Payload {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Strictly decode a query string.
    pub fn decode(raw: &str) -> Result<Self> {
        let mut payload = Self::new();
        for field in raw.split('&') {
            let Some((key, value)) = field.split_once('=') else {
                return Err(Error::MalformedMessage(format!("bad query field {field:?}")));
            };
            payload.push(unescape(key), unescape(value));
        }
        Ok(payload)
    }

    /// Encode back into a query string, repeating multi-valued keys.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (key, values) in &self.fields {
            for value in values {
                if !out.is_empty() {
                    out.push('&');
                }
                escape_into(&mut out, key);
                out.push('=');
                escape_into(&mut out, value);
            }
        }
        out
    }

    /// First value of `key`, if present.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.get_all(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of `key`, in arrival order.
    pub fn get_all(&self, key: &str) -> Option<&[String]> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    /// Append a value, creating the key if needed.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.fields.push((key, vec![value])),
        }
    }

    /// Replace the first value of an existing key.  Returns `false` when the
    /// key is absent.
    pub fn set_first(&mut self, key: &str, value: impl Into<String>) -> bool {
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, values)) if !values.is_empty() => {
                values[0] = value.into();
                true
            }
            _ => false,
        }
    }

    /// Keys in first-occurrence order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ── Escaping ─────────────────────────────────────────────────

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-' | b'~')
}

fn escape_into(out: &mut String, s: &str) {
    for &b in s.as_bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else if b == b' ' {
            out.push('+');
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn unescape(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
