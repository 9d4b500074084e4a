//! Bijective encoding between arbitrary UTF-8 identifiers and the
//! `[0-9A-Za-z_]` alphabet allowed in environment variable names.
//!
//! Characters outside the word alphabet are replaced with `_x<hex>_`, where
//! `<hex>` is the big-endian hex form of the code point with leading zero
//! nibbles stripped (padded back to an even digit count for multi-digit
//! values). A literal `_` whose following text would read back as an escape
//! is itself escaped as `_x5f_`, which keeps the encoding injective.
//! `unwordify` reverses the encoding; text that merely resembles an escape
//! is passed through untouched.

use crate::error::{LookoutError, LookoutResult};

fn is_word_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

fn hex_escape(c: char) -> String {
    let mut hex = format!("{:x}", c as u32);
    if hex.len() > 1 && hex.len() % 2 != 0 {
        hex.insert(0, '0');
    }
    format!("_x{hex}_")
}

/// Encode `text` into the word alphabet. Total: never fails.
///
/// Most underscores pass through (`host_observer` stays `host_observer`),
/// but a literal `_` that would combine with the following text into a
/// well-formed escape is re-encoded as `_x5f_` so that decoding cannot
/// confuse it with an emitted escape.
pub fn wordify(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        if !is_word_char(c) {
            out.push_str(&hex_escape(c));
        } else if c == '_' && mimics_escape(&chars[i + 1..]) {
            out.push_str(&hex_escape('_'));
        } else {
            out.push(c);
        }
    }
    out
}

/// True when a literal `_` followed by `rest` would decode as an escape:
/// `x`, then one or more hex digits, then a character whose own encoding
/// begins with `_` (a literal underscore, or anything escaped). Word
/// characters are emitted verbatim, so inspecting the input is enough.
fn mimics_escape(rest: &[char]) -> bool {
    if rest.first() != Some(&'x') {
        return false;
    }
    let mut i = 1;
    while i < rest.len() && rest[i].is_ascii_hexdigit() {
        i += 1;
    }
    if i == 1 {
        // `_x` with no hex digits decodes as literal text.
        return false;
    }
    match rest.get(i) {
        Some(&next) => next == '_' || !is_word_char(next),
        None => false,
    }
}

/// Decode a wordified string back to its original text.
///
/// A `_x<hex>_` run with at least one hex digit is decoded; anything else,
/// including `_x` with no closing underscore or with non-hex content, is
/// literal text. A well-formed escape whose hex value is not a valid Unicode
/// scalar is a decode error.
pub fn unwordify(text: &str) -> LookoutResult<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if let Some((decoded, consumed)) = try_escape(&chars[i..], text)? {
            out.push(decoded);
            i += consumed;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Attempt to decode an escape at the head of `rest`. Returns the decoded
/// character and the number of chars consumed, or `None` when the head does
/// not match the escape pattern.
fn try_escape(rest: &[char], input: &str) -> LookoutResult<Option<(char, usize)>> {
    if rest.len() < 4 || rest[0] != '_' || rest[1] != 'x' {
        return Ok(None);
    }
    let mut end = 2;
    while end < rest.len() && rest[end].is_ascii_hexdigit() {
        end += 1;
    }
    if end == 2 || end >= rest.len() || rest[end] != '_' {
        // No hex digits or no closing underscore: literal text.
        return Ok(None);
    }
    let hex: String = rest[2..end].iter().collect();
    let code = u32::from_str_radix(&hex, 16).map_err(|e| LookoutError::Decode {
        input: input.to_string(),
        message: format!("invalid hex escape _x{hex}_: {e}"),
    })?;
    let decoded = char::from_u32(code).ok_or_else(|| LookoutError::Decode {
        input: input.to_string(),
        message: format!("escape _x{hex}_ is not a valid Unicode scalar value"),
    })?;
    Ok(Some((decoded, end + 1)))
}
