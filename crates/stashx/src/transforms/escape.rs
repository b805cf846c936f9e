//! 🧼 JSON string escaping, by hand, because the document layout is by hand too.
//!
//! Backslash and double quote get a backslash. The five control characters with short
//! forms get them (`\b \t \n \f \r`). Every other code point below 0x20 becomes `\u00XX`.
//! Everything else passes through untouched, multi-byte UTF-8 included.

use std::fmt::Write;

/// 🧼 Escape `input` into a new string.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    escape_into(input, &mut out);
    out
}

/// 🧼 Escape `input` onto the end of `out`.
pub fn escape_into(input: &str, out: &mut String) {
    // -- 🏎️ fast path: nothing to escape, one memcpy and we're out
    if !input.bytes().any(needs_escape) {
        out.push_str(input);
        return;
    }

    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\u{08}' => out.push_str("\\b"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\u{0C}' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                // -- ✍️ writing into a String can't fail. the Result is a formality.
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
}

#[inline]
fn needs_escape(byte: u8) -> bool {
    byte < 0x20 || byte == b'\\' || byte == b'"'
}
