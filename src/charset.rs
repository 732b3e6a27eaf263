//! Compiled-in character set table and escape routines.
//!
//! Only the sets a 4.1+ server commonly advertises are carried; lookups are
//! by canonical name or by collation number.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charset {
    /// Collation number as sent in greet/auth packets.
    pub nr: u8,
    pub name: &'static str,
    pub collation: &'static str,
    /// Maximum bytes per character.
    pub char_maxlen: u8,
}

pub const CHARSETS: &[Charset] = &[
    Charset { nr: 1, name: "big5", collation: "big5_chinese_ci", char_maxlen: 2 },
    Charset { nr: 7, name: "koi8r", collation: "koi8r_general_ci", char_maxlen: 1 },
    Charset { nr: 8, name: "latin1", collation: "latin1_swedish_ci", char_maxlen: 1 },
    Charset { nr: 9, name: "latin2", collation: "latin2_general_ci", char_maxlen: 1 },
    Charset { nr: 10, name: "swe7", collation: "swe7_swedish_ci", char_maxlen: 1 },
    Charset { nr: 11, name: "ascii", collation: "ascii_general_ci", char_maxlen: 1 },
    Charset { nr: 13, name: "sjis", collation: "sjis_japanese_ci", char_maxlen: 2 },
    Charset { nr: 16, name: "hebrew", collation: "hebrew_general_ci", char_maxlen: 1 },
    Charset { nr: 28, name: "gbk", collation: "gbk_chinese_ci", char_maxlen: 2 },
    Charset { nr: 33, name: "utf8", collation: "utf8_general_ci", char_maxlen: 3 },
    Charset { nr: 45, name: "utf8mb4", collation: "utf8mb4_general_ci", char_maxlen: 4 },
    Charset { nr: 51, name: "cp1251", collation: "cp1251_general_ci", char_maxlen: 1 },
    Charset { nr: 63, name: "binary", collation: "binary", char_maxlen: 1 },
];

pub fn find_by_name(name: &str) -> Option<&'static Charset> {
    CHARSETS.iter().find(|cs| cs.name.eq_ignore_ascii_case(name))
}

pub fn find_by_nr(nr: u8) -> Option<&'static Charset> {
    CHARSETS.iter().find(|cs| cs.nr == nr)
}

/// Backslash escaping, used when the session allows backslash escapes.
pub fn escape_slashes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{1a}' => out.push_str("\\Z"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            _ => out.push(ch),
        }
    }
    out
}

/// Quote doubling, used when the session has NO_BACKSLASH_ESCAPES set.
pub fn escape_quotes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch == '\'' {
            out.push_str("''");
        } else {
            out.push(ch);
        }
    }
    out
}
