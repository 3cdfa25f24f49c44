//! Text artifact decoding: UTF-8 first, Windows-1252 as the fallback.
//!
//! Windows-1252 maps every byte except 0x81, 0x8D, 0x8F, 0x90 and 0x9D. Those
//! five have no character and decode to a space.

use std::borrow::Cow;

/// How a text artifact was decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Windows1252,
}

/// Replacement for bytes with no Windows-1252 character.
pub const UNMAPPED_PLACEHOLDER: char = ' ';

// 0x80..=0x9F; every other byte maps to the same code point.
const HIGH_CONTROL: [Option<char>; 32] = [
    Some('\u{20AC}'),
    None,
    Some('\u{201A}'),
    Some('\u{0192}'),
    Some('\u{201E}'),
    Some('\u{2026}'),
    Some('\u{2020}'),
    Some('\u{2021}'),
    Some('\u{02C6}'),
    Some('\u{2030}'),
    Some('\u{0160}'),
    Some('\u{2039}'),
    Some('\u{0152}'),
    None,
    Some('\u{017D}'),
    None,
    None,
    Some('\u{2018}'),
    Some('\u{2019}'),
    Some('\u{201C}'),
    Some('\u{201D}'),
    Some('\u{2022}'),
    Some('\u{2013}'),
    Some('\u{2014}'),
    Some('\u{02DC}'),
    Some('\u{2122}'),
    Some('\u{0161}'),
    Some('\u{203A}'),
    Some('\u{0153}'),
    None,
    Some('\u{017E}'),
    Some('\u{0178}'),
];

/// Decode `bytes`, falling back to Windows-1252 when they are not UTF-8.
pub fn decode_text(bytes: &[u8]) -> (Cow<'_, str>, TextEncoding) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (Cow::Borrowed(s), TextEncoding::Utf8),
        Err(_) => (Cow::Owned(decode_windows_1252(bytes)), TextEncoding::Windows1252),
    }
}

pub fn decode_windows_1252(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => HIGH_CONTROL[(b - 0x80) as usize].unwrap_or(UNMAPPED_PLACEHOLDER),
            _ => b as char,
        })
        .collect()
}
