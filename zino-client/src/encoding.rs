// Wire text decoding with Windows CP1252 fallback

//! UTF-8 decoding with a CP1252/Latin-1 fallback
//!
//! The Zino server emits raw bytes collected from routers; interface
//! descriptions and history entries regularly contain Windows CP1252 or
//! Latin-1 text. Inbound lines are therefore decoded as UTF-8 first, and
//! any invalid sequence falls back byte by byte: 0x80-0x9F through the
//! CP1252 table (U+FFFD for the five unassigned slots), everything else as
//! Latin-1.

/// Unicode equivalents of CP1252 bytes 0x80-0x9F.
///
/// The five holes (0x81, 0x8D, 0x8F, 0x90, 0x9D) map to U+FFFD.
const CP1252_MAP: [char; 32] = [
    '\u{20AC}', '\u{FFFD}', '\u{201A}', '\u{0192}', // 0x80-0x83
    '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}', // 0x84-0x87
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', // 0x88-0x8B
    '\u{0152}', '\u{FFFD}', '\u{017D}', '\u{FFFD}', // 0x8C-0x8F
    '\u{FFFD}', '\u{2018}', '\u{2019}', '\u{201C}', // 0x90-0x93
    '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}', // 0x94-0x97
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', // 0x98-0x9B
    '\u{0153}', '\u{FFFD}', '\u{017E}', '\u{0178}', // 0x9C-0x9F
];

/// Decode a single byte that was not part of a valid UTF-8 sequence.
fn fallback_char(byte: u8) -> char {
    if (0x80..=0x9F).contains(&byte) {
        CP1252_MAP[(byte - 0x80) as usize]
    } else {
        // Latin-1: the byte value is the code point.
        char::from(byte)
    }
}

/// Decode wire bytes into a `String`, never failing.
///
/// Valid UTF-8 spans are passed through unchanged; each offending byte of
/// an invalid span is decoded individually via the fallback table.
pub fn decode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(err) => {
                let (valid, bad) = rest.split_at(err.valid_up_to());
                if let Ok(text) = std::str::from_utf8(valid) {
                    out.push_str(text);
                }
                // error_len is None for a sequence truncated at end-of-input.
                let skip = err.error_len().unwrap_or(bad.len()).min(bad.len());
                for &byte in &bad[..skip] {
                    out.push(fallback_char(byte));
                }
                rest = &bad[skip..];
            }
        }
    }
}
