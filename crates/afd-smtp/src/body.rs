//! DATA body encoding.
//!
//! The body is streamed in blocks of arbitrary size. [`BodyWriter`] keeps the
//! last emitted byte between blocks so that CRLF promotion and dot-stuffing
//! see line boundaries that fall between two blocks.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Charset used for RFC 2047 encoded subjects when none is configured.
pub const DEFAULT_CHARSET: &str = "utf-8";

/// Streaming DATA encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyWriter {
    last: u8,
    remap_cp437: bool,
}

impl Default for BodyWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyWriter {
    /// Creates a writer positioned at the start of a line.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: b'\n',
            remap_cp437: false,
        }
    }

    /// Creates a writer that maps PC code page 437 to Latin-1 before
    /// encoding.
    #[must_use]
    pub const fn iso8859() -> Self {
        Self {
            last: b'\n',
            remap_cp437: true,
        }
    }

    /// Switches the code page 437 remap on or off; the carry is kept.
    pub const fn set_cp437_remap(&mut self, on: bool) {
        self.remap_cp437 = on;
    }

    /// Returns the last byte emitted so far.
    #[must_use]
    pub const fn last_byte(&self) -> u8 {
        self.last
    }

    /// Encodes one block, appending to `out`.
    ///
    /// `out` grows by at most twice the block length.
    pub fn encode(&mut self, block: &[u8], out: &mut Vec<u8>) {
        out.reserve(block.len() * 2);
        if self.remap_cp437 {
            let mapped: Vec<u8> = block.iter().map(|&b| cp437_to_latin1(b)).collect();
            self.last = stuff(&mapped, self.last, out);
        } else {
            self.last = stuff(block, self.last, out);
        }
    }

    /// Records bytes written to the stream without encoding.
    pub fn note_raw(&mut self, bytes: &[u8]) {
        if let Some(&b) = bytes.last() {
            self.last = b;
        }
    }

    /// Returns the end-of-data sequence for the current position.
    ///
    /// A body that does not end with a line break gets one before the
    /// terminating dot.
    #[must_use]
    pub const fn terminator(&self) -> &'static [u8] {
        if self.last == b'\n' {
            b".\r\n"
        } else {
            b"\r\n.\r\n"
        }
    }
}

/// Appends `block` to `out` with bare `\n` promoted to `\r\n` and a leading
/// `.` on each line doubled.
///
/// `carry` is the last byte emitted before this block; the return value is
/// the carry for the next block.
pub fn stuff(block: &[u8], carry: u8, out: &mut Vec<u8>) -> u8 {
    let mut prev = carry;
    for &b in block {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        } else if b == b'.' && prev == b'\n' {
            out.push(b'.');
        }
        out.push(b);
        prev = b;
    }
    prev
}

/// Maps one byte from PC code page 437 to ISO 8859-1.
///
/// Characters without a Latin-1 equivalent become `+`, `-`, `|` for line
/// drawing, `#` for blocks and `?` otherwise.
#[must_use]
pub const fn cp437_to_latin1(byte: u8) -> u8 {
    if byte < 0x80 {
        byte
    } else {
        CP437_HIGH[(byte - 0x80) as usize]
    }
}

#[rustfmt::skip]
const CP437_HIGH: [u8; 128] = [
    0xC7, 0xFC, 0xE9, 0xE2, 0xE4, 0xE0, 0xE5, 0xE7,
    0xEA, 0xEB, 0xE8, 0xEF, 0xEE, 0xEC, 0xC4, 0xC5,
    0xC9, 0xE6, 0xC6, 0xF4, 0xF6, 0xF2, 0xFB, 0xF9,
    0xFF, 0xD6, 0xDC, 0xA2, 0xA3, 0xA5, 0x3F, 0x3F,
    0xE1, 0xED, 0xF3, 0xFA, 0xF1, 0xD1, 0xAA, 0xBA,
    0xBF, 0x3F, 0xAC, 0xBD, 0xBC, 0xA1, 0xAB, 0xBB,
    0x23, 0x23, 0x23, 0x7C, 0x2B, 0x2B, 0x2B, 0x2B,
    0x2B, 0x2B, 0x7C, 0x2B, 0x2B, 0x2B, 0x2B, 0x2B,
    0x2B, 0x2B, 0x2B, 0x2B, 0x2D, 0x2B, 0x2B, 0x2B,
    0x2B, 0x2B, 0x2B, 0x2B, 0x2B, 0x2D, 0x2B, 0x2B,
    0x2B, 0x2B, 0x2B, 0x2B, 0x2B, 0x2B, 0x2B, 0x2B,
    0x2B, 0x2B, 0x2B, 0x23, 0x23, 0x23, 0x23, 0x23,
    0x3F, 0xDF, 0x3F, 0x3F, 0x3F, 0x3F, 0xB5, 0x3F,
    0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F,
    0x3F, 0xB1, 0x3F, 0x3F, 0x3F, 0x3F, 0xF7, 0x3F,
    0xB0, 0x3F, 0xB7, 0x3F, 0x3F, 0xB2, 0x3F, 0xA0,
];

/// Builds the `Subject:` header line, CRLF included.
///
/// Pure 7-bit subjects are sent as they are; anything else becomes one
/// RFC 2047 `B` encoded word in `charset` (default `utf-8`). CR and LF are
/// replaced by spaces so the subject cannot start a new header.
#[must_use]
pub fn encode_subject(subject: &[u8], charset: Option<&str>) -> String {
    let flat: Vec<u8> = subject
        .iter()
        .map(|&b| if b == b'\r' || b == b'\n' { b' ' } else { b })
        .collect();
    if flat.is_ascii() {
        format!("Subject: {}\r\n", String::from_utf8_lossy(&flat))
    } else {
        format!(
            "Subject: =?{}?B?{}?=\r\n",
            charset.unwrap_or(DEFAULT_CHARSET),
            STANDARD.encode(&flat)
        )
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode_all(blocks: &[&[u8]]) -> Vec<u8> {
        let mut writer = BodyWriter::new();
        let mut out = Vec::new();
        for block in blocks {
            writer.encode(block, &mut out);
        }
        out
    }

    /// Inverse of dot-stuffing on a CRLF body.
    fn unstuff(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(body.len());
        let mut at_line_start = true;
        let mut i = 0;
        while i < body.len() {
            if at_line_start && body[i] == b'.' && body.get(i + 1) == Some(&b'.') {
                i += 1;
            }
            at_line_start = body[i] == b'\n';
            out.push(body[i]);
            i += 1;
        }
        out
    }

    #[test]
    fn test_dot_stuffing_scenario() {
        let out = encode_all(&[b"Subject: hi\r\n\r\n.safe line\r\n"]);
        assert_eq!(out, b"Subject: hi\r\n\r\n..safe line\r\n");
    }

    #[test]
    fn test_bare_lf_promoted() {
        assert_eq!(encode_all(&[b"a\nb\r\nc\n"]), b"a\r\nb\r\nc\r\n");
        assert_eq!(encode_all(&[b"\n"]), b"\r\n");
    }

    #[test]
    fn test_leading_dot_of_body() {
        assert_eq!(encode_all(&[b".\r\n"]), b"..\r\n");
    }

    #[test]
    fn test_carry_across_blocks() {
        assert_eq!(encode_all(&[b"line\r", b"\n.x"]), b"line\r\n..x");
        assert_eq!(encode_all(&[b"line\n", b".x"]), b"line\r\n..x");
        assert_eq!(encode_all(&[b"a.", b".b"]), b"a..b");
    }

    #[test]
    fn test_terminator() {
        let mut writer = BodyWriter::new();
        let mut out = Vec::new();
        assert_eq!(writer.terminator(), b".\r\n");
        writer.encode(b"no newline", &mut out);
        assert_eq!(writer.terminator(), b"\r\n.\r\n");
        writer.encode(b"\n", &mut out);
        assert_eq!(writer.terminator(), b".\r\n");
        writer.note_raw(b"X");
        assert_eq!(writer.last_byte(), b'X');
    }

    #[test]
    fn test_cp437_remap() {
        assert_eq!(cp437_to_latin1(b'A'), b'A');
        assert_eq!(cp437_to_latin1(0x81), 0xFC); // u umlaut
        assert_eq!(cp437_to_latin1(0xE1), 0xDF); // sharp s
        assert_eq!(cp437_to_latin1(0xF8), 0xB0); // degree
        assert_eq!(cp437_to_latin1(0xC4), b'-');
        assert_eq!(cp437_to_latin1(0xB3), b'|');
        assert_eq!(cp437_to_latin1(0xDB), b'#');
        assert_eq!(cp437_to_latin1(0x9E), b'?');

        let mut writer = BodyWriter::iso8859();
        let mut out = Vec::new();
        writer.encode(&[0x81, b'\n', b'.'], &mut out);
        assert_eq!(out, vec![0xFC, b'\r', b'\n', b'.', b'.']);
    }

    #[test]
    fn test_subject_ascii() {
        assert_eq!(encode_subject(b"hi there", None), "Subject: hi there\r\n");
        assert_eq!(
            encode_subject(b"a\r\nBcc: x@y", None),
            "Subject: a  Bcc: x@y\r\n"
        );
    }

    #[test]
    fn test_subject_encoded_word() {
        assert_eq!(
            encode_subject("Grüße".as_bytes(), None),
            "Subject: =?utf-8?B?R3LDvMOfZQ==?=\r\n"
        );
        assert_eq!(
            encode_subject(&[0x47, 0x72, 0xFC], Some("iso-8859-1")),
            "Subject: =?iso-8859-1?B?R3L8?=\r\n"
        );
    }

    proptest! {
        #[test]
        fn prop_block_split_is_invisible(body in proptest::collection::vec(prop_oneof![
            Just(b'\r'), Just(b'\n'), Just(b'.'), Just(b'a')
        ], 0..64), split in 0usize..64) {
            let split = split.min(body.len());
            let whole = encode_all(&[&body]);
            let parts = encode_all(&[&body[..split], &body[split..]]);
            prop_assert_eq!(whole, parts);
        }

        #[test]
        fn prop_every_lf_has_cr(body in proptest::collection::vec(any::<u8>(), 0..128)) {
            let out = encode_all(&[&body]);
            for (i, &b) in out.iter().enumerate() {
                if b == b'\n' {
                    prop_assert!(i > 0 && out[i - 1] == b'\r');
                }
            }
            prop_assert!(out.len() <= body.len() * 2);
        }

        #[test]
        fn prop_unstuff_inverts_stuff(lines in proptest::collection::vec("[.a-z ]{0,12}", 0..8)) {
            let body: Vec<u8> = lines.iter().flat_map(|l| format!("{l}\r\n").into_bytes()).collect();
            let stuffed = encode_all(&[&body]);
            prop_assert_eq!(unstuff(&stuffed), body);
        }

        #[test]
        fn prop_normalization_idempotent(body in "[a-z\r\n]{0,64}") {
            let once = encode_all(&[body.as_bytes()]);
            let twice = encode_all(&[&once]);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_encoded_word_decodes(subject in "\\PC{1,40}") {
            let line = encode_subject(subject.as_bytes(), None);
            let value = line.strip_prefix("Subject: ").unwrap().strip_suffix("\r\n").unwrap();
            if subject.is_ascii() {
                prop_assert_eq!(value, subject.as_str());
            } else {
                let b64 = value.strip_prefix("=?utf-8?B?").unwrap().strip_suffix("?=").unwrap();
                prop_assert_eq!(STANDARD.decode(b64).unwrap(), subject.as_bytes());
            }
        }
    }
}
