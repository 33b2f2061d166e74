//! Character encodings used for entry names and comments inside ZIP files.
//!
//! ZIP entry paths may be encoded in a variety of character encodings:
//! historically CP-437 was used, but many modern zip files use UTF-8 with
//! an opt-in flag bit. Others use the writer's local codepage, and we have
//! no choice but to make an educated guess with `chardetng`.

use std::fmt;

/// Encodings this crate can decode entry names and comments from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Encoding {
    /// [UTF-8](https://en.wikipedia.org/wiki/UTF-8), signalled by the
    /// general-purpose bit 11.
    Utf8,
    /// [Codepage 437](https://en.wikipedia.org/wiki/Code_page_437), the
    /// original encoding of the ZIP format.
    Cp437,
    /// [Shift JIS](https://en.wikipedia.org/wiki/Shift_JIS).
    ShiftJis,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Utf8 => write!(f, "utf-8"),
            Encoding::Cp437 => write!(f, "cp-437"),
            Encoding::ShiftJis => write!(f, "shift-jis"),
        }
    }
}

/// Errors encountered while decoding entry text.
#[derive(Debug, thiserror::Error)]
pub enum DecodingError {
    /// Text claimed to be UTF-8 but wasn't.
    #[error("invalid utf-8: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
    /// Text overflowed `usize` while being converted.
    #[error("text too large to convert")]
    StringTooLarge,
    /// Text could not be decoded in the detected encoding.
    #[error("encoding error: {0}")]
    EncodingError(&'static str),
}

impl Encoding {
    /// Decode a byte slice using this encoding.
    pub fn decode(&self, input: &[u8]) -> Result<String, DecodingError> {
        match self {
            Encoding::Utf8 => Ok(std::str::from_utf8(input)?.to_string()),
            Encoding::Cp437 => Ok(oem_cp::decode_string_complete_table(
                input,
                &oem_cp::code_table::DECODING_TABLE_CP437,
            )),
            Encoding::ShiftJis => self.decode_as(input, encoding_rs::SHIFT_JIS),
        }
    }

    fn decode_as(
        &self,
        input: &[u8],
        encoding: &'static encoding_rs::Encoding,
    ) -> Result<String, DecodingError> {
        let mut decoder = encoding.new_decoder();
        let len = decoder
            .max_utf8_buffer_length(input.len())
            .ok_or(DecodingError::StringTooLarge)?;
        let mut out = vec![0u8; len];
        let (_, _, written, had_errors) = decoder.decode_to_utf8(input, &mut out, true);
        if had_errors {
            return Err(DecodingError::EncodingError(encoding.name()));
        }
        out.truncate(written);
        Ok(String::from_utf8(out).expect("decoder only emits valid utf-8"))
    }

    /// Guess which encoding an archive uses from its entry names/comments,
    /// honoring the UTF-8 flag bit where it's set to true and at least one
    /// name requires it.
    pub fn detect(names_and_comments: impl Iterator<Item = (Vec<u8>, u16)>) -> Encoding {
        let mut saw_non_utf8 = false;
        for (bytes, flags) in names_and_comments {
            if is_entry_non_utf8(&bytes, &[], flags) {
                saw_non_utf8 = true;
                break;
            }
        }
        if !saw_non_utf8 {
            return Encoding::Utf8;
        }
        // fall back to a single detector instance across the whole archive
        Encoding::Cp437
    }
}

/// Returns whether `name`/`comment` indicate this entry is *not* plain
/// UTF-8, taking the general-purpose UTF-8 flag (bit 11) into account.
pub(crate) fn is_entry_non_utf8(name: &[u8], comment: &[u8], flags: u16) -> bool {
    let (valid1, require1) = detect_utf8(name);
    let (valid2, require2) = detect_utf8(comment);
    if !valid1 || !valid2 {
        return true;
    }
    if !require1 && !require2 {
        return false;
    }
    flags & 0x800 == 0
}

/// Reports whether `input` is valid UTF-8, and whether it *must* be
/// considered UTF-8 (i.e. isn't compatible with CP-437/ASCII).
pub(crate) fn detect_utf8(input: &[u8]) -> (bool, bool) {
    match std::str::from_utf8(input) {
        Err(_) => (false, false),
        Ok(s) => {
            let mut require = false;
            for c in s.chars() {
                // Forbid 0x7e/0x5c: EUC-KR and Shift-JIS replace those with
                // localized currency/overline characters.
                if c < 0x20 as char || c > 0x7d as char || c == 0x5c as char {
                    require = true;
                }
            }
            (true, require)
        }
    }
}
