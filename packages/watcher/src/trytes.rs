//! Tryte Encoding
//!
//! Helpers for the balanced-ternary tryte alphabet used by the legacy
//! ledger transaction format, plus the fixed field layout of a
//! 2673-tryte transaction body.

/// Tryte alphabet, indexed by value 0..=13 then -13..=-1
pub const TRYTE_ALPHABET: &str = "9ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Exact length of an encoded transaction body
pub const TRANSACTION_TRYTES_LEN: usize = 2673;

/// Length of address, bundle and hash identifiers
pub const HASH_TRYTES_LEN: usize = 81;

/// Widest field that still fits an i64 after decoding
const MAX_I64_TRYTES: usize = 13;

/// A fixed slice of the transaction body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: usize,
    pub len: usize,
}

impl Field {
    const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// End offset (exclusive)
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Slice this field out of a full transaction body
    ///
    /// The body must already be validated as `TRANSACTION_TRYTES_LEN` ASCII trytes.
    pub fn slice<'a>(&self, body: &'a str) -> &'a str {
        &body[self.offset..self.end()]
    }
}

pub const SIGNATURE_MESSAGE: Field = Field::new(0, 2187);
pub const ADDRESS: Field = Field::new(2187, 81);
pub const VALUE: Field = Field::new(2268, 27);
/// Only the low 33 trits of the value field carry the amount
pub const VALUE_SIGNIFICANT: Field = Field::new(2268, 11);
pub const OBSOLETE_TAG: Field = Field::new(2295, 27);
pub const TIMESTAMP: Field = Field::new(2322, 9);
pub const CURRENT_INDEX: Field = Field::new(2331, 9);
pub const LAST_INDEX: Field = Field::new(2340, 9);
pub const BUNDLE: Field = Field::new(2349, 81);
pub const TRUNK: Field = Field::new(2430, 81);
pub const BRANCH: Field = Field::new(2511, 81);
pub const TAG: Field = Field::new(2592, 27);
pub const ATTACHMENT_TIMESTAMPS: Field = Field::new(2619, 27);
pub const NONCE: Field = Field::new(2646, 27);

/// Check whether a character belongs to the tryte alphabet
pub fn is_tryte(c: char) -> bool {
    c == '9' || c.is_ascii_uppercase()
}

/// Check that every character of `s` is a tryte
pub fn is_trytes(s: &str) -> bool {
    s.chars().all(is_tryte)
}

/// Balanced value of a single tryte, or `None` outside the alphabet
pub fn tryte_value(c: char) -> Option<i64> {
    match c {
        '9' => Some(0),
        'A'..='M' => Some(c as u32 as i64 - 'A' as u32 as i64 + 1),
        'N'..='Z' => Some(c as u32 as i64 - 'N' as u32 as i64 - 13),
        _ => None,
    }
}

/// Decode little-endian trytes into a signed integer
///
/// # Returns
/// `None` if a character is not a tryte or the field is too wide for an i64
pub fn trytes_to_i64(trytes: &str) -> Option<i64> {
    if trytes.len() > MAX_I64_TRYTES {
        return None;
    }
    trytes
        .chars()
        .rev()
        .try_fold(0i64, |acc, c| Some(acc * 27 + tryte_value(c)?))
}

/// Encode a signed integer as exactly `len` little-endian trytes
///
/// # Returns
/// `None` if the value does not fit in `len` trytes
pub fn i64_to_trytes(value: i64, len: usize) -> Option<String> {
    let alphabet = TRYTE_ALPHABET.as_bytes();
    let mut remaining = value;
    let mut out = String::with_capacity(len);

    for _ in 0..len {
        let mut digit = remaining % 27;
        if digit > 13 {
            digit -= 27;
        } else if digit < -13 {
            digit += 27;
        }
        remaining = (remaining - digit) / 27;

        let index = if digit >= 0 { digit } else { digit + 27 };
        out.push(alphabet[index as usize] as char);
    }

    (remaining == 0).then_some(out)
}

/// Right-pad a tryte string with `9` up to `len`
pub fn pad_trytes(trytes: &str, len: usize) -> String {
    let mut padded = trytes.to_string();
    while padded.len() < len {
        padded.push('9');
    }
    padded
}
