//! Transaction Decoder
//!
//! Decodes raw feed frames of the form `trytes <body> <hash>` into
//! transaction records. The body is a legacy 2673-tryte transaction;
//! only superficial fields are extracted (no signature or PoW checks).

use thiserror::Error;

use crate::trytes::{self, HASH_TRYTES_LEN, TRANSACTION_TRYTES_LEN};

/// Topic the feed publishes raw transactions on
pub const TRYTES_TOPIC: &str = "trytes";

/// Number of whitespace-separated fields after the topic tag
const FRAME_FIELD_COUNT: usize = 2;

/// Errors that can occur during frame decoding
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("Frame does not start with topic '{0}'")]
    MissingTopic(String),

    #[error("Expected 2 fields after topic, found {0}")]
    FieldCount(usize),

    #[error("Transaction body has {0} trytes, expected 2673")]
    InvalidLength(usize),

    #[error("Transaction body contains non-tryte character at offset {0}")]
    InvalidTryte(usize),

    #[error("Value field overflows the significant trits")]
    ValueOverflow,

    #[error("Invalid transaction hash: {0}")]
    InvalidHash(String),
}

/// Decoded transaction with extracted fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Transaction hash, as announced by the feed
    pub hash: String,
    /// Address the transaction touches (81 trytes)
    pub address: String,
    /// Transferred amount; zero for non-value transactions
    pub value: i64,
    /// Bundle the transaction belongs to (81 trytes)
    pub bundle: String,
    /// Tag (27 trytes)
    pub tag: String,
    /// Issuance timestamp in seconds
    pub timestamp: i64,
    /// Position inside the bundle
    pub current_index: i64,
    /// Index of the bundle's last transaction
    pub last_index: i64,
}

impl TransactionRecord {
    /// Check if this transaction moves value
    pub fn is_value_transaction(&self) -> bool {
        self.value != 0
    }
}

/// Decode a raw frame as received from the feed
pub fn decode_frame(frame: &[u8]) -> Result<TransactionRecord, DecodeError> {
    let text = std::str::from_utf8(frame).map_err(|_| DecodeError::InvalidUtf8)?;
    decode_text(text)
}

/// Decode a text frame `trytes <body> <hash>`
///
/// # Returns
/// A `TransactionRecord` with the superficial fields extracted
pub fn decode_text(frame: &str) -> Result<TransactionRecord, DecodeError> {
    let payload = strip_topic(frame, TRYTES_TOPIC)
        .ok_or_else(|| DecodeError::MissingTopic(TRYTES_TOPIC.to_string()))?;

    let fields: Vec<&str> = payload.split_whitespace().collect();
    if fields.len() != FRAME_FIELD_COUNT {
        return Err(DecodeError::FieldCount(fields.len()));
    }

    decode_transaction(fields[0], fields[1])
}

/// Reconstruct a transaction from its body trytes and identifying hash
pub fn decode_transaction(body: &str, hash: &str) -> Result<TransactionRecord, DecodeError> {
    validate_body(body)?;
    validate_hash(hash)?;

    let value = trytes::trytes_to_i64(trytes::VALUE_SIGNIFICANT.slice(body))
        .ok_or(DecodeError::ValueOverflow)?;

    Ok(TransactionRecord {
        hash: hash.to_string(),
        address: trytes::ADDRESS.slice(body).to_string(),
        value,
        bundle: trytes::BUNDLE.slice(body).to_string(),
        tag: trytes::TAG.slice(body).to_string(),
        timestamp: field_i64(body, trytes::TIMESTAMP)?,
        current_index: field_i64(body, trytes::CURRENT_INDEX)?,
        last_index: field_i64(body, trytes::LAST_INDEX)?,
    })
}

/// Strip `<topic> ` from the front of a frame
pub fn strip_topic<'a>(frame: &'a str, topic: &str) -> Option<&'a str> {
    frame.strip_prefix(topic)?.strip_prefix(' ')
}

/// Structural checks on the transaction body
pub fn validate_body(body: &str) -> Result<(), DecodeError> {
    if let Some((offset, _)) = body.char_indices().find(|(_, c)| !trytes::is_tryte(*c)) {
        return Err(DecodeError::InvalidTryte(offset));
    }
    if body.len() != TRANSACTION_TRYTES_LEN {
        return Err(DecodeError::InvalidLength(body.len()));
    }

    // Trits above the 33rd must be zero
    let value = trytes::VALUE.slice(body);
    if !value[trytes::VALUE_SIGNIFICANT.len..].chars().all(|c| c == '9') {
        return Err(DecodeError::ValueOverflow);
    }

    Ok(())
}

fn validate_hash(hash: &str) -> Result<(), DecodeError> {
    if hash.is_empty() || hash.len() > HASH_TRYTES_LEN || !trytes::is_trytes(hash) {
        return Err(DecodeError::InvalidHash(hash.to_string()));
    }
    Ok(())
}

fn field_i64(body: &str, field: trytes::Field) -> Result<i64, DecodeError> {
    // Validated body: every field decodes
    trytes::trytes_to_i64(field.slice(body)).ok_or(DecodeError::InvalidTryte(field.offset))
}
