//! Record codec.
//!
//! ```text
//! ┌──────────┬────────────┬────────────┬──────────┬───────────┬─────┬───────┬───────┐
//! │ key_size │ value_size │ extra_size │ category │ operation │ key │ value │ extra │
//! │   u32    │    u32     │    u32     │   u16    │    u16    │     │       │       │
//! └──────────┴────────────┴────────────┴──────────┴───────────┴─────┴───────┴───────┘
//! ```
//!
//! All integers are big-endian. The header can be decoded alone so a
//! sequential scan learns each record's length before reading its body.

use crate::error::{CoreError, CoreResult};
use crate::operation::Operation;
use crate::types::Category;

/// Size of the fixed record header in bytes.
pub const HEADER_SIZE: usize = 16;

/// The unit of durability: one logical mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The key. Never empty.
    pub key: Vec<u8>,
    /// The value. May be empty.
    pub value: Vec<u8>,
    /// Auxiliary payload (hash field, destination key, score text).
    pub extra: Vec<u8>,
    /// The mutation, which also names the category.
    pub op: Operation,
}

impl Record {
    /// Creates a new record.
    #[must_use]
    pub fn new(
        op: Operation,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        extra: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            extra: extra.into(),
            op,
        }
    }

    /// Returns the category the record belongs to.
    #[must_use]
    pub fn category(&self) -> Category {
        self.op.category()
    }

    /// Encoded size: header plus key, value and extra.
    #[must_use]
    pub fn size(&self) -> u64 {
        (HEADER_SIZE + self.key.len() + self.value.len() + self.extra.len()) as u64
    }

    /// Checks that the record can be encoded and replayed.
    ///
    /// # Errors
    ///
    /// Returns `EmptyKey` for an empty key and `RecordTooLarge` when a field
    /// does not fit its u32 length prefix.
    pub fn validate(&self) -> CoreResult<()> {
        if self.key.is_empty() {
            return Err(CoreError::EmptyKey);
        }
        for (field, len) in [
            ("key", self.key.len()),
            ("value", self.value.len()),
            ("extra", self.extra.len()),
        ] {
            if u32::try_from(len).is_err() {
                return Err(CoreError::RecordTooLarge { field, len });
            }
        }
        Ok(())
    }

    /// Encodes the record to bytes.
    ///
    /// Lengths are assumed to fit in u32; see [`Record::validate`].
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size() as usize);

        buf.extend_from_slice(&(self.key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.extra.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.category().code().to_be_bytes());
        buf.extend_from_slice(&self.op.code().to_be_bytes());

        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf.extend_from_slice(&self.extra);

        buf
    }

    /// Decodes a complete record from bytes.
    ///
    /// # Errors
    ///
    /// Returns `CorruptHeader` or `TruncatedRecord` as described on
    /// [`RecordHeader`].
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let header = RecordHeader::decode(data)?;
        header.decode_body(&data[HEADER_SIZE..])
    }
}

/// The fixed-size prefix of an encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Length of the key.
    pub key_size: u32,
    /// Length of the value.
    pub value_size: u32,
    /// Length of the extra payload.
    pub extra_size: u32,
    /// The decoded operation.
    pub op: Operation,
}

impl RecordHeader {
    /// Decodes the header from the first [`HEADER_SIZE`] bytes of `data`.
    ///
    /// # Errors
    ///
    /// Returns `CorruptHeader` if fewer than 16 bytes are available, the
    /// category or operation code is unknown, or the key length is zero.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let Some(header) = data.get(..HEADER_SIZE) else {
            return Err(CoreError::corrupt_header(format!(
                "need {HEADER_SIZE} bytes, have {}",
                data.len()
            )));
        };

        let u32_at = |at: usize| {
            u32::from_be_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
        };
        let u16_at = |at: usize| u16::from_be_bytes([header[at], header[at + 1]]);

        let key_size = u32_at(0);
        let value_size = u32_at(4);
        let extra_size = u32_at(8);
        let category_code = u16_at(12);
        let op_code = u16_at(14);

        let category = Category::from_code(category_code).ok_or_else(|| {
            CoreError::corrupt_header(format!("unknown category code {category_code}"))
        })?;
        let op = Operation::from_parts(category, op_code).ok_or_else(|| {
            CoreError::corrupt_header(format!(
                "unknown operation code {op_code} for category {category}"
            ))
        })?;

        // Zero-filled tails decode as a String/Set with an empty key.
        if key_size == 0 {
            return Err(CoreError::corrupt_header("zero-length key"));
        }

        Ok(Self {
            key_size,
            value_size,
            extra_size,
            op,
        })
    }

    /// Length of key, value and extra together.
    #[must_use]
    pub fn body_len(&self) -> u64 {
        u64::from(self.key_size) + u64::from(self.value_size) + u64::from(self.extra_size)
    }

    /// Full encoded size of the record this header starts.
    #[must_use]
    pub fn record_size(&self) -> u64 {
        HEADER_SIZE as u64 + self.body_len()
    }

    /// Decodes the body that follows this header.
    ///
    /// # Errors
    ///
    /// Returns `TruncatedRecord` if `body` is shorter than declared.
    pub fn decode_body(&self, body: &[u8]) -> CoreResult<Record> {
        let expected = self.body_len();
        if (body.len() as u64) < expected {
            return Err(CoreError::TruncatedRecord {
                expected,
                available: body.len() as u64,
            });
        }

        let key_end = self.key_size as usize;
        let value_end = key_end + self.value_size as usize;
        let extra_end = value_end + self.extra_size as usize;

        Ok(Record {
            key: body[..key_end].to_vec(),
            value: body[key_end..value_end].to_vec(),
            extra: body[value_end..extra_end].to_vec(),
            op: self.op,
        })
    }
}
