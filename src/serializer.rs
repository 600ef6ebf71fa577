//! Record Serialization
//!
//! Turns a durable record into bytes and back. The persistent store is
//! written against the trait, so the on-disk format can be swapped by
//! injecting another implementation.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{StoreError, StoreResult};
use crate::ordinal::Ordinal;

/// Record file format:
/// - Magic: 4 bytes "OBRS"
/// - Version: 1 byte
/// - Ordinal: timestamp (8) + sequence (8)
/// - Key: key_len (4) + utf-8 bytes
/// - Value: value_len (4) + bytes
const RECORD_MAGIC: &[u8] = b"OBRS";
const RECORD_VERSION: u8 = 1;

/// One durable entry as written to a single file
#[derive(Debug, Clone)]
pub struct PersistedRecord {
    pub key: String,
    pub value: Bytes,
    pub ordinal: Ordinal,
}

/// Encodes records for durable storage and decodes them back
///
/// A decode failure is the corruption signal: the caller treats the file
/// as absent and quarantines it.
pub trait Serializer: Send + Sync {
    fn serialize(&self, record: &PersistedRecord) -> StoreResult<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> StoreResult<PersistedRecord>;
}

/// Default framed binary codec
#[derive(Debug, Default)]
pub struct BinaryRecordSerializer;

impl BinaryRecordSerializer {
    pub fn new() -> Self {
        Self
    }
}

fn ensure_remaining(buf: &impl Buf, needed: usize, field: &str) -> StoreResult<()> {
    if buf.remaining() < needed {
        return Err(StoreError::Serialization(format!(
            "record truncated reading {field}: need {needed} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

impl Serializer for BinaryRecordSerializer {
    fn serialize(&self, record: &PersistedRecord) -> StoreResult<Vec<u8>> {
        let key = record.key.as_bytes();
        let mut buf =
            BytesMut::with_capacity(RECORD_MAGIC.len() + 1 + 16 + 8 + key.len() + record.value.len());

        buf.put_slice(RECORD_MAGIC);
        buf.put_u8(RECORD_VERSION);
        buf.put_u64_le(record.ordinal.at);
        buf.put_u64_le(record.ordinal.seq);
        buf.put_u32_le(key.len() as u32);
        buf.put_slice(key);
        buf.put_u32_le(record.value.len() as u32);
        buf.put_slice(&record.value);

        Ok(buf.to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> StoreResult<PersistedRecord> {
        let mut buf = bytes;

        ensure_remaining(&buf, RECORD_MAGIC.len() + 1, "header")?;
        let magic = buf.copy_to_bytes(RECORD_MAGIC.len());
        if magic.as_ref() != RECORD_MAGIC {
            return Err(StoreError::Serialization("invalid record magic".into()));
        }
        let version = buf.get_u8();
        if version != RECORD_VERSION {
            return Err(StoreError::Serialization(format!(
                "unsupported record version: {version}"
            )));
        }

        ensure_remaining(&buf, 16, "ordinal")?;
        let at = buf.get_u64_le();
        let seq = buf.get_u64_le();

        ensure_remaining(&buf, 4, "key length")?;
        let key_len = buf.get_u32_le() as usize;
        ensure_remaining(&buf, key_len, "key")?;
        let key = String::from_utf8(buf.copy_to_bytes(key_len).to_vec())
            .map_err(|e| StoreError::Serialization(format!("key is not utf-8: {e}")))?;

        ensure_remaining(&buf, 4, "value length")?;
        let value_len = buf.get_u32_le() as usize;
        ensure_remaining(&buf, value_len, "value")?;
        let value = buf.copy_to_bytes(value_len);

        if buf.has_remaining() {
            return Err(StoreError::Serialization(format!(
                "record has {} trailing bytes",
                buf.remaining()
            )));
        }

        Ok(PersistedRecord {
            key,
            value,
            ordinal: Ordinal::new(at, seq),
        })
    }
}
