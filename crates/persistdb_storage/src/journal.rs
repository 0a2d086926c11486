//! Journal record framing.
//!
//! Each committed transaction is one record:
//!
//! ```text
//! | length: u32 LE | crc32: u32 LE | payload: [u8; length] |
//! ```
//!
//! The payload is the canonical CBOR encoding of an array of entries. A
//! record cut short by a crash can only be the last one; replay stops
//! there and reports the length of the valid prefix so the tail can be
//! truncated before new records are appended.

use crate::error::{StorageError, StorageResult};
use crate::index::{IndexDefinition, IndexScope};
use persistdb_codec::{from_cbor, to_canonical_cbor, KeyPath, Value};

/// Size of the record header.
pub const RECORD_HEADER_SIZE: usize = 8;

/// One change inside a committed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// Insert or replace a document.
    Put(Value),
    /// Remove the document with this id.
    Delete(String),
    /// Declare an index.
    CreateIndex(IndexDefinition),
}

impl JournalEntry {
    fn to_value(&self) -> Value {
        match self {
            JournalEntry::Put(document) => {
                Value::map([("op", Value::from("put")), ("doc", document.clone())])
            }
            JournalEntry::Delete(id) => {
                Value::map([("op", Value::from("delete")), ("id", Value::from(id.as_str()))])
            }
            JournalEntry::CreateIndex(def) => Value::map([
                ("op", Value::from("index")),
                ("name", Value::from(def.name.as_str())),
                (
                    "paths",
                    Value::Array(def.key_paths.iter().map(|p| Value::Text(p.to_string())).collect()),
                ),
                ("unique", Value::Bool(def.unique)),
                ("scope", Value::from(def.scope.as_str())),
            ]),
        }
    }

    fn from_value(value: Value) -> StorageResult<Self> {
        let Value::Map(mut fields) = value else {
            return Err(StorageError::corrupted("journal entry is not a map"));
        };
        let op = fields
            .get("op")
            .and_then(Value::as_text)
            .map(str::to_string)
            .ok_or_else(|| StorageError::corrupted("journal entry without op"))?;
        match op.as_str() {
            "put" => fields
                .remove("doc")
                .map(JournalEntry::Put)
                .ok_or_else(|| StorageError::corrupted("put entry without doc")),
            "delete" => match fields.remove("id") {
                Some(Value::Text(id)) => Ok(JournalEntry::Delete(id)),
                _ => Err(StorageError::corrupted("delete entry without id")),
            },
            "index" => {
                let name = fields
                    .get("name")
                    .and_then(Value::as_text)
                    .ok_or_else(|| StorageError::corrupted("index entry without name"))?
                    .to_string();
                let key_paths = fields
                    .get("paths")
                    .and_then(Value::as_array)
                    .ok_or_else(|| StorageError::corrupted("index entry without paths"))?
                    .iter()
                    .map(|p| {
                        p.as_text()
                            .ok_or_else(|| StorageError::corrupted("index path is not text"))
                            .and_then(|p| Ok(KeyPath::parse(p)?))
                    })
                    .collect::<StorageResult<Vec<_>>>()?;
                let unique = fields.get("unique").and_then(Value::as_bool).unwrap_or(false);
                let scope = fields
                    .get("scope")
                    .and_then(Value::as_text)
                    .and_then(IndexScope::from_name)
                    .ok_or_else(|| StorageError::corrupted("index entry with bad scope"))?;
                Ok(JournalEntry::CreateIndex(IndexDefinition {
                    name,
                    key_paths,
                    unique,
                    scope,
                }))
            }
            other => Err(StorageError::corrupted(format!("unknown journal op `{other}`"))),
        }
    }
}

/// Frames a batch of entries as one record.
///
/// # Errors
///
/// Returns an error if the payload cannot be encoded or exceeds 4 GiB.
pub fn encode_record(entries: &[JournalEntry]) -> StorageResult<Vec<u8>> {
    let payload = to_canonical_cbor(&Value::Array(
        entries.iter().map(JournalEntry::to_value).collect(),
    ))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| StorageError::corrupted("record payload exceeds u32::MAX bytes"))?;

    let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    record.extend_from_slice(&length.to_le_bytes());
    record.extend_from_slice(&compute_crc32(&payload).to_le_bytes());
    record.extend_from_slice(&payload);
    Ok(record)
}

/// Result of scanning a journal.
#[derive(Debug, Default)]
pub struct Replay {
    /// Entries of each intact record, in commit order.
    pub records: Vec<Vec<JournalEntry>>,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// Whether a torn trailing record was found.
    pub torn: bool,
}

/// Decodes every intact record in `bytes`.
///
/// # Errors
///
/// Returns [`StorageError::Corrupted`] if a record other than the last one
/// fails its checksum, or an intact record does not decode.
pub fn replay(bytes: &[u8]) -> StorageResult<Replay> {
    let mut result = Replay::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let remaining = bytes.len() - offset;
        if remaining < RECORD_HEADER_SIZE {
            result.torn = true;
            break;
        }
        let header = &bytes[offset..offset + RECORD_HEADER_SIZE];
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let end = offset + RECORD_HEADER_SIZE + length;
        if end > bytes.len() {
            result.torn = true;
            break;
        }
        let payload = &bytes[offset + RECORD_HEADER_SIZE..end];
        if compute_crc32(payload) != crc {
            if end == bytes.len() {
                result.torn = true;
                break;
            }
            return Err(StorageError::corrupted(format!(
                "checksum mismatch in record at offset {offset}"
            )));
        }

        let Value::Array(items) = from_cbor(payload)? else {
            return Err(StorageError::corrupted(format!(
                "record at offset {offset} is not an array"
            )));
        };
        let entries = items
            .into_iter()
            .map(JournalEntry::from_value)
            .collect::<StorageResult<Vec<_>>>()?;
        result.records.push(entries);
        offset = end;
    }

    result.valid_len = offset as u64;
    Ok(result)
}

/// Computes a CRC32 checksum (IEEE polynomial).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    }) ^ 0xFFFF_FFFF
}
