//! Property payload encoding.
//!
//! A node's properties are stored as one bincode blob in the `properties`
//! table. String and binary values at or above [`LARGE_VALUE_THRESHOLD`]
//! are externalized: the payload keeps a `{hash, kind}` marker and the
//! bytes go to the content-addressed `large_values` table, deduplicated by
//! BLAKE3 hash across all properties and nodes. Payloads and large values
//! are zstd-compressed when that actually shrinks them.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use arbor_types::{ContentHash, Name, NodeId, Property, PropertyValue};

use crate::error::{StoreError, StoreResult};

/// Values of this many bytes or more are stored content-addressed.
pub const LARGE_VALUE_THRESHOLD: usize = 1024;

const ZSTD_LEVEL: i32 = 3;

/// A property value as serialized into the payload blob.
#[derive(Serialize, Deserialize)]
enum StoredValue {
    Inline(PropertyValue),
    Large { hash: ContentHash, kind: LargeKind },
}

/// Which property value type a large value restores to.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub(crate) enum LargeKind {
    String,
    Binary,
}

impl LargeKind {
    fn tag(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Binary => "binary",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StoredProperty {
    name: Name,
    values: Vec<StoredValue>,
}

/// The encoded payload plus bookkeeping the caller writes to the
/// `properties` row.
pub struct EncodedPayload {
    pub blob: Vec<u8>,
    pub prop_count: usize,
    pub compressed: bool,
    /// Hashes of every large value referenced by this payload.
    pub large_values: Vec<ContentHash>,
}

/// Encode a node's properties, externalizing large values.
///
/// Large value bytes are upserted into `large_values` as a side effect; the
/// caller maintains the junction rows from the returned hash list.
pub fn encode(conn: &Connection, properties: &[Property]) -> StoreResult<EncodedPayload> {
    let mut large_values = Vec::new();
    let stored: Vec<StoredProperty> = properties
        .iter()
        .map(|property| {
            let values = property
                .values()
                .iter()
                .map(|value| externalize(conn, value, &mut large_values))
                .collect::<StoreResult<Vec<StoredValue>>>()?;
            Ok(StoredProperty {
                name: property.name().clone(),
                values,
            })
        })
        .collect::<StoreResult<Vec<_>>>()?;

    let raw = bincode::serialize(&stored).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let (blob, compressed) = maybe_compress(raw)?;
    Ok(EncodedPayload {
        blob,
        prop_count: properties.len(),
        compressed,
        large_values,
    })
}

/// Decode a payload blob back into properties, loading large values.
pub fn decode(
    conn: &Connection,
    node: NodeId,
    blob: &[u8],
    compressed: bool,
) -> StoreResult<Vec<Property>> {
    let raw = if compressed {
        zstd::decode_all(blob).map_err(|e| StoreError::Serialization(e.to_string()))?
    } else {
        blob.to_vec()
    };
    let stored: Vec<StoredProperty> =
        bincode::deserialize(&raw).map_err(|e| StoreError::Serialization(e.to_string()))?;

    stored
        .into_iter()
        .map(|property| {
            let values = property
                .values
                .into_iter()
                .map(|value| restore(conn, node, value))
                .collect::<StoreResult<Vec<PropertyValue>>>()?;
            Property::new(property.name, values).map_err(|e| StoreError::Corrupt {
                node,
                reason: e.to_string(),
            })
        })
        .collect()
}

fn externalize(
    conn: &Connection,
    value: &PropertyValue,
    large_values: &mut Vec<ContentHash>,
) -> StoreResult<StoredValue> {
    let (bytes, kind) = match value {
        PropertyValue::String(s) if s.len() >= LARGE_VALUE_THRESHOLD => {
            (s.as_bytes(), LargeKind::String)
        }
        PropertyValue::Binary(b) if b.len() >= LARGE_VALUE_THRESHOLD => {
            (b.as_slice(), LargeKind::Binary)
        }
        other => return Ok(StoredValue::Inline(other.clone())),
    };
    let hash = write_large_value(conn, bytes, kind)?;
    large_values.push(hash);
    Ok(StoredValue::Large { hash, kind })
}

fn restore(conn: &Connection, node: NodeId, value: StoredValue) -> StoreResult<PropertyValue> {
    match value {
        StoredValue::Inline(value) => Ok(value),
        StoredValue::Large { hash, kind } => {
            let bytes = read_large_value(conn, hash)?.ok_or_else(|| StoreError::Corrupt {
                node,
                reason: format!("missing large value {hash}"),
            })?;
            match kind {
                LargeKind::Binary => Ok(PropertyValue::Binary(bytes)),
                LargeKind::String => String::from_utf8(bytes)
                    .map(PropertyValue::String)
                    .map_err(|_| StoreError::Corrupt {
                        node,
                        reason: format!("large value {hash} is not valid UTF-8"),
                    }),
            }
        }
    }
}

/// Insert a large value row unless content with the same hash already
/// exists. Equality is by content hash, never by property identity.
pub(crate) fn write_large_value(
    conn: &Connection,
    bytes: &[u8],
    kind: LargeKind,
) -> StoreResult<ContentHash> {
    let hash = ContentHash::of(bytes);
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM large_values WHERE hash = ?1",
            params![hash.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        let (stored, compressed) = maybe_compress(bytes.to_vec())?;
        conn.execute(
            "INSERT INTO large_values (hash, bytes, length, value_type, compressed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                hash.as_bytes().as_slice(),
                stored,
                bytes.len() as i64,
                kind.tag(),
                compressed as i64,
            ],
        )?;
    }
    Ok(hash)
}

fn read_large_value(conn: &Connection, hash: ContentHash) -> StoreResult<Option<Vec<u8>>> {
    let row: Option<(Vec<u8>, i64)> = conn
        .query_row(
            "SELECT bytes, compressed FROM large_values WHERE hash = ?1",
            params![hash.as_bytes().as_slice()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        None => Ok(None),
        Some((bytes, 0)) => Ok(Some(bytes)),
        Some((bytes, _)) => zstd::decode_all(bytes.as_slice())
            .map(Some)
            .map_err(|e| StoreError::Serialization(e.to_string())),
    }
}

fn maybe_compress(raw: Vec<u8>) -> StoreResult<(Vec<u8>, bool)> {
    if raw.len() < LARGE_VALUE_THRESHOLD {
        return Ok((raw, false));
    }
    let compressed =
        zstd::encode_all(raw.as_slice(), ZSTD_LEVEL).map_err(|e| StoreError::Serialization(e.to_string()))?;
    if compressed.len() < raw.len() {
        Ok((compressed, true))
    } else {
        Ok((raw, false))
    }
}
