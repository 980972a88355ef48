//! Single-file binary layout.
//!
//! ```text
//! [Header: 17 bytes, packed, little-endian]
//!   magic: "VLDB" (4)
//!   version: u32 (=1)
//!   metric: u8 (0=l2, 1=cosine, 2=dot)
//!   dimension: u32
//!   count: u32
//! [Id index]        u32 length + JSON object {id: position}
//! [Metadata index]  u32 length + JSON object {id: offset}
//! [Vectors]         count * dimension * 4 bytes of f32, in position order
//! [Metadata blobs]  per record with metadata: u32 length + JSON object
//! ```
//!
//! Metadata offsets are relative to the start of the blob section.

use std::collections::BTreeMap;

use vldb_core::{Metadata, Metric, VectorRecord};

use crate::StorageError;

pub const MAGIC: &[u8; 4] = b"VLDB";
pub const VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 4 + 4 + 1 + 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub metric: Metric,
    pub dimension: u32,
    pub count: u32,
}

impl Header {
    pub fn new(metric: Metric, dimension: u32, count: u32) -> Self {
        Self {
            version: VERSION,
            metric,
            dimension,
            count,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8] = self.metric.code();
        buf[9..13].copy_from_slice(&self.dimension.to_le_bytes());
        buf[13..17].copy_from_slice(&self.count.to_le_bytes());
        buf
    }

    /// Parses the header at the start of `bytes`.
    ///
    /// Magic is checked before length so that an unrelated short file is
    /// reported as the wrong format rather than as a truncated database.
    /// Only a strict prefix of the magic counts as truncation.
    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() < MAGIC.len() {
            if !MAGIC.starts_with(bytes) {
                return Err(StorageError::Format("magic bytes mismatch".to_string()));
            }
            return Err(StorageError::Corruption(format!(
                "file too small: {} bytes",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(StorageError::Format("magic bytes mismatch".to_string()));
        }
        let mut r = Reader::new(bytes);
        r.skip(MAGIC.len());
        let version = r.u32("header")?;
        if version != VERSION {
            return Err(StorageError::Format(format!(
                "unsupported file version: {version}"
            )));
        }
        let code = r.take(1, "header")?[0];
        let metric = Metric::from_code(code).map_err(|e| StorageError::Format(e.to_string()))?;
        let dimension = r.u32("header")?;
        let count = r.u32("header")?;
        Ok(Self {
            version,
            metric,
            dimension,
            count,
        })
    }
}

/// Everything read back from a database file.
#[derive(Debug)]
pub struct Decoded {
    pub header: Header,
    /// Records in position order.
    pub records: Vec<VectorRecord>,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], StorageError> {
        let remaining = self.buf.len() - self.pos;
        if n > remaining {
            return Err(StorageError::Corruption(format!(
                "truncated {what}: need {n} bytes, have {remaining}"
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self, what: &str) -> Result<u32, StorageError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn block(&mut self, what: &str) -> Result<&'a [u8], StorageError> {
        let len = self.u32(what)? as usize;
        self.take(len, what)
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32, StorageError> {
    u32::try_from(value)
        .map_err(|_| StorageError::Capacity(format!("{what} of {value} does not fit in 4 bytes")))
}

fn push_block(out: &mut Vec<u8>, block: &[u8], what: &str) -> Result<(), StorageError> {
    out.extend_from_slice(&to_u32(block.len(), what)?.to_le_bytes());
    out.extend_from_slice(block);
    Ok(())
}

/// Serialises a whole database. `records` must be in position order and
/// every vector must have `dimension` components.
pub fn encode(
    metric: Metric,
    dimension: usize,
    records: &[VectorRecord],
) -> Result<Vec<u8>, StorageError> {
    let header = Header::new(
        metric,
        to_u32(dimension, "dimension")?,
        to_u32(records.len(), "record count")?,
    );

    let positions: BTreeMap<&str, usize> = records
        .iter()
        .enumerate()
        .map(|(pos, r)| (r.id.as_str(), pos))
        .collect();

    let mut offsets: BTreeMap<&str, u64> = BTreeMap::new();
    let mut blobs = Vec::new();
    for r in records {
        if let Some(meta) = &r.metadata {
            offsets.insert(r.id.as_str(), blobs.len() as u64);
            let json = serde_json::to_vec(meta)
                .map_err(|e| StorageError::Format(format!("metadata for {}: {e}", r.id)))?;
            push_block(&mut blobs, &json, "metadata blob")?;
        }
    }

    let id_index = serde_json::to_vec(&positions)
        .map_err(|e| StorageError::Format(format!("id index: {e}")))?;
    let meta_index = serde_json::to_vec(&offsets)
        .map_err(|e| StorageError::Format(format!("metadata index: {e}")))?;

    let mut out = Vec::with_capacity(
        HEADER_SIZE
            + 8
            + id_index.len()
            + meta_index.len()
            + records.len() * dimension * 4
            + blobs.len(),
    );
    out.extend_from_slice(&header.encode());
    push_block(&mut out, &id_index, "id index")?;
    push_block(&mut out, &meta_index, "metadata index")?;
    for r in records {
        debug_assert_eq!(r.vector.len(), dimension);
        for x in &r.vector {
            out.extend_from_slice(&x.to_le_bytes());
        }
    }
    out.extend_from_slice(&blobs);
    Ok(out)
}

/// Parses a whole database file.
pub fn decode(bytes: &[u8]) -> Result<Decoded, StorageError> {
    let header = Header::decode(bytes)?;
    let count = header.count as usize;
    let dimension = header.dimension as usize;

    let mut r = Reader::new(bytes);
    r.skip(HEADER_SIZE);

    let id_index: BTreeMap<String, u64> = serde_json::from_slice(r.block("id index")?)
        .map_err(|e| StorageError::Corruption(format!("id index: {e}")))?;
    if id_index.len() != count {
        return Err(StorageError::Corruption(format!(
            "id index holds {} entries, header says {count}",
            id_index.len()
        )));
    }
    let mut slots: Vec<Option<String>> = vec![None; count];
    for (id, pos) in id_index {
        let slot = usize::try_from(pos)
            .ok()
            .and_then(|p| slots.get_mut(p))
            .ok_or_else(|| {
                StorageError::Corruption(format!("position {pos} of {id} out of range"))
            })?;
        if slot.is_some() {
            return Err(StorageError::Corruption(format!(
                "position {pos} assigned twice"
            )));
        }
        *slot = Some(id);
    }

    let offsets: BTreeMap<String, u64> = serde_json::from_slice(r.block("metadata index")?)
        .map_err(|e| StorageError::Corruption(format!("metadata index: {e}")))?;

    let vector_bytes = count
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| StorageError::Corruption("vector section size overflows".to_string()))?;
    let vector_section = r.take(vector_bytes, "vector section")?;
    let blob_section = r.rest();

    let mut records = Vec::with_capacity(count);
    let mut chunks = vector_section.chunks_exact(4);
    for id in slots.into_iter().flatten() {
        let vector = chunks
            .by_ref()
            .take(dimension)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        records.push(VectorRecord::new(id, vector, None));
    }

    if !offsets.is_empty() {
        let by_id: BTreeMap<&str, usize> = records
            .iter()
            .enumerate()
            .map(|(pos, rec)| (rec.id.as_str(), pos))
            .collect();
        let mut resolved = Vec::with_capacity(offsets.len());
        for (id, offset) in &offsets {
            let pos = *by_id.get(id.as_str()).ok_or_else(|| {
                StorageError::Corruption(format!("metadata for unknown id {id}"))
            })?;
            resolved.push((pos, read_metadata(blob_section, *offset, id)?));
        }
        for (pos, meta) in resolved {
            records[pos].metadata = Some(meta);
        }
    }

    log::trace!(
        target: "vldb::format",
        "decoded bytes={} records={} with_metadata={} dimension={}",
        bytes.len(),
        records.len(),
        offsets.len(),
        dimension
    );
    Ok(Decoded { header, records })
}

fn read_metadata(section: &[u8], offset: u64, id: &str) -> Result<Metadata, StorageError> {
    let start = usize::try_from(offset)
        .ok()
        .filter(|&o| o <= section.len())
        .ok_or_else(|| {
            StorageError::Corruption(format!("metadata offset {offset} of {id} out of range"))
        })?;
    let mut r = Reader::new(&section[start..]);
    let blob = r.block("metadata blob")?;
    match serde_json::from_slice(blob) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(StorageError::Corruption(format!(
            "metadata of {id} is not an object"
        ))),
        Err(e) => Err(StorageError::Corruption(format!("metadata of {id}: {e}"))),
    }
}
