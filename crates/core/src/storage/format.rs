//! On-disk layout: the checksummed header and fixed-size node records.
//!
//! `header.bin` = bincode-encoded [`Header`] + `[magic "HCR1"][u32 CRC32 BE]`.
//! `data.bin` = one record of [`RecordLayout::record_size`] bytes per internal id,
//! so a single node can be rewritten in place at `id * record_size`.
//!
//! Record layout (little-endian):
//!
//! ```text
//! label u64 | flags u8 | level u8 | reserved [u8; 2] | vector [f32; dim]
//! | layer 0: count u32 + [u32; m_max0]
//! | layers 1..max_layers: count u32 + [u32; m] each
//! | crc32 u32
//! ```

use crate::error::{IndexError, Result};
use crate::hnsw::graph::{EntryPoint, GraphParams};
use crate::hnsw::store::NodeSnapshot;
use serde::{Deserialize, Serialize};

/// Leading magic of `header.bin`.
pub const HEADER_MAGIC: [u8; 8] = *b"HNSWGRF1";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Magic bytes placed before the header CRC32.
const HEADER_CRC_MAGIC: &[u8; 4] = b"HCR1";

/// Entry point value meaning "no entry point".
pub const NO_ENTRY_POINT: u32 = u32::MAX;

const FLAG_DELETED: u8 = 0b0000_0001;

/// Index-wide metadata stored in `header.bin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub magic: [u8; 8],
    pub version: u32,
    pub dimension: u32,
    pub space: u8,
    pub capacity: u64,
    pub count: u64,
    pub deleted_count: u64,
    pub m: u32,
    pub m_max0: u32,
    pub ef_construction: u32,
    pub max_layers: u32,
    pub entry_point: u32,
    pub max_level: u32,
    pub record_size: u64,
}

impl Header {
    pub fn new(
        params: &GraphParams,
        capacity: usize,
        count: usize,
        deleted_count: usize,
        entry: EntryPoint,
    ) -> Self {
        Self {
            magic: HEADER_MAGIC,
            version: FORMAT_VERSION,
            dimension: params.dimension as u32,
            space: params.space.code(),
            capacity: capacity as u64,
            count: count as u64,
            deleted_count: deleted_count as u64,
            m: params.m as u32,
            m_max0: params.m_max0 as u32,
            ef_construction: params.ef_construction as u32,
            max_layers: params.max_layers as u32,
            entry_point: entry.id.unwrap_or(NO_ENTRY_POINT),
            max_level: entry.max_level as u32,
            record_size: RecordLayout::from_params(params).record_size() as u64,
        }
    }

    pub fn entry(&self) -> EntryPoint {
        EntryPoint {
            id: (self.entry_point != NO_ENTRY_POINT).then_some(self.entry_point),
            max_level: self.max_level as usize,
        }
    }

    /// Serialize with the CRC32 footer appended.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = bincode::serialize(self)?;
        let crc = crc32fast::hash(&bytes);
        let mut output = Vec::with_capacity(bytes.len() + 8);
        output.extend_from_slice(&bytes);
        output.extend_from_slice(HEADER_CRC_MAGIC);
        output.extend_from_slice(&crc.to_be_bytes());
        Ok(output)
    }

    /// Verify the footer, magic and version, then deserialize.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != HEADER_CRC_MAGIC {
            return Err(IndexError::CorruptPersistedState(
                "header is missing its CRC32 footer".into(),
            ));
        }
        let payload = &raw[..raw.len() - 8];
        let stored_crc = read_u32_be(&raw[raw.len() - 4..]);
        let computed_crc = crc32fast::hash(payload);
        if computed_crc != stored_crc {
            return Err(IndexError::CorruptPersistedState(format!(
                "header CRC32 mismatch: expected {:#010x}, got {:#010x}",
                stored_crc, computed_crc
            )));
        }
        tracing::debug!("Header CRC32 verified: {:#010x}", stored_crc);

        let header: Header = bincode::deserialize(payload)
            .map_err(|e| IndexError::CorruptPersistedState(format!("header: {}", e)))?;
        if header.magic != HEADER_MAGIC {
            return Err(IndexError::CorruptPersistedState("bad header magic".into()));
        }
        if header.version != FORMAT_VERSION {
            return Err(IndexError::CorruptPersistedState(format!(
                "unsupported format version {}",
                header.version
            )));
        }
        Ok(header)
    }
}

fn read_u32_be(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Byte cursor over one record.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }
}

/// Geometry of a fixed-size node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub dimension: usize,
    pub m: usize,
    pub m_max0: usize,
    pub max_layers: usize,
}

impl RecordLayout {
    pub fn from_params(params: &GraphParams) -> Self {
        Self {
            dimension: params.dimension,
            m: params.m,
            m_max0: params.m_max0,
            max_layers: params.max_layers,
        }
    }

    fn layer_bound(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m
        }
    }

    /// Bytes covered by the trailing CRC32.
    fn body_size(&self) -> usize {
        let fixed = 8 + 1 + 1 + 2;
        let vector = 4 * self.dimension;
        let layer0 = 4 + 4 * self.m_max0;
        let upper = (self.max_layers - 1) * (4 + 4 * self.m);
        fixed + vector + layer0 + upper
    }

    pub fn record_size(&self) -> usize {
        self.body_size() + 4
    }

    /// Append the record for `node` to `out`.
    pub fn encode(&self, node: &NodeSnapshot, out: &mut Vec<u8>) -> Result<()> {
        if node.vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: node.vector.len(),
            });
        }
        if node.links.is_empty() || node.links.len() > self.max_layers {
            return Err(IndexError::Serialization(format!(
                "node with {} layers does not fit {} layer slots",
                node.links.len(),
                self.max_layers
            )));
        }

        let start = out.len();
        out.extend_from_slice(&node.label.to_le_bytes());
        out.push(if node.deleted { FLAG_DELETED } else { 0 });
        out.push(node.level() as u8);
        out.extend_from_slice(&[0u8; 2]);
        for x in &node.vector {
            out.extend_from_slice(&x.to_le_bytes());
        }
        for layer in 0..self.max_layers {
            let bound = self.layer_bound(layer);
            let list = node.links.get(layer).map(Vec::as_slice).unwrap_or(&[]);
            if list.len() > bound {
                return Err(IndexError::Serialization(format!(
                    "layer {} holds {} neighbors, bound is {}",
                    layer,
                    list.len(),
                    bound
                )));
            }
            out.extend_from_slice(&(list.len() as u32).to_le_bytes());
            for &n in list {
                out.extend_from_slice(&n.to_le_bytes());
            }
            for _ in list.len()..bound {
                out.extend_from_slice(&0u32.to_le_bytes());
            }
        }
        let crc = crc32fast::hash(&out[start..]);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    /// Decode and verify the record of internal id `id`.
    pub fn decode(&self, id: u32, bytes: &[u8]) -> Result<NodeSnapshot> {
        if bytes.len() != self.record_size() {
            return Err(IndexError::CorruptPersistedState(format!(
                "record {} has {} bytes, expected {}",
                id,
                bytes.len(),
                self.record_size()
            )));
        }
        let body = &bytes[..self.body_size()];
        let stored_crc = u32::from_le_bytes([
            bytes[body.len()],
            bytes[body.len() + 1],
            bytes[body.len() + 2],
            bytes[body.len() + 3],
        ]);
        if crc32fast::hash(body) != stored_crc {
            return Err(IndexError::CorruptPersistedState(format!(
                "record {} CRC32 mismatch",
                id
            )));
        }

        let mut r = Reader { buf: body, pos: 0 };
        let label = r.u64();
        let flags = r.u8();
        let level = r.u8() as usize;
        r.take::<2>();
        if level >= self.max_layers {
            return Err(IndexError::CorruptPersistedState(format!(
                "record {} has level {} but the index has {} layers",
                id, level, self.max_layers
            )));
        }
        let vector: Vec<f32> = (0..self.dimension).map(|_| r.f32()).collect();

        let mut links = Vec::with_capacity(level + 1);
        for layer in 0..self.max_layers {
            let bound = self.layer_bound(layer);
            let count = r.u32() as usize;
            if count > bound || (layer > level && count != 0) {
                return Err(IndexError::CorruptPersistedState(format!(
                    "record {} has {} neighbors on layer {}",
                    id, count, layer
                )));
            }
            let slots: Vec<u32> = (0..bound).map(|_| r.u32()).collect();
            if layer <= level {
                links.push(slots[..count].to_vec());
            }
        }

        Ok(NodeSnapshot {
            label,
            deleted: flags & FLAG_DELETED != 0,
            vector,
            links,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::distance::Space;

    fn params() -> GraphParams {
        GraphParams {
            space: Space::Cosine,
            dimension: 3,
            m: 2,
            m_max0: 4,
            ef_construction: 10,
            max_layers: 3,
        }
    }

    fn node() -> NodeSnapshot {
        NodeSnapshot {
            label: 77,
            deleted: true,
            vector: vec![0.5, -1.0, 2.0],
            links: vec![vec![1, 2, 3], vec![4]],
        }
    }

    #[test]
    fn test_record_size() {
        let layout = RecordLayout::from_params(&params());
        // 12 fixed + 12 vector + (4 + 16) + 2 * (4 + 8) + 4 crc
        assert_eq!(layout.record_size(), 12 + 12 + 20 + 24 + 4);
    }

    #[test]
    fn test_record_encode_decode() {
        let layout = RecordLayout::from_params(&params());
        let mut buf = Vec::new();
        layout.encode(&node(), &mut buf).unwrap();
        assert_eq!(buf.len(), layout.record_size());
        assert_eq!(layout.decode(0, &buf).unwrap(), node());
    }

    #[test]
    fn test_record_bit_flip_detected() {
        let layout = RecordLayout::from_params(&params());
        let mut buf = Vec::new();
        layout.encode(&node(), &mut buf).unwrap();
        buf[14] ^= 0x40;
        assert!(matches!(
            layout.decode(5, &buf),
            Err(IndexError::CorruptPersistedState(_))
        ));
    }

    #[test]
    fn test_record_rejects_oversized_list() {
        let layout = RecordLayout::from_params(&params());
        let mut n = node();
        n.links[1] = vec![1, 2, 3];
        assert!(layout.encode(&n, &mut Vec::new()).is_err());
    }

    #[test]
    fn test_header_checksum() {
        let header = Header::new(
            &params(),
            100,
            10,
            2,
            EntryPoint {
                id: Some(4),
                max_level: 1,
            },
        );
        let mut bytes = header.encode().unwrap();
        let decoded = Header::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.entry().id, Some(4));

        bytes[10] ^= 0xFF;
        assert!(matches!(
            Header::decode(&bytes),
            Err(IndexError::CorruptPersistedState(_))
        ));
        assert!(Header::decode(b"short").is_err());
    }

    #[test]
    fn test_empty_entry_point_round_trips_as_none() {
        let header = Header::new(&params(), 8, 0, 0, EntryPoint::default());
        assert_eq!(header.entry_point, NO_ENTRY_POINT);
        assert_eq!(header.entry().id, None);
    }
}
