//! Hierarchy chunk decoding.
//!
//! A hierarchy chunk describes the topology of a sub-tree: for every node, its
//! type, child mask, point count and the byte range of its payload. Large
//! octrees keep only the root chunk in memory; deeper chunks are referenced by
//! proxy nodes and loaded on demand like any other node payload.
//!
//! # Potree 2.0 record layout
//!
//! ```text
//! offset  size  field
//! 0       1     node type (0 normal, 1 leaf, 2 proxy)
//! 1       1     child mask (bit i = child in octant i present)
//! 2       4     point count (u32 LE)
//! 6       8     byte offset (u64 LE)   proxy: offset of its hierarchy chunk
//! 14      8     byte size   (u64 LE)   proxy: size of its hierarchy chunk
//! ```
//!
//! Records are stored breadth-first; the first record is the chunk root.

use std::io::Cursor;
use std::ops::Range;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::node::{NodeKind, NodeName};
use crate::error::HierarchyParseError;

/// Size of one hierarchy record in bytes.
pub const BYTES_PER_NODE: usize = 1 + 1 + 4 + 8 + 8;

/// One decoded hierarchy record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HierarchyEntry {
  pub name: NodeName,
  pub kind: NodeKind,
  pub child_mask: u8,
  pub num_points: u32,
  /// Geometry byte offset, or hierarchy chunk offset for proxies.
  pub byte_offset: u64,
  /// Geometry byte size, or hierarchy chunk size for proxies.
  pub byte_size: u64,
}

impl HierarchyEntry {
  /// Payload range; entries from `parse_chunk` never saturate.
  pub fn byte_range(&self) -> Range<u64> {
    self.byte_offset..self.byte_offset.saturating_add(self.byte_size)
  }
}

/// Decode contract for hierarchy chunks.
///
/// Called on worker threads.
pub trait HierarchyDecoder: Send + Sync {
  /// Decode the chunk rooted at `root`, returning entries breadth-first with
  /// the chunk root first.
  fn decode(&self, bytes: &[u8], root: &NodeName) -> Result<Vec<HierarchyEntry>, HierarchyParseError>;
}

/// Decoder for the Potree 2.0 `hierarchy.bin` layout.
#[derive(Clone, Copy, Debug, Default)]
pub struct PotreeHierarchyDecoder;

impl HierarchyDecoder for PotreeHierarchyDecoder {
  fn decode(&self, bytes: &[u8], root: &NodeName) -> Result<Vec<HierarchyEntry>, HierarchyParseError> {
    parse_chunk(bytes, root)
  }
}

/// Parse a Potree 2.0 hierarchy chunk.
#[tracing::instrument(skip_all, fields(root = %root, len = bytes.len()))]
pub fn parse_chunk(bytes: &[u8], root: &NodeName) -> Result<Vec<HierarchyEntry>, HierarchyParseError> {
  if bytes.is_empty() {
    return Err(HierarchyParseError::Empty);
  }
  if bytes.len() % BYTES_PER_NODE != 0 {
    return Err(HierarchyParseError::Misaligned {
      len: bytes.len(),
      record_size: BYTES_PER_NODE,
    });
  }

  let num_records = bytes.len() / BYTES_PER_NODE;
  let mut names = Vec::with_capacity(num_records);
  names.push(root.clone());
  let mut entries = Vec::with_capacity(num_records);
  let mut cursor = Cursor::new(bytes);

  for i in 0..num_records {
    let Some(name) = names.get(i).cloned() else {
      return Err(HierarchyParseError::TrailingRecords {
        expected: names.len(),
        available: num_records,
      });
    };

    // Length is validated above, reads cannot run past the end.
    let (node_type, child_mask, num_points, byte_offset, byte_size) = read_record(&mut cursor)
      .map_err(|_| HierarchyParseError::Truncated {
        expected: i + 1,
        available: num_records,
      })?;

    let kind = NodeKind::from_byte(node_type).ok_or_else(|| HierarchyParseError::UnknownNodeType {
      name: name.to_string(),
      node_type,
    })?;

    if byte_offset.checked_add(byte_size).is_none() {
      return Err(HierarchyParseError::RangeOverflow {
        name: name.to_string(),
      });
    }

    if i == 0 && kind == NodeKind::Proxy {
      return Err(HierarchyParseError::ProxyRoot {
        name: name.to_string(),
      });
    }

    // A proxy's children live in another chunk.
    if kind != NodeKind::Proxy {
      for octant in 0..8u8 {
        if child_mask & (1 << octant) != 0 {
          names.push(name.child(octant));
        }
      }
    }

    entries.push(HierarchyEntry {
      name,
      kind,
      child_mask,
      num_points,
      byte_offset,
      byte_size,
    });
  }

  if names.len() > num_records {
    return Err(HierarchyParseError::Truncated {
      expected: names.len(),
      available: num_records,
    });
  }

  Ok(entries)
}

fn read_record(cursor: &mut Cursor<&[u8]>) -> std::io::Result<(u8, u8, u32, u64, u64)> {
  let node_type = cursor.read_u8()?;
  let child_mask = cursor.read_u8()?;
  let num_points = cursor.read_u32::<LittleEndian>()?;
  let byte_offset = cursor.read_u64::<LittleEndian>()?;
  let byte_size = cursor.read_u64::<LittleEndian>()?;
  Ok((node_type, child_mask, num_points, byte_offset, byte_size))
}

/// Encode entries in the Potree 2.0 record layout.
///
/// Entries must already be in breadth-first order with the chunk root first.
pub fn encode_chunk(entries: &[HierarchyEntry]) -> Vec<u8> {
  let mut out = Vec::with_capacity(entries.len() * BYTES_PER_NODE);
  for entry in entries {
    let node_type = match entry.kind {
      NodeKind::Normal => 0u8,
      NodeKind::Leaf => 1,
      NodeKind::Proxy => 2,
    };
    // Writes into a Vec are infallible.
    let _ = out.write_u8(node_type);
    let _ = out.write_u8(entry.child_mask);
    let _ = out.write_u32::<LittleEndian>(entry.num_points);
    let _ = out.write_u64::<LittleEndian>(entry.byte_offset);
    let _ = out.write_u64::<LittleEndian>(entry.byte_size);
  }
  out
}

#[cfg(test)]
#[path = "hierarchy_test.rs"]
mod hierarchy_test;
