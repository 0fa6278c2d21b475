use super::*;

fn entry(name: &str, kind: NodeKind, child_mask: u8, num_points: u32) -> HierarchyEntry {
  HierarchyEntry {
    name: NodeName::parse(name).unwrap(),
    kind,
    child_mask,
    num_points,
    byte_offset: 0,
    byte_size: u64::from(num_points) * 18,
  }
}

// =========================================================================
// Well-formed chunks
// =========================================================================

/// Encoding then parsing a small tree yields the same breadth-first entries.
#[test]
fn test_parse_breadth_first_tree() {
  let entries = vec![
    entry("r", NodeKind::Normal, 0b0000_0101, 100),
    entry("r0", NodeKind::Normal, 0b1000_0000, 50),
    entry("r2", NodeKind::Leaf, 0, 25),
    entry("r07", NodeKind::Leaf, 0, 10),
  ];

  let bytes = encode_chunk(&entries);
  assert_eq!(bytes.len(), 4 * BYTES_PER_NODE);

  let parsed = parse_chunk(&bytes, &NodeName::root()).unwrap();
  assert_eq!(parsed, entries);
}

/// Proxy children are not expanded: their subtree lives in another chunk.
#[test]
fn test_proxy_children_not_expanded() {
  let mut proxy = entry("r1", NodeKind::Proxy, 0xFF, 40);
  proxy.byte_offset = 4096;
  proxy.byte_size = 220;
  let entries = vec![entry("r", NodeKind::Normal, 0b0000_0010, 100), proxy];

  let parsed = parse_chunk(&encode_chunk(&entries), &NodeName::root()).unwrap();
  assert_eq!(parsed.len(), 2, "Proxy child mask must not pull in records");
  assert_eq!(parsed[1].kind, NodeKind::Proxy);
  assert_eq!(parsed[1].byte_range(), 4096..4316);
}

/// Chunks rooted below the tree root produce names under that root.
#[test]
fn test_parse_nested_chunk_root() {
  let entries = vec![
    entry("r3", NodeKind::Normal, 0b0000_0001, 70),
    entry("r30", NodeKind::Leaf, 0, 30),
  ];
  let root = NodeName::parse("r3").unwrap();
  let parsed = parse_chunk(&encode_chunk(&entries), &root).unwrap();
  assert_eq!(parsed[1].name.as_str(), "r30");
}

// =========================================================================
// Malformed chunks
// =========================================================================

#[test]
fn test_empty_chunk_rejected() {
  assert_eq!(
    parse_chunk(&[], &NodeName::root()),
    Err(HierarchyParseError::Empty)
  );
}

#[test]
fn test_misaligned_chunk_rejected() {
  let mut bytes = encode_chunk(&[entry("r", NodeKind::Leaf, 0, 1)]);
  bytes.push(0);
  assert!(matches!(
    parse_chunk(&bytes, &NodeName::root()),
    Err(HierarchyParseError::Misaligned { .. })
  ));
}

/// Child mask announces 2 children but only 1 record follows.
#[test]
fn test_truncated_chunk_rejected() {
  let entries = vec![
    entry("r", NodeKind::Normal, 0b0000_0011, 100),
    entry("r0", NodeKind::Leaf, 0, 10),
  ];
  assert_eq!(
    parse_chunk(&encode_chunk(&entries), &NodeName::root()),
    Err(HierarchyParseError::Truncated {
      expected: 3,
      available: 2
    })
  );
}

#[test]
fn test_trailing_records_rejected() {
  let entries = vec![
    entry("r", NodeKind::Leaf, 0, 100),
    entry("r0", NodeKind::Leaf, 0, 10),
  ];
  assert!(matches!(
    parse_chunk(&encode_chunk(&entries), &NodeName::root()),
    Err(HierarchyParseError::TrailingRecords { .. })
  ));
}

#[test]
fn test_unknown_node_type_rejected() {
  let mut bytes = encode_chunk(&[entry("r", NodeKind::Leaf, 0, 1)]);
  bytes[0] = 9;
  assert!(matches!(
    parse_chunk(&bytes, &NodeName::root()),
    Err(HierarchyParseError::UnknownNodeType { node_type: 9, .. })
  ));
}

#[test]
fn test_proxy_chunk_root_rejected() {
  let bytes = encode_chunk(&[entry("r", NodeKind::Proxy, 0, 1)]);
  assert!(matches!(
    PotreeHierarchyDecoder.decode(&bytes, &NodeName::root()),
    Err(HierarchyParseError::ProxyRoot { .. })
  ));
}

/// Offset plus size past `u64::MAX` names the offending node.
#[test]
fn test_overflowing_byte_range_rejected() {
  let mut leaf = entry("r3", NodeKind::Leaf, 0, 10);
  leaf.byte_offset = u64::MAX;
  leaf.byte_size = 8;
  let bytes = encode_chunk(&[entry("r", NodeKind::Normal, 0b0000_1000, 100), leaf]);
  assert_eq!(
    parse_chunk(&bytes, &NodeName::root()),
    Err(HierarchyParseError::RangeOverflow {
      name: "r3".to_string()
    })
  );
}

#[test]
fn test_byte_range_saturates() {
  let mut leaf = entry("r", NodeKind::Leaf, 0, 1);
  leaf.byte_offset = u64::MAX - 1;
  leaf.byte_size = 8;
  assert_eq!(leaf.byte_range(), u64::MAX - 1..u64::MAX);
}
