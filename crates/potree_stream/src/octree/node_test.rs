use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::*;

// =========================================================================
// NodeName path arithmetic
// =========================================================================

/// Root is level 0 and has neither parent nor octant.
#[test]
fn test_root_name() {
  let root = NodeName::root();
  assert_eq!(root.as_str(), "r");
  assert_eq!(root.level(), 0);
  assert!(root.parent().is_none());
  assert!(root.octant().is_none());
}

/// Each child appends one octant digit and goes one level deeper.
#[test]
fn test_child_appends_octant() {
  let child = NodeName::root().child(3).child(7);
  assert_eq!(child.as_str(), "r37");
  assert_eq!(child.level(), 2);
  assert_eq!(child.octant(), Some(7));
  assert_eq!(child.parent(), Some(NodeName::root().child(3)));
}

/// Parsing accepts only `r` followed by octant digits.
#[test]
fn test_parse_validates() {
  assert!(NodeName::parse("r").is_some());
  assert!(NodeName::parse("r0123").is_some());
  assert!(NodeName::parse("r8").is_none(), "8 is not an octant");
  assert!(NodeName::parse("x01").is_none());
  assert!(NodeName::parse("").is_none());
}

#[test]
fn test_ancestry() {
  let a = NodeName::parse("r1").unwrap();
  let b = NodeName::parse("r12").unwrap();
  let c = NodeName::parse("r2").unwrap();
  assert!(a.is_ancestor_of(&b));
  assert!(!b.is_ancestor_of(&a));
  assert!(!a.is_ancestor_of(&c));
  assert!(!a.is_ancestor_of(&a), "a node is not its own ancestor");
}

/// Equal names must produce equal hashes (HashMap invariant).
#[test]
fn test_name_hash_consistency() {
  let n1 = NodeName::parse("r0456").unwrap();
  let n2 = NodeName::root().child(0).child(4).child(5).child(6);

  let hash = |n: &NodeName| {
    let mut hasher = DefaultHasher::new();
    n.hash(&mut hasher);
    hasher.finish()
  };

  assert_eq!(n1, n2);
  assert_eq!(hash(&n1), hash(&n2), "Equal names must have equal hashes");
}

// =========================================================================
// NodeKind / OctreeNode defaults
// =========================================================================

#[test]
fn test_kind_from_byte() {
  assert_eq!(NodeKind::from_byte(0), Some(NodeKind::Normal));
  assert_eq!(NodeKind::from_byte(1), Some(NodeKind::Leaf));
  assert_eq!(NodeKind::from_byte(2), Some(NodeKind::Proxy));
  assert_eq!(NodeKind::from_byte(3), None);
}

/// Fresh nodes are unloaded proxies with no buffers.
#[test]
fn test_new_node_is_unloaded() {
  let bounds = DAabb3::new(glam::DVec3::ZERO, glam::DVec3::ONE);
  let node = OctreeNode::new(NodeName::root().child(1), bounds, 0.5, Some(NodeId(0)));
  assert_eq!(node.level(), 1);
  assert_eq!(node.state(), LoadState::Unloaded);
  assert_eq!(node.kind(), NodeKind::Proxy);
  assert!(node.buffers().is_none());
  assert!(!node.has_children());
  assert_eq!(node.parent(), Some(NodeId(0)));
}
