//! OctreeNode - arena record describing one node of a point cloud octree.
//!
//! Nodes are identified by their hierarchical path name (`r`, `r0`, `r07`,
//! ...) and addressed inside an [`OctreeGeometry`](super::OctreeGeometry) by a
//! stable [`NodeId`]. Parent/child links are ids, never owning references.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use super::DAabb3;
use crate::format::PointBuffers;

/// Stable index of a node inside its geometry arena.
///
/// Ids are handed out in registration order and never reused, so comparing
/// ids gives a deterministic tie-break.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
  /// Raw arena index.
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

/// Hierarchical path name: `r` for the root, one octant digit per level.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeName(String);

impl NodeName {
  /// Name of every octree's root node.
  pub fn root() -> Self {
    Self("r".to_string())
  }

  /// Parse a path name, rejecting anything that is not `r[0-7]*`.
  pub fn parse(name: &str) -> Option<Self> {
    let mut chars = name.chars();
    if chars.next() != Some('r') {
      return None;
    }
    if chars.all(|c| ('0'..='7').contains(&c)) {
      Some(Self(name.to_string()))
    } else {
      None
    }
  }

  /// Name of the child in `octant` (0-7).
  pub fn child(&self, octant: u8) -> Self {
    debug_assert!(octant < 8, "octant out of range");
    let mut name = String::with_capacity(self.0.len() + 1);
    name.push_str(&self.0);
    name.push(char::from(b'0' + octant));
    Self(name)
  }

  /// Depth below the root (root = 0).
  pub fn level(&self) -> u32 {
    (self.0.len() - 1) as u32
  }

  /// Octant of this node within its parent, `None` for the root.
  pub fn octant(&self) -> Option<u8> {
    if self.0.len() < 2 {
      return None;
    }
    self.0.bytes().last().map(|b| b - b'0')
  }

  /// Name of the parent node, `None` for the root.
  pub fn parent(&self) -> Option<Self> {
    if self.0.len() < 2 {
      return None;
    }
    Some(Self(self.0[..self.0.len() - 1].to_string()))
  }

  /// True if `self` is a strict ancestor of `other`.
  pub fn is_ancestor_of(&self, other: &NodeName) -> bool {
    other.0.len() > self.0.len() && other.0.starts_with(&self.0)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for NodeName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Structural role of a node in the hierarchy.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeKind {
  /// Interior node; children are known.
  Normal,
  /// No children.
  Leaf,
  /// Hierarchy boundary: children live in a not-yet-loaded hierarchy chunk.
  Proxy,
}

impl NodeKind {
  /// Decode the hierarchy record type byte.
  pub fn from_byte(byte: u8) -> Option<Self> {
    match byte {
      0 => Some(Self::Normal),
      1 => Some(Self::Leaf),
      2 => Some(Self::Proxy),
      _ => None,
    }
  }
}

/// Residency state of a node's point data.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LoadState {
  /// Descriptor only; eligible for loading.
  Unloaded,
  /// A load task is in flight.
  Loading,
  /// Buffers attached.
  Resident,
  /// Hierarchy data for this node was malformed; skipped for the session.
  Unavailable,
}

/// One node of the octree.
#[derive(Debug)]
pub struct OctreeNode {
  pub(crate) name: NodeName,
  pub(crate) level: u32,
  pub(crate) bounding_box: DAabb3,
  pub(crate) spacing: f64,
  pub(crate) num_points: u32,
  pub(crate) parent: Option<NodeId>,
  pub(crate) children: [Option<NodeId>; 8],
  pub(crate) kind: NodeKind,
  pub(crate) state: LoadState,
  /// Byte range of the geometry payload in the octree resource.
  pub(crate) geometry_range: Range<u64>,
  /// Byte range of the hierarchy chunk, only for proxies.
  pub(crate) hierarchy_range: Option<Range<u64>>,
  pub(crate) buffers: Option<Arc<PointBuffers>>,
  pub(crate) failed_attempts: u32,
}

impl OctreeNode {
  pub(crate) fn new(
    name: NodeName,
    bounding_box: DAabb3,
    spacing: f64,
    parent: Option<NodeId>,
  ) -> Self {
    Self {
      level: name.level(),
      name,
      bounding_box,
      spacing,
      num_points: 0,
      parent,
      children: [None; 8],
      kind: NodeKind::Proxy,
      state: LoadState::Unloaded,
      geometry_range: 0..0,
      hierarchy_range: None,
      buffers: None,
      failed_attempts: 0,
    }
  }

  pub fn name(&self) -> &NodeName {
    &self.name
  }

  pub fn level(&self) -> u32 {
    self.level
  }

  /// Coarse octree cell volume.
  pub fn bounding_box(&self) -> &DAabb3 {
    &self.bounding_box
  }

  pub fn spacing(&self) -> f64 {
    self.spacing
  }

  pub fn num_points(&self) -> u32 {
    self.num_points
  }

  pub fn parent(&self) -> Option<NodeId> {
    self.parent
  }

  /// Child slots indexed by octant; absent children are `None`.
  pub fn children(&self) -> &[Option<NodeId>; 8] {
    &self.children
  }

  /// Iterate over present children.
  pub fn child_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
    self.children.iter().flatten().copied()
  }

  pub fn has_children(&self) -> bool {
    self.children.iter().any(Option::is_some)
  }

  pub fn kind(&self) -> NodeKind {
    self.kind
  }

  pub fn state(&self) -> LoadState {
    self.state
  }

  pub fn is_resident(&self) -> bool {
    self.state == LoadState::Resident
  }

  pub fn is_loading(&self) -> bool {
    self.state == LoadState::Loading
  }

  /// Decoded point data, present only while resident.
  pub fn buffers(&self) -> Option<&Arc<PointBuffers>> {
    self.buffers.as_ref()
  }

  /// Number of failed load attempts so far.
  pub fn failed_attempts(&self) -> u32 {
    self.failed_attempts
  }

  pub fn geometry_range(&self) -> Range<u64> {
    self.geometry_range.clone()
  }

  pub fn hierarchy_range(&self) -> Option<Range<u64>> {
    self.hierarchy_range.clone()
  }
}

#[cfg(test)]
#[path = "node_test.rs"]
mod node_test;
