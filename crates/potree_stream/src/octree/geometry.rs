//! OctreeGeometry - arena of octree nodes for one point cloud.
//!
//! The arena only ever grows. Nodes are registered when a hierarchy chunk
//! names them and stay registered for the lifetime of the geometry; loading
//! and eviction only flip their [`LoadState`] and attach or drop buffers.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use smallvec::SmallVec;

use super::bounds::DAabb3;
use super::hierarchy::HierarchyEntry;
use super::node::{LoadState, NodeId, NodeKind, NodeName, OctreeNode};
use crate::error::HierarchyParseError;
use crate::format::{Metadata, PointBuffers, PointLayout};
use crate::transport::join_url;

/// Everything needed to create an octree before any hierarchy is loaded.
#[derive(Clone, Debug)]
pub struct GeometryDesc {
  /// Root cube.
  pub bounding_box: DAabb3,
  /// Point spacing at the root level.
  pub spacing: f64,
  pub layout: PointLayout,
  /// Resource holding the hierarchy chunks.
  pub hierarchy_url: String,
  /// Resource holding the geometry payloads.
  pub octree_url: String,
  /// Byte range of the root hierarchy chunk.
  pub root_hierarchy: Range<u64>,
  /// Cloud-wide position extent, when the metadata supplies one.
  pub position_bounds: Option<DAabb3>,
}

/// Arena of all known nodes of one octree.
#[derive(Debug)]
pub struct OctreeGeometry {
  bounding_box: DAabb3,
  spacing: f64,
  layout: Arc<PointLayout>,
  hierarchy_url: Arc<str>,
  octree_url: Arc<str>,
  position_bounds: Option<DAabb3>,
  nodes: Vec<OctreeNode>,
  by_name: HashMap<NodeName, NodeId>,
}

impl OctreeGeometry {
  /// Create a geometry holding only the root, as a proxy for the first
  /// hierarchy chunk.
  pub fn new(desc: GeometryDesc) -> Self {
    let mut root = OctreeNode::new(NodeName::root(), desc.bounding_box, desc.spacing, None);
    root.hierarchy_range = Some(desc.root_hierarchy);

    let mut by_name = HashMap::new();
    by_name.insert(NodeName::root(), NodeId(0));

    Self {
      bounding_box: desc.bounding_box,
      spacing: desc.spacing,
      layout: Arc::new(desc.layout),
      hierarchy_url: Arc::from(desc.hierarchy_url),
      octree_url: Arc::from(desc.octree_url),
      position_bounds: desc.position_bounds,
      nodes: vec![root],
      by_name,
    }
  }

  /// Geometry for a Potree 2.0 dataset whose files live under `base`.
  pub fn from_metadata(metadata: &Metadata, base: &str) -> Self {
    let attributes = metadata.point_attributes();
    let position_bounds = attributes.position_bounds();
    Self::new(GeometryDesc {
      bounding_box: metadata.bounding_box(),
      spacing: metadata.spacing,
      layout: PointLayout {
        attributes,
        scale: metadata.scale(),
        offset: metadata.offset(),
      },
      hierarchy_url: join_url(base, "hierarchy.bin"),
      octree_url: join_url(base, "octree.bin"),
      root_hierarchy: 0..metadata.hierarchy.first_chunk_size,
      position_bounds,
    })
  }

  pub fn root(&self) -> NodeId {
    NodeId(0)
  }

  pub fn node(&self, id: NodeId) -> Option<&OctreeNode> {
    self.nodes.get(id.index())
  }

  pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut OctreeNode> {
    self.nodes.get_mut(id.index())
  }

  /// Look a node up by path name.
  pub fn find(&self, name: &NodeName) -> Option<NodeId> {
    self.by_name.get(name).copied()
  }

  pub fn parent(&self, id: NodeId) -> Option<NodeId> {
    self.node(id).and_then(OctreeNode::parent)
  }

  /// Known children in octant order.
  pub fn children(&self, id: NodeId) -> SmallVec<[NodeId; 8]> {
    self
      .node(id)
      .map(|n| n.child_ids().collect())
      .unwrap_or_default()
  }

  /// Number of registered nodes.
  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// All nodes in registration order.
  pub fn iter(&self) -> impl Iterator<Item = (NodeId, &OctreeNode)> {
    self
      .nodes
      .iter()
      .enumerate()
      .map(|(i, n)| (NodeId(i as u32), n))
  }

  /// All registered descendants of `id`, depth-first in octant order.
  pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack: Vec<NodeId> = self.children(id).into_iter().rev().collect();
    while let Some(next) = stack.pop() {
      out.push(next);
      stack.extend(self.children(next).into_iter().rev());
    }
    out
  }

  pub fn bounding_box(&self) -> &DAabb3 {
    &self.bounding_box
  }

  pub fn spacing(&self) -> f64 {
    self.spacing
  }

  pub fn layout(&self) -> &Arc<PointLayout> {
    &self.layout
  }

  pub fn hierarchy_url(&self) -> &Arc<str> {
    &self.hierarchy_url
  }

  pub fn octree_url(&self) -> &Arc<str> {
    &self.octree_url
  }

  /// Coarse box of the child in `octant`, whether or not it exists.
  pub fn child_bounding_box(&self, id: NodeId, octant: u8) -> Option<DAabb3> {
    self.node(id).map(|n| n.bounding_box.child(octant))
  }

  /// Best known box for `id`.
  ///
  /// Resident nodes use the extent of their decoded points. Otherwise the
  /// coarse box is clipped to the cloud-wide position extent if the metadata
  /// supplied one, and returned as-is if not.
  pub fn tight_bounding_box(&self, id: NodeId) -> Option<DAabb3> {
    let node = self.node(id)?;
    if let Some(bounds) = node.buffers.as_ref().and_then(|b| b.tight_bounds) {
      return Some(bounds);
    }
    match self.position_bounds {
      Some(extent) => Some(node.bounding_box.intersection(&extent).unwrap_or(node.bounding_box)),
      None => Some(node.bounding_box),
    }
  }

  /// Sum of point counts over resident nodes.
  pub fn resident_points(&self) -> u64 {
    self
      .nodes
      .iter()
      .filter(|n| n.state == LoadState::Resident)
      .map(|n| u64::from(n.num_points))
      .sum()
  }

  /// Attach a decoded hierarchy chunk rooted at `id`.
  ///
  /// `entries` are breadth-first with `id` itself first. The node's own
  /// kind, point count and byte range are replaced by its entry; descendants
  /// are registered if unknown. Nothing is modified when the entries are
  /// inconsistent with the tree. Returns the number of newly registered
  /// nodes.
  pub fn expand_hierarchy(&mut self, id: NodeId, entries: &[HierarchyEntry]) -> Result<usize, HierarchyParseError> {
    let node_name = self
      .node(id)
      .map(|n| n.name.clone())
      .ok_or(HierarchyParseError::Empty)?;
    validate_entries(&node_name, entries)?;

    let mut registered = 0;
    for entry in entries {
      let entry_id = match self.find(&entry.name) {
        Some(existing) => existing,
        None => {
          // Validated: the parent is either `id` or an earlier entry.
          let Some(parent_id) = entry.name.parent().and_then(|p| self.find(&p)) else {
            continue;
          };
          let Some(octant) = entry.name.octant() else {
            continue;
          };
          registered += 1;
          self.register_child(parent_id, octant, entry.name.clone())
        }
      };

      let node = &mut self.nodes[entry_id.index()];
      node.kind = entry.kind;
      node.num_points = entry.num_points;
      if entry.kind == NodeKind::Proxy {
        node.hierarchy_range = Some(entry.byte_range());
        node.geometry_range = 0..0;
      } else {
        node.hierarchy_range = None;
        node.geometry_range = entry.byte_range();
      }
    }

    tracing::debug!(node = %node_name, entries = entries.len(), registered, "expanded hierarchy");
    Ok(registered)
  }

  fn register_child(&mut self, parent: NodeId, octant: u8, name: NodeName) -> NodeId {
    let id = NodeId(self.nodes.len() as u32);
    let parent_node = &self.nodes[parent.index()];
    let child = OctreeNode::new(
      name.clone(),
      parent_node.bounding_box.child(octant),
      parent_node.spacing * 0.5,
      Some(parent),
    );
    self.nodes.push(child);
    self.nodes[parent.index()].children[usize::from(octant)] = Some(id);
    self.by_name.insert(name, id);
    id
  }

  pub(crate) fn mark_loading(&mut self, id: NodeId) {
    if let Some(node) = self.node_mut(id) {
      node.state = LoadState::Loading;
    }
  }

  /// Attach decoded buffers and make the node resident.
  pub(crate) fn attach_buffers(&mut self, id: NodeId, buffers: Arc<PointBuffers>) {
    if let Some(node) = self.node_mut(id) {
      node.buffers = Some(buffers);
      node.state = LoadState::Resident;
      node.failed_attempts = 0;
    }
  }

  /// Return a failed node to the unloaded pool.
  pub(crate) fn mark_failed(&mut self, id: NodeId) {
    if let Some(node) = self.node_mut(id) {
      node.state = LoadState::Unloaded;
      node.buffers = None;
      node.failed_attempts += 1;
    }
  }

  /// Exclude a node from loading for the rest of the session.
  pub(crate) fn mark_unavailable(&mut self, id: NodeId) {
    if let Some(node) = self.node_mut(id) {
      node.state = LoadState::Unavailable;
      node.buffers = None;
      node.failed_attempts += 1;
    }
  }

  /// Drop a resident node's buffers. Returns whether it was resident.
  pub fn dispose(&mut self, id: NodeId) -> bool {
    match self.node_mut(id) {
      Some(node) if node.state == LoadState::Resident => {
        node.buffers = None;
        node.state = LoadState::Unloaded;
        true
      }
      _ => false,
    }
  }

  /// Dispose every resident descendant of `id`, returning the ones released.
  pub fn dispose_descendants(&mut self, id: NodeId) -> Vec<NodeId> {
    self
      .descendants(id)
      .into_iter()
      .filter(|&d| self.dispose(d))
      .collect()
  }
}

/// Entries must start at `root`, every later entry must hang off `root`
/// or an earlier non-proxy entry, and no byte range may overflow.
fn validate_entries(root: &NodeName, entries: &[HierarchyEntry]) -> Result<(), HierarchyParseError> {
  let first = entries.first().ok_or(HierarchyParseError::Empty)?;
  if let Some(entry) = entries.iter().find(|e| e.byte_offset.checked_add(e.byte_size).is_none()) {
    return Err(HierarchyParseError::RangeOverflow {
      name: entry.name.to_string(),
    });
  }
  if &first.name != root {
    return Err(HierarchyParseError::NameMismatch {
      expected: root.to_string(),
      found: first.name.to_string(),
    });
  }
  if first.kind == NodeKind::Proxy {
    return Err(HierarchyParseError::ProxyRoot {
      name: root.to_string(),
    });
  }

  let mut expandable: HashSet<&NodeName> = HashSet::new();
  expandable.insert(&first.name);
  for entry in &entries[1..] {
    let parent = entry.name.parent();
    if !parent.as_ref().is_some_and(|p| expandable.contains(p)) {
      return Err(HierarchyParseError::NameMismatch {
        expected: parent.map_or_else(|| root.to_string(), |p| p.to_string()),
        found: entry.name.to_string(),
      });
    }
    if entry.kind != NodeKind::Proxy {
      expandable.insert(&entry.name);
    }
  }
  Ok(())
}

#[cfg(test)]
#[path = "geometry_test.rs"]
mod geometry_test;
