use glam::{DVec3, Vec3};

use super::*;
use crate::format::PointAttributes;

fn desc() -> GeometryDesc {
  GeometryDesc {
    bounding_box: DAabb3::new(DVec3::ZERO, DVec3::splat(16.0)),
    spacing: 2.0,
    layout: PointLayout {
      attributes: PointAttributes::position_rgb(),
      scale: DVec3::splat(0.001),
      offset: DVec3::ZERO,
    },
    hierarchy_url: "cloud/hierarchy.bin".into(),
    octree_url: "cloud/octree.bin".into(),
    root_hierarchy: 0..88,
    position_bounds: None,
  }
}

fn entry(name: &str, kind: NodeKind, num_points: u32, offset: u64) -> HierarchyEntry {
  HierarchyEntry {
    name: NodeName::parse(name).unwrap(),
    kind,
    child_mask: 0,
    num_points,
    byte_offset: offset,
    byte_size: u64::from(num_points) * 18,
  }
}

fn expanded() -> OctreeGeometry {
  let mut geometry = OctreeGeometry::new(desc());
  let root = geometry.root();
  geometry
    .expand_hierarchy(
      root,
      &[
        entry("r", NodeKind::Normal, 100, 0),
        entry("r0", NodeKind::Normal, 50, 1800),
        entry("r7", NodeKind::Proxy, 30, 4096),
        entry("r03", NodeKind::Leaf, 10, 2700),
      ],
    )
    .unwrap();
  geometry
}

// =========================================================================
// Construction
// =========================================================================

/// A fresh geometry is a single proxy root pointing at the first chunk.
#[test]
fn test_new_has_proxy_root() {
  let geometry = OctreeGeometry::new(desc());
  assert_eq!(geometry.len(), 1);
  let root = geometry.node(geometry.root()).unwrap();
  assert_eq!(root.kind(), NodeKind::Proxy);
  assert_eq!(root.hierarchy_range(), Some(0..88));
  assert_eq!(root.state(), LoadState::Unloaded);
  assert_eq!(geometry.find(&NodeName::root()), Some(geometry.root()));
}

// =========================================================================
// Hierarchy expansion
// =========================================================================

#[test]
fn test_expand_registers_children_in_order() {
  let geometry = expanded();
  assert_eq!(geometry.len(), 4);

  let root = geometry.node(geometry.root()).unwrap();
  assert_eq!(root.kind(), NodeKind::Normal);
  assert_eq!(root.num_points(), 100);
  assert_eq!(root.geometry_range(), 0..1800);

  let r0 = geometry.find(&NodeName::parse("r0").unwrap()).unwrap();
  let r7 = geometry.find(&NodeName::parse("r7").unwrap()).unwrap();
  let r03 = geometry.find(&NodeName::parse("r03").unwrap()).unwrap();
  assert!(r0 < r7 && r7 < r03, "ids follow registration order");
  assert_eq!(geometry.children(geometry.root()).as_slice(), &[r0, r7]);
  assert_eq!(geometry.parent(r03), Some(r0));
}

/// Children split the parent cube and halve the spacing.
#[test]
fn test_child_geometry_derived_from_parent() {
  let geometry = expanded();
  let r7 = geometry.find(&NodeName::parse("r7").unwrap()).unwrap();
  let node = geometry.node(r7).unwrap();
  assert_eq!(node.bounding_box().min, DVec3::splat(8.0));
  assert_eq!(node.bounding_box().max, DVec3::splat(16.0));
  assert_eq!(node.spacing(), 1.0);
  assert_eq!(node.level(), 1);
  assert!(geometry.bounding_box().contains(node.bounding_box()));
}

/// Proxy entries carry the hierarchy range, not a geometry range.
#[test]
fn test_proxy_entry_ranges() {
  let geometry = expanded();
  let r7 = geometry.find(&NodeName::parse("r7").unwrap()).unwrap();
  let node = geometry.node(r7).unwrap();
  assert_eq!(node.kind(), NodeKind::Proxy);
  assert_eq!(node.hierarchy_range(), Some(4096..4096 + 540));
  assert!(node.geometry_range().is_empty());
}

/// Expanding a proxy's own chunk turns it into a normal node.
#[test]
fn test_expand_nested_proxy() {
  let mut geometry = expanded();
  let r7 = geometry.find(&NodeName::parse("r7").unwrap()).unwrap();
  let added = geometry
    .expand_hierarchy(
      r7,
      &[
        entry("r7", NodeKind::Normal, 30, 9000),
        entry("r71", NodeKind::Leaf, 5, 9540),
      ],
    )
    .unwrap();
  assert_eq!(added, 1);
  let node = geometry.node(r7).unwrap();
  assert_eq!(node.kind(), NodeKind::Normal);
  assert_eq!(node.geometry_range(), 9000..9540);
  assert_eq!(node.hierarchy_range(), None);
}

#[test]
fn test_expand_rejects_foreign_root() {
  let mut geometry = OctreeGeometry::new(desc());
  let root = geometry.root();
  let result = geometry.expand_hierarchy(root, &[entry("r1", NodeKind::Leaf, 1, 0)]);
  assert!(matches!(result, Err(HierarchyParseError::NameMismatch { .. })));
  assert_eq!(geometry.len(), 1);
}

/// An entry whose parent is missing from the chunk leaves the tree untouched.
#[test]
fn test_expand_rejects_orphan_atomically() {
  let mut geometry = OctreeGeometry::new(desc());
  let root = geometry.root();
  let result = geometry.expand_hierarchy(
    root,
    &[
      entry("r", NodeKind::Normal, 10, 0),
      entry("r0", NodeKind::Leaf, 1, 180),
      entry("r45", NodeKind::Leaf, 1, 198),
    ],
  );
  assert!(matches!(result, Err(HierarchyParseError::NameMismatch { .. })));
  assert_eq!(geometry.len(), 1);
  assert_eq!(geometry.node(root).unwrap().num_points(), 0);
}

/// Entries from any decoder are range-checked before the tree changes.
#[test]
fn test_expand_rejects_overflowing_range() {
  let mut geometry = OctreeGeometry::new(desc());
  let root = geometry.root();
  let mut leaf = entry("r2", NodeKind::Leaf, 1, u64::MAX);
  leaf.byte_size = 1;
  let result = geometry.expand_hierarchy(root, &[entry("r", NodeKind::Normal, 10, 0), leaf]);
  assert_eq!(
    result,
    Err(HierarchyParseError::RangeOverflow {
      name: "r2".to_string()
    })
  );
  assert_eq!(geometry.len(), 1);
}

// =========================================================================
// Residency and bounds
// =========================================================================

fn buffers(points: &[Vec3], origin: DVec3) -> Arc<PointBuffers> {
  let tight = DAabb3::from_points(points.iter().map(|p| origin + p.as_dvec3()));
  Arc::new(PointBuffers {
    origin,
    positions: points.to_vec(),
    tight_bounds: tight,
    ..Default::default()
  })
}

#[test]
fn test_tight_bounding_box_prefers_points() {
  let mut geometry = expanded();
  let root = geometry.root();
  assert_eq!(geometry.tight_bounding_box(root), Some(*geometry.bounding_box()));

  geometry.attach_buffers(root, buffers(&[Vec3::new(1.0, 1.0, 1.0), Vec3::new(3.0, 2.0, 5.0)], DVec3::ZERO));
  let tight = geometry.tight_bounding_box(root).unwrap();
  assert_eq!(tight.min, DVec3::ONE);
  assert_eq!(tight.max, DVec3::new(3.0, 2.0, 5.0));
}

#[test]
fn test_tight_bounding_box_clipped_by_metadata_extent() {
  let mut desc = desc();
  desc.position_bounds = Some(DAabb3::new(DVec3::splat(1.0), DVec3::new(4.0, 15.0, 15.0)));
  let geometry = OctreeGeometry::new(desc);
  let tight = geometry.tight_bounding_box(geometry.root()).unwrap();
  assert_eq!(tight.min, DVec3::ONE);
  assert_eq!(tight.max, DVec3::new(4.0, 15.0, 15.0));
}

#[test]
fn test_dispose_descendants() {
  let mut geometry = expanded();
  let root = geometry.root();
  let r0 = geometry.find(&NodeName::parse("r0").unwrap()).unwrap();
  let r03 = geometry.find(&NodeName::parse("r03").unwrap()).unwrap();
  for id in [root, r0, r03] {
    geometry.attach_buffers(id, buffers(&[Vec3::ZERO], DVec3::ZERO));
  }
  assert_eq!(geometry.resident_points(), 160);

  let released = geometry.dispose_descendants(root);
  assert_eq!(released, vec![r0, r03]);
  assert!(geometry.node(root).unwrap().is_resident());
  assert!(geometry.node(r03).unwrap().buffers().is_none());

  assert!(geometry.dispose(root));
  assert!(!geometry.dispose(root), "second dispose is a no-op");
  assert_eq!(geometry.resident_points(), 0);
}

#[test]
fn test_failure_bookkeeping() {
  let mut geometry = expanded();
  let root = geometry.root();
  geometry.mark_loading(root);
  assert!(geometry.node(root).unwrap().is_loading());
  geometry.mark_failed(root);
  assert_eq!(geometry.node(root).unwrap().state(), LoadState::Unloaded);
  assert_eq!(geometry.node(root).unwrap().failed_attempts(), 1);
  geometry.mark_unavailable(root);
  assert_eq!(geometry.node(root).unwrap().state(), LoadState::Unavailable);
}
