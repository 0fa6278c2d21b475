//! Octree geometry model.
//!
//! A point cloud is an 8-ary spatial tree. Every node covers an axis-aligned
//! cube; its children split that cube by octant. Nodes hold a subsample of
//! the cloud whose density doubles per level, so the visible set at any time
//! is a cut through the tree.
//!
//! # Octant convention
//!
//! ```text
//! octant bits:  x y z
//!               4 2 1      (set bit = upper half on that axis)
//! ```
//!
//! # Module Structure
//!
//! - [`bounds`]: `DAabb3` - double precision boxes and child-box math
//! - [`node`]: `NodeName`, `NodeId`, `OctreeNode` arena records
//! - [`hierarchy`]: hierarchy chunk contract and the Potree 2.0 parser
//! - [`geometry`]: `OctreeGeometry` - the per-cloud node arena

pub mod bounds;
pub mod geometry;
pub mod hierarchy;
pub mod node;

// Re-exports
pub use bounds::DAabb3;
pub use geometry::{GeometryDesc, OctreeGeometry};
pub use hierarchy::{
  encode_chunk, parse_chunk, HierarchyDecoder, HierarchyEntry, PotreeHierarchyDecoder, BYTES_PER_NODE,
};
pub use node::{LoadState, NodeId, NodeKind, NodeName, OctreeNode};
