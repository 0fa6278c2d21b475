//! Decode contract for point cloud payloads.
//!
//! The engine treats the on-disk formats as opaque: it only needs
//! [`HierarchyDecoder`](crate::octree::HierarchyDecoder) to yield child
//! identities and point counts, and [`PointDecoder`] to turn a node's geometry
//! bytes into [`PointBuffers`]. This module ships the Potree 2.0 flavour of
//! both, plus the `metadata.json` schema needed to bootstrap an octree.

pub mod attributes;
pub mod decoder;
pub mod metadata;

pub use attributes::{AttributeType, PointAttribute, PointAttributes};
pub use decoder::{
  encode_points, AttributeBuffer, DecodeRequest, PointBuffers, PointDecoder, PointLayout, PotreeDecoder,
};
pub use metadata::{Encoding, HierarchyInfo, Metadata};
