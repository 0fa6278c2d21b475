//! `metadata.json` - the bootstrap description of one point cloud.

use glam::DVec3;
use serde::Deserialize;

use super::attributes::{PointAttribute, PointAttributes};
use crate::error::MetadataError;
use crate::octree::DAabb3;

/// Geometry payload encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Encoding {
  /// Uncompressed interleaved point records.
  #[default]
  Default,
  /// Brotli-compressed records (codec not bundled).
  Brotli,
}

/// Hierarchy bootstrap information.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyInfo {
  /// Byte size of the root hierarchy chunk (at offset 0).
  pub first_chunk_size: u64,
  /// Levels covered per hierarchy chunk.
  #[serde(default)]
  pub step_size: u32,
  /// Depth of the whole octree.
  #[serde(default)]
  pub depth: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
struct BoundingBoxJson {
  min: [f64; 3],
  max: [f64; 3],
}

/// Parsed `metadata.json`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
  #[serde(default)]
  pub version: String,
  #[serde(default)]
  pub name: String,
  /// Total number of points in the cloud.
  #[serde(default)]
  pub points: u64,
  pub hierarchy: HierarchyInfo,
  pub offset: [f64; 3],
  pub scale: [f64; 3],
  /// Point spacing at the root level.
  pub spacing: f64,
  bounding_box: BoundingBoxJson,
  #[serde(default)]
  pub encoding: Encoding,
  pub attributes: Vec<PointAttribute>,
}

impl Metadata {
  /// Parse and validate metadata JSON.
  pub fn from_json(bytes: &[u8]) -> Result<Self, MetadataError> {
    let metadata: Self = serde_json::from_slice(bytes)?;
    metadata.validate()?;
    Ok(metadata)
  }

  fn validate(&self) -> Result<(), MetadataError> {
    let min = DVec3::from_array(self.bounding_box.min);
    let max = DVec3::from_array(self.bounding_box.max);
    if !min.cmple(max).all() {
      return Err(MetadataError::Invalid(format!(
        "bounding box min {min} exceeds max {max}"
      )));
    }
    if !(self.spacing > 0.0) {
      return Err(MetadataError::Invalid(format!("spacing must be positive, got {}", self.spacing)));
    }
    if self.hierarchy.first_chunk_size == 0 {
      return Err(MetadataError::Invalid("first hierarchy chunk is empty".into()));
    }
    if self.encoding != Encoding::Default {
      return Err(MetadataError::Invalid(format!(
        "encoding {:?} is not supported",
        self.encoding
      )));
    }
    if !self.attributes.iter().any(|a| a.name == "position") {
      return Err(MetadataError::Invalid("no position attribute".into()));
    }
    if let Some(attribute) = self.attributes.iter().find(|a| !a.is_consistent()) {
      return Err(MetadataError::Invalid(format!(
        "attribute `{}` declares size {} for {} x {} ({})",
        attribute.name,
        attribute.size,
        attribute.num_elements,
        attribute.element_size,
        attribute.kind.name()
      )));
    }
    Ok(())
  }

  /// Coarse octree root cube.
  pub fn bounding_box(&self) -> DAabb3 {
    DAabb3::new(
      DVec3::from_array(self.bounding_box.min),
      DVec3::from_array(self.bounding_box.max),
    )
  }

  pub fn point_attributes(&self) -> PointAttributes {
    PointAttributes::new(self.attributes.clone())
  }

  pub fn scale(&self) -> DVec3 {
    DVec3::from_array(self.scale)
  }

  pub fn offset(&self) -> DVec3 {
    DVec3::from_array(self.offset)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"{
    "version": "2.0",
    "name": "sample",
    "description": "",
    "points": 1234,
    "projection": "",
    "hierarchy": { "firstChunkSize": 220, "stepSize": 4, "depth": 3 },
    "offset": [10.0, 20.0, 30.0],
    "scale": [0.001, 0.001, 0.001],
    "spacing": 1.5,
    "boundingBox": { "min": [10.0, 20.0, 30.0], "max": [74.0, 84.0, 94.0] },
    "encoding": "DEFAULT",
    "attributes": [
      { "name": "position", "description": "", "size": 12, "numElements": 3,
        "elementSize": 4, "type": "int32", "min": [11.0, 21.0, 31.0], "max": [70.0, 80.0, 90.0] },
      { "name": "rgb", "description": "", "size": 6, "numElements": 3,
        "elementSize": 2, "type": "uint16", "min": [0, 0, 0], "max": [65535, 65535, 65535] }
    ]
  }"#;

  #[test]
  fn test_parse_sample() {
    let metadata = Metadata::from_json(SAMPLE.as_bytes()).unwrap();
    assert_eq!(metadata.points, 1234);
    assert_eq!(metadata.hierarchy.first_chunk_size, 220);
    assert_eq!(metadata.bounding_box().size(), DVec3::splat(64.0));
    assert_eq!(metadata.point_attributes().byte_size(), 18);
    assert!(metadata.point_attributes().position_bounds().is_some());
  }

  #[test]
  fn test_rejects_compressed_encoding() {
    let json = SAMPLE.replace("\"DEFAULT\"", "\"BROTLI\"");
    assert!(matches!(
      Metadata::from_json(json.as_bytes()),
      Err(MetadataError::Invalid(_))
    ));
  }

  #[test]
  fn test_rejects_inverted_bounds() {
    let json = SAMPLE.replace("\"min\": [10.0, 20.0, 30.0]", "\"min\": [100.0, 20.0, 30.0]");
    assert!(matches!(
      Metadata::from_json(json.as_bytes()),
      Err(MetadataError::Invalid(_))
    ));
  }

  #[test]
  fn test_rejects_attribute_size_mismatch() {
    let json = SAMPLE.replace("\"size\": 12", "\"size\": 4");
    match Metadata::from_json(json.as_bytes()) {
      Err(MetadataError::Invalid(message)) => assert!(message.contains("position"), "{message}"),
      other => panic!("expected invalid metadata, got {other:?}"),
    }
  }

  #[test]
  fn test_rejects_element_size_of_wrong_type() {
    let json = SAMPLE.replace("\"elementSize\": 2, \"type\": \"uint16\"", "\"elementSize\": 2, \"type\": \"uint8\"");
    assert!(matches!(
      Metadata::from_json(json.as_bytes()),
      Err(MetadataError::Invalid(_))
    ));
  }

  #[test]
  fn test_rejects_garbage() {
    assert!(matches!(
      Metadata::from_json(b"not json"),
      Err(MetadataError::Json(_))
    ));
  }
}
