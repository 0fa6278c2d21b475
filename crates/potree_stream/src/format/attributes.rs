//! Point attribute schema.

use glam::DVec3;
use serde::Deserialize;

use crate::octree::DAabb3;

/// Element type of a point attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
  Int8,
  Int16,
  Int32,
  Int64,
  Uint8,
  Uint16,
  Uint32,
  Uint64,
  Float,
  Double,
  #[serde(other)]
  Undefined,
}

impl AttributeType {
  /// Size of one element in bytes, `None` when unknown.
  pub fn element_size(self) -> Option<usize> {
    match self {
      Self::Int8 | Self::Uint8 => Some(1),
      Self::Int16 | Self::Uint16 => Some(2),
      Self::Int32 | Self::Uint32 | Self::Float => Some(4),
      Self::Int64 | Self::Uint64 | Self::Double => Some(8),
      Self::Undefined => None,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Self::Int8 => "int8",
      Self::Int16 => "int16",
      Self::Int32 => "int32",
      Self::Int64 => "int64",
      Self::Uint8 => "uint8",
      Self::Uint16 => "uint16",
      Self::Uint32 => "uint32",
      Self::Uint64 => "uint64",
      Self::Float => "float",
      Self::Double => "double",
      Self::Undefined => "undefined",
    }
  }
}

/// One attribute of the per-point record.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointAttribute {
  pub name: String,
  #[serde(default)]
  pub description: String,
  /// Total bytes per point for this attribute.
  pub size: usize,
  pub num_elements: usize,
  pub element_size: usize,
  #[serde(rename = "type")]
  pub kind: AttributeType,
  /// Per-element minimum over the whole cloud, when known.
  #[serde(default)]
  pub min: Vec<f64>,
  /// Per-element maximum over the whole cloud, when known.
  #[serde(default)]
  pub max: Vec<f64>,
}

impl PointAttribute {
  pub fn new(name: &str, kind: AttributeType, num_elements: usize) -> Self {
    let element_size = kind.element_size().unwrap_or(1);
    Self {
      name: name.to_string(),
      description: String::new(),
      size: element_size * num_elements,
      num_elements,
      element_size,
      kind,
      min: Vec::new(),
      max: Vec::new(),
    }
  }

  /// `size` equals `num_elements * element_size`, and `element_size` matches
  /// the declared type when the type is known.
  pub fn is_consistent(&self) -> bool {
    let type_matches = self.kind.element_size().map_or(true, |size| size == self.element_size);
    type_matches && self.num_elements.checked_mul(self.element_size) == Some(self.size)
  }

  /// Attach a known value range.
  pub fn with_range(mut self, min: Vec<f64>, max: Vec<f64>) -> Self {
    self.min = min;
    self.max = max;
    self
  }
}

/// Ordered attribute schema; attributes are interleaved per point in this
/// order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointAttributes {
  list: Vec<PointAttribute>,
}

impl PointAttributes {
  pub fn new(list: Vec<PointAttribute>) -> Self {
    Self { list }
  }

  /// `position` (int32 x3) and `rgb` (uint16 x3), the minimal Potree schema.
  pub fn position_rgb() -> Self {
    Self::new(vec![
      PointAttribute::new("position", AttributeType::Int32, 3),
      PointAttribute::new("rgb", AttributeType::Uint16, 3),
    ])
  }

  /// Bytes per point record.
  pub fn byte_size(&self) -> usize {
    self.list.iter().map(|a| a.size).sum()
  }

  pub fn iter(&self) -> impl Iterator<Item = &PointAttribute> {
    self.list.iter()
  }

  pub fn len(&self) -> usize {
    self.list.len()
  }

  pub fn is_empty(&self) -> bool {
    self.list.is_empty()
  }

  /// Attribute by name with its byte offset inside the point record.
  pub fn find(&self, name: &str) -> Option<(usize, &PointAttribute)> {
    let mut offset = 0;
    for attribute in &self.list {
      if attribute.name == name {
        return Some((offset, attribute));
      }
      offset += attribute.size;
    }
    None
  }

  /// Cloud-wide position extent, only when the schema carries min/max for
  /// the `position` attribute.
  pub fn position_bounds(&self) -> Option<DAabb3> {
    let (_, position) = self.find("position")?;
    if position.min.len() < 3 || position.max.len() < 3 {
      return None;
    }
    let min = DVec3::new(position.min[0], position.min[1], position.min[2]);
    let max = DVec3::new(position.max[0], position.max[1], position.max[2]);
    if min.cmple(max).all() {
      Some(DAabb3::new(min, max))
    } else {
      None
    }
  }
}
