//! Geometry payload decoding.
//!
//! Potree 2.0 stores one interleaved record per point, attributes in schema
//! order. Positions are quantized `int32` triples; the world position is
//! `raw * scale + offset`. Decoded positions are stored as `f32` relative to
//! the node's box minimum so that georeferenced coordinates keep precision.

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};
use glam::{DVec3, Vec3};

use super::attributes::{AttributeType, PointAttributes};
use crate::error::DecodeError;
use crate::octree::DAabb3;

/// Everything needed to interpret a point record.
#[derive(Clone, Debug, PartialEq)]
pub struct PointLayout {
  pub attributes: PointAttributes,
  /// Quantization scale applied to raw integer positions.
  pub scale: DVec3,
  /// Offset added after scaling.
  pub offset: DVec3,
}

/// Per-node decode parameters.
#[derive(Clone, Copy, Debug)]
pub struct DecodeRequest<'a> {
  /// Point count announced by the hierarchy.
  pub num_points: u32,
  pub layout: &'a PointLayout,
  /// Local origin for the decoded positions (node box minimum).
  pub origin: DVec3,
}

/// Raw values of one non-positional attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeBuffer {
  pub kind: AttributeType,
  pub num_elements: usize,
  /// Tightly packed little-endian values, `num_points * size` bytes.
  pub data: Vec<u8>,
}

/// Decoded point data of one node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointBuffers {
  /// World-space origin the positions are relative to.
  pub origin: DVec3,
  pub positions: Vec<Vec3>,
  /// RGBA colors, when the schema carries `rgb`.
  pub colors: Option<Vec<[u8; 4]>>,
  /// Remaining attributes keyed by name.
  pub attributes: BTreeMap<String, AttributeBuffer>,
  /// Extent of the decoded positions; `None` for an empty node.
  pub tight_bounds: Option<DAabb3>,
}

impl PointBuffers {
  pub fn num_points(&self) -> usize {
    self.positions.len()
  }

  /// Position of point `index` in cloud space.
  pub fn world_position(&self, index: usize) -> Option<DVec3> {
    self.positions.get(index).map(|p| self.origin + p.as_dvec3())
  }

  /// Approximate heap footprint.
  pub fn byte_size(&self) -> usize {
    self.positions.len() * std::mem::size_of::<Vec3>()
      + self.colors.as_ref().map_or(0, |c| c.len() * 4)
      + self.attributes.values().map(|a| a.data.len()).sum::<usize>()
  }
}

/// Decode contract for geometry payloads.
///
/// Called on worker threads.
pub trait PointDecoder: Send + Sync {
  fn decode(&self, bytes: &[u8], request: &DecodeRequest<'_>) -> Result<PointBuffers, DecodeError>;
}

/// Decoder for uncompressed Potree 2.0 `octree.bin` records.
#[derive(Clone, Copy, Debug, Default)]
pub struct PotreeDecoder;

impl PointDecoder for PotreeDecoder {
  #[tracing::instrument(skip_all, fields(num_points = request.num_points, len = bytes.len()))]
  fn decode(&self, bytes: &[u8], request: &DecodeRequest<'_>) -> Result<PointBuffers, DecodeError> {
    let layout = request.layout;
    // Record slicing below relies on every size adding up.
    if let Some(attribute) = layout.attributes.iter().find(|a| !a.is_consistent()) {
      return Err(DecodeError::UnsupportedAttribute {
        name: attribute.name.clone(),
        kind: attribute.kind.name().to_string(),
      });
    }
    let record_size = layout.attributes.byte_size();
    let num_points = request.num_points as usize;
    let expected = num_points * record_size;

    if bytes.len() < expected {
      return Err(DecodeError::Truncated {
        expected,
        actual: bytes.len(),
      });
    }
    if record_size > 0 && bytes.len() > expected {
      return Err(DecodeError::PointCountMismatch {
        expected: request.num_points,
        actual: (bytes.len() / record_size) as u32,
      });
    }

    let (position_offset, position) = layout
      .attributes
      .find("position")
      .ok_or(DecodeError::MissingAttribute("position"))?;
    if position.kind != AttributeType::Int32 || position.num_elements != 3 {
      return Err(DecodeError::UnsupportedAttribute {
        name: position.name.clone(),
        kind: position.kind.name().to_string(),
      });
    }

    let color = match layout.attributes.find("rgb") {
      Some((offset, attribute)) => match (attribute.kind, attribute.num_elements) {
        (AttributeType::Uint16, 3) | (AttributeType::Uint8, 3) => Some((offset, attribute.kind)),
        _ => {
          return Err(DecodeError::UnsupportedAttribute {
            name: attribute.name.clone(),
            kind: attribute.kind.name().to_string(),
          })
        }
      },
      None => None,
    };

    let mut positions = Vec::with_capacity(num_points);
    let mut colors = color.map(|_| Vec::with_capacity(num_points));
    let mut min = DVec3::splat(f64::MAX);
    let mut max = DVec3::splat(f64::MIN);

    for record in bytes.chunks_exact(record_size.max(1)).take(num_points) {
      let p = &record[position_offset..position_offset + 12];
      let raw = DVec3::new(
        f64::from(LittleEndian::read_i32(&p[0..4])),
        f64::from(LittleEndian::read_i32(&p[4..8])),
        f64::from(LittleEndian::read_i32(&p[8..12])),
      );
      let world = raw * layout.scale + layout.offset;
      min = min.min(world);
      max = max.max(world);
      positions.push((world - request.origin).as_vec3());

      if let (Some((offset, kind)), Some(colors)) = (color, colors.as_mut()) {
        colors.push(read_color(&record[offset..], kind));
      }
    }

    let mut attributes = BTreeMap::new();
    let mut offset = 0;
    for attribute in layout.attributes.iter() {
      if attribute.name != "position" && attribute.name != "rgb" {
        let mut data = Vec::with_capacity(num_points * attribute.size);
        for record in bytes.chunks_exact(record_size).take(num_points) {
          data.extend_from_slice(&record[offset..offset + attribute.size]);
        }
        attributes.insert(
          attribute.name.clone(),
          AttributeBuffer {
            kind: attribute.kind,
            num_elements: attribute.num_elements,
            data,
          },
        );
      }
      offset += attribute.size;
    }

    let tight_bounds = (!positions.is_empty()).then(|| DAabb3::new(min, max));

    Ok(PointBuffers {
      origin: request.origin,
      positions,
      colors,
      attributes,
      tight_bounds,
    })
  }
}

fn read_color(bytes: &[u8], kind: AttributeType) -> [u8; 4] {
  match kind {
    AttributeType::Uint16 => {
      let mut rgb = [0u8; 3];
      for (i, channel) in rgb.iter_mut().enumerate() {
        let value = LittleEndian::read_u16(&bytes[i * 2..i * 2 + 2]);
        // Some converters write 8-bit values into 16-bit slots.
        *channel = if value > 255 { (value / 256) as u8 } else { value as u8 };
      }
      [rgb[0], rgb[1], rgb[2], 255]
    }
    _ => [bytes[0], bytes[1], bytes[2], 255],
  }
}

/// Encode positions (and optional colors) as `position_rgb` records.
///
/// Positions are quantized with `layout.scale` / `layout.offset`.
pub fn encode_points(layout: &PointLayout, points: &[DVec3], colors: Option<&[[u8; 3]]>) -> Vec<u8> {
  let mut out = Vec::with_capacity(points.len() * layout.attributes.byte_size());
  let mut buf = [0u8; 4];
  for (i, point) in points.iter().enumerate() {
    let raw = ((*point - layout.offset) / layout.scale).round();
    for value in [raw.x, raw.y, raw.z] {
      LittleEndian::write_i32(&mut buf, value as i32);
      out.extend_from_slice(&buf);
    }
    let rgb = colors.and_then(|c| c.get(i)).copied().unwrap_or([0, 0, 0]);
    for channel in rgb {
      let mut b = [0u8; 2];
      LittleEndian::write_u16(&mut b, u16::from(channel) * 256);
      out.extend_from_slice(&b);
    }
  }
  out
}
