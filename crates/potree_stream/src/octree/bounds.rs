//! Axis-aligned bounding box with double precision for georeferenced clouds.

use glam::{DAffine3, DVec3};

/// Double-precision axis-aligned bounding box.
///
/// Octree node volumes, tight point extents and picking all use this type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DAabb3 {
	/// Minimum corner (inclusive).
	pub min: DVec3,
	/// Maximum corner (inclusive).
	pub max: DVec3,
}

impl DAabb3 {
	/// Create a new AABB from min and max corners.
	///
	/// # Panics
	/// Debug-asserts that min <= max on all axes.
	pub fn new(min: DVec3, max: DVec3) -> Self {
		debug_assert!(
			min.x <= max.x && min.y <= max.y && min.z <= max.z,
			"AABB min must be <= max on all axes"
		);
		Self { min, max }
	}

	/// Create a new AABB from center and half-extents.
	pub fn from_center_half_extents(center: DVec3, half_extents: DVec3) -> Self {
		Self {
			min: center - half_extents,
			max: center + half_extents,
		}
	}

	/// Smallest box enclosing all `points`, or `None` for an empty iterator.
	pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Option<Self> {
		let mut iter = points.into_iter();
		let first = iter.next()?;
		let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
		Some(Self { min, max })
	}

	/// Check if this AABB overlaps with another.
	///
	/// Two AABBs overlap if they share any interior or boundary points.
	#[inline]
	pub fn overlaps(&self, other: &DAabb3) -> bool {
		self.min.x <= other.max.x
			&& self.max.x >= other.min.x
			&& self.min.y <= other.max.y
			&& self.max.y >= other.min.y
			&& self.min.z <= other.max.z
			&& self.max.z >= other.min.z
	}

	/// Check if this AABB contains a point.
	#[inline]
	pub fn contains_point(&self, point: DVec3) -> bool {
		point.x >= self.min.x
			&& point.x <= self.max.x
			&& point.y >= self.min.y
			&& point.y <= self.max.y
			&& point.z >= self.min.z
			&& point.z <= self.max.z
	}

	/// Check if `other` lies entirely inside this AABB.
	#[inline]
	pub fn contains(&self, other: &DAabb3) -> bool {
		self.contains_point(other.min) && self.contains_point(other.max)
	}

	/// Overlapping region of two boxes, `None` when disjoint.
	pub fn intersection(&self, other: &DAabb3) -> Option<Self> {
		if !self.overlaps(other) {
			return None;
		}
		Some(Self {
			min: self.min.max(other.min),
			max: self.max.min(other.max),
		})
	}

	/// Get the size of the AABB (max - min).
	#[inline]
	pub fn size(&self) -> DVec3 {
		self.max - self.min
	}

	/// Get the center of the AABB.
	#[inline]
	pub fn center(&self) -> DVec3 {
		(self.min + self.max) * 0.5
	}

	/// Radius of the bounding sphere around the box.
	#[inline]
	pub fn radius(&self) -> f64 {
		self.size().length() * 0.5
	}

	/// Octant sub-box.
	///
	/// Octant bits follow the Potree layout: bit 2 selects the upper X half,
	/// bit 1 the upper Y half, bit 0 the upper Z half.
	pub fn child(&self, octant: u8) -> Self {
		let mut min = self.min;
		let mut max = self.max;
		let half = self.size() * 0.5;

		if octant & 0b001 != 0 {
			min.z += half.z;
		} else {
			max.z -= half.z;
		}
		if octant & 0b010 != 0 {
			min.y += half.y;
		} else {
			max.y -= half.y;
		}
		if octant & 0b100 != 0 {
			min.x += half.x;
		} else {
			max.x -= half.x;
		}

		Self { min, max }
	}

	/// World-space AABB enclosing this box after an affine transform.
	pub fn transformed(&self, transform: &DAffine3) -> Self {
		let corners = (0..8u8).map(|i| {
			DVec3::new(
				if i & 0b100 != 0 { self.max.x } else { self.min.x },
				if i & 0b010 != 0 { self.max.y } else { self.min.y },
				if i & 0b001 != 0 { self.max.z } else { self.min.z },
			)
		});
		// Eight corners: never empty.
		Self::from_points(corners.map(|c| transform.transform_point3(c))).unwrap_or(*self)
	}
}
