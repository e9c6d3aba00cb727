use glam::IVec3;

use galena_shared::block::BlockId;

/// Geometric extent of a draw operation. `estimate` bounds the cell count
/// before any work happens; `coords` yields candidate cells in a
/// deterministic order.
pub trait Shape: Send {
    fn estimate(&self) -> u64;
    fn coords(&self) -> Box<dyn Iterator<Item = IVec3> + Send + '_>;
}

/// Axis-aligned solid box between two corners, inclusive.
#[derive(Debug, Clone, Copy)]
pub struct Cuboid {
    min: IVec3,
    max: IVec3,
}

impl Cuboid {
    pub fn new(a: IVec3, b: IVec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    fn extent(&self) -> (u64, u64, u64) {
        (
            (self.max.x - self.min.x) as u64 + 1,
            (self.max.y - self.min.y) as u64 + 1,
            (self.max.z - self.min.z) as u64 + 1,
        )
    }
}

impl Shape for Cuboid {
    fn estimate(&self) -> u64 {
        let (dx, dy, dz) = self.extent();
        dx * dy * dz
    }

    fn coords(&self) -> Box<dyn Iterator<Item = IVec3> + Send + '_> {
        let (min, max) = (self.min, self.max);
        Box::new((min.y..=max.y).flat_map(move |y| {
            (min.z..=max.z)
                .flat_map(move |z| (min.x..=max.x).map(move |x| IVec3::new(x, y, z)))
        }))
    }
}

/// The one-cell-thick faces of a box; the interior is left untouched.
#[derive(Debug, Clone, Copy)]
pub struct HollowCuboid {
    outer: Cuboid,
}

impl HollowCuboid {
    pub fn new(a: IVec3, b: IVec3) -> Self {
        Self {
            outer: Cuboid::new(a, b),
        }
    }

    fn is_face(&self, pos: IVec3) -> bool {
        let (min, max) = (self.outer.min, self.outer.max);
        pos.x == min.x
            || pos.x == max.x
            || pos.y == min.y
            || pos.y == max.y
            || pos.z == min.z
            || pos.z == max.z
    }
}

impl Shape for HollowCuboid {
    fn estimate(&self) -> u64 {
        let (dx, dy, dz) = self.outer.extent();
        let outer = dx * dy * dz;
        let inner = dx.saturating_sub(2) * dy.saturating_sub(2) * dz.saturating_sub(2);
        outer - inner
    }

    fn coords(&self) -> Box<dyn Iterator<Item = IVec3> + Send + '_> {
        Box::new(self.outer.coords().filter(move |&pos| self.is_face(pos)))
    }
}

/// Solid ball around a center. Candidate cells come from the bounding
/// box; the radius test trims the corners.
#[derive(Debug, Clone, Copy)]
pub struct Sphere {
    center: IVec3,
    radius: u32,
}

impl Sphere {
    pub fn new(center: IVec3, radius: u32) -> Self {
        Self { center, radius }
    }

    fn contains(&self, pos: IVec3) -> bool {
        let d = pos - self.center;
        let r = self.radius as i64;
        let (dx, dy, dz) = (d.x as i64, d.y as i64, d.z as i64);
        dx * dx + dy * dy + dz * dz <= r * r
    }

    fn bounds(&self) -> Cuboid {
        let r = IVec3::splat(self.radius as i32);
        Cuboid::new(self.center - r, self.center + r)
    }
}

impl Shape for Sphere {
    fn estimate(&self) -> u64 {
        // Bounding-box estimate; deliberately pessimistic so the limit
        // check never under-counts.
        self.bounds().estimate()
    }

    fn coords(&self) -> Box<dyn Iterator<Item = IVec3> + Send + '_> {
        let sphere = *self;
        let Cuboid { min, max } = sphere.bounds();
        Box::new(
            (min.y..=max.y)
                .flat_map(move |y| {
                    (min.z..=max.z).flat_map(move |z| {
                        (min.x..=max.x).map(move |x| IVec3::new(x, y, z))
                    })
                })
                .filter(move |&pos| sphere.contains(pos)),
        )
    }
}

/// Decides, cell by cell, what a draw operation writes. `None` skips the
/// cell entirely. Runs under the grid lock, so the `current` value is the
/// live one.
pub trait Brush: Send {
    fn next_block(&mut self, pos: IVec3, current: BlockId) -> Option<BlockId>;
}

/// Fill every cell with one block.
pub struct SolidBrush {
    pub block: BlockId,
}

impl Brush for SolidBrush {
    fn next_block(&mut self, _pos: IVec3, _current: BlockId) -> Option<BlockId> {
        Some(self.block)
    }
}

/// Alternate two blocks on coordinate parity.
pub struct CheckeredBrush {
    pub even: BlockId,
    pub odd: BlockId,
}

impl Brush for CheckeredBrush {
    fn next_block(&mut self, pos: IVec3, _current: BlockId) -> Option<BlockId> {
        if (pos.x + pos.y + pos.z) % 2 == 0 {
            Some(self.even)
        } else {
            Some(self.odd)
        }
    }
}

/// Overwrite only cells currently holding `from`.
pub struct ReplaceBrush {
    pub from: BlockId,
    pub to: BlockId,
}

impl Brush for ReplaceBrush {
    fn next_block(&mut self, _pos: IVec3, current: BlockId) -> Option<BlockId> {
        (current == self.from).then_some(self.to)
    }
}

#[cfg(test)]
mod tests {
    use glam::IVec3;

    use galena_shared::block::BlockId;

    use super::{Brush, Cuboid, HollowCuboid, ReplaceBrush, Shape, Sphere};

    #[test]
    fn cuboid_normalizes_corners_and_counts_cells() {
        let shape = Cuboid::new(IVec3::new(9, 9, 9), IVec3::new(0, 0, 0));
        assert_eq!(shape.estimate(), 1000);
        assert_eq!(shape.coords().count(), 1000);
        assert_eq!(shape.coords().next(), Some(IVec3::new(0, 0, 0)));
    }

    #[test]
    fn hollow_cuboid_is_only_the_faces() {
        let shape = HollowCuboid::new(IVec3::new(0, 0, 0), IVec3::new(3, 3, 3));
        // 4^3 minus the 2^3 interior.
        assert_eq!(shape.estimate(), 56);
        assert_eq!(shape.coords().count(), 56);
        assert!(shape.coords().all(|pos| {
            pos.min_element() == 0 || pos.max_element() == 3
        }));
    }

    #[test]
    fn degenerate_hollow_cuboid_has_no_interior() {
        let shape = HollowCuboid::new(IVec3::new(0, 0, 0), IVec3::new(1, 5, 5));
        assert_eq!(shape.estimate(), shape.coords().count() as u64);
    }

    #[test]
    fn sphere_fits_inside_its_estimate() {
        let shape = Sphere::new(IVec3::new(10, 10, 10), 3);
        let actual = shape.coords().count() as u64;
        assert!(actual <= shape.estimate());
        assert!(shape.coords().all(|pos| {
            let d = pos - IVec3::new(10, 10, 10);
            d.length_squared() <= 9
        }));
        // The center and axis extremes are in.
        assert!(shape.coords().any(|pos| pos == IVec3::new(10, 10, 10)));
        assert!(shape.coords().any(|pos| pos == IVec3::new(13, 10, 10)));
    }

    #[test]
    fn replace_brush_skips_non_matching_cells() {
        let mut brush = ReplaceBrush {
            from: BlockId::STONE,
            to: BlockId::GLASS,
        };
        assert_eq!(
            brush.next_block(IVec3::ZERO, BlockId::STONE),
            Some(BlockId::GLASS)
        );
        assert_eq!(brush.next_block(IVec3::ZERO, BlockId::SOIL), None);
    }
}
