use glam::IVec3;
use serde::{Deserialize, Serialize};

/// Hard per-axis bound for level dimensions.
pub const MAX_AXIS: u32 = 16_384;

/// Dimensions of one level. Cells are addressed either by `IVec3`
/// coordinate or by linear index `x + z * width + y * width * length`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dims {
    pub width: u32,
    pub height: u32,
    pub length: u32,
}

impl Dims {
    pub fn new(width: u32, height: u32, length: u32) -> Result<Self, String> {
        for (axis, value) in [("width", width), ("height", height), ("length", length)] {
            if value == 0 || value > MAX_AXIS {
                return Err(format!(
                    "level {axis} {value} out of range 1..={MAX_AXIS}"
                ));
            }
        }
        Ok(Self {
            width,
            height,
            length,
        })
    }

    pub fn volume(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.length)
    }

    pub fn contains(&self, pos: IVec3) -> bool {
        pos.x >= 0
            && pos.y >= 0
            && pos.z >= 0
            && (pos.x as u32) < self.width
            && (pos.y as u32) < self.height
            && (pos.z as u32) < self.length
    }

    pub fn index_of(&self, pos: IVec3) -> Option<u32> {
        if !self.contains(pos) {
            return None;
        }
        let x = pos.x as u32;
        let y = pos.y as u32;
        let z = pos.z as u32;
        Some(x + z * self.width + y * self.width * self.length)
    }

    pub fn pos_of(&self, index: u32) -> IVec3 {
        debug_assert!(u64::from(index) < self.volume(), "cell index out of bounds");
        let layer = self.width * self.length;
        let y = index / layer;
        let rem = index % layer;
        let z = rem / self.width;
        let x = rem % self.width;
        IVec3::new(x as i32, y as i32, z as i32)
    }
}

/// The six face-adjacent neighbor offsets.
pub const NEIGHBOR_DIRECTIONS: [IVec3; 6] = [
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
];

/// The four horizontal neighbor offsets, used by liquid spread.
pub const HORIZONTAL_DIRECTIONS: [IVec3; 4] = [
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
];

pub const DOWN: IVec3 = IVec3::new(0, -1, 0);

#[cfg(test)]
mod tests {
    use glam::IVec3;

    use super::{Dims, MAX_AXIS};

    #[test]
    fn index_round_trips_back_to_coordinates() {
        let dims = Dims::new(7, 5, 11).expect("valid dims");
        for y in 0..5 {
            for z in 0..11 {
                for x in 0..7 {
                    let pos = IVec3::new(x, y, z);
                    let index = dims.index_of(pos).expect("in bounds");
                    assert_eq!(dims.pos_of(index), pos);
                }
            }
        }
    }

    #[test]
    fn out_of_bounds_positions_have_no_index() {
        let dims = Dims::new(8, 8, 8).expect("valid dims");
        assert_eq!(dims.index_of(IVec3::new(-1, 0, 0)), None);
        assert_eq!(dims.index_of(IVec3::new(0, 8, 0)), None);
        assert_eq!(dims.index_of(IVec3::new(0, 0, 100)), None);
    }

    #[test]
    fn dims_validation_rejects_degenerate_axes() {
        assert!(Dims::new(0, 4, 4).is_err());
        assert!(Dims::new(4, MAX_AXIS + 1, 4).is_err());
        assert!(Dims::new(MAX_AXIS, 1, 1).is_ok());
    }
}
