use serde::{Deserialize, Serialize};

// Basic double-precision 3D vector for particle positions.
#[derive(Copy, Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
pub struct DVec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl DVec3 {
    #[inline(always)]
    pub fn new(x: f64, y: f64, z: f64) -> Self { Self { x, y, z } }
    #[inline(always)]
    pub fn zero() -> Self { Self::new(0.0, 0.0, 0.0) }
    #[inline(always)]
    pub fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
    #[inline(always)]
    pub fn length_squared(self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }
    #[inline(always)]
    pub fn distance_squared(self, other: Self) -> f64 {
        self.sub(other).length_squared()
    }
}
