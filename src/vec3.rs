// Minimal generic 3-component vector. Kept in-crate since the scalar
// type `S` is generic; no single vector math crate serves both f32 and
// f64 users here.

use num_traits::{Float, NumCast};
use std::ops::{Add, Div, Mul, Sub};

// Numeric bound for octree coordinates. Implemented for f32 and f64.
pub trait Scalar:
    Float
    + NumCast
    + Copy
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + std::fmt::Debug
{
    fn from_i32(v: i32) -> Self {
        NumCast::from(v).expect("i32 fits in Scalar")
    }

    fn from_f64(v: f64) -> Self {
        NumCast::from(v).expect("f64 fits in Scalar")
    }
}

impl Scalar for f32 {}
impl Scalar for f64 {}

/// Componentwise 3D vector over a generic [`Scalar`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3<S> {
    pub x: S,
    pub y: S,
    pub z: S,
}

impl<S: Scalar> Vec3<S> {
    pub fn new(x: S, y: S, z: S) -> Self {
        Self { x, y, z }
    }

    pub fn splat(v: S) -> Self {
        Self::new(v, v, v)
    }

    pub fn zero() -> Self {
        Self::splat(S::from_i32(0))
    }

    pub fn abs(self) -> Self {
        Self::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    pub fn componentwise_min(self, other: Self) -> Self {
        Self::new(
            self.x.min(other.x),
            self.y.min(other.y),
            self.z.min(other.z),
        )
    }

    pub fn componentwise_max(self, other: Self) -> Self {
        Self::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.z.max(other.z),
        )
    }

    /// Largest absolute componentwise difference between `self` and `other`.
    pub fn max_abs_diff(self, other: Self) -> S {
        let d = (self - other).abs();
        d.x.max(d.y).max(d.z)
    }
}

impl<S: Scalar> Add for Vec3<S> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl<S: Scalar> Sub for Vec3<S> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl<S: Scalar> Mul<S> for Vec3<S> {
    type Output = Self;
    fn mul(self, rhs: S) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl<S: Scalar> Div<S> for Vec3<S> {
    type Output = Self;
    fn div(self, rhs: S) -> Self {
        Self::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sub_roundtrip() {
        let a = Vec3::new(1.0f64, 2.0, 3.0);
        let b = Vec3::new(0.5f64, 0.5, 0.5);
        assert_eq!((a + b) - b, a);
    }

    #[test]
    fn componentwise_min_max() {
        let a = Vec3::new(1.0f32, 5.0, -3.0);
        let b = Vec3::new(2.0f32, 1.0, -1.0);
        assert_eq!(a.componentwise_min(b), Vec3::new(1.0, 1.0, -3.0));
        assert_eq!(a.componentwise_max(b), Vec3::new(2.0, 5.0, -1.0));
    }

    #[test]
    fn abs_and_max_abs_diff() {
        let center = Vec3::new(0.0f64, 0.0, 0.0);
        let corner = Vec3::new(3.0f64, -4.0, 1.0);
        assert_eq!(center.max_abs_diff(corner), 4.0);
    }
}
