//! Geometry value types used throughout the protocol and the simulation.
//!
//! All types are thin wrappers around (or aliases of) `glam` primitives so
//! the simulation side gets SIMD-friendly math for free, while the wire side
//! gets a fixed, documented binary layout (see [`crate::wire`]).

use std::ops::Mul;

use glam::{Quat, Vec3};

/// Scalar type of the whole protocol: IEEE-754 binary32.
pub type Scalar = f32;

/// A position in the simulation domain.
pub type Point = Vec3;

/// A direction or displacement.
pub type Vector = Vec3;

/// A ray used for dragger-based atom picking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Point,
    pub direction: Vector,
}

impl Ray {
    pub fn new(origin: Point, direction: Vector) -> Self {
        Self { origin, direction }
    }

    /// Point at parameter `t` along the ray.
    pub fn at(&self, t: Scalar) -> Point {
        self.origin + self.direction * t
    }
}

/// Rigid, orientation-preserving 6DOF transform: rotation followed by
/// translation. On the wire this is the translation vector followed by the
/// unit quaternion in `x y z w` component order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnTransform {
    pub translation: Vector,
    pub rotation: Quat,
}

impl OnTransform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(translation: Vector, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn from_translation(translation: Vector) -> Self {
        Self {
            translation,
            rotation: Quat::IDENTITY,
        }
    }

    /// The transform's origin, i.e. the image of the zero point.
    pub fn origin(&self) -> Point {
        self.translation
    }

    pub fn transform_point(&self, p: Point) -> Point {
        self.rotation * p + self.translation
    }

    /// Rigid inverse: `t.inverse() * t == IDENTITY` up to float error.
    pub fn inverse(&self) -> Self {
        let inv_rotation = self.rotation.inverse();
        Self {
            translation: -(inv_rotation * self.translation),
            rotation: inv_rotation,
        }
    }
}

impl Default for OnTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Composition: `(a * b).transform_point(p) == a.transform_point(b.transform_point(p))`.
impl Mul for OnTransform {
    type Output = OnTransform;

    fn mul(self, rhs: OnTransform) -> OnTransform {
        OnTransform {
            translation: self.rotation * rhs.translation + self.translation,
            rotation: self.rotation * rhs.rotation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn assert_vec3_approx(a: Vec3, b: Vec3) {
        assert_approx_eq!(a.x, b.x, 1e-5);
        assert_approx_eq!(a.y, b.y, 1e-5);
        assert_approx_eq!(a.z, b.z, 1e-5);
    }

    #[test]
    fn identity_leaves_points_alone() {
        let p = Vec3::new(1.0, -2.0, 3.0);
        assert_eq!(OnTransform::IDENTITY.transform_point(p), p);
    }

    #[test]
    fn inverse_undoes_transform() {
        let t = OnTransform::new(
            Vec3::new(0.5, -1.0, 2.0),
            Quat::from_rotation_y(1.1) * Quat::from_rotation_x(0.3),
        );
        let p = Vec3::new(-3.0, 0.25, 1.5);
        let roundtrip = t.inverse().transform_point(t.transform_point(p));
        assert_vec3_approx(roundtrip, p);
    }

    #[test]
    fn composition_matches_sequential_application() {
        let a = OnTransform::new(Vec3::new(1.0, 0.0, 0.0), Quat::from_rotation_z(0.7));
        let b = OnTransform::new(Vec3::new(0.0, 2.0, -1.0), Quat::from_rotation_x(-0.4));
        let p = Vec3::new(0.1, 0.2, 0.3);
        assert_vec3_approx(
            (a * b).transform_point(p),
            a.transform_point(b.transform_point(p)),
        );
    }

    #[test]
    fn drag_offset_reproduces_grab_pose() {
        // The server computes drag = dragger.inverse() * atom at grab time and
        // later applies dragger_now * drag; at the grab instant this must give
        // back the atom pose exactly.
        let dragger = OnTransform::new(Vec3::new(0.2, 0.4, -0.6), Quat::from_rotation_y(0.9));
        let atom = OnTransform::new(Vec3::new(-1.0, 0.5, 0.0), Quat::from_rotation_z(0.2));
        let drag = dragger.inverse() * atom;
        let reproduced = dragger * drag;
        assert_vec3_approx(reproduced.translation, atom.translation);
        assert_approx_eq!(reproduced.rotation.dot(atom.rotation).abs(), 1.0, 1e-5);
    }

    #[test]
    fn ray_at_walks_along_direction() {
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, 2.0));
        assert_eq!(ray.at(1.5), Vec3::new(0.0, 0.0, 3.0));
    }
}
