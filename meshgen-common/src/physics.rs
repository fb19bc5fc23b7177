//! Runtime physics body representation
//!
//! Shapes are converted verbatim from the source physics asset. Each shape
//! carries a packed flags word:
//!
//! ```text
//! bits 0..8:  collision mode (raw enum value)
//! bits 8..16: contributes to mass (0 or 1)
//! ```

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Pack collision mode and mass contribution into one shape flags word
///
/// The collision value is not range checked.
#[inline]
pub fn pack_shape_flags(collision: u8, contribute_to_mass: bool) -> u32 {
    collision as u32 | ((contribute_to_mass as u32) << 8)
}

/// Inverse of [`pack_shape_flags`]
#[inline]
pub fn unpack_shape_flags(flags: u32) -> (u8, bool) {
    ((flags & 0xFF) as u8, (flags >> 8) & 0xFF != 0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SphereShape {
    pub name: String,
    pub center: Vec3,
    pub radius: f32,
    pub flags: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxShape {
    pub name: String,
    pub center: Vec3,
    pub rotation: Quat,
    pub size: Vec3,
    pub flags: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvexShape {
    pub name: String,
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub transform: Mat4,
    pub flags: u32,
}

/// Capsule aligned with its local Z axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SphylShape {
    pub name: String,
    pub center: Vec3,
    pub rotation: Quat,
    pub radius: f32,
    pub length: f32,
    pub flags: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaperedCapsuleShape {
    pub name: String,
    pub center: Vec3,
    pub rotation: Quat,
    pub radius0: f32,
    pub radius1: f32,
    pub length: f32,
    pub flags: u32,
}

/// All shapes attached to one bone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyShapes {
    pub bone: String,
    pub spheres: Vec<SphereShape>,
    pub boxes: Vec<BoxShape>,
    pub convexes: Vec<ConvexShape>,
    pub sphyls: Vec<SphylShape>,
    pub tapered_capsules: Vec<TaperedCapsuleShape>,
}

impl BodyShapes {
    pub fn shape_count(&self) -> usize {
        self.spheres.len()
            + self.boxes.len()
            + self.convexes.len()
            + self.sphyls.len()
            + self.tapered_capsules.len()
    }
}

/// A set of bone bodies, optionally tagged with an override id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicsBody {
    pub custom_id: Option<u32>,
    pub bodies: Vec<BodyShapes>,
}

impl PhysicsBody {
    pub fn find_body(&self, bone: &str) -> Option<&BodyShapes> {
        self.bodies.iter().find(|b| b.bone == bone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bit_positions() {
        assert_eq!(pack_shape_flags(3, false), 0x003);
        assert_eq!(pack_shape_flags(1, true), 0x101);
        assert_eq!(unpack_shape_flags(0x102), (2, true));
    }

    #[test]
    fn test_out_of_range_collision_is_not_validated() {
        // Values past the known modes still land in the low byte.
        assert_eq!(pack_shape_flags(200, true), 0x1C8);
    }
}
