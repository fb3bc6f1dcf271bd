//! Spatial value types shared by avatars and audio

use serde::{Deserialize, Serialize};

/// 3D vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Product of the components, i.e. the volume of a box with these dimensions
    pub fn volume(&self) -> f32 {
        self.x * self.y * self.z
    }
}

/// Rotation quaternion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Position and orientation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vantage {
    pub position: Vector3,
    pub rotation: Quaternion,
}

impl Vantage {
    pub const fn new(position: Vector3, rotation: Quaternion) -> Self {
        Self { position, rotation }
    }
}

/// Translation, rotation and uniform scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vector3,
    pub rotation: Quaternion,
    pub scale: f32,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vector3::ZERO,
        rotation: Quaternion::IDENTITY,
        scale: 1.0,
    };

    pub fn vantage(&self) -> Vantage {
        Vantage::new(self.translation, self.rotation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Axis-aligned box given by its dimensions and the offset of its center
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub dimensions: Vector3,
    pub offset: Vector3,
}

impl Bounds {
    pub const fn new(dimensions: Vector3, offset: Vector3) -> Self {
        Self { dimensions, offset }
    }

    /// Whether the box encloses any volume
    pub fn has_volume(&self) -> bool {
        self.dimensions.volume() != 0.0
    }
}
