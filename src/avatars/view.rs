//! Camera views sent to the avatar mixer for culling

use serde::{Deserialize, Serialize};

use crate::math::Vector3;

/// A camera frustum described by its near-plane corners
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraView {
    /// Camera position
    pub position: Vector3,
    /// Extra culling radius around the camera
    pub radius: f32,
    /// Distance of the far clip plane from the camera
    pub far_clip: f32,
    /// Near plane corners: top-left, top-right, bottom-right, bottom-left
    pub near_corners: [Vector3; 4],
}

impl CameraView {
    pub fn near_top_left(&self) -> Vector3 {
        self.near_corners[0]
    }

    pub fn near_top_right(&self) -> Vector3 {
        self.near_corners[1]
    }

    pub fn near_bottom_right(&self) -> Vector3 {
        self.near_corners[2]
    }

    pub fn near_bottom_left(&self) -> Vector3 {
        self.near_corners[3]
    }
}
