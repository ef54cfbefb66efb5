use bevy_math::Mat4;
use bevy_math::Vec3;
use bytemuck::Pod;
use bytemuck::Zeroable;

/// Per-draw shader constants, laid out to match the `b0` cbuffer:
///
/// ```hlsl
/// cbuffer ConstantBuffer : register(b0)
/// {
///     float4x4 worldMatrix;
///     float4x4 viewMatrix;
///     float4x4 projectionMatrix;
///     float4   cameraPosition;
/// };
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneConstants {
    pub world: [f32; 16],
    pub view: [f32; 16],
    pub projection: [f32; 16],
    pub camera_position: [f32; 4],
}

impl SceneConstants {
    /// Transposes each matrix before storing it, so a shader reading the
    /// record with its default packing sees the math-side matrix.
    pub fn new(world: Mat4, view: Mat4, projection: Mat4, camera_position: Vec3) -> Self {
        Self {
            world: world.transpose().to_cols_array(),
            view: view.transpose().to_cols_array(),
            projection: projection.transpose().to_cols_array(),
            camera_position: camera_position.extend(0.0).to_array(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl Default for SceneConstants {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_three_matrices_and_a_vector() {
        assert_eq!(std::mem::size_of::<SceneConstants>(), 3 * 64 + 16);
    }

    #[test]
    fn matrices_are_stored_transposed() {
        let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let constants = SceneConstants::new(world, Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO);
        // translation ends up in the last element of each of the first three rows
        assert_eq!(constants.world[3], 1.0);
        assert_eq!(constants.world[7], 2.0);
        assert_eq!(constants.world[11], 3.0);
    }

    #[test]
    fn camera_position_has_zero_w() {
        let constants = SceneConstants::new(
            Mat4::IDENTITY,
            Mat4::IDENTITY,
            Mat4::IDENTITY,
            Vec3::new(0.0, 0.0, 200.0),
        );
        assert_eq!(constants.camera_position, [0.0, 0.0, 200.0, 0.0]);
    }
}
