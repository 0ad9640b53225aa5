//! 3MF placement transforms
//!
//! 3MF writes an affine transform as twelve numbers `m00 m01 m02 m10 m11 m12
//! m20 m21 m22 m30 m31 m32`, applied to row vectors (`p' = p * M`). The
//! matrices here are column-vector `Matrix4`s, so the layout is transposed.
use nalgebra::{Matrix4, Vector3};

/// Transform builder for component and build-item placement
pub struct Transform;

impl Transform {
    /// Parse a 3MF `transform` attribute.
    ///
    /// Returns `None` unless the value holds exactly twelve finite numbers.
    pub fn parse_3mf(value: &str) -> Option<Matrix4<f32>> {
        let mut m = [0.0f32; 12];
        let mut fields = value.split_whitespace();
        for slot in &mut m {
            let parsed: f32 = fields.next()?.parse().ok()?;
            if !parsed.is_finite() {
                return None;
            }
            *slot = parsed;
        }
        if fields.next().is_some() {
            return None;
        }

        Some(Matrix4::new(
            m[0], m[3], m[6], m[9], //
            m[1], m[4], m[7], m[10], //
            m[2], m[5], m[8], m[11], //
            0.0, 0.0, 0.0, 1.0,
        ))
    }

    /// Create a translation matrix
    pub fn translation_matrix(x: f32, y: f32, z: f32) -> Matrix4<f32> {
        Matrix4::new_translation(&Vector3::new(x, y, z))
    }

    /// Place a child transform inside its parent's frame.
    pub fn compose(parent: Option<&Matrix4<f32>>, child: Option<&Matrix4<f32>>) -> Option<Matrix4<f32>> {
        match (parent, child) {
            (Some(p), Some(c)) => Some(p * c),
            (Some(p), None) => Some(*p),
            (None, Some(c)) => Some(*c),
            (None, None) => None,
        }
    }
}
