pub use std::f32::consts::PI;
pub use ultraviolet as uv;

pub type Vec2 = uv::Vec2;
pub type Vec3 = uv::Vec3;
pub type Vec4 = uv::Vec4;
pub type UVec2 = uv::UVec2;
pub type UVec3 = uv::UVec3;
pub type Rotor3 = uv::Rotor3;
pub type Isometry3 = uv::Isometry3;
pub type Similarity3 = uv::Similarity3;

/// Guard for divisions by a target pdf that may be zero.
pub const PDF_EPSILON: f32 = 1e-8;
/// Guard for divisions by a resampling weight sum that may be zero.
pub const WEIGHT_EPSILON: f32 = 1e-8;

// assumes Rec709 primaries
pub trait Luminance {
    fn luminance(&self) -> f32;
}

impl Luminance for Vec3 {
    #[allow(clippy::excessive_precision)]
    fn luminance(&self) -> f32 {
        self.dot(Vec3::new(0.2126729, 0.7151522, 0.0721750))
    }
}

pub trait DivRoundUp {
    fn div_round_up(&self, divisor: u32) -> Self;
}

impl DivRoundUp for UVec2 {
    fn div_round_up(&self, divisor: u32) -> Self {
        (*self + Self::broadcast(divisor - 1)) / divisor
    }
}

/// Frisvad-style basis around a unit normal, stable for n.z near -1.
pub fn orthonormal_basis(n: Vec3) -> (Vec3, Vec3) {
    let sign = if n.z >= 0.0 { 1.0 } else { -1.0 };
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    let tangent = Vec3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x);
    let bitangent = Vec3::new(b, sign + n.y * n.y * a, -n.y);
    (tangent, bitangent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luminance_weights_sum_to_one() {
        let y = Vec3::one().luminance();
        assert!((y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn basis_is_orthonormal() {
        for n in [
            Vec3::unit_z(),
            -Vec3::unit_z(),
            Vec3::new(0.6, -0.48, 0.64),
            Vec3::new(-0.267, 0.802, -0.535),
        ]
        .iter()
        .copied()
        {
            let n = n.normalized();
            let (t, b) = orthonormal_basis(n);
            assert!(t.dot(b).abs() < 1e-5);
            assert!(t.dot(n).abs() < 1e-5);
            assert!(b.dot(n).abs() < 1e-5);
            assert!((t.mag() - 1.0).abs() < 1e-5);
            assert!((b.mag() - 1.0).abs() < 1e-5);
        }
    }
}
