use crate::maths::*;
use crate::scene::DeltaLight;
use crate::texture::{EnvironmentMap, TextureIndex};
use bytemuck::{Contiguous, Pod, Zeroable};
use half::f16;

/// Kind tag for the packed form. Area lights carry no tag: their third
/// vertex occupies the tag slot, and the sentinel is a bit pattern no valid
/// float (or packed f16 UV pair) can produce.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Contiguous, PartialEq, Eq)]
pub enum LightKind {
    Point,
    Spot,
    Directional,
    Environment,
}

// quiet NaN with the kind in the low payload bits
const KIND_SENTINEL_BITS: u32 = 0x7fc0_0000;
const KIND_SENTINEL_MASK: u32 = !0xff;

fn kind_sentinel(kind: LightKind) -> f32 {
    f32::from_bits(KIND_SENTINEL_BITS | kind.into_integer())
}

fn kind_from_sentinel(value: f32) -> Option<LightKind> {
    let bits = value.to_bits();
    if bits & KIND_SENTINEL_MASK == KIND_SENTINEL_BITS {
        LightKind::from_integer(bits & 0xff)
    } else {
        None
    }
}

fn pack_uv_pair(uv: Vec2) -> f32 {
    let u = f16::from_f32(uv.x).to_bits() as u32;
    let v = f16::from_f32(uv.y).to_bits() as u32;
    f32::from_bits((v << 16) | u)
}

fn unpack_uv_pair(value: f32) -> Vec2 {
    let bits = value.to_bits();
    Vec2::new(
        f16::from_bits(bits as u16).to_f32(),
        f16::from_bits((bits >> 16) as u16).to_f32(),
    )
}

fn texture_tag(texture: Option<TextureIndex>) -> f32 {
    texture.map_or(0.0, |t| (t.0 as u32 + 1) as f32)
}

fn texture_from_tag(tag: f32) -> Option<TextureIndex> {
    let value = tag as u32;
    if value == 0 {
        None
    } else {
        Some(TextureIndex((value - 1) as u16))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaLight {
    pub positions: [Vec3; 3],
    pub uvs: [Vec2; 3],
    pub emissivity: Vec3,
    pub texture: Option<TextureIndex>,
}

impl AreaLight {
    pub fn normal(&self) -> Vec3 {
        let e0 = self.positions[1] - self.positions[0];
        let e1 = self.positions[2] - self.positions[0];
        e0.cross(e1).normalized()
    }

    pub fn area(&self) -> f32 {
        let e0 = self.positions[1] - self.positions[0];
        let e1 = self.positions[2] - self.positions[0];
        0.5 * e0.cross(e1).mag()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub intensity: Vec3,
    pub range: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotLight {
    pub position: Vec3,
    pub direction: Vec3,
    pub intensity: Vec3,
    pub range: f32,
    pub angle_cutoff_scale: f32,
    pub angle_cutoff_offset: f32,
}

impl SpotLight {
    /// Folds the cone angles into a scale/offset pair so that the
    /// per-shading-point falloff is one fused multiply-add.
    pub fn new(
        position: Vec3,
        direction: Vec3,
        intensity: Vec3,
        range: f32,
        inner_angle: f32,
        outer_angle: f32,
    ) -> Self {
        let cos_inner = inner_angle.cos();
        let cos_outer = outer_angle.cos();
        let angle_cutoff_scale = 1.0 / (cos_inner - cos_outer).max(1e-4);
        let angle_cutoff_offset = -cos_outer * angle_cutoff_scale;
        Self {
            position,
            direction: direction.normalized(),
            intensity,
            range,
            angle_cutoff_scale,
            angle_cutoff_offset,
        }
    }

    pub fn cone_falloff(&self, cos_angle: f32) -> f32 {
        cos_angle
            .mul_add(self.angle_cutoff_scale, self.angle_cutoff_offset)
            .clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub irradiance: Vec3,
    pub range: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentLight {
    pub mip_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightRecord {
    Area(AreaLight),
    Point(PointLight),
    Spot(SpotLight),
    Directional(DirectionalLight),
    Environment(EnvironmentLight),
}

impl LightRecord {
    pub fn from_delta(light: &DeltaLight) -> Self {
        match *light {
            DeltaLight::Point {
                position,
                intensity,
                range,
            } => LightRecord::Point(PointLight {
                position,
                intensity,
                range,
            }),
            DeltaLight::Spot {
                position,
                direction,
                intensity,
                range,
                inner_angle,
                outer_angle,
            } => LightRecord::Spot(SpotLight::new(
                position,
                direction,
                intensity,
                range,
                inner_angle,
                outer_angle,
            )),
            DeltaLight::Directional {
                direction,
                irradiance,
                range,
            } => LightRecord::Directional(DirectionalLight {
                direction: direction.normalized(),
                irradiance,
                range,
            }),
        }
    }

    pub fn from_environment(environment: &EnvironmentMap) -> Self {
        LightRecord::Environment(EnvironmentLight {
            mip_count: environment.mip_count(),
        })
    }

    /// `None` means Area: the packed form resolves kind by sentinel absence.
    pub fn kind(&self) -> Option<LightKind> {
        match self {
            LightRecord::Area(_) => None,
            LightRecord::Point(_) => Some(LightKind::Point),
            LightRecord::Spot(_) => Some(LightKind::Spot),
            LightRecord::Directional(_) => Some(LightKind::Directional),
            LightRecord::Environment(_) => Some(LightKind::Environment),
        }
    }

    pub fn pack(&self) -> PackedLightRecord {
        match *self {
            LightRecord::Area(ref light) => PackedLightRecord {
                radiance: Vec4::new(
                    light.emissivity.x,
                    light.emissivity.y,
                    light.emissivity.z,
                    texture_tag(light.texture),
                ),
                v1: with_w(light.positions[0], pack_uv_pair(light.uvs[0])),
                v2: with_w(light.positions[1], pack_uv_pair(light.uvs[1])),
                v3: with_w(light.positions[2], pack_uv_pair(light.uvs[2])),
            },
            LightRecord::Point(ref light) => PackedLightRecord {
                radiance: Vec4::new(light.intensity.x, light.intensity.y, light.intensity.z, 0.0),
                v1: with_w(light.position, light.range),
                v2: Vec4::zero(),
                v3: with_w(Vec3::zero(), kind_sentinel(LightKind::Point)),
            },
            LightRecord::Spot(ref light) => PackedLightRecord {
                radiance: Vec4::new(light.intensity.x, light.intensity.y, light.intensity.z, 0.0),
                v1: with_w(light.position, light.range),
                v2: with_w(light.direction, light.angle_cutoff_scale),
                v3: Vec4::new(
                    light.angle_cutoff_offset,
                    0.0,
                    0.0,
                    kind_sentinel(LightKind::Spot),
                ),
            },
            LightRecord::Directional(ref light) => PackedLightRecord {
                radiance: Vec4::new(light.irradiance.x, light.irradiance.y, light.irradiance.z, 0.0),
                v1: with_w(light.direction, light.range),
                v2: Vec4::zero(),
                v3: with_w(Vec3::zero(), kind_sentinel(LightKind::Directional)),
            },
            LightRecord::Environment(ref light) => PackedLightRecord {
                radiance: Vec4::new(light.mip_count as f32, 0.0, 0.0, 0.0),
                v1: Vec4::zero(),
                v2: Vec4::zero(),
                v3: with_w(Vec3::zero(), kind_sentinel(LightKind::Environment)),
            },
        }
    }

    pub fn unpack(packed: &PackedLightRecord) -> Self {
        match kind_from_sentinel(packed.v3.w) {
            Some(LightKind::Point) => LightRecord::Point(PointLight {
                position: xyz(packed.v1),
                intensity: xyz(packed.radiance),
                range: packed.v1.w,
            }),
            Some(LightKind::Spot) => LightRecord::Spot(SpotLight {
                position: xyz(packed.v1),
                direction: xyz(packed.v2),
                intensity: xyz(packed.radiance),
                range: packed.v1.w,
                angle_cutoff_scale: packed.v2.w,
                angle_cutoff_offset: packed.v3.x,
            }),
            Some(LightKind::Directional) => LightRecord::Directional(DirectionalLight {
                direction: xyz(packed.v1),
                irradiance: xyz(packed.radiance),
                range: packed.v1.w,
            }),
            Some(LightKind::Environment) => LightRecord::Environment(EnvironmentLight {
                mip_count: packed.radiance.x as u32,
            }),
            None => LightRecord::Area(AreaLight {
                positions: [xyz(packed.v1), xyz(packed.v2), xyz(packed.v3)],
                uvs: [
                    unpack_uv_pair(packed.v1.w),
                    unpack_uv_pair(packed.v2.w),
                    unpack_uv_pair(packed.v3.w),
                ],
                emissivity: xyz(packed.radiance),
                texture: texture_from_tag(packed.radiance.w),
            }),
        }
    }
}

fn xyz(v: Vec4) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

fn with_w(v: Vec3, w: f32) -> Vec4 {
    Vec4::new(v.x, v.y, v.z, w)
}

/// The GPU-resident form: four 16-byte words, reinterpreted per kind.
#[repr(C)]
#[derive(Clone, Copy, Zeroable, Pod)]
pub struct PackedLightRecord {
    pub radiance: Vec4,
    pub v1: Vec4,
    pub v2: Vec4,
    pub v3: Vec4,
}
