use crate::light::{AreaLight, LightRecord};
use crate::maths::*;
use crate::reservoir::LightSample;
use crate::texture::{EnvironmentMap, Textures};

#[derive(Debug, Clone, Copy)]
pub struct ShadingPoint {
    pub position: Vec3,
    pub normal: Vec3,
}

/// Unshadowed contribution of one light sample at one shading point, with
/// the geometry and cosine terms folded in; the BSDF belongs to the caller.
#[derive(Debug, Clone, Copy)]
pub struct LightContribution {
    pub direction: Vec3,
    pub distance: f32,
    pub radiance: Vec3,
}

/// Low-distortion square-to-triangle warp; the two stored params always
/// reconstruct the same surface point.
pub fn square_to_barycentrics(params: Vec2) -> Vec3 {
    let su = params.x.sqrt();
    let b0 = 1.0 - su;
    let b1 = params.y * su;
    Vec3::new(b0, b1, 1.0 - b0 - b1)
}

/// Direction for an environment sample: uniform over the sphere, or
/// cosine-weighted about the normal when cosine sampling is enabled.
pub fn environment_direction(params: Vec2, normal: Vec3, cosine: bool) -> Vec3 {
    if cosine {
        let phi = 2.0 * PI * params.x;
        let r = params.y.sqrt();
        let (tangent, bitangent) = orthonormal_basis(normal);
        let z = (1.0 - params.y).max(0.0).sqrt();
        (tangent * (r * phi.cos()) + bitangent * (r * phi.sin()) + normal * z).normalized()
    } else {
        let z = 1.0 - 2.0 * params.x;
        let r = (1.0 - z * z).max(0.0).sqrt();
        let phi = 2.0 * PI * params.y;
        Vec3::new(r * phi.cos(), r * phi.sin(), z)
    }
}

/// Source pdf matching `environment_direction`, in solid angle measure.
pub fn environment_direction_pdf(direction: Vec3, normal: Vec3, cosine: bool) -> f32 {
    if cosine {
        direction.dot(normal).max(0.0) / PI
    } else {
        1.0 / (4.0 * PI)
    }
}

// inverse-square with the usual smooth range window
fn distance_attenuation(distance: f32, range: f32) -> f32 {
    let inv_sq = 1.0 / (distance * distance).max(1e-6);
    if range <= 0.0 {
        return inv_sq;
    }
    let q = (distance / range) * (distance / range);
    let window = (1.0 - q * q).clamp(0.0, 1.0);
    inv_sq * window * window
}

/// Everything a shading thread needs to turn a `LightSample` back into a
/// contribution: the frame's light array plus the collaborator-owned
/// sampling primitives. Read-only for the whole frame.
#[derive(Clone, Copy)]
pub struct LightEvalContext<'a> {
    pub lights: &'a [LightRecord],
    pub environment: Option<&'a EnvironmentMap>,
    pub textures: &'a Textures,
    pub cosine_environment_sampling: bool,
}

impl<'a> LightEvalContext<'a> {
    /// Reconstructs the sample's position/direction and evaluates its
    /// unshadowed contribution at `at`. `None` means zero contribution.
    pub fn evaluate(&self, sample: LightSample, at: &ShadingPoint) -> Option<LightContribution> {
        // light array bounds are fixed for the frame; a bad index is a
        // programming error upstream
        let record = &self.lights[sample.index as usize];
        match record {
            LightRecord::Area(light) => self.area_contribution(light, sample.params, at),
            LightRecord::Point(light) => {
                let (direction, distance) = to_light(light.position, at)?;
                let cos_shading = at.normal.dot(direction);
                if cos_shading <= 0.0 {
                    return None;
                }
                let attenuation = distance_attenuation(distance, light.range);
                Some(LightContribution {
                    direction,
                    distance,
                    radiance: light.intensity * (attenuation * cos_shading),
                })
            }
            LightRecord::Spot(light) => {
                let (direction, distance) = to_light(light.position, at)?;
                let cos_shading = at.normal.dot(direction);
                if cos_shading <= 0.0 {
                    return None;
                }
                let cone = light.cone_falloff(light.direction.dot(-direction));
                if cone <= 0.0 {
                    return None;
                }
                let attenuation = distance_attenuation(distance, light.range);
                Some(LightContribution {
                    direction,
                    distance,
                    radiance: light.intensity * (attenuation * cos_shading * cone),
                })
            }
            LightRecord::Directional(light) => {
                let direction = -light.direction;
                let cos_shading = at.normal.dot(direction);
                if cos_shading <= 0.0 {
                    return None;
                }
                Some(LightContribution {
                    direction,
                    distance: f32::MAX,
                    radiance: light.irradiance * cos_shading,
                })
            }
            LightRecord::Environment(_) => {
                let environment = self.environment?;
                let direction =
                    environment_direction(sample.params, at.normal, self.cosine_environment_sampling);
                let cos_shading = at.normal.dot(direction);
                if cos_shading <= 0.0 {
                    return None;
                }
                Some(LightContribution {
                    direction,
                    distance: f32::MAX,
                    radiance: environment.sample(direction) * cos_shading,
                })
            }
        }
    }

    /// The RIS target density: luminance of the unshadowed contribution.
    pub fn target_pdf(&self, sample: LightSample, at: &ShadingPoint) -> f32 {
        self.evaluate(sample, at)
            .map_or(0.0, |contribution| contribution.radiance.luminance().max(0.0))
    }

    fn area_contribution(
        &self,
        light: &AreaLight,
        params: Vec2,
        at: &ShadingPoint,
    ) -> Option<LightContribution> {
        let bary = square_to_barycentrics(params);
        let position =
            light.positions[0] * bary.x + light.positions[1] * bary.y + light.positions[2] * bary.z;
        let (direction, distance) = to_light(position, at)?;

        let cos_shading = at.normal.dot(direction);
        let cos_light = light.normal().dot(-direction);
        // single-sided emitter; written to also reject the NaNs a
        // degenerate triangle produces
        if !(cos_shading > 0.0 && cos_light > 0.0) {
            return None;
        }

        let mut emission = light.emissivity;
        if let Some(texture_index) = light.texture {
            let uv = light.uvs[0] * bary.x + light.uvs[1] * bary.y + light.uvs[2] * bary.z;
            let texel = self.textures.get(texture_index).sample_level(uv, 0.0);
            emission = emission * Vec3::new(texel.x, texel.y, texel.z);
        }

        let geometry_term = cos_shading * cos_light / (distance * distance);
        Some(LightContribution {
            direction,
            distance,
            radiance: emission * (geometry_term * light.area()),
        })
    }
}

fn to_light(position: Vec3, at: &ShadingPoint) -> Option<(Vec3, f32)> {
    let offset = position - at.position;
    let distance_sq = offset.mag_sq();
    if distance_sq <= 1e-8 {
        return None;
    }
    let distance = distance_sq.sqrt();
    Some((offset / distance, distance))
}
