use crate::extract::{extract_area_lights, EmissionCull};
use crate::light::{LightRecord, PackedLightRecord};
use crate::maths::*;
use crate::scene::{DeltaLight, Scene, SceneUpdates};
use crate::texture::Textures;
use bytemuck::{Contiguous, Pod, Zeroable};
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::mem;
use std::ops::{BitOr, BitOrAssign};
use strum::{EnumString, EnumVariantNames};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Contiguous, EnumString, EnumVariantNames)]
#[strum(serialize_all = "kebab_case")]
pub enum EnvironmentSampling {
    Uniform,
    Cosine,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightListSettings {
    pub delta_enable: bool,
    pub area_enable: bool,
    pub environment_enable: bool,
    pub low_emission_cull: bool,
    pub low_emission_threshold: f32,
    pub environment_sampling: EnvironmentSampling,
}

impl Default for LightListSettings {
    fn default() -> Self {
        Self {
            delta_enable: true,
            area_enable: true,
            environment_enable: true,
            low_emission_cull: false,
            low_emission_threshold: 0.01,
            environment_sampling: EnvironmentSampling::Uniform,
        }
    }
}

impl LightListSettings {
    fn cull(&self) -> EmissionCull {
        EmissionCull {
            enable: self.low_emission_cull,
            threshold: self.low_emission_threshold,
        }
    }

    /// Changes that alter which triangles or lights exist in the array.
    fn topology_differs(&self, other: &Self) -> bool {
        self.delta_enable != other.delta_enable
            || self.area_enable != other.area_enable
            || self.environment_enable != other.environment_enable
            || self.low_emission_cull != other.low_emission_cull
            || (self.low_emission_cull
                && self.low_emission_threshold != other.low_emission_threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightCounts {
    pub environment: u32,
    pub point: u32,
    pub spot: u32,
    pub directional: u32,
    pub area: u32,
}

impl LightCounts {
    pub fn delta(&self) -> u32 {
        self.point + self.spot + self.directional
    }

    pub fn total(&self) -> u32 {
        self.environment + self.delta() + self.area
    }

    fn families(&self) -> [u32; 3] {
        [self.environment, self.delta(), self.area]
    }
}

/// Compile-time-style switches for downstream shading code; disabled kinds
/// are meant to be compiled out, not branched over per sample.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Zeroable, Pod, Default)]
pub struct ShaderConfigFlags(pub u32);

impl ShaderConfigFlags {
    pub const DELTA_LIGHTS_DISABLED: ShaderConfigFlags = ShaderConfigFlags(0x1);
    pub const AREA_LIGHTS_DISABLED: ShaderConfigFlags = ShaderConfigFlags(0x2);
    pub const ENVIRONMENT_DISABLED: ShaderConfigFlags = ShaderConfigFlags(0x4);
    pub const PREV_LIGHTS_AVAILABLE: ShaderConfigFlags = ShaderConfigFlags(0x8);
    pub const COSINE_ENVIRONMENT_SAMPLING: ShaderConfigFlags = ShaderConfigFlags(0x10);
    pub const LOW_EMISSION_CULL: ShaderConfigFlags = ShaderConfigFlags(0x20);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(&self, other: ShaderConfigFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ShaderConfigFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ShaderConfigFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// What the last `update` did, for downstream cache invalidation.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameChanges {
    /// Any record in the array may differ from last frame.
    pub lights_updated: bool,
    /// Index N may now refer to a different light; temporal reservoirs
    /// holding indices are stale.
    pub light_indexes_changed: bool,
    /// A sampling setting changed without touching identities.
    pub light_settings_changed: bool,
}

fn hash_f32(state: &mut DefaultHasher, value: f32) {
    state.write_u32(value.to_bits());
}

fn hash_vec3(state: &mut DefaultHasher, value: Vec3) {
    hash_f32(state, value.x);
    hash_f32(state, value.y);
    hash_f32(state, value.z);
}

/// Content fingerprint of the delta-light collection; unrelated scene churn
/// must not force a light array rebuild.
fn hash_delta_lights(lights: &[DeltaLight]) -> u64 {
    let mut state = DefaultHasher::new();
    state.write_usize(lights.len());
    for light in lights.iter() {
        match *light {
            DeltaLight::Point {
                position,
                intensity,
                range,
            } => {
                state.write_u8(0);
                hash_vec3(&mut state, position);
                hash_vec3(&mut state, intensity);
                hash_f32(&mut state, range);
            }
            DeltaLight::Spot {
                position,
                direction,
                intensity,
                range,
                inner_angle,
                outer_angle,
            } => {
                state.write_u8(1);
                hash_vec3(&mut state, position);
                hash_vec3(&mut state, direction);
                hash_vec3(&mut state, intensity);
                hash_f32(&mut state, range);
                hash_f32(&mut state, inner_angle);
                hash_f32(&mut state, outer_angle);
            }
            DeltaLight::Directional {
                direction,
                irradiance,
                range,
            } => {
                state.write_u8(2);
                hash_vec3(&mut state, direction);
                hash_vec3(&mut state, irradiance);
                hash_f32(&mut state, range);
            }
        }
    }
    state.finish()
}

/// Explicit double buffer for the light array; only the builder may advance
/// it, and only between frames.
struct LightDoubleBuffer {
    current: Vec<LightRecord>,
    previous: Vec<LightRecord>,
    previous_usable: bool,
}

impl LightDoubleBuffer {
    fn new() -> Self {
        Self {
            current: Vec::new(),
            previous: Vec::new(),
            previous_usable: false,
        }
    }

    fn advance(&mut self, rebuilt: Option<Vec<LightRecord>>, identities_stable: bool) {
        match rebuilt {
            Some(records) if identities_stable => {
                // cheap swap: last frame's array is still a valid history
                self.previous = mem::replace(&mut self.current, records);
                self.previous_usable = true;
            }
            Some(records) => {
                self.current = records;
                self.previous = self.current.clone();
                self.previous_usable = false;
            }
            None => {
                if identities_stable {
                    self.previous.clone_from(&self.current);
                    self.previous_usable = true;
                }
            }
        }
    }
}

/// Assembles the authoritative light array once per frame and reports what
/// changed. Array order is a binding contract: environment light (if any)
/// at index 0, then point, spot and directional lights in declaration
/// order, then area lights in instance/primitive order.
pub struct LightListBuilder {
    settings: LightListSettings,
    built_settings: Option<LightListSettings>,
    delta_hash: Option<u64>,
    counts: LightCounts,
    buffers: LightDoubleBuffer,
    packed: Vec<PackedLightRecord>,
    area_instance_offsets: Vec<u32>,
    changes: FrameChanges,
    first_frame: bool,
}

impl Default for LightListBuilder {
    fn default() -> Self {
        Self::new(LightListSettings::default())
    }
}

impl LightListBuilder {
    pub fn new(settings: LightListSettings) -> Self {
        Self {
            settings,
            built_settings: None,
            delta_hash: None,
            counts: LightCounts::default(),
            buffers: LightDoubleBuffer::new(),
            packed: Vec::new(),
            area_instance_offsets: Vec::new(),
            changes: FrameChanges::default(),
            first_frame: true,
        }
    }

    pub fn settings(&self) -> &LightListSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: LightListSettings) {
        self.settings = settings;
    }

    pub fn lights(&self) -> &[LightRecord] {
        &self.buffers.current
    }

    /// Last frame's array, for temporal reuse; `None` when identities were
    /// invalidated and no usable history exists.
    pub fn previous_lights(&self) -> Option<&[LightRecord]> {
        if self.buffers.previous_usable {
            Some(&self.buffers.previous)
        } else {
            None
        }
    }

    pub fn packed_lights(&self) -> &[PackedLightRecord] {
        &self.packed
    }

    pub fn counts(&self) -> LightCounts {
        self.counts
    }

    pub fn changes(&self) -> FrameChanges {
        self.changes
    }

    /// Per-instance base offsets into the area-light offset buffer, for
    /// collaborators that resolve `primitive -> light index` on the GPU.
    pub fn area_instance_offsets(&self) -> &[u32] {
        &self.area_instance_offsets
    }

    pub fn shader_config_flags(&self) -> ShaderConfigFlags {
        let mut flags = ShaderConfigFlags::empty();
        if !self.settings.delta_enable {
            flags |= ShaderConfigFlags::DELTA_LIGHTS_DISABLED;
        }
        if !self.settings.area_enable {
            flags |= ShaderConfigFlags::AREA_LIGHTS_DISABLED;
        }
        if !self.settings.environment_enable {
            flags |= ShaderConfigFlags::ENVIRONMENT_DISABLED;
        }
        if self.buffers.previous_usable {
            flags |= ShaderConfigFlags::PREV_LIGHTS_AVAILABLE;
        }
        if self.settings.environment_sampling == EnvironmentSampling::Cosine {
            flags |= ShaderConfigFlags::COSINE_ENVIRONMENT_SAMPLING;
        }
        if self.settings.low_emission_cull {
            flags |= ShaderConfigFlags::LOW_EMISSION_CULL;
        }
        flags
    }

    /// Frame entry point. Decides between keeping the array and rebuilding
    /// it, advances the double buffer, and reports the change flags.
    pub fn update(&mut self, scene: &Scene, textures: &Textures, updates: SceneUpdates) -> FrameChanges {
        let settings = self.settings;
        let delta_hash = if settings.delta_enable {
            Some(hash_delta_lights(&scene.delta_lights))
        } else {
            None
        };
        let environment_available = settings.environment_enable && scene.environment.is_some();

        let topology_settings_changed = self
            .built_settings
            .map_or(false, |built| settings.topology_differs(&built));
        let sampling_settings_changed = self
            .built_settings
            .map_or(false, |built| settings.environment_sampling != built.environment_sampling);

        let rebuild = self.first_frame
            || delta_hash != self.delta_hash
            || topology_settings_changed
            || (settings.area_enable && updates.any_area_topology())
            || environment_available != (self.counts.environment > 0)
            || (environment_available && updates.environment);

        let mut changes = FrameChanges {
            lights_updated: false,
            light_indexes_changed: false,
            light_settings_changed: sampling_settings_changed,
        };

        if rebuild {
            let mut records = Vec::new();
            let mut counts = LightCounts::default();

            if environment_available {
                let environment = scene.environment.as_ref().unwrap();
                records.push(LightRecord::from_environment(environment));
                counts.environment = 1;
            }

            if settings.delta_enable {
                for light in scene.delta_lights.iter() {
                    if let DeltaLight::Point { .. } = light {
                        records.push(LightRecord::from_delta(light));
                        counts.point += 1;
                    }
                }
                for light in scene.delta_lights.iter() {
                    if let DeltaLight::Spot { .. } = light {
                        records.push(LightRecord::from_delta(light));
                        counts.spot += 1;
                    }
                }
                for light in scene.delta_lights.iter() {
                    if let DeltaLight::Directional { .. } = light {
                        records.push(LightRecord::from_delta(light));
                        counts.directional += 1;
                    }
                }
            }

            if settings.area_enable {
                let extraction = extract_area_lights(scene, textures, settings.cull());
                counts.area = extraction.emissive_count;
                records.extend(extraction.records);
                self.area_instance_offsets = extraction.instance_offsets;
            } else {
                self.area_instance_offsets.clear();
            }

            let identities_stable = !self.first_frame
                && counts.total() == self.counts.total()
                && counts
                    .families()
                    .iter()
                    .zip(self.counts.families().iter())
                    .all(|(&new, &old)| (new == 0) == (old == 0));

            changes.lights_updated = true;
            changes.light_indexes_changed = !identities_stable;

            log::debug!(
                "light list rebuild: {} lights ({:?}), identities {}",
                counts.total(),
                counts,
                if identities_stable { "stable" } else { "invalidated" }
            );

            self.buffers.advance(Some(records), identities_stable);
            self.packed = self.buffers.current.iter().map(|r| r.pack()).collect();
            self.counts = counts;
        } else {
            // carry the array forward so previous-light lookups stay valid
            self.buffers.advance(None, !self.first_frame);
        }

        self.delta_hash = delta_hash;
        self.built_settings = Some(settings);
        self.first_frame = false;
        self.changes = changes;
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::LightKind;
    use crate::scene::{Geometry, Instance, Material, Transform};
    use crate::texture::EnvironmentMap;

    fn test_scene(emissive_quads: usize) -> Scene {
        let mut scene = Scene::default();
        scene.environment = Some(EnvironmentMap::new_constant(8, Vec3::broadcast(0.5)));
        scene.add_delta_light(DeltaLight::Point {
            position: Vec3::new(0.0, 2.0, 0.0),
            intensity: Vec3::one(),
            range: 10.0,
        });
        scene.add_delta_light(DeltaLight::Point {
            position: Vec3::new(1.0, 2.0, 0.0),
            intensity: Vec3::one(),
            range: 10.0,
        });

        let transform = scene.add_transform(Transform::default());
        let mut geometry = Geometry::default();
        for i in 0..emissive_quads {
            let x = i as f32 * 2.0;
            geometry = geometry.with_quad(
                Vec3::new(x, 3.0, 0.0),
                Vec3::new(x + 1.0, 3.0, 0.0),
                Vec3::new(x + 1.0, 3.0, 1.0),
                Vec3::new(x, 3.0, 1.0),
            );
        }
        let geometry = scene.add_geometry(geometry);
        let material = scene.add_material(Material {
            emission: Some(Vec3::broadcast(5.0)),
            emissive_texture: None,
        });
        scene.add_instance(Instance::new(transform, geometry, material));
        scene
    }

    #[test]
    fn environment_light_is_always_index_zero() {
        let scene = test_scene(5);
        let textures = Textures::default();
        let mut builder = LightListBuilder::default();
        builder.update(&scene, &textures, SceneUpdates::default());
        assert!(matches!(
            builder.lights()[0].kind(),
            Some(LightKind::Environment)
        ));
    }

    #[test]
    fn array_order_and_counts_follow_the_contract() {
        let scene = test_scene(5);
        let textures = Textures::default();
        let mut builder = LightListBuilder::default();
        let changes = builder.update(&scene, &textures, SceneUpdates::default());

        assert!(changes.lights_updated);
        assert!(changes.light_indexes_changed);
        let counts = builder.counts();
        assert_eq!(counts.environment, 1);
        assert_eq!(counts.point, 2);
        assert_eq!(counts.area, 10);
        assert_eq!(counts.total(), 13);
        assert_eq!(builder.lights().len(), 13);
        assert_eq!(builder.packed_lights().len(), 13);

        assert!(matches!(builder.lights()[1].kind(), Some(LightKind::Point)));
        assert!(matches!(builder.lights()[2].kind(), Some(LightKind::Point)));
        for light in builder.lights()[3..].iter() {
            assert!(light.kind().is_none());
        }
    }

    #[test]
    fn unchanged_frames_carry_the_array_forward() {
        let scene = test_scene(3);
        let textures = Textures::default();
        let mut builder = LightListBuilder::default();
        builder.update(&scene, &textures, SceneUpdates::default());
        assert!(builder.previous_lights().is_none());

        let changes = builder.update(&scene, &textures, SceneUpdates::default());
        assert!(!changes.lights_updated);
        assert!(!changes.light_indexes_changed);
        let previous = builder.previous_lights().expect("history should exist");
        assert_eq!(previous.len(), builder.lights().len());
        assert!(builder
            .shader_config_flags()
            .contains(ShaderConfigFlags::PREV_LIGHTS_AVAILABLE));
    }

    #[test]
    fn disabling_area_lights_shrinks_and_invalidates() {
        let scene = test_scene(5);
        let textures = Textures::default();
        let mut builder = LightListBuilder::default();
        builder.update(&scene, &textures, SceneUpdates::default());
        builder.update(&scene, &textures, SceneUpdates::default());

        let mut settings = *builder.settings();
        settings.area_enable = false;
        builder.set_settings(settings);
        let changes = builder.update(&scene, &textures, SceneUpdates::default());

        assert!(changes.lights_updated);
        assert!(changes.light_indexes_changed);
        assert_eq!(builder.lights().len(), 3);
        assert!(builder.previous_lights().is_none());
        assert!(builder
            .shader_config_flags()
            .contains(ShaderConfigFlags::AREA_LIGHTS_DISABLED));
    }

    #[test]
    fn delta_content_hash_detects_light_edits() {
        let mut scene = test_scene(2);
        let textures = Textures::default();
        let mut builder = LightListBuilder::default();
        builder.update(&scene, &textures, SceneUpdates::default());

        scene.delta_lights[0] = DeltaLight::Point {
            position: Vec3::new(0.0, 4.0, 0.0),
            intensity: Vec3::one(),
            range: 10.0,
        };
        let changes = builder.update(&scene, &textures, SceneUpdates::default());
        assert!(changes.lights_updated);
        // same counts, same families: identities survive the edit
        assert!(!changes.light_indexes_changed);
        assert!(builder.previous_lights().is_some());
    }

    #[test]
    fn sampling_toggle_is_a_settings_change_only() {
        let scene = test_scene(2);
        let textures = Textures::default();
        let mut builder = LightListBuilder::default();
        builder.update(&scene, &textures, SceneUpdates::default());

        let mut settings = *builder.settings();
        settings.environment_sampling = EnvironmentSampling::Cosine;
        builder.set_settings(settings);
        let changes = builder.update(&scene, &textures, SceneUpdates::default());

        assert!(changes.light_settings_changed);
        assert!(!changes.lights_updated);
        assert!(!changes.light_indexes_changed);
        assert!(builder
            .shader_config_flags()
            .contains(ShaderConfigFlags::COSINE_ENVIRONMENT_SAMPLING));
    }

    #[test]
    fn strum_names_settings_variants() {
        use strum::VariantNames;
        assert!(EnvironmentSampling::VARIANTS.contains(&"cosine"));
    }
}
