use crate::maths::*;
use crate::texture::{EnvironmentMap, TextureIndex};

#[derive(Clone, Copy)]
pub struct Transform {
    pub world_from_local: Similarity3,
}

impl Transform {
    pub fn new(world_from_local: Similarity3) -> Self {
        Self { world_from_local }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new(Similarity3::identity())
    }
}

#[derive(Clone, Default)]
pub struct Geometry {
    pub positions: Vec<Vec3>,
    pub uvs: Option<Vec<Vec2>>,
    pub indices: Vec<UVec3>,
}

impl Geometry {
    pub fn with_quad(mut self, v0: Vec3, v1: Vec3, v2: Vec3, v3: Vec3) -> Self {
        let base = UVec3::broadcast(self.positions.len() as u32);
        self.positions.push(v0);
        self.positions.push(v1);
        self.positions.push(v2);
        self.positions.push(v3);
        self.indices.push(base + UVec3::new(0, 1, 2));
        self.indices.push(base + UVec3::new(2, 3, 0));
        self
    }

    pub fn with_uvs(mut self, uvs: Vec<Vec2>) -> Self {
        self.uvs = Some(uvs);
        self
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_positions(&self, primitive_index: usize) -> [Vec3; 3] {
        let tri = self.indices[primitive_index];
        [
            self.positions[tri.x as usize],
            self.positions[tri.y as usize],
            self.positions[tri.z as usize],
        ]
    }

    pub fn triangle_uvs(&self, primitive_index: usize) -> Option<[Vec2; 3]> {
        let uvs = self.uvs.as_ref()?;
        let tri = self.indices[primitive_index];
        Some([uvs[tri.x as usize], uvs[tri.y as usize], uvs[tri.z as usize]])
    }
}

/// Material surface data as far as light sampling is concerned: the
/// emission predicate and the optional emissive map. BSDF parameters live
/// with the shading system.
#[derive(Clone, Copy, Default)]
pub struct Material {
    pub emission: Option<Vec3>,
    pub emissive_texture: Option<TextureIndex>,
}

impl Material {
    pub fn is_emissive(&self) -> bool {
        self.emission.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeltaLight {
    Point {
        position: Vec3,
        intensity: Vec3,
        range: f32,
    },
    Spot {
        position: Vec3,
        direction: Vec3,
        intensity: Vec3,
        range: f32,
        inner_angle: f32,
        outer_angle: f32,
    },
    Directional {
        direction: Vec3,
        irradiance: Vec3,
        range: f32,
    },
}

pub struct Instance {
    pub transform_ref: TransformRef,
    pub geometry_ref: GeometryRef,
    pub material_ref: MaterialRef,
}

impl Instance {
    pub fn new(transform_ref: TransformRef, geometry_ref: GeometryRef, material_ref: MaterialRef) -> Self {
        Self {
            transform_ref,
            geometry_ref,
            material_ref,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransformRef(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeometryRef(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaterialRef(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceRef(pub u32);

/// Per-frame change notifications from the collaborators that own meshes,
/// transforms and instances. Consumed once per `LightListBuilder::update`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneUpdates {
    pub meshes: bool,
    pub transforms: bool,
    pub instances: bool,
    pub environment: bool,
}

impl SceneUpdates {
    pub fn any_area_topology(&self) -> bool {
        self.meshes || self.transforms || self.instances
    }
}

#[derive(Default)]
pub struct Scene {
    pub transforms: Vec<Transform>,
    pub geometries: Vec<Geometry>,
    pub materials: Vec<Material>,
    pub instances: Vec<Instance>,
    pub delta_lights: Vec<DeltaLight>,
    pub environment: Option<EnvironmentMap>,
}

impl Scene {
    pub fn add_transform(&mut self, transform: Transform) -> TransformRef {
        let index = self.transforms.len();
        self.transforms.push(transform);
        TransformRef(index as u32)
    }

    pub fn add_geometry(&mut self, geometry: Geometry) -> GeometryRef {
        let index = self.geometries.len();
        self.geometries.push(geometry);
        GeometryRef(index as u32)
    }

    pub fn add_material(&mut self, material: Material) -> MaterialRef {
        let index = self.materials.len();
        self.materials.push(material);
        MaterialRef(index as u32)
    }

    pub fn add_instance(&mut self, instance: Instance) -> InstanceRef {
        let index = self.instances.len();
        self.instances.push(instance);
        InstanceRef(index as u32)
    }

    pub fn add_delta_light(&mut self, light: DeltaLight) {
        self.delta_lights.push(light);
    }

    // stale refs are a programming error, not a runtime condition
    pub fn transform(&self, r: TransformRef) -> &Transform {
        &self.transforms[r.0 as usize]
    }

    pub fn geometry(&self, r: GeometryRef) -> &Geometry {
        &self.geometries[r.0 as usize]
    }

    pub fn material(&self, r: MaterialRef) -> &Material {
        &self.materials[r.0 as usize]
    }

    pub fn instance(&self, r: InstanceRef) -> &Instance {
        &self.instances[r.0 as usize]
    }

    pub fn instance_ref_iter(&self) -> impl Iterator<Item = InstanceRef> {
        (0..self.instances.len()).map(|i| InstanceRef(i as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_builder_makes_two_triangles() {
        let geometry = Geometry::default().with_quad(
            Vec3::zero(),
            Vec3::unit_x(),
            Vec3::unit_x() + Vec3::unit_y(),
            Vec3::unit_y(),
        );
        assert_eq!(geometry.triangle_count(), 2);
        let [a, b, c] = geometry.triangle_positions(0);
        assert!((b - a).cross(c - a).mag() > 0.0);
    }

    #[test]
    fn refs_index_in_insertion_order() {
        let mut scene = Scene::default();
        let t = scene.add_transform(Transform::default());
        let g = scene.add_geometry(Geometry::default());
        let m = scene.add_material(Material::default());
        let i = scene.add_instance(Instance::new(t, g, m));
        assert_eq!(i, InstanceRef(0));
        assert_eq!(scene.instance(i).material_ref, m);
    }
}
