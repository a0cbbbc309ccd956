use crate::light::{AreaLight, LightRecord};
use crate::maths::*;
use crate::scene::{Geometry, InstanceRef, Material, Scene, Transform};
use crate::texture::{mip_level_for_uv_area, Textures};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};

/// One parallel group of the triangle domain; reductions within a chunk
/// issue a single atomic add against the global counter.
pub const EXTRACT_CHUNK: usize = 64;

const SCAN_BLOCK: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct EmissionCull {
    pub enable: bool,
    pub threshold: f32,
}

impl Default for EmissionCull {
    fn default() -> Self {
        Self {
            enable: false,
            threshold: 0.01,
        }
    }
}

pub struct AreaLightExtraction {
    pub records: Vec<LightRecord>,
    /// Base slot of each instance in the per-triangle offset buffer; one
    /// entry per scene instance, unused ones kept deliberately sparse.
    pub instance_offsets: Vec<u32>,
    /// Exclusive output offset per triangle slot, valid where the emissive
    /// flag was set.
    pub triangle_offsets: Vec<u32>,
    pub emissive_count: u32,
}

struct InstanceDomain {
    instance_ref: InstanceRef,
    base: usize,
    triangle_count: usize,
}

/// The one emissive predicate shared by the count and scatter passes; the
/// two passes must classify identically or indices will not match.
fn triangle_emission(
    geometry: &Geometry,
    material: &Material,
    textures: &Textures,
    primitive_index: usize,
    cull: EmissionCull,
) -> Option<Vec3> {
    let emissivity = material.emission?;
    let mut emission = emissivity;
    if let (Some(texture_index), Some(uvs)) = (material.emissive_texture, geometry.triangle_uvs(primitive_index)) {
        let texture = textures.get(texture_index);
        let uv_area = 0.5 * ((uvs[1] - uvs[0]).x * (uvs[2] - uvs[0]).y
            - (uvs[1] - uvs[0]).y * (uvs[2] - uvs[0]).x);
        let level = mip_level_for_uv_area(uv_area, texture.base_size());
        let centroid = (uvs[0] + uvs[1] + uvs[2]) / 3.0;
        let texel = texture.sample_level(centroid, level);
        emission = emissivity * Vec3::new(texel.x, texel.y, texel.z);
    }
    let luminance = emission.luminance();
    if luminance <= 0.0 {
        // fully black at the sampled LOD counts as non-emissive
        return None;
    }
    if cull.enable && luminance < cull.threshold {
        return None;
    }
    Some(emission)
}

fn area_light_record(
    geometry: &Geometry,
    material: &Material,
    transform: &Transform,
    primitive_index: usize,
) -> LightRecord {
    let world_from_local = transform.world_from_local;
    let positions = geometry.triangle_positions(primitive_index);
    let uvs = geometry
        .triangle_uvs(primitive_index)
        .unwrap_or([Vec2::zero(); 3]);
    LightRecord::Area(AreaLight {
        positions: [
            world_from_local * positions[0],
            world_from_local * positions[1],
            world_from_local * positions[2],
        ],
        uvs,
        emissivity: material.emission.unwrap_or_else(Vec3::zero),
        texture: material.emissive_texture,
    })
}

fn gather_domains(scene: &Scene) -> (Vec<InstanceDomain>, Vec<u32>) {
    let mut domains = Vec::new();
    let mut instance_offsets = Vec::with_capacity(scene.instances.len());
    let mut base = 0usize;
    for instance_ref in scene.instance_ref_iter() {
        instance_offsets.push(base as u32);
        let instance = scene.instance(instance_ref);
        if !scene.material(instance.material_ref).is_emissive() {
            continue;
        }
        let triangle_count = scene.geometry(instance.geometry_ref).triangle_count();
        domains.push(InstanceDomain {
            instance_ref,
            base,
            triangle_count,
        });
        base += triangle_count;
    }
    (domains, instance_offsets)
}

fn count_pass(
    scene: &Scene,
    textures: &Textures,
    cull: EmissionCull,
    domains: &[InstanceDomain],
    flags: &mut [u32],
) -> u32 {
    let total = AtomicU32::new(0);
    for domain in domains.iter() {
        let instance = scene.instance(domain.instance_ref);
        let geometry = scene.geometry(instance.geometry_ref);
        let material = scene.material(instance.material_ref);
        flags[domain.base..domain.base + domain.triangle_count]
            .par_chunks_mut(EXTRACT_CHUNK)
            .enumerate()
            .for_each(|(chunk_index, chunk)| {
                let chunk_base = chunk_index * EXTRACT_CHUNK;
                let mut chunk_count = 0;
                for (i, flag) in chunk.iter_mut().enumerate() {
                    let emissive =
                        triangle_emission(geometry, material, textures, chunk_base + i, cull).is_some();
                    *flag = emissive as u32;
                    chunk_count += *flag;
                }
                if chunk_count > 0 {
                    total.fetch_add(chunk_count, Ordering::Relaxed);
                }
            });
    }
    total.into_inner()
}

/// Work-efficient blocked exclusive scan, in place. Deterministic for any
/// execution order: block sums are combined serially.
pub fn exclusive_prefix_sum(values: &mut [u32]) -> u32 {
    let mut block_offsets: Vec<u32> = values
        .par_chunks(SCAN_BLOCK)
        .map(|block| block.iter().sum())
        .collect();
    let mut running = 0u32;
    for offset in block_offsets.iter_mut() {
        let block_total = *offset;
        *offset = running;
        running += block_total;
    }
    values
        .par_chunks_mut(SCAN_BLOCK)
        .zip(block_offsets.par_iter())
        .for_each(|(block, &base)| {
            let mut acc = base;
            for value in block.iter_mut() {
                let v = *value;
                *value = acc;
                acc += v;
            }
        });
    running
}

fn scatter_pass(
    scene: &Scene,
    textures: &Textures,
    cull: EmissionCull,
    domains: &[InstanceDomain],
    offsets: &[u32],
    total: usize,
    records: &mut [LightRecord],
) {
    // the exclusive scan has no slot past the last triangle; the grand
    // total stands in for it
    let offset_at = |slot: usize| -> usize {
        if slot < offsets.len() {
            offsets[slot] as usize
        } else {
            total
        }
    };

    let mut rest = records;
    for domain in domains.iter() {
        let instance = scene.instance(domain.instance_ref);
        let geometry = scene.geometry(instance.geometry_ref);
        let material = scene.material(instance.material_ref);
        let transform = scene.transform(instance.transform_ref);

        let domain_begin = offset_at(domain.base);
        let domain_end = offset_at(domain.base + domain.triangle_count);
        let taken = rest;
        let (domain_slice, tail) = taken.split_at_mut(domain_end - domain_begin);
        rest = tail;

        // carve per-chunk output sub-slices out of the compacted range so
        // the scatter runs without cross-lane synchronization
        let mut slices = Vec::new();
        let mut remaining = domain_slice;
        let mut chunk_start = 0usize;
        while chunk_start < domain.triangle_count {
            let chunk_end = (chunk_start + EXTRACT_CHUNK).min(domain.triangle_count);
            let out_len = offset_at(domain.base + chunk_end) - offset_at(domain.base + chunk_start);
            let taken = remaining;
            let (chunk_slice, after) = taken.split_at_mut(out_len);
            remaining = after;
            slices.push((chunk_start..chunk_end, chunk_slice));
            chunk_start = chunk_end;
        }

        slices.into_par_iter().for_each(|(range, out)| {
            let mut cursor = 0;
            for primitive_index in range {
                if triangle_emission(geometry, material, textures, primitive_index, cull).is_some() {
                    out[cursor] = area_light_record(geometry, material, transform, primitive_index);
                    cursor += 1;
                }
            }
            debug_assert_eq!(cursor, out.len());
        });
    }
}

/// Converts emissive mesh triangles into Area light records with stable,
/// compact indices: count, scan, scatter.
pub fn extract_area_lights(scene: &Scene, textures: &Textures, cull: EmissionCull) -> AreaLightExtraction {
    let (domains, instance_offsets) = gather_domains(scene);
    let slot_count: usize = domains.iter().map(|d| d.triangle_count).sum();
    let mut flags = vec![0u32; slot_count];

    let counted = count_pass(scene, textures, cull, &domains, &mut flags);
    let scanned = exclusive_prefix_sum(&mut flags);
    debug_assert_eq!(counted, scanned);

    let mut records = vec![
        LightRecord::Area(AreaLight {
            positions: [Vec3::zero(); 3],
            uvs: [Vec2::zero(); 3],
            emissivity: Vec3::zero(),
            texture: None,
        });
        scanned as usize
    ];
    scatter_pass(scene, textures, cull, &domains, &flags, scanned as usize, &mut records);

    log::debug!(
        "area light extraction: {} triangles over {} instances, {} emissive",
        slot_count,
        domains.len(),
        scanned
    );

    AreaLightExtraction {
        records,
        instance_offsets,
        triangle_offsets: flags,
        emissive_count: scanned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Instance, Material, Transform};
    use crate::texture::{MipTexture, TextureIndex};

    fn quad_scene(quads: usize, emission: Option<Vec3>) -> Scene {
        let mut scene = Scene::default();
        let transform = scene.add_transform(Transform::default());
        let mut geometry = Geometry::default();
        for i in 0..quads {
            let x = i as f32;
            geometry = geometry.with_quad(
                Vec3::new(x, 0.0, 0.0),
                Vec3::new(x + 1.0, 0.0, 0.0),
                Vec3::new(x + 1.0, 1.0, 0.0),
                Vec3::new(x, 1.0, 0.0),
            );
        }
        let geometry = scene.add_geometry(geometry);
        let material = scene.add_material(Material {
            emission,
            emissive_texture: None,
        });
        scene.add_instance(Instance::new(transform, geometry, material));
        scene
    }

    #[test]
    fn prefix_sum_matches_serial_scan() {
        let mut values: Vec<u32> = (0..2000u32).map(|i| (i * 7 + 3) % 5).collect();
        let mut expected = values.clone();
        let mut running = 0;
        for v in expected.iter_mut() {
            let x = *v;
            *v = running;
            running += x;
        }
        let total = exclusive_prefix_sum(&mut values);
        assert_eq!(total, running);
        assert_eq!(values, expected);
    }

    #[test]
    fn count_equals_scatter_for_plain_emissive_mesh() {
        let scene = quad_scene(5, Some(Vec3::one()));
        let textures = Textures::default();
        let extraction = extract_area_lights(&scene, &textures, EmissionCull::default());
        assert_eq!(extraction.emissive_count, 10);
        assert_eq!(extraction.records.len(), 10);
    }

    #[test]
    fn extraction_is_bit_stable_across_reruns() {
        let scene = quad_scene(20, Some(Vec3::new(0.9, 0.4, 0.1)));
        let textures = Textures::default();
        let a = extract_area_lights(&scene, &textures, EmissionCull::default());
        let b = extract_area_lights(&scene, &textures, EmissionCull::default());
        let bytes_a: Vec<u8> = a
            .records
            .iter()
            .flat_map(|r| bytemuck::bytes_of(&r.pack()).to_vec())
            .collect();
        let bytes_b: Vec<u8> = b
            .records
            .iter()
            .flat_map(|r| bytemuck::bytes_of(&r.pack()).to_vec())
            .collect();
        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn black_texture_is_non_emissive_in_both_passes() {
        let mut scene = Scene::default();
        let transform = scene.add_transform(Transform::default());
        let geometry = Geometry::default()
            .with_quad(
                Vec3::zero(),
                Vec3::unit_x(),
                Vec3::unit_x() + Vec3::unit_y(),
                Vec3::unit_y(),
            )
            .with_uvs(vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(0.0, 1.0),
            ]);
        let geometry = scene.add_geometry(geometry);

        let mut textures = Textures::default();
        let black = textures.add(MipTexture::new_constant(UVec2::new(8, 8), Vec4::zero()));
        assert_eq!(black, TextureIndex(0));
        let material = scene.add_material(Material {
            emission: Some(Vec3::one()),
            emissive_texture: Some(black),
        });
        scene.add_instance(Instance::new(transform, geometry, material));

        let extraction = extract_area_lights(&scene, &textures, EmissionCull::default());
        assert_eq!(extraction.emissive_count, 0);
        assert!(extraction.records.is_empty());
        // the instance still occupies its slots in the offset buffers
        assert_eq!(extraction.instance_offsets.len(), 1);
        assert_eq!(extraction.triangle_offsets.len(), 2);
    }

    #[test]
    fn transforms_apply_to_area_light_positions() {
        let mut scene = Scene::default();
        let transform = scene.add_transform(Transform::new(Similarity3::new(
            Vec3::new(0.0, 1.0, 0.0),
            Rotor3::identity(),
            2.0,
        )));
        let geometry = scene.add_geometry(Geometry::default().with_quad(
            Vec3::zero(),
            Vec3::unit_x(),
            Vec3::unit_x() + Vec3::unit_z(),
            Vec3::unit_z(),
        ));
        let material = scene.add_material(Material {
            emission: Some(Vec3::one()),
            emissive_texture: None,
        });
        scene.add_instance(Instance::new(transform, geometry, material));

        let textures = Textures::default();
        let extraction = extract_area_lights(&scene, &textures, EmissionCull::default());
        let first = match extraction.records[0] {
            LightRecord::Area(area) => area,
            _ => unreachable!(),
        };
        assert!((first.positions[0] - Vec3::new(0.0, 1.0, 0.0)).mag() < 1e-6);
        assert!((first.positions[1] - Vec3::new(2.0, 1.0, 0.0)).mag() < 1e-6);
    }

    #[test]
    fn low_emission_cull_drops_dim_triangles() {
        let mut scene = quad_scene(2, Some(Vec3::broadcast(0.001)));
        let bright = scene.add_material(Material {
            emission: Some(Vec3::one()),
            emissive_texture: None,
        });
        let transform = scene.add_transform(Transform::default());
        let geometry = scene.add_geometry(Geometry::default().with_quad(
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::new(1.0, 0.0, 5.0),
            Vec3::new(1.0, 1.0, 5.0),
            Vec3::new(0.0, 1.0, 5.0),
        ));
        scene.add_instance(Instance::new(transform, geometry, bright));

        let textures = Textures::default();
        let culled = extract_area_lights(
            &scene,
            &textures,
            EmissionCull {
                enable: true,
                threshold: 0.01,
            },
        );
        assert_eq!(culled.emissive_count, 2);

        let kept = extract_area_lights(&scene, &textures, EmissionCull::default());
        assert_eq!(kept.emissive_count, 6);
    }
}
