use crate::maths::*;
use arrayvec::ArrayVec;

pub const MAX_MIP_COUNT: usize = 16;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextureIndex(pub u16);

#[derive(Clone)]
pub struct MipLevel {
    size: UVec2,
    texels: Vec<Vec4>,
}

impl MipLevel {
    fn fetch(&self, x: i32, y: i32) -> Vec4 {
        let w = self.size.x as i32;
        let h = self.size.y as i32;
        let x = x.rem_euclid(w);
        let y = y.rem_euclid(h);
        self.texels[(y * w + x) as usize]
    }

    fn sample_bilinear(&self, uv: Vec2) -> Vec4 {
        let x = uv.x * (self.size.x as f32) - 0.5;
        let y = uv.y * (self.size.y as f32) - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let x0 = x0 as i32;
        let y0 = y0 as i32;
        let t00 = self.fetch(x0, y0);
        let t10 = self.fetch(x0 + 1, y0);
        let t01 = self.fetch(x0, y0 + 1);
        let t11 = self.fetch(x0 + 1, y0 + 1);
        let top = t00 * (1.0 - fx) + t10 * fx;
        let bottom = t01 * (1.0 - fx) + t11 * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

/// CPU-side texture with a box-filtered mip chain, the sampling primitive
/// the emissive predicate and environment lookups run against.
#[derive(Clone)]
pub struct MipTexture {
    levels: ArrayVec<MipLevel, MAX_MIP_COUNT>,
}

impl MipTexture {
    pub fn new(size: UVec2, texels: Vec<Vec4>) -> Self {
        assert!(size.x > 0 && size.y > 0);
        assert_eq!(texels.len(), (size.x * size.y) as usize);
        let mut levels = ArrayVec::new();
        levels.push(MipLevel { size, texels });
        loop {
            let last = levels.last().unwrap();
            if (last.size.x == 1 && last.size.y == 1) || levels.len() == MAX_MIP_COUNT {
                break;
            }
            let next = Self::downsample(last);
            levels.push(next);
        }
        Self { levels }
    }

    pub fn new_constant(size: UVec2, value: Vec4) -> Self {
        Self::new(size, vec![value; (size.x * size.y) as usize])
    }

    fn downsample(src: &MipLevel) -> MipLevel {
        let size = src.size.div_round_up(2);
        let mut texels = Vec::with_capacity((size.x * size.y) as usize);
        for y in 0..size.y {
            for x in 0..size.x {
                let x0 = (x * 2) as i32;
                let y0 = (y * 2) as i32;
                let sum = src.fetch(x0, y0)
                    + src.fetch((x0 + 1).min(src.size.x as i32 - 1), y0)
                    + src.fetch(x0, (y0 + 1).min(src.size.y as i32 - 1))
                    + src.fetch(
                        (x0 + 1).min(src.size.x as i32 - 1),
                        (y0 + 1).min(src.size.y as i32 - 1),
                    );
                texels.push(sum * 0.25);
            }
        }
        MipLevel { size, texels }
    }

    pub fn base_size(&self) -> UVec2 {
        self.levels[0].size
    }

    pub fn mip_count(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Nearest-level selection, bilinear within the level. Deterministic,
    /// which the two extraction passes rely on.
    pub fn sample_level(&self, uv: Vec2, level: f32) -> Vec4 {
        let level = (level.round().max(0.0) as usize).min(self.levels.len() - 1);
        self.levels[level].sample_bilinear(uv)
    }
}

/// LOD from the projected UV area of a primitive, in the usual
/// half-log2-of-texel-area form.
pub fn mip_level_for_uv_area(uv_area: f32, base_size: UVec2) -> f32 {
    let texel_area = uv_area.abs() * (base_size.x * base_size.y) as f32;
    0.5 * texel_area.max(1.0).log2()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CubeFace {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

fn cube_face_uv(dir: Vec3) -> (CubeFace, Vec2) {
    let a = dir.abs();
    let (face, u, v, ma) = if a.x >= a.y && a.x >= a.z {
        if dir.x >= 0.0 {
            (CubeFace::PosX, -dir.z, -dir.y, a.x)
        } else {
            (CubeFace::NegX, dir.z, -dir.y, a.x)
        }
    } else if a.y >= a.z {
        if dir.y >= 0.0 {
            (CubeFace::PosY, dir.x, dir.z, a.y)
        } else {
            (CubeFace::NegY, dir.x, -dir.z, a.y)
        }
    } else if dir.z >= 0.0 {
        (CubeFace::PosZ, dir.x, -dir.y, a.z)
    } else {
        (CubeFace::NegZ, -dir.x, -dir.y, a.z)
    };
    let scale = 0.5 / ma.max(1e-12);
    (face, Vec2::new(u, v) * scale + Vec2::broadcast(0.5))
}

/// Six-face cube environment. The light record only carries its mip count;
/// radiance is always recovered by sampling the map directly.
#[derive(Clone)]
pub struct EnvironmentMap {
    faces: Box<[MipTexture; 6]>,
}

impl EnvironmentMap {
    pub fn new(faces: [MipTexture; 6]) -> Self {
        let size = faces[0].base_size();
        assert!(faces.iter().all(|f| f.base_size() == size));
        Self { faces: Box::new(faces) }
    }

    pub fn new_constant(size: u32, radiance: Vec3) -> Self {
        let face = MipTexture::new_constant(
            UVec2::broadcast(size),
            Vec4::new(radiance.x, radiance.y, radiance.z, 1.0),
        );
        Self::new([
            face.clone(),
            face.clone(),
            face.clone(),
            face.clone(),
            face.clone(),
            face,
        ])
    }

    pub fn mip_count(&self) -> u32 {
        self.faces[0].mip_count()
    }

    pub fn sample(&self, dir: Vec3) -> Vec3 {
        let (face, uv) = cube_face_uv(dir);
        let t = self.faces[face as usize].sample_level(uv, 0.0);
        Vec3::new(t.x, t.y, t.z)
    }
}

/// Registry of emissive textures, addressed by the index the material
/// records carry.
#[derive(Default)]
pub struct Textures {
    textures: Vec<MipTexture>,
}

impl Textures {
    pub fn add(&mut self, texture: MipTexture) -> TextureIndex {
        let index = self.textures.len();
        self.textures.push(texture);
        TextureIndex(index as u16)
    }

    pub fn get(&self, index: TextureIndex) -> &MipTexture {
        &self.textures[index.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_reaches_one_by_one() {
        let texture = MipTexture::new_constant(UVec2::new(8, 4), Vec4::one());
        assert_eq!(texture.mip_count(), 4);
        let t = texture.sample_level(Vec2::new(0.3, 0.7), 2.0);
        assert!((t.x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mip_selection_grows_with_uv_area() {
        let size = UVec2::new(256, 256);
        let near = mip_level_for_uv_area(1.0 / 65536.0, size);
        let far = mip_level_for_uv_area(0.25, size);
        assert!(near < far);
        assert!((near - 0.0).abs() < 1e-5);
        assert!((far - 7.0).abs() < 1e-5);
    }

    #[test]
    fn cube_faces_cover_the_axes() {
        let axes = [
            (Vec3::unit_x(), CubeFace::PosX),
            (-Vec3::unit_x(), CubeFace::NegX),
            (Vec3::unit_y(), CubeFace::PosY),
            (-Vec3::unit_y(), CubeFace::NegY),
            (Vec3::unit_z(), CubeFace::PosZ),
            (-Vec3::unit_z(), CubeFace::NegZ),
        ];
        for (dir, expected) in axes.iter() {
            let (face, uv) = cube_face_uv(*dir);
            assert!(face == *expected);
            assert!((uv - Vec2::broadcast(0.5)).mag() < 1e-6);
        }
    }

    #[test]
    fn constant_environment_samples_constant() {
        let env = EnvironmentMap::new_constant(16, Vec3::new(0.5, 1.0, 2.0));
        let sampled = env.sample(Vec3::new(0.3, -0.8, 0.52).normalized());
        assert!((sampled - Vec3::new(0.5, 1.0, 2.0)).mag() < 1e-5);
    }
}
