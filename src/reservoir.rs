use crate::maths::*;
use bytemuck::{Pod, Zeroable};
use half::f16;

/// Relative history clamp: a persisted reservoir may carry at most this
/// multiple of the current reservoir's sample count into a merge.
pub const HISTORY_CLAMP: f32 = 20.0;
/// Absolute ceiling on persisted history, whatever the current count.
pub const HISTORY_CAP: f32 = 512.0;

/// Index into the frame's light array plus the surface-local coordinates
/// needed to reconstruct the sampled point or direction from any shading
/// point. Barycentrics for area lights, unit-square values for the
/// environment, unused for delta lights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSample {
    pub index: u32,
    pub params: Vec2,
}

impl LightSample {
    pub fn none() -> Self {
        Self {
            index: u32::MAX,
            params: Vec2::zero(),
        }
    }

    pub fn is_some(&self) -> bool {
        self.index != u32::MAX
    }
}

/// Streaming statistics over a weighted candidate sequence, reservoir size
/// one. `w` holds `f32::MAX` until a candidate with nonzero target pdf has
/// been accepted, which keeps `is_valid` exact without extra state.
#[derive(Debug, Clone, Copy)]
pub struct Reservoir {
    pub sample: LightSample,
    /// Effective sample count; fractional once merges use continuous MIS
    /// weights.
    pub m: f32,
    /// Unbiased contribution weight of the retained sample.
    pub w: f32,
    /// Exponentially-tracked shadow visibility, reused across frames.
    pub visibility: f32,
}

impl Reservoir {
    pub fn empty() -> Self {
        Self {
            sample: LightSample::none(),
            m: 0.0,
            w: f32::MAX,
            visibility: 0.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.m > 0.0 && self.w < f32::MAX
    }

    /// `w` with the invalid sentinel collapsed to zero contribution.
    pub fn contribution_weight(&self) -> f32 {
        if self.is_valid() {
            self.w
        } else {
            0.0
        }
    }

    /// Bounds stale temporal history before a merge; the primary lever
    /// against lag and ghosting.
    pub fn clamp_history(&mut self, current_m: f32) {
        let cap = (HISTORY_CLAMP * current_m.max(1.0)).min(HISTORY_CAP);
        self.m = self.m.min(cap);
    }

    /// Discards all information, e.g. when persisted light indices were
    /// invalidated. There is no partial-validity state.
    pub fn invalidate(&mut self) {
        *self = Self::empty();
    }

    pub fn pack(&self) -> PackedReservoir {
        PackedReservoir {
            light_index: self.sample.index,
            sample_params: pack_half2(self.sample.params.x, self.sample.params.y),
            w: self.w,
            m_and_visibility: pack_half2(self.m, self.visibility),
        }
    }

    pub fn unpack(packed: &PackedReservoir) -> Self {
        let (px, py) = unpack_half2(packed.sample_params);
        let (m, visibility) = unpack_half2(packed.m_and_visibility);
        Self {
            sample: LightSample {
                index: packed.light_index,
                params: Vec2::new(px, py),
            },
            m,
            w: packed.w,
            visibility,
        }
    }
}

impl Default for Reservoir {
    fn default() -> Self {
        Self::empty()
    }
}

/// The only cross-frame persisted form: one 16-byte word per shading point.
/// Lossless for the index and `w`, half precision for the rest.
#[repr(C)]
#[derive(Clone, Copy, Zeroable, Pod)]
pub struct PackedReservoir {
    pub light_index: u32,
    pub sample_params: u32,
    pub w: f32,
    pub m_and_visibility: u32,
}

fn pack_half2(a: f32, b: f32) -> u32 {
    let lo = f16::from_f32(a).to_bits() as u32;
    let hi = f16::from_f32(b).to_bits() as u32;
    (hi << 16) | lo
}

fn unpack_half2(bits: u32) -> (f32, f32) {
    (
        f16::from_bits(bits as u16).to_f32(),
        f16::from_bits((bits >> 16) as u16).to_f32(),
    )
}
