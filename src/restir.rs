use crate::maths::*;
use crate::reservoir::{LightSample, Reservoir};
use bytemuck::Contiguous;
use rand::Rng;
use strum::{EnumString, EnumVariantNames};

/// How a persisted reservoir is combined with the current one.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Contiguous, EnumString, EnumVariantNames)]
#[strum(serialize_all = "kebab_case")]
pub enum ReuseHeuristic {
    Balance,
    Talbot,
}

/// The four shifted target pdfs of a Talbot MIS merge: sample of reservoir
/// i evaluated in the domain of reservoir j, with 1 the current shading
/// point and 2 the persisted one.
#[derive(Debug, Clone, Copy)]
pub struct TalbotPdfs {
    pub pdf11: f32,
    pub pdf12: f32,
    pub pdf21: f32,
    pub pdf22: f32,
}

/// Streaming weighted reservoir resampling with RIS weights: approximates
/// sampling the sum of all lights' contributions with O(1) state. One
/// updater per shading point per frame; no cross-pixel synchronization.
pub struct ReservoirUpdater<'a, R: Rng> {
    reservoir: Reservoir,
    target_pdf: f32,
    rng: &'a mut R,
}

impl<'a, R: Rng> ReservoirUpdater<'a, R> {
    pub fn new(rng: &'a mut R) -> Self {
        Self {
            reservoir: Reservoir::empty(),
            target_pdf: 0.0,
            rng,
        }
    }

    /// Resumes from an unpacked reservoir, e.g. the current frame's initial
    /// candidates before temporal reuse. `target_pdf` must be the retained
    /// sample's target density at this shading point.
    pub fn with_reservoir(reservoir: Reservoir, target_pdf: f32, rng: &'a mut R) -> Self {
        Self {
            reservoir,
            target_pdf,
            rng,
        }
    }

    pub fn reservoir(&self) -> &Reservoir {
        &self.reservoir
    }

    pub fn retained_target_pdf(&self) -> f32 {
        self.target_pdf
    }

    /// Streams one candidate drawn from `source_pdf`; `target_pdf` is the
    /// luminance of its unshadowed contribution here.
    pub fn add_candidate(&mut self, sample: LightSample, source_pdf: f32, target_pdf: f32) {
        let m1 = self.reservoir.m;
        let denom = m1 + 1.0;
        let mis1 = m1 / denom;
        let mis2 = 1.0 / denom;
        let weight1 = mis1 * self.target_pdf * self.reservoir.contribution_weight();
        let weight2 = mis2 * target_pdf / source_pdf.max(PDF_EPSILON);
        self.resample(sample, target_pdf, weight1, weight2, 1.0, 1.0);
    }

    /// Balance-heuristic merge with a previous-frame or neighbor reservoir.
    /// `shifted_target_pdf` is its retained sample's target density
    /// re-evaluated at this shading point; clamp the history first.
    pub fn merge(&mut self, prev: &Reservoir, shifted_target_pdf: f32) {
        if prev.m <= 0.0 {
            return;
        }
        let denom = self.reservoir.m + prev.m;
        let mis1 = self.reservoir.m / denom;
        let mis2 = prev.m / denom;
        let weight1 = mis1 * self.target_pdf * self.reservoir.contribution_weight();
        let weight2 = mis2 * shifted_target_pdf * prev.contribution_weight();
        self.resample(
            prev.sample,
            shifted_target_pdf,
            weight1,
            weight2,
            prev.visibility,
            prev.m,
        );
    }

    /// Talbot MIS merge for reuse across significantly different domains;
    /// collapses to the balance heuristic when both shading points
    /// coincide.
    pub fn merge_talbot(&mut self, prev: &Reservoir, pdfs: TalbotPdfs) {
        if prev.m <= 0.0 {
            return;
        }
        let m1 = self.reservoir.m;
        let m2 = prev.m;
        let denom1 = m1 * pdfs.pdf11 + m2 * pdfs.pdf21;
        let denom2 = m1 * pdfs.pdf12 + m2 * pdfs.pdf22;
        let mis1 = if denom1 > 0.0 { m1 * pdfs.pdf11 / denom1 } else { 0.0 };
        let mis2 = if denom2 > 0.0 { m2 * pdfs.pdf22 / denom2 } else { 0.0 };
        let weight1 = mis1 * pdfs.pdf11 * self.reservoir.contribution_weight();
        let weight2 = mis2 * pdfs.pdf12 * prev.contribution_weight();
        self.resample(
            prev.sample,
            pdfs.pdf12,
            weight1,
            weight2,
            prev.visibility,
            prev.m,
        );
    }

    pub fn finish(self) -> Reservoir {
        self.reservoir
    }

    fn resample(
        &mut self,
        sample: LightSample,
        sample_target_pdf: f32,
        weight1: f32,
        weight2: f32,
        sample_visibility: f32,
        sample_m: f32,
    ) {
        let weight_sum = weight1 + weight2;
        self.reservoir.m += sample_m;
        if weight_sum <= 0.0 {
            // zero weight sums carry no information; the reservoir keeps
            // whatever it held, invalid reservoirs stay invalid
            return;
        }
        if self.rng.gen::<f32>() * weight_sum < weight2 {
            self.reservoir.sample = sample;
            self.target_pdf = sample_target_pdf;
        }
        self.reservoir.visibility = (self.reservoir.visibility * weight1
            + sample_visibility * weight2)
            .max(WEIGHT_EPSILON)
            / weight_sum.max(WEIGHT_EPSILON);
        self.reservoir.w = weight_sum / self.target_pdf.max(PDF_EPSILON);
    }
}
