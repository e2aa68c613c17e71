//! The **SamplingContext** is the stream of uniform variates a single
//! path consumes. The guiding structure announces upcoming draws via
//! `split_in_place` (so a stratifying backend could allot dimensions)
//! and pulls one, two or three i.i.d. uniforms at a time.

// pbrt
use crate::core::geometry::{Point2f, Vector3f};
use crate::core::gpt::Float;
use crate::core::rng::Rng;

// see sampler.h

#[derive(Debug, Copy, Clone)]
pub struct SamplingContext {
    rng: Rng,
    dimension: u32,
}

impl SamplingContext {
    pub fn new(seed: u64) -> Self {
        let mut rng: Rng = Rng::new();
        rng.set_sequence(seed);
        SamplingContext { rng, dimension: 0 }
    }
    /// Announce the next `n_samples` draws of `n_dims` dimensions
    /// each. The independent backend only advances its dimension
    /// counter; the variates themselves stay i.i.d.
    pub fn split_in_place(&mut self, n_dims: u32, n_samples: u32) {
        self.dimension += n_dims * n_samples;
    }
    /// Number of dimensions announced so far.
    pub fn dimension(&self) -> u32 {
        self.dimension
    }
    pub fn next_1d(&mut self) -> Float {
        self.rng.uniform_float()
    }
    pub fn next_2d(&mut self) -> Point2f {
        // the x dimension must be drawn before y
        let x: Float = self.rng.uniform_float();
        let y: Float = self.rng.uniform_float();
        Point2f { x, y }
    }
    pub fn next_3d(&mut self) -> Vector3f {
        let x: Float = self.rng.uniform_float();
        let y: Float = self.rng.uniform_float();
        let z: Float = self.rng.uniform_float();
        Vector3f { x, y, z }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn draws_are_uniform_in_expectation() {
        let mut sc: SamplingContext = SamplingContext::new(3);
        let n: usize = 100_000;
        let mut sum: Float = 0.0;
        for _ in 0..n {
            sc.split_in_place(1, 1);
            sum += sc.next_1d();
        }
        let mean: Float = sum / n as Float;
        assert!((mean - 0.5).abs() < 0.01, "mean = {:?}", mean);
        assert_eq!(sc.dimension(), n as u32);
    }
}
