//! Pass scheduling for guided rendering: iterations of doubling
//! length train the SD-tree, an extrapolated-variance test decides
//! when training stops paying off, and the final image can be an
//! inverse-variance-weighted combination of the last iterations.

// std
use std::collections::VecDeque;
use std::sync::Arc;
// others
use log::info;
// pbrt
use crate::core::camera::Camera;
use crate::core::film::{Frame, Image, VarianceTrackingFilm};
use crate::core::gpt::Float;
use crate::core::parallel::AbortSwitch;
use crate::guiding::params::{GPTParameters, IterationProgression};
use crate::guiding::stree::STree;

pub const IMAGE_BUFFER_CAPACITY: usize = 4;

/// Below this many samples the variance estimate is too noisy to act
/// on.
const MIN_SAMPLES_FOR_EXTRAPOLATION: usize = 256;

pub struct GPTPassCallback {
    parameters: Arc<GPTParameters>,
    iter: usize,
    max_passes: usize,
    passes_rendered: usize,
    passes_left_curr_iter: usize,
    num_passes_curr_iter: usize,
    remaining_passes: usize,
    last_extrapolated_variance: Float,
    is_final_iter: bool,
    var_increase: bool,
    image_buffer: VecDeque<Image>,
    inverse_variance_buffer: VecDeque<Float>,
}

impl GPTPassCallback {
    pub fn new(parameters: Arc<GPTParameters>, sample_budget: usize, max_passes: usize) -> Self {
        let mut passes: usize = sample_budget / parameters.samples_per_pass;
        if passes > max_passes {
            passes = max_passes;
        }
        GPTPassCallback {
            parameters,
            iter: 0,
            max_passes: passes,
            passes_rendered: 0,
            passes_left_curr_iter: 0,
            num_passes_curr_iter: 0,
            remaining_passes: passes,
            last_extrapolated_variance: Float::INFINITY,
            is_final_iter: false,
            var_increase: false,
            image_buffer: VecDeque::new(),
            inverse_variance_buffer: VecDeque::new(),
        }
    }
    pub fn max_passes(&self) -> usize {
        self.max_passes
    }
    /// Start-of-pass barrier hook. On iteration boundaries this
    /// rebuilds the SD-tree (exclusive access enforced by the `&mut`
    /// borrow), clears the training framebuffer, and decides whether
    /// the upcoming iteration is the final one.
    pub fn on_pass_begin(&mut self, sd_tree: &mut STree, framebuffer: &mut VarianceTrackingFilm) {
        if self.passes_left_curr_iter > 0 {
            return;
        }

        // New iteration.
        self.num_passes_curr_iter = (1_usize << self.iter).min(self.remaining_passes);
        self.passes_left_curr_iter = self.num_passes_curr_iter;

        // If less than two more iterations of this length would fit
        // into the budget, this iteration takes all of it.
        if self.is_final_iter
            || self.remaining_passes - self.passes_left_curr_iter < 2 * self.passes_left_curr_iter
        {
            self.passes_left_curr_iter = self.remaining_passes;
            self.is_final_iter = true;
            sd_tree.start_final_iteration();
        }

        if !self.var_increase && self.iter > 0 {
            framebuffer.clear();
            sd_tree.build(self.iter);
        }

        self.iter += 1;
    }
    /// End-of-pass barrier hook; returns true when rendering is
    /// finished (budget exhausted or aborted).
    pub fn on_pass_end(
        &mut self,
        frame: &mut Frame,
        framebuffer: &VarianceTrackingFilm,
        sd_tree: &STree,
        camera: Option<&dyn Camera>,
        abort_switch: &AbortSwitch,
    ) -> bool {
        self.passes_rendered += 1;
        self.passes_left_curr_iter -= 1;
        self.remaining_passes -= 1;

        if self.passes_rendered >= self.max_passes || abort_switch.is_aborted() {
            let variance: Float = framebuffer.variance();
            info!("Final iteration variance estimate: {:.7}", variance);
            if self.parameters.iteration_progression == IterationProgression::Combine {
                self.image_to_buffer(frame.image().clone(), 1.0 as Float / variance);
                self.combine_iterations(frame);
            }
            if let Some(camera) = camera {
                sd_tree.write_to_disk(self.iter, false, camera);
            }
            return true;
        }

        if self.passes_left_curr_iter == 0 {
            // Update the variance projection.
            let remaining_passes_at_curr_iter_start: usize =
                self.remaining_passes + self.num_passes_curr_iter;
            let samples_rendered: usize = self.passes_rendered * self.parameters.samples_per_pass;
            let variance: Float = framebuffer.variance();
            let current_extrapolated_variance: Float = variance * self.num_passes_curr_iter as Float
                / remaining_passes_at_curr_iter_start as Float;

            info!("Variance: {:.7}", variance);
            info!(
                "Extrapolated variance: previous {:.7}, current {:.7}",
                self.last_extrapolated_variance, current_extrapolated_variance
            );

            if self.parameters.iteration_progression == IterationProgression::Automatic
                && samples_rendered > MIN_SAMPLES_FOR_EXTRAPOLATION
                && current_extrapolated_variance > self.last_extrapolated_variance
            {
                info!("Extrapolated variance is increasing, initiating final iteration");
                self.var_increase = true;
                self.is_final_iter = true;
            }

            self.last_extrapolated_variance = current_extrapolated_variance;

            if self.parameters.iteration_progression == IterationProgression::Combine {
                self.image_to_buffer(frame.image().clone(), 1.0 as Float / variance);
            }
            if let Some(camera) = camera {
                sd_tree.write_to_disk(self.iter, true, camera);
            }
        }

        false
    }
    /// Stash a rendered iteration and its weight, keeping only the
    /// most recent `IMAGE_BUFFER_CAPACITY` entries.
    fn image_to_buffer(&mut self, image: Image, inverse_variance: Float) {
        if self.image_buffer.len() == IMAGE_BUFFER_CAPACITY {
            self.image_buffer.pop_front();
            self.inverse_variance_buffer.pop_front();
        }
        self.image_buffer.push_back(image);
        self.inverse_variance_buffer.push_back(inverse_variance);
    }
    /// Blend the stashed iterations into the frame, each weighted by
    /// its normalised inverse variance.
    fn combine_iterations(&mut self, frame: &mut Frame) {
        let total_inverse_variance: Float = self.inverse_variance_buffer.iter().sum();
        let width: usize = frame.image().width;
        let height: usize = frame.image().height;
        for y in 0..height {
            for x in 0..width {
                let mut final_color: [Float; 4] = [0.0 as Float; 4];
                for (image, inverse_variance) in self
                    .image_buffer
                    .iter()
                    .zip(self.inverse_variance_buffer.iter())
                {
                    let color: [Float; 4] = image.get_pixel(x, y);
                    let weight: Float = inverse_variance / total_inverse_variance;
                    for c in 0..4 {
                        final_color[c] += color[c] * weight;
                    }
                }
                frame.image_mut().set_pixel(x, y, final_color);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::film::ShadingResult;
    use crate::core::geometry::{Bounds3f, Point3f};
    use crate::guiding::params::SpatialFilter;

    fn test_parameters(progression: IterationProgression) -> Arc<GPTParameters> {
        Arc::new(GPTParameters {
            spatial_filter: SpatialFilter::Nearest,
            samples_per_pass: 64,
            iteration_progression: progression,
            ..GPTParameters::default()
        })
    }

    fn test_s_tree(parameters: Arc<GPTParameters>) -> STree {
        STree::new(
            Bounds3f::new(Point3f::new(0.0, 0.0, 0.0), Point3f::new(1.0, 1.0, 1.0)),
            parameters,
        )
    }

    /// Two samples with a fixed spread give the framebuffer a known,
    /// constant variance.
    fn fill_constant_variance(framebuffer: &mut VarianceTrackingFilm) {
        framebuffer.clear();
        framebuffer.add(0, 0, &ShadingResult::new([0.0, 0.0, 0.0, 1.0]));
        framebuffer.add(0, 0, &ShadingResult::new([2.0, 2.0, 2.0, 1.0]));
    }

    #[test]
    fn rising_extrapolated_variance_triggers_the_final_iteration() {
        let parameters = test_parameters(IterationProgression::Automatic);
        // budget of exactly 32 passes
        let mut callback: GPTPassCallback = GPTPassCallback::new(parameters.clone(), 32 * 64, 9999);
        assert_eq!(callback.max_passes(), 32);
        let mut sd_tree: STree = test_s_tree(parameters);
        let mut framebuffer: VarianceTrackingFilm = VarianceTrackingFilm::new(1, 1, 0);
        let mut frame: Frame = Frame::new(1, 1);
        let abort_switch: AbortSwitch = AbortSwitch::new();

        let mut finished_at: Option<usize> = None;
        let mut final_iteration_started_at: Option<usize> = None;
        for pass in 1..=64 {
            callback.on_pass_begin(&mut sd_tree, &mut framebuffer);
            if sd_tree.is_final_iteration() && final_iteration_started_at.is_none() {
                final_iteration_started_at = Some(pass);
            }
            // a constant per-iteration variance makes the
            // extrapolated value grow with iteration length
            fill_constant_variance(&mut framebuffer);
            if callback.on_pass_end(&mut frame, &framebuffer, &sd_tree, None, &abort_switch) {
                finished_at = Some(pass);
                break;
            }
        }
        // the variance rise is detected at the end of pass 7 (the end
        // of the 4-pass iteration, the first boundary past 256
        // samples), so pass 8 opens the absorbing final iteration
        assert_eq!(final_iteration_started_at, Some(8));
        assert!(callback.var_increase);
        // and the final iteration swallows the remaining budget
        assert_eq!(finished_at, Some(32));
    }

    #[test]
    fn abort_switch_finishes_early() {
        let parameters = test_parameters(IterationProgression::Automatic);
        let mut callback: GPTPassCallback = GPTPassCallback::new(parameters.clone(), 32 * 64, 9999);
        let mut sd_tree: STree = test_s_tree(parameters);
        let mut framebuffer: VarianceTrackingFilm = VarianceTrackingFilm::new(1, 1, 0);
        let mut frame: Frame = Frame::new(1, 1);
        let abort_switch: AbortSwitch = AbortSwitch::new();
        callback.on_pass_begin(&mut sd_tree, &mut framebuffer);
        fill_constant_variance(&mut framebuffer);
        abort_switch.abort();
        assert!(callback.on_pass_end(&mut frame, &framebuffer, &sd_tree, None, &abort_switch));
    }

    #[test]
    fn combine_weights_images_by_inverse_variance() {
        let parameters = test_parameters(IterationProgression::Combine);
        let mut callback: GPTPassCallback = GPTPassCallback::new(parameters, 4 * 64, 9999);
        let mut bright: Image = Image::new(1, 1);
        bright.set_pixel(0, 0, [4.0, 4.0, 4.0, 1.0]);
        let mut dark: Image = Image::new(1, 1);
        dark.set_pixel(0, 0, [1.0, 1.0, 1.0, 1.0]);
        // the noisier (bright) image gets a quarter of the weight
        callback.image_to_buffer(bright, 1.0);
        callback.image_to_buffer(dark, 3.0);
        let mut frame: Frame = Frame::new(1, 1);
        callback.combine_iterations(&mut frame);
        let combined: [Float; 4] = frame.image().get_pixel(0, 0);
        assert!((combined[0] - (4.0 * 0.25 + 1.0 * 0.75)).abs() < 1e-5);
    }

    #[test]
    fn image_ring_is_bounded() {
        let parameters = test_parameters(IterationProgression::Combine);
        let mut callback: GPTPassCallback = GPTPassCallback::new(parameters, 4 * 64, 9999);
        for i in 0..6 {
            callback.image_to_buffer(Image::new(1, 1), i as Float + 1.0);
        }
        assert_eq!(callback.image_buffer.len(), IMAGE_BUFFER_CAPACITY);
        assert_eq!(callback.inverse_variance_buffer.front(), Some(&3.0));
    }
}
