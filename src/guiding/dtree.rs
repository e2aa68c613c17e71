//! The per-spatial-leaf directional distribution: one quadtree root
//! plus the online Adam optimisation of the BSDF/guide mixing
//! weights ("Practical Path Guiding in Production" [Müller 2019],
//! Algorithm 3, via the Adam optimizer [Kingma and Ba 2014]).
//!
//! Recording is lock-free on the quadtree and sample-weight atomics;
//! only the optimiser state sits behind a spin lock held for a few
//! floating-point operations.

// std
use std::io::Write;
use std::sync::Arc;
// others
use byteorder::{LittleEndian, WriteBytesExt};
// pbrt
use crate::core::bsdf::ScatteringMode;
use crate::core::geometry::{Bounds2f, Point2f, Vector2f, Vector3f};
use crate::core::gpt::{clamp_t, logistic, Float, INV_4_PI};
use crate::core::parallel::{AtomicFloat, SpinLock};
use crate::core::sampler::SamplingContext;
use crate::core::sampling::{
    cartesian_to_cylindrical, cylindrical_to_cartesian, uniform_sample_sphere,
    uniform_sphere_pdf,
};
use crate::guiding::params::{BsdfSamplingFractionMode, DirectionalFilter, GPTParameters, GuidedBounceMode};
use crate::guiding::proxy::RadianceProxy;
use crate::guiding::quadtree::{FlatQuadTreeNode, QuadTreeNode};
use crate::guiding::{
    BETA_1, BETA_2, DTREE_GLOSSY_AREA_FRACTION, DTREE_GLOSSY_ENERGY_THRESHOLD,
    OPTIMIZATION_EPSILON, REGULARIZATION,
};

/// Which guided distribution produced a sample; routes the Adam
/// update to the matching mixing weight.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GuidingMethod {
    PathGuiding,
    ProductGuiding,
}

/// One radiance record splatted into a D-tree.
#[derive(Debug, Copy, Clone)]
pub struct DTreeRecord {
    pub direction: Vector3f,
    pub radiance: Float,
    /// The full mixture pdf the direction was sampled with.
    pub wi_pdf: Float,
    pub bsdf_pdf: Float,
    pub d_tree_pdf: Float,
    pub product_pdf: Float,
    pub sample_weight: Float,
    /// radiance times BSDF magnitude, the Adam gradient weight.
    pub product: Float,
    pub is_delta: bool,
    pub guiding_method: GuidingMethod,
}

/// A direction drawn from a D-tree, with its solid-angle pdf and the
/// scattering mode the tree currently represents.
#[derive(Debug, Default, Copy, Clone)]
pub struct DTreeSample {
    pub direction: Vector3f,
    pub pdf: Float,
    pub scattering_mode: ScatteringMode,
}

/// Adam state for the scalar BSDF-sampling-fraction logit.
#[derive(Debug, Default, Copy, Clone)]
struct SamplingFractionOptimizer {
    step_count: i32,
    first_moment: Float,
    second_moment: Float,
    theta: Float,
}

impl SamplingFractionOptimizer {
    fn reset(&mut self) {
        *self = SamplingFractionOptimizer::default();
    }
    fn adam_step(&mut self, gradient: Float, learning_rate: Float) {
        self.step_count += 1;
        let debiased_learning_rate: Float = learning_rate
            * (1.0 as Float - BETA_2.powi(self.step_count)).sqrt()
            / (1.0 as Float - BETA_1.powi(self.step_count));
        self.first_moment = BETA_1 * self.first_moment + (1.0 as Float - BETA_1) * gradient;
        self.second_moment =
            BETA_2 * self.second_moment + (1.0 as Float - BETA_2) * gradient * gradient;
        self.theta -= debiased_learning_rate * self.first_moment
            / (self.second_moment.sqrt() + OPTIMIZATION_EPSILON);
        self.theta = clamp_t(self.theta, -20.0, 20.0);
    }
}

/// Adam state for the two product-guiding logits (BSDF fraction and
/// D-tree/proxy balance).
#[derive(Debug, Default, Copy, Clone)]
struct ProductSamplingFractionOptimizer {
    step_count: i32,
    first_moment: [Float; 2],
    second_moment: [Float; 2],
    theta: [Float; 2],
}

impl ProductSamplingFractionOptimizer {
    fn reset(&mut self) {
        *self = ProductSamplingFractionOptimizer::default();
    }
    fn adam_step(&mut self, gradient: [Float; 2], learning_rate: Float) {
        self.step_count += 1;
        let debiased_learning_rate: Float = learning_rate
            * (1.0 as Float - BETA_2.powi(self.step_count)).sqrt()
            / (1.0 as Float - BETA_1.powi(self.step_count));
        for i in 0..2 {
            self.first_moment[i] =
                BETA_1 * self.first_moment[i] + (1.0 as Float - BETA_1) * gradient[i];
            self.second_moment[i] = BETA_2 * self.second_moment[i]
                + (1.0 as Float - BETA_2) * gradient[i] * gradient[i];
            self.theta[i] -= debiased_learning_rate * self.first_moment[i]
                / (self.second_moment[i].sqrt() + OPTIMIZATION_EPSILON);
            self.theta[i] = clamp_t(self.theta[i], -20.0, 20.0);
        }
    }
}

#[derive(Debug)]
pub struct DTree {
    parameters: Arc<GPTParameters>,
    root_node: QuadTreeNode,
    current_sample_weight: AtomicFloat,
    previous_sample_weight: Float,
    optimizer: SpinLock<SamplingFractionOptimizer>,
    product_optimizer: SpinLock<ProductSamplingFractionOptimizer>,
    radiance_proxy: RadianceProxy,
    is_built: bool,
    scattering_mode: ScatteringMode,
}

impl Clone for DTree {
    fn clone(&self) -> Self {
        DTree {
            parameters: self.parameters.clone(),
            root_node: self.root_node.clone(),
            current_sample_weight: self.current_sample_weight.clone(),
            previous_sample_weight: self.previous_sample_weight,
            optimizer: SpinLock::new(*self.optimizer.lock()),
            product_optimizer: SpinLock::new(*self.product_optimizer.lock()),
            radiance_proxy: self.radiance_proxy.clone(),
            is_built: self.is_built,
            scattering_mode: self.scattering_mode,
        }
    }
}

impl DTree {
    pub fn new(parameters: Arc<GPTParameters>) -> Self {
        DTree {
            parameters,
            root_node: QuadTreeNode::new(true, 0.0),
            current_sample_weight: AtomicFloat::new(0.0),
            previous_sample_weight: 0.0,
            optimizer: SpinLock::new(SamplingFractionOptimizer::default()),
            product_optimizer: SpinLock::new(ProductSamplingFractionOptimizer::default()),
            radiance_proxy: RadianceProxy::new(),
            is_built: false,
            scattering_mode: ScatteringMode::Diffuse,
        }
    }
    pub fn record(&self, d_tree_record: &DTreeRecord) {
        if self.parameters.bsdf_sampling_fraction_mode == BsdfSamplingFractionMode::Learn
            && self.is_built
            && d_tree_record.product > 0.0 as Float
        {
            match d_tree_record.guiding_method {
                GuidingMethod::PathGuiding => self.optimization_step(d_tree_record),
                GuidingMethod::ProductGuiding => self.optimization_step_product(d_tree_record),
            }
        }
        if d_tree_record.is_delta || d_tree_record.wi_pdf <= 0.0 as Float {
            return;
        }
        self.current_sample_weight.add(d_tree_record.sample_weight);
        let radiance: Float =
            d_tree_record.radiance / d_tree_record.wi_pdf * d_tree_record.sample_weight;
        let mut direction: Point2f = cartesian_to_cylindrical(&d_tree_record.direction);
        match self.parameters.directional_filter {
            DirectionalFilter::Nearest => {
                self.root_node.add_radiance(&mut direction, radiance);
            }
            DirectionalFilter::Box => {
                // splat over the footprint of the leaf under the
                // direction
                let leaf_depth: usize = self.depth(&direction);
                let leaf_size: Float = (0.25 as Float).powi(leaf_depth as i32 - 1);
                let node_aabb: Bounds2f = Bounds2f {
                    p_min: Point2f::new(0.0, 0.0),
                    p_max: Point2f::new(1.0, 1.0),
                };
                let half: Vector2f = Vector2f::new(0.5 * leaf_size, 0.5 * leaf_size);
                let splat_aabb: Bounds2f = Bounds2f {
                    p_min: direction - half,
                    p_max: direction + half,
                };
                if !splat_aabb.is_valid() {
                    return;
                }
                self.root_node
                    .add_radiance_box(&splat_aabb, &node_aabb, radiance / splat_aabb.area());
            }
        }
    }
    pub fn sample(&self, sampling_context: &mut SamplingContext, modes: u8) -> DTreeSample {
        let mut d_tree_sample: DTreeSample = DTreeSample::default();
        if modes & self.scattering_mode as u8 == 0_u8 {
            d_tree_sample.scattering_mode = ScatteringMode::None;
            d_tree_sample.pdf = 0.0;
            return d_tree_sample;
        }
        sampling_context.split_in_place(2, 1);
        let mut s: Point2f = sampling_context.next_2d();
        if self.previous_sample_weight <= 0.0 as Float
            || self.root_node.radiance_sum() <= 0.0 as Float
        {
            d_tree_sample.direction = uniform_sample_sphere(&s);
            d_tree_sample.pdf = uniform_sphere_pdf();
            d_tree_sample.scattering_mode = ScatteringMode::Diffuse;
        } else {
            let mut pdf: Float = 0.0;
            let direction: Point2f = self.root_node.sample(&mut s, &mut pdf);
            d_tree_sample.pdf = pdf * INV_4_PI;
            d_tree_sample.direction = cylindrical_to_cartesian(&direction);
            d_tree_sample.scattering_mode = self.scattering_mode;
        }
        d_tree_sample
    }
    pub fn pdf(&self, direction: &Vector3f, modes: u8) -> Float {
        if modes & self.scattering_mode as u8 == 0_u8 {
            return 0.0 as Float;
        }
        if self.previous_sample_weight <= 0.0 as Float
            || self.root_node.radiance_sum() <= 0.0 as Float
        {
            return uniform_sphere_pdf();
        }
        let mut dir: Point2f = cartesian_to_cylindrical(direction);
        self.root_node.pdf(&mut dir) * INV_4_PI
    }
    /// Dilutes the statistics collected so far; called when the
    /// owning spatial leaf splits and this tree is duplicated into
    /// both halves.
    pub fn halve_sample_weight(&self) {
        self.current_sample_weight
            .store(0.5 as Float * self.current_sample_weight.load());
    }
    pub fn node_count(&self) -> usize {
        self.root_node.node_count()
    }
    pub fn max_depth(&self) -> usize {
        self.root_node.max_depth()
    }
    /// Depth of the quadtree leaf under a cylindrical direction.
    pub fn depth(&self, direction: &Point2f) -> usize {
        let mut local_direction: Point2f = *direction;
        self.root_node.depth_at(&mut local_direction)
    }
    pub fn scattering_mode(&self) -> ScatteringMode {
        self.scattering_mode
    }
    pub fn is_built(&self) -> bool {
        self.is_built
    }
    /// Publish the sums collected during the pass; a barrier
    /// separates this from any concurrent recording.
    pub fn build(&mut self) {
        self.previous_sample_weight = self.current_sample_weight.load();
        self.root_node.build_sums();
    }
    /// Adapt the quadtree to the published sums, classify the
    /// distribution, and rebuild the radiance proxy.
    pub fn restructure(&mut self, subdiv_threshold: Float) {
        self.is_built = true;
        self.current_sample_weight.store(0.0);
        self.radiance_proxy.invalidate();
        let radiance_sum: Float = self.root_node.radiance_sum();

        // Reset D-trees that did not collect radiance.
        if radiance_sum <= 0.0 as Float {
            self.root_node.reset();
            self.scattering_mode = ScatteringMode::Diffuse;
            self.optimizer.lock().reset();
            self.product_optimizer.lock().reset();
            return;
        }

        let mut sorted_energy_ratios: Vec<(Float, Float)> = Vec::new();
        let collect_ratios: bool =
            self.parameters.guided_bounce_mode == GuidedBounceMode::Learn;
        self.root_node.restructure(
            radiance_sum,
            subdiv_threshold,
            if collect_ratios {
                Some(&mut sorted_energy_ratios)
            } else {
                None
            },
            1,
        );

        // Decide what scattering mode directions sampled from this
        // D-tree should report: if a significant share of the energy
        // sits in a small set of directions, bounces behave glossy.
        if collect_ratios {
            let mut area_fraction_sum: Float = 0.0;
            let mut energy_fraction_sum: Float = 0.0;
            let mut is_glossy: bool = false;
            for (area, energy) in sorted_energy_ratios.iter() {
                if area_fraction_sum + area >= DTREE_GLOSSY_AREA_FRACTION {
                    break;
                }
                area_fraction_sum += area;
                energy_fraction_sum += energy;
                if energy_fraction_sum > DTREE_GLOSSY_ENERGY_THRESHOLD {
                    is_glossy = true;
                    break;
                }
            }
            self.scattering_mode = if is_glossy {
                ScatteringMode::Glossy
            } else {
                ScatteringMode::Diffuse
            };
        }

        self.radiance_proxy
            .build(&self.root_node, INV_4_PI / self.previous_sample_weight);
    }
    pub fn sample_weight(&self) -> Float {
        self.current_sample_weight.load()
    }
    /// Mean incident radiance over the sphere.
    pub fn mean(&self) -> Float {
        if self.previous_sample_weight <= 0.0 as Float {
            return 0.0 as Float;
        }
        self.root_node.radiance_sum() * (1.0 as Float / self.previous_sample_weight) * INV_4_PI
    }
    /// Estimated incident radiance from `direction`.
    pub fn radiance(&self, direction: &Vector3f) -> Float {
        if self.root_node.radiance_sum() <= 0.0 as Float
            || self.previous_sample_weight <= 0.0 as Float
        {
            return 0.0 as Float;
        }
        let mut cylindrical_direction: Point2f = cartesian_to_cylindrical(direction);
        self.root_node.radiance(&mut cylindrical_direction)
            * (INV_4_PI / self.previous_sample_weight)
    }
    pub fn bsdf_sampling_fraction(&self) -> Float {
        if self.parameters.bsdf_sampling_fraction_mode == BsdfSamplingFractionMode::Learn {
            logistic(self.optimizer.lock().theta)
        } else {
            self.parameters.fixed_bsdf_sampling_fraction
        }
    }
    pub fn bsdf_sampling_fraction_product(&self) -> Vector2f {
        if self.parameters.bsdf_sampling_fraction_mode == BsdfSamplingFractionMode::Learn {
            let theta: [Float; 2] = self.product_optimizer.lock().theta;
            Vector2f {
                x: logistic(theta[0]),
                y: logistic(theta[1]),
            }
        } else {
            // TODO: expose the fixed product-mix fractions as
            // parameters
            Vector2f { x: 0.33333, y: 0.5 }
        }
    }
    pub fn radiance_proxy(&self) -> &RadianceProxy {
        &self.radiance_proxy
    }
    fn optimization_step(&self, d_tree_record: &DTreeRecord) {
        let mut optimizer = self.optimizer.lock();
        let sampling_fraction: Float = logistic(optimizer.theta);
        let combined_pdf: Float = sampling_fraction * d_tree_record.bsdf_pdf
            + (1.0 as Float - sampling_fraction) * d_tree_record.d_tree_pdf;
        let d_sampling_fraction: Float = -d_tree_record.product
            * (d_tree_record.bsdf_pdf - d_tree_record.d_tree_pdf)
            / (d_tree_record.wi_pdf * combined_pdf);
        let d_theta: Float =
            d_sampling_fraction * sampling_fraction * (1.0 as Float - sampling_fraction);
        let reg_gradient: Float = optimizer.theta * REGULARIZATION;
        let gradient: Float = (d_theta + reg_gradient) * d_tree_record.sample_weight;
        if !gradient.is_finite() {
            return;
        }
        optimizer.adam_step(gradient, self.parameters.learning_rate);
    }
    fn optimization_step_product(&self, d_tree_record: &DTreeRecord) {
        let mut optimizer = self.product_optimizer.lock();
        let sampling_fraction: [Float; 2] = [
            logistic(optimizer.theta[0]),
            logistic(optimizer.theta[1]),
        ];
        let guided_mix_pdf: Float = sampling_fraction[1] * d_tree_record.d_tree_pdf
            + (1.0 as Float - sampling_fraction[1]) * d_tree_record.product_pdf;
        let combined_pdf: Float = sampling_fraction[0] * d_tree_record.bsdf_pdf
            + (1.0 as Float - sampling_fraction[0]) * guided_mix_pdf;
        let common_factor: Float =
            -d_tree_record.product / (d_tree_record.wi_pdf * combined_pdf);
        let d_sampling_fraction: [Float; 2] = [
            common_factor * (d_tree_record.bsdf_pdf - guided_mix_pdf),
            common_factor
                * (1.0 as Float - sampling_fraction[0])
                * (d_tree_record.product_pdf - d_tree_record.d_tree_pdf),
        ];
        let mut gradient: [Float; 2] = [0.0 as Float; 2];
        for i in 0..2 {
            let d_theta: Float =
                d_sampling_fraction[i] * sampling_fraction[i] * (1.0 as Float - sampling_fraction[i]);
            let reg_gradient: Float = optimizer.theta[i] * REGULARIZATION;
            gradient[i] = (d_theta + reg_gradient) * d_tree_record.sample_weight;
            if !gradient[i].is_finite() {
                return;
            }
        }
        optimizer.adam_step(gradient, self.parameters.learning_rate);
    }
    /// Serialize the tree in the visualizer snapshot form: mean,
    /// sample weight, and the flattened node list.
    pub fn write_to_disk<W: Write>(&self, os: &mut W) -> std::io::Result<()> {
        let mut nodes: Vec<FlatQuadTreeNode> = Vec::new();
        self.root_node.flatten(&mut nodes);
        os.write_f32::<LittleEndian>(self.mean())?;
        os.write_u64::<LittleEndian>(self.sample_weight() as u64)?;
        os.write_u64::<LittleEndian>(nodes.len() as u64)?;
        for node in &nodes {
            for i in 0..4 {
                os.write_f32::<LittleEndian>(node.sums[i])?;
                os.write_u16::<LittleEndian>(node.children[i])?;
            }
        }
        Ok(())
    }
}
