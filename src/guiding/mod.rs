//! SD-tree implementation for "Practical Path Guiding for Efficient
//! Light-Transport Simulation" [Müller et al. 2017] with the product
//! guiding extension: a spatial binary tree over the scene whose
//! leaves carry adaptive directional quadtrees, the guided mixture
//! sampler drawing from them, and the pass controller scheduling the
//! training iterations.

pub mod dtree;
pub mod params;
pub mod passcallback;
pub mod proxy;
pub mod quadtree;
pub mod sampler;
pub mod stree;
pub mod vertex;

use crate::core::gpt::Float;

// TODO: scale the threshold with the spatial filter's footprint
pub const SPATIAL_SUBDIVISION_THRESHOLD: usize = 4000;
pub const DTREE_THRESHOLD: Float = 0.01;
pub const DTREE_MAX_DEPTH: usize = 20;
pub const DTREE_GLOSSY_AREA_FRACTION: Float = 0.1;
pub const DTREE_GLOSSY_ENERGY_THRESHOLD: Float = 0.7;

// Sampling fraction optimization constants.

pub const BETA_1: Float = 0.9;
pub const BETA_2: Float = 0.999;
pub const OPTIMIZATION_EPSILON: Float = 1e-8;
pub const REGULARIZATION: Float = 0.01;
