//! # rs_gpt
//!
//! [Rust][rust] crate implementing the adaptive spatio-directional
//! guiding structure (the **SD-tree**) of "Practical Path Guiding for
//! Efficient Light-Transport Simulation" [Müller et al. 2017][paper]
//! together with its product-guiding extension, as used for guided
//! path tracing inside a host renderer.
//!
//! The host traces rays and owns the scene, the BSDFs, and the frame;
//! this crate owns the guiding state:
//!
//! 1. [`STree`][stree] partitions the scene into spatial leaves.
//! 2. Each leaf's [`DTree`][dtree] learns the incident radiance
//!    distribution and the BSDF/guide mixing weights online.
//! 3. [`PathGuidedSampler`][sampler] draws scattering directions from
//!    the learned mixture at every shading point.
//! 4. [`GPTPassCallback`][callback] schedules training iterations
//!    with exponentially growing pass counts and decides when to stop
//!    training and spend the rest of the budget on the final image.
//!
//! [rust]: https://www.rust-lang.org
//! [paper]: https://tom94.net/data/publications/mueller17practical/mueller17practical.pdf
//! [stree]: crate::guiding::stree::STree
//! [dtree]: crate::guiding::dtree::DTree
//! [sampler]: crate::guiding::sampler::PathGuidedSampler
//! [callback]: crate::guiding::passcallback::GPTPassCallback
pub mod core;
pub mod guiding;
pub mod jobqueue;
