//! Configuration of the guided path tracer. Unknown option names fall
//! back to the default with a logged warning instead of failing the
//! render.

// std
use std::path::PathBuf;
// others
use log::warn;
// pbrt
use crate::core::gpt::Float;

/// How a record is distributed over the spatial tree.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpatialFilter {
    Nearest,
    Stochastic,
    Box,
}

impl SpatialFilter {
    pub fn from_name(name: &str) -> SpatialFilter {
        match name {
            "nearest" => SpatialFilter::Nearest,
            "stochastic" => SpatialFilter::Stochastic,
            "box" => SpatialFilter::Box,
            _ => {
                warn!(
                    "Spatial filter \"{}\" unknown. Using \"stochastic\".",
                    name
                );
                SpatialFilter::Stochastic
            }
        }
    }
}

/// How a record is distributed over a directional quadtree.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DirectionalFilter {
    Nearest,
    Box,
}

impl DirectionalFilter {
    pub fn from_name(name: &str) -> DirectionalFilter {
        match name {
            "nearest" => DirectionalFilter::Nearest,
            "box" => DirectionalFilter::Box,
            _ => {
                warn!("Directional filter \"{}\" unknown. Using \"box\".", name);
                DirectionalFilter::Box
            }
        }
    }
}

/// Whether the BSDF sampling fraction is optimised online or fixed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BsdfSamplingFractionMode {
    Learn,
    Fixed,
}

impl BsdfSamplingFractionMode {
    pub fn from_name(name: &str) -> BsdfSamplingFractionMode {
        match name {
            "learn" => BsdfSamplingFractionMode::Learn,
            "fixed" => BsdfSamplingFractionMode::Fixed,
            _ => {
                warn!(
                    "BSDF sampling fraction mode \"{}\" unknown. Using \"learn\".",
                    name
                );
                BsdfSamplingFractionMode::Learn
            }
        }
    }
}

/// Which guided distributions participate in the mixture.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GuidingMode {
    PathGuiding,
    ProductGuiding,
    Combined,
}

impl GuidingMode {
    pub fn from_name(name: &str) -> GuidingMode {
        match name {
            "pathguiding" => GuidingMode::PathGuiding,
            "productguiding" => GuidingMode::ProductGuiding,
            "combined" => GuidingMode::Combined,
            _ => {
                warn!("Guiding mode \"{}\" unknown. Using \"pathguiding\".", name);
                GuidingMode::PathGuiding
            }
        }
    }
}

/// How the scattering mode of a guided bounce is reported to the
/// host.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GuidedBounceMode {
    Learn,
    StrictlyDiffuse,
    StrictlyGlossy,
    PreferDiffuse,
    PreferGlossy,
}

impl GuidedBounceMode {
    pub fn from_name(name: &str) -> GuidedBounceMode {
        match name {
            "learn" => GuidedBounceMode::Learn,
            "strictly_diffuse" => GuidedBounceMode::StrictlyDiffuse,
            "strictly_glossy" => GuidedBounceMode::StrictlyGlossy,
            "prefer_diffuse" => GuidedBounceMode::PreferDiffuse,
            "prefer_glossy" => GuidedBounceMode::PreferGlossy,
            _ => {
                warn!(
                    "Guided bounce mode \"{}\" unknown. Using \"learn\".",
                    name
                );
                GuidedBounceMode::Learn
            }
        }
    }
}

/// How training iterations are turned into the final image.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IterationProgression {
    Automatic,
    Combine,
}

impl IterationProgression {
    pub fn from_name(name: &str) -> IterationProgression {
        match name {
            "automatic" => IterationProgression::Automatic,
            "combine" => IterationProgression::Combine,
            _ => {
                warn!(
                    "Iteration progression \"{}\" unknown. Using \"automatic\".",
                    name
                );
                IterationProgression::Automatic
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GPTParameters {
    pub spatial_filter: SpatialFilter,
    pub directional_filter: DirectionalFilter,
    pub bsdf_sampling_fraction_mode: BsdfSamplingFractionMode,
    pub fixed_bsdf_sampling_fraction: Float,
    pub guiding_mode: GuidingMode,
    pub guided_bounce_mode: GuidedBounceMode,
    pub iteration_progression: IterationProgression,
    pub samples_per_pass: usize,
    pub learning_rate: Float,
    /// Where to write `.sdt` snapshots; None disables them.
    pub save_path: Option<PathBuf>,
}

impl Default for GPTParameters {
    fn default() -> Self {
        GPTParameters {
            spatial_filter: SpatialFilter::Stochastic,
            directional_filter: DirectionalFilter::Box,
            bsdf_sampling_fraction_mode: BsdfSamplingFractionMode::Learn,
            fixed_bsdf_sampling_fraction: 0.5,
            guiding_mode: GuidingMode::PathGuiding,
            guided_bounce_mode: GuidedBounceMode::Learn,
            iteration_progression: IterationProgression::Automatic,
            samples_per_pass: 4,
            learning_rate: 0.01,
            save_path: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_names_fall_back_to_defaults() {
        assert_eq!(
            SpatialFilter::from_name("voronoi"),
            SpatialFilter::Stochastic
        );
        assert_eq!(DirectionalFilter::from_name("box"), DirectionalFilter::Box);
        assert_eq!(GuidingMode::from_name("combined"), GuidingMode::Combined);
        assert_eq!(
            GuidedBounceMode::from_name("prefer_glossy"),
            GuidedBounceMode::PreferGlossy
        );
        assert_eq!(
            IterationProgression::from_name("nonsense"),
            IterationProgression::Automatic
        );
    }
}
