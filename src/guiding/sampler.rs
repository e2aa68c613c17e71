//! The per-shading-point director: draws scattering directions from a
//! mixture of the BSDF, the local D-tree, and (optionally) the
//! BSDF-weighted radiance proxy, and evaluates the matching combined
//! pdf so the caller can keep its estimator unbiased.

// pbrt
use crate::core::bsdf::{Bsdf, BsdfProxy, BsdfSample, LocalGeometry, ScatteringMode};
use crate::core::geometry::{Vector2f, Vector3f};
use crate::core::gpt::{lerp, Float, Spectrum, ONE_MINUS_EPSILON};
use crate::core::sampler::SamplingContext;
use crate::guiding::dtree::{DTree, DTreeSample, GuidingMethod};
use crate::guiding::params::{GuidedBounceMode, GuidingMode};
use crate::guiding::proxy::RadianceProxy;

pub struct PathGuidedSampler<'a> {
    guiding_mode: GuidingMode,
    guided_bounce_mode: GuidedBounceMode,
    d_tree: &'a DTree,
    bsdf: &'a dyn Bsdf,
    bsdf_sampling_modes: u8,
    geometry: LocalGeometry,
    enable_path_guiding: bool,
    enable_product_guiding: bool,
    bsdf_sampling_fraction: Float,
    product_sampling_fraction: Float,
    radiance_proxy: RadianceProxy,
    bsdf_proxy: BsdfProxy,
}

impl<'a> PathGuidedSampler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guiding_mode: GuidingMode,
        allow_path_guiding: bool,
        guided_bounce_mode: GuidedBounceMode,
        d_tree: &'a DTree,
        bsdf: &'a dyn Bsdf,
        bsdf_sampling_modes: u8,
        geometry: LocalGeometry,
        sd_tree_is_built: bool,
    ) -> Self {
        let enable_path_guiding: bool =
            sd_tree_is_built && !bsdf.is_purely_specular() && allow_path_guiding;
        let radiance_proxy: RadianceProxy = d_tree.radiance_proxy().clone();
        let mut bsdf_proxy: BsdfProxy = BsdfProxy::new();

        let enable_product_guiding: bool = (guiding_mode == GuidingMode::ProductGuiding
            || guiding_mode == GuidingMode::Combined)
            && radiance_proxy.is_built()
            && bsdf.add_parameters_to_proxy(&mut bsdf_proxy, bsdf_sampling_modes);

        let (bsdf_sampling_fraction, product_sampling_fraction): (Float, Float) =
            if !enable_path_guiding {
                (1.0, 0.0)
            } else if guiding_mode == GuidingMode::Combined && enable_product_guiding {
                let fractions: Vector2f = d_tree.bsdf_sampling_fraction_product();
                (fractions.x, fractions.y)
            } else if guiding_mode == GuidingMode::ProductGuiding && enable_product_guiding {
                (d_tree.bsdf_sampling_fraction(), 1.0)
            } else {
                (d_tree.bsdf_sampling_fraction(), 0.0)
            };
        debug_assert!((0.0..=1.0).contains(&bsdf_sampling_fraction));
        debug_assert!((0.0..=1.0).contains(&product_sampling_fraction));

        PathGuidedSampler {
            guiding_mode,
            guided_bounce_mode,
            d_tree,
            bsdf,
            bsdf_sampling_modes,
            geometry,
            enable_path_guiding,
            enable_product_guiding,
            bsdf_sampling_fraction,
            product_sampling_fraction,
            radiance_proxy,
            bsdf_proxy,
        }
    }
    /// Draw a scattering direction. Returns false when the sampled
    /// mode is outside the sampler's mode mask (the caller ends the
    /// path).
    pub fn sample(
        &mut self,
        sampling_context: &mut SamplingContext,
        outgoing: &Vector3f,
        incoming: &mut Vector3f,
        value: &mut Spectrum,
        pdf: &mut Float,
    ) -> bool {
        let mut bsdf_sample: BsdfSample = BsdfSample::default();
        let mut d_tree_pdf: Float = 0.0;
        let mut product_pdf: Float = 0.0;
        self.sample_with_pdfs(
            sampling_context,
            &mut bsdf_sample,
            outgoing,
            pdf,
            &mut d_tree_pdf,
            &mut product_pdf,
        );
        // filter scattering modes
        if self.bsdf_sampling_modes & bsdf_sample.mode as u8 == 0_u8 {
            return false;
        }
        *incoming = bsdf_sample.incoming;
        *value = bsdf_sample.value;
        true
    }
    /// Full-detail sampling entry point; returns true when the bounce
    /// was guided (drawn from the D-tree or the proxy rather than the
    /// BSDF).
    pub fn sample_with_pdfs(
        &mut self,
        sampling_context: &mut SamplingContext,
        bsdf_sample: &mut BsdfSample,
        outgoing: &Vector3f,
        wi_pdf: &mut Float,
        d_tree_pdf: &mut Float,
        product_pdf: &mut Float,
    ) -> bool {
        if !self.enable_path_guiding {
            self.simple_bsdf_bounce(
                sampling_context,
                bsdf_sample,
                outgoing,
                wi_pdf,
                d_tree_pdf,
                product_pdf,
            );
            return false;
        }
        sampling_context.split_in_place(1, 1);
        let s: Float = sampling_context.next_1d();
        if s < self.bsdf_sampling_fraction {
            self.guiding_aware_bsdf_bounce(
                sampling_context,
                bsdf_sample,
                outgoing,
                wi_pdf,
                d_tree_pdf,
                product_pdf,
            );
            false
        } else {
            let s: Float = ((s - self.bsdf_sampling_fraction)
                / (1.0 as Float - self.bsdf_sampling_fraction))
                .min(ONE_MINUS_EPSILON);
            self.guided_bounce(
                sampling_context,
                bsdf_sample,
                outgoing,
                wi_pdf,
                d_tree_pdf,
                product_pdf,
                s,
            );
            true
        }
    }
    /// The combined pdf of `incoming` under the sampler's mixture,
    /// with the BSDF value written to `value`. Intended for light
    /// sampling / MIS from the host.
    pub fn evaluate(
        &mut self,
        outgoing: &Vector3f,
        incoming: &Vector3f,
        light_sampling_modes: u8,
        value: &mut Spectrum,
    ) -> Float {
        let bsdf_pdf: Float =
            self.bsdf
                .evaluate(&self.geometry, outgoing, incoming, light_sampling_modes, value);
        let d_tree_pdf: Float = self
            .d_tree
            .pdf(incoming, self.enable_modes_before_sampling(self.bsdf_sampling_modes));
        let product_pdf: Float = if self.enable_product_guiding {
            let shading_normal: Vector3f = self.geometry.shading_normal;
            self.radiance_proxy
                .build_product(&mut self.bsdf_proxy, outgoing, &shading_normal);
            self.radiance_proxy.pdf(incoming)
        } else {
            0.0
        };
        self.guided_path_extension_pdf(bsdf_pdf, d_tree_pdf, product_pdf)
    }
    fn simple_bsdf_bounce(
        &mut self,
        sampling_context: &mut SamplingContext,
        bsdf_sample: &mut BsdfSample,
        outgoing: &Vector3f,
        wi_pdf: &mut Float,
        d_tree_pdf: &mut Float,
        product_pdf: &mut Float,
    ) {
        self.bsdf.sample(
            sampling_context,
            &self.geometry,
            outgoing,
            self.bsdf_sampling_modes,
            bsdf_sample,
        );
        *d_tree_pdf = 0.0;
        *product_pdf = 0.0;
        *wi_pdf = self.guided_path_extension_pdf(bsdf_sample.probability, 0.0, 0.0);
    }
    fn guiding_aware_bsdf_bounce(
        &mut self,
        sampling_context: &mut SamplingContext,
        bsdf_sample: &mut BsdfSample,
        outgoing: &Vector3f,
        wi_pdf: &mut Float,
        d_tree_pdf: &mut Float,
        product_pdf: &mut Float,
    ) {
        self.bsdf.sample(
            sampling_context,
            &self.geometry,
            outgoing,
            self.bsdf_sampling_modes,
            bsdf_sample,
        );
        if bsdf_sample.mode == ScatteringMode::None {
            // nothing was sampled; leave the pdfs untouched
            return;
        }
        if bsdf_sample.mode == ScatteringMode::Specular {
            // a delta bounce carries only the probability of having
            // chosen BSDF sampling
            *d_tree_pdf = 0.0;
            *product_pdf = 0.0;
            *wi_pdf = self.bsdf_sampling_fraction;
            return;
        }
        if self.enable_product_guiding {
            let shading_normal: Vector3f = self.geometry.shading_normal;
            self.radiance_proxy
                .build_product(&mut self.bsdf_proxy, outgoing, &shading_normal);
            *product_pdf = self.radiance_proxy.pdf(&bsdf_sample.incoming);
        } else {
            *product_pdf = 0.0;
        }
        *d_tree_pdf = self.d_tree.pdf(
            &bsdf_sample.incoming,
            self.enable_modes_before_sampling(self.bsdf_sampling_modes),
        );
        *wi_pdf =
            self.guided_path_extension_pdf(bsdf_sample.probability, *d_tree_pdf, *product_pdf);
    }
    #[allow(clippy::too_many_arguments)]
    fn guided_bounce(
        &mut self,
        sampling_context: &mut SamplingContext,
        bsdf_sample: &mut BsdfSample,
        outgoing: &Vector3f,
        wi_pdf: &mut Float,
        d_tree_pdf: &mut Float,
        product_pdf: &mut Float,
        s: Float,
    ) {
        if self.enable_product_guiding {
            let shading_normal: Vector3f = self.geometry.shading_normal;
            self.radiance_proxy
                .build_product(&mut self.bsdf_proxy, outgoing, &shading_normal);
        }
        let mut d_tree_sample: DTreeSample = DTreeSample::default();
        if s <= self.product_sampling_fraction {
            // product guiding
            let (direction, pdf) = self.radiance_proxy.sample(sampling_context);
            *product_pdf = pdf;
            d_tree_sample.direction = direction;
            d_tree_sample.pdf = self.d_tree.pdf(
                &direction,
                self.enable_modes_before_sampling(self.bsdf_sampling_modes),
            );
            d_tree_sample.scattering_mode = ScatteringMode::Diffuse;
        } else {
            // path guiding
            d_tree_sample = self.d_tree.sample(
                sampling_context,
                self.enable_modes_before_sampling(self.bsdf_sampling_modes),
            );
            *product_pdf = if self.enable_product_guiding {
                self.radiance_proxy.pdf(&d_tree_sample.direction)
            } else {
                0.0
            };
        }
        let scattering_mode: ScatteringMode =
            self.set_mode_after_sampling(d_tree_sample.scattering_mode);
        if scattering_mode == ScatteringMode::None {
            // terminate
            bsdf_sample.set_to_scattering(scattering_mode, 0.0);
            return;
        }
        bsdf_sample.incoming = d_tree_sample.direction;
        *d_tree_pdf = d_tree_sample.pdf;
        let bsdf_pdf: Float = self.bsdf.evaluate(
            &self.geometry,
            outgoing,
            &bsdf_sample.incoming,
            self.bsdf_sampling_modes,
            &mut bsdf_sample.value,
        );
        if bsdf_pdf == 0.0 as Float {
            // reject invalid directions
            bsdf_sample.set_to_scattering(ScatteringMode::None, bsdf_pdf);
            return;
        }
        bsdf_sample.set_to_scattering(scattering_mode, bsdf_pdf);
        *wi_pdf = self.guided_path_extension_pdf(bsdf_pdf, *d_tree_pdf, *product_pdf);
    }
    /// `lerp(lerp(d_tree, product, b), bsdf, a)`; collapses to the
    /// plain BSDF pdf when guiding is off.
    pub fn guided_path_extension_pdf(
        &self,
        bsdf_pdf: Float,
        d_tree_pdf: Float,
        product_pdf: Float,
    ) -> Float {
        if !self.enable_path_guiding {
            return bsdf_pdf;
        }
        let guided_mix_pdf: Float = lerp(self.product_sampling_fraction, d_tree_pdf, product_pdf);
        lerp(self.bsdf_sampling_fraction, guided_mix_pdf, bsdf_pdf)
    }
    /// D-tree queries are restricted to non-delta modes unless the
    /// bounce mode is learning the classification.
    fn enable_modes_before_sampling(&self, modes: u8) -> u8 {
        if self.guided_bounce_mode == GuidedBounceMode::Learn {
            modes
        } else {
            ScatteringMode::Diffuse as u8 | ScatteringMode::Glossy as u8
        }
    }
    /// Translate the mode of a guided sample according to the
    /// configured bounce mode, degrading to `None` when the BSDF
    /// cannot represent the requested lobe.
    fn set_mode_after_sampling(&self, sampled_mode: ScatteringMode) -> ScatteringMode {
        match self.guided_bounce_mode {
            GuidedBounceMode::Learn => sampled_mode,
            GuidedBounceMode::StrictlyDiffuse => {
                if ScatteringMode::has_diffuse(self.bsdf_sampling_modes) {
                    ScatteringMode::Diffuse
                } else {
                    ScatteringMode::None
                }
            }
            GuidedBounceMode::StrictlyGlossy => {
                if ScatteringMode::has_glossy(self.bsdf_sampling_modes) {
                    ScatteringMode::Glossy
                } else {
                    ScatteringMode::None
                }
            }
            GuidedBounceMode::PreferDiffuse => {
                if ScatteringMode::has_diffuse(self.bsdf_sampling_modes) {
                    ScatteringMode::Diffuse
                } else if ScatteringMode::has_glossy(self.bsdf_sampling_modes) {
                    ScatteringMode::Glossy
                } else {
                    ScatteringMode::None
                }
            }
            GuidedBounceMode::PreferGlossy => {
                if ScatteringMode::has_glossy(self.bsdf_sampling_modes) {
                    ScatteringMode::Glossy
                } else if ScatteringMode::has_diffuse(self.bsdf_sampling_modes) {
                    ScatteringMode::Diffuse
                } else {
                    ScatteringMode::None
                }
            }
        }
    }
    /// The tag recorded into path vertices; it routes the Adam update
    /// to the matching mixing weight.
    pub fn guiding_method(&self) -> GuidingMethod {
        if self.guiding_mode == GuidingMode::Combined && self.enable_product_guiding {
            GuidingMethod::ProductGuiding
        } else {
            GuidingMethod::PathGuiding
        }
    }
    pub fn enable_path_guiding(&self) -> bool {
        self.enable_path_guiding
    }
    pub fn enable_product_guiding(&self) -> bool {
        self.enable_product_guiding
    }
    pub fn bsdf_sampling_fraction(&self) -> Float {
        self.bsdf_sampling_fraction
    }
    pub fn product_sampling_fraction(&self) -> Float {
        self.product_sampling_fraction
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::geometry::{vec3_normalize, Point2f};
    use crate::core::gpt::INV_4_PI;
    use crate::core::rng::Rng;
    use crate::core::sampling::uniform_sample_sphere;
    use crate::guiding::dtree::DTreeRecord;
    use crate::guiding::params::{BsdfSamplingFractionMode, GPTParameters};
    use crate::guiding::DTREE_THRESHOLD;
    use std::f32::consts::PI;
    use std::sync::Arc;

    /// Uniform-hemisphere test material over the +z hemisphere.
    struct HemisphereBsdf {}

    impl Bsdf for HemisphereBsdf {
        fn sample(
            &self,
            sampling_context: &mut SamplingContext,
            _geometry: &LocalGeometry,
            _outgoing: &Vector3f,
            _modes: u8,
            sample: &mut BsdfSample,
        ) {
            let u: Point2f = sampling_context.next_2d();
            let mut w: Vector3f = uniform_sample_sphere(&u);
            w.z = w.z.abs().max(1e-4);
            sample.incoming = vec3_normalize(&w);
            sample.value = Spectrum::new(0.5 * sample.incoming.z);
            sample.set_to_scattering(ScatteringMode::Diffuse, 1.0 / (2.0 * PI));
        }
        fn evaluate(
            &self,
            _geometry: &LocalGeometry,
            _outgoing: &Vector3f,
            incoming: &Vector3f,
            modes: u8,
            value: &mut Spectrum,
        ) -> Float {
            if incoming.z <= 0.0 || !ScatteringMode::has_diffuse(modes) {
                *value = Spectrum::default();
                return 0.0;
            }
            *value = Spectrum::new(0.5 * incoming.z);
            1.0 / (2.0 * PI)
        }
        fn is_purely_specular(&self) -> bool {
            false
        }
        fn add_parameters_to_proxy(&self, proxy: &mut BsdfProxy, _modes: u8) -> bool {
            proxy.add_diffuse_weight(1.0);
            proxy.add_translucency_weight(1.0);
            true
        }
    }

    /// Material that always reports a delta bounce.
    struct MirrorBsdf {}

    impl Bsdf for MirrorBsdf {
        fn sample(
            &self,
            _sampling_context: &mut SamplingContext,
            _geometry: &LocalGeometry,
            _outgoing: &Vector3f,
            _modes: u8,
            sample: &mut BsdfSample,
        ) {
            sample.incoming = Vector3f::new(0.0, 0.0, 1.0);
            sample.value = Spectrum::new(1.0);
            sample.set_to_scattering(ScatteringMode::Specular, 1.0);
        }
        fn evaluate(
            &self,
            _geometry: &LocalGeometry,
            _outgoing: &Vector3f,
            _incoming: &Vector3f,
            _modes: u8,
            value: &mut Spectrum,
        ) -> Float {
            *value = Spectrum::default();
            0.0
        }
        fn is_purely_specular(&self) -> bool {
            false
        }
        fn add_parameters_to_proxy(&self, _proxy: &mut BsdfProxy, _modes: u8) -> bool {
            false
        }
    }

    /// Material whose sampling always fails.
    struct NullBsdf {}

    impl Bsdf for NullBsdf {
        fn sample(
            &self,
            _sampling_context: &mut SamplingContext,
            _geometry: &LocalGeometry,
            _outgoing: &Vector3f,
            _modes: u8,
            sample: &mut BsdfSample,
        ) {
            sample.set_to_scattering(ScatteringMode::None, 0.0);
        }
        fn evaluate(
            &self,
            _geometry: &LocalGeometry,
            _outgoing: &Vector3f,
            _incoming: &Vector3f,
            _modes: u8,
            value: &mut Spectrum,
        ) -> Float {
            *value = Spectrum::default();
            0.0
        }
        fn is_purely_specular(&self) -> bool {
            false
        }
        fn add_parameters_to_proxy(&self, _proxy: &mut BsdfProxy, _modes: u8) -> bool {
            false
        }
    }

    fn trained_d_tree(parameters: Arc<GPTParameters>) -> DTree {
        let mut d_tree: DTree = DTree::new(parameters);
        let mut rng: Rng = Rng::new();
        rng.set_sequence(51);
        for round in 0..2 {
            for _ in 0..50_000 {
                let u: Point2f = Point2f::new(rng.uniform_float(), rng.uniform_float());
                let w: Vector3f = if rng.uniform_float() < 0.5 {
                    vec3_normalize(&Vector3f::new(0.2 * (u.x - 0.5), 0.2 * (u.y - 0.5), 1.0))
                } else {
                    vec3_normalize(&uniform_sample_sphere(&u))
                };
                d_tree.record(&DTreeRecord {
                    direction: w,
                    radiance: 1.0,
                    wi_pdf: 1.0,
                    bsdf_pdf: 0.0,
                    d_tree_pdf: 0.0,
                    product_pdf: 0.0,
                    sample_weight: 1.0,
                    product: 0.0,
                    is_delta: false,
                    guiding_method: GuidingMethod::PathGuiding,
                });
            }
            d_tree.build();
            if round == 0 {
                d_tree.restructure(DTREE_THRESHOLD);
            }
        }
        d_tree
    }

    fn fixed_fraction_parameters(fraction: Float, guiding_mode: GuidingMode) -> Arc<GPTParameters> {
        Arc::new(GPTParameters {
            bsdf_sampling_fraction_mode: BsdfSamplingFractionMode::Fixed,
            fixed_bsdf_sampling_fraction: fraction,
            guiding_mode,
            ..GPTParameters::default()
        })
    }

    fn up_geometry() -> LocalGeometry {
        LocalGeometry {
            point: Default::default(),
            shading_normal: Vector3f::new(0.0, 0.0, 1.0),
        }
    }

    #[test]
    fn pure_bsdf_fraction_reduces_to_bsdf_pdf() {
        let parameters = fixed_fraction_parameters(1.0, GuidingMode::PathGuiding);
        let d_tree: DTree = trained_d_tree(parameters.clone());
        let bsdf: HemisphereBsdf = HemisphereBsdf {};
        let mut sampler: PathGuidedSampler = PathGuidedSampler::new(
            parameters.guiding_mode,
            true,
            parameters.guided_bounce_mode,
            &d_tree,
            &bsdf,
            ScatteringMode::ALL,
            up_geometry(),
            true,
        );
        let outgoing: Vector3f = Vector3f::new(0.0, 0.0, 1.0);
        let incoming: Vector3f = vec3_normalize(&Vector3f::new(0.3, 0.1, 0.9));
        let mut value: Spectrum = Spectrum::default();
        let pdf: Float = sampler.evaluate(&outgoing, &incoming, ScatteringMode::ALL, &mut value);
        assert!((pdf - 1.0 / (2.0 * PI)).abs() < 1e-6);
    }

    #[test]
    fn pure_guide_fraction_reduces_to_d_tree_pdf() {
        let parameters = fixed_fraction_parameters(0.0, GuidingMode::PathGuiding);
        let d_tree: DTree = trained_d_tree(parameters.clone());
        let bsdf: HemisphereBsdf = HemisphereBsdf {};
        let mut sampler: PathGuidedSampler = PathGuidedSampler::new(
            parameters.guiding_mode,
            true,
            parameters.guided_bounce_mode,
            &d_tree,
            &bsdf,
            ScatteringMode::ALL,
            up_geometry(),
            true,
        );
        let outgoing: Vector3f = Vector3f::new(0.0, 0.0, 1.0);
        let incoming: Vector3f = vec3_normalize(&Vector3f::new(0.1, -0.2, 0.97));
        let mut value: Spectrum = Spectrum::default();
        let pdf: Float = sampler.evaluate(&outgoing, &incoming, ScatteringMode::ALL, &mut value);
        let expected: Float = d_tree.pdf(&incoming, ScatteringMode::ALL);
        assert!((pdf - expected).abs() < 1e-5 * expected.max(1.0));
        assert_eq!(sampler.guiding_method(), GuidingMethod::PathGuiding);
    }

    #[test]
    fn pure_product_fraction_reduces_to_product_pdf() {
        let parameters = fixed_fraction_parameters(0.0, GuidingMode::ProductGuiding);
        let d_tree: DTree = trained_d_tree(parameters.clone());
        let bsdf: HemisphereBsdf = HemisphereBsdf {};
        let mut sampler: PathGuidedSampler = PathGuidedSampler::new(
            parameters.guiding_mode,
            true,
            parameters.guided_bounce_mode,
            &d_tree,
            &bsdf,
            ScatteringMode::ALL,
            up_geometry(),
            true,
        );
        assert!(sampler.enable_product_guiding());
        assert_eq!(sampler.product_sampling_fraction(), 1.0);
        let outgoing: Vector3f = Vector3f::new(0.0, 0.0, 1.0);
        let incoming: Vector3f = vec3_normalize(&Vector3f::new(-0.1, 0.05, 0.95));
        let mut value: Spectrum = Spectrum::default();
        let pdf: Float = sampler.evaluate(&outgoing, &incoming, ScatteringMode::ALL, &mut value);
        // with a = 0 and b = 1 the mixture is exactly the proxy pdf
        let expected: Float = sampler.radiance_proxy.pdf(&incoming);
        assert!(expected > 0.0);
        assert!((pdf - expected).abs() < 1e-5 * expected.max(1.0));
    }

    #[test]
    fn mixture_is_linear_in_the_fractions() {
        let parameters = fixed_fraction_parameters(0.3, GuidingMode::PathGuiding);
        let d_tree: DTree = trained_d_tree(parameters.clone());
        let bsdf: HemisphereBsdf = HemisphereBsdf {};
        let mut sampler: PathGuidedSampler = PathGuidedSampler::new(
            parameters.guiding_mode,
            true,
            parameters.guided_bounce_mode,
            &d_tree,
            &bsdf,
            ScatteringMode::ALL,
            up_geometry(),
            true,
        );
        let outgoing: Vector3f = Vector3f::new(0.0, 0.0, 1.0);
        let incoming: Vector3f = vec3_normalize(&Vector3f::new(0.2, 0.2, 0.96));
        let mut value: Spectrum = Spectrum::default();
        let pdf: Float = sampler.evaluate(&outgoing, &incoming, ScatteringMode::ALL, &mut value);
        let expected: Float =
            0.3 * (1.0 / (2.0 * PI)) + 0.7 * d_tree.pdf(&incoming, ScatteringMode::ALL);
        assert!((pdf - expected).abs() < 1e-5);
    }

    #[test]
    fn specular_bounce_reports_the_selection_probability() {
        let parameters = fixed_fraction_parameters(0.25, GuidingMode::PathGuiding);
        let d_tree: DTree = trained_d_tree(parameters.clone());
        let bsdf: MirrorBsdf = MirrorBsdf {};
        let mut sampler: PathGuidedSampler = PathGuidedSampler::new(
            parameters.guiding_mode,
            true,
            parameters.guided_bounce_mode,
            &d_tree,
            &bsdf,
            ScatteringMode::ALL,
            up_geometry(),
            true,
        );
        let mut sc: SamplingContext = SamplingContext::new(52);
        let outgoing: Vector3f = Vector3f::new(0.0, 0.0, 1.0);
        // drive the sampler until the BSDF branch is taken
        for _ in 0..64 {
            let mut bsdf_sample: BsdfSample = BsdfSample::default();
            let mut wi_pdf: Float = -1.0;
            let mut d_tree_pdf: Float = -1.0;
            let mut product_pdf: Float = -1.0;
            let guided: bool = sampler.sample_with_pdfs(
                &mut sc,
                &mut bsdf_sample,
                &outgoing,
                &mut wi_pdf,
                &mut d_tree_pdf,
                &mut product_pdf,
            );
            if !guided {
                assert_eq!(bsdf_sample.mode, ScatteringMode::Specular);
                assert_eq!(wi_pdf, 0.25);
                assert_eq!(d_tree_pdf, 0.0);
                assert_eq!(product_pdf, 0.0);
                return;
            }
        }
        panic!("BSDF branch never selected");
    }

    #[test]
    fn failed_bsdf_sample_leaves_pdfs_untouched() {
        let parameters = fixed_fraction_parameters(1.0, GuidingMode::PathGuiding);
        let d_tree: DTree = trained_d_tree(parameters.clone());
        let bsdf: NullBsdf = NullBsdf {};
        let mut sampler: PathGuidedSampler = PathGuidedSampler::new(
            parameters.guiding_mode,
            true,
            parameters.guided_bounce_mode,
            &d_tree,
            &bsdf,
            ScatteringMode::ALL,
            up_geometry(),
            true,
        );
        let mut sc: SamplingContext = SamplingContext::new(53);
        let outgoing: Vector3f = Vector3f::new(0.0, 0.0, 1.0);
        let mut bsdf_sample: BsdfSample = BsdfSample::default();
        let mut wi_pdf: Float = -1.0;
        let mut d_tree_pdf: Float = -1.0;
        let mut product_pdf: Float = -1.0;
        sampler.sample_with_pdfs(
            &mut sc,
            &mut bsdf_sample,
            &outgoing,
            &mut wi_pdf,
            &mut d_tree_pdf,
            &mut product_pdf,
        );
        assert_eq!(bsdf_sample.mode, ScatteringMode::None);
        // the early return must not have written any pdf
        assert_eq!(wi_pdf, -1.0);
        assert_eq!(d_tree_pdf, -1.0);
        assert_eq!(product_pdf, -1.0);
    }

    #[test]
    fn guided_samples_are_consistent_with_evaluate() {
        let parameters = fixed_fraction_parameters(0.3, GuidingMode::PathGuiding);
        let d_tree: DTree = trained_d_tree(parameters.clone());
        let bsdf: HemisphereBsdf = HemisphereBsdf {};
        let mut sampler: PathGuidedSampler = PathGuidedSampler::new(
            parameters.guiding_mode,
            true,
            parameters.guided_bounce_mode,
            &d_tree,
            &bsdf,
            ScatteringMode::ALL,
            up_geometry(),
            true,
        );
        let mut sc: SamplingContext = SamplingContext::new(54);
        let outgoing: Vector3f = Vector3f::new(0.0, 0.0, 1.0);
        let mut checked: usize = 0;
        for _ in 0..200 {
            let mut incoming: Vector3f = Vector3f::default();
            let mut value: Spectrum = Spectrum::default();
            let mut pdf: Float = 0.0;
            if !sampler.sample(&mut sc, &outgoing, &mut incoming, &mut value, &mut pdf) {
                continue;
            }
            if pdf <= 0.0 {
                continue;
            }
            let mut evaluated_value: Spectrum = Spectrum::default();
            let evaluated: Float =
                sampler.evaluate(&outgoing, &incoming, ScatteringMode::ALL, &mut evaluated_value);
            assert!(
                (evaluated - pdf).abs() <= 2e-2 * pdf,
                "evaluate {:?} vs sampled {:?}",
                evaluated,
                pdf,
            );
            checked += 1;
        }
        assert!(checked > 50);
    }

    #[test]
    fn mode_remapping_follows_the_bounce_mode_table() {
        let parameters = fixed_fraction_parameters(0.5, GuidingMode::PathGuiding);
        let d_tree: DTree = trained_d_tree(parameters.clone());
        let bsdf: HemisphereBsdf = HemisphereBsdf {};
        let make = |bounce_mode: GuidedBounceMode, modes: u8| {
            PathGuidedSampler::new(
                GuidingMode::PathGuiding,
                true,
                bounce_mode,
                &d_tree,
                &bsdf,
                modes,
                up_geometry(),
                true,
            )
        };
        let diffuse_only: u8 = ScatteringMode::Diffuse as u8;
        let glossy_only: u8 = ScatteringMode::Glossy as u8;
        assert_eq!(
            make(GuidedBounceMode::Learn, ScatteringMode::ALL)
                .set_mode_after_sampling(ScatteringMode::Glossy),
            ScatteringMode::Glossy
        );
        assert_eq!(
            make(GuidedBounceMode::StrictlyDiffuse, glossy_only)
                .set_mode_after_sampling(ScatteringMode::Diffuse),
            ScatteringMode::None
        );
        assert_eq!(
            make(GuidedBounceMode::StrictlyGlossy, glossy_only)
                .set_mode_after_sampling(ScatteringMode::Diffuse),
            ScatteringMode::Glossy
        );
        assert_eq!(
            make(GuidedBounceMode::PreferDiffuse, glossy_only)
                .set_mode_after_sampling(ScatteringMode::Diffuse),
            ScatteringMode::Glossy
        );
        assert_eq!(
            make(GuidedBounceMode::PreferGlossy, diffuse_only)
                .set_mode_after_sampling(ScatteringMode::Glossy),
            ScatteringMode::Diffuse
        );
        assert_eq!(
            make(GuidedBounceMode::PreferGlossy, 0)
                .set_mode_after_sampling(ScatteringMode::Glossy),
            ScatteringMode::None
        );
    }
}
