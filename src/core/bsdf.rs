//! The scattering interface the guiding core consumes from the host
//! renderer: scattering-mode flags, the opaque **Bsdf** trait with its
//! sample/evaluate entry points, and the **BsdfProxy** lobe summary a
//! material can publish for product importance sampling.

// pbrt
use crate::core::geometry::{vec3_dot_vec3, Point3f, Vector3f};
use crate::core::gpt::{Float, Spectrum};
use crate::core::sampler::SamplingContext;

// see reflection.h

/// Coarse classification of a scattering event. The variants are
/// bit-valued so sets of permitted modes can be passed as a `u8`
/// mask.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScatteringMode {
    None = 0,
    Diffuse = 1,
    Glossy = 2,
    Specular = 4,
}

impl ScatteringMode {
    pub const ALL: u8 =
        ScatteringMode::Diffuse as u8 | ScatteringMode::Glossy as u8 | ScatteringMode::Specular as u8;
    pub fn has_diffuse(modes: u8) -> bool {
        modes & ScatteringMode::Diffuse as u8 != 0_u8
    }
    pub fn has_glossy(modes: u8) -> bool {
        modes & ScatteringMode::Glossy as u8 != 0_u8
    }
}

impl Default for ScatteringMode {
    fn default() -> Self {
        ScatteringMode::None
    }
}

/// Result of sampling a BSDF (or of a guided bounce translated into
/// BSDF terms).
#[derive(Debug, Default, Copy, Clone)]
pub struct BsdfSample {
    pub incoming: Vector3f,
    pub value: Spectrum,
    pub mode: ScatteringMode,
    pub probability: Float,
}

impl BsdfSample {
    pub fn set_to_scattering(&mut self, mode: ScatteringMode, probability: Float) {
        self.mode = mode;
        self.probability = probability;
    }
}

/// The shading-point frame shared by the BSDF and the guided sampler.
#[derive(Debug, Default, Copy, Clone)]
pub struct LocalGeometry {
    pub point: Point3f,
    pub shading_normal: Vector3f,
}

/// Opaque scattering model supplied by the host renderer. The sampled
/// and evaluated values are premultiplied by the cosine term.
pub trait Bsdf {
    fn sample(
        &self,
        sampling_context: &mut SamplingContext,
        geometry: &LocalGeometry,
        outgoing: &Vector3f,
        modes: u8,
        sample: &mut BsdfSample,
    );
    /// Returns the solid-angle pdf of `incoming` and writes the BSDF
    /// value; a zero return marks an unreachable direction.
    fn evaluate(
        &self,
        geometry: &LocalGeometry,
        outgoing: &Vector3f,
        incoming: &Vector3f,
        modes: u8,
        value: &mut Spectrum,
    ) -> Float;
    fn is_purely_specular(&self) -> bool;
    /// Publish the lobe summary used for product guiding. Returns
    /// false if this material cannot be approximated by the proxy.
    fn add_parameters_to_proxy(&self, proxy: &mut BsdfProxy, modes: u8) -> bool;
}

/// Mirror-reflect `wo` about the normal `n`.
pub fn reflect(wo: &Vector3f, n: &Vector3f) -> Vector3f {
    -(*wo) + *n * (2.0 as Float * vec3_dot_vec3(wo, n))
}

/// Refract `wi` through a boundary with relative index `eta`;
/// returns false on total internal reflection.
pub fn refract(wi: &Vector3f, n: &Vector3f, eta: Float, wt: &mut Vector3f) -> bool {
    let cos_theta_i: Float = vec3_dot_vec3(n, wi);
    let sin2_theta_i: Float = (0.0 as Float).max(1.0 as Float - cos_theta_i * cos_theta_i);
    let sin2_theta_t: Float = eta * eta * sin2_theta_i;
    if sin2_theta_t >= 1.0 as Float {
        return false;
    }
    let cos_theta_t: Float = (1.0 as Float - sin2_theta_t).sqrt();
    *wt = -(*wi) * eta + *n * (eta * cos_theta_i - cos_theta_t);
    true
}

/// Additive summary of a material's lobes, evaluated as a cheap
/// stand-in for the full BSDF when building the product map.
#[derive(Debug, Default, Copy, Clone)]
pub struct BsdfProxy {
    diffuse_weight: Float,
    translucency_weight: Float,
    reflection_weight: Float,
    refraction_weight: Float,
    reflection_roughness: Float,
    refraction_roughness: Float,
    ior: Float,
    is_diffuse: bool,
    is_translucent: bool,
    is_reflective: bool,
    is_refractive: bool,
    normal: Vector3f,
    reflection_lobe: Vector3f,
    refraction_lobe: Vector3f,
}

impl BsdfProxy {
    pub fn new() -> Self {
        BsdfProxy::default()
    }
    pub fn add_diffuse_weight(&mut self, diffuse_weight: Float) {
        self.diffuse_weight += diffuse_weight;
    }
    pub fn add_translucency_weight(&mut self, translucency_weight: Float) {
        self.translucency_weight += translucency_weight;
    }
    pub fn add_reflection_weight(&mut self, reflection_weight: Float, roughness: Float) {
        let old_weight: Float = self.reflection_weight;
        self.reflection_weight += reflection_weight;
        let inv_weight: Float = if self.reflection_weight > 0.0 as Float {
            1.0 as Float / self.reflection_weight
        } else {
            0.0 as Float
        };
        self.reflection_roughness = old_weight * inv_weight * self.reflection_roughness
            + reflection_weight * inv_weight * roughness;
    }
    pub fn add_refraction_weight(&mut self, refraction_weight: Float, roughness: Float) {
        let old_weight: Float = self.refraction_weight;
        self.refraction_weight += refraction_weight;
        let inv_weight: Float = if self.refraction_weight > 0.0 as Float {
            1.0 as Float / self.refraction_weight
        } else {
            0.0 as Float
        };
        self.refraction_roughness = old_weight * inv_weight * self.refraction_roughness
            + refraction_weight * inv_weight * roughness;
    }
    pub fn set_ior(&mut self, ior: Float) {
        self.ior = ior;
    }
    /// Freeze the accumulated lobes into world-space form at a shading
    /// point. Must run before `evaluate`.
    pub fn finish_parameterization(&mut self, outgoing: &Vector3f, shading_normal: &Vector3f) {
        self.is_diffuse = self.diffuse_weight > 0.0 as Float;
        self.is_translucent = self.translucency_weight > 0.0 as Float;
        self.is_reflective = self.reflection_weight > 0.0 as Float;
        self.is_refractive = self.refraction_weight > 0.0 as Float;

        if self.is_zero() {
            return;
        }

        self.normal = *shading_normal;
        self.reflection_lobe = reflect(outgoing, &self.normal);
        refract(
            outgoing,
            &self.normal,
            self.ior,
            &mut self.refraction_lobe,
        );

        // Roughness widens under reflection and scales with the
        // relative index under refraction.
        self.reflection_roughness *= 2.0 as Float;
        let cos_nt: Float = vec3_dot_vec3(&self.normal, &self.refraction_lobe).abs();
        let cos_no: Float = vec3_dot_vec3(&self.normal, outgoing).abs();
        if cos_nt > 0.0 as Float {
            let scale_factor_refraction: Float = (cos_nt + self.ior * cos_no) / cos_nt;
            self.refraction_roughness *= scale_factor_refraction;
        }
    }
    /// Cheap directional response of the summarised material.
    /// The specular-ish lobes carry direction bookkeeping but do not
    /// contribute yet.
    /// TODO: fold the reflection/refraction lobes into the response
    /// using their corrected roughness.
    pub fn evaluate(&self, incoming: &Vector3f) -> Float {
        let mut value: Float = 0.0;
        let cos_ni: Float = vec3_dot_vec3(&self.normal, incoming);
        if self.is_diffuse {
            value += self.diffuse_weight * cos_ni.max(0.0 as Float);
        }
        if self.is_translucent {
            value += self.translucency_weight * (-cos_ni).max(0.0 as Float);
        }
        value
    }
    pub fn is_zero(&self) -> bool {
        !(self.is_diffuse || self.is_translucent || self.is_reflective || self.is_refractive)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn proxy_diffuse_response_follows_cosine() {
        let mut proxy: BsdfProxy = BsdfProxy::new();
        proxy.add_diffuse_weight(1.0);
        let n: Vector3f = Vector3f::new(0.0, 0.0, 1.0);
        proxy.finish_parameterization(&Vector3f::new(0.0, 0.0, 1.0), &n);
        assert!(!proxy.is_zero());
        assert_eq!(proxy.evaluate(&Vector3f::new(0.0, 0.0, 1.0)), 1.0);
        // below the horizon there is no diffuse response
        assert_eq!(proxy.evaluate(&Vector3f::new(0.0, 0.0, -1.0)), 0.0);
    }

    #[test]
    fn reflect_mirrors_about_normal() {
        let n: Vector3f = Vector3f::new(0.0, 0.0, 1.0);
        let wo: Vector3f = Vector3f::new(0.6, 0.0, 0.8);
        let r: Vector3f = reflect(&wo, &n);
        assert!((r.x + 0.6).abs() < 1e-6);
        assert!((r.z - 0.8).abs() < 1e-6);
    }
}
