//! Draw random samples from a chosen probability distribution, and
//! map between Cartesian directions and the area-preserving
//! cylindrical parameterisation of the sphere.

// std
use std::f32::consts::PI;
use std::sync::Arc;
// pbrt
use crate::core::geometry::{Point2f, Vector3f};
use crate::core::gpt::{clamp_t, Float, INV_4_PI};

// see sampling.h

#[derive(Debug, Default, Clone)]
pub struct Distribution1D {
    pub func: Vec<Float>,
    pub cdf: Vec<Float>,
    pub func_int: Float,
}

impl Distribution1D {
    pub fn new(f: Vec<Float>) -> Self {
        let n: usize = f.len();
        // compute integral of step function at $x_i$
        let mut cdf: Vec<Float> = Vec::with_capacity(n + 1);
        cdf.push(0.0 as Float);
        for i in 1..(n + 1) {
            let previous: Float = cdf[i - 1];
            cdf.push(previous + f[i - 1] / n as Float);
        }
        // transform step function integral into CDF
        let func_int: Float = cdf[n];
        if func_int == 0.0 as Float {
            for (i, item) in cdf.iter_mut().enumerate().skip(1) {
                *item = i as Float / n as Float;
            }
        } else {
            for item in cdf.iter_mut().skip(1) {
                *item /= func_int;
            }
        }
        Distribution1D {
            func: f,
            cdf,
            func_int,
        }
    }
    pub fn count(&self) -> usize {
        self.func.len()
    }
    pub fn sample_continuous(
        &self,
        u: Float,
        pdf: Option<&mut Float>,
        off: Option<&mut usize>,
    ) -> Float {
        // find surrounding CDF segments and _offset_ (see pbrt.h,
        // FindInterval(int size, const Predicate &pred))
        let mut first: usize = 0;
        let mut len: usize = self.cdf.len();
        while len > 0_usize {
            let half: usize = len >> 1;
            let middle: usize = first + half;
            // bisect range based on value of _pred_ at _middle_
            if self.cdf[middle] <= u {
                first = middle + 1;
                len -= half + 1;
            } else {
                len = half;
            }
        }
        let offset: usize = clamp_t(
            first as isize - 1_isize,
            0_isize,
            self.cdf.len() as isize - 2_isize,
        ) as usize;
        if let Some(off_ref) = off {
            *off_ref = offset;
        }
        // compute offset along CDF segment
        let mut du: Float = u - self.cdf[offset];
        if (self.cdf[offset + 1] - self.cdf[offset]) > 0.0 as Float {
            du /= self.cdf[offset + 1] - self.cdf[offset];
        }
        // compute PDF for sampled offset
        if let Some(pdf_ref) = pdf {
            if self.func_int > 0.0 as Float {
                *pdf_ref = self.func[offset] / self.func_int;
            } else {
                *pdf_ref = 0.0;
            }
        }
        // return $x\in{}[0,1)$ corresponding to sample
        (offset as Float + du) / self.count() as Float
    }
}

#[derive(Debug, Default, Clone)]
pub struct Distribution2D {
    pub p_conditional_v: Vec<Arc<Distribution1D>>,
    pub p_marginal: Arc<Distribution1D>,
}

impl Distribution2D {
    pub fn new(func: Vec<Float>, nu: i32, nv: i32) -> Self {
        let mut p_conditional_v: Vec<Arc<Distribution1D>> = Vec::with_capacity(nv as usize);
        for v in 0..nv {
            // compute conditional sampling distribution for $\tilde{v}$
            let f: Vec<Float> = func[(v * nu) as usize..((v + 1) * nu) as usize].to_vec();
            p_conditional_v.push(Arc::new(Distribution1D::new(f)));
        }
        // compute marginal sampling distribution $p[\tilde{v}]$
        let mut marginal_func: Vec<Float> = Vec::with_capacity(nv as usize);
        for v in 0..nv {
            marginal_func.push(p_conditional_v[v as usize].func_int);
        }
        let p_marginal: Arc<Distribution1D> = Arc::new(Distribution1D::new(marginal_func));
        Distribution2D {
            p_conditional_v,
            p_marginal,
        }
    }
    pub fn sample_continuous(&self, u: &Point2f, pdf: &mut Float) -> Point2f {
        let mut pdfs: [Float; 2] = [0.0 as Float; 2];
        let mut v: usize = 0_usize;
        let d1: Float = self
            .p_marginal
            .sample_continuous(u[1], Some(&mut (pdfs[1])), Some(&mut v));
        let d0: Float = self.p_conditional_v[v].sample_continuous(u[0], Some(&mut (pdfs[0])), None);
        *pdf = pdfs[0] * pdfs[1];
        Point2f { x: d0, y: d1 }
    }
    pub fn pdf(&self, p: &Point2f) -> Float {
        let iu: usize = clamp_t(
            (p[0] * self.p_conditional_v[0].count() as Float) as usize,
            0_usize,
            self.p_conditional_v[0].count() - 1_usize,
        );
        let iv: usize = clamp_t(
            (p[1] * self.p_marginal.count() as Float) as usize,
            0_usize,
            self.p_marginal.count() - 1_usize,
        );
        if self.p_marginal.func_int == 0.0 as Float {
            return 0.0 as Float;
        }
        self.p_conditional_v[iv].func[iu] / self.p_marginal.func_int
    }
}

// see sampling.cpp

/// Uniformly sample rays in a full sphere. Choose a direction.
pub fn uniform_sample_sphere(u: &Point2f) -> Vector3f {
    let z: Float = 1.0 as Float - 2.0 as Float * u[0];
    let r: Float = (0.0 as Float).max(1.0 as Float - z * z).sqrt();
    let phi: Float = 2.0 as Float * PI * u[1];
    Vector3f {
        x: r * phi.cos(),
        y: r * phi.sin(),
        z,
    }
}

/// Probability density function (PDF) of a sphere.
pub fn uniform_sphere_pdf() -> Float {
    INV_4_PI
}

/// Map a unit direction to the unit square via the cylindrical
/// (cos θ, φ) parameterisation. The map preserves area, so a constant
/// function on the square is a constant function on the sphere; θ is
/// the angle against the z-axis.
pub fn cartesian_to_cylindrical(direction: &Vector3f) -> Point2f {
    let cos_theta: Float = direction.z;
    let mut phi: Float = direction.y.atan2(direction.x);
    if phi < 0.0 as Float {
        phi += 2.0 as Float * PI;
    }
    Point2f {
        x: (cos_theta + 1.0 as Float) * 0.5 as Float,
        y: phi / (2.0 as Float * PI),
    }
}

/// Inverse of [`cartesian_to_cylindrical`]; the input must lie in
/// [0, 1)².
pub fn cylindrical_to_cartesian(cylindrical_direction: &Point2f) -> Vector3f {
    debug_assert!(cylindrical_direction.x >= 0.0 && cylindrical_direction.x < 1.0);
    debug_assert!(cylindrical_direction.y >= 0.0 && cylindrical_direction.y < 1.0);
    let phi: Float = 2.0 as Float * PI * cylindrical_direction.y;
    let cos_theta: Float = 2.0 as Float * cylindrical_direction.x - 1.0 as Float;
    let sin_theta: Float = (0.0 as Float)
        .max(1.0 as Float - cos_theta * cos_theta)
        .sqrt();
    Vector3f {
        x: phi.cos() * sin_theta,
        y: phi.sin() * sin_theta,
        z: cos_theta,
    }
}
