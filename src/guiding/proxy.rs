//! The radiance proxy: a low-resolution map of the directional
//! distribution, multiplied by a cheap BSDF approximation at a
//! shading point to importance-sample the product of incident
//! radiance and material response ("Fast Product Importance Sampling
//! of Environment Maps" [Conty Estevez and Lecocq 2018]).
//!
//! Pixels whose quadtree leaf is finer than the map keep a stratum
//! reference so sub-pixel sampling re-enters the tree. The reference
//! is an index into a flattened copy of the quadtree owned by the
//! proxy, never a pointer into the live tree, so restructuring the
//! tree cannot invalidate a proxy that is still in flight.

// std
use std::sync::Arc;
// pbrt
use crate::core::bsdf::BsdfProxy;
use crate::core::geometry::{Point2f, Vector3f};
use crate::core::gpt::{clamp_t, Float, INV_4_PI, ONE_MINUS_EPSILON};
use crate::core::sampler::SamplingContext;
use crate::core::sampling::{
    cartesian_to_cylindrical, cylindrical_to_cartesian, Distribution2D,
};
use crate::guiding::quadtree::{flat_pdf, flat_sample, FlatQuadTreeNode, QuadTreeNode};

pub const PROXY_WIDTH: usize = 16;
const PROXY_PIXEL_COUNT: usize = PROXY_WIDTH * PROXY_WIDTH;
/// Strata marker for pixels fully covered by a single quadtree leaf.
const STRATUM_NONE: u16 = std::u16::MAX;

#[derive(Debug)]
pub struct RadianceProxy {
    map: [Float; PROXY_PIXEL_COUNT],
    nodes: Arc<Vec<FlatQuadTreeNode>>,
    strata: Arc<[u16; PROXY_PIXEL_COUNT]>,
    sampler: Option<Distribution2D>,
    is_built: bool,
    product_is_built: bool,
}

impl Default for RadianceProxy {
    fn default() -> Self {
        RadianceProxy {
            map: [0.0 as Float; PROXY_PIXEL_COUNT],
            nodes: Arc::new(Vec::new()),
            strata: Arc::new([STRATUM_NONE; PROXY_PIXEL_COUNT]),
            sampler: None,
            is_built: false,
            product_is_built: false,
        }
    }
}

impl Clone for RadianceProxy {
    /// A per-shading-point working copy: the map is duplicated (the
    /// product multiplies into it), the flattened tree is shared, and
    /// the product state starts fresh.
    fn clone(&self) -> Self {
        RadianceProxy {
            map: self.map,
            nodes: self.nodes.clone(),
            strata: self.strata.clone(),
            sampler: None,
            is_built: self.is_built,
            product_is_built: false,
        }
    }
}

impl RadianceProxy {
    pub fn new() -> Self {
        RadianceProxy::default()
    }
    pub fn is_built(&self) -> bool {
        self.is_built
    }
    pub fn invalidate(&mut self) {
        self.is_built = false;
        self.product_is_built = false;
        self.sampler = None;
    }
    /// Rebuild the map from a quadtree whose `previous_sum`s are
    /// current. `radiance_scale` converts leaf sums into mean
    /// radiance.
    pub fn build(&mut self, quadtree_root: &QuadTreeNode, radiance_scale: Float) {
        let mut end_level: usize = 0;
        let mut map_width: usize = PROXY_WIDTH;
        while map_width > 1 {
            end_level += 1;
            map_width >>= 1;
        }

        let mut nodes: Vec<FlatQuadTreeNode> = Vec::new();
        let mut strata: [u16; PROXY_PIXEL_COUNT] = [STRATUM_NONE; PROXY_PIXEL_COUNT];
        if quadtree_root.is_leaf() {
            for pixel in self.map.iter_mut() {
                *pixel = radiance_scale * quadtree_root.radiance_sum();
            }
        } else {
            quadtree_root.flatten(&mut nodes);
            fill_pixels(
                &nodes,
                NodeRef::Interior(0),
                radiance_scale,
                (0, 0),
                0,
                end_level,
                &mut self.map,
                &mut strata,
            );
        }
        for pixel_val in self.map.iter_mut() {
            if *pixel_val < 0.0 as Float || pixel_val.is_nan() || pixel_val.is_infinite() {
                *pixel_val = 0.0 as Float;
            }
        }
        self.nodes = Arc::new(nodes);
        self.strata = Arc::new(strata);
        self.sampler = None;
        self.product_is_built = false;
        self.is_built = true;
    }
    /// Multiply the map by the proxy BSDF's response and rebuild the
    /// 2-D importance sampler. Idempotent within one shading event.
    pub fn build_product(
        &mut self,
        bsdf_proxy: &mut BsdfProxy,
        outgoing: &Vector3f,
        shading_normal: &Vector3f,
    ) {
        debug_assert!(self.is_built);
        if self.product_is_built {
            return;
        }
        bsdf_proxy.finish_parameterization(outgoing, shading_normal);
        self.product_is_built = true;

        let inv_width: Float = 1.0 as Float / PROXY_WIDTH as Float;
        for y in 0..PROXY_WIDTH {
            for x in 0..PROXY_WIDTH {
                let cylindrical_direction: Point2f = Point2f {
                    x: (x as Float + 0.5 as Float) * inv_width,
                    y: (y as Float + 0.5 as Float) * inv_width,
                };
                let incoming: Vector3f = cylindrical_to_cartesian(&cylindrical_direction);
                self.map[y * PROXY_WIDTH + x] *= bsdf_proxy.evaluate(&incoming);
            }
        }
        self.sampler = Some(Distribution2D::new(
            self.map.to_vec(),
            PROXY_WIDTH as i32,
            PROXY_WIDTH as i32,
        ));
    }
    /// Draw a direction from the product map; returns the direction
    /// and its solid-angle pdf.
    pub fn sample(&self, sampling_context: &mut SamplingContext) -> (Vector3f, Float) {
        debug_assert!(self.is_built);
        let sampler: &Distribution2D = match &self.sampler {
            Some(sampler) => sampler,
            None => {
                // the product has not been built; nothing sensible to
                // sample from
                return (Vector3f::new(0.0, 0.0, 1.0), 0.0 as Float);
            }
        };
        sampling_context.split_in_place(2, 1);
        let u: Point2f = sampling_context.next_2d();
        let mut pdf: Float = 0.0;
        let p: Point2f = sampler.sample_continuous(&u, &mut pdf);
        let px: usize = ((p.x * PROXY_WIDTH as Float) as usize).min(PROXY_WIDTH - 1);
        let py: usize = ((p.y * PROXY_WIDTH as Float) as usize).min(PROXY_WIDTH - 1);

        let stratum: u16 = self.strata[py * PROXY_WIDTH + px];
        let mut cylindrical_direction: Point2f;
        if stratum != STRATUM_NONE {
            sampling_context.split_in_place(2, 1);
            let mut s: Point2f = sampling_context.next_2d();
            let mut sub_pdf: Float = 0.0;
            let sub: Point2f = flat_sample(&self.nodes, stratum, &mut s, &mut sub_pdf);
            pdf *= sub_pdf;
            cylindrical_direction = Point2f {
                x: (px as Float + sub.x) / PROXY_WIDTH as Float,
                y: (py as Float + sub.y) / PROXY_WIDTH as Float,
            };
        } else {
            // the continuous sample is already jittered uniformly
            // inside the pixel
            cylindrical_direction = p;
        }
        pdf *= INV_4_PI;
        cylindrical_direction.x = clamp_t(cylindrical_direction.x, 0.0, ONE_MINUS_EPSILON);
        cylindrical_direction.y = clamp_t(cylindrical_direction.y, 0.0, ONE_MINUS_EPSILON);
        (cylindrical_to_cartesian(&cylindrical_direction), pdf)
    }
    /// Solid-angle pdf of `direction` under the product map.
    pub fn pdf(&self, direction: &Vector3f) -> Float {
        debug_assert!(self.is_built);
        let sampler: &Distribution2D = match &self.sampler {
            Some(sampler) => sampler,
            None => return 0.0 as Float,
        };
        let cylindrical_direction: Point2f = cartesian_to_cylindrical(direction);
        let scaled: Point2f = cylindrical_direction * PROXY_WIDTH as Float;
        let px: usize = (scaled.x as usize).min(PROXY_WIDTH - 1);
        let py: usize = (scaled.y as usize).min(PROXY_WIDTH - 1);

        let mut pdf: Float = sampler.pdf(&cylindrical_direction);
        let stratum: u16 = self.strata[py * PROXY_WIDTH + px];
        if stratum != STRATUM_NONE {
            let mut sub_direction: Point2f = Point2f {
                x: scaled.x - px as Float,
                y: scaled.y - py as Float,
            };
            pdf *= flat_pdf(&self.nodes, stratum, &mut sub_direction);
        }
        pdf * INV_4_PI
    }
    /// Map-resolution radiance lookup (after `build_product` this is
    /// the product value).
    pub fn proxy_radiance(&self, direction: &Vector3f) -> Float {
        let cylindrical_direction: Point2f =
            cartesian_to_cylindrical(direction) * PROXY_WIDTH as Float;
        let px: usize = (cylindrical_direction.x as usize).min(PROXY_WIDTH - 1);
        let py: usize = (cylindrical_direction.y as usize).min(PROXY_WIDTH - 1);
        self.map[py * PROXY_WIDTH + px]
    }
}

#[derive(Debug, Copy, Clone)]
enum NodeRef {
    /// Index of an interior node in the flattened tree.
    Interior(u16),
    /// A leaf, carrying its radiance sum.
    Leaf(Float),
}

/// Paint the footprint of every quadtree node at (or above) the cut
/// level into the map. `radiance_factor` carries the 4^depth density
/// scaling so a node's footprint receives its mean radiance.
#[allow(clippy::too_many_arguments)]
fn fill_pixels(
    nodes: &[FlatQuadTreeNode],
    node_ref: NodeRef,
    radiance_factor: Float,
    origin: (usize, usize),
    depth: usize,
    end_level: usize,
    map: &mut [Float; PROXY_PIXEL_COUNT],
    strata: &mut [u16; PROXY_PIXEL_COUNT],
) {
    let at_cut: bool = depth == end_level;
    let (sum, stratum): (Float, u16) = match node_ref {
        NodeRef::Interior(index) => (nodes[index as usize].sum(), index),
        NodeRef::Leaf(sum) => (sum, STRATUM_NONE),
    };
    let is_leaf: bool = matches!(node_ref, NodeRef::Leaf(_));
    if at_cut || is_leaf {
        let level_diff: usize = end_level - depth;
        let width: usize = 1 << level_diff;
        let pixel_origin: (usize, usize) = (origin.0 << level_diff, origin.1 << level_diff);
        let radiance: Float = radiance_factor * sum;
        for y in 0..width {
            for x in 0..width {
                let pixel_index: usize =
                    (pixel_origin.1 + y) * PROXY_WIDTH + pixel_origin.0 + x;
                map[pixel_index] = radiance;
                strata[pixel_index] = if is_leaf { STRATUM_NONE } else { stratum };
            }
        }
    } else if let NodeRef::Interior(index) = node_ref {
        let node: FlatQuadTreeNode = nodes[index as usize];
        for (child, offset) in [(0, (0, 0)), (1, (1, 0)), (2, (0, 1)), (3, (1, 1))].iter() {
            let child_ref: NodeRef = if node.children[*child] == 0 {
                NodeRef::Leaf(node.sums[*child])
            } else {
                NodeRef::Interior(node.children[*child])
            };
            fill_pixels(
                nodes,
                child_ref,
                radiance_factor * 4.0 as Float,
                (2 * origin.0 + offset.0, 2 * origin.1 + offset.1),
                depth + 1,
                end_level,
                map,
                strata,
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::bsdf::BsdfProxy;
    use crate::core::geometry::vec3_normalize;
    use crate::core::gpt::FOUR_PI;
    use crate::core::rng::Rng;
    use crate::core::sampling::uniform_sample_sphere;
    use crate::guiding::DTREE_THRESHOLD;

    fn peaked_quadtree(rng: &mut Rng) -> QuadTreeNode {
        let mut root: QuadTreeNode = QuadTreeNode::new(true, 0.0);
        for round in 0..3 {
            for _ in 0..50_000 {
                let mut p: Point2f = if rng.uniform_float() < 0.5 {
                    Point2f::new(
                        0.75 + rng.uniform_float() * 0.25,
                        rng.uniform_float() * 0.25,
                    )
                } else {
                    Point2f::new(rng.uniform_float(), rng.uniform_float())
                };
                root.add_radiance(&mut p, 1.0);
            }
            let total: Float = root.build_sums();
            if round < 2 {
                root.restructure(total, DTREE_THRESHOLD, None, 1);
            }
        }
        root
    }

    fn translucent_product_proxy() -> BsdfProxy {
        // responds on both hemispheres so the product map never
        // vanishes
        let mut bsdf_proxy: BsdfProxy = BsdfProxy::new();
        bsdf_proxy.add_diffuse_weight(1.0);
        bsdf_proxy.add_translucency_weight(1.0);
        bsdf_proxy
    }

    #[test]
    fn product_pdf_integrates_to_one() {
        let mut rng: Rng = Rng::new();
        rng.set_sequence(21);
        let root: QuadTreeNode = peaked_quadtree(&mut rng);
        let mut proxy: RadianceProxy = RadianceProxy::new();
        proxy.build(&root, INV_4_PI / 50_000.0);
        assert!(proxy.is_built());
        let mut bsdf_proxy: BsdfProxy = translucent_product_proxy();
        proxy.build_product(
            &mut bsdf_proxy,
            &Vector3f::new(0.0, 0.0, 1.0),
            &Vector3f::new(0.0, 0.0, 1.0),
        );
        // (1/N) sum pdf(w_i) * 4pi over uniform directions -> 1
        let n: usize = 200_000;
        let mut sum: Float = 0.0;
        for _ in 0..n {
            let u: Point2f = Point2f::new(rng.uniform_float(), rng.uniform_float());
            let w: Vector3f = vec3_normalize(&uniform_sample_sphere(&u));
            sum += proxy.pdf(&w);
        }
        let integral: Float = sum / n as Float * FOUR_PI;
        assert!(
            (integral - 1.0).abs() < 0.03,
            "pdf integral = {:?}",
            integral
        );
    }

    #[test]
    fn sample_and_pdf_agree() {
        let mut rng: Rng = Rng::new();
        rng.set_sequence(22);
        let root: QuadTreeNode = peaked_quadtree(&mut rng);
        let mut proxy: RadianceProxy = RadianceProxy::new();
        proxy.build(&root, INV_4_PI / 50_000.0);
        let mut bsdf_proxy: BsdfProxy = translucent_product_proxy();
        proxy.build_product(
            &mut bsdf_proxy,
            &Vector3f::new(0.0, 0.0, 1.0),
            &Vector3f::new(0.0, 0.0, 1.0),
        );
        let mut sc: SamplingContext = SamplingContext::new(23);
        let mut checked: usize = 0;
        let mut agreeing: usize = 0;
        for _ in 0..2000 {
            let (direction, pdf) = proxy.sample(&mut sc);
            if pdf <= 0.0 {
                continue;
            }
            // roundoff at a pixel boundary legitimately flips the
            // queried pixel, so only probe well inside pixels
            let scaled: Point2f =
                cartesian_to_cylindrical(&direction) * PROXY_WIDTH as Float;
            let fx: Float = scaled.x - scaled.x.floor();
            let fy: Float = scaled.y - scaled.y.floor();
            if fx < 0.01 || fx > 0.99 || fy < 0.01 || fy > 0.99 {
                continue;
            }
            checked += 1;
            let queried: Float = proxy.pdf(&direction);
            if (queried - pdf).abs() <= 0.02 * pdf + 1e-4 {
                agreeing += 1;
            }
        }
        // sub-pixel strata boundaries can still flip under the
        // cylindrical round trip, so demand near-total agreement
        // rather than perfection
        assert!(checked > 1000);
        assert!(
            agreeing * 100 >= checked * 99,
            "only {:?} of {:?} samples agree",
            agreeing,
            checked
        );
    }

    #[test]
    fn clone_shares_tree_but_resets_product() {
        let mut rng: Rng = Rng::new();
        rng.set_sequence(24);
        let root: QuadTreeNode = peaked_quadtree(&mut rng);
        let mut proxy: RadianceProxy = RadianceProxy::new();
        proxy.build(&root, INV_4_PI / 50_000.0);
        let mut working_copy: RadianceProxy = proxy.clone();
        assert!(working_copy.is_built());
        assert!(!working_copy.product_is_built);
        let mut bsdf_proxy: BsdfProxy = translucent_product_proxy();
        working_copy.build_product(
            &mut bsdf_proxy,
            &Vector3f::new(0.0, 0.0, 1.0),
            &Vector3f::new(0.0, 0.0, 1.0),
        );
        // the original proxy's map is untouched by the product build
        assert!(proxy.sampler.is_none());
        let up: Vector3f = Vector3f::new(0.0, 0.0, 0.999);
        assert!(proxy.proxy_radiance(&vec3_normalize(&up)) >= 0.0);
    }
}
