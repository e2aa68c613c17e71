//! Per-path bookkeeping: every bounce appends a vertex, radiance
//! arriving later in the path is distributed back to the stored
//! vertices, and at path end each vertex is replayed into the SD-tree
//! as a radiance record.

// others
use smallvec::SmallVec;
// pbrt
use crate::core::geometry::{Point3f, Vector3f};
use crate::core::gpt::{Float, Spectrum};
use crate::core::sampler::SamplingContext;
use crate::guiding::dtree::{DTree, DTreeRecord, GuidingMethod};
use crate::guiding::stree::STree;

/// Paths beyond this length stop recording; later bounces carry
/// almost no learnable signal.
pub const MAX_PATH_VERTICES: usize = 32;

#[derive(Debug, Clone)]
pub struct GPTVertex<'a> {
    pub d_tree: &'a DTree,
    pub d_tree_node_size: Vector3f,
    pub point: Point3f,
    pub direction: Vector3f,
    pub throughput: Spectrum,
    pub bsdf_value: Spectrum,
    pub radiance: Spectrum,
    pub wi_pdf: Float,
    pub bsdf_pdf: Float,
    pub d_tree_pdf: Float,
    pub product_pdf: Float,
    pub is_delta: bool,
    pub guiding_method: GuidingMethod,
}

impl<'a> GPTVertex<'a> {
    pub fn add_radiance(&mut self, radiance: &Spectrum) {
        self.radiance += *radiance;
    }
    /// Replay this vertex into the SD-tree. A non-finite or negative
    /// channel anywhere invalidates the whole vertex.
    pub fn record_to_tree(&self, sd_tree: &STree, sampling_context: &mut SamplingContext) {
        let mut incoming_radiance: Spectrum = Spectrum::default();
        let mut product: Spectrum = Spectrum::default();
        for i in 0..3 {
            if !self.radiance[i].is_finite()
                || self.radiance[i] < 0.0 as Float
                || !self.bsdf_value[i].is_finite()
                || self.bsdf_value[i] < 0.0 as Float
            {
                return;
            }
            let rcp_factor: Float = if self.throughput[i] == 0.0 as Float {
                0.0 as Float
            } else {
                1.0 as Float / self.throughput[i]
            };
            incoming_radiance.c[i] = self.radiance[i] * rcp_factor;
            product.c[i] = incoming_radiance[i] * self.bsdf_value[i];
        }
        let d_tree_record: DTreeRecord = DTreeRecord {
            direction: self.direction,
            radiance: incoming_radiance.average_value(),
            wi_pdf: self.wi_pdf,
            bsdf_pdf: self.bsdf_pdf,
            d_tree_pdf: self.d_tree_pdf,
            product_pdf: self.product_pdf,
            sample_weight: 1.0,
            product: product.average_value(),
            is_delta: self.is_delta,
            guiding_method: self.guiding_method,
        };
        sd_tree.record(
            self.d_tree,
            &self.point,
            self.d_tree_node_size,
            d_tree_record,
            sampling_context,
        );
    }
}

#[derive(Debug, Default)]
pub struct GPTVertexPath<'a> {
    path: SmallVec<[GPTVertex<'a>; MAX_PATH_VERTICES]>,
}

impl<'a> GPTVertexPath<'a> {
    pub fn new() -> Self {
        GPTVertexPath {
            path: SmallVec::new(),
        }
    }
    pub fn add_vertex(&mut self, vertex: GPTVertex<'a>) {
        if self.path.len() < MAX_PATH_VERTICES {
            self.path.push(vertex);
        }
    }
    /// Distribute radiance found further along the path to every
    /// stored vertex.
    pub fn add_radiance(&mut self, radiance: &Spectrum) {
        for vertex in self.path.iter_mut() {
            vertex.add_radiance(radiance);
        }
    }
    /// Like `add_radiance`, but skips the last vertex (the one whose
    /// own emission produced this contribution).
    pub fn add_indirect_radiance(&mut self, radiance: &Spectrum) {
        let count: usize = self.path.len().saturating_sub(1);
        for vertex in self.path.iter_mut().take(count) {
            vertex.add_radiance(radiance);
        }
    }
    pub fn is_full(&self) -> bool {
        self.path.len() >= MAX_PATH_VERTICES
    }
    pub fn len(&self) -> usize {
        self.path.len()
    }
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
    pub fn record_to_tree(&self, sd_tree: &STree, sampling_context: &mut SamplingContext) {
        for vertex in self.path.iter() {
            vertex.record_to_tree(sd_tree, sampling_context);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::geometry::Bounds3f;
    use crate::guiding::params::{GPTParameters, SpatialFilter};
    use std::sync::Arc;

    fn test_s_tree() -> STree {
        STree::new(
            Bounds3f::new(Point3f::new(0.0, 0.0, 0.0), Point3f::new(1.0, 1.0, 1.0)),
            Arc::new(GPTParameters {
                spatial_filter: SpatialFilter::Nearest,
                ..GPTParameters::default()
            }),
        )
    }

    fn test_vertex<'a>(s_tree: &'a STree, radiance: Spectrum) -> GPTVertex<'a> {
        let point: Point3f = Point3f::new(0.5, 0.5, 0.5);
        let mut d_tree_node_size: Vector3f = Vector3f::default();
        let d_tree: &DTree = s_tree.get_d_tree_and_size(&point, &mut d_tree_node_size);
        GPTVertex {
            d_tree,
            d_tree_node_size,
            point,
            direction: Vector3f::new(0.0, 0.0, 1.0),
            throughput: Spectrum::new(0.5),
            bsdf_value: Spectrum::new(0.25),
            radiance,
            wi_pdf: 1.0,
            bsdf_pdf: 0.5,
            d_tree_pdf: 0.25,
            product_pdf: 0.0,
            is_delta: false,
            guiding_method: GuidingMethod::PathGuiding,
        }
    }

    #[test]
    fn valid_vertex_lands_in_the_tree() {
        let s_tree: STree = test_s_tree();
        let mut sc: SamplingContext = SamplingContext::new(61);
        let mut path: GPTVertexPath = GPTVertexPath::new();
        path.add_vertex(test_vertex(&s_tree, Spectrum::new(0.0)));
        path.add_radiance(&Spectrum::new(1.0));
        path.record_to_tree(&s_tree, &mut sc);
        let d_tree: &DTree = s_tree.get_d_tree(&Point3f::new(0.5, 0.5, 0.5));
        assert_eq!(d_tree.sample_weight(), 1.0);
    }

    #[test]
    fn invalid_channel_skips_the_whole_vertex() {
        let s_tree: STree = test_s_tree();
        let mut sc: SamplingContext = SamplingContext::new(62);
        let mut path: GPTVertexPath = GPTVertexPath::new();
        path.add_vertex(test_vertex(
            &s_tree,
            Spectrum::rgb(1.0, Float::NAN, 1.0),
        ));
        path.add_vertex(test_vertex(&s_tree, Spectrum::rgb(1.0, 1.0, -0.5)));
        path.record_to_tree(&s_tree, &mut sc);
        let d_tree: &DTree = s_tree.get_d_tree(&Point3f::new(0.5, 0.5, 0.5));
        assert_eq!(d_tree.sample_weight(), 0.0);
    }

    #[test]
    fn indirect_radiance_skips_the_last_vertex() {
        let s_tree: STree = test_s_tree();
        let mut path: GPTVertexPath = GPTVertexPath::new();
        path.add_vertex(test_vertex(&s_tree, Spectrum::new(0.0)));
        path.add_vertex(test_vertex(&s_tree, Spectrum::new(0.0)));
        path.add_indirect_radiance(&Spectrum::new(2.0));
        assert_eq!(path.path[0].radiance, Spectrum::new(2.0));
        assert_eq!(path.path[1].radiance, Spectrum::new(0.0));
    }

    #[test]
    fn path_is_bounded() {
        let s_tree: STree = test_s_tree();
        let mut path: GPTVertexPath = GPTVertexPath::new();
        for _ in 0..(MAX_PATH_VERTICES + 10) {
            path.add_vertex(test_vertex(&s_tree, Spectrum::new(0.0)));
        }
        assert!(path.is_full());
        assert_eq!(path.len(), MAX_PATH_VERTICES);
    }

    #[test]
    fn zero_throughput_is_zero_safe() {
        let s_tree: STree = test_s_tree();
        let mut sc: SamplingContext = SamplingContext::new(63);
        let mut vertex: GPTVertex = test_vertex(&s_tree, Spectrum::new(1.0));
        vertex.throughput = Spectrum::new(0.0);
        vertex.record_to_tree(&s_tree, &mut sc);
        let d_tree: &DTree = s_tree.get_d_tree(&Point3f::new(0.5, 0.5, 0.5));
        // the record still lands, with zero incoming radiance
        assert_eq!(d_tree.sample_weight(), 1.0);
    }
}
