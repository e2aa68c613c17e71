//! The directional quadtree: an adaptive 4-way subdivision of the
//! unit square (the cylindrical parameterisation of the sphere) whose
//! leaves accumulate incident radiance.
//!
//! Many worker threads splat into `current_sum` atomics during a
//! pass; `build_sums` publishes the frozen `previous_sum`s that
//! sampling and pdf evaluation read during the next pass, and
//! `restructure` adapts the topology to the observed energy
//! (Algorithm 4 of the practical path guiding supplement, with the
//! sampling and pdf descents of Algorithms 1 and 2).

// pbrt
use crate::core::geometry::{bnd2_intersect_bnd2f, Bounds2f, Point2f, Vector2f};
use crate::core::gpt::{Float, ONE_MINUS_EPSILON};
use crate::core::parallel::AtomicFloat;
use crate::guiding::DTREE_MAX_DEPTH;

/// Quadrant order: upper-left, upper-right, lower-left, lower-right,
/// where "upper" is y < 0.5 in the unit square.
const CHILD_OFFSETS: [Vector2f; 4] = [
    Vector2f { x: 0.0, y: 0.0 },
    Vector2f { x: 0.5, y: 0.0 },
    Vector2f { x: 0.0, y: 0.5 },
    Vector2f { x: 0.5, y: 0.5 },
];

#[derive(Debug)]
pub struct QuadTreeNode {
    current_sum: AtomicFloat,
    previous_sum: Float,
    children: Option<Box<[QuadTreeNode; 4]>>,
}

impl Clone for QuadTreeNode {
    fn clone(&self) -> Self {
        QuadTreeNode {
            current_sum: self.current_sum.clone(),
            previous_sum: self.previous_sum,
            children: self.children.clone(),
        }
    }
}

impl QuadTreeNode {
    pub fn new(create_children: bool, radiance_sum: Float) -> Self {
        let children: Option<Box<[QuadTreeNode; 4]>> = if create_children {
            Some(QuadTreeNode::new_leaves(0.0 as Float))
        } else {
            None
        };
        QuadTreeNode {
            current_sum: AtomicFloat::new(radiance_sum),
            previous_sum: radiance_sum,
            children,
        }
    }
    fn new_leaves(radiance_sum: Float) -> Box<[QuadTreeNode; 4]> {
        Box::new([
            QuadTreeNode::new(false, radiance_sum),
            QuadTreeNode::new(false, radiance_sum),
            QuadTreeNode::new(false, radiance_sum),
            QuadTreeNode::new(false, radiance_sum),
        ])
    }
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
    pub fn radiance_sum(&self) -> Float {
        self.previous_sum
    }
    /// Pick the quadrant containing `direction` and renormalise the
    /// coordinate to the quadrant's own unit square.
    fn choose_child(direction: &mut Point2f) -> usize {
        let mut child: usize = 0;
        if direction.x < 0.5 as Float {
            direction.x *= 2.0 as Float;
        } else {
            direction.x = direction.x * 2.0 as Float - 1.0 as Float;
            child |= 1;
        }
        if direction.y < 0.5 as Float {
            direction.y *= 2.0 as Float;
        } else {
            direction.y = direction.y * 2.0 as Float - 1.0 as Float;
            child |= 2;
        }
        child
    }
    /// Nearest-filter record: descend to the leaf under `direction`
    /// and accumulate atomically.
    pub fn add_radiance(&self, direction: &mut Point2f, radiance: Float) {
        if let Some(children) = &self.children {
            let child: usize = QuadTreeNode::choose_child(direction);
            children[child].add_radiance(direction, radiance);
        } else {
            self.current_sum.add(radiance);
        }
    }
    /// Box-filter record: accumulate `radiance` times the overlapped
    /// area into every touched leaf.
    pub fn add_radiance_box(&self, splat_aabb: &Bounds2f, node_aabb: &Bounds2f, radiance: Float) {
        let intersection_aabb: Bounds2f = bnd2_intersect_bnd2f(splat_aabb, node_aabb);
        if !intersection_aabb.is_valid() {
            return;
        }
        let intersection_area: Float = intersection_aabb.area();
        if intersection_area <= 0.0 as Float {
            return;
        }
        if let Some(children) = &self.children {
            let node_size: Vector2f = node_aabb.diagonal();
            for (i, child) in children.iter().enumerate() {
                let child_min: Point2f = node_aabb.p_min
                    + Vector2f {
                        x: CHILD_OFFSETS[i].x * node_size.x,
                        y: CHILD_OFFSETS[i].y * node_size.y,
                    };
                let child_aabb: Bounds2f = Bounds2f {
                    p_min: child_min,
                    p_max: child_min + node_size * 0.5 as Float,
                };
                child.add_radiance_box(splat_aabb, &child_aabb, radiance);
            }
        } else {
            self.current_sum.add(radiance * intersection_area);
        }
    }
    pub fn max_depth(&self) -> usize {
        match &self.children {
            Some(children) => 1 + children.iter().map(|c| c.max_depth()).max().unwrap_or(0),
            None => 1,
        }
    }
    pub fn node_count(&self) -> usize {
        match &self.children {
            Some(children) => 1 + children.iter().map(|c| c.node_count()).sum::<usize>(),
            None => 1,
        }
    }
    /// Depth of the leaf containing `direction`, counting this node
    /// as 1.
    pub fn depth_at(&self, direction: &mut Point2f) -> usize {
        if let Some(children) = &self.children {
            let child: usize = QuadTreeNode::choose_child(direction);
            1 + children[child].depth_at(direction)
        } else {
            1
        }
    }
    /// Publish the per-iteration sums bottom-up; returns this node's
    /// new `previous_sum`.
    pub fn build_sums(&mut self) -> Float {
        match &mut self.children {
            Some(children) => {
                let mut sum: Float = 0.0;
                for child in children.iter_mut() {
                    sum += child.build_sums();
                }
                self.previous_sum = sum;
                sum
            }
            None => {
                self.previous_sum = self.current_sum.load();
                self.previous_sum
            }
        }
    }
    /// Adapt the topology: subdivide leaves holding more than
    /// `subdiv_threshold` of the total energy, collapse interior
    /// nodes that fall below it, and zero the accumulators for the
    /// next iteration.
    ///
    /// When `sorted_energy_ratios` is supplied, every interior node
    /// whose upper-left child just became a leaf contributes a
    /// `(node area, 4 * child energy fraction)` pair, kept sorted by
    /// ascending area. The caller uses the list to classify the
    /// distribution as glossy or diffuse.
    pub fn restructure(
        &mut self,
        total_radiance_sum: Float,
        subdiv_threshold: Float,
        mut sorted_energy_ratios: Option<&mut Vec<(Float, Float)>>,
        depth: usize,
    ) {
        let fraction: Float = self.previous_sum / total_radiance_sum;
        if fraction > subdiv_threshold && depth < DTREE_MAX_DEPTH {
            if self.children.is_none() {
                let quarter_sum: Float = 0.25 as Float * self.previous_sum;
                self.children = Some(QuadTreeNode::new_leaves(quarter_sum));
            }
            if let Some(children) = &mut self.children {
                for child in children.iter_mut() {
                    child.restructure(
                        total_radiance_sum,
                        subdiv_threshold,
                        sorted_energy_ratios.as_deref_mut(),
                        depth + 1,
                    );
                }
            }
        } else if self.children.is_some() {
            self.children = None;
        }
        if let Some(list) = sorted_energy_ratios.as_deref_mut() {
            if let Some(children) = &self.children {
                if children[0].is_leaf() {
                    let ratio: (Float, Float) = (
                        (0.25 as Float).powi(depth as i32 - 1),
                        4.0 as Float * children[0].radiance_sum() / total_radiance_sum,
                    );
                    let pos: usize = list.partition_point(|probe| probe < &ratio);
                    list.insert(pos, ratio);
                }
            }
        }
        self.current_sum.store(0.0);
    }
    /// Forget everything: an interior node over four empty leaves.
    pub fn reset(&mut self) {
        self.children = Some(QuadTreeNode::new_leaves(0.0 as Float));
        self.current_sum.store(0.0);
        self.previous_sum = 0.0;
    }
    /// Sample a point on the unit square with probability
    /// proportional to the stored radiance; `pdf` receives the
    /// density over the square.
    pub fn sample(&self, sample: &mut Point2f, pdf: &mut Float) -> Point2f {
        // initiate to one for the recursive sampling routine
        *pdf = 1.0 as Float / self.previous_sum;
        self.sample_recursive(sample, pdf)
    }
    fn sample_recursive(&self, sample: &mut Point2f, pdf: &mut Float) -> Point2f {
        // keep each dimension < 1.0 after the renormalisation of the
        // previous recursion step
        if sample.x >= 1.0 as Float {
            sample.x = ONE_MINUS_EPSILON;
        }
        if sample.y >= 1.0 as Float {
            sample.y = ONE_MINUS_EPSILON;
        }
        let children: &[QuadTreeNode; 4] = match &self.children {
            Some(children) => children,
            None => {
                *pdf *= self.previous_sum;
                return *sample;
            }
        };
        let upper_left: Float = children[0].previous_sum;
        let upper_right: Float = children[1].previous_sum;
        let lower_left: Float = children[2].previous_sum;
        let lower_right: Float = children[3].previous_sum;
        let sum_left_half: Float = upper_left + lower_left;
        let sum_right_half: Float = upper_right + lower_right;
        let mut factor: Float = sum_left_half / self.previous_sum;
        *pdf *= 4.0 as Float;
        // sample child nodes with probability proportional to their
        // energy
        let child: usize;
        if sample.x < factor {
            sample.x /= factor;
            factor = upper_left / sum_left_half;
            if sample.y < factor {
                sample.y /= factor;
                child = 0;
            } else {
                sample.y = (sample.y - factor) / (1.0 as Float - factor);
                child = 2;
            }
        } else {
            sample.x = (sample.x - factor) / (1.0 as Float - factor);
            factor = upper_right / sum_right_half;
            if sample.y < factor {
                sample.y /= factor;
                child = 1;
            } else {
                sample.y = (sample.y - factor) / (1.0 as Float - factor);
                child = 3;
            }
        }
        children[child].sample_recursive(sample, pdf) * 0.5 as Float + CHILD_OFFSETS[child]
    }
    /// Density over the unit square of the distribution `sample`
    /// draws from.
    pub fn pdf(&self, direction: &mut Point2f) -> Float {
        self.pdf_recursive(direction) / self.previous_sum
    }
    fn pdf_recursive(&self, direction: &mut Point2f) -> Float {
        if let Some(children) = &self.children {
            let child: usize = QuadTreeNode::choose_child(direction);
            4.0 as Float * children[child].pdf_recursive(direction)
        } else {
            self.previous_sum
        }
    }
    /// Mean radiance at `direction` (the leaf sum scaled by the
    /// reciprocal leaf area).
    pub fn radiance(&self, direction: &mut Point2f) -> Float {
        if let Some(children) = &self.children {
            let child: usize = QuadTreeNode::choose_child(direction);
            4.0 as Float * children[child].radiance(direction)
        } else {
            self.previous_sum
        }
    }
    /// Flatten the tree below this (interior) node into the compact
    /// form shared by the snapshot format and the radiance proxy:
    /// each flat node stores its four children's sums and child
    /// indices, index 0 meaning "leaf".
    pub fn flatten(&self, nodes: &mut Vec<FlatQuadTreeNode>) {
        let index: usize = nodes.len();
        nodes.push(FlatQuadTreeNode::default());
        if let Some(children) = &self.children {
            for (i, child) in children.iter().enumerate() {
                nodes[index].sums[i] = child.previous_sum;
                if child.is_leaf() {
                    nodes[index].children[i] = 0;
                } else {
                    let next_index: u16 = nodes.len() as u16;
                    nodes[index].children[i] = next_index;
                    child.flatten(nodes);
                }
            }
        }
    }
}

/// A quadtree node in pre-order flattened form; child index 0 marks a
/// leaf (the root can never be a child).
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct FlatQuadTreeNode {
    pub sums: [Float; 4],
    pub children: [u16; 4],
}

impl FlatQuadTreeNode {
    pub fn sum(&self) -> Float {
        self.sums[0] + self.sums[1] + self.sums[2] + self.sums[3]
    }
}

/// `QuadTreeNode::sample` against the flattened form, starting at
/// `index`; `pdf` receives the density over the node's own unit
/// square.
pub fn flat_sample(
    nodes: &[FlatQuadTreeNode],
    index: u16,
    s: &mut Point2f,
    pdf: &mut Float,
) -> Point2f {
    let total: Float = nodes[index as usize].sum();
    if total <= 0.0 as Float {
        *pdf = 1.0 as Float;
        return *s;
    }
    *pdf = 1.0 as Float / total;
    flat_sample_recursive(nodes, index, s, pdf)
}

fn flat_sample_recursive(
    nodes: &[FlatQuadTreeNode],
    index: u16,
    s: &mut Point2f,
    pdf: &mut Float,
) -> Point2f {
    if s.x >= 1.0 as Float {
        s.x = ONE_MINUS_EPSILON;
    }
    if s.y >= 1.0 as Float {
        s.y = ONE_MINUS_EPSILON;
    }
    let node: FlatQuadTreeNode = nodes[index as usize];
    let sum_left_half: Float = node.sums[0] + node.sums[2];
    let sum_right_half: Float = node.sums[1] + node.sums[3];
    let node_sum: Float = sum_left_half + sum_right_half;
    *pdf *= 4.0 as Float;
    let mut factor: Float = sum_left_half / node_sum;
    let child: usize;
    if s.x < factor {
        s.x /= factor;
        factor = node.sums[0] / sum_left_half;
        if s.y < factor {
            s.y /= factor;
            child = 0;
        } else {
            s.y = (s.y - factor) / (1.0 as Float - factor);
            child = 2;
        }
    } else {
        s.x = (s.x - factor) / (1.0 as Float - factor);
        factor = node.sums[1] / sum_right_half;
        if s.y < factor {
            s.y /= factor;
            child = 1;
        } else {
            s.y = (s.y - factor) / (1.0 as Float - factor);
            child = 3;
        }
    }
    if node.children[child] == 0 {
        *pdf *= node.sums[child];
        *s * 0.5 as Float + CHILD_OFFSETS[child]
    } else {
        flat_sample_recursive(nodes, node.children[child], s, pdf) * 0.5 as Float
            + CHILD_OFFSETS[child]
    }
}

/// `QuadTreeNode::pdf` against the flattened form, starting at
/// `index`.
pub fn flat_pdf(nodes: &[FlatQuadTreeNode], index: u16, direction: &mut Point2f) -> Float {
    let total: Float = nodes[index as usize].sum();
    if total <= 0.0 as Float {
        return 0.0 as Float;
    }
    flat_pdf_recursive(nodes, index, direction) / total
}

fn flat_pdf_recursive(nodes: &[FlatQuadTreeNode], index: u16, direction: &mut Point2f) -> Float {
    let node: FlatQuadTreeNode = nodes[index as usize];
    let child: usize = QuadTreeNode::choose_child(direction);
    if node.children[child] == 0 {
        4.0 as Float * node.sums[child]
    } else {
        4.0 as Float * flat_pdf_recursive(nodes, node.children[child], direction)
    }
}
